//! Cryptographic primitives and implementations

pub mod cipher;
pub mod codes;
pub mod counter;
pub mod ecies;
pub mod kdf;
pub mod keys;
pub mod password;
pub mod sealing;

// Re-export commonly used types
pub use counter::HashBasedCounter;
pub use ecies::{Ecies, EciesCryptogram, EnvelopeKey};
pub use keys::EcKeyPair;
pub use sealing::{EncryptionMode, KeyVault, SealedRecord};
