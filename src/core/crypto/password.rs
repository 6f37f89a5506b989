// src/core/crypto/password.rs
//! Argon2id hashing for recovery PUKs. Hashes are PHC strings and are
//! additionally sealed by the key-at-rest codec before storage.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::utils::error::{Result, ServiceError};

pub fn hash_puk(puk: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    let hash = argon2
        .hash_password(puk.as_bytes(), &salt)
        .map_err(|_| ServiceError::GenericCryptographyError)?
        .to_string();

    Ok(hash)
}

/// Constant-time verification of a candidate PUK against a PHC hash.
pub fn verify_puk(puk: &str, puk_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(puk_hash).map_err(|_| ServiceError::GenericCryptographyError)?;

    match Argon2::default().verify_password(puk.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(_) => Err(ServiceError::GenericCryptographyError),
    }
}
