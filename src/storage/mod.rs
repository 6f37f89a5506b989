// src/storage/mod.rs
pub mod encrypted;
pub mod repository;

pub use encrypted::{EncryptedStore, StorageError};
pub use repository::Repositories;
