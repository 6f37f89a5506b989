// src/utils/config.rs
use config::{Config as ConfigLib, Environment, File};
use serde::Deserialize;

use super::error::{Result, ServiceError};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub activation: ActivationConfig,
    pub callbacks: CallbackConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub path: String,
    pub encryption_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CryptoConfig {
    /// Base64-encoded master secret protecting server private keys and
    /// recovery PUK hashes at rest.
    pub master_secret: String,
    /// Mode used when writing new sealed records: "no_encryption" or
    /// "aes_hmac". Reads always honor the mode stored with the record.
    pub key_encryption_mode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivationConfig {
    pub id_generation_iterations: u32,
    pub code_generation_iterations: u32,
    pub token_generation_iterations: u32,
    pub recovery_code_generation_iterations: u32,
    pub default_max_failed_attempts: u64,
    pub recovery_max_failed_attempts: u64,
    pub signature_validation_lookahead: u64,
    /// How long a CREATED/OTP_USED activation stays valid, in seconds.
    pub validity_period_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackConfig {
    pub connection_timeout_ms: u64,
    pub proxy: Option<ProxyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Config {
    pub fn new() -> Result<Self> {
        let config = ConfigLib::builder()
            .add_source(File::with_name("config/server").required(false))
            .add_source(Environment::with_prefix("KEYFORT").separator("__"))
            .build()
            .map_err(|e| ServiceError::Unknown(format!("Configuration error: {}", e)))?;

        config
            .try_deserialize()
            .map_err(|e| ServiceError::Unknown(format!("Configuration error: {}", e)))
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            id_generation_iterations: 10,
            code_generation_iterations: 10,
            token_generation_iterations: 10,
            recovery_code_generation_iterations: 10,
            default_max_failed_attempts: 5,
            recovery_max_failed_attempts: 10,
            signature_validation_lookahead: 20,
            validity_period_secs: 300,
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: 5000,
            proxy: None,
        }
    }
}
