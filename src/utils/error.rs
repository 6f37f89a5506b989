// src/utils/error.rs
use thiserror::Error;

/// Service-level error taxonomy. Every fallible operation on the RPC
/// surface resolves to exactly one of these kinds; cryptographic failures
/// collapse to `DecryptionFailed` at the boundary so callers cannot learn
/// which step failed.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Activation with given activation ID was not found")]
    ActivationNotFound,

    #[error("Activation has expired")]
    ActivationExpired,

    #[error("Activation is in incorrect state for the requested operation")]
    ActivationIncorrectState,

    #[error("Application or application version is invalid or unsupported")]
    InvalidApplication,

    #[error("Invalid key format")]
    InvalidKeyFormat,

    #[error("Master server key pair contains a private key in incorrect format")]
    IncorrectMasterServerKeypairPrivate,

    #[error("No master server key pair configured for given application")]
    NoMasterServerKeypair,

    #[error("Unable to decrypt record")]
    DecryptionFailed,

    #[error("Generic cryptography error")]
    GenericCryptographyError,

    #[error("Invalid cryptographic provider")]
    InvalidCryptoProvider,

    #[error("Invalid input format")]
    InvalidInputFormat,

    #[error("Invalid request")]
    InvalidRequest,

    #[error("User ID was not specified")]
    NoUserId,

    #[error("Application ID was not specified")]
    NoApplicationId,

    #[error("Too many failed attempts to generate activation ID")]
    UnableToGenerateActivationId,

    #[error("Too many failed attempts to generate activation code")]
    UnableToGenerateActivationCode,

    #[error("Too many failed attempts to generate token")]
    UnableToGenerateToken,

    #[error("Too many failed attempts to generate recovery code")]
    UnableToGenerateRecoveryCode,

    #[error("Recovery code already exists")]
    RecoveryCodeAlreadyExists,

    #[error("Invalid recovery code or PUK")]
    InvalidRecoveryCode { current_puk_index: Option<u64> },

    #[error("Invalid callback URL format")]
    InvalidUrlFormat,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ServiceError {
    /// Stable error code carried on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::ActivationNotFound => "ACTIVATION_NOT_FOUND",
            ServiceError::ActivationExpired => "ACTIVATION_EXPIRED",
            ServiceError::ActivationIncorrectState => "ACTIVATION_INCORRECT_STATE",
            ServiceError::InvalidApplication => "INVALID_APPLICATION",
            ServiceError::InvalidKeyFormat => "INVALID_KEY_FORMAT",
            ServiceError::IncorrectMasterServerKeypairPrivate => {
                "INCORRECT_MASTER_SERVER_KEYPAIR_PRIVATE"
            }
            ServiceError::NoMasterServerKeypair => "NO_MASTER_SERVER_KEYPAIR",
            ServiceError::DecryptionFailed => "DECRYPTION_FAILED",
            ServiceError::GenericCryptographyError => "GENERIC_CRYPTOGRAPHY_ERROR",
            ServiceError::InvalidCryptoProvider => "INVALID_CRYPTO_PROVIDER",
            ServiceError::InvalidInputFormat => "INVALID_INPUT_FORMAT",
            ServiceError::InvalidRequest => "INVALID_REQUEST",
            ServiceError::NoUserId => "NO_USER_ID",
            ServiceError::NoApplicationId => "NO_APPLICATION_ID",
            ServiceError::UnableToGenerateActivationId => "UNABLE_TO_GENERATE_ACTIVATION_ID",
            ServiceError::UnableToGenerateActivationCode => "UNABLE_TO_GENERATE_ACTIVATION_CODE",
            ServiceError::UnableToGenerateToken => "UNABLE_TO_GENERATE_TOKEN",
            ServiceError::UnableToGenerateRecoveryCode => "UNABLE_TO_GENERATE_RECOVERY_CODE",
            ServiceError::RecoveryCodeAlreadyExists => "RECOVERY_CODE_ALREADY_EXISTS",
            ServiceError::InvalidRecoveryCode { .. } => "INVALID_RECOVERY_CODE",
            ServiceError::InvalidUrlFormat => "INVALID_URL_FORMAT",
            ServiceError::Storage(_) | ServiceError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// All wire-visible error codes with their messages, for the
    /// error code list operation.
    pub fn error_code_list() -> Vec<(&'static str, &'static str)> {
        vec![
            ("ACTIVATION_NOT_FOUND", "Activation with given activation ID was not found"),
            ("ACTIVATION_EXPIRED", "Activation has expired"),
            (
                "ACTIVATION_INCORRECT_STATE",
                "Activation is in incorrect state for the requested operation",
            ),
            ("INVALID_APPLICATION", "Application or application version is invalid or unsupported"),
            ("INVALID_KEY_FORMAT", "Invalid key format"),
            (
                "INCORRECT_MASTER_SERVER_KEYPAIR_PRIVATE",
                "Master server key pair contains a private key in incorrect format",
            ),
            (
                "NO_MASTER_SERVER_KEYPAIR",
                "No master server key pair configured for given application",
            ),
            ("DECRYPTION_FAILED", "Unable to decrypt record"),
            ("GENERIC_CRYPTOGRAPHY_ERROR", "Generic cryptography error"),
            ("INVALID_CRYPTO_PROVIDER", "Invalid cryptographic provider"),
            ("INVALID_INPUT_FORMAT", "Invalid input format"),
            ("INVALID_REQUEST", "Invalid request"),
            ("NO_USER_ID", "User ID was not specified"),
            ("NO_APPLICATION_ID", "Application ID was not specified"),
            (
                "UNABLE_TO_GENERATE_ACTIVATION_ID",
                "Too many failed attempts to generate activation ID",
            ),
            (
                "UNABLE_TO_GENERATE_ACTIVATION_CODE",
                "Too many failed attempts to generate activation code",
            ),
            ("UNABLE_TO_GENERATE_TOKEN", "Too many failed attempts to generate token"),
            (
                "UNABLE_TO_GENERATE_RECOVERY_CODE",
                "Too many failed attempts to generate recovery code",
            ),
            ("RECOVERY_CODE_ALREADY_EXISTS", "Recovery code already exists"),
            ("INVALID_RECOVERY_CODE", "Invalid recovery code or PUK"),
            ("INVALID_URL_FORMAT", "Invalid callback URL format"),
            ("UNKNOWN_ERROR", "Unknown error occurred"),
        ]
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
