//! Error types for Relaycast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelaycastError>;

#[derive(Error, Debug)]
pub enum RelaycastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl RelaycastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RelaycastError::InvalidInput(_) => 3,
            RelaycastError::Config(_) => 2,
            RelaycastError::Credential(CredentialError::MissingKey(_)) => 2,
            RelaycastError::Credential(_) => 1,
            RelaycastError::Database(_) => 1,
            RelaycastError::Delivery(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Malformed column {column}: {value}")]
    Malformed { column: &'static str, value: String },

    #[error("Failed to encode filters: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Failures of the credential resolver
#[derive(Error, Debug, Clone)]
pub enum CredentialError {
    /// The master key used to open sealed secrets is not available
    #[error("Master key not available: {0}")]
    MissingKey(String),

    #[error("Failed to decrypt credential: {0}")]
    Decryption(String),

    #[error("Failed to seal credential: {0}")]
    Encryption(String),
}

/// Failures reported by a destination sender
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Transport failure, timeout or server-side error
    #[error("Network error: {0}")]
    Network(String),

    /// The destination refused the content or the credential
    #[error("Rejected by destination: {0}")]
    Rejected(String),
}

/// Coarse classification of a delivery failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    Network,
    Rejected,
}

impl DeliveryError {
    pub fn kind(&self) -> DeliveryErrorKind {
        match self {
            DeliveryError::Network(_) => DeliveryErrorKind::Network,
            DeliveryError::Rejected(_) => DeliveryErrorKind::Rejected,
        }
    }

    /// The destination's own description of the failure
    pub fn detail(&self) -> &str {
        match self {
            DeliveryError::Network(detail) | DeliveryError::Rejected(detail) => detail,
        }
    }
}
