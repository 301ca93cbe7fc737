use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReceivablesError {
    #[error("Invalid invoice record #{index}: {reason}")]
    InvalidRecord { index: usize, reason: String },

    #[error("Invalid risk weights (balance {balance_weight}, days {days_weight}): {reason}")]
    InvalidWeights {
        balance_weight: f64,
        days_weight: f64,
        reason: String,
    },

    #[error("Risk ranking violation: {0}")]
    RankingViolation(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Missing column '{0}' in CSV input")]
    MissingColumn(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "zoho")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[cfg(feature = "zoho")]
    #[error("Zoho API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[cfg(feature = "zoho")]
    #[error("Token refresh failed: {0}")]
    AuthFailed(String),

    #[cfg(feature = "zoho")]
    #[error("Missing credential: {0}")]
    MissingCredential(String),
}

pub type Result<T> = std::result::Result<T, ReceivablesError>;
