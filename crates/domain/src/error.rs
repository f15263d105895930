/// Shared error type used across all voxlane crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("database: {0}")]
    Database(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("codec: {0}")]
    Codec(String),

    #[error("speech {provider}: {message}")]
    Speech { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("crypto: {0}")]
    Crypto(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a retry can plausibly succeed. Payload, auth and schema
    /// failures are permanent; network-shaped failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Timeout(_) | Self::Database(_) | Self::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
