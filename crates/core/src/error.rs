use thiserror::Error;

pub type FreshcartResult<T> = Result<T, FreshcartError>;

#[derive(Error, Debug)]
pub enum FreshcartError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Endpoint {endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Invalid endpoint URL: {0}")]
    Url(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FreshcartError {
    /// HTTP status of a rejected delivery, if the endpoint answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            FreshcartError::Status { status, .. } => Some(*status),
            FreshcartError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
