use thiserror::Error;

#[derive(Error, Debug)]
pub enum CleaningError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("invalid artifact reference '{0}'")]
    InvalidReference(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse dataset: {0}")]
    Parse(String),

    #[error("failed to publish artifact: {0}")]
    Publish(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),
}

impl CleaningError {
    pub fn publish(e: impl std::fmt::Display) -> Self {
        CleaningError::Publish(e.to_string())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        CleaningError::Io(std::io::Error::new(std::io::ErrorKind::Other, msg.into()))
    }
}

impl From<csv::Error> for CleaningError {
    fn from(e: csv::Error) -> Self {
        // The csv crate wraps underlying read failures; keep those in the I/O class.
        if e.is_io_error() {
            match e.into_kind() {
                csv::ErrorKind::Io(io) => CleaningError::Io(io),
                other => CleaningError::Parse(format!("{:?}", other)),
            }
        } else {
            CleaningError::Parse(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, CleaningError>;
