use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging already initialized")]
    LoggingAlreadyInitialized,
}

impl Error {
    /// Whether the error only reports a second logging bootstrap.
    pub fn is_already_initialized(&self) -> bool {
        matches!(self, Error::LoggingAlreadyInitialized)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
