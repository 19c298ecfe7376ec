use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Custom error type for the application
#[derive(Debug)]
pub enum Error {
    /// I/O errors
    Io(io::Error),
    /// WiFi configuration errors
    Wifi(String),
    /// TCP listener/client errors
    Tcp(String),
    /// UART errors
    Uart(String),
    /// Persistent storage errors
    Storage(String),
    /// Configuration encode/decode errors
    Config(String),
    /// General errors
    General(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Wifi(msg) => write!(f, "WiFi error: {}", msg),
            Error::Tcp(msg) => write!(f, "TCP error: {}", msg),
            Error::Uart(msg) => write!(f, "UART error: {}", msg),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Config(msg) => write!(f, "Config error: {}", msg),
            Error::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::General(err.to_string())
    }
}

/// Result type for the application
pub type Result<T> = std::result::Result<T, Error>;
