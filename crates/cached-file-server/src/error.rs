//! Error types for the cached file server

use std::fmt;

#[derive(Debug)]
pub enum FileServerError {
    /// Building a compressed variant failed
    Compression(String),
    Io(Box<std::io::Error>),
    Config(String),
}

impl fmt::Display for FileServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileServerError::Compression(msg) => write!(f, "Compression error: {}", msg),
            FileServerError::Io(err) => write!(f, "IO error: {}", err),
            FileServerError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for FileServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FileServerError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FileServerError {
    fn from(err: std::io::Error) -> Self {
        FileServerError::Io(Box::new(err))
    }
}

impl From<tokio::task::JoinError> for FileServerError {
    fn from(err: tokio::task::JoinError) -> Self {
        FileServerError::Compression(format!("compression task failed: {}", err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for FileServerError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        FileServerError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FileServerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_compression_error_display() {
        let err = FileServerError::Compression("deflate stream corrupted".to_string());
        assert_eq!(
            format!("{}", err),
            "Compression error: deflate stream corrupted"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = FileServerError::Config("invalid PORT".to_string());
        assert_eq!(format!("{}", err), "Configuration error: invalid PORT");
    }

    #[test]
    fn test_io_error_has_source() {
        let err: FileServerError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "client went away").into();
        assert!(format!("{}", err).contains("client went away"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_error_is_debug() {
        let err = FileServerError::Compression("test".to_string());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("Compression"));
    }
}
