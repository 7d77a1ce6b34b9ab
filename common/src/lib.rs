use arrow::error::ArrowError;
use aws_smithy_runtime_api::client::result::CreateUnhandledError;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_runtime_api::http::Response;
use parquet::errors::ParquetError;
use thiserror::Error;
use url::ParseError;

pub mod config;
pub mod logging;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("UTF-8 conversion error: {0}")]
    Utf8(std::string::FromUtf8Error),

    #[error("AWS SDK error: {0}")]
    AwsSdk(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage read error: {0}")]
    StorageRead(String),

    #[error("Storage write error: {0}")]
    StorageWrite(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Conditional write rejected: {0}")]
    Conflict(String),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Invalid Uri: {0}")]
    InvalidUri(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

// Implement From for various SdkError types
impl<E: std::fmt::Debug + CreateUnhandledError> From<SdkError<E, Response>> for Error {
    fn from(err: SdkError<E, Response>) -> Self {
        Error::AwsSdk(format!("{:?}", err))
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => Error::NotFound(path),
            object_store::Error::Precondition { path, .. }
            | object_store::Error::AlreadyExists { path, .. } => Error::Conflict(path),
            other => Error::Storage(format!("Object store error: {}", other)),
        }
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Utf8(err)
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::InvalidUri(format!("URL parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_store_not_found_maps_to_not_found() {
        let err: Error = object_store::Error::NotFound {
            path: "logs/processed.txt".to_string(),
            source: "missing".into(),
        }
        .into();
        assert!(err.is_not_found());
    }

    #[test]
    fn object_store_precondition_maps_to_conflict() {
        let err: Error = object_store::Error::Precondition {
            path: "logs/processed.txt".to_string(),
            source: "etag changed".into(),
        }
        .into();
        assert!(matches!(err, Error::Conflict(path) if path == "logs/processed.txt"));
    }
}
