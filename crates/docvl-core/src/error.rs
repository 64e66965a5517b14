use std::path::PathBuf;

use thiserror::Error;

/// Boxed cause carried across the collaborator boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for the docvl service.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("pipeline initialization failed: {source}")]
    Initialization {
        #[source]
        source: BoxError,
    },

    #[error("processing failed for {}: {source}", path.display())]
    Processing {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("failed to stage input: {source}")]
    Staging {
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error category handed to the outer boundary for status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Initialization,
    Processing,
    InvalidInput,
    PayloadTooLarge,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Initialization => "InitializationError",
            ErrorKind::Processing => "ProcessingError",
            ErrorKind::InvalidInput => "ValidationError",
            ErrorKind::PayloadTooLarge => "PayloadTooLarge",
        }
    }
}

impl OcrError {
    pub fn initialization(source: impl Into<BoxError>) -> Self {
        OcrError::Initialization {
            source: source.into(),
        }
    }

    pub fn processing(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        OcrError::Processing {
            path: path.into(),
            source: source.into(),
        }
    }

    /// Staging and plain I/O failures surface as processing failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OcrError::Initialization { .. } => ErrorKind::Initialization,
            OcrError::Processing { .. } | OcrError::Staging { .. } | OcrError::Io(_) => {
                ErrorKind::Processing
            }
            OcrError::InvalidInput(_) => ErrorKind::InvalidInput,
            OcrError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
        }
    }
}

pub type Result<T> = std::result::Result<T, OcrError>;
