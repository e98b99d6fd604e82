use thiserror::Error;

use crate::model::BackendName;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("{backend} timed out after {timeout_ms} ms")]
    Timeout {
        backend: BackendName,
        timeout_ms: u64,
    },

    #[error("{backend} server error (HTTP {status})")]
    Server { backend: BackendName, status: u16 },

    #[error("{backend} rejected the request (HTTP {status})")]
    Client { backend: BackendName, status: u16 },

    #[error("{backend} refused credentials (HTTP {status})")]
    Unauthorized { backend: BackendName, status: u16 },

    #[error("{backend} returned a malformed payload: {message}")]
    Malformed {
        backend: BackendName,
        message: String,
    },

    #[error("{backend} transport failure: {message}")]
    Transport {
        backend: BackendName,
        message: String,
    },

    #[error("{backend} index failure: {message}")]
    Index {
        backend: BackendName,
        message: String,
    },
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Server { .. } | Self::Transport { .. }
        )
    }

    pub fn from_status(backend: BackendName, status: u16) -> Self {
        match status {
            401 | 403 => Self::Unauthorized { backend, status },
            500..=599 => Self::Server { backend, status },
            _ => Self::Client { backend, status },
        }
    }

    pub fn malformed(backend: BackendName, message: impl Into<String>) -> Self {
        Self::Malformed {
            backend,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("unknown jurisdiction '{0}'")]
    UnknownJurisdiction(String),

    #[error("unknown asset category '{0}'")]
    UnknownAssetCategory(String),

    #[error("unknown document category '{0}'")]
    UnknownDocumentCategory(String),

    #[error("unsupported language '{0}'")]
    UnknownLanguage(String),
}
