// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use thiserror::Error;

use crate::plugins::Vendor;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], for callers that branch on it.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    InvalidArgument,
    Transport,
    Timeout,
    Decode,
    Validation,
    Untrusted,
    Unsupported,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("host connector configuration error: {0}")]
    Configuration(String),

    #[error("{operation}: invalid argument")]
    InvalidArgument {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation}: transport failure")]
    Transport {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation}: timed out")]
    Timeout {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation}: malformed payload")]
    Decode {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation}: verification failed")]
    Validation {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation}: host is not trusted: {reason}")]
    Untrusted {
        operation: &'static str,
        reason: String,
    },

    #[error("{operation} is not supported by the {vendor} connector")]
    Unsupported {
        operation: &'static str,
        vendor: Vendor,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Decode { .. } => ErrorKind::Decode,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Untrusted { .. } => ErrorKind::Untrusted,
            Error::Unsupported { .. } => ErrorKind::Unsupported,
        }
    }

    /// Whether the same call may succeed later. The connectors never retry
    /// on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Timeout)
    }

    pub(crate) fn transport(operation: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Error::Transport {
            operation,
            source: source.into(),
        }
    }

    pub(crate) fn decode(operation: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Error::Decode {
            operation,
            source: source.into(),
        }
    }

    pub(crate) fn validation(operation: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Error::Validation {
            operation,
            source: source.into(),
        }
    }

    /// Wrap a trust agent failure, keeping its classification.
    pub(crate) fn trust_agent(operation: &'static str, e: ta_client::Error) -> Self {
        use ta_client::Error as TaError;

        let kind = match &e {
            TaError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            TaError::Configuration(_) => ErrorKind::Configuration,
            TaError::Transport { .. } | TaError::Agent { .. } => ErrorKind::Transport,
            TaError::Timeout { .. } => ErrorKind::Timeout,
            TaError::Decode { .. } => ErrorKind::Decode,
        };

        let source = anyhow::Error::new(e);
        match kind {
            ErrorKind::InvalidArgument => Error::InvalidArgument { operation, source },
            ErrorKind::Configuration => Error::Configuration(format!("{operation}: {source}")),
            ErrorKind::Timeout => Error::Timeout { operation, source },
            ErrorKind::Decode => Error::Decode { operation, source },
            _ => Error::Transport { operation, source },
        }
    }
}
