// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::time::Duration;

use thiserror::Error;

use crate::client::Operation;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("trust agent client configuration error: {0}")]
    Configuration(String),

    #[error("{operation}: request to the trust agent failed")]
    Transport {
        operation: Operation,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation}: trust agent reported error {code}: {message}")]
    Agent {
        operation: Operation,
        code: i32,
        message: String,
    },

    #[error("{operation}: no reply from the trust agent within {timeout:?}")]
    Timeout {
        operation: Operation,
        timeout: Duration,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation}: malformed reply from the trust agent")]
    Decode {
        operation: Operation,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    pub(crate) fn transport(operation: Operation, source: impl Into<anyhow::Error>) -> Self {
        Error::Transport {
            operation,
            source: source.into(),
        }
    }

    pub(crate) fn decode(operation: Operation, source: impl Into<anyhow::Error>) -> Self {
        Error::Decode {
            operation,
            source: source.into(),
        }
    }
}
