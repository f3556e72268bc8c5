// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use thiserror::Error;

use crate::pcr::{PcrBank, PcrId};

pub type Result<T> = std::result::Result<T, Error>;

/// Violations of the data model invariants. Each variant names the field
/// that was rejected.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("invalid PCR index `{0}`: must be pcr_0 to pcr_23")]
    InvalidPcrIndex(String),

    #[error("unsupported PCR bank `{0}`")]
    UnsupportedPcrBank(String),

    #[error("{field}: `{value}` is not a hex encoded digest")]
    InvalidHex { field: String, value: String },

    #[error("{field}: digest is {actual} bytes but bank {bank} requires {expected}")]
    DigestLength {
        field: String,
        bank: PcrBank,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate PCR value for {0}")]
    DuplicatePcrValue(PcrId),

    #[error("duplicate event log for {0}")]
    DuplicateEventLog(PcrId),

    #[error("{pcr} is listed under bank {bank}")]
    BankMismatch { pcr: PcrId, bank: PcrBank },

    #[error("event log for {0} has no reported PCR value")]
    MissingPcrValue(PcrId),

    #[error("event log replay of {pcr} gives {replayed}, the reported PCR value is {reported}")]
    ReplayMismatch {
        pcr: PcrId,
        reported: String,
        replayed: String,
    },
}
