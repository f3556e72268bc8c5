// Copyright (c) 2024 Alibaba Cloud
// Copyright (c) 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;

/// Hash algorithms a TPM PCR bank can be expressed in.
#[derive(Serialize, Deserialize, Clone, Debug, Display, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        Self::Sha256
    }
}

fn hash_material<D: Digest>(material: &[u8]) -> Vec<u8> {
    D::new().chain_update(material).finalize().to_vec()
}

fn hash_extend<D: Digest>(current: &[u8], measurement: &[u8]) -> Vec<u8> {
    D::new()
        .chain_update(current)
        .chain_update(measurement)
        .finalize()
        .to_vec()
}

impl HashAlgorithm {
    pub fn digest(&self, material: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha1 => hash_material::<Sha1>(material),
            HashAlgorithm::Sha256 => hash_material::<Sha256>(material),
            HashAlgorithm::Sha384 => hash_material::<Sha384>(material),
            HashAlgorithm::Sha512 => hash_material::<Sha512>(material),
        }
    }

    /// TPM2_PCR_Extend semantics: `H(current || measurement)`.
    ///
    /// The caller is responsible for checking that both inputs have
    /// [`HashAlgorithm::digest_len`] bytes.
    pub fn extend(&self, current: &[u8], measurement: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha1 => hash_extend::<Sha1>(current, measurement),
            HashAlgorithm::Sha256 => hash_extend::<Sha256>(current, measurement),
            HashAlgorithm::Sha384 => hash_extend::<Sha384>(current, measurement),
            HashAlgorithm::Sha512 => hash_extend::<Sha512>(current, measurement),
        }
    }

    pub const fn digest_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Guess the algorithm from the length of a raw digest.
    pub fn from_digest_len(len: usize) -> Option<Self> {
        Self::list_all().into_iter().find(|alg| alg.digest_len() == len)
    }

    /// Return a list of all supported hash algorithms.
    pub fn list_all() -> Vec<Self> {
        vec![
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ]
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseHashAlgorithmError;

// XXX: Required to allow conversion to a std::error::Error by `anyhow!()`.
impl fmt::Display for ParseHashAlgorithmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParseHashAlgorithmError")
    }
}

impl std::error::Error for ParseHashAlgorithmError {}

impl FromStr for HashAlgorithm {
    type Err = ParseHashAlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = s.replace(['-', '_'], "").to_lowercase();

        let result = match cleaned.as_str() {
            "sha1" => HashAlgorithm::Sha1,
            "sha256" => HashAlgorithm::Sha256,
            "sha384" => HashAlgorithm::Sha384,
            "sha512" => HashAlgorithm::Sha512,
            _ => return Err(ParseHashAlgorithmError),
        };

        Ok(result)
    }
}
