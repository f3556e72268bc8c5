// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{fmt, str::FromStr};

use crypto::HashAlgorithm;
use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};

use crate::{Error, Result};

/// Number of PCRs of a TPM 2.0 bank.
pub const PCR_COUNT: u8 = 24;

const PCR_NAME_PREFIX: &str = "pcr_";

/// Index of a platform configuration register, `pcr_0` to `pcr_23`.
///
/// Serialized as a plain integer. Deserialization accepts the integer and
/// the `pcr_<n>` form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "PcrIndexRepr", into = "u32")]
pub struct PcrIndex(u8);

impl PcrIndex {
    pub fn value(&self) -> u8 {
        self.0
    }

    /// All valid indexes in ascending order.
    pub fn all() -> impl Iterator<Item = PcrIndex> {
        (0..PCR_COUNT).map(PcrIndex)
    }
}

impl TryFrom<u32> for PcrIndex {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        if value >= PCR_COUNT as u32 {
            return Err(Error::InvalidPcrIndex(value.to_string()));
        }

        Ok(PcrIndex(value as u8))
    }
}

impl From<PcrIndex> for u32 {
    fn from(index: PcrIndex) -> u32 {
        index.0 as u32
    }
}

impl FromStr for PcrIndex {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let number = s.strip_prefix(PCR_NAME_PREFIX).unwrap_or(s);
        if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidPcrIndex(s.to_string()));
        }

        let value = number
            .parse::<u32>()
            .map_err(|_| Error::InvalidPcrIndex(s.to_string()))?;
        PcrIndex::try_from(value).map_err(|_| Error::InvalidPcrIndex(s.to_string()))
    }
}

impl fmt::Display for PcrIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PCR_NAME_PREFIX}{}", self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PcrIndexRepr {
    Number(i64),
    Name(String),
}

impl TryFrom<PcrIndexRepr> for PcrIndex {
    type Error = Error;

    fn try_from(repr: PcrIndexRepr) -> Result<Self> {
        match repr {
            PcrIndexRepr::Number(n) => u32::try_from(n)
                .map_err(|_| Error::InvalidPcrIndex(n.to_string()))
                .and_then(PcrIndex::try_from),
            PcrIndexRepr::Name(name) => name.parse(),
        }
    }
}

/// The hash algorithm a PCR value is expressed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum PcrBank {
    #[serde(rename = "SHA1")]
    Sha1,

    #[serde(rename = "SHA256")]
    Sha256,

    #[serde(rename = "SHA384")]
    Sha384,

    #[serde(rename = "SHA512")]
    Sha512,
}

impl PcrBank {
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            PcrBank::Sha1 => HashAlgorithm::Sha1,
            PcrBank::Sha256 => HashAlgorithm::Sha256,
            PcrBank::Sha384 => HashAlgorithm::Sha384,
            PcrBank::Sha512 => HashAlgorithm::Sha512,
        }
    }

    pub fn digest_len(&self) -> usize {
        self.hash_algorithm().digest_len()
    }

    /// The reset value of a PCR of this bank.
    pub fn zero_digest(&self) -> Vec<u8> {
        vec![0; self.digest_len()]
    }

    /// Infer the bank from the length of a raw digest.
    pub fn from_digest_len(len: usize) -> Option<Self> {
        HashAlgorithm::from_digest_len(len).map(PcrBank::from)
    }

    pub fn list_all() -> Vec<Self> {
        vec![PcrBank::Sha1, PcrBank::Sha256, PcrBank::Sha384, PcrBank::Sha512]
    }

    /// Check that `digest` has the width of this bank.
    pub fn check_digest(&self, field: &str, digest: &[u8]) -> Result<()> {
        if digest.len() != self.digest_len() {
            return Err(Error::DigestLength {
                field: field.to_string(),
                bank: *self,
                expected: self.digest_len(),
                actual: digest.len(),
            });
        }

        Ok(())
    }
}

impl From<HashAlgorithm> for PcrBank {
    fn from(alg: HashAlgorithm) -> Self {
        match alg {
            HashAlgorithm::Sha1 => PcrBank::Sha1,
            HashAlgorithm::Sha256 => PcrBank::Sha256,
            HashAlgorithm::Sha384 => PcrBank::Sha384,
            HashAlgorithm::Sha512 => PcrBank::Sha512,
        }
    }
}

impl FromStr for PcrBank {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<HashAlgorithm>()
            .map(PcrBank::from)
            .map_err(|_| Error::UnsupportedPcrBank(s.to_string()))
    }
}

impl TryFrom<String> for PcrBank {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for PcrBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PcrBank::Sha1 => "SHA1",
            PcrBank::Sha256 => "SHA256",
            PcrBank::Sha384 => "SHA384",
            PcrBank::Sha512 => "SHA512",
        };
        f.write_str(name)
    }
}

/// A (index, bank) pair. Ordered by index first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PcrId {
    pub index: PcrIndex,
    pub bank: PcrBank,
}

impl PcrId {
    pub fn new(index: PcrIndex, bank: PcrBank) -> Self {
        Self { index, bank }
    }
}

impl fmt::Display for PcrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.bank)
    }
}

/// A PCR value as reported by the platform.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPcrValue")]
pub struct PcrValue {
    index: PcrIndex,
    bank: PcrBank,
    #[serde_as(as = "Hex")]
    value: Vec<u8>,
}

impl PcrValue {
    pub fn new(index: PcrIndex, bank: PcrBank, value: Vec<u8>) -> Result<Self> {
        bank.check_digest(&format!("value of {}", PcrId::new(index, bank)), &value)?;
        Ok(Self { index, bank, value })
    }

    /// Build a [`PcrValue`] from a hex encoded digest.
    pub fn from_hex(index: PcrIndex, bank: PcrBank, value: &str) -> Result<Self> {
        let raw = hex::decode(value.trim()).map_err(|_| Error::InvalidHex {
            field: format!("value of {}", PcrId::new(index, bank)),
            value: value.to_string(),
        })?;
        Self::new(index, bank, raw)
    }

    pub fn index(&self) -> PcrIndex {
        self.index
    }

    pub fn bank(&self) -> PcrBank {
        self.bank
    }

    pub fn id(&self) -> PcrId {
        PcrId::new(self.index, self.bank)
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn value_hex(&self) -> String {
        hex::encode(&self.value)
    }
}

#[derive(Deserialize)]
struct RawPcrValue {
    index: PcrIndex,
    bank: PcrBank,
    value: String,
}

impl TryFrom<RawPcrValue> for PcrValue {
    type Error = Error;

    fn try_from(raw: RawPcrValue) -> Result<Self> {
        PcrValue::from_hex(raw.index, raw.bank, &raw.value)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case("pcr_0", 0)]
    #[case("pcr_23", 23)]
    #[case("7", 7)]
    fn test_parse_pcr_index(#[case] name: &str, #[case] expected: u8) {
        assert_eq!(name.parse::<PcrIndex>().unwrap().value(), expected);
    }

    #[rstest]
    #[case("pcr_24")]
    #[case("pcr_-1")]
    #[case("pcr")]
    #[case("24")]
    #[case("+5")]
    #[case("pcr_+5")]
    #[case(" 5")]
    #[case("pcr_")]
    #[case("")]
    fn test_parse_pcr_index_invalid(#[case] name: &str) {
        assert_eq!(
            name.parse::<PcrIndex>(),
            Err(Error::InvalidPcrIndex(name.to_string()))
        );
    }

    #[test]
    fn test_pcr_index_serde() {
        let index: PcrIndex = serde_json::from_value(json!("pcr_17")).unwrap();
        assert_eq!(serde_json::to_value(index).unwrap(), json!(17));
        assert_eq!(index.to_string(), "pcr_17");

        let index: PcrIndex = serde_json::from_value(json!(4)).unwrap();
        assert_eq!(index.value(), 4);

        assert!(serde_json::from_value::<PcrIndex>(json!(24)).is_err());
        assert!(serde_json::from_value::<PcrIndex>(json!(-3)).is_err());
    }

    #[rstest]
    #[case("SHA1", PcrBank::Sha1)]
    #[case("sha256", PcrBank::Sha256)]
    #[case("SHA-384", PcrBank::Sha384)]
    #[case("Sha512", PcrBank::Sha512)]
    fn test_parse_pcr_bank(#[case] name: &str, #[case] expected: PcrBank) {
        assert_eq!(name.parse::<PcrBank>().unwrap(), expected);
    }

    #[test]
    fn test_pcr_bank_serde() {
        assert_eq!(serde_json::to_value(PcrBank::Sha256).unwrap(), json!("SHA256"));
        let bank: PcrBank = serde_json::from_value(json!("sha-1")).unwrap();
        assert_eq!(bank, PcrBank::Sha1);
        assert!(serde_json::from_value::<PcrBank>(json!("SM3")).is_err());
    }

    #[test]
    fn test_pcr_value_rejects_short_sha256_digest() {
        let index = PcrIndex::try_from(0u32).unwrap();
        let err = PcrValue::new(index, PcrBank::Sha256, vec![0u8; 16]).unwrap_err();
        assert_eq!(
            err,
            Error::DigestLength {
                field: "value of pcr_0/SHA256".into(),
                bank: PcrBank::Sha256,
                expected: 32,
                actual: 16,
            }
        );
    }

    #[rstest]
    #[case(PcrBank::Sha1, 20)]
    #[case(PcrBank::Sha256, 32)]
    #[case(PcrBank::Sha384, 48)]
    #[case(PcrBank::Sha512, 64)]
    fn test_pcr_value_accepts_bank_width(#[case] bank: PcrBank, #[case] len: usize) {
        let index = PcrIndex::try_from(10u32).unwrap();
        let value = PcrValue::new(index, bank, vec![0xa5; len]).unwrap();
        assert_eq!(value.value().len(), len);
    }

    #[test]
    fn test_pcr_value_deserialize_validates() {
        let ok = json!({"index": 0, "bank": "SHA1", "value": "0000000000000000000000000000000000000000"});
        let value: PcrValue = serde_json::from_value(ok).unwrap();
        assert_eq!(value.bank(), PcrBank::Sha1);

        let short = json!({"index": 0, "bank": "SHA256", "value": "00000000000000000000000000000000"});
        assert!(serde_json::from_value::<PcrValue>(short).is_err());

        let not_hex = json!({"index": 0, "bank": "SHA1", "value": "zz"});
        assert!(serde_json::from_value::<PcrValue>(not_hex).is_err());
    }
}
