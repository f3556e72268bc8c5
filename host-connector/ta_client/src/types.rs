// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Payloads exchanged with the trust agent. Both transports share them.

use base64::{engine::general_purpose::STANDARD, Engine};
use host_manifest::{PcrBank, PcrIndex};
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::{client::Operation, Error, Result};

/// Body of a quote request.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpmQuoteRequest {
    #[serde_as(as = "Base64")]
    pub nonce: Vec<u8>,

    pub pcrs: Vec<PcrIndex>,

    #[serde(rename = "pcrbanks")]
    pub pcr_banks: Vec<PcrBank>,
}

impl TpmQuoteRequest {
    /// Build a request from a base64 `nonce`.
    pub fn new(nonce: &str, pcr_list: &[PcrIndex], pcr_banks: &[PcrBank]) -> Result<Self> {
        let nonce = STANDARD
            .decode(nonce)
            .map_err(|e| Error::InvalidArgument(format!("nonce is not valid base64: {e}")))?;

        Ok(Self {
            nonce,
            pcrs: pcr_list.to_vec(),
            pcr_banks: pcr_banks.to_vec(),
        })
    }
}

/// Measurements the agent took at boot from the deployed software manifests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcbMeasurements {
    #[serde(rename = "tcbMeasurements", default)]
    pub measurements: Vec<String>,
}

/// The agent's answer to a quote request.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TpmQuoteResponse {
    pub timestamp: i64,

    pub client_ip: String,

    pub error_code: i32,

    pub error_message: String,

    /// TPM2B_ATTEST, TPMT_SIGNATURE and the quoted PCR values, concatenated.
    #[serde_as(as = "Base64")]
    pub quote: Vec<u8>,

    /// Base64 encoding of the JSON measurement log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_log: Option<String>,

    pub tcb_measurements: TcbMeasurements,

    pub selected_pcr_banks: Vec<PcrBank>,

    pub is_tag_provisioned: bool,

    /// Base64 encoding of the provisioned asset tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_tag: Option<String>,
}

impl TpmQuoteResponse {
    /// Turns an error reported inside the response into an [`Error::Agent`].
    pub fn into_result(self) -> Result<Self> {
        if self.error_code != 0 {
            return Err(Error::Agent {
                operation: Operation::GetTpmQuote,
                code: self.error_code,
                message: self.error_message,
            });
        }

        Ok(self)
    }
}

/// Body of an asset tag deployment.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagWriteRequest {
    #[serde_as(as = "Base64")]
    pub tag: Vec<u8>,

    pub hardware_uuid: String,
}

impl TagWriteRequest {
    pub fn new(hardware_uuid: &str, tag: &str) -> Result<Self> {
        let hardware_uuid = uuid::Uuid::parse_str(hardware_uuid)
            .map_err(|e| Error::InvalidArgument(format!("hardware uuid `{hardware_uuid}`: {e}")))?;
        let tag = STANDARD
            .decode(tag)
            .map_err(|e| Error::InvalidArgument(format!("asset tag is not valid base64: {e}")))?;

        Ok(Self {
            tag,
            hardware_uuid: hardware_uuid.to_string(),
        })
    }
}

/// One item of a software manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ManifestEntry {
    Dir {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        include: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exclude: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter_type: Option<String>,
    },
    File {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search_type: Option<String>,
    },
    Symlink {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search_type: Option<String>,
    },
}

/// A software manifest: the files an agent has to measure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub label: String,

    pub uuid: String,

    #[serde(default = "default_digest_alg")]
    pub digest_alg: String,

    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
}

fn default_digest_alg() -> String {
    "SHA384".into()
}

impl Manifest {
    /// Checks done before a manifest leaves the client.
    pub fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            return Err(Error::InvalidArgument("manifest label is empty".into()));
        }

        uuid::Uuid::parse_str(&self.uuid).map_err(|e| {
            Error::InvalidArgument(format!("manifest uuid `{}`: {e}", self.uuid))
        })?;

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasuredEntry {
    #[serde(flatten)]
    pub entry: ManifestEntry,

    /// Hex digest of the entry.
    pub value: String,
}

/// What an agent measured for a [`Manifest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub label: String,

    pub uuid: String,

    pub digest_alg: String,

    #[serde(default)]
    pub entries: Vec<MeasuredEntry>,

    pub cumulative_hash: String,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[test]
    fn quote_request_carries_decoded_nonce() {
        let pcrs = [PcrIndex::try_from(0u32).unwrap(), PcrIndex::try_from(18u32).unwrap()];
        let request = TpmQuoteRequest::new("3q2+7w==", &pcrs, &[PcrBank::Sha256]).unwrap();
        assert_eq!(request.nonce, vec![0xde, 0xad, 0xbe, 0xef]);

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"nonce": "3q2+7w==", "pcrs": [0, 18], "pcrbanks": ["SHA256"]})
        );
    }

    #[test]
    fn quote_request_rejects_bad_nonce() {
        let err = TpmQuoteRequest::new("not base64!", &[], &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn quote_response_tolerates_missing_fields() {
        let response: TpmQuoteResponse = serde_json::from_value(json!({
            "quote": "AAEC",
            "eventLog": "W10=",
            "selectedPcrBanks": ["SHA1", "SHA256"],
            "isTagProvisioned": false
        }))
        .unwrap();

        assert_eq!(response.quote, vec![0, 1, 2]);
        assert_eq!(response.event_log.as_deref(), Some("W10="));
        assert_eq!(response.selected_pcr_banks, vec![PcrBank::Sha1, PcrBank::Sha256]);
        assert!(response.tcb_measurements.measurements.is_empty());
        assert_eq!(response.error_code, 0);
        assert!(response.into_result().is_ok());
    }

    #[test]
    fn quote_response_with_agent_error() {
        let response = TpmQuoteResponse {
            error_code: 2,
            error_message: "tpm busy".into(),
            ..Default::default()
        };

        let err = response.into_result().unwrap_err();
        assert!(matches!(err, Error::Agent { code: 2, .. }));
    }

    #[rstest]
    #[case("not-a-uuid", "YWJj")]
    #[case("7a569dad-2d82-49e4-9156-069b0065b262", "***")]
    fn tag_write_request_rejects_bad_input(#[case] hardware_uuid: &str, #[case] tag: &str) {
        let err = TagWriteRequest::new(hardware_uuid, tag).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn manifest_entries_are_tagged() {
        let manifest: Manifest = serde_json::from_value(json!({
            "label": "tboot",
            "uuid": "7a569dad-2d82-49e4-9156-069b0065b262",
            "entries": [
                {"type": "dir", "path": "/boot", "include": ".*"},
                {"type": "file", "path": "/boot/tboot.gz"}
            ]
        }))
        .unwrap();

        assert_eq!(manifest.digest_alg, "SHA384");
        assert_eq!(
            manifest.entries[1],
            ManifestEntry::File {
                path: "/boot/tboot.gz".into(),
                search_type: None
            }
        );
        manifest.validate().unwrap();
    }

    #[rstest]
    #[case(" ", "7a569dad-2d82-49e4-9156-069b0065b262")]
    #[case("tboot", "nope")]
    fn manifest_validation(#[case] label: &str, #[case] uuid: &str) {
        let manifest = Manifest {
            label: label.into(),
            uuid: uuid.into(),
            digest_alg: "SHA384".into(),
            entries: vec![],
        };
        assert!(matches!(manifest.validate(), Err(Error::InvalidArgument(_))));
    }
}
