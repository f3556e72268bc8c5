// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Bare-metal hosts running a trust agent.

use std::collections::BTreeSet;

use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use crypto::HashAlgorithm;
use host_manifest::{
    EventLogEntry, HostInfo, HostManifest, PcrBank, PcrEventLogMap, PcrId, PcrIndex, PcrManifest,
};
use log::{debug, info, warn};
use ta_client::{Manifest, Measurement, TpmQuoteResponse, TrustAgentClient};

use crate::{api::HostConnector, Error, Result};

pub mod quote;

use quote::TpmQuote;

const GET_HOST_MANIFEST: &str = "get_host_manifest";

/// Decode the base64 JSON event log of a quote response.
fn decode_event_log(event_log: Option<&str>) -> anyhow::Result<Vec<EventLogEntry>> {
    let Some(event_log) = event_log.filter(|log| !log.trim().is_empty()) else {
        return Ok(vec![]);
    };

    let raw = STANDARD
        .decode(event_log.trim())
        .context("event log is not valid base64")?;
    let entries = serde_json::from_slice(&raw).context("event log is not a list of entries")?;
    Ok(entries)
}

/// SHA-384 of the provisioned asset tag, hex encoded.
fn asset_tag_digest(response: &TpmQuoteResponse) -> anyhow::Result<Option<String>> {
    if !response.is_tag_provisioned {
        return Ok(None);
    }

    let Some(tag) = response.asset_tag.as_deref() else {
        return Ok(None);
    };

    let tag = STANDARD
        .decode(tag)
        .context("asset tag is not valid base64")?;
    Ok(Some(hex::encode(HashAlgorithm::Sha384.digest(&tag))))
}

pub struct IntelConnector {
    client: Box<dyn TrustAgentClient>,
}

impl IntelConnector {
    pub fn new(client: Box<dyn TrustAgentClient>) -> Self {
        Self { client }
    }

    /// PCR manifest and quote digest of a quote response.
    fn pcr_manifest(
        &self,
        nonce: &[u8],
        response: &TpmQuoteResponse,
    ) -> Result<(PcrManifest, String)> {
        let quote = TpmQuote::parse(&response.quote)
            .map_err(|e| Error::decode(GET_HOST_MANIFEST, e.context("parse TPM quote")))?;
        quote
            .verify_nonce(nonce)
            .map_err(|e| Error::validation(GET_HOST_MANIFEST, e))?;
        let quote_digest = quote
            .verify_pcr_digest()
            .map_err(|e| Error::validation(GET_HOST_MANIFEST, e))?;

        let quoted: BTreeSet<PcrId> = quote.pcr_values.iter().map(|v| v.id()).collect();
        let mut entries = decode_event_log(response.event_log.as_deref())
            .map_err(|e| Error::decode(GET_HOST_MANIFEST, e))?;
        entries.retain(|entry| {
            let keep = quoted.contains(&entry.pcr());
            if !keep {
                debug!("ignoring event log of {}, not quoted", entry.pcr());
            }
            keep
        });

        let event_logs = PcrEventLogMap::from_entries(entries)
            .map_err(|e| Error::validation(GET_HOST_MANIFEST, e))?;
        let pcr_manifest = PcrManifest::new(quote.pcr_values, event_logs)
            .map_err(|e| Error::validation(GET_HOST_MANIFEST, e))?;
        pcr_manifest
            .verify_event_logs()
            .map_err(|e| Error::validation(GET_HOST_MANIFEST, e))?;

        Ok((pcr_manifest, hex::encode(quote_digest)))
    }
}

#[async_trait]
impl HostConnector for IntelConnector {
    async fn get_host_details(&self) -> Result<HostInfo> {
        self.client
            .get_host_info()
            .await
            .map_err(|e| Error::trust_agent("get_host_details", e))
    }

    async fn get_host_manifest(
        &self,
        nonce: &str,
        pcr_list: &[PcrIndex],
        pcr_banks: &[PcrBank],
    ) -> Result<HostManifest> {
        let ta_error = |e| Error::trust_agent(GET_HOST_MANIFEST, e);
        let nonce_bytes = STANDARD
            .decode(nonce)
            .map_err(|e| Error::InvalidArgument {
                operation: GET_HOST_MANIFEST,
                source: anyhow::Error::new(e).context("nonce is not valid base64"),
            })?;

        let host_info = self.client.get_host_info().await.map_err(ta_error)?;
        let response = self
            .client
            .get_tpm_quote(nonce, pcr_list, pcr_banks)
            .await
            .map_err(ta_error)?;

        let aik_certificate = self.client.get_aik().await.map_err(ta_error)?;
        let binding_key_certificate = match self.client.get_binding_key_certificate().await {
            Ok(certificate) => Some(certificate),
            Err(e) => {
                warn!("binding key certificate of {} not available: {e}", host_info.host_name);
                None
            }
        };

        let (pcr_manifest, quote_digest) = self.pcr_manifest(&nonce_bytes, &response)?;
        let asset_tag_digest =
            asset_tag_digest(&response).map_err(|e| Error::decode(GET_HOST_MANIFEST, e))?;

        info!(
            "manifest of {} built, {} event log entries verified",
            host_info.host_name,
            pcr_manifest.event_logs().len()
        );

        Ok(HostManifest {
            host_info,
            pcr_manifest,
            quote_digest,
            aik_certificate: Some(aik_certificate),
            binding_key_certificate,
            asset_tag_digest,
            measurement_xmls: response.tcb_measurements.measurements,
        })
    }

    async fn deploy_asset_tag(&self, hardware_uuid: &str, tag: &str) -> Result<()> {
        self.client
            .deploy_asset_tag(hardware_uuid, tag)
            .await
            .map_err(|e| Error::trust_agent("deploy_asset_tag", e))
    }

    async fn deploy_software_manifest(&self, manifest: &Manifest) -> Result<()> {
        self.client
            .deploy_software_manifest(manifest)
            .await
            .map_err(|e| Error::trust_agent("deploy_software_manifest", e))
    }

    async fn get_measurement_from_manifest(&self, manifest: &Manifest) -> Result<Measurement> {
        self.client
            .get_measurement_from_manifest(manifest)
            .await
            .map_err(|e| Error::trust_agent("get_measurement_from_manifest", e))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn empty_event_log() {
        assert!(decode_event_log(None).unwrap().is_empty());
        assert!(decode_event_log(Some("")).unwrap().is_empty());
        assert!(decode_event_log(Some("W10=")).unwrap().is_empty());
    }

    #[rstest]
    #[case("!!")]
    #[case("e30=")]
    fn malformed_event_log(#[case] event_log: &str) {
        assert!(decode_event_log(Some(event_log)).is_err());
    }

    #[test]
    fn asset_tag() {
        let mut response = TpmQuoteResponse {
            asset_tag: Some("dGFn".into()),
            ..Default::default()
        };
        assert_eq!(asset_tag_digest(&response).unwrap(), None);

        response.is_tag_provisioned = true;
        assert_eq!(
            asset_tag_digest(&response).unwrap().unwrap(),
            hex::encode(HashAlgorithm::Sha384.digest(b"tag"))
        );
    }
}
