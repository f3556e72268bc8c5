// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! A trust agent answering from memory, for tests.

use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use host_manifest::{HostInfo, PcrBank, PcrIndex};
use url::Url;

use crate::{
    api::TrustAgentClient,
    client::Operation,
    types::{Manifest, Measurement, TagWriteRequest, TpmQuoteRequest, TpmQuoteResponse},
    Error, Result,
};

/// Answers with the canned values. A certificate set to `None` makes the
/// matching call fail with a transport error.
#[derive(Default)]
pub struct MockTrustAgentClient {
    pub host_info: HostInfo,
    pub quote: TpmQuoteResponse,
    pub aik: Option<Vec<u8>>,
    pub binding_key_certificate: Option<Vec<u8>>,
    pub measurement: Option<Measurement>,

    /// Quote requests received so far.
    pub quote_requests: Mutex<Vec<TpmQuoteRequest>>,
    pub deployed_tags: Mutex<Vec<TagWriteRequest>>,
    pub deployed_manifests: Mutex<Vec<Manifest>>,
}

fn unavailable(operation: Operation) -> Error {
    Error::transport(operation, anyhow!("not available"))
}

#[async_trait]
impl TrustAgentClient for MockTrustAgentClient {
    async fn get_host_info(&self) -> Result<HostInfo> {
        Ok(self.host_info.clone())
    }

    async fn get_tpm_quote(
        &self,
        nonce: &str,
        pcr_list: &[PcrIndex],
        pcr_banks: &[PcrBank],
    ) -> Result<TpmQuoteResponse> {
        let request = TpmQuoteRequest::new(nonce, pcr_list, pcr_banks)?;
        self.quote_requests
            .lock()
            .map_err(|_| unavailable(Operation::GetTpmQuote))?
            .push(request);
        self.quote.clone().into_result()
    }

    async fn get_aik(&self) -> Result<Vec<u8>> {
        self.aik.clone().ok_or_else(|| unavailable(Operation::GetAik))
    }

    async fn get_binding_key_certificate(&self) -> Result<Vec<u8>> {
        self.binding_key_certificate
            .clone()
            .ok_or_else(|| unavailable(Operation::GetBindingKeyCertificate))
    }

    async fn deploy_asset_tag(&self, hardware_uuid: &str, tag: &str) -> Result<()> {
        let request = TagWriteRequest::new(hardware_uuid, tag)?;
        self.deployed_tags
            .lock()
            .map_err(|_| unavailable(Operation::DeployAssetTag))?
            .push(request);
        Ok(())
    }

    async fn deploy_software_manifest(&self, manifest: &Manifest) -> Result<()> {
        manifest.validate()?;
        self.deployed_manifests
            .lock()
            .map_err(|_| unavailable(Operation::DeploySoftwareManifest))?
            .push(manifest.clone());
        Ok(())
    }

    async fn get_measurement_from_manifest(&self, manifest: &Manifest) -> Result<Measurement> {
        manifest.validate()?;
        self.measurement
            .clone()
            .ok_or_else(|| unavailable(Operation::GetMeasurementFromManifest))
    }

    fn base_url(&self) -> Option<Url> {
        Url::parse("https://mock-trust-agent:1443/v2").ok()
    }
}
