// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::{
    types::{Manifest, Measurement, TpmQuoteResponse},
    Result,
};
use std::sync::Arc;

use async_trait::async_trait;
use host_manifest::{HostInfo, PcrBank, PcrIndex};
use url::Url;

/// Operations a trust agent offers, independent of the transport.
///
/// Every operation can be invoked on its own and fails with a typed
/// [`crate::Error`] that names the operation.
#[async_trait]
pub trait TrustAgentClient: Send + Sync {
    /// Platform identity of the host.
    async fn get_host_info(&self) -> Result<HostInfo>;

    /// Ask for a TPM quote over `pcr_list` of `pcr_banks`.
    ///
    /// `nonce` is base64 encoded. It is decoded before transmission, a
    /// nonce that is not valid base64 is an [`crate::Error::InvalidArgument`].
    async fn get_tpm_quote(
        &self,
        nonce: &str,
        pcr_list: &[PcrIndex],
        pcr_banks: &[PcrBank],
    ) -> Result<TpmQuoteResponse>;

    /// The Attestation Identity Key certificate (DER).
    async fn get_aik(&self) -> Result<Vec<u8>>;

    /// The binding key certificate.
    async fn get_binding_key_certificate(&self) -> Result<Vec<u8>>;

    /// Provision the asset tag `tag` (base64) for the host `hardware_uuid`.
    async fn deploy_asset_tag(&self, hardware_uuid: &str, tag: &str) -> Result<()>;

    /// Install a software manifest the agent measures at boot.
    async fn deploy_software_manifest(&self, manifest: &Manifest) -> Result<()>;

    /// Ask the agent to measure the files described by `manifest` now.
    async fn get_measurement_from_manifest(&self, manifest: &Manifest) -> Result<Measurement>;

    /// Base URL of the agent, `None` if the transport has none.
    fn base_url(&self) -> Option<Url>;
}

/// A shared client is a client, so one agent can back several connectors.
#[async_trait]
impl<T: TrustAgentClient + ?Sized> TrustAgentClient for Arc<T> {
    async fn get_host_info(&self) -> Result<HostInfo> {
        (**self).get_host_info().await
    }

    async fn get_tpm_quote(
        &self,
        nonce: &str,
        pcr_list: &[PcrIndex],
        pcr_banks: &[PcrBank],
    ) -> Result<TpmQuoteResponse> {
        (**self).get_tpm_quote(nonce, pcr_list, pcr_banks).await
    }

    async fn get_aik(&self) -> Result<Vec<u8>> {
        (**self).get_aik().await
    }

    async fn get_binding_key_certificate(&self) -> Result<Vec<u8>> {
        (**self).get_binding_key_certificate().await
    }

    async fn deploy_asset_tag(&self, hardware_uuid: &str, tag: &str) -> Result<()> {
        (**self).deploy_asset_tag(hardware_uuid, tag).await
    }

    async fn deploy_software_manifest(&self, manifest: &Manifest) -> Result<()> {
        (**self).deploy_software_manifest(manifest).await
    }

    async fn get_measurement_from_manifest(&self, manifest: &Manifest) -> Result<Measurement> {
        (**self).get_measurement_from_manifest(manifest).await
    }

    fn base_url(&self) -> Option<Url> {
        (**self).base_url()
    }
}
