// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use async_trait::async_trait;
use host_manifest::{HostInfo, HostManifest, PcrBank, PcrIndex};
use ta_client::{Manifest, Measurement};

use crate::Result;

/// The operations every vendor connector offers. A vendor without an
/// equivalent for an operation answers [`crate::ErrorKind::Unsupported`].
#[async_trait]
pub trait HostConnector: Send + Sync {
    async fn get_host_details(&self) -> Result<HostInfo>;

    /// Build the manifest of the host for `nonce` (base64), restricted to
    /// `pcr_list` and `pcr_banks`. Empty selections mean every PCR or bank
    /// the platform reports.
    ///
    /// A manifest is returned only if all of its event logs replay to the
    /// reported PCR values.
    async fn get_host_manifest(
        &self,
        nonce: &str,
        pcr_list: &[PcrIndex],
        pcr_banks: &[PcrBank],
    ) -> Result<HostManifest>;

    async fn deploy_asset_tag(&self, hardware_uuid: &str, tag: &str) -> Result<()>;

    async fn deploy_software_manifest(&self, manifest: &Manifest) -> Result<()>;

    async fn get_measurement_from_manifest(&self, manifest: &Manifest) -> Result<Measurement>;
}
