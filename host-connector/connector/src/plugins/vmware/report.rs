// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Payloads of the vCenter API.

use host_manifest::{FeatureStatus, HardwareFeatures, HostInfo, TpmFeature};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{base64::Base64, serde_as};

/// TPM attestation report of an ESXi host, as served by vCenter.
///
/// Only the reliability flag is decoded on receipt. The PCR values and the
/// event log stay raw until [`TpmAttestationReport::decode`] is called.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TpmAttestationReport {
    /// `false` when ESXi could not keep a complete log, in which case
    /// nothing in the report may be trusted.
    #[serde(default)]
    pub tpm_log_reliable: bool,

    #[serde(flatten)]
    pub content: Map<String, Value>,
}

impl TpmAttestationReport {
    pub fn decode(&self) -> serde_json::Result<HostTpmAttestationReport> {
        serde_json::from_value(Value::Object(self.content.clone()))
    }
}

/// PCR values and event log of a [`TpmAttestationReport`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostTpmAttestationReport {
    pub tpm_pcr_values: Vec<HostTpmDigestInfo>,
    pub tpm_events: Vec<HostTpmEventLogEntry>,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostTpmDigestInfo {
    pub pcr_number: i32,
    pub digest_method: String,
    #[serde_as(as = "Base64")]
    pub digest_value: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostTpmEventLogEntry {
    pub pcr_index: i32,
    pub event_details: HostTpmEventDetails,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostTpmEventDetails {
    #[serde_as(as = "Base64")]
    pub data_hash: Vec<u8>,

    /// Missing on older ESXi releases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_hash_method: Option<String>,

    #[serde(flatten)]
    pub detail: EventDetail,
}

/// The vendor specific part of an event, told apart by `_typeName`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_typeName")]
pub enum EventDetail {
    #[serde(rename = "HostTpmSoftwareComponentEventDetails", rename_all = "camelCase")]
    SoftwareComponent {
        component_name: String,
        vib_name: String,
        vib_version: String,
        vib_vendor: String,
    },

    #[serde(rename = "HostTpmCommandEventDetails", rename_all = "camelCase")]
    CommandLine { command_line: String },

    #[serde(rename = "HostTpmOptionEventDetails", rename_all = "camelCase")]
    BootOptions { options_file_name: String },

    #[serde(rename = "HostTpmBootSecurityOptionEventDetails", rename_all = "camelCase")]
    BootSecurityOption { boot_security_option: String },

    #[serde(other)]
    Unknown,
}

/// Entry of `GET /api/vcenter/host`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostReference {
    /// Managed object id, e.g. `host-12`.
    pub host: String,
    pub name: String,
    #[serde(default)]
    pub connection_state: String,
    #[serde(default)]
    pub power_state: String,
}

/// Entry of `GET /api/vcenter/cluster`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterReference {
    pub cluster: String,
    pub name: String,
}

/// `GET /api/esx/hosts/{host}/summary`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSummary {
    pub name: String,
    pub uuid: String,
    pub product_name: String,
    pub product_version: String,
    pub product_build: String,
    pub bios_vendor: String,
    pub bios_version: String,
    pub cpu_model: String,
    pub cpu_features: Vec<String>,
    pub num_cpu_packages: u32,
    pub tpm_present: bool,
    pub tpm_version: String,
    pub txt_enabled: bool,
}

impl From<HostSummary> for HostInfo {
    fn from(summary: HostSummary) -> Self {
        let tpm = summary.tpm_present.then(|| TpmFeature {
            enabled: true,
            version: summary.tpm_version.clone(),
            ..Default::default()
        });

        HostInfo {
            os_name: summary.product_name.clone(),
            os_version: summary.product_version.clone(),
            os_type: "vmware".into(),
            bios_name: summary.bios_vendor,
            bios_version: summary.bios_version,
            vmm_name: summary.product_name,
            vmm_version: format!("{}-{}", summary.product_version, summary.product_build),
            processor_info: summary.cpu_model,
            processor_flags: summary.cpu_features.join(" "),
            host_name: summary.name,
            hardware_uuid: summary.uuid,
            no_of_sockets: summary.num_cpu_packages,
            tpm_enabled: summary.tpm_present,
            tpm_version: summary.tpm_version,
            txt_enabled: summary.txt_enabled,
            hardware_features: HardwareFeatures {
                txt: Some(FeatureStatus {
                    enabled: summary.txt_enabled,
                }),
                tpm,
                ..Default::default()
            },
            installed_components: vec![],
        }
    }
}
