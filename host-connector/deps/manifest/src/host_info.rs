// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use serde::{Deserialize, Serialize};

use crate::PcrBank;

/// Static platform identity of an attested host.
///
/// Produced by the trust agent or a hypervisor API, never modified by a
/// connector.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostInfo {
    pub os_name: String,
    pub os_version: String,
    pub os_type: String,
    pub bios_name: String,
    pub bios_version: String,
    pub vmm_name: String,
    pub vmm_version: String,
    pub processor_info: String,
    pub processor_flags: String,
    pub host_name: String,
    pub hardware_uuid: String,
    pub no_of_sockets: u32,
    pub tpm_enabled: bool,
    pub tpm_version: String,
    pub txt_enabled: bool,
    pub hardware_features: HardwareFeatures,
    pub installed_components: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareFeatures {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txt: Option<FeatureStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tpm: Option<TpmFeature>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cbnt: Option<CbntFeature>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uefi: Option<UefiFeature>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureStatus {
    pub enabled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TpmFeature {
    pub enabled: bool,
    pub version: String,
    pub pcr_banks: Vec<PcrBank>,
}

/// Intel Boot Guard.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CbntFeature {
    pub enabled: bool,
    pub profile: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UefiFeature {
    pub enabled: bool,
    pub secure_boot_enabled: bool,
}
