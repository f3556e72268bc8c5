// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Transports of the trust agent protocol.

use strum::{AsRefStr, Display};

pub mod http;
pub mod nats;

/// Operation names, as they appear in errors and logs.
#[derive(AsRefStr, Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    GetHostInfo,
    GetTpmQuote,
    GetAik,
    GetBindingKeyCertificate,
    DeployAssetTag,
    DeploySoftwareManifest,
    GetMeasurementFromManifest,
    /// Token exchange with the authentication service.
    Authenticate,
}

impl Operation {
    /// Path below the versioned HTTP base URL.
    pub fn http_path(&self) -> &'static str {
        match self {
            Operation::GetHostInfo => "host",
            Operation::GetTpmQuote => "tpm/quote",
            Operation::GetAik => "aik",
            Operation::GetBindingKeyCertificate => "binding-key-certificate",
            Operation::DeployAssetTag => "tag",
            Operation::DeploySoftwareManifest => "deploy/manifest",
            Operation::GetMeasurementFromManifest => "host/application-measurement",
            Operation::Authenticate => "token",
        }
    }

    /// Last token of the NATS subject.
    pub fn nats_suffix(&self) -> &'static str {
        match self {
            Operation::GetHostInfo => "host-info-request",
            Operation::GetTpmQuote => "quote-request",
            Operation::GetAik => "aik-request",
            Operation::GetBindingKeyCertificate => "binding-key-certificate-request",
            Operation::DeployAssetTag => "deploy-asset-tag",
            Operation::DeploySoftwareManifest => "deploy-manifest-request",
            Operation::GetMeasurementFromManifest => "application-measurement-request",
            Operation::Authenticate => "token-request",
        }
    }
}
