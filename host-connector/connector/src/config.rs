// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;
use ta_client::{HttpOptions, NatsOptions};
use url::Url;

use crate::{plugins::TrustMaterial, Error, Result};

pub const DEFAULT_CONNECTOR_CONFIG_PATH: &str = "/etc/host-connector/config.toml";

const DEFAULT_VSPHERE_REQUEST_TIMEOUT_SEC: u64 = 30;

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectorConfig {
    pub trust_agent: TrustAgentConfig,
    pub vsphere: VsphereConfig,
    pub trust: TrustConfig,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrustAgentConfig {
    pub http: HttpConfig,
    pub nats: NatsOptions,
}

/// Trust agents reached over HTTPS.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    pub api_version: String,
    pub request_timeout_sec: u64,

    /// Sent as is when no AAS credentials are configured.
    pub bearer_token: Option<String>,

    /// Default AAS credentials, overridden by the connection string.
    pub aas_username: Option<String>,
    pub aas_password: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        let options = HttpOptions::default();
        Self {
            api_version: options.api_version,
            request_timeout_sec: options.request_timeout_sec,
            bearer_token: None,
            aas_username: None,
            aas_password: None,
        }
    }
}

impl HttpConfig {
    pub fn options(&self) -> HttpOptions {
        HttpOptions {
            api_version: self.api_version.clone(),
            request_timeout_sec: self.request_timeout_sec,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VsphereConfig {
    pub request_timeout_sec: u64,
}

impl Default for VsphereConfig {
    fn default() -> Self {
        Self {
            request_timeout_sec: DEFAULT_VSPHERE_REQUEST_TIMEOUT_SEC,
        }
    }
}

impl VsphereConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrustConfig {
    /// Directory of trusted CA certificates (`*.pem`, `*.crt`).
    pub trusted_ca_dir: Option<PathBuf>,

    pub aas_api_url: Option<String>,
}

impl TrustConfig {
    /// The [`TrustMaterial`] this configuration points at.
    pub fn load(&self) -> Result<TrustMaterial> {
        let aas_api_url = self
            .aas_api_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| Error::Configuration(format!("AAS API URL: {e}")))?;

        let trust = TrustMaterial {
            aas_api_url,
            ca_certs: vec![],
        };

        match &self.trusted_ca_dir {
            Some(dir) => trust.load_ca_dir(dir),
            None => Ok(trust),
        }
    }
}

impl TryFrom<&str> for ConnectorConfig {
    type Error = config::ConfigError;
    fn try_from(config_path: &str) -> std::result::Result<Self, Self::Error> {
        let c = config::Config::builder()
            .add_source(config::File::with_name(config_path))
            .build()?;

        let cfg = c.try_deserialize()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rstest::rstest;

    use super::*;

    const TOML_CONFIG: &str = r#"
[trust_agent.http]
request_timeout_sec = 5
aas_username = "admin"
aas_password = "secret"

[trust_agent.nats]
servers = ["tls://nats-1.example.com:4222", "tls://nats-2.example.com:4222"]
credentials_file = "/etc/host-connector/trust-agent.creds"
ca_cert_files = ["/etc/host-connector/nats-ca.pem"]

[trust]
aas_api_url = "https://aas.example.com:8444/aas/v1/"
"#;

    const JSON_CONFIG: &str = r#"{
    "trust_agent": {
        "http": { "request_timeout_sec": 5, "aas_username": "admin", "aas_password": "secret" },
        "nats": {
            "servers": ["tls://nats-1.example.com:4222", "tls://nats-2.example.com:4222"],
            "credentials_file": "/etc/host-connector/trust-agent.creds",
            "ca_cert_files": ["/etc/host-connector/nats-ca.pem"]
        }
    },
    "trust": { "aas_api_url": "https://aas.example.com:8444/aas/v1/" }
}"#;

    #[rstest]
    #[case(".toml", TOML_CONFIG)]
    #[case(".json", JSON_CONFIG)]
    fn parse_config(#[case] suffix: &str, #[case] content: &str) {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();

        let path = file.path().to_str().unwrap();
        let config = ConnectorConfig::try_from(path).expect("failed to parse config file");

        assert_eq!(config.trust_agent.http.api_version, "v2");
        assert_eq!(config.trust_agent.http.request_timeout_sec, 5);
        assert_eq!(config.trust_agent.http.aas_username.as_deref(), Some("admin"));
        assert_eq!(config.trust_agent.nats.servers.len(), 2);
        assert_eq!(config.trust_agent.nats.subject_namespace, "trust-agent");
        assert_eq!(config.trust_agent.nats.request_timeout_sec, 10);
        assert_eq!(
            config.trust_agent.nats.ca_cert_files,
            vec![PathBuf::from("/etc/host-connector/nats-ca.pem")]
        );
        assert_eq!(config.vsphere.request_timeout_sec, 30);

        let trust = config.trust.load().unwrap();
        assert_eq!(
            trust.aas_api_url.unwrap().as_str(),
            "https://aas.example.com:8444/aas/v1/"
        );
        assert!(trust.ca_certs.is_empty());
    }

    #[test]
    fn defaults() {
        let config = ConnectorConfig::default();
        assert_eq!(config.trust_agent.http.options(), HttpOptions::default());
        assert_eq!(config.trust_agent.nats, NatsOptions::default());
        assert!(config.trust.load().unwrap().aas_api_url.is_none());
    }

    #[test]
    fn bad_aas_url() {
        let trust = TrustConfig {
            aas_api_url: Some("not a url".into()),
            ..Default::default()
        };
        assert!(trust.load().is_err());
    }

    #[test]
    fn missing_file() {
        assert!(ConnectorConfig::try_from("/nonexistent/host-connector").is_err());
    }
}
