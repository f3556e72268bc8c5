// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use log::debug;
use url::Url;

use crate::{
    api::TrustAgentClient,
    client::{
        http::{Authentication, HttpOptions, HttpTrustAgentClient},
        nats::{NatsOptions, NatsTrustAgentClient},
    },
    Error, Result,
};

const NATS_SCHEME: &str = "nats";

/// Where a trust agent is reached, derived from its address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrustAgentAddress {
    /// `base_url` always ends with the API version segment.
    Http { base_url: Url },

    /// The agent of host `host_id`, on the message bus.
    Nats { host_id: String },
}

impl TrustAgentAddress {
    /// Selects the transport from the scheme of `address`: `nats` selects
    /// the message bus, anything else selects HTTP.
    pub fn parse(address: &str, api_version: &str) -> Result<Self> {
        let url = Url::parse(address)
            .map_err(|e| Error::Configuration(format!("trust agent address `{address}`: {e}")))?;

        match url.scheme() {
            NATS_SCHEME => {
                let host_id = url.host_str().filter(|h| !h.is_empty()).ok_or_else(|| {
                    Error::Configuration(format!("`{address}` does not name a host"))
                })?;
                Ok(Self::Nats {
                    host_id: host_id.to_string(),
                })
            }
            _ => Ok(Self::Http {
                base_url: normalize_base_url(url, api_version)?,
            }),
        }
    }
}

/// Make sure the path of `url` ends with the API version, without a
/// trailing slash.
fn normalize_base_url(mut url: Url, api_version: &str) -> Result<Url> {
    let address = url.to_string();
    let cannot_be_base = || Error::Configuration(format!("`{address}` cannot be a base URL"));

    url.path_segments_mut()
        .map_err(|_| cannot_be_base())?
        .pop_if_empty();

    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default()
        .to_string();
    if last != api_version {
        url.path_segments_mut()
            .map_err(|_| cannot_be_base())?
            .push(api_version);
    }

    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

pub struct TrustAgentClientBuilder {
    address: String,
    ca_certs: Vec<String>,
    authentication: Authentication,
    http_options: HttpOptions,
    nats_options: NatsOptions,
}

impl TrustAgentClientBuilder {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.trim().to_string(),
            ca_certs: vec![],
            authentication: Authentication::None,
            http_options: HttpOptions::default(),
            nats_options: NatsOptions::default(),
        }
    }

    /// Trust `cert_pem` for the TLS connection to an HTTPS agent. Once a
    /// CA is added, the system roots are no longer trusted.
    pub fn add_ca_cert(mut self, cert_pem: &str) -> Self {
        self.ca_certs.push(cert_pem.to_string());
        self
    }

    pub fn set_authentication(mut self, authentication: Authentication) -> Self {
        self.authentication = authentication;
        self
    }

    pub fn set_http_options(mut self, options: HttpOptions) -> Self {
        self.http_options = options;
        self
    }

    pub fn set_nats_options(mut self, options: NatsOptions) -> Self {
        self.nats_options = options;
        self
    }

    fn build_http_client(&self) -> Result<reqwest::Client> {
        let mut http_client_builder = reqwest::Client::builder()
            .user_agent(format!("host-connector-ta-client/{}", env!("CARGO_PKG_VERSION")))
            .timeout(self.http_options.request_timeout())
            .use_rustls_tls();

        if !self.ca_certs.is_empty() {
            http_client_builder = http_client_builder.tls_built_in_root_certs(false);
        }

        for ca_cert in &self.ca_certs {
            let cert = reqwest::Certificate::from_pem(ca_cert.as_bytes())
                .map_err(|e| Error::Configuration(format!("read trusted CA certificate: {e}")))?;
            http_client_builder = http_client_builder.add_root_certificate(cert);
        }

        http_client_builder
            .build()
            .map_err(|e| Error::Configuration(format!("build trust agent HTTP client: {e}")))
    }

    pub fn build(self) -> Result<Box<dyn TrustAgentClient>> {
        match TrustAgentAddress::parse(&self.address, &self.http_options.api_version)? {
            TrustAgentAddress::Nats { host_id } => {
                debug!("trust agent of `{host_id}` is reached over NATS");
                let client = NatsTrustAgentClient::new(&host_id, self.nats_options)?;
                Ok(Box::new(client))
            }
            TrustAgentAddress::Http { base_url } => {
                debug!("trust agent is reached at {base_url}");
                let http_client = self.build_http_client()?;
                let client = HttpTrustAgentClient::new(
                    base_url,
                    http_client,
                    self.authentication,
                    self.http_options.request_timeout(),
                );
                Ok(Box::new(client))
            }
        }
    }
}
