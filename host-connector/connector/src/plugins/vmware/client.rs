// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Read-only access to the vCenter REST API.
//!
//! | call                  | endpoint                                        |
//! |-----------------------|-------------------------------------------------|
//! | login                 | `POST /api/session` (basic auth)                |
//! | host lookup           | `GET /api/vcenter/host?names=<name>`            |
//! | cluster lookup        | `GET /api/vcenter/cluster?names=<name>`         |
//! | cluster hosts         | `GET /api/vcenter/host?clusters=<id>`           |
//! | host summary          | `GET /api/esx/hosts/<id>/summary`               |
//! | attestation report    | `GET /api/esx/hosts/<id>/tpm-attestation-report`|
//!
//! The session id is sent in `vmware-api-session-id`. An expired session
//! is renewed once per call.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use host_manifest::HostInfo;
use log::{debug, warn};
use reqwest::{header::ACCEPT, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use url::Url;

use crate::{
    plugins::vmware::report::{
        ClusterReference, HostReference, HostSummary, TpmAttestationReport,
    },
    Error, Result,
};

const SESSION_HEADER: &str = "vmware-api-session-id";

/// What the connector needs from the hypervisor management API.
#[async_trait]
pub trait VsphereApi: Send + Sync {
    async fn get_host_info(&self, host_name: &str) -> Result<HostInfo>;

    async fn get_tpm_attestation_report(&self, host_name: &str) -> Result<TpmAttestationReport>;

    async fn get_cluster_hosts(&self, cluster_name: &str) -> Result<Vec<HostReference>>;
}

pub struct VsphereClient {
    base_url: Url,
    username: String,
    password: String,
    http_client: reqwest::Client,
    session: Mutex<Option<String>>,
}

impl VsphereClient {
    pub fn new(
        base_url: Url,
        username: &str,
        password: &str,
        ca_certs: &[String],
        timeout: Duration,
    ) -> Result<Self> {
        let mut http_client_builder = reqwest::Client::builder()
            .user_agent(format!("host-connector/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .use_rustls_tls();

        if !ca_certs.is_empty() {
            http_client_builder = http_client_builder.tls_built_in_root_certs(false);
        }

        for ca_cert in ca_certs {
            let cert = reqwest::Certificate::from_pem(ca_cert.as_bytes())
                .map_err(|e| Error::Configuration(format!("read trusted CA certificate: {e}")))?;
            http_client_builder = http_client_builder.add_root_certificate(cert);
        }

        let http_client = http_client_builder
            .build()
            .map_err(|e| Error::Configuration(format!("build vCenter HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            username: username.to_string(),
            password: password.to_string(),
            http_client,
            session: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str, query: Option<(&str, &str)>) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                Error::Configuration(format!("`{}` cannot be a base URL", self.base_url))
            })?
            .pop_if_empty()
            .extend(path.split('/'));
        if let Some((key, value)) = query {
            url.query_pairs_mut().append_pair(key, value);
        }

        Ok(url)
    }

    fn send_error(operation: &'static str, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            return Error::Timeout {
                operation,
                source: e.into(),
            };
        }

        Error::transport(operation, e)
    }

    async fn login(&self, operation: &'static str) -> Result<String> {
        let url = self.endpoint("api/session", None)?;
        debug!("{operation}: POST {url}");
        let response = self
            .http_client
            .post(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| Self::send_error(operation, e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Self::send_error(operation, e))?;
        if !status.is_success() {
            return Err(Error::transport(
                operation,
                anyhow!("vCenter login returned HTTP {status}"),
            ));
        }

        serde_json::from_slice::<String>(&body).map_err(|e| Error::decode(operation, e))
    }

    async fn session(&self, operation: &'static str) -> Result<String> {
        let mut session = self.session.lock().await;
        if let Some(id) = session.as_ref() {
            return Ok(id.clone());
        }

        let id = self.login(operation).await?;
        *session = Some(id.clone());
        Ok(id)
    }

    async fn get<T: DeserializeOwned>(&self, operation: &'static str, url: Url) -> Result<T> {
        let mut renewed = false;
        loop {
            let session = self.session(operation).await?;
            debug!("{operation}: GET {url}");
            let response = self
                .http_client
                .get(url.clone())
                .header(ACCEPT, "application/json")
                .header(SESSION_HEADER, session)
                .send()
                .await
                .map_err(|e| Self::send_error(operation, e))?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !renewed {
                warn!("{operation}: vCenter session expired, logging in again");
                *self.session.lock().await = None;
                renewed = true;
                continue;
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| Self::send_error(operation, e))?;
            if !status.is_success() {
                return Err(Error::transport(
                    operation,
                    anyhow!("HTTP {status}: {}", String::from_utf8_lossy(&body)),
                ));
            }

            return serde_json::from_slice(&body).map_err(|e| Error::decode(operation, e));
        }
    }

    /// Managed object id of the host named `host_name`.
    async fn host_id(&self, operation: &'static str, host_name: &str) -> Result<String> {
        let url = self.endpoint("api/vcenter/host", Some(("names", host_name)))?;
        let hosts: Vec<HostReference> = self.get(operation, url).await?;
        hosts
            .into_iter()
            .find(|host| host.name == host_name)
            .map(|host| host.host)
            .ok_or_else(|| {
                Error::Configuration(format!("host `{host_name}` is not managed by this vCenter"))
            })
    }
}

#[async_trait]
impl VsphereApi for VsphereClient {
    async fn get_host_info(&self, host_name: &str) -> Result<HostInfo> {
        let operation = "get_host_info";
        let host_id = self.host_id(operation, host_name).await?;
        let url = self.endpoint(&format!("api/esx/hosts/{host_id}/summary"), None)?;
        let summary: HostSummary = self.get(operation, url).await?;
        Ok(summary.into())
    }

    async fn get_tpm_attestation_report(&self, host_name: &str) -> Result<TpmAttestationReport> {
        let operation = "get_tpm_attestation_report";
        let host_id = self.host_id(operation, host_name).await?;
        let url = self.endpoint(
            &format!("api/esx/hosts/{host_id}/tpm-attestation-report"),
            None,
        )?;
        self.get(operation, url).await
    }

    async fn get_cluster_hosts(&self, cluster_name: &str) -> Result<Vec<HostReference>> {
        let operation = "get_cluster_hosts";
        let url = self.endpoint("api/vcenter/cluster", Some(("names", cluster_name)))?;
        let clusters: Vec<ClusterReference> = self.get(operation, url).await?;
        let cluster = clusters
            .into_iter()
            .find(|cluster| cluster.name == cluster_name)
            .ok_or_else(|| {
                Error::Configuration(format!("cluster `{cluster_name}` is not known to vCenter"))
            })?;

        let url = self.endpoint("api/vcenter/host", Some(("clusters", &cluster.cluster)))?;
        self.get(operation, url).await
    }
}
