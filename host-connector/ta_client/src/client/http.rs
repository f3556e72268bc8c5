// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! HTTPS transport.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use host_manifest::{HostInfo, PcrBank, PcrIndex};
use log::{debug, warn};
use reqwest::{
    header::{ACCEPT, CONTENT_TYPE},
    Method, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use url::Url;

use crate::{
    api::TrustAgentClient,
    client::Operation,
    types::{Manifest, Measurement, TagWriteRequest, TpmQuoteRequest, TpmQuoteResponse},
    Error, Result,
};

pub const DEFAULT_API_VERSION: &str = "v2";

const DEFAULT_REQUEST_TIMEOUT_SEC: u64 = 30;

const CONTENT_JSON: &str = "application/json";
const CONTENT_OCTET_STREAM: &str = "application/octet-stream";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    /// Last path segment of the base URL.
    pub api_version: String,

    /// Timeout of a single HTTP request, in seconds.
    pub request_timeout_sec: u64,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.into(),
            request_timeout_sec: DEFAULT_REQUEST_TIMEOUT_SEC,
        }
    }
}

impl HttpOptions {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }
}

/// How requests to the agent are authorized.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Authentication {
    #[default]
    None,

    /// A fixed bearer token.
    Bearer(String),

    /// Bearer tokens issued by the authentication service at `url` in
    /// exchange of the given credentials. Tokens are cached and refreshed
    /// once when the agent rejects them.
    Aas {
        url: Url,
        username: String,
        password: String,
    },
}

pub struct HttpTrustAgentClient {
    base_url: Url,
    http_client: reqwest::Client,
    authentication: Authentication,
    request_timeout: Duration,
    token: Mutex<Option<String>>,
}

/// `base` followed by the segments of `path`.
pub(crate) fn join_path(base: &Url, path: &str) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| Error::Configuration(format!("`{base}` cannot be used as a base URL")))?
        .pop_if_empty()
        .extend(path.split('/'));
    Ok(url)
}

fn decode_json<T: DeserializeOwned>(operation: Operation, payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| Error::decode(operation, e))
}

impl HttpTrustAgentClient {
    /// `base_url` is expected to be normalized already, see
    /// [`crate::TrustAgentAddress`].
    pub fn new(
        base_url: Url,
        http_client: reqwest::Client,
        authentication: Authentication,
        request_timeout: Duration,
    ) -> Self {
        Self {
            base_url,
            http_client,
            authentication,
            request_timeout,
            token: Mutex::new(None),
        }
    }

    fn send_error(&self, operation: Operation, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            return Error::Timeout {
                operation,
                timeout: self.request_timeout,
                source: e.into(),
            };
        }

        Error::transport(operation, e)
    }

    async fn request_token(&self, url: &Url, username: &str, password: &str) -> Result<String> {
        let operation = Operation::Authenticate;
        let endpoint = join_path(url, operation.http_path())?;
        let body = json!({ "username": username, "password": password });

        debug!("{operation}: POST {endpoint}");
        let response = self
            .http_client
            .post(endpoint)
            .header(CONTENT_TYPE, CONTENT_JSON)
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| self.send_error(operation, e))?;

        let status = response.status();
        let payload = response
            .text()
            .await
            .map_err(|e| self.send_error(operation, e))?;
        if !status.is_success() {
            return Err(Error::transport(
                operation,
                anyhow!("authentication service returned HTTP {status}: {payload}"),
            ));
        }

        let token = payload.trim();
        if token.is_empty() {
            return Err(Error::decode(operation, anyhow!("empty token")));
        }

        Ok(token.to_string())
    }

    async fn bearer_token(&self) -> Result<Option<String>> {
        match &self.authentication {
            Authentication::None => Ok(None),
            Authentication::Bearer(token) => Ok(Some(token.clone())),
            Authentication::Aas {
                url,
                username,
                password,
            } => {
                let mut cached = self.token.lock().await;
                if cached.is_none() {
                    *cached = Some(self.request_token(url, username, password).await?);
                }

                Ok(cached.clone())
            }
        }
    }

    /// Sends one request and returns the body of a successful response.
    /// An `Unauthorized` answer makes the client fetch a new token and try
    /// exactly once more.
    async fn send(
        &self,
        operation: Operation,
        method: Method,
        accept: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        let url = join_path(&self.base_url, operation.http_path())?;
        let mut refreshed = false;

        loop {
            let mut request = self
                .http_client
                .request(method.clone(), url.clone())
                .header(ACCEPT, accept);
            if let Some(token) = self.bearer_token().await? {
                request = request.bearer_auth(token);
            }
            if let Some(body) = &body {
                request = request.header(CONTENT_TYPE, CONTENT_JSON).body(body.clone());
            }

            debug!("{operation}: {method} {url}");
            let response = request
                .send()
                .await
                .map_err(|e| self.send_error(operation, e))?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED
                && !refreshed
                && matches!(self.authentication, Authentication::Aas { .. })
            {
                warn!("{operation}: token rejected by the trust agent, requesting a new one");
                *self.token.lock().await = None;
                refreshed = true;
                continue;
            }

            let payload = response
                .bytes()
                .await
                .map_err(|e| self.send_error(operation, e))?;
            if !status.is_success() {
                return Err(Error::transport(
                    operation,
                    anyhow!("HTTP {status}: {}", String::from_utf8_lossy(&payload)),
                ));
            }

            return Ok(payload.to_vec());
        }
    }

    async fn post_json<T: Serialize>(&self, operation: Operation, body: &T) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(body)
            .map_err(|e| Error::InvalidArgument(format!("{operation}: {e}")))?;
        self.send(operation, Method::POST, CONTENT_JSON, Some(body))
            .await
    }

    async fn get_certificate(&self, operation: Operation) -> Result<Vec<u8>> {
        let certificate = self
            .send(operation, Method::GET, CONTENT_OCTET_STREAM, None)
            .await?;
        if certificate.is_empty() {
            return Err(Error::decode(operation, anyhow!("empty certificate")));
        }

        Ok(certificate)
    }
}

#[async_trait]
impl TrustAgentClient for HttpTrustAgentClient {
    async fn get_host_info(&self) -> Result<HostInfo> {
        let operation = Operation::GetHostInfo;
        let payload = self
            .send(operation, Method::GET, CONTENT_JSON, None)
            .await?;
        decode_json(operation, &payload)
    }

    async fn get_tpm_quote(
        &self,
        nonce: &str,
        pcr_list: &[PcrIndex],
        pcr_banks: &[PcrBank],
    ) -> Result<TpmQuoteResponse> {
        let operation = Operation::GetTpmQuote;
        let request = TpmQuoteRequest::new(nonce, pcr_list, pcr_banks)?;
        let payload = self.post_json(operation, &request).await?;
        decode_json::<TpmQuoteResponse>(operation, &payload)?.into_result()
    }

    async fn get_aik(&self) -> Result<Vec<u8>> {
        self.get_certificate(Operation::GetAik).await
    }

    async fn get_binding_key_certificate(&self) -> Result<Vec<u8>> {
        self.get_certificate(Operation::GetBindingKeyCertificate)
            .await
    }

    async fn deploy_asset_tag(&self, hardware_uuid: &str, tag: &str) -> Result<()> {
        let request = TagWriteRequest::new(hardware_uuid, tag)?;
        self.post_json(Operation::DeployAssetTag, &request).await?;
        Ok(())
    }

    async fn deploy_software_manifest(&self, manifest: &Manifest) -> Result<()> {
        manifest.validate()?;
        self.post_json(Operation::DeploySoftwareManifest, manifest)
            .await?;
        Ok(())
    }

    async fn get_measurement_from_manifest(&self, manifest: &Manifest) -> Result<Measurement> {
        let operation = Operation::GetMeasurementFromManifest;
        manifest.validate()?;
        let payload = self.post_json(operation, manifest).await?;
        decode_json(operation, &payload)
    }

    fn base_url(&self) -> Option<Url> {
        Some(self.base_url.clone())
    }
}
