// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! NATS transport.
//!
//! The agent listens on `<namespace>.<host-id>.<operation>`. A connection
//! lives for a single request: it is opened with the configured
//! credentials, used for one request/reply exchange and dropped on every
//! path, success or failure.

use std::{future::Future, path::PathBuf, time::Duration};

use anyhow::anyhow;
use async_nats::{ConnectOptions, Event, RequestError, RequestErrorKind, ServerAddr};
use async_trait::async_trait;
use host_manifest::{HostInfo, PcrBank, PcrIndex};
use log::{debug, info, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

use crate::{
    api::TrustAgentClient,
    client::Operation,
    types::{Manifest, Measurement, TagWriteRequest, TpmQuoteRequest, TpmQuoteResponse},
    Error, Result,
};

pub const DEFAULT_SUBJECT_NAMESPACE: &str = "trust-agent";

const DEFAULT_REQUEST_TIMEOUT_SEC: u64 = 10;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsOptions {
    /// Servers of the bus, e.g. `tls://nats.example.com:4222`.
    pub servers: Vec<String>,

    /// NATS credentials file (JWT and nkey seed).
    pub credentials_file: PathBuf,

    /// PEM files of the CAs trusted for the server certificates.
    pub ca_cert_files: Vec<PathBuf>,

    pub subject_namespace: String,

    /// Bound on a whole request/reply exchange, in seconds.
    pub request_timeout_sec: u64,
}

impl Default for NatsOptions {
    fn default() -> Self {
        Self {
            servers: vec![],
            credentials_file: PathBuf::new(),
            ca_cert_files: vec![],
            subject_namespace: DEFAULT_SUBJECT_NAMESPACE.into(),
            request_timeout_sec: DEFAULT_REQUEST_TIMEOUT_SEC,
        }
    }
}

impl NatsOptions {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }
}

pub struct NatsTrustAgentClient {
    host_id: String,
    servers: Vec<ServerAddr>,
    options: NatsOptions,
}

fn check_subject_token(kind: &str, token: &str) -> Result<()> {
    if token.is_empty()
        || token
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>'))
    {
        return Err(Error::Configuration(format!(
            "`{token}` is not a valid NATS {kind}"
        )));
    }

    Ok(())
}

async fn log_connection_event(event: Event) {
    match event {
        Event::Connected => info!("NATS connection (re)established"),
        Event::Disconnected => warn!("NATS connection lost"),
        Event::ServerError(e) => warn!("NATS server error: {e}"),
        Event::ClientError(e) => warn!("NATS client error: {e}"),
        other => debug!("NATS connection event: {other}"),
    }
}

/// A failed NATS request, reduced to what the error mapping looks at.
struct RequestFailure {
    kind: RequestErrorKind,
    source: anyhow::Error,
}

impl From<RequestError> for RequestFailure {
    fn from(e: RequestError) -> Self {
        Self {
            kind: e.kind(),
            source: e.into(),
        }
    }
}

/// Await `request` for at most `timeout`.
///
/// `request` owns the connection it runs on, so the connection is released
/// when it completes or, on timeout, when it is dropped here.
async fn exchange<F>(operation: Operation, timeout: Duration, request: F) -> Result<Vec<u8>>
where
    F: Future<Output = std::result::Result<Vec<u8>, RequestFailure>>,
{
    match tokio::time::timeout(timeout, request).await {
        Err(elapsed) => Err(Error::Timeout {
            operation,
            timeout,
            source: elapsed.into(),
        }),
        Ok(Err(RequestFailure {
            kind: RequestErrorKind::TimedOut,
            source,
        })) => Err(Error::Timeout {
            operation,
            timeout,
            source,
        }),
        Ok(Err(RequestFailure { source, .. })) => Err(Error::transport(operation, source)),
        Ok(Ok(payload)) => Ok(payload),
    }
}

fn decode_reply<T: DeserializeOwned>(operation: Operation, reply: &[u8]) -> Result<T> {
    serde_json::from_slice(reply).map_err(|e| Error::decode(operation, e))
}

impl NatsTrustAgentClient {
    pub fn new(host_id: &str, options: NatsOptions) -> Result<Self> {
        check_subject_token("host id", host_id)?;
        for token in options.subject_namespace.split('.') {
            check_subject_token("subject namespace", token)?;
        }

        if options.servers.is_empty() {
            return Err(Error::Configuration("no NATS server configured".into()));
        }

        let servers = options
            .servers
            .iter()
            .map(|server| {
                server.parse::<ServerAddr>().map_err(|e| {
                    Error::Configuration(format!("NATS server `{server}`: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            host_id: host_id.to_string(),
            servers,
            options,
        })
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Subject the agent answers `operation` on.
    pub fn subject(&self, operation: Operation) -> String {
        format!(
            "{}.{}.{}",
            self.options.subject_namespace,
            self.host_id,
            operation.nats_suffix()
        )
    }

    async fn connect(&self, operation: Operation) -> Result<async_nats::Client> {
        let credentials_file = &self.options.credentials_file;
        let mut connect_options = ConnectOptions::with_credentials_file(credentials_file.clone())
            .await
            .map_err(|e| {
                Error::Configuration(format!(
                    "read NATS credentials file `{}`: {e}",
                    credentials_file.display()
                ))
            })?;

        for ca_cert_file in &self.options.ca_cert_files {
            connect_options = connect_options.add_root_certificates(ca_cert_file.clone());
        }

        connect_options
            .require_tls(true)
            .connection_timeout(self.options.request_timeout())
            .request_timeout(Some(self.options.request_timeout()))
            .event_callback(log_connection_event)
            .connect(self.servers.as_slice())
            .await
            .map_err(|e| Error::transport(operation, e))
    }

    /// One request/reply exchange on a fresh connection.
    async fn request(&self, operation: Operation, payload: Vec<u8>) -> Result<Vec<u8>> {
        let client = self.connect(operation).await?;
        let subject = self.subject(operation);

        debug!("{operation}: request on {subject}");
        exchange(operation, self.options.request_timeout(), async move {
            let message = client.request(subject, payload.into()).await?;
            Ok::<_, RequestFailure>(message.payload.to_vec())
        })
        .await
    }

    async fn request_json<Req, Resp>(&self, operation: Operation, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(request)
            .map_err(|e| Error::InvalidArgument(format!("{operation}: {e}")))?;
        let reply = self.request(operation, payload).await?;
        decode_reply(operation, &reply)
    }

    async fn request_certificate(&self, operation: Operation) -> Result<Vec<u8>> {
        let certificate = self.request(operation, vec![]).await?;
        if certificate.is_empty() {
            return Err(Error::decode(operation, anyhow!("empty certificate")));
        }

        Ok(certificate)
    }
}

#[async_trait]
impl TrustAgentClient for NatsTrustAgentClient {
    async fn get_host_info(&self) -> Result<HostInfo> {
        let operation = Operation::GetHostInfo;
        let reply = self.request(operation, vec![]).await?;
        decode_reply(operation, &reply)
    }

    async fn get_tpm_quote(
        &self,
        nonce: &str,
        pcr_list: &[PcrIndex],
        pcr_banks: &[PcrBank],
    ) -> Result<TpmQuoteResponse> {
        let request = TpmQuoteRequest::new(nonce, pcr_list, pcr_banks)?;
        self.request_json::<_, TpmQuoteResponse>(Operation::GetTpmQuote, &request)
            .await?
            .into_result()
    }

    async fn get_aik(&self) -> Result<Vec<u8>> {
        self.request_certificate(Operation::GetAik).await
    }

    async fn get_binding_key_certificate(&self) -> Result<Vec<u8>> {
        self.request_certificate(Operation::GetBindingKeyCertificate)
            .await
    }

    async fn deploy_asset_tag(&self, hardware_uuid: &str, tag: &str) -> Result<()> {
        let request = TagWriteRequest::new(hardware_uuid, tag)?;
        let payload = serde_json::to_vec(&request)
            .map_err(|e| Error::InvalidArgument(format!("{}: {e}", Operation::DeployAssetTag)))?;
        self.request(Operation::DeployAssetTag, payload).await?;
        Ok(())
    }

    async fn deploy_software_manifest(&self, manifest: &Manifest) -> Result<()> {
        manifest.validate()?;
        let payload = serde_json::to_vec(manifest).map_err(|e| {
            Error::InvalidArgument(format!("{}: {e}", Operation::DeploySoftwareManifest))
        })?;
        self.request(Operation::DeploySoftwareManifest, payload)
            .await?;
        Ok(())
    }

    async fn get_measurement_from_manifest(&self, manifest: &Manifest) -> Result<Measurement> {
        manifest.validate()?;
        self.request_json(Operation::GetMeasurementFromManifest, manifest)
            .await
    }

    fn base_url(&self) -> Option<Url> {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use rstest::rstest;

    use super::*;

    /// Stands for a NATS connection, flags when it is released.
    struct Connection(Arc<AtomicBool>);

    impl Drop for Connection {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Copy, Debug)]
    enum Agent {
        Replies,
        NeverReplies,
        ReportsTimeout,
        HasNoResponders,
    }

    async fn run(agent: Agent) -> (Result<Vec<u8>>, bool) {
        let released = Arc::new(AtomicBool::new(false));
        let connection = Connection(released.clone());

        let result = exchange(Operation::GetAik, Duration::from_millis(50), async move {
            let _connection = connection;
            match agent {
                Agent::Replies => Ok(b"aik".to_vec()),
                Agent::NeverReplies => std::future::pending().await,
                Agent::ReportsTimeout => Err(RequestFailure {
                    kind: RequestErrorKind::TimedOut,
                    source: anyhow!("timed out"),
                }),
                Agent::HasNoResponders => Err(RequestFailure {
                    kind: RequestErrorKind::NoResponders,
                    source: anyhow!("no responders"),
                }),
            }
        })
        .await;

        (result, released.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn reply_payload() {
        let (result, released) = run(Agent::Replies).await;
        assert_eq!(result.unwrap(), b"aik");
        assert!(released);
    }

    #[rstest]
    #[case(Agent::NeverReplies)]
    #[case(Agent::ReportsTimeout)]
    #[tokio::test]
    async fn timeouts(#[case] agent: Agent) {
        let (result, released) = run(agent).await;
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                operation: Operation::GetAik,
                timeout,
                ..
            } if timeout == Duration::from_millis(50)
        ));
        assert!(std::error::Error::source(&err).is_some());
        assert!(released);
    }

    #[tokio::test]
    async fn request_failure() {
        let (result, released) = run(Agent::HasNoResponders).await;
        let err = result.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(
            std::error::Error::source(&err).unwrap().to_string(),
            "no responders"
        );
        assert!(released);
    }

    #[rstest]
    #[case(b"".as_slice())]
    #[case(b"not json".as_slice())]
    #[case(br#"{"os_name": 7}"#.as_slice())]
    fn malformed_reply(#[case] reply: &[u8]) {
        let err = decode_reply::<HostInfo>(Operation::GetHostInfo, reply).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode {
                operation: Operation::GetHostInfo,
                ..
            }
        ));
    }

    #[test]
    fn well_formed_reply() {
        let host_info: HostInfo =
            decode_reply(Operation::GetHostInfo, br#"{"os_name": "RedHatEnterprise"}"#).unwrap();
        assert_eq!(host_info.os_name, "RedHatEnterprise");
    }

    fn options() -> NatsOptions {
        NatsOptions {
            servers: vec!["tls://127.0.0.1:4222".into()],
            credentials_file: PathBuf::from("/nonexistent/trust-agent.creds"),
            ..Default::default()
        }
    }

    #[rstest]
    #[case(Operation::GetHostInfo, "trust-agent.host-1.host-info-request")]
    #[case(Operation::GetTpmQuote, "trust-agent.host-1.quote-request")]
    #[case(Operation::GetAik, "trust-agent.host-1.aik-request")]
    #[case(
        Operation::GetBindingKeyCertificate,
        "trust-agent.host-1.binding-key-certificate-request"
    )]
    #[case(Operation::DeployAssetTag, "trust-agent.host-1.deploy-asset-tag")]
    #[case(Operation::DeploySoftwareManifest, "trust-agent.host-1.deploy-manifest-request")]
    #[case(
        Operation::GetMeasurementFromManifest,
        "trust-agent.host-1.application-measurement-request"
    )]
    fn subjects(#[case] operation: Operation, #[case] expected: &str) {
        let client = NatsTrustAgentClient::new("host-1", options()).unwrap();
        assert_eq!(client.subject(operation), expected);
    }

    #[test]
    fn custom_namespace() {
        let options = NatsOptions {
            subject_namespace: "dc1.trust-agent".into(),
            ..options()
        };
        let client = NatsTrustAgentClient::new("host-1", options).unwrap();
        assert_eq!(
            client.subject(Operation::GetAik),
            "dc1.trust-agent.host-1.aik-request"
        );
    }

    #[rstest]
    #[case("")]
    #[case("host.1")]
    #[case("host*")]
    #[case("host >")]
    fn invalid_host_id(#[case] host_id: &str) {
        let err = NatsTrustAgentClient::new(host_id, options()).err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn no_servers() {
        let options = NatsOptions {
            servers: vec![],
            ..options()
        };
        let err = NatsTrustAgentClient::new("host-1", options).err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn default_options() {
        let options = NatsOptions::default();
        assert_eq!(options.subject_namespace, "trust-agent");
        assert_eq!(options.request_timeout(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_credentials_file() {
        let client = NatsTrustAgentClient::new("host-1", options()).unwrap();
        let err = client.get_host_info().await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
