// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{fs, path::Path, str::FromStr};

use log::debug;
use strum::{AsRefStr, EnumString};
use ta_client::{Authentication, TrustAgentClientBuilder};
use url::Url;

use crate::{config::ConnectorConfig, Error, HostConnector, Result};

pub mod intel;
pub mod vmware;

#[derive(AsRefStr, EnumString, Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    #[strum(serialize = "intel", ascii_case_insensitive)]
    Intel,

    #[strum(serialize = "vmware", ascii_case_insensitive)]
    Vmware,
}

/// `[<vendor>:]<url>[;h=<host>][;u=<user>][;p=<password>]`
///
/// A missing vendor means `intel`.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub vendor: Vendor,
    pub url: Url,
    pub host_name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionString")
            .field("vendor", &self.vendor)
            .field("url", &self.url.as_str())
            .field("host_name", &self.host_name)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl FromStr for ConnectionString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split(';');
        let address = parts.next().unwrap_or_default().trim();

        // `https://...` carries a scheme, `vmware:https://...` a vendor.
        let (vendor, address) = match address.split_once(':') {
            Some((tag, rest)) if !rest.starts_with("//") => {
                let vendor = Vendor::from_str(tag)
                    .map_err(|_| Error::Configuration(format!("unknown vendor `{tag}`")))?;
                (vendor, rest)
            }
            _ => (Vendor::Intel, address),
        };

        let url = Url::parse(address)
            .map_err(|e| Error::Configuration(format!("connection address `{address}`: {e}")))?;

        let mut connection = Self {
            vendor,
            url,
            host_name: None,
            username: None,
            password: None,
        };

        for option in parts.map(str::trim).filter(|option| !option.is_empty()) {
            let (key, value) = option.split_once('=').ok_or_else(|| {
                Error::Configuration(format!("connection option `{option}` is not `key=value`"))
            })?;
            let slot = match key.trim() {
                "h" | "hostname" => &mut connection.host_name,
                "u" | "username" => &mut connection.username,
                "p" | "password" => &mut connection.password,
                other => {
                    return Err(Error::Configuration(format!(
                        "unknown connection option `{other}`"
                    )))
                }
            };
            *slot = Some(value.to_string());
        }

        if connection.vendor == Vendor::Vmware && connection.host_name.is_none() {
            return Err(Error::Configuration(
                "a vmware connection string needs the host name (`h=`)".into(),
            ));
        }

        Ok(connection)
    }
}

/// What connectors trust: the authentication service issuing trust agent
/// tokens and the CAs of the servers they talk to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrustMaterial {
    pub aas_api_url: Option<Url>,

    /// PEM encoded CA certificates.
    pub ca_certs: Vec<String>,
}

impl TrustMaterial {
    /// Read every `.pem` and `.crt` file of `dir`, in file name order.
    pub fn load_ca_dir(mut self, dir: &Path) -> Result<Self> {
        let read_error =
            |e: std::io::Error| Error::Configuration(format!("read CA directory `{}`: {e}", dir.display()));

        let mut files = fs::read_dir(dir)
            .map_err(read_error)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(read_error)?;
        files.retain(|path| {
            path.is_file()
                && matches!(
                    path.extension().and_then(|ext| ext.to_str()),
                    Some("pem" | "crt")
                )
        });
        files.sort();

        for file in files {
            debug!("trusting CA certificates of {}", file.display());
            let pem = fs::read_to_string(&file).map_err(|e| {
                Error::Configuration(format!("read CA certificate `{}`: {e}", file.display()))
            })?;
            self.ca_certs.push(pem);
        }

        Ok(self)
    }
}

fn trust_agent_authentication(
    connection: &ConnectionString,
    trust: &TrustMaterial,
    config: &ConnectorConfig,
) -> Result<Authentication> {
    let http = &config.trust_agent.http;
    let username = connection.username.as_ref().or(http.aas_username.as_ref());
    let password = connection.password.as_ref().or(http.aas_password.as_ref());

    match (username, password) {
        (Some(username), Some(password)) => {
            let url = trust.aas_api_url.clone().ok_or_else(|| {
                Error::Configuration("trust agent credentials given without an AAS URL".into())
            })?;
            Ok(Authentication::Aas {
                url,
                username: username.clone(),
                password: password.clone(),
            })
        }
        (None, None) => Ok(http
            .bearer_token
            .clone()
            .map(Authentication::Bearer)
            .unwrap_or_default()),
        _ => Err(Error::Configuration(
            "trust agent username and password must be given together".into(),
        )),
    }
}

fn new_intel_connector(
    connection: &ConnectionString,
    trust: &TrustMaterial,
    config: &ConnectorConfig,
) -> Result<intel::IntelConnector> {
    let mut builder = TrustAgentClientBuilder::new(connection.url.as_str())
        .set_authentication(trust_agent_authentication(connection, trust, config)?)
        .set_http_options(config.trust_agent.http.options())
        .set_nats_options(config.trust_agent.nats.clone());
    for ca_cert in &trust.ca_certs {
        builder = builder.add_ca_cert(ca_cert);
    }

    let client = builder
        .build()
        .map_err(|e| Error::Configuration(e.to_string()))?;
    Ok(intel::IntelConnector::new(client))
}

fn new_vmware_connector(
    connection: &ConnectionString,
    trust: &TrustMaterial,
    config: &ConnectorConfig,
) -> Result<vmware::VmwareConnector> {
    let (Some(host_name), Some(username), Some(password)) = (
        connection.host_name.as_deref(),
        connection.username.as_deref(),
        connection.password.as_deref(),
    ) else {
        return Err(Error::Configuration(
            "a vmware connection string needs `h=`, `u=` and `p=`".into(),
        ));
    };

    // The REST API lives at the root, whatever path the address carries.
    let mut base_url = connection.url.clone();
    base_url.set_path("/");
    base_url.set_query(None);

    let api = vmware::client::VsphereClient::new(
        base_url,
        username,
        password,
        &trust.ca_certs,
        config.vsphere.request_timeout(),
    )?;
    Ok(vmware::VmwareConnector::new(Box::new(api), host_name))
}

/// Create the [`HostConnector`] a connection string describes.
pub fn new_host_connector(
    connection_string: &str,
    trust: &TrustMaterial,
    config: &ConnectorConfig,
) -> Result<Box<dyn HostConnector>> {
    let connection = ConnectionString::from_str(connection_string)?;
    debug!("creating {} connector for {}", connection.vendor, connection.url);

    match connection.vendor {
        Vendor::Intel => Ok(Box::new(new_intel_connector(&connection, trust, config)?)
            as Box<dyn HostConnector>),
        Vendor::Vmware => Ok(Box::new(new_vmware_connector(&connection, trust, config)?)
            as Box<dyn HostConnector>),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("https://ta.example.com:1443", Vendor::Intel, "https://ta.example.com:1443/")]
    #[case("intel:https://ta.example.com:1443", Vendor::Intel, "https://ta.example.com:1443/")]
    #[case("INTEL:nats://host-1", Vendor::Intel, "nats://host-1")]
    #[case(
        "VMware:https://vc.example.com:443/sdk;h=esx-01;u=admin;p=pass=word",
        Vendor::Vmware,
        "https://vc.example.com/sdk"
    )]
    fn parse_connection_string(#[case] s: &str, #[case] vendor: Vendor, #[case] url: &str) {
        let connection = ConnectionString::from_str(s).unwrap();
        assert_eq!(connection.vendor, vendor);
        assert_eq!(connection.url.as_str(), url);
        if vendor == Vendor::Vmware {
            assert_eq!(connection.host_name.as_deref(), Some("esx-01"));
            assert_eq!(connection.password.as_deref(), Some("pass=word"));
        }
    }

    #[rstest]
    #[case("")]
    #[case("not a url")]
    #[case("hyperv:https://host.example.com")]
    #[case("vmware:https://vc.example.com;u=admin;p=secret")]
    #[case("https://ta.example.com;x=1")]
    #[case("https://ta.example.com;h")]
    fn bad_connection_string(#[case] s: &str) {
        let err = ConnectionString::from_str(s).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn password_is_not_printed() {
        let connection =
            ConnectionString::from_str("vmware:https://vc;h=esx;u=admin;p=secret").unwrap();
        assert!(!format!("{connection:?}").contains("secret"));
    }

    #[test]
    fn factory() {
        let config = ConnectorConfig::default();
        let trust = TrustMaterial::default();

        assert!(new_host_connector("https://ta.example.com:1443", &trust, &config).is_ok());
        assert!(
            new_host_connector("vmware:https://vc.example.com;h=esx;u=u;p=p", &trust, &config)
                .is_ok()
        );

        // Credentials need an authentication service.
        let err = new_host_connector("https://ta.example.com;u=admin;p=secret", &trust, &config)
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);

        let err = new_host_connector("vmware:https://vc.example.com;h=esx", &trust, &config)
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn trust_agent_authentication_sources() {
        let connection = ConnectionString::from_str("https://ta;u=admin;p=secret").unwrap();
        let trust = TrustMaterial {
            aas_api_url: Some(Url::parse("https://aas.example.com/aas/v1/").unwrap()),
            ca_certs: vec![],
        };
        let mut config = ConnectorConfig::default();

        assert!(matches!(
            trust_agent_authentication(&connection, &trust, &config).unwrap(),
            Authentication::Aas { ref username, .. } if username == "admin"
        ));

        let connection = ConnectionString::from_str("https://ta").unwrap();
        config.trust_agent.http.bearer_token = Some("token".into());
        assert_eq!(
            trust_agent_authentication(&connection, &trust, &config).unwrap(),
            Authentication::Bearer("token".into())
        );
    }

    #[test]
    fn ca_directory() {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in [("b.pem", "B"), ("a.crt", "A"), ("notes.txt", "C")] {
            let mut file = fs::File::create(dir.path().join(name)).unwrap();
            file.write_all(content.as_bytes()).unwrap();
        }

        let trust = TrustMaterial::default().load_ca_dir(dir.path()).unwrap();
        assert_eq!(trust.ca_certs, vec!["A".to_string(), "B".to_string()]);

        let err = TrustMaterial::default()
            .load_ca_dir(&dir.path().join("missing"))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }
}
