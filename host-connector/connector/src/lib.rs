// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! # Host Connector
//!
//! Collects the [`HostManifest`] of a host: its platform identity, the PCR
//! values reported by its TPM and the event logs that produced them. The
//! manifest is only returned once every event log replays to the reported
//! PCR value.
//!
//! Two vendors are supported:
//! - `intel`: a bare-metal host running a trust agent, reached over HTTPS
//!   or NATS, see [`ta_client`];
//! - `vmware`: an ESXi host, attested through the vCenter API.
//!
//! Connectors are created from a connection string:
//!
//! ```no_run
//! use host_connector::{new_host_connector, ConnectorConfig, TrustMaterial};
//!
//! # async fn run() -> host_connector::Result<()> {
//! let connector = new_host_connector(
//!     "intel:https://ta.example.com:1443",
//!     &TrustMaterial::default(),
//!     &ConnectorConfig::default(),
//! )?;
//! let manifest = connector.get_host_manifest("3q2+7w==", &[], &[]).await?;
//! println!("{}", manifest.quote_digest);
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate strum;

pub mod api;
pub mod config;
pub mod error;
pub mod plugins;

pub use api::*;
pub use config::ConnectorConfig;
pub use error::{Error, ErrorKind, Result};
pub use host_manifest::HostManifest;
pub use plugins::{new_host_connector, ConnectionString, TrustMaterial, Vendor};
