// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! # Trust Agent Client
//!
//! This crate implements the client side of the trust agent protocol, the
//! agent running on a bare-metal host that gives access to its TPM.
//!
//! ## Transports
//!
//! The same [`TrustAgentClient`] capabilities are offered over two
//! transports, selected by the scheme of the agent address:
//! - `https://<host>:<port>[/<prefix>]`: request/response over HTTPS. The
//!   base URL is normalized to end with the API version (`/v2`). Addresses
//!   of any other scheme but `nats` take this path too.
//! - `nats://<host-id>`: request/reply over a TLS secured NATS bus. Every
//!   call opens its own authenticated connection, sends one request on
//!   `<namespace>.<host-id>.<operation>` and closes the connection.
//!
//! ```no_run
//! use ta_client::{TrustAgentClient, TrustAgentClientBuilder};
//!
//! async fn host_info() {
//!     let client = TrustAgentClientBuilder::new("https://ta.example.com:1443")
//!         .build()
//!         .unwrap();
//!
//!     let host_info = client.get_host_info().await.unwrap();
//!     println!("{}", host_info.os_name);
//! }
//! ```

pub mod api;
pub mod builder;
pub mod client;
pub mod error;
pub mod mock;
pub mod types;

pub use api::*;
pub use builder::{TrustAgentAddress, TrustAgentClientBuilder};
pub use client::{
    http::{Authentication, HttpOptions, HttpTrustAgentClient},
    nats::{NatsOptions, NatsTrustAgentClient},
    Operation,
};
pub use error::{Error, Result};
pub use mock::MockTrustAgentClient;
pub use types::*;
