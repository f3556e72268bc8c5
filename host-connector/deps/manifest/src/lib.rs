// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! # Host Manifest
//!
//! The canonical, vendor-neutral data model produced by the host connectors,
//! together with the measurement-log replay engine.
//!
//! Every type here validates itself at construction and deserialization
//! time:
//! - a [`PcrIndex`] is always within `0..=23`;
//! - a [`PcrValue`] always carries a digest of its bank's width;
//! - every event of an [`EventLogEntry`] carries a measurement of the
//!   entry's bank width, so an entry can never mix banks.
//!
//! ## Replay
//!
//! ```
//! use host_manifest::{Event, EventLogEntry, PcrBank, PcrId, PcrIndex};
//!
//! let pcr = PcrId::new(PcrIndex::try_from(18u32).unwrap(), PcrBank::Sha256);
//! let event = Event::new("0x401", "HASH_START", vec![], vec![0xab; 32]);
//! let entry = EventLogEntry::new(pcr, vec![event]).unwrap();
//!
//! let pcr_value = entry.replay().unwrap();
//! assert_eq!(pcr_value.len(), 32);
//! ```

pub mod error;
pub mod event_log;
pub mod host_info;
pub mod manifest;
pub mod pcr;
pub mod replay;

pub use error::{Error, Result};
pub use event_log::{Event, EventLogEntry, PcrEventLogMap};
pub use host_info::*;
pub use manifest::{HostManifest, PcrManifest};
pub use pcr::{PcrBank, PcrId, PcrIndex, PcrValue, PCR_COUNT};
pub use replay::replay_measurements;
