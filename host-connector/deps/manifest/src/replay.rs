// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Measurement-log replay.
//!
//! A PCR can only be extended: `PCR_new = H(PCR_old || measurement)`. Starting
//! from the reset value and extending every logged measurement in log order
//! must therefore give the value the TPM reports, if and only if the log is
//! complete and untampered.

use log::debug;

use crate::{event_log::EventLogEntry, PcrBank, Result};

/// Replay `measurements` on top of the all-zero value of `bank`.
///
/// Fails if any measurement does not have the width of `bank`.
pub fn replay_measurements<'a, I>(bank: PcrBank, measurements: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let alg = bank.hash_algorithm();
    let mut state = bank.zero_digest();

    for (i, measurement) in measurements.into_iter().enumerate() {
        bank.check_digest(&format!("measurement of event #{i}"), measurement)?;
        state = alg.extend(&state, measurement);
    }

    Ok(state)
}

impl EventLogEntry {
    /// Replay the events of this entry in log order.
    pub fn replay(&self) -> Result<Vec<u8>> {
        let pcr = self.pcr();
        let digest = replay_measurements(
            pcr.bank,
            self.events().iter().map(|e| e.measurement.as_slice()),
        )?;
        debug!(
            "replayed {} events of {pcr}: {}",
            self.events().len(),
            hex::encode(&digest)
        );
        Ok(digest)
    }
}
