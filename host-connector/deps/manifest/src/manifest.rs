// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::{btree_map::Entry, BTreeMap};

use crypto::HashAlgorithm;
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::{
    event_log::PcrEventLogMap, Error, HostInfo, PcrBank, PcrId, PcrIndex, PcrValue, Result,
};

/// PCR values of all reported banks and the event logs that produced them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPcrManifest")]
pub struct PcrManifest {
    pcrs: BTreeMap<PcrBank, Vec<PcrValue>>,

    #[serde(default)]
    event_logs: PcrEventLogMap,
}

#[derive(Deserialize)]
struct RawPcrManifest {
    pcrs: BTreeMap<PcrBank, Vec<PcrValue>>,

    #[serde(default)]
    event_logs: PcrEventLogMap,
}

impl TryFrom<RawPcrManifest> for PcrManifest {
    type Error = Error;

    fn try_from(raw: RawPcrManifest) -> Result<Self> {
        let mut values = Vec::new();
        for (bank, bank_values) in raw.pcrs {
            for value in bank_values {
                if value.bank() != bank {
                    return Err(Error::BankMismatch {
                        pcr: value.id(),
                        bank,
                    });
                }
                values.push(value);
            }
        }

        PcrManifest::new(values, raw.event_logs)
    }
}

impl PcrManifest {
    /// Group `values` per bank, sorted by index. A (index, bank) pair may
    /// only be reported once.
    pub fn new<I>(values: I, event_logs: PcrEventLogMap) -> Result<Self>
    where
        I: IntoIterator<Item = PcrValue>,
    {
        let mut by_id: BTreeMap<PcrId, PcrValue> = BTreeMap::new();
        for value in values {
            match by_id.entry(value.id()) {
                Entry::Occupied(_) => return Err(Error::DuplicatePcrValue(value.id())),
                Entry::Vacant(slot) => {
                    slot.insert(value);
                }
            }
        }

        let mut pcrs: BTreeMap<PcrBank, Vec<PcrValue>> = BTreeMap::new();
        for (id, value) in by_id {
            pcrs.entry(id.bank).or_default().push(value);
        }

        Ok(Self { pcrs, event_logs })
    }

    pub fn pcr_value(&self, pcr: PcrId) -> Option<&PcrValue> {
        self.pcrs
            .get(&pcr.bank)
            .and_then(|values| values.iter().find(|v| v.index() == pcr.index))
    }

    pub fn bank(&self, bank: PcrBank) -> &[PcrValue] {
        self.pcrs.get(&bank).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn banks(&self) -> impl Iterator<Item = PcrBank> + '_ {
        self.pcrs.keys().copied()
    }

    /// All values, bank by bank, index ascending.
    pub fn pcr_values(&self) -> impl Iterator<Item = &PcrValue> {
        self.pcrs.values().flatten()
    }

    pub fn indexes(&self, bank: PcrBank) -> Vec<PcrIndex> {
        self.bank(bank).iter().map(PcrValue::index).collect()
    }

    pub fn event_logs(&self) -> &PcrEventLogMap {
        &self.event_logs
    }

    /// Replay every event log entry and compare the result with the PCR
    /// value reported for the same (index, bank).
    pub fn verify_event_logs(&self) -> Result<()> {
        for entry in self.event_logs.entries() {
            let pcr = entry.pcr();
            let reported = self.pcr_value(pcr).ok_or(Error::MissingPcrValue(pcr))?;
            let replayed = entry.replay()?;
            if replayed != reported.value() {
                return Err(Error::ReplayMismatch {
                    pcr,
                    reported: reported.value_hex(),
                    replayed: hex::encode(replayed),
                });
            }
        }

        Ok(())
    }

    /// Digest of the concatenation of all PCR values in canonical
    /// (bank, index) order.
    pub fn pcrs_digest(&self, alg: HashAlgorithm) -> Vec<u8> {
        digest_pcr_values(alg, self.pcr_values())
    }
}

/// Digest of the concatenation of `values`, in the given order.
pub fn digest_pcr_values<'a, I>(alg: HashAlgorithm, values: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a PcrValue>,
{
    let material: Vec<u8> = values
        .into_iter()
        .flat_map(|v| v.value().iter().copied())
        .collect();
    alg.digest(&material)
}

/// The canonical, vendor-neutral result of one attestation request.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostManifest {
    pub host_info: HostInfo,

    pub pcr_manifest: PcrManifest,

    /// Hex encoded digest over the quoted PCR values.
    pub quote_digest: String,

    #[serde_as(as = "Option<Base64>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aik_certificate: Option<Vec<u8>>,

    #[serde_as(as = "Option<Base64>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_key_certificate: Option<Vec<u8>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_tag_digest: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub measurement_xmls: Vec<String>,
}
