// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};

use crate::{PcrBank, PcrId, Result};

/// One measurement extended into a PCR.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub type_id: String,

    pub type_name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde_as(as = "Hex")]
    pub measurement: Vec<u8>,
}

impl Event {
    pub fn new(
        type_id: impl Into<String>,
        type_name: impl Into<String>,
        tags: Vec<String>,
        measurement: Vec<u8>,
    ) -> Self {
        Self {
            type_id: type_id.into(),
            type_name: type_name.into(),
            tags,
            measurement,
        }
    }
}

/// The ordered events extended into one PCR of one bank.
///
/// The order of `events` is the order the platform extended them and is
/// never changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEventLogEntry")]
pub struct EventLogEntry {
    pcr: PcrId,

    #[serde(rename = "tpm_events")]
    events: Vec<Event>,
}

impl EventLogEntry {
    /// Every event must carry a measurement of the bank width of `pcr`.
    pub fn new(pcr: PcrId, events: Vec<Event>) -> Result<Self> {
        for (i, event) in events.iter().enumerate() {
            check_measurement(pcr, i, event)?;
        }

        Ok(Self { pcr, events })
    }

    pub fn pcr(&self) -> PcrId {
        self.pcr
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Append an event at the end of the log.
    pub fn push(&mut self, event: Event) -> Result<()> {
        check_measurement(self.pcr, self.events.len(), &event)?;
        self.events.push(event);
        Ok(())
    }
}

fn check_measurement(pcr: PcrId, position: usize, event: &Event) -> Result<()> {
    pcr.bank.check_digest(
        &format!("measurement of event #{position} ({}) in {pcr}", event.type_name),
        &event.measurement,
    )
}

#[derive(Deserialize)]
struct RawEventLogEntry {
    pcr: PcrId,

    #[serde(rename = "tpm_events", alias = "events", default)]
    events: Vec<Event>,
}

impl TryFrom<RawEventLogEntry> for EventLogEntry {
    type Error = crate::Error;

    fn try_from(raw: RawEventLogEntry) -> Result<Self> {
        EventLogEntry::new(raw.pcr, raw.events)
    }
}

/// Event log entries grouped per bank, each group sorted by PCR index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<PcrBank, Vec<EventLogEntry>>")]
pub struct PcrEventLogMap(BTreeMap<PcrBank, Vec<EventLogEntry>>);

impl TryFrom<BTreeMap<PcrBank, Vec<EventLogEntry>>> for PcrEventLogMap {
    type Error = crate::Error;

    /// An already grouped map: every entry sits under its own bank and no
    /// PCR appears twice.
    fn try_from(grouped: BTreeMap<PcrBank, Vec<EventLogEntry>>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        let mut entries = Vec::new();
        for (bank, bank_entries) in grouped {
            for entry in bank_entries {
                if entry.pcr.bank != bank {
                    return Err(crate::Error::BankMismatch {
                        pcr: entry.pcr,
                        bank,
                    });
                }
                if !seen.insert(entry.pcr) {
                    return Err(crate::Error::DuplicateEventLog(entry.pcr));
                }
                entries.push(entry);
            }
        }

        Self::from_entries(entries)
    }
}

impl PcrEventLogMap {
    /// Group `entries` by (index, bank).
    ///
    /// Entries for the same PCR are merged, their events concatenated in
    /// arrival order.
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = EventLogEntry>,
    {
        let mut merged: BTreeMap<PcrId, EventLogEntry> = BTreeMap::new();
        for entry in entries {
            match merged.get_mut(&entry.pcr) {
                Some(existing) => {
                    for event in entry.events {
                        existing.push(event)?;
                    }
                }
                None => {
                    merged.insert(entry.pcr, entry);
                }
            }
        }

        let mut map: BTreeMap<PcrBank, Vec<EventLogEntry>> = BTreeMap::new();
        for (pcr, entry) in merged {
            map.entry(pcr.bank).or_default().push(entry);
        }

        Ok(Self(map))
    }

    pub fn get(&self, pcr: PcrId) -> Option<&EventLogEntry> {
        self.0
            .get(&pcr.bank)
            .and_then(|entries| entries.iter().find(|e| e.pcr == pcr))
    }

    pub fn bank(&self, bank: PcrBank) -> &[EventLogEntry] {
        self.0.get(&bank).map(Vec::as_slice).unwrap_or_default()
    }

    /// All entries, bank by bank, index ascending.
    pub fn entries(&self) -> impl Iterator<Item = &EventLogEntry> {
        self.0.values().flatten()
    }

    /// Keep only the entries for which `f` returns `true`.
    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(&EventLogEntry) -> bool,
    {
        for entries in self.0.values_mut() {
            entries.retain(&mut f);
        }
        self.0.retain(|_, entries| !entries.is_empty());
    }

    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{Error, PcrIndex};

    use super::*;

    fn pcr(index: u32, bank: PcrBank) -> PcrId {
        PcrId::new(PcrIndex::try_from(index).unwrap(), bank)
    }

    fn event(name: &str, byte: u8, len: usize) -> Event {
        Event::new("0x1", name, vec![name.to_string()], vec![byte; len])
    }

    #[test]
    fn test_entry_rejects_mixed_banks() {
        let err = EventLogEntry::new(
            pcr(0, PcrBank::Sha256),
            vec![event("a", 1, 32), event("b", 2, 20)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::DigestLength {
                bank: PcrBank::Sha256,
                expected: 32,
                actual: 20,
                ..
            }
        ));
    }

    #[test]
    fn test_entry_deserialize() {
        let raw = json!({
            "pcr": {"index": 17, "bank": "SHA256"},
            "tpm_events": [
                {
                    "type_id": "0x402",
                    "type_name": "HASH_START",
                    "tags": ["HASH_START"],
                    "measurement": "039aa5a82c2dc7653370a0f161e71b78e50c0b73f7e1c6bb55ff6552c1fd1458"
                },
                {
                    "type_id": "0x40a",
                    "type_name": "BIOSAC_REG_DATA",
                    "measurement": "18e7c9046695ad1afb31d62ef6659a69126521ebb473a688dc541adc0f618bf6"
                }
            ]
        });
        let entry: EventLogEntry = serde_json::from_value(raw).unwrap();
        assert_eq!(entry.pcr(), pcr(17, PcrBank::Sha256));
        assert_eq!(entry.events()[0].type_name, "HASH_START");
        assert_eq!(entry.events()[1].type_name, "BIOSAC_REG_DATA");
        assert!(entry.events()[1].tags.is_empty());

        let mixed = json!({
            "pcr": {"index": 17, "bank": "SHA256"},
            "tpm_events": [
                {"type_id": "0x1", "type_name": "x", "measurement": "43a3103d25952fc5692cd703bfced4e061a9e525"}
            ]
        });
        assert!(serde_json::from_value::<EventLogEntry>(mixed).is_err());
    }

    #[test]
    fn test_map_groups_and_sorts() {
        let entries = vec![
            EventLogEntry::new(pcr(17, PcrBank::Sha256), vec![event("c", 3, 32)]).unwrap(),
            EventLogEntry::new(pcr(0, PcrBank::Sha1), vec![event("a", 1, 20)]).unwrap(),
            EventLogEntry::new(pcr(0, PcrBank::Sha256), vec![event("b", 2, 32)]).unwrap(),
            EventLogEntry::new(pcr(17, PcrBank::Sha256), vec![event("d", 4, 32)]).unwrap(),
        ];
        let map = PcrEventLogMap::from_entries(entries).unwrap();
        assert_eq!(map.len(), 3);

        let sha256 = map.bank(PcrBank::Sha256);
        assert_eq!(sha256[0].pcr(), pcr(0, PcrBank::Sha256));
        assert_eq!(sha256[1].pcr(), pcr(17, PcrBank::Sha256));

        // merged in arrival order
        let names: Vec<_> = sha256[1].events().iter().map(|e| e.type_name.as_str()).collect();
        assert_eq!(names, vec!["c", "d"]);

        assert_eq!(map.bank(PcrBank::Sha1).len(), 1);
        assert!(map.bank(PcrBank::Sha384).is_empty());
    }

    #[test]
    fn test_map_deserialize() {
        let sha256 = hex::encode([2u8; 32]);
        let raw = json!({
            "SHA256": [
                {"pcr": {"index": 17, "bank": "SHA256"}, "tpm_events": [
                    {"type_id": "0x1", "type_name": "b", "measurement": sha256}
                ]},
                {"pcr": {"index": 0, "bank": "SHA256"}, "tpm_events": []}
            ]
        });
        let map: PcrEventLogMap = serde_json::from_value(raw).unwrap();
        let indexes: Vec<_> = map.entries().map(|e| e.pcr()).collect();
        assert_eq!(
            indexes,
            vec![pcr(0, PcrBank::Sha256), pcr(17, PcrBank::Sha256)]
        );
        assert_eq!(serde_json::to_value(&map).unwrap()["SHA256"][1]["pcr"]["index"], json!(17));
    }

    #[test]
    fn test_map_deserialize_rejects() {
        let entry = json!({"pcr": {"index": 4, "bank": "SHA1"}, "tpm_events": []});

        let err = serde_json::from_value::<PcrEventLogMap>(json!({ "SHA256": [entry] }))
            .unwrap_err();
        assert!(err.to_string().contains("is listed under bank SHA256"));

        let err =
            serde_json::from_value::<PcrEventLogMap>(json!({ "SHA1": [entry, entry] }))
                .unwrap_err();
        assert!(err.to_string().contains("duplicate event log"));
    }

    #[test]
    fn test_map_retain() {
        let entries = vec![
            EventLogEntry::new(pcr(0, PcrBank::Sha1), vec![event("a", 1, 20)]).unwrap(),
            EventLogEntry::new(pcr(1, PcrBank::Sha256), vec![event("b", 2, 32)]).unwrap(),
        ];
        let mut map = PcrEventLogMap::from_entries(entries).unwrap();
        map.retain(|e| e.pcr().bank == PcrBank::Sha256);
        assert_eq!(map.len(), 1);
        assert!(map.get(pcr(0, PcrBank::Sha1)).is_none());
        assert!(map.get(pcr(1, PcrBank::Sha256)).is_some());
    }
}
