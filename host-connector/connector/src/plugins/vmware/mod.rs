// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! ESXi hosts, attested through vCenter.

use std::str::FromStr;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use crypto::HashAlgorithm;
use host_manifest::{
    Event, EventLogEntry, HostInfo, HostManifest, PcrBank, PcrEventLogMap, PcrId, PcrIndex,
    PcrManifest, PcrValue,
};
use log::{debug, info, warn};
use ta_client::{Manifest, Measurement};

use crate::{api::HostConnector, plugins::Vendor, Error, Result};

pub mod client;
pub mod report;

use client::VsphereApi;
use report::{
    EventDetail, HostReference, HostTpmAttestationReport, HostTpmEventLogEntry,
    TpmAttestationReport,
};

const GET_HOST_MANIFEST: &str = "get_host_manifest";

/// Width of the digests some ESXi releases report for unextended SHA1
/// events, zero padded.
const LEGACY_ZERO_DIGEST_LEN: usize = 40;

pub const SOFTWARE_COMPONENT_EVENT: &str = "HostTpmSoftwareComponentEvent";
pub const COMMAND_LINE_EVENT: &str = "HostTpmCommandEvent";
pub const BOOT_OPTIONS_EVENT: &str = "HostTpmOptionEvent";
pub const BOOT_SECURITY_OPTION_EVENT: &str = "HostTpmBootSecurityOptionEvent";

/// Type name of events whose kind is not one of the above. They carry no
/// tags, only the measurement the TPM extended.
pub const UNCLASSIFIED_EVENT: &str = "HostTpmEvent";

fn pcr_index(raw: i32) -> anyhow::Result<PcrIndex> {
    let raw = u32::try_from(raw).map_err(|_| anyhow!("negative PCR index {raw}"))?;
    Ok(PcrIndex::try_from(raw)?)
}

/// Canonical `(type id, type name, tags)` of a vendor event, `None` for
/// the event kinds nobody consumes.
fn classify(detail: &EventDetail) -> Option<(&'static str, &'static str, Vec<String>)> {
    match detail {
        EventDetail::SoftwareComponent {
            component_name,
            vib_name,
            vib_vendor,
            ..
        } => Some((
            "vim.HostTpmSoftwareComponentEventDetails",
            SOFTWARE_COMPONENT_EVENT,
            vec![component_name.clone(), format!("{vib_name}_{vib_vendor}")],
        )),
        EventDetail::CommandLine { command_line } => Some((
            "vim.HostTpmCommandEventDetails",
            COMMAND_LINE_EVENT,
            vec![command_line.clone()],
        )),
        EventDetail::BootOptions { options_file_name } => Some((
            "vim.HostTpmOptionEventDetails",
            BOOT_OPTIONS_EVENT,
            vec![options_file_name.clone()],
        )),
        EventDetail::BootSecurityOption {
            boot_security_option,
        } => Some((
            "vim.HostTpmBootSecurityOptionEventDetails",
            BOOT_SECURITY_OPTION_EVENT,
            vec![boot_security_option.clone()],
        )),
        EventDetail::Unknown => None,
    }
}

/// Bank of an event: the declared hash method, otherwise inferred from the
/// digest width. Returns the possibly resized digest with it.
fn event_bank(
    method: Option<&str>,
    mut digest: Vec<u8>,
) -> anyhow::Result<(PcrBank, Vec<u8>)> {
    if let Some(method) = method {
        let bank = PcrBank::from_str(method)?;
        return Ok((bank, digest));
    }

    if digest.len() == LEGACY_ZERO_DIGEST_LEN && digest.iter().all(|b| *b == 0) {
        digest.truncate(PcrBank::Sha1.digest_len());
    }

    let bank = PcrBank::from_digest_len(digest.len())
        .ok_or_else(|| anyhow!("cannot infer the bank of a {} byte digest", digest.len()))?;
    Ok((bank, digest))
}

/// Canonical event of a vendor event record.
///
/// Records of an unknown kind lose their vendor details but keep their
/// measurement: the TPM extended it like any other, so the replay of the
/// PCR needs it.
fn normalize_event(record: &HostTpmEventLogEntry) -> anyhow::Result<EventLogEntry> {
    let details = &record.event_details;
    let (type_id, type_name, tags) = classify(&details.detail).unwrap_or_else(|| {
        debug!(
            "event of unknown kind extended into PCR {}, keeping its measurement only",
            record.pcr_index
        );
        ("vim.HostTpmEventDetails", UNCLASSIFIED_EVENT, vec![])
    });

    let index = pcr_index(record.pcr_index)?;
    let (bank, measurement) =
        event_bank(details.data_hash_method.as_deref(), details.data_hash.clone())
            .with_context(|| format!("{type_name} extended into PCR {index}"))?;

    let event = Event::new(type_id, type_name, tags, measurement);
    Ok(EventLogEntry::new(PcrId::new(index, bank), vec![event])?)
}

fn selected<T: PartialEq>(selection: &[T], item: &T) -> bool {
    selection.is_empty() || selection.contains(item)
}

/// Turn an attestation report into a verified [`PcrManifest`] restricted
/// to `pcr_list` and `pcr_banks`.
///
/// A report ESXi flags as unreliable is rejected before anything else in
/// it is decoded.
pub fn normalize_report(
    report: &TpmAttestationReport,
    pcr_list: &[PcrIndex],
    pcr_banks: &[PcrBank],
) -> Result<PcrManifest> {
    if !report.tpm_log_reliable {
        return Err(Error::Untrusted {
            operation: GET_HOST_MANIFEST,
            reason: "vCenter reports the TPM event log as unreliable".into(),
        });
    }

    let report = report
        .decode()
        .map_err(|e| Error::decode(GET_HOST_MANIFEST, e))?;
    pcr_manifest(&report, pcr_list, pcr_banks)
}

/// Build and verify the [`PcrManifest`] of the decoded content of a
/// reliable report.
pub fn pcr_manifest(
    report: &HostTpmAttestationReport,
    pcr_list: &[PcrIndex],
    pcr_banks: &[PcrBank],
) -> Result<PcrManifest> {
    let mut pcr_values = Vec::new();
    for digest in &report.tpm_pcr_values {
        let value = pcr_index(digest.pcr_number)
            .and_then(|index| {
                let bank = PcrBank::from_str(&digest.digest_method)?;
                Ok(PcrValue::new(index, bank, digest.digest_value.clone())?)
            })
            .with_context(|| format!("PCR value #{}", digest.pcr_number))
            .map_err(|e| Error::validation(GET_HOST_MANIFEST, e))?;

        if selected(pcr_list, &value.index()) && selected(pcr_banks, &value.bank()) {
            pcr_values.push(value);
        }
    }

    let mut entries = Vec::new();
    for record in &report.tpm_events {
        let entry = normalize_event(record).map_err(|e| Error::validation(GET_HOST_MANIFEST, e))?;

        let pcr = entry.pcr();
        if selected(pcr_list, &pcr.index) && selected(pcr_banks, &pcr.bank) {
            entries.push(entry);
        }
    }

    let event_logs = PcrEventLogMap::from_entries(entries)
        .map_err(|e| Error::validation(GET_HOST_MANIFEST, e))?;
    let pcr_manifest = PcrManifest::new(pcr_values, event_logs)
        .map_err(|e| Error::validation(GET_HOST_MANIFEST, e))?;
    pcr_manifest
        .verify_event_logs()
        .map_err(|e| Error::validation(GET_HOST_MANIFEST, e))?;

    Ok(pcr_manifest)
}

pub struct VmwareConnector {
    api: Box<dyn VsphereApi>,
    host_name: String,
}

impl VmwareConnector {
    pub fn new(api: Box<dyn VsphereApi>, host_name: &str) -> Self {
        Self {
            api,
            host_name: host_name.to_string(),
        }
    }

    /// Hosts of the vCenter cluster `cluster_name`.
    pub async fn get_cluster_hosts(&self, cluster_name: &str) -> Result<Vec<HostReference>> {
        self.api.get_cluster_hosts(cluster_name).await
    }

    fn unsupported(operation: &'static str) -> Error {
        Error::Unsupported {
            operation,
            vendor: Vendor::Vmware,
        }
    }
}

#[async_trait]
impl HostConnector for VmwareConnector {
    async fn get_host_details(&self) -> Result<HostInfo> {
        self.api.get_host_info(&self.host_name).await
    }

    async fn get_host_manifest(
        &self,
        _nonce: &str,
        pcr_list: &[PcrIndex],
        pcr_banks: &[PcrBank],
    ) -> Result<HostManifest> {
        let report = self
            .api
            .get_tpm_attestation_report(&self.host_name)
            .await?;
        let pcr_manifest = normalize_report(&report, pcr_list, pcr_banks)?;
        let host_info = self.api.get_host_info(&self.host_name).await?;

        let quote_digest = hex::encode(pcr_manifest.pcrs_digest(HashAlgorithm::Sha256));
        info!(
            "manifest of {} built, {} event log entries verified",
            self.host_name,
            pcr_manifest.event_logs().len()
        );

        Ok(HostManifest {
            host_info,
            pcr_manifest,
            quote_digest,
            aik_certificate: None,
            binding_key_certificate: None,
            asset_tag_digest: None,
            measurement_xmls: vec![],
        })
    }

    async fn deploy_asset_tag(&self, _hardware_uuid: &str, _tag: &str) -> Result<()> {
        warn!("asset tags cannot be deployed through vCenter");
        Err(Self::unsupported("deploy_asset_tag"))
    }

    async fn deploy_software_manifest(&self, _manifest: &Manifest) -> Result<()> {
        Err(Self::unsupported("deploy_software_manifest"))
    }

    async fn get_measurement_from_manifest(&self, _manifest: &Manifest) -> Result<Measurement> {
        Err(Self::unsupported("get_measurement_from_manifest"))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Some("SHA256"), 32, PcrBank::Sha256, 32)]
    #[case(Some("sha-1"), 20, PcrBank::Sha1, 20)]
    #[case(None, 20, PcrBank::Sha1, 20)]
    #[case(None, 48, PcrBank::Sha384, 48)]
    #[case(None, 40, PcrBank::Sha1, 20)]
    fn bank_inference(
        #[case] method: Option<&str>,
        #[case] len: usize,
        #[case] bank: PcrBank,
        #[case] resized: usize,
    ) {
        let (inferred, digest) = event_bank(method, vec![0; len]).unwrap();
        assert_eq!(inferred, bank);
        assert_eq!(digest.len(), resized);
    }

    #[rstest]
    #[case(Some("MD5"), vec![0; 16])]
    #[case(None, vec![1; 40])]
    #[case(None, vec![0; 16])]
    fn bank_inference_failures(#[case] method: Option<&str>, #[case] digest: Vec<u8>) {
        assert!(event_bank(method, digest).is_err());
    }

    #[test]
    fn declared_method_wins() {
        // A declared bank is never overridden by the width, the width check
        // happens when the entry is built.
        let (bank, digest) = event_bank(Some("SHA1"), vec![0; 40]).unwrap();
        assert_eq!(bank, PcrBank::Sha1);
        assert_eq!(digest.len(), 40);
    }

    #[test]
    fn unknown_kind_keeps_its_measurement() {
        let record: HostTpmEventLogEntry = serde_json::from_value(serde_json::json!({
            "pcrIndex": 19,
            "eventDetails": {
                "_typeName": "HostTpmNvTagEventDetails",
                "dataHash": "AwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwM=",
                "dataHashMethod": "SHA256"
            }
        }))
        .unwrap();

        let entry = normalize_event(&record).unwrap();
        assert_eq!(entry.pcr().bank, PcrBank::Sha256);
        let event = &entry.events()[0];
        assert_eq!(event.type_name, UNCLASSIFIED_EVENT);
        assert!(event.tags.is_empty());
        assert_eq!(event.measurement, vec![3; 32]);
    }

    #[rstest]
    #[case(-1)]
    #[case(24)]
    fn pcr_index_range(#[case] raw: i32) {
        assert!(pcr_index(raw).is_err());
    }
}
