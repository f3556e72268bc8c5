// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! The quote blob returned by the trust agent:
//! `TPM2B_ATTEST || TPMT_SIGNATURE || PCR values`, big-endian, the PCR
//! values being raw digests in the order of the quoted selection.

use anyhow::{anyhow, bail, Context, Result};
use crypto::HashAlgorithm;
use host_manifest::{manifest::digest_pcr_values, PcrBank, PcrIndex, PcrValue};

/// TPM_GENERATED_VALUE
const TPM_GENERATED: u32 = 0xff54_4347;

/// TPM_ST_ATTEST_QUOTE
const TPM_ST_ATTEST_QUOTE: u16 = 0x8018;

const TPM_ALG_SHA1: u16 = 0x0004;
const TPM_ALG_SHA256: u16 = 0x000b;
const TPM_ALG_SHA384: u16 = 0x000c;
const TPM_ALG_SHA512: u16 = 0x000d;
const TPM_ALG_NULL: u16 = 0x0010;
const TPM_ALG_RSASSA: u16 = 0x0014;
const TPM_ALG_RSAPSS: u16 = 0x0016;
const TPM_ALG_ECDSA: u16 = 0x0018;

/// clock (u64), resetCount (u32), restartCount (u32), safe (u8)
const CLOCK_INFO_LEN: usize = 17;

fn bank_from_tpm_alg(alg: u16) -> Result<PcrBank> {
    match alg {
        TPM_ALG_SHA1 => Ok(PcrBank::Sha1),
        TPM_ALG_SHA256 => Ok(PcrBank::Sha256),
        TPM_ALG_SHA384 => Ok(PcrBank::Sha384),
        TPM_ALG_SHA512 => Ok(PcrBank::Sha512),
        other => bail!("unsupported PCR bank algorithm {other:#06x}"),
    }
}

fn tpm_alg_from_bank(bank: PcrBank) -> u16 {
    match bank {
        PcrBank::Sha1 => TPM_ALG_SHA1,
        PcrBank::Sha256 => TPM_ALG_SHA256,
        PcrBank::Sha384 => TPM_ALG_SHA384,
        PcrBank::Sha512 => TPM_ALG_SHA512,
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                anyhow!(
                    "quote truncated: {what} needs {len} bytes at offset {}, {} left",
                    self.pos,
                    self.remaining()
                )
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4, what)?);
        Ok(u32::from_be_bytes(raw))
    }

    fn u64(&mut self, what: &str) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8, what)?);
        Ok(u64::from_be_bytes(raw))
    }

    /// A TPM2B: u16 size followed by the buffer.
    fn sized(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = self.u16(what)? as usize;
        self.take(len, what)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// One TPMS_PCR_SELECTION.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PcrSelection {
    pub bank: PcrBank,

    /// Selected PCRs, ascending.
    pub pcrs: Vec<PcrIndex>,
}

impl PcrSelection {
    fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let bank = bank_from_tpm_alg(reader.u16("selection hash")?)?;
        let size = reader.u8("sizeofSelect")? as usize;
        let bitmap = reader.take(size, "pcrSelect")?;

        let mut pcrs = Vec::new();
        for (byte_index, byte) in bitmap.iter().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) == 0 {
                    continue;
                }

                let index = (byte_index * 8 + bit) as u32;
                let index = PcrIndex::try_from(index)
                    .with_context(|| format!("PCR {index} selected in bank {bank}"))?;
                pcrs.push(index);
            }
        }

        Ok(Self { bank, pcrs })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let mut bitmap = [0u8; 3];
        for pcr in &self.pcrs {
            let index = pcr.value() as usize;
            bitmap[index / 8] |= 1 << (index % 8);
        }

        out.extend_from_slice(&tpm_alg_from_bank(self.bank).to_be_bytes());
        out.push(bitmap.len() as u8);
        out.extend_from_slice(&bitmap);
    }
}

/// The signature part of the quote. Not verified here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuoteSignature {
    pub sig_alg: u16,
    pub hash_alg: u16,

    /// The signature, `r || s` for ECDSA.
    pub signature: Vec<u8>,
}

impl QuoteSignature {
    fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let sig_alg = reader.u16("sigAlg")?;
        if sig_alg == TPM_ALG_NULL {
            return Ok(Self {
                sig_alg,
                ..Default::default()
            });
        }

        let hash_alg = reader.u16("signature hash")?;
        let signature = match sig_alg {
            TPM_ALG_RSASSA | TPM_ALG_RSAPSS => reader.sized("signature")?.to_vec(),
            TPM_ALG_ECDSA => {
                let mut signature = reader.sized("signatureR")?.to_vec();
                signature.extend_from_slice(reader.sized("signatureS")?);
                signature
            }
            other => bail!("unsupported signature algorithm {other:#06x}"),
        };

        Ok(Self {
            sig_alg,
            hash_alg,
            signature,
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.sig_alg.to_be_bytes());
        if self.sig_alg == TPM_ALG_NULL {
            return;
        }

        out.extend_from_slice(&self.hash_alg.to_be_bytes());
        if self.sig_alg == TPM_ALG_ECDSA {
            let (r, s) = self.signature.split_at(self.signature.len() / 2);
            for half in [r, s] {
                out.extend_from_slice(&(half.len() as u16).to_be_bytes());
                out.extend_from_slice(half);
            }
        } else {
            out.extend_from_slice(&(self.signature.len() as u16).to_be_bytes());
            out.extend_from_slice(&self.signature);
        }
    }
}

/// A parsed quote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TpmQuote {
    pub qualified_signer: Vec<u8>,

    /// Qualifying data, derived from the nonce by the agent.
    pub extra_data: Vec<u8>,

    pub firmware_version: u64,

    pub selections: Vec<PcrSelection>,

    /// Digest the TPM computed over the selected PCRs.
    pub pcr_digest: Vec<u8>,

    pub signature: QuoteSignature,

    /// PCR values, in selection order.
    pub pcr_values: Vec<PcrValue>,
}

impl TpmQuote {
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(blob);

        let attest = reader.sized("TPM2B_ATTEST")?;
        let mut attest = Reader::new(attest);
        if attest.u32("magic")? != TPM_GENERATED {
            bail!("not a TPM generated structure");
        }

        if attest.u16("type")? != TPM_ST_ATTEST_QUOTE {
            bail!("attested structure is not a quote");
        }

        let qualified_signer = attest.sized("qualifiedSigner")?.to_vec();
        let extra_data = attest.sized("extraData")?.to_vec();
        attest.take(CLOCK_INFO_LEN, "clockInfo")?;
        let firmware_version = attest.u64("firmwareVersion")?;

        let count = attest.u32("pcrSelect count")?;
        let selections = (0..count)
            .map(|_| PcrSelection::parse(&mut attest))
            .collect::<Result<Vec<_>>>()?;
        let pcr_digest = attest.sized("pcrDigest")?.to_vec();

        let signature = QuoteSignature::parse(&mut reader)?;

        let mut pcr_values = Vec::new();
        for selection in &selections {
            for pcr in &selection.pcrs {
                let raw = reader.take(selection.bank.digest_len(), "PCR value")?;
                pcr_values.push(PcrValue::new(*pcr, selection.bank, raw.to_vec())?);
            }
        }

        if reader.remaining() != 0 {
            bail!("{} unexpected bytes after the PCR values", reader.remaining());
        }

        Ok(Self {
            qualified_signer,
            extra_data,
            firmware_version,
            selections,
            pcr_digest,
            signature,
            pcr_values,
        })
    }

    /// The marshalled form accepted by [`TpmQuote::parse`].
    pub fn encode(&self) -> Vec<u8> {
        let mut attest = Vec::new();
        attest.extend_from_slice(&TPM_GENERATED.to_be_bytes());
        attest.extend_from_slice(&TPM_ST_ATTEST_QUOTE.to_be_bytes());
        for sized in [&self.qualified_signer, &self.extra_data] {
            attest.extend_from_slice(&(sized.len() as u16).to_be_bytes());
            attest.extend_from_slice(sized);
        }
        attest.extend_from_slice(&[0u8; CLOCK_INFO_LEN]);
        attest.extend_from_slice(&self.firmware_version.to_be_bytes());
        attest.extend_from_slice(&(self.selections.len() as u32).to_be_bytes());
        for selection in &self.selections {
            selection.encode(&mut attest);
        }
        attest.extend_from_slice(&(self.pcr_digest.len() as u16).to_be_bytes());
        attest.extend_from_slice(&self.pcr_digest);

        let mut blob = (attest.len() as u16).to_be_bytes().to_vec();
        blob.extend_from_slice(&attest);
        self.signature.encode(&mut blob);
        for value in &self.pcr_values {
            blob.extend_from_slice(value.value());
        }

        blob
    }

    /// The quote must qualify the nonce of the request it answers, otherwise
    /// it may be a stale one replayed.
    pub fn verify_nonce(&self, nonce: &[u8]) -> Result<()> {
        if self.extra_data != nonce {
            bail!(
                "quote qualifying data {} is not the request nonce {}",
                hex::encode(&self.extra_data),
                hex::encode(nonce)
            );
        }

        Ok(())
    }

    /// Recompute the digest over the PCR values in selection order and
    /// compare it to the attested one. The hash is chosen by the width of
    /// the attested digest. Returns the digest.
    pub fn verify_pcr_digest(&self) -> Result<Vec<u8>> {
        let alg = HashAlgorithm::from_digest_len(self.pcr_digest.len()).ok_or_else(|| {
            anyhow!(
                "attested PCR digest has an unexpected length of {} bytes",
                self.pcr_digest.len()
            )
        })?;

        let digest = digest_pcr_values(alg, &self.pcr_values);
        if digest != self.pcr_digest {
            bail!(
                "PCR values do not match the attested digest: computed {}, attested {}",
                hex::encode(&digest),
                hex::encode(&self.pcr_digest)
            );
        }

        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcr(index: u32) -> PcrIndex {
        PcrIndex::try_from(index).unwrap()
    }

    fn sample_quote() -> TpmQuote {
        let pcr_values = vec![
            PcrValue::new(pcr(0), PcrBank::Sha256, vec![0x11; 32]).unwrap(),
            PcrValue::new(pcr(18), PcrBank::Sha256, vec![0x22; 32]).unwrap(),
            PcrValue::new(pcr(7), PcrBank::Sha1, vec![0x33; 20]).unwrap(),
        ];
        let pcr_digest = digest_pcr_values(HashAlgorithm::Sha256, &pcr_values);

        TpmQuote {
            qualified_signer: vec![0xaa; 34],
            extra_data: vec![0xde, 0xad, 0xbe, 0xef],
            firmware_version: 0x2000_0000_0001_0000,
            selections: vec![
                PcrSelection {
                    bank: PcrBank::Sha256,
                    pcrs: vec![pcr(0), pcr(18)],
                },
                PcrSelection {
                    bank: PcrBank::Sha1,
                    pcrs: vec![pcr(7)],
                },
            ],
            pcr_digest,
            signature: QuoteSignature {
                sig_alg: TPM_ALG_RSASSA,
                hash_alg: TPM_ALG_SHA256,
                signature: vec![0x5a; 256],
            },
            pcr_values,
        }
    }

    #[test]
    fn parse_quote() {
        let quote = sample_quote();
        let parsed = TpmQuote::parse(&quote.encode()).unwrap();
        assert_eq!(parsed, quote);
        assert_eq!(parsed.verify_pcr_digest().unwrap(), quote.pcr_digest);
    }

    #[test]
    fn nonce_binding() {
        let quote = sample_quote();
        quote.verify_nonce(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert!(quote.verify_nonce(&[0xde, 0xad, 0xbe]).is_err());
        assert!(quote.verify_nonce(&[0xca, 0xfe, 0xba, 0xbe]).is_err());
        assert!(quote.verify_nonce(&[]).is_err());
    }

    #[test]
    fn parse_ecdsa_signature() {
        let mut quote = sample_quote();
        quote.signature = QuoteSignature {
            sig_alg: TPM_ALG_ECDSA,
            hash_alg: TPM_ALG_SHA256,
            signature: [vec![1u8; 32], vec![2u8; 32]].concat(),
        };

        let parsed = TpmQuote::parse(&quote.encode()).unwrap();
        assert_eq!(parsed.signature, quote.signature);
    }

    #[test]
    fn selection_bitmap() {
        // SHA256, 3 bytes: PCR 0, 1, 2, 3, 7 and 17.
        let raw = [0x00, 0x0b, 0x03, 0x8f, 0x00, 0x02];
        let selection = PcrSelection::parse(&mut Reader::new(&raw)).unwrap();
        assert_eq!(selection.bank, PcrBank::Sha256);
        assert_eq!(
            selection.pcrs,
            [0, 1, 2, 3, 7, 17].into_iter().map(pcr).collect::<Vec<_>>()
        );
    }

    #[test]
    fn tampered_pcr_value() {
        let mut quote = sample_quote();
        quote.pcr_values[1] = PcrValue::new(pcr(18), PcrBank::Sha256, vec![0x23; 32]).unwrap();

        let parsed = TpmQuote::parse(&quote.encode()).unwrap();
        assert!(parsed.verify_pcr_digest().is_err());
    }

    #[test]
    fn rejects_malformed_quotes() {
        let blob = sample_quote().encode();

        // Truncated PCR values.
        assert!(TpmQuote::parse(&blob[..blob.len() - 1]).is_err());

        // Trailing bytes.
        let mut trailing = blob.clone();
        trailing.push(0);
        assert!(TpmQuote::parse(&trailing).is_err());

        // Bad magic.
        let mut magic = blob.clone();
        magic[2] = 0;
        assert!(TpmQuote::parse(&magic).is_err());

        // Not a quote.
        let mut kind = blob;
        kind[7] = 0x17;
        assert!(TpmQuote::parse(&kind).is_err());

        assert!(TpmQuote::parse(&[]).is_err());
    }
}
