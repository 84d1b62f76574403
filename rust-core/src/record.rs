// Signed moderation records and their canonical byte layout.
// Layout (little-endian):
//   version:u8 | fingerprint:[32] | submitter:[32] | submitted_at_ms:u64 | verdict | signature:[64]
//   verdict := kind:u8 | category_len:u16 | category | confidence:f64 | flagged:u8 | has_nested:u8 | [verdict]
// The signature covers every byte before it.

use crate::fingerprint::{sha256, Fingerprint, Hash};
use crate::verdict::{ContentKind, Verdict};
use ed25519_dalek::{Keypair, PublicKey as DalekPublicKey, Signature as DalekSignature, Signer, Verifier};
use serde::{Serialize, Serializer};
use std::convert::TryFrom;

pub type PublicKey = [u8; 32];
pub type Signature = [u8; 64];

const MAX_CATEGORY_LEN: usize = u16::MAX as usize;

#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub version: u8,
    pub fingerprint: Fingerprint,
    pub verdict: Verdict,
    pub submitter: PublicKey,
    pub submitted_at_ms: u64,
    pub signature: Signature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordValidationError {
    InvalidVersion,
    InvalidSubmitter,
    InvalidSignature,
}

impl Record {
    /// Unsigned record; call [`Record::sign`] before submitting.
    pub fn new(
        fingerprint: Fingerprint,
        verdict: Verdict,
        submitter: PublicKey,
        submitted_at_ms: u64,
    ) -> Self {
        Record {
            version: crate::RECORD_VERSION,
            fingerprint,
            verdict,
            submitter,
            submitted_at_ms,
            signature: [0u8; 64],
        }
    }

    pub fn sign(&mut self, keypair: &Keypair) {
        let sig = keypair.sign(&record_bytes(self));
        self.signature = sig.to_bytes();
    }

    /// Version and ed25519 signature check; independent of any backend.
    pub fn validate(&self) -> Result<(), RecordValidationError> {
        if self.version != crate::RECORD_VERSION {
            return Err(RecordValidationError::InvalidVersion);
        }
        let vk = DalekPublicKey::from_bytes(&self.submitter)
            .map_err(|_| RecordValidationError::InvalidSubmitter)?;
        let sig = DalekSignature::try_from(&self.signature[..])
            .map_err(|_| RecordValidationError::InvalidSignature)?;
        vk.verify(&record_bytes(self), &sig)
            .map_err(|_| RecordValidationError::InvalidSignature)
    }

    /// Hash of the stored form.
    pub fn hash(&self) -> Hash {
        sha256(&encode_record(self))
    }
}

/// Signed payload: everything but the signature.
pub fn record_bytes(r: &Record) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 32 + 32 + 8 + 64);
    out.push(r.version);
    out.extend_from_slice(r.fingerprint.as_bytes());
    out.extend_from_slice(&r.submitter);
    out.extend_from_slice(&r.submitted_at_ms.to_le_bytes());
    write_verdict(&mut out, &r.verdict);
    out
}

/// Stored form: signed payload followed by the signature.
pub fn encode_record(r: &Record) -> Vec<u8> {
    let mut out = record_bytes(r);
    out.extend_from_slice(&r.signature);
    out
}

pub fn verdict_bytes(v: &Verdict) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + v.category.len());
    write_verdict(&mut out, v);
    out
}

fn write_verdict(out: &mut Vec<u8>, v: &Verdict) {
    let category = v.category.as_bytes();
    let len = category.len().min(MAX_CATEGORY_LEN);
    out.push(v.content_kind.to_byte());
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&category[..len]);
    out.extend_from_slice(&v.confidence.to_bits().to_le_bytes());
    out.push(v.is_flagged as u8);
    match v.nested() {
        Some(nested) => {
            out.push(1);
            write_verdict(out, nested);
        }
        None => out.push(0),
    }
}

pub fn decode_record(buf: &[u8]) -> Result<Record, String> {
    let mut rd = Reader { buf, offset: 0 };
    let version = rd.u8()?;
    if version != crate::RECORD_VERSION {
        return Err(format!("unsupported record version {}", version));
    }
    let fingerprint = Fingerprint::from_bytes(rd.array::<32>()?);
    let submitter = rd.array::<32>()?;
    let submitted_at_ms = rd.u64()?;
    let verdict = read_verdict(&mut rd, 0)?;
    let signature = rd.array::<64>()?;
    if rd.offset != buf.len() {
        return Err("trailing bytes after record".into());
    }
    Ok(Record {
        version,
        fingerprint,
        verdict,
        submitter,
        submitted_at_ms,
        signature,
    })
}

fn read_verdict(rd: &mut Reader<'_>, depth: u8) -> Result<Verdict, String> {
    let kind = ContentKind::from_byte(rd.u8()?).ok_or("unknown content kind")?;
    let len = u16::from_le_bytes(rd.array::<2>()?) as usize;
    let category = std::str::from_utf8(rd.take(len)?)
        .map_err(|_| "category is not utf-8".to_string())?
        .to_string();
    let confidence = f64::from_bits(rd.u64()?);
    let is_flagged = match rd.u8()? {
        0 => false,
        1 => true,
        _ => return Err("invalid flag byte".into()),
    };
    let nested_verdict = match rd.u8()? {
        0 => None,
        1 if depth == 0 => Some(Box::new(read_verdict(rd, depth + 1)?)),
        1 => return Err("verdict nested more than one level".into()),
        _ => return Err("invalid nesting byte".into()),
    };
    Ok(Verdict {
        content_kind: kind,
        category,
        confidence,
        is_flagged,
        nested_verdict,
    })
}

struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self.offset.checked_add(n).ok_or("length overflow")?;
        if end > self.buf.len() {
            return Err("truncated record".into());
        }
        let out = &self.buf[self.offset..end];
        self.offset = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], String> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> Result<u64, String> {
        Ok(u64::from_le_bytes(self.array::<8>()?))
    }
}

#[derive(Serialize)]
struct RecordView<'a> {
    version: u8,
    fingerprint: &'a Fingerprint,
    verdict: &'a Verdict,
    submitter: String,
    submitted_at_ms: u64,
    signature: String,
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RecordView {
            version: self.version,
            fingerprint: &self.fingerprint,
            verdict: &self.verdict,
            submitter: hex::encode(self.submitter),
            submitted_at_ms: self.submitted_at_ms,
            signature: hex::encode(self.signature),
        }
        .serialize(serializer)
    }
}

/// Deterministic keypair from a 32-byte secret.
pub fn keypair_from_secret(secret: &[u8; 32]) -> Result<Keypair, String> {
    let secret = ed25519_dalek::SecretKey::from_bytes(secret).map_err(|e| format!("{}", e))?;
    let public: DalekPublicKey = (&secret).into();
    Ok(Keypair { secret, public })
}
