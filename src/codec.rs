//! Binary wire codec: canonical varints, a bounds-checked reader, and the
//! transaction extra field's TLV records.
//!
//! Every integer in transaction serialization is a base-128 little-endian
//! varint with a 0x80 continuation bit. Only the shortest encoding of a value
//! is accepted; hashes, keys and signatures are raw fixed-width bytes.

use serde::{Deserialize, Serialize};

use crate::crypto::{keccak256, Hash, Signature};
use crate::WalletError;

/// Extra-field tag carrying the transaction's one-time public key.
pub const TAG_TX_PUBKEY: u8 = 0x01;

/// Extra-field tag carrying a signed staking record.
pub const TAG_STAKING: u8 = 0x04;

/// Discriminator value inside a staking record.
pub const STAKING_RECORD_TYPE: u64 = 101;

/// Longest accepted varint encoding: 10 groups of 7 bits covers a u64.
const MAX_VARINT_BYTES: u32 = 10;

/// Appends the canonical (shortest) varint encoding of `value`.
pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Convenience wrapper returning the encoding of a single value.
pub fn encode_varint(value: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    write_varint(&mut buf, value);
    buf
}

/// Cursor over a byte slice with explicit truncation errors.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8, WalletError> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| WalletError::CodecInvalid("unexpected end of buffer".to_string()))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WalletError> {
        if self.remaining() < len {
            return Err(WalletError::CodecInvalid(format!(
                "need {} bytes, {} remain",
                len,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_hash(&mut self) -> Result<Hash, WalletError> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.read_bytes(32)?);
        Ok(out)
    }

    /// Consumes and returns everything left in the buffer.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    /// Reads a canonical varint. Rejects oversized, overflowing and
    /// non-minimal encodings.
    pub fn read_varint(&mut self) -> Result<u64, WalletError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            if shift >= MAX_VARINT_BYTES * 7 {
                return Err(WalletError::CodecInvalid("varint exceeds 10 bytes".to_string()));
            }
            let byte = self.read_u8()?;
            let group = (byte & 0x7F) as u64;
            if shift == 63 && group > 1 {
                return Err(WalletError::CodecInvalid("varint overflows u64".to_string()));
            }
            value |= group << shift;
            if byte & 0x80 == 0 {
                if group == 0 && shift != 0 {
                    // A trailing zero group means a shorter encoding exists.
                    return Err(WalletError::CodecInvalid(
                        "non-canonical varint encoding".to_string(),
                    ));
                }
                return Ok(value);
            }
            shift += 7;
        }
    }

    pub fn read_varint_u32(&mut self) -> Result<u32, WalletError> {
        let value = self.read_varint()?;
        u32::try_from(value)
            .map_err(|_| WalletError::CodecInvalid(format!("value {} exceeds u32", value)))
    }
}

/// A signed staking commitment carried under [`TAG_STAKING`] in the extra
/// field.
///
/// The wire encoding is all varints plus the raw 64-byte signature, but the
/// signed message hashes the same integers fixed-width little-endian.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingRecord {
    pub amount: u64,
    pub unlock_time: u64,
    pub lock_days: u32,
    pub signature: Signature,
}

impl StakingRecord {
    pub fn write(&self, buf: &mut Vec<u8>) {
        write_varint(buf, STAKING_RECORD_TYPE);
        write_varint(buf, self.amount);
        write_varint(buf, self.unlock_time);
        write_varint(buf, self.lock_days as u64);
        buf.extend_from_slice(&self.signature.to_bytes());
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self, WalletError> {
        let record_type = r.read_varint()?;
        if record_type != STAKING_RECORD_TYPE {
            return Err(WalletError::CodecInvalid(format!(
                "unsupported staking record type {}",
                record_type
            )));
        }
        let amount = r.read_varint()?;
        let unlock_time = r.read_varint()?;
        let lock_days = r.read_varint_u32()?;
        let signature = Signature::from_bytes(r.read_bytes(64)?)
            .map_err(|_| WalletError::CodecInvalid("truncated staking signature".to_string()))?;
        Ok(StakingRecord {
            amount,
            unlock_time,
            lock_days,
            signature,
        })
    }

    /// The 32-byte message the inner signature commits to.
    pub fn signed_message(&self) -> Hash {
        staking_message(self.amount, self.lock_days, self.unlock_time)
    }
}

/// `keccak256(amount_u64_le || lock_days_u32_le || unlock_time_u64_le)`.
///
/// Fixed-width little-endian, unlike the varint wire form of the same values.
pub fn staking_message(amount: u64, lock_days: u32, unlock_time: u64) -> Hash {
    let mut buf = [0u8; 20];
    buf[..8].copy_from_slice(&amount.to_le_bytes());
    buf[8..12].copy_from_slice(&lock_days.to_le_bytes());
    buf[12..].copy_from_slice(&unlock_time.to_le_bytes());
    keccak256(&buf)
}

/// One record of the extra field's TLV sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    TxPubKey([u8; 32]),
    Staking(StakingRecord),
    /// First unrecognized tag and everything after it, kept verbatim so
    /// re-serialization is byte-identical.
    Unknown { tag: u8, bytes: Vec<u8> },
}

/// Parses an extra blob into its TLV records.
///
/// An unrecognized tag cannot be skipped (its length is unknown), so it and
/// the remainder of the blob are preserved as a single [`ExtraField::Unknown`].
pub fn parse_extra(extra: &[u8]) -> Result<Vec<ExtraField>, WalletError> {
    let mut r = Reader::new(extra);
    let mut fields = Vec::new();
    while !r.is_empty() {
        let tag = r.read_u8()?;
        match tag {
            TAG_TX_PUBKEY => {
                let mut key = [0u8; 32];
                key.copy_from_slice(r.read_bytes(32)?);
                fields.push(ExtraField::TxPubKey(key));
            }
            TAG_STAKING => fields.push(ExtraField::Staking(StakingRecord::read(&mut r)?)),
            _ => {
                fields.push(ExtraField::Unknown {
                    tag,
                    bytes: r.take_rest().to_vec(),
                });
            }
        }
    }
    Ok(fields)
}

/// Serializes TLV records back into an extra blob.
pub fn build_extra(fields: &[ExtraField]) -> Vec<u8> {
    let mut buf = Vec::new();
    for field in fields {
        match field {
            ExtraField::TxPubKey(key) => {
                buf.push(TAG_TX_PUBKEY);
                buf.extend_from_slice(key);
            }
            ExtraField::Staking(record) => {
                buf.push(TAG_STAKING);
                record.write(&mut buf);
            }
            ExtraField::Unknown { tag, bytes } => {
                buf.push(*tag);
                buf.extend_from_slice(bytes);
            }
        }
    }
    buf
}
