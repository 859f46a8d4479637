//! Typed transaction structures and the binary prefix serializer.
//!
//! The prefix layout is order-sensitive and shared with the network's
//! reference implementation:
//!
//! `version ‖ unlock_time ‖ n_inputs ‖ [tag ‖ body]×n ‖ n_outputs ‖
//!  [amount ‖ 0x02 ‖ key]×n ‖ extra_len ‖ extra_bytes`
//!
//! with every integer a canonical varint. The prefix hash signs every input;
//! the transaction hash covers prefix plus signatures.

use serde::{Deserialize, Serialize};

use crate::codec::{self, ExtraField, Reader, StakingRecord};
use crate::crypto::{keccak256, Hash, Signature};
use crate::WalletError;

/// Variant tag for key inputs and key outputs.
pub const TAG_KEY: u8 = 0x02;

/// Variant tag for the coinbase (base) input.
pub const TAG_BASE: u8 = 0xFF;

/// Current transaction version.
pub const TX_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxInput {
    /// Coinbase input; consumes no value.
    Base { height: u64 },
    /// Spends the output identified by `tx_hash` and `out_index`.
    ///
    /// `output_indexes` is retained for serialization compatibility and
    /// always holds exactly the spent output's index.
    Key {
        amount: u64,
        output_indexes: Vec<u32>,
        tx_hash: Hash,
        out_index: u32,
    },
}

/// Transaction output. The only valid target on this transparent network is
/// a cleartext spend public key (tag 0x02).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxOutput {
    Key { amount: u64, key: [u8; 32] },
}

impl TxOutput {
    pub fn amount(&self) -> u64 {
        match self {
            TxOutput::Key { amount, .. } => *amount,
        }
    }

    pub fn key(&self) -> &[u8; 32] {
        match self {
            TxOutput::Key { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPrefix {
    pub version: u64,
    pub unlock_time: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Raw extra blob; see [`codec::parse_extra`] for its TLV contents.
    pub extra: Vec<u8>,
}

impl TransactionPrefix {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.inputs.len() * 48 + self.outputs.len() * 40);
        codec::write_varint(&mut buf, self.version);
        codec::write_varint(&mut buf, self.unlock_time);

        codec::write_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            match input {
                TxInput::Base { height } => {
                    buf.push(TAG_BASE);
                    codec::write_varint(&mut buf, *height);
                }
                TxInput::Key {
                    amount,
                    output_indexes,
                    tx_hash,
                    out_index,
                } => {
                    buf.push(TAG_KEY);
                    codec::write_varint(&mut buf, *amount);
                    codec::write_varint(&mut buf, output_indexes.len() as u64);
                    for index in output_indexes {
                        codec::write_varint(&mut buf, *index as u64);
                    }
                    buf.extend_from_slice(tx_hash);
                    codec::write_varint(&mut buf, *out_index as u64);
                }
            }
        }

        codec::write_varint(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            let TxOutput::Key { amount, key } = output;
            codec::write_varint(&mut buf, *amount);
            buf.push(TAG_KEY);
            buf.extend_from_slice(key);
        }

        codec::write_varint(&mut buf, self.extra.len() as u64);
        buf.extend_from_slice(&self.extra);
        buf
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self, WalletError> {
        let version = r.read_varint()?;
        let unlock_time = r.read_varint()?;

        let n_inputs = r.read_varint()?;
        let mut inputs = Vec::new();
        for _ in 0..n_inputs {
            let tag = r.read_u8()?;
            let input = match tag {
                TAG_BASE => TxInput::Base {
                    height: r.read_varint()?,
                },
                TAG_KEY => {
                    let amount = r.read_varint()?;
                    let n_indexes = r.read_varint()?;
                    let mut output_indexes = Vec::new();
                    for _ in 0..n_indexes {
                        output_indexes.push(r.read_varint_u32()?);
                    }
                    let tx_hash = r.read_hash()?;
                    let out_index = r.read_varint_u32()?;
                    TxInput::Key {
                        amount,
                        output_indexes,
                        tx_hash,
                        out_index,
                    }
                }
                other => {
                    return Err(WalletError::CodecInvalid(format!(
                        "unknown input tag 0x{:02x}",
                        other
                    )))
                }
            };
            inputs.push(input);
        }

        let n_outputs = r.read_varint()?;
        let mut outputs = Vec::new();
        for _ in 0..n_outputs {
            let amount = r.read_varint()?;
            let tag = r.read_u8()?;
            if tag != TAG_KEY {
                return Err(WalletError::CodecInvalid(format!(
                    "unknown output tag 0x{:02x}",
                    tag
                )));
            }
            let mut key = [0u8; 32];
            key.copy_from_slice(r.read_bytes(32)?);
            outputs.push(TxOutput::Key { amount, key });
        }

        let extra_len = r.read_varint()?;
        let extra_len = usize::try_from(extra_len)
            .map_err(|_| WalletError::CodecInvalid("extra length exceeds usize".to_string()))?;
        let extra = r.read_bytes(extra_len)?.to_vec();

        Ok(TransactionPrefix {
            version,
            unlock_time,
            inputs,
            outputs,
            extra,
        })
    }

    /// Keccak-256 of the exact serialized prefix bytes; the per-input signing
    /// message.
    pub fn hash(&self) -> Hash {
        keccak256(&self.serialize())
    }

    pub fn extra_fields(&self) -> Result<Vec<ExtraField>, WalletError> {
        codec::parse_extra(&self.extra)
    }

    /// The transaction public key from the extra field, if present.
    pub fn tx_pubkey(&self) -> Option<[u8; 32]> {
        self.extra_fields().ok()?.into_iter().find_map(|f| match f {
            ExtraField::TxPubKey(key) => Some(key),
            _ => None,
        })
    }

    /// The staking record from the extra field, if present.
    pub fn staking_record(&self) -> Option<StakingRecord> {
        self.extra_fields().ok()?.into_iter().find_map(|f| match f {
            ExtraField::Staking(record) => Some(record),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub prefix: TransactionPrefix,
    /// One signature per input, in input order.
    pub signatures: Vec<Signature>,
}

impl Transaction {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = self.prefix.serialize();
        for signature in &self.signatures {
            buf.extend_from_slice(&signature.to_bytes());
        }
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        let mut r = Reader::new(bytes);
        let prefix = TransactionPrefix::read(&mut r)?;

        let mut signatures = Vec::with_capacity(prefix.inputs.len());
        for _ in 0..prefix.inputs.len() {
            signatures.push(
                Signature::from_bytes(r.read_bytes(64)?)
                    .map_err(|_| WalletError::CodecInvalid("bad signature block".to_string()))?,
            );
        }
        if !r.is_empty() {
            return Err(WalletError::CodecInvalid(format!(
                "{} trailing bytes after transaction",
                r.remaining()
            )));
        }
        Ok(Transaction { prefix, signatures })
    }

    pub fn from_hex(s: &str) -> Result<Self, WalletError> {
        let bytes = hex::decode(s)
            .map_err(|e| WalletError::CodecInvalid(format!("bad transaction hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Keccak-256 over prefix plus signatures.
    pub fn hash(&self) -> Hash {
        keccak256(&self.serialize())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{build_extra, staking_message};
    use crate::crypto::{sign, verify, KeyPair};
    use rand_core::OsRng;

    fn sample_prefix() -> TransactionPrefix {
        TransactionPrefix {
            version: TX_VERSION,
            unlock_time: 0,
            inputs: vec![TxInput::Key {
                amount: 5_000,
                output_indexes: vec![2],
                tx_hash: [0xAB; 32],
                out_index: 2,
            }],
            outputs: vec![
                TxOutput::Key {
                    amount: 4_000,
                    key: [0x01; 32],
                },
                TxOutput::Key {
                    amount: 900,
                    key: [0x02; 32],
                },
            ],
            extra: build_extra(&[ExtraField::TxPubKey([0xCD; 32])]),
        }
    }

    #[test]
    fn test_prefix_roundtrip() {
        let prefix = sample_prefix();
        let bytes = prefix.serialize();
        let mut r = Reader::new(&bytes);
        let parsed = TransactionPrefix::read(&mut r).unwrap();
        assert!(r.is_empty());
        assert_eq!(parsed, prefix);
    }

    #[test]
    fn test_prefix_hash_stable_under_reserialization() {
        let prefix = sample_prefix();
        let bytes = prefix.serialize();
        let mut r = Reader::new(&bytes);
        let parsed = TransactionPrefix::read(&mut r).unwrap();
        assert_eq!(parsed.hash(), prefix.hash());
        assert_eq!(parsed.serialize(), bytes);
    }

    #[test]
    fn test_coinbase_roundtrip() {
        let prefix = TransactionPrefix {
            version: TX_VERSION,
            unlock_time: 110,
            inputs: vec![TxInput::Base { height: 100 }],
            outputs: vec![TxOutput::Key {
                amount: 1_000_000_000,
                key: [0x33; 32],
            }],
            extra: Vec::new(),
        };
        let tx = Transaction {
            prefix,
            signatures: vec![Signature {
                c: [0u8; 32],
                s: [0u8; 32],
            }],
        };
        assert_eq!(Transaction::from_bytes(&tx.serialize()).unwrap(), tx);
    }

    #[test]
    fn test_transaction_roundtrip_with_real_signature() {
        let keys = KeyPair::generate(&mut OsRng);
        let prefix = sample_prefix();
        let prefix_hash = prefix.hash();
        let signature = sign(&mut OsRng, &prefix_hash, &keys);

        let tx = Transaction {
            prefix,
            signatures: vec![signature],
        };
        let parsed = Transaction::from_bytes(&tx.serialize()).unwrap();
        assert_eq!(parsed, tx);
        assert_eq!(parsed.hash(), tx.hash());
        assert!(verify(
            &parsed.prefix.hash(),
            &keys.public_bytes(),
            &parsed.signatures[0]
        ));
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let tx = Transaction {
            prefix: sample_prefix(),
            signatures: vec![Signature {
                c: [0u8; 32],
                s: [0u8; 32],
            }],
        };
        let mut bytes = tx.serialize();
        bytes.push(0x00);
        assert!(matches!(
            Transaction::from_bytes(&bytes),
            Err(WalletError::CodecInvalid(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_input_tag() {
        let mut bytes = Vec::new();
        codec::write_varint(&mut bytes, TX_VERSION);
        codec::write_varint(&mut bytes, 0);
        codec::write_varint(&mut bytes, 1);
        bytes.push(0x03); // neither base nor key
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            TransactionPrefix::read(&mut r),
            Err(WalletError::CodecInvalid(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_output_tag() {
        let mut bytes = Vec::new();
        codec::write_varint(&mut bytes, TX_VERSION);
        codec::write_varint(&mut bytes, 0);
        codec::write_varint(&mut bytes, 0); // no inputs
        codec::write_varint(&mut bytes, 1); // one output
        codec::write_varint(&mut bytes, 100); // amount
        bytes.push(0x04); // invalid target tag
        bytes.extend_from_slice(&[0u8; 32]);
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            TransactionPrefix::read(&mut r),
            Err(WalletError::CodecInvalid(_))
        ));
    }

    #[test]
    fn test_unknown_extra_tags_survive_roundtrip() {
        let mut prefix = sample_prefix();
        prefix.extra.push(0x55);
        prefix.extra.extend_from_slice(b"opaque");

        let bytes = prefix.serialize();
        let mut r = Reader::new(&bytes);
        let parsed = TransactionPrefix::read(&mut r).unwrap();
        assert_eq!(parsed.extra, prefix.extra);
        assert_eq!(parsed.tx_pubkey(), Some([0xCD; 32]));
    }

    #[test]
    fn test_staking_record_accessor() {
        let keys = KeyPair::generate(&mut OsRng);
        let message = staking_message(5_000_000_000, 30, 200_000);
        let record = StakingRecord {
            amount: 5_000_000_000,
            unlock_time: 200_000,
            lock_days: 30,
            signature: sign(&mut OsRng, &message, &keys),
        };

        let mut prefix = sample_prefix();
        prefix.extra = build_extra(&[
            ExtraField::TxPubKey([0xCD; 32]),
            ExtraField::Staking(record.clone()),
        ]);

        let parsed = prefix.staking_record().unwrap();
        assert_eq!(parsed, record);
        assert!(verify(
            &parsed.signed_message(),
            &keys.public_bytes(),
            &parsed.signature
        ));
    }
}
