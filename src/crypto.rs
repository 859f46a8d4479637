//! Ed25519 group arithmetic and the network's Schnorr signature scheme.
//!
//! Every reduction and hash path here is part of the wire protocol: the
//! challenge construction, the zero-extended hash-to-scalar form and the
//! key image derivation must match the reference implementation bit for bit.

use curve25519_dalek::{
    constants::{ED25519_BASEPOINT_POINT, ED25519_BASEPOINT_TABLE},
    edwards::{CompressedEdwardsY, EdwardsPoint},
    scalar::Scalar,
    traits::VartimeMultiscalarMul,
};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

use crate::WalletError;

/// 32-byte Keccak-256 digest.
pub type Hash = [u8; 32];

pub fn keccak256(data: &[u8]) -> Hash {
    Keccak256::digest(data).into()
}

/// Interprets 32 little-endian bytes and reduces mod the curve order.
pub fn reduce32(bytes: [u8; 32]) -> Scalar {
    Scalar::from_bytes_mod_order(bytes)
}

/// Interprets 64 little-endian bytes and reduces mod the curve order.
pub fn reduce64(bytes: [u8; 64]) -> Scalar {
    Scalar::from_bytes_mod_order_wide(&bytes)
}

/// Draws a uniform scalar from 64 bytes of RNG output.
pub fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    let mut wide = [0u8; 64];
    rng.fill_bytes(&mut wide);
    reduce64(wide)
}

/// `reduce(keccak256(data))` with the digest zero-extended to 64 bytes before
/// reduction, matching the reference hash-to-scalar path.
pub fn hash_to_scalar(data: &[u8]) -> Scalar {
    let digest = keccak256(data);
    let mut wide = [0u8; 64];
    wide[..32].copy_from_slice(&digest);
    reduce64(wide)
}

/// Decodes a compressed point, rejecting non-canonical encodings.
pub fn decode_point(bytes: &[u8; 32]) -> Result<EdwardsPoint, WalletError> {
    let point = CompressedEdwardsY(*bytes)
        .decompress()
        .ok_or_else(|| WalletError::CryptoInvalidEncoding(format!(
            "not a curve point: {}",
            hex::encode(bytes)
        )))?;
    if point.compress().to_bytes() != *bytes {
        return Err(WalletError::CryptoInvalidEncoding(format!(
            "non-canonical point encoding: {}",
            hex::encode(bytes)
        )));
    }
    Ok(point)
}

/// Decodes a scalar, rejecting values at or above the curve order.
pub fn decode_scalar(bytes: &[u8; 32]) -> Result<Scalar, WalletError> {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(*bytes))
        .ok_or_else(|| WalletError::CryptoInvalidEncoding("non-canonical scalar".to_string()))
}

/// Schnorr signature: challenge `c` followed by response `s`, both canonical
/// 32-byte scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub c: [u8; 32],
    pub s: [u8; 32],
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.c);
        out[32..].copy_from_slice(&self.s);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        if bytes.len() != 64 {
            return Err(WalletError::CryptoInvalidEncoding(format!(
                "signature must be 64 bytes, got {}",
                bytes.len()
            )));
        }
        let mut c = [0u8; 32];
        let mut s = [0u8; 32];
        c.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(Signature { c, s })
    }
}

/// A spend keypair. The public key is always `secret * G`.
#[derive(Clone)]
pub struct KeyPair {
    secret: Zeroizing<Scalar>,
    public: EdwardsPoint,
}

impl KeyPair {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_secret(random_scalar(rng))
    }

    pub fn from_secret(secret: Scalar) -> Self {
        let public = &secret * ED25519_BASEPOINT_TABLE;
        KeyPair {
            secret: Zeroizing::new(secret),
            public,
        }
    }

    /// Builds a keypair from raw secret bytes, reducing mod the curve order.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(reduce32(bytes))
    }

    pub fn secret(&self) -> &Scalar {
        &self.secret
    }

    pub fn public(&self) -> &EdwardsPoint {
        &self.public
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.compress().to_bytes()
    }
}

/// The set of spend keypairs a wallet scans and signs for.
///
/// The first key is the primary: change and staking returns go to it.
#[derive(Clone)]
pub struct KeyRing {
    keys: Vec<KeyPair>,
}

impl KeyRing {
    pub fn new(keys: Vec<KeyPair>) -> Result<Self, WalletError> {
        if keys.is_empty() {
            return Err(WalletError::InvalidArgument(
                "key ring must hold at least one keypair".to_string(),
            ));
        }
        Ok(KeyRing { keys })
    }

    pub fn single(key: KeyPair) -> Self {
        KeyRing { keys: vec![key] }
    }

    pub fn primary(&self) -> &KeyPair {
        &self.keys[0]
    }

    pub fn get(&self, public_bytes: &[u8; 32]) -> Option<&KeyPair> {
        self.keys
            .iter()
            .find(|k| k.public_bytes() == *public_bytes)
    }

    pub fn public_keys(&self) -> Vec<[u8; 32]> {
        self.keys.iter().map(|k| k.public_bytes()).collect()
    }
}

/// Signs a 32-byte message with the given keypair.
///
/// `c = H_s(m || P || k*G)`, `s = k - c*x`. The nonce is drawn fresh from the
/// supplied RNG on every call.
pub fn sign<R: RngCore + CryptoRng>(
    rng: &mut R,
    message: &Hash,
    keys: &KeyPair,
) -> Signature {
    let k = random_scalar(rng);
    let r_point = &k * ED25519_BASEPOINT_TABLE;

    let mut buf = Vec::with_capacity(96);
    buf.extend_from_slice(message);
    buf.extend_from_slice(&keys.public_bytes());
    buf.extend_from_slice(&r_point.compress().to_bytes());
    let c = hash_to_scalar(&buf);

    let s = k - c * *keys.secret();

    Signature {
        c: c.to_bytes(),
        s: s.to_bytes(),
    }
}

/// Verifies a signature against a 32-byte message and compressed public key.
///
/// Returns false on any decoding failure or non-canonical scalar.
pub fn verify(message: &Hash, public_key: &[u8; 32], signature: &Signature) -> bool {
    let point = match decode_point(public_key) {
        Ok(p) => p,
        Err(_) => return false,
    };
    let c = match decode_scalar(&signature.c) {
        Ok(c) => c,
        Err(_) => return false,
    };
    let s = match decode_scalar(&signature.s) {
        Ok(s) => s,
        Err(_) => return false,
    };

    // R' = s*G + c*P; the signature is valid iff hashing R' reproduces c.
    let r_point =
        EdwardsPoint::vartime_multiscalar_mul([s, c], [ED25519_BASEPOINT_POINT, point]);

    let mut buf = Vec::with_capacity(96);
    buf.extend_from_slice(message);
    buf.extend_from_slice(public_key);
    buf.extend_from_slice(&r_point.compress().to_bytes());

    hash_to_scalar(&buf) == c
}

/// Derives the key image `I = x * (H_s(P) * G)` for an output key.
///
/// The protocol approximates hash-to-point with a scalar multiplication of
/// the basepoint; this is a wire-compatibility requirement, not a choice.
pub fn generate_key_image(keys: &KeyPair) -> [u8; 32] {
    let h = hash_to_scalar(&keys.public_bytes());
    let image = &(h * *keys.secret()) * ED25519_BASEPOINT_TABLE;
    image.compress().to_bytes()
}
