// SPDX-License-Identifier: MIT OR Apache-2.0

//! secp256k1 identities and 32-byte symmetric keys used to address and authenticate filters.
use std::fmt;
use std::str::FromStr;

use k256::elliptic_curve::sec1::ToEncodedPoint;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use sha2::Sha256;
use thiserror::Error;

use crate::serde::impl_hex_serde;

/// Size of an uncompressed SEC1 encoded secp256k1 public key.
pub const PUBLIC_KEY_LEN: usize = 65;

/// Size of a secp256k1 private key.
pub const PRIVATE_KEY_LEN: usize = 32;

/// Size of symmetric keys.
pub const SYMMETRIC_KEY_LEN: usize = 32;

/// Number of PBKDF2 rounds when deriving a symmetric key from a password.
///
/// Peers derive the same key for the same password, changing this value breaks compatibility.
pub const KEY_DERIVATION_ITERATIONS: u32 = 65356;

/// secp256k1 public key, kept in its uncompressed 65-byte form.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// Parses a SEC1 encoded public key, compressed (33 bytes) or uncompressed (65 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let key = k256::PublicKey::from_sec1_bytes(bytes)
            .map_err(|_| IdentityError::InvalidPublicKey(bytes.len()))?;
        Ok(Self::from_k256(&key))
    }

    fn from_k256(key: &k256::PublicKey) -> Self {
        let point = key.to_encoded_point(false);
        let mut bytes = [0; PUBLIC_KEY_LEN];
        bytes.copy_from_slice(point.as_bytes());
        Self(bytes)
    }

    /// Uncompressed SEC1 bytes (`0x04 || X || Y`).
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Big-endian X coordinate of the curve point.
    pub fn x_coordinate(&self) -> &[u8] {
        &self.0[1..33]
    }

    /// Hex encoding of the uncompressed key without `0x` prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = IdentityError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(value)
    }
}

impl FromStr for PublicKey {
    type Err = IdentityError;

    /// Parses a hex encoded public key, with or without `0x` prefix.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.strip_prefix("0x").unwrap_or(value);
        Self::from_bytes(&hex::decode(value)?)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.to_hex()).finish()
    }
}

impl_hex_serde!(PublicKey);

/// secp256k1 private key of the local identity.
#[derive(Clone)]
pub struct PrivateKey(k256::SecretKey);

impl PrivateKey {
    /// Generates a new random private key.
    pub fn new() -> Self {
        Self(k256::SecretKey::random(&mut OsRng))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let key = k256::SecretKey::from_slice(bytes)
            .map_err(|_| IdentityError::InvalidPrivateKey(bytes.len()))?;
        Ok(Self(key))
    }

    pub fn to_bytes(&self) -> [u8; PRIVATE_KEY_LEN] {
        let mut bytes = [0; PRIVATE_KEY_LEN];
        bytes.copy_from_slice(&self.0.to_bytes());
        bytes
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_k256(&self.0.public_key())
    }
}

impl Default for PrivateKey {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for PrivateKey {}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrivateKey")
            .field(&self.public_key().to_hex())
            .finish()
    }
}

/// 32-byte symmetric key, either derived from a password or negotiated out-of-band.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_LEN]);

impl SymmetricKey {
    pub const fn from_bytes(bytes: [u8; SYMMETRIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Derives a key with PBKDF2-HMAC-SHA256 over an empty salt.
    ///
    /// Everybody deriving from the same password ends up with the same key, which is how public
    /// chat members agree on a key without exchanging it.
    pub fn from_password(password: &str) -> Self {
        let mut key = [0; SYMMETRIC_KEY_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), b"", KEY_DERIVATION_ITERATIONS, &mut key);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_LEN] {
        &self.0
    }
}

impl TryFrom<&[u8]> for SymmetricKey {
    type Error = IdentityError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let value_len = value.len();
        let checked_value: [u8; SYMMETRIC_KEY_LEN] = value
            .try_into()
            .map_err(|_| IdentityError::InvalidSymmetricKey(value_len, SYMMETRIC_KEY_LEN))?;
        Ok(Self(checked_value))
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        f.write_str("SymmetricKey(..)")
    }
}

impl_hex_serde!(SymmetricKey);

#[derive(Error, Debug)]
pub enum IdentityError {
    /// Bytes do not encode a valid point on the secp256k1 curve.
    #[error("invalid public key of {0} bytes")]
    InvalidPublicKey(usize),

    /// Bytes do not encode a valid secp256k1 scalar.
    #[error("invalid private key of {0} bytes")]
    InvalidPrivateKey(usize),

    #[error("invalid symmetric key length {0} bytes, expected {1} bytes")]
    InvalidSymmetricKey(usize, usize),

    #[error("invalid hex encoding in key string")]
    InvalidHexEncoding(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::{IdentityError, PrivateKey, PublicKey, SymmetricKey};

    #[test]
    fn public_key_encodings() {
        let private_key = PrivateKey::from_bytes(&[7; 32]).unwrap();
        let public_key = private_key.public_key();
        assert_eq!(public_key.as_bytes()[0], 0x04);

        let parsed: PublicKey = public_key.to_hex().parse().unwrap();
        assert_eq!(parsed, public_key);

        let prefixed: PublicKey = format!("0x{}", public_key.to_hex()).parse().unwrap();
        assert_eq!(prefixed, public_key);

        // Compressed form resolves to the same key.
        let mut compressed = vec![0x02 | (public_key.as_bytes()[64] & 1)];
        compressed.extend_from_slice(public_key.x_coordinate());
        assert_eq!(PublicKey::from_bytes(&compressed).unwrap(), public_key);
    }

    #[test]
    fn invalid_keys() {
        assert_matches!(
            PublicKey::from_bytes(&[4; 65]),
            Err(IdentityError::InvalidPublicKey(65))
        );
        assert_matches!(
            PrivateKey::from_bytes(&[0; 32]),
            Err(IdentityError::InvalidPrivateKey(32))
        );
        assert_matches!(
            "0xzz".parse::<PublicKey>(),
            Err(IdentityError::InvalidHexEncoding(_))
        );
    }

    #[test]
    fn password_derivation_is_deterministic() {
        let key_1 = SymmetricKey::from_password("status");
        let key_2 = SymmetricKey::from_password("status");
        let key_3 = SymmetricKey::from_password("other");
        assert_eq!(key_1, key_2);
        assert_ne!(key_1, key_3);
    }

    #[test]
    fn password_derivation_matches_known_key() {
        assert_eq!(
            hex::encode(SymmetricKey::from_password("status").as_bytes()),
            "36224048e42c49e5c59c57bba5024fbb8822d6b4ee6ac5fbefd8b77f5323ecc4"
        );
    }
}
