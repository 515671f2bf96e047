#![deny(unsafe_code)]

//! Account address derivation for launcher keystores.
//!
//! An account is identified by the Ethereum-style address of its secp256k1
//! key: the last 20 bytes of `keccak256(x || y)`, where `x || y` is the
//! uncompressed public key without its `0x04` prefix. The derivation is the
//! stored identifier of every keystore entry, so it must stay bit-for-bit
//! compatible with other wallets deriving the same address.
//!
//! # Examples
//!
//! ```
//! use launcher_crypto_address::{derive, Address};
//!
//! let mut key = [0u8; 32];
//! key[31] = 1;
//!
//! let address = derive(&key).unwrap();
//! assert_eq!(address.to_string(), "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf");
//!
//! let parsed: Address = "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf".parse().unwrap();
//! assert_eq!(parsed, address);
//! ```

use core::{fmt, str::FromStr};

use k256::{elliptic_curve::sec1::ToEncodedPoint, SecretKey};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

/// Length of a raw private key in bytes.
pub const PRIVATE_KEY_LEN: usize = 32;

/// Length of an address in bytes.
pub const ADDRESS_LEN: usize = 20;

/// Errors that can occur while deriving or parsing addresses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Invalid private key: expected a 32-byte secp256k1 scalar")]
    InvalidKeyFormat,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// A 20-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    /// Wrap raw address bytes.
    pub const fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw address bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Lowercase hex without the `0x` prefix. Used where a stable,
    /// case-insensitive name is needed, such as file names.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// EIP-55 checksum encoding, prefixed with `0x`.
    pub fn to_checksum(&self) -> String {
        let hex_addr = self.to_hex();
        let hash = Keccak256::digest(hex_addr.as_bytes());

        let mut result = String::with_capacity(2 + ADDRESS_LEN * 2);
        result.push_str("0x");

        for (i, c) in hex_addr.chars().enumerate() {
            if c.is_ascii_digit() {
                result.push(c);
                continue;
            }
            let hash_byte = hash[i / 2];
            let hash_nibble = if i % 2 == 0 {
                hash_byte >> 4
            } else {
                hash_byte & 0x0f
            };
            if hash_nibble >= 8 {
                result.push(c.to_ascii_uppercase());
            } else {
                result.push(c);
            }
        }

        result
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parses hex with or without the `0x` prefix. Mixed case is accepted
    /// without checksum verification, matching what users paste from other
    /// tools.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.len() != ADDRESS_LEN * 2 {
            return Err(Error::InvalidAddress(format!(
                "expected {} hex digits, got {}",
                ADDRESS_LEN * 2,
                digits.len()
            )));
        }

        let mut bytes = [0u8; ADDRESS_LEN];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| Error::InvalidAddress(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Derive the address of a raw secp256k1 private key.
///
/// The key must be exactly [`PRIVATE_KEY_LEN`] bytes and a valid scalar
/// (non-zero and below the curve order).
pub fn derive(private_key: &[u8]) -> Result<Address, Error> {
    let bytes: &[u8; PRIVATE_KEY_LEN] = private_key
        .try_into()
        .map_err(|_| Error::InvalidKeyFormat)?;
    let secret = SecretKey::from_bytes(bytes.into()).map_err(|_| Error::InvalidKeyFormat)?;

    let point = secret.public_key().to_encoded_point(false);
    // Skip the 0x04 prefix, hash the 64 bytes of x || y
    let hash = Keccak256::digest(&point.as_bytes()[1..]);

    let mut address = [0u8; ADDRESS_LEN];
    address.copy_from_slice(&hash[12..32]);
    Ok(Address(address))
}

/// Derive the address of a hex-encoded private key (optional `0x`).
pub fn derive_hex(private_key_hex: &str) -> Result<Address, Error> {
    let key = decode_private_key_hex(private_key_hex)?;
    derive(key.as_slice())
}

/// Decode a hex private key into a zeroizing buffer.
pub fn decode_private_key_hex(private_key_hex: &str) -> Result<Zeroizing<Vec<u8>>, Error> {
    let trimmed = private_key_hex.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let mut key = Zeroizing::new(vec![0u8; PRIVATE_KEY_LEN]);
    hex::decode_to_slice(digits, key.as_mut_slice()).map_err(|_| Error::InvalidKeyFormat)?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::{OsRng, RngCore};

    fn key_with_last_byte(b: u8) -> [u8; 32] {
        let mut key = [0u8; 32];
        key[31] = b;
        key
    }

    #[test]
    fn test_known_vectors() {
        // Widely published addresses for the private keys 1 and 2
        assert_eq!(
            derive(&key_with_last_byte(1)).unwrap().to_string(),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
        assert_eq!(
            derive(&key_with_last_byte(2)).unwrap().to_string(),
            "0x2B5AD5c4795c026514f8317c7a215E218DcCD6cF"
        );
    }

    #[test]
    fn test_derive_is_deterministic() {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key[0] = 0x01; // stay well below the curve order

        let first = derive(&key).unwrap();
        for _ in 0..10 {
            assert_eq!(derive(&key).unwrap(), first);
        }
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert_eq!(derive(&[1u8; 31]), Err(Error::InvalidKeyFormat));
        assert_eq!(derive(&[1u8; 33]), Err(Error::InvalidKeyFormat));
        assert_eq!(derive(&[]), Err(Error::InvalidKeyFormat));
    }

    #[test]
    fn test_rejects_invalid_scalar() {
        assert_eq!(derive(&[0u8; 32]), Err(Error::InvalidKeyFormat));
        // Curve order n is not a valid scalar
        let n = hex::decode("FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141")
            .unwrap();
        assert_eq!(derive(&n), Err(Error::InvalidKeyFormat));
        assert_eq!(derive(&[0xff; 32]), Err(Error::InvalidKeyFormat));
    }

    #[test]
    fn test_parse_forms() {
        let expected = derive(&key_with_last_byte(1)).unwrap();
        for s in [
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf",
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf",
            "7e5f4552091a69125d5dfcb7b8c2659029395bdf",
            "  0X7E5F4552091A69125D5DFCB7B8C2659029395BDF ",
        ] {
            assert_eq!(s.parse::<Address>().unwrap(), expected, "{s}");
        }

        assert!("0x1234".parse::<Address>().is_err());
        assert!("0xzz5f4552091a69125d5dfcb7b8c2659029395bdf"
            .parse::<Address>()
            .is_err());
    }

    #[test]
    fn test_derive_hex() {
        let hex_key = format!("0x{}", "00".repeat(31) + "01");
        assert_eq!(
            derive_hex(&hex_key).unwrap(),
            derive(&key_with_last_byte(1)).unwrap()
        );
        assert_eq!(derive_hex("abcd"), Err(Error::InvalidKeyFormat));
    }

    #[test]
    fn test_serde_uses_checksum_string() {
        let address = derive(&key_with_last_byte(1)).unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf\"");

        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }
}
