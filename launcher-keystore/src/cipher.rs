//! Password Cipher
//!
//! Encrypts account private keys at rest using:
//! - Argon2id for password-based key derivation
//! - ChaCha20-Poly1305 for authenticated encryption
//!
//! The entry's version and address are bound as associated data, so an
//! entry whose address was edited fails authentication like a wrong
//! password would.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Key, Nonce, Tag,
};
use launcher_crypto_address::Address;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::keys::PrivateKey;

/// Current entry format version
pub const ENTRY_VERSION: u32 = 1;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const DERIVED_KEY_LEN: usize = 32;

/// Argon2 parameters (tuned for security vs. usability)
const ARGON2_MEMORY_KB: u32 = 65536; // 64 MB
const ARGON2_ITERATIONS: u32 = 3;
const ARGON2_PARALLELISM: u32 = 4;

/// Upper bounds accepted when reading an entry from storage.
const MAX_MEMORY_KB: u32 = 4 * 1024 * 1024;
const MAX_ITERATIONS: u32 = 64;
const MAX_PARALLELISM: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KdfAlgorithm {
    Argon2id,
}

/// Key derivation cost parameters, stored with every entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: KdfAlgorithm,
    /// Memory cost in KiB
    pub m_cost: u32,
    /// Iterations
    pub t_cost: u32,
    /// Lanes
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            algorithm: KdfAlgorithm::Argon2id,
            m_cost: ARGON2_MEMORY_KB,
            t_cost: ARGON2_ITERATIONS,
            p_cost: ARGON2_PARALLELISM,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests and development keystores.
    pub fn fast() -> Self {
        Self {
            algorithm: KdfAlgorithm::Argon2id,
            m_cost: 1024,
            t_cost: 1,
            p_cost: 1,
        }
    }

    /// Check the parameters are accepted by Argon2 and within the bounds
    /// this keystore is willing to spend on a single unlock.
    pub fn validate(&self) -> Result<()> {
        if self.m_cost > MAX_MEMORY_KB {
            return Err(Error::InvalidKdfParams(format!(
                "m_cost {} exceeds {} KiB",
                self.m_cost, MAX_MEMORY_KB
            )));
        }
        if self.t_cost > MAX_ITERATIONS {
            return Err(Error::InvalidKdfParams(format!(
                "t_cost {} exceeds {}",
                self.t_cost, MAX_ITERATIONS
            )));
        }
        if self.p_cost > MAX_PARALLELISM {
            return Err(Error::InvalidKdfParams(format!(
                "p_cost {} exceeds {}",
                self.p_cost, MAX_PARALLELISM
            )));
        }
        self.argon2().map(|_| ())
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        let params = Params::new(
            self.m_cost,
            self.t_cost,
            self.p_cost,
            Some(DERIVED_KEY_LEN),
        )
        .map_err(|e| Error::InvalidKdfParams(e.to_string()))?;

        let algorithm = match self.algorithm {
            KdfAlgorithm::Argon2id => Algorithm::Argon2id,
        };
        Ok(Argon2::new(algorithm, Version::V0x13, params))
    }

    fn derive_key(&self, password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; DERIVED_KEY_LEN]>> {
        let mut key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
        self.argon2()?
            .hash_password_into(password.as_bytes(), salt, &mut key[..])
            .map_err(|e| Error::InvalidKdfParams(e.to_string()))?;
        Ok(key)
    }
}

/// The encrypted-at-rest representation of one account's private key.
///
/// Entries are immutable; a password change produces a new entry that
/// replaces the old one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystoreEntry {
    pub(crate) version: u32,
    pub(crate) address: Address,
    #[serde(with = "hex_bytes")]
    pub(crate) salt: Vec<u8>,
    pub(crate) kdf: KdfParams,
    #[serde(with = "hex_bytes")]
    pub(crate) nonce: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub(crate) ciphertext: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub(crate) tag: Vec<u8>,
}

impl KeystoreEntry {
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn kdf_params(&self) -> &KdfParams {
        &self.kdf
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn auth_tag(&self) -> &[u8] {
        &self.tag
    }

    fn associated_data(version: u32, address: &Address) -> Vec<u8> {
        let mut aad = Vec::with_capacity(4 + address.as_bytes().len());
        aad.extend_from_slice(&version.to_le_bytes());
        aad.extend_from_slice(address.as_bytes());
        aad
    }

    /// Structural checks that do not depend on the password.
    fn check_structure(&self) -> Result<()> {
        if self.version != ENTRY_VERSION {
            return Err(Error::corrupt(
                self.address,
                format!(
                    "unsupported entry version {} (expected {})",
                    self.version, ENTRY_VERSION
                ),
            ));
        }
        if self.salt.len() != SALT_LEN {
            return Err(Error::corrupt(self.address, "invalid salt length"));
        }
        if self.nonce.len() != NONCE_LEN {
            return Err(Error::corrupt(self.address, "invalid nonce length"));
        }
        if self.tag.len() != TAG_LEN {
            return Err(Error::corrupt(self.address, "invalid auth tag length"));
        }
        self.kdf
            .validate()
            .map_err(|e| Error::corrupt(self.address, e.to_string()))
    }
}

/// Derives keys from passwords and seals private keys into entries.
#[derive(Debug, Clone)]
pub struct PasswordCipher {
    params: KdfParams,
}

impl Default for PasswordCipher {
    fn default() -> Self {
        Self {
            params: KdfParams::default(),
        }
    }
}

impl PasswordCipher {
    /// Create a cipher that writes new entries with `params`.
    pub fn new(params: KdfParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    /// Encrypt a private key under `password`.
    ///
    /// The entry's address is derived from the key here, at creation time.
    pub fn encrypt(&self, private_key: &PrivateKey, password: &str) -> Result<KeystoreEntry> {
        let address = private_key.address()?;

        let mut salt = vec![0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce = vec![0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let key = self.params.derive_key(password, &salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));

        let aad = KeystoreEntry::associated_data(ENTRY_VERSION, &address);
        let mut ciphertext = private_key.expose_secret().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), &aad, &mut ciphertext)
            .map_err(|_| Error::corrupt(address, "encryption failed"))?;

        debug!(%address, "Encrypted keystore entry");

        Ok(KeystoreEntry {
            version: ENTRY_VERSION,
            address,
            salt,
            kdf: self.params.clone(),
            nonce,
            ciphertext,
            tag: tag.to_vec(),
        })
    }

    /// Decrypt an entry with `password`.
    ///
    /// A tag mismatch is reported as [`Error::InvalidPassword`], whatever
    /// the cause.
    pub fn decrypt(&self, entry: &KeystoreEntry, password: &str) -> Result<PrivateKey> {
        entry.check_structure()?;

        let key = entry
            .kdf
            .derive_key(password, &entry.salt)
            .map_err(|e| Error::corrupt(entry.address, e.to_string()))?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));

        let aad = KeystoreEntry::associated_data(entry.version, &entry.address);
        let mut plaintext = Zeroizing::new(entry.ciphertext.clone());
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&entry.nonce),
                &aad,
                plaintext.as_mut_slice(),
                Tag::from_slice(&entry.tag),
            )
            .map_err(|_| Error::InvalidPassword)?;

        let private_key = PrivateKey::from_bytes(&plaintext)
            .map_err(|_| Error::corrupt(entry.address, "decrypted key has invalid length"))?;

        // Authenticated, so a mismatch can only come from a broken writer
        if private_key.address()? != entry.address {
            return Err(Error::corrupt(
                entry.address,
                "decrypted key does not match entry address",
            ));
        }

        Ok(private_key)
    }
}

mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PASSWORD: &str = "test-password-123";

    fn cipher() -> PasswordCipher {
        PasswordCipher::new(KdfParams::fast()).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = PrivateKey::generate();
        let entry = cipher().encrypt(&key, TEST_PASSWORD).unwrap();
        let decrypted = cipher().decrypt(&entry, TEST_PASSWORD).unwrap();
        assert_eq!(decrypted, key);
        assert_eq!(entry.address(), key.address().unwrap());
    }

    #[test]
    fn test_wrong_password() {
        let key = PrivateKey::generate();
        let entry = cipher().encrypt(&key, TEST_PASSWORD).unwrap();

        for wrong in ["wrong-password", "test-password-12", "test-password-1234"] {
            assert!(matches!(
                cipher().decrypt(&entry, wrong),
                Err(Error::InvalidPassword)
            ));
        }
    }

    #[test]
    fn test_fresh_salt_and_nonce() {
        let key = PrivateKey::generate();
        let a = cipher().encrypt(&key, TEST_PASSWORD).unwrap();
        let b = cipher().encrypt(&key, TEST_PASSWORD).unwrap();
        assert_ne!(a.salt(), b.salt());
        assert_ne!(a.nonce(), b.nonce());
        assert_ne!(a.ciphertext(), b.ciphertext());
    }

    #[test]
    fn test_tampering_is_invalid_password() {
        let key = PrivateKey::generate();
        let entry = cipher().encrypt(&key, TEST_PASSWORD).unwrap();

        let mut flipped_ciphertext = entry.clone();
        flipped_ciphertext.ciphertext[0] ^= 0x01;

        let mut flipped_tag = entry.clone();
        flipped_tag.tag[15] ^= 0x80;

        let mut swapped_address = entry.clone();
        swapped_address.address = PrivateKey::generate().address().unwrap();

        for tampered in [flipped_ciphertext, flipped_tag, swapped_address] {
            assert!(matches!(
                cipher().decrypt(&tampered, TEST_PASSWORD),
                Err(Error::InvalidPassword)
            ));
        }
    }

    #[test]
    fn test_structural_damage_is_corrupt() {
        let key = PrivateKey::generate();
        let entry = cipher().encrypt(&key, TEST_PASSWORD).unwrap();

        let mut short_nonce = entry.clone();
        short_nonce.nonce.truncate(8);

        let mut bad_version = entry.clone();
        bad_version.version = 99;

        let mut huge_cost = entry.clone();
        huge_cost.kdf.m_cost = u32::MAX;

        for damaged in [short_nonce, bad_version, huge_cost] {
            assert!(matches!(
                cipher().decrypt(&damaged, TEST_PASSWORD),
                Err(Error::CorruptKeystore { .. })
            ));
        }
    }

    #[test]
    fn test_entry_records_cost_parameters() {
        let key = PrivateKey::generate();
        let entry = cipher().encrypt(&key, TEST_PASSWORD).unwrap();
        assert_eq!(entry.kdf_params(), &KdfParams::fast());
        assert_eq!(entry.version(), ENTRY_VERSION);
        assert_eq!(entry.auth_tag().len(), TAG_LEN);
    }

    #[test]
    fn test_decrypt_uses_entry_parameters() {
        let key = PrivateKey::generate();
        let entry = cipher().encrypt(&key, TEST_PASSWORD).unwrap();

        let other = PasswordCipher::new(KdfParams {
            m_cost: 2048,
            ..KdfParams::fast()
        })
        .unwrap();
        assert_eq!(other.decrypt(&entry, TEST_PASSWORD).unwrap(), key);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = KdfParams {
            m_cost: 1,
            ..KdfParams::fast()
        };
        assert!(matches!(
            PasswordCipher::new(params),
            Err(Error::InvalidKdfParams(_))
        ));
    }

    #[test]
    fn test_json_format() {
        let key = PrivateKey::generate();
        let entry = cipher().encrypt(&key, TEST_PASSWORD).unwrap();

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kdf"]["algorithm"], "argon2id");
        assert_eq!(json["address"], entry.address().to_string());
        assert_eq!(json["salt"].as_str().unwrap().len(), SALT_LEN * 2);

        let back: KeystoreEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
