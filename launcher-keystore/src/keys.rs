//! Private key material
//!
//! Decrypted keys live in [`PrivateKey`], which overwrites its buffer with
//! zeros when dropped and locks the buffer's pages with mlock()/VirtualLock()
//! while it is alive.

use std::fmt;

use launcher_crypto_address::{decode_private_key_hex, derive, Address, PRIVATE_KEY_LEN};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::secmem::{lock_bytes, LockedRegion};

/// A raw secp256k1 private key held in memory.
pub struct PrivateKey {
    /// Memory lock for the key bytes. Fields are dropped in declaration
    /// order, so the lock is released while the buffer is still valid.
    _lock: LockedRegion,

    /// Heap buffer of exactly [`PRIVATE_KEY_LEN`] bytes. The allocation does
    /// not move when the struct moves, which keeps the lock valid.
    bytes: Zeroizing<Vec<u8>>,
}

impl PrivateKey {
    /// Copy key bytes into a new locked, zeroizing buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PRIVATE_KEY_LEN {
            return Err(Error::InvalidKeyFormat);
        }
        let mut buffer = Zeroizing::new(Vec::with_capacity(PRIVATE_KEY_LEN));
        buffer.extend_from_slice(bytes);
        Ok(Self::from_buffer(buffer))
    }

    /// Parse a hex-encoded key, with or without `0x`.
    pub fn from_hex(private_key_hex: &str) -> Result<Self> {
        let buffer = decode_private_key_hex(private_key_hex)?;
        Ok(Self::from_buffer(buffer))
    }

    /// Generate a fresh key from the OS random number generator.
    pub fn generate() -> Self {
        let mut buffer = Zeroizing::new(vec![0u8; PRIVATE_KEY_LEN]);
        // Rejection sampling: a random 32-byte string is a valid scalar with
        // overwhelming probability.
        loop {
            OsRng.fill_bytes(buffer.as_mut_slice());
            if derive(buffer.as_slice()).is_ok() {
                return Self::from_buffer(buffer);
            }
        }
    }

    fn from_buffer(bytes: Zeroizing<Vec<u8>>) -> Self {
        // SAFETY: the buffer is owned by Self and outlives the lock
        let lock = unsafe { lock_bytes(bytes.as_slice()) };
        Self { _lock: lock, bytes }
    }

    /// Borrow the raw key bytes.
    pub fn expose_secret(&self) -> &[u8] {
        &self.bytes
    }

    /// Hex encoding of the key, zeroized when dropped.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.bytes.as_slice()))
    }

    /// The account address of this key.
    pub fn address(&self) -> Result<Address> {
        Ok(derive(&self.bytes)?)
    }

    /// Returns true if the key memory is protected from swapping.
    pub fn is_memory_locked(&self) -> bool {
        self._lock.is_locked()
    }
}

impl Clone for PrivateKey {
    fn clone(&self) -> Self {
        Self::from_buffer(self.bytes.clone())
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.as_slice() == other.bytes.as_slice()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}
