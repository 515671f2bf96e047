//! Keystore and session errors.
//!
//! Cryptographic failures are reported only as [`Error::InvalidPassword`];
//! the caller never learns whether the password was wrong or the entry was
//! tampered with.

use std::time::Duration;

use launcher_crypto_address::Address;
use thiserror::Error;

/// Result type used throughout the keystore.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Authentication tag did not verify. Retryable by the user.
    #[error("Invalid password")]
    InvalidPassword,

    #[error("Unknown address: {0}")]
    UnknownAddress(Address),

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Password must not be empty")]
    EmptyPassword,

    /// Password reset attempted without holding the unlocked key.
    #[error("Unauthorized: unlock the account before changing its password")]
    Unauthorized,

    #[error("Keystore entry not found: {0}")]
    NotFound(Address),

    #[error("Invalid private key format")]
    InvalidKeyFormat,

    /// The entry for this address cannot be read. It must be recreated or
    /// recovered from the raw private key.
    #[error("Corrupt keystore entry for {address}: {reason}")]
    CorruptKeystore { address: Address, reason: String },

    #[error("Too many failed attempts, retry in {}s", retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    #[error("Another account operation is in progress")]
    SessionBusy,

    #[error("Invalid key derivation parameters: {0}")]
    InvalidKdfParams(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn corrupt(address: Address, reason: impl Into<String>) -> Self {
        Self::CorruptKeystore {
            address,
            reason: reason.into(),
        }
    }

    /// True for errors raised by local input validation, before any
    /// cryptographic or network work.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::PasswordMismatch | Self::EmptyPassword | Self::UnknownAddress(_)
        )
    }
}

impl From<launcher_crypto_address::Error> for Error {
    fn from(_: launcher_crypto_address::Error) -> Self {
        Self::InvalidKeyFormat
    }
}
