//! Keystore Repository
//!
//! Persists encrypted entries keyed by address. Implementations must make
//! `put` and `remove` atomic with respect to concurrent `get` and `list`:
//! readers see either the old entry or the new one, never a partial write.

mod file;
mod memory;

pub use file::FileKeystore;
pub use memory::MemoryKeystore;

use launcher_crypto_address::Address;
use serde::{Deserialize, Serialize};

use crate::cipher::KeystoreEntry;
use crate::error::Result;
use crate::throttle::AttemptRecord;

/// Non-secret session state kept beside the entries so it outlives the
/// process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystoreState {
    /// Account most recently unlocked, preselected on the next start
    #[serde(default)]
    pub last_address: Option<Address>,
    /// Failed unlock history
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
}

pub trait KeystoreRepository: Send + Sync {
    /// Insert or replace the entry for `entry.address()`. A replaced entry
    /// keeps its position in [`KeystoreRepository::list`].
    fn put(&self, entry: KeystoreEntry) -> Result<()>;

    /// Fetch the entry for `address`, or [`crate::Error::NotFound`].
    fn get(&self, address: &Address) -> Result<KeystoreEntry>;

    /// All addresses, in insertion order.
    fn list(&self) -> Result<Vec<Address>>;

    /// Delete the entry for `address`. Removing an absent address is a
    /// no-op.
    fn remove(&self, address: &Address) -> Result<()>;

    /// Saved [`KeystoreState`]. Absent or unreadable state is the default.
    fn load_state(&self) -> Result<KeystoreState>;

    fn save_state(&self, state: &KeystoreState) -> Result<()>;

    fn contains(&self, address: &Address) -> Result<bool> {
        Ok(self.list()?.contains(address))
    }
}
