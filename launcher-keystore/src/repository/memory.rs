use std::sync::RwLock;

use launcher_crypto_address::Address;

use super::{KeystoreRepository, KeystoreState};
use crate::cipher::KeystoreEntry;
use crate::error::{Error, Result};

/// Process-local repository, used by tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryKeystore {
    entries: RwLock<Vec<KeystoreEntry>>,
    state: RwLock<KeystoreState>,
}

impl MemoryKeystore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeystoreRepository for MemoryKeystore {
    fn put(&self, entry: KeystoreEntry) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.iter_mut().find(|e| e.address() == entry.address()) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Ok(())
    }

    fn get(&self, address: &Address) -> Result<KeystoreEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .find(|e| &e.address() == address)
            .cloned()
            .ok_or(Error::NotFound(*address))
    }

    fn list(&self) -> Result<Vec<Address>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.iter().map(KeystoreEntry::address).collect())
    }

    fn remove(&self, address: &Address) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|e| &e.address() != address);
        Ok(())
    }

    fn load_state(&self) -> Result<KeystoreState> {
        Ok(self.state.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save_state(&self, state: &KeystoreState) -> Result<()> {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state.clone();
        Ok(())
    }
}
