//! On-disk keystore: one JSON file per address, an `index.json` manifest
//! recording insertion order, and a `state.json` holding the
//! [`KeystoreState`].
//!
//! Every write goes to a temporary file that is then renamed over the
//! target, so a crash never leaves a half-written entry behind.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use launcher_crypto_address::Address;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{KeystoreRepository, KeystoreState};
use crate::cipher::KeystoreEntry;
use crate::error::{Error, Result};

const INDEX_FILE: &str = "index.json";
const STATE_FILE: &str = "state.json";
const ENTRY_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";
const INDEX_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    addresses: Vec<Address>,
}

#[derive(Debug)]
pub struct FileKeystore {
    dir: PathBuf,
    /// Insertion order. The lock also serializes writers against readers.
    order: RwLock<Vec<Address>>,
}

impl FileKeystore {
    /// Open (creating if needed) the keystore directory.
    ///
    /// The manifest is reconciled with the entry files on disk: manifest
    /// addresses without a file are dropped, and files missing from the
    /// manifest are appended in address order.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        create_private_dir(&dir)?;

        let indexed = read_index(&dir.join(INDEX_FILE));
        let mut on_disk = scan_entries(&dir)?;
        on_disk.sort();

        let present: HashSet<Address> = on_disk.iter().copied().collect();
        let mut seen = HashSet::new();
        let mut order: Vec<Address> = indexed
            .iter()
            .copied()
            .filter(|a| present.contains(a) && seen.insert(*a))
            .collect();
        order.extend(on_disk.into_iter().filter(|a| !seen.contains(a)));

        let keystore = Self {
            dir,
            order: RwLock::new(Vec::new()),
        };
        if order != indexed {
            debug!(
                "Reconciled keystore index ({} indexed, {} entries)",
                indexed.len(),
                order.len()
            );
            keystore.write_index(&order)?;
        }
        info!(
            "Opened keystore at {} with {} account(s)",
            keystore.dir.display(),
            order.len()
        );
        *keystore.order.write().unwrap_or_else(|e| e.into_inner()) = order;

        Ok(keystore)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, address: &Address) -> PathBuf {
        self.dir
            .join(format!("{}.{}", address.to_hex(), ENTRY_EXTENSION))
    }

    fn write_index(&self, order: &[Address]) -> Result<()> {
        let index = IndexFile {
            version: INDEX_VERSION,
            addresses: order.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&index).map_err(io::Error::from)?;
        write_atomic(&self.dir.join(INDEX_FILE), &json)?;
        Ok(())
    }
}

impl KeystoreRepository for FileKeystore {
    fn put(&self, entry: KeystoreEntry) -> Result<()> {
        let address = entry.address();
        let json = serde_json::to_vec_pretty(&entry).map_err(io::Error::from)?;

        let mut order = self.order.write().unwrap_or_else(|e| e.into_inner());
        write_atomic(&self.entry_path(&address), &json)?;

        if !order.contains(&address) {
            let mut updated = order.clone();
            updated.push(address);
            self.write_index(&updated)?;
            *order = updated;
            debug!(%address, "Added keystore entry");
        } else {
            debug!(%address, "Replaced keystore entry");
        }
        Ok(())
    }

    fn get(&self, address: &Address) -> Result<KeystoreEntry> {
        let order = self.order.read().unwrap_or_else(|e| e.into_inner());
        if !order.contains(address) {
            return Err(Error::NotFound(*address));
        }

        let data = match fs::read(self.entry_path(address)) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(%address, "Indexed keystore entry is missing on disk");
                return Err(Error::NotFound(*address));
            }
            Err(e) => return Err(e.into()),
        };

        let entry: KeystoreEntry = serde_json::from_slice(&data)
            .map_err(|e| Error::corrupt(*address, format!("unparseable entry: {}", e)))?;
        if &entry.address() != address {
            return Err(Error::corrupt(
                *address,
                format!("entry file names address {}", entry.address()),
            ));
        }
        Ok(entry)
    }

    fn list(&self) -> Result<Vec<Address>> {
        Ok(self.order.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn remove(&self, address: &Address) -> Result<()> {
        let mut order = self.order.write().unwrap_or_else(|e| e.into_inner());

        match fs::remove_file(self.entry_path(address)) {
            Ok(()) => debug!(%address, "Removed keystore entry"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if order.contains(address) {
            let updated: Vec<Address> = order.iter().copied().filter(|a| a != address).collect();
            self.write_index(&updated)?;
            *order = updated;
        }
        Ok(())
    }

    fn load_state(&self) -> Result<KeystoreState> {
        let path = self.dir.join(STATE_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(KeystoreState::default()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<KeystoreState>(&data) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!("Keystore state {} is unreadable ({}), ignoring", path.display(), e);
                Ok(KeystoreState::default())
            }
        }
    }

    fn save_state(&self, state: &KeystoreState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state).map_err(io::Error::from)?;
        write_atomic(&self.dir.join(STATE_FILE), &json)?;
        Ok(())
    }
}

fn read_index(path: &Path) -> Vec<Address> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("Failed to read keystore index {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    match serde_json::from_slice::<IndexFile>(&data) {
        Ok(index) if index.version == INDEX_VERSION => index.addresses,
        Ok(index) => {
            warn!("Unsupported keystore index version {}, rebuilding", index.version);
            Vec::new()
        }
        Err(e) => {
            warn!("Keystore index is unreadable ({}), rebuilding", e);
            Vec::new()
        }
    }
}

fn scan_entries(dir: &Path) -> Result<Vec<Address>> {
    let mut addresses = Vec::new();
    for dirent in fs::read_dir(dir)? {
        let path = dirent?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        // index.json and foreign files do not parse as addresses
        if let Ok(address) = stem.parse::<Address>() {
            addresses.push(address);
        }
    }
    Ok(addresses)
}

fn create_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
            warn!("Could not restrict keystore directory permissions: {}", e);
        }
    }
    Ok(())
}

/// Write `data` to a sibling temp file, flush it, then rename over `path`.
fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".");
    temp.push(TEMP_EXTENSION);
    let temp = PathBuf::from(temp);

    {
        #[cfg(unix)]
        let mut file = {
            use std::os::unix::fs::OpenOptionsExt;
            fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&temp)?
        };

        #[cfg(not(unix))]
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp)?;

        file.write_all(data)?;
        file.sync_all()?;
    }

    fs::rename(&temp, path)
}
