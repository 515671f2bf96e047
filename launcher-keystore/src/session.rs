//! In-memory account session.
//!
//! The session is owned by [`crate::SessionController`] and never written
//! to disk. `private_key` is present exactly when the session is logged in;
//! clearing it drops the [`PrivateKey`], which zeroizes the buffer.

use launcher_crypto_address::Address;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::keys::PrivateKey;

/// Controller state as seen by views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Locked,
    /// A decrypt is in flight
    Unlocking,
    Unlocked,
    /// A new key is being generated and stored
    Creating,
}

/// Secret-free view of the session published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub addresses: Vec<Address>,
    pub selected_address: Option<Address>,
    pub logged_in: bool,
    /// Address whose key is currently unlocked
    pub active_address: Option<Address>,
}

struct ActiveKey {
    address: Address,
    key: PrivateKey,
}

#[derive(Default)]
pub struct AccountSession {
    addresses: Vec<Address>,
    selected: Option<Address>,
    active: Option<ActiveKey>,
}

impl AccountSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn selected_address(&self) -> Option<Address> {
        self.selected
    }

    pub fn is_logged_in(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_address(&self) -> Option<Address> {
        self.active.as_ref().map(|a| a.address)
    }

    pub fn private_key(&self) -> Option<&PrivateKey> {
        self.active.as_ref().map(|a| &a.key)
    }

    /// Replace the known addresses, dropping duplicates but keeping order.
    /// A selection that is no longer known is cleared.
    pub fn set_addresses(&mut self, addresses: impl IntoIterator<Item = Address>) {
        self.addresses.clear();
        for address in addresses {
            self.add_address(address);
        }
        if matches!(self.selected, Some(s) if !self.contains(&s)) {
            self.selected = None;
        }
    }

    /// Append an address if it is not already known.
    pub fn add_address(&mut self, address: Address) -> bool {
        if self.contains(&address) {
            return false;
        }
        self.addresses.push(address);
        true
    }

    /// Forget an address. Returns true if this logged the session out.
    pub fn remove_address(&mut self, address: &Address) -> bool {
        self.addresses.retain(|a| a != address);
        if self.selected.as_ref() == Some(address) {
            self.selected = None;
        }
        if self.active_address().as_ref() == Some(address) {
            self.log_out();
            return true;
        }
        false
    }

    /// Select a known address. Does not touch the unlocked key.
    pub fn select(&mut self, address: Address) -> Result<()> {
        if !self.contains(&address) {
            return Err(Error::UnknownAddress(address));
        }
        self.selected = Some(address);
        Ok(())
    }

    /// When nothing is selected, select `preferred` if it is known, else the
    /// first address. Returns the address selected by this call, if any.
    pub fn ensure_default_selection(&mut self, preferred: Option<Address>) -> Option<Address> {
        if self.selected.is_some() {
            return None;
        }
        let choice = preferred
            .filter(|p| self.contains(p))
            .or_else(|| self.addresses.first().copied())?;
        self.selected = Some(choice);
        Some(choice)
    }

    /// Install an unlocked key. Any previous key is dropped and zeroized.
    pub fn log_in(&mut self, address: Address, key: PrivateKey) {
        self.add_address(address);
        self.selected = Some(address);
        self.active = Some(ActiveKey { address, key });
    }

    /// Drop the unlocked key. Returns false if there was none.
    pub fn log_out(&mut self) -> bool {
        self.active.take().is_some()
    }

    pub fn snapshot(&self, state: SessionState) -> SessionSnapshot {
        SessionSnapshot {
            state,
            addresses: self.addresses.clone(),
            selected_address: self.selected,
            logged_in: self.is_logged_in(),
            active_address: self.active_address(),
        }
    }
}

impl std::fmt::Debug for AccountSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSession")
            .field("addresses", &self.addresses)
            .field("selected", &self.selected)
            .field("active_address", &self.active_address())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    #[test]
    fn test_addresses_deduplicated_in_order() {
        let mut session = AccountSession::new();
        session.set_addresses([address(3), address(1), address(3), address(2)]);
        assert_eq!(session.addresses(), &[address(3), address(1), address(2)]);
        assert!(!session.add_address(address(1)));
        assert!(session.add_address(address(4)));
    }

    #[test]
    fn test_select_guard() {
        let mut session = AccountSession::new();
        session.set_addresses([address(1), address(2)]);

        assert!(matches!(
            session.select(address(9)),
            Err(Error::UnknownAddress(a)) if a == address(9)
        ));
        assert_eq!(session.selected_address(), None);

        session.select(address(2)).unwrap();
        session.select(address(2)).unwrap();
        assert_eq!(session.selected_address(), Some(address(2)));
    }

    #[test]
    fn test_default_selection_is_idempotent() {
        let mut session = AccountSession::new();
        assert_eq!(session.ensure_default_selection(None), None);

        session.set_addresses([address(5), address(6)]);
        assert_eq!(session.ensure_default_selection(None), Some(address(5)));
        assert_eq!(session.ensure_default_selection(Some(address(6))), None);
        assert_eq!(session.selected_address(), Some(address(5)));
    }

    #[test]
    fn test_default_selection_prefers_known_address() {
        let mut session = AccountSession::new();
        session.set_addresses([address(5), address(6)]);
        assert_eq!(session.ensure_default_selection(Some(address(9))), Some(address(5)));

        session.set_addresses([address(6), address(7)]);
        assert_eq!(session.ensure_default_selection(Some(address(7))), Some(address(7)));
    }

    #[test]
    fn test_key_present_iff_logged_in() {
        let mut session = AccountSession::new();
        assert!(!session.is_logged_in());
        assert!(session.private_key().is_none());

        let key = PrivateKey::generate();
        let addr = key.address().unwrap();
        session.log_in(addr, key.clone());
        assert!(session.is_logged_in());
        assert_eq!(session.private_key(), Some(&key));
        assert_eq!(session.selected_address(), Some(addr));
        assert_eq!(session.addresses(), &[addr]);

        assert!(session.log_out());
        assert!(!session.is_logged_in());
        assert!(session.private_key().is_none());
        // Selection is retained for the next unlock
        assert_eq!(session.selected_address(), Some(addr));
        assert!(!session.log_out());
    }

    #[test]
    fn test_remove_active_address_logs_out() {
        let mut session = AccountSession::new();
        let key = PrivateKey::generate();
        let addr = key.address().unwrap();
        session.set_addresses([address(1)]);
        session.log_in(addr, key);

        assert!(!session.remove_address(&address(1)));
        assert!(session.remove_address(&addr));
        assert!(!session.is_logged_in());
        assert_eq!(session.selected_address(), None);
        assert!(session.addresses().is_empty());
    }

    #[test]
    fn test_set_addresses_clears_stale_selection() {
        let mut session = AccountSession::new();
        session.set_addresses([address(1), address(2)]);
        session.select(address(2)).unwrap();
        session.set_addresses([address(1)]);
        assert_eq!(session.selected_address(), None);
    }

    #[test]
    fn test_snapshot_has_no_secret() {
        let mut session = AccountSession::new();
        let key = PrivateKey::generate();
        let addr = key.address().unwrap();
        session.log_in(addr, key);

        let snapshot = session.snapshot(SessionState::Unlocked);
        assert!(snapshot.logged_in);
        assert_eq!(snapshot.active_address, Some(addr));

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"unlocked\""));
    }
}
