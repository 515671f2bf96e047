//! Session controller
//!
//! Orchestrates the unlock, creation, password reset, removal and logout
//! flows over an [`AccountSession`]. Views observe the controller through
//! [`SessionController::subscribe`] and never see key material.
//!
//! ## Superseded unlocks
//!
//! Each unlock takes a token from the session epoch. Unlocking, selecting
//! an address, creating an account, logging out, removing an account and
//! [`SessionController::supersede_pending`] all advance the epoch. When a
//! decrypt finishes, its result is committed only if its token is still
//! the current epoch; otherwise it is dropped as
//! [`UnlockOutcome::Discarded`] and the session is left untouched. The
//! check and the commit run under the session lock.
//!
//! Account creation takes a token the same way. A creation overtaken by a
//! newer action still stores its entry and lists the address, but does not
//! replace the session's key.
//!
//! ## Persisted state
//!
//! The last unlocked address and the failed unlock history are saved with
//! [`KeystoreRepository::save_state`] after every change and restored by
//! [`SessionControllerBuilder::build`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use launcher_crypto_address::Address;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::cipher::{KeystoreEntry, PasswordCipher};
use crate::error::{Error, Result};
use crate::events::{EventSink, SessionEvent, SessionEventKind, TracingEventSink};
use crate::keygen::{KeyGenerator, LocalKeyGenerator};
use crate::keys::PrivateKey;
use crate::repository::{KeystoreRepository, KeystoreState};
use crate::session::{AccountSession, SessionSnapshot, SessionState};
use crate::signer::{NoopSigner, SignerChannel};
use crate::throttle::{ThrottleConfig, UnlockThrottle};

/// How long a signer call may hold up a session transition.
pub const DEFAULT_SIGNER_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of an unlock that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    Unlocked(Address),
    /// A newer action superseded the attempt; nothing was changed.
    Discarded,
}

/// Reply to an unlock request from a view. At most one field is set; both
/// are empty when the attempt was discarded.
#[derive(Default, PartialEq, Eq)]
pub struct UnlockReply {
    pub private_key: Option<Zeroizing<String>>,
    pub error: Option<String>,
}

impl UnlockReply {
    pub fn discarded() -> Self {
        Self::default()
    }

    pub fn is_discarded(&self) -> bool {
        self.private_key.is_none() && self.error.is_none()
    }
}

impl std::fmt::Debug for UnlockReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockReply")
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .field("error", &self.error)
            .finish()
    }
}

struct Inner {
    session: AccountSession,
    throttle: UnlockThrottle,
    /// Preferred selection on the next start
    last_address: Option<Address>,
    epoch: u64,
    /// Token of the unlock the controller is waiting on
    unlocking: Option<u64>,
    creating: bool,
}

impl Inner {
    fn state(&self) -> SessionState {
        if self.creating {
            SessionState::Creating
        } else if self.unlocking.is_some() {
            SessionState::Unlocking
        } else if self.session.is_logged_in() {
            SessionState::Unlocked
        } else {
            SessionState::Locked
        }
    }

    /// Invalidate every in-flight unlock.
    fn supersede(&mut self) -> u64 {
        self.epoch += 1;
        self.unlocking = None;
        self.epoch
    }

    fn ensure_default_selection(&mut self) -> Option<Address> {
        self.session.ensure_default_selection(self.last_address)
    }

    fn persisted(&self) -> KeystoreState {
        KeystoreState {
            last_address: self.last_address,
            attempts: self.throttle.records(),
        }
    }
}

pub struct SessionControllerBuilder {
    repository: Arc<dyn KeystoreRepository>,
    cipher: PasswordCipher,
    generator: Arc<dyn KeyGenerator>,
    signer: Arc<dyn SignerChannel>,
    signer_timeout: Duration,
    events: Arc<dyn EventSink>,
    throttle: ThrottleConfig,
}

impl SessionControllerBuilder {
    pub fn cipher(mut self, cipher: PasswordCipher) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn key_generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn signer(mut self, signer: Arc<dyn SignerChannel>) -> Self {
        self.signer = signer;
        self
    }

    /// Bound on each signer call. A call that takes longer is logged and
    /// abandoned.
    pub fn signer_timeout(mut self, timeout: Duration) -> Self {
        self.signer_timeout = timeout;
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    /// Load the known addresses and the saved state, then select the last
    /// unlocked address or the first one.
    pub fn build(self) -> Result<SessionController> {
        let mut session = AccountSession::new();
        session.set_addresses(self.repository.list()?);

        let state = self.repository.load_state().unwrap_or_else(|e| {
            warn!("Failed to load keystore state, starting fresh: {}", e);
            KeystoreState::default()
        });

        let mut inner = Inner {
            session,
            throttle: UnlockThrottle::with_records(self.throttle, state.attempts),
            last_address: state.last_address,
            epoch: 0,
            unlocking: None,
            creating: false,
        };
        inner.ensure_default_selection();
        let (snapshot_tx, _) = watch::channel(inner.session.snapshot(inner.state()));
        info!("Session controller ready with {} accounts", inner.session.addresses().len());

        Ok(SessionController {
            repository: self.repository,
            cipher: self.cipher,
            generator: self.generator,
            signer: self.signer,
            signer_timeout: self.signer_timeout,
            events: self.events,
            inner: Mutex::new(inner),
            snapshot_tx,
        })
    }
}

pub struct SessionController {
    repository: Arc<dyn KeystoreRepository>,
    cipher: PasswordCipher,
    generator: Arc<dyn KeyGenerator>,
    signer: Arc<dyn SignerChannel>,
    signer_timeout: Duration,
    events: Arc<dyn EventSink>,
    inner: Mutex<Inner>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    /// Start building a controller over `repository`. Defaults: default KDF
    /// cost, [`LocalKeyGenerator`], [`NoopSigner`], [`TracingEventSink`],
    /// [`DEFAULT_SIGNER_TIMEOUT`] and the default throttle policy.
    pub fn builder(repository: Arc<dyn KeystoreRepository>) -> SessionControllerBuilder {
        SessionControllerBuilder {
            repository,
            cipher: PasswordCipher::default(),
            generator: Arc::new(LocalKeyGenerator),
            signer: Arc::new(NoopSigner),
            signer_timeout: DEFAULT_SIGNER_TIMEOUT,
            events: Arc::new(TracingEventSink),
            throttle: ThrottleConfig::default(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot_tx.borrow().state
    }

    /// Run `f` over the unlocked key, if there is one.
    pub async fn with_private_key<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let inner = self.inner.lock().await;
        inner.session.private_key().map(|key| f(key.expose_secret()))
    }

    fn publish(&self, inner: &Inner) {
        self.snapshot_tx
            .send_replace(inner.session.snapshot(inner.state()));
    }

    fn emit(&self, kind: SessionEventKind) {
        self.events.emit(SessionEvent::now(kind));
    }

    /// Write the last address and throttle history. Failures are logged;
    /// the session keeps running on its in-memory copy.
    fn save_state(&self, inner: &Inner) {
        if let Err(e) = self.repository.save_state(&inner.persisted()) {
            warn!("Failed to save keystore state: {}", e);
        }
    }

    // Signer calls run under the session lock so the signer sees keys in
    // commit order. The timeout keeps a stalled signer from wedging it.
    async fn push_key(&self, address: Address, key: &PrivateKey) {
        let call = self.signer.set_active_key(address, key.expose_secret());
        match tokio::time::timeout(self.signer_timeout, call).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(%address, "Failed to pass key to signer: {}", e),
            Err(_) => warn!(
                %address,
                "Signer did not take the key within {:?}", self.signer_timeout
            ),
        }
    }

    async fn clear_signer(&self) {
        match tokio::time::timeout(self.signer_timeout, self.signer.clear_active_key()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to clear signer key: {}", e),
            Err(_) => warn!("Signer did not clear its key within {:?}", self.signer_timeout),
        }
    }

    /// Decrypt the entry for `address` and make it the active key.
    ///
    /// Fails with [`Error::UnknownAddress`] or [`Error::RateLimited`]
    /// before any cryptographic work. A wrong password leaves the session
    /// as it was, including any key unlocked earlier.
    pub async fn unlock(&self, address: Address, password: &str) -> Result<UnlockOutcome> {
        Ok(match self.unlock_inner(address, password).await? {
            Some(_) => UnlockOutcome::Unlocked(address),
            None => UnlockOutcome::Discarded,
        })
    }

    /// [`SessionController::unlock`] shaped as a reply to a view.
    pub async fn unlock_reply(&self, address: Address, password: &str) -> UnlockReply {
        match self.unlock_inner(address, password).await {
            Ok(Some(key_hex)) => UnlockReply {
                private_key: Some(key_hex),
                error: None,
            },
            Ok(None) => UnlockReply::discarded(),
            Err(e) => UnlockReply {
                private_key: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Returns the hex of the committed key, taken under the guard that
    /// committed it, or `None` if the attempt was superseded.
    async fn unlock_inner(
        &self,
        address: Address,
        password: &str,
    ) -> Result<Option<Zeroizing<String>>> {
        let (token, entry) = {
            let mut inner = self.inner.lock().await;
            if !inner.session.contains(&address) {
                return Err(Error::UnknownAddress(address));
            }
            inner.throttle.check(&address, Utc::now())?;
            let entry = self.repository.get(&address)?;

            let token = inner.supersede();
            inner.unlocking = Some(token);
            self.publish(&inner);
            (token, entry)
        };
        debug!(%address, token, "Unlocking");

        let result = self.decrypt(entry, password).await;

        let mut inner = self.inner.lock().await;
        if inner.epoch != token {
            debug!(%address, token, "Discarding superseded unlock");
            return Ok(None);
        }
        inner.unlocking = None;

        match result {
            Ok(key) => {
                inner.throttle.record_success(&address);
                inner.last_address = Some(address);
                self.push_key(address, &key).await;
                let key_hex = key.to_hex();
                inner.session.log_in(address, key);
                self.save_state(&inner);
                self.publish(&inner);
                info!(%address, "Account unlocked");
                self.emit(SessionEventKind::LoginSucceeded { address });
                Ok(Some(key_hex))
            }
            Err(e) => {
                if matches!(e, Error::InvalidPassword) {
                    inner.throttle.record_failure(&address, Utc::now());
                    self.save_state(&inner);
                    self.emit(SessionEventKind::LoginFailed { address });
                }
                self.publish(&inner);
                warn!(%address, "Unlock failed: {}", e);
                Err(e)
            }
        }
    }

    /// Generate, store and unlock a new account.
    ///
    /// Password validation happens before the key generator is called. If
    /// another action supersedes the creation while the key is generated,
    /// the account is still stored and listed but not unlocked.
    pub async fn create_account(&self, password: &str, confirm: &str) -> Result<Address> {
        validate_new_password(password, confirm)?;
        let token = {
            let mut inner = self.inner.lock().await;
            if inner.creating {
                return Err(Error::SessionBusy);
            }
            inner.creating = true;
            let token = inner.supersede();
            self.publish(&inner);
            token
        };

        let result = self.generate_and_store(password).await;

        let mut inner = self.inner.lock().await;
        inner.creating = false;
        match result {
            Ok((address, key)) if inner.epoch == token => {
                inner.last_address = Some(address);
                self.push_key(address, &key).await;
                inner.session.log_in(address, key);
                self.save_state(&inner);
                self.publish(&inner);
                info!(%address, "Account created");
                self.emit(SessionEventKind::AccountCreated { address });
                Ok(address)
            }
            Ok((address, _)) => {
                inner.session.add_address(address);
                inner.ensure_default_selection();
                self.publish(&inner);
                info!(%address, "Account created; a newer action kept the current session");
                self.emit(SessionEventKind::AccountCreated { address });
                Ok(address)
            }
            Err(e) => {
                self.publish(&inner);
                warn!("Account creation failed: {}", e);
                Err(e)
            }
        }
    }

    async fn generate_and_store(&self, password: &str) -> Result<(Address, PrivateKey)> {
        let generated = self.generator.create_private_key(password).await?;
        let key = PrivateKey::from_hex(&generated.plaintext_key_hex)?;
        let address = key.address()?;
        if address != generated.address {
            warn!(
                reported = %generated.address,
                derived = %address,
                "Generated key does not match its reported address"
            );
            return Err(Error::InvalidKeyFormat);
        }

        let (entry, key) = self.encrypt(key, password).await?;
        self.repository.put(entry)?;
        Ok((address, key))
    }

    /// Select a known address. Supersedes in-flight unlocks.
    pub async fn select_address(&self, address: Address) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.session.select(address)?;
        inner.supersede();
        self.publish(&inner);
        debug!(%address, "Selected address");
        Ok(())
    }

    /// Drop the unlocked key and tell the signer to forget it. Known
    /// addresses and the selection are kept.
    pub async fn logout(&self) {
        let mut inner = self.inner.lock().await;
        inner.supersede();
        let active = inner.session.active_address();
        inner.session.log_out();
        self.clear_signer().await;
        self.publish(&inner);

        if let Some(address) = active {
            info!(%address, "Logged out");
            self.emit(SessionEventKind::LoggedOut { address });
        }
    }

    /// Re-encrypt the unlocked key for `address` under a new password.
    ///
    /// Requires the session to hold the key for `address`, both when the
    /// reset starts and when the new entry is written.
    pub async fn reset_password(&self, address: Address, new: &str, confirm: &str) -> Result<()> {
        validate_new_password(new, confirm)?;
        let key = {
            let inner = self.inner.lock().await;
            if inner.session.active_address() != Some(address) {
                return Err(Error::Unauthorized);
            }
            inner
                .session
                .private_key()
                .cloned()
                .ok_or(Error::Unauthorized)?
        };

        let (entry, _) = self.encrypt(key, new).await?;

        let mut inner = self.inner.lock().await;
        // A logout or removal while encrypting revokes the reset
        if inner.session.active_address() != Some(address) {
            warn!(%address, "Account was locked during password reset, not saving");
            return Err(Error::Unauthorized);
        }
        self.repository.put(entry)?;
        inner.throttle.forget(&address);
        self.save_state(&inner);
        drop(inner);

        info!(%address, "Password changed");
        self.emit(SessionEventKind::PasswordReset { address });
        Ok(())
    }

    /// Store `private_key_hex` under a new password and unlock it.
    ///
    /// Knowing the raw key proves ownership, so an existing entry for the
    /// same address is replaced.
    pub async fn recover_with_private_key(
        &self,
        private_key_hex: &str,
        password: &str,
        confirm: &str,
    ) -> Result<Address> {
        validate_new_password(password, confirm)?;
        let key = PrivateKey::from_hex(private_key_hex)?;
        let address = key.address()?;

        let (entry, key) = self.encrypt(key, password).await?;

        // Store and log in under one guard so the entry and the session's
        // address list agree
        let mut inner = self.inner.lock().await;
        let existed = self.repository.contains(&address)?;
        self.repository.put(entry)?;
        inner.supersede();
        inner.throttle.record_success(&address);
        inner.last_address = Some(address);
        self.push_key(address, &key).await;
        inner.session.log_in(address, key);
        self.save_state(&inner);
        self.publish(&inner);
        drop(inner);

        info!(%address, "Account recovered from private key");
        if existed {
            self.emit(SessionEventKind::PasswordReset { address });
        } else {
            self.emit(SessionEventKind::AccountCreated { address });
        }
        Ok(address)
    }

    /// Delete the entry for `address`. Removing an unknown address is a
    /// no-op. Removing the active account logs out.
    pub async fn remove_account(&self, address: Address) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.repository.remove(&address)?;
        inner.supersede();

        let known = inner.session.contains(&address);
        if inner.session.remove_address(&address) {
            self.clear_signer().await;
            self.emit(SessionEventKind::LoggedOut { address });
        }
        inner.throttle.forget(&address);
        if inner.last_address == Some(address) {
            inner.last_address = None;
        }
        self.save_state(&inner);
        inner.ensure_default_selection();
        self.publish(&inner);

        if known {
            info!(%address, "Account removed");
            self.emit(SessionEventKind::AccountRemoved { address });
        }
        Ok(())
    }

    /// Reload the known addresses from the repository.
    pub async fn refresh(&self) -> Result<()> {
        let addresses = self.repository.list()?;
        let mut inner = self.inner.lock().await;
        inner.session.set_addresses(addresses);

        if let Some(active) = inner.session.active_address() {
            if !inner.session.contains(&active) {
                warn!(address = %active, "Active account disappeared from keystore");
                inner.supersede();
                inner.session.log_out();
                self.clear_signer().await;
                self.emit(SessionEventKind::LoggedOut { address: active });
            }
        }
        inner.ensure_default_selection();
        self.publish(&inner);
        Ok(())
    }

    /// Invalidate in-flight unlocks without reporting an error, e.g. when
    /// the user navigates away from the login view.
    pub async fn supersede_pending(&self) {
        let mut inner = self.inner.lock().await;
        inner.supersede();
        self.publish(&inner);
    }

    /// If nothing is selected, select the last unlocked address when it is
    /// still known, else the first one.
    pub async fn ensure_default_selection(&self) -> Option<Address> {
        let mut inner = self.inner.lock().await;
        let selected = inner.ensure_default_selection();
        if selected.is_some() {
            self.publish(&inner);
        }
        selected
    }

    async fn decrypt(&self, entry: KeystoreEntry, password: &str) -> Result<PrivateKey> {
        let cipher = self.cipher.clone();
        let password = Zeroizing::new(password.to_owned());
        tokio::task::spawn_blocking(move || cipher.decrypt(&entry, &password))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    async fn encrypt(&self, key: PrivateKey, password: &str) -> Result<(KeystoreEntry, PrivateKey)> {
        let cipher = self.cipher.clone();
        let password = Zeroizing::new(password.to_owned());
        tokio::task::spawn_blocking(move || cipher.encrypt(&key, &password).map(|entry| (entry, key)))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("snapshot", &*self.snapshot_tx.borrow())
            .finish_non_exhaustive()
    }
}

fn validate_new_password(password: &str, confirm: &str) -> Result<()> {
    if password.is_empty() {
        return Err(Error::EmptyPassword);
    }
    if password != confirm {
        return Err(Error::PasswordMismatch);
    }
    Ok(())
}
