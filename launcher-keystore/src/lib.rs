//! Launcher Keystore
//!
//! Account keystore and session lifecycle for the game launcher. Private
//! keys are stored encrypted under the account password and only held in
//! memory while a session is unlocked.
//!
//! ## Security Model
//!
//! - Keys are encrypted at rest with Argon2id and ChaCha20-Poly1305
//! - Decrypted keys are zeroized on drop and kept out of swap where possible
//! - A wrong password and a tampered entry are indistinguishable to callers
//! - Views only ever see [`SessionSnapshot`], which holds no secrets

pub mod cipher;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod keygen;
pub mod keys;
pub mod repository;
mod secmem;
pub mod session;
pub mod signer;
pub mod throttle;

pub use cipher::{KdfParams, KeystoreEntry, PasswordCipher};
pub use config::LauncherConfig;
pub use controller::{
    SessionController, SessionControllerBuilder, UnlockOutcome, UnlockReply, DEFAULT_SIGNER_TIMEOUT,
};
pub use error::{Error, Result};
pub use events::{ChannelEventSink, EventSink, SessionEvent, SessionEventKind, TracingEventSink};
pub use keygen::{GeneratedKey, KeyGenerator, LocalKeyGenerator};
pub use keys::PrivateKey;
pub use launcher_crypto_address::Address;
pub use repository::{FileKeystore, KeystoreRepository, KeystoreState, MemoryKeystore};
pub use session::{AccountSession, SessionSnapshot, SessionState};
pub use signer::{ChannelSigner, NoopSigner, SignerChannel, SignerCommand};
pub use throttle::{AttemptRecord, ThrottleConfig, UnlockThrottle, MAX_LOCKOUT_SECS};
