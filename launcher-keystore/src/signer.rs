//! Signer collaborator.
//!
//! The signer runs outside the keystore (a separate process in the
//! launcher) and signs with whichever key it was last given.

use async_trait::async_trait;
use launcher_crypto_address::Address;
use tokio::sync::mpsc;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

#[async_trait]
pub trait SignerChannel: Send + Sync {
    /// Hand the unlocked key to the signer. `key` is borrowed; the signer
    /// must copy it if it needs to keep it.
    async fn set_active_key(&self, address: Address, key: &[u8]) -> Result<()>;

    /// Tell the signer to forget its key.
    async fn clear_active_key(&self) -> Result<()>;
}

/// Signer that ignores every command.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSigner;

#[async_trait]
impl SignerChannel for NoopSigner {
    async fn set_active_key(&self, _address: Address, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn clear_active_key(&self) -> Result<()> {
        Ok(())
    }
}

/// Command sent to a signer bridge.
pub enum SignerCommand {
    SetKey {
        address: Address,
        key: Zeroizing<Vec<u8>>,
    },
    Clear,
}

impl std::fmt::Debug for SignerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetKey { address, .. } => f
                .debug_struct("SetKey")
                .field("address", address)
                .field("key", &"[REDACTED]")
                .finish(),
            Self::Clear => write!(f, "Clear"),
        }
    }
}

/// Forwards commands over a channel to whatever bridges the signer process.
///
/// The channel is unbounded: sending never waits on the bridge, and a
/// `Clear` is never dropped behind a slow reader.
#[derive(Debug, Clone)]
pub struct ChannelSigner {
    tx: mpsc::UnboundedSender<SignerCommand>,
}

impl ChannelSigner {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SignerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, command: SignerCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "signer channel closed",
            ))
        })
    }
}

#[async_trait]
impl SignerChannel for ChannelSigner {
    async fn set_active_key(&self, address: Address, key: &[u8]) -> Result<()> {
        debug!(%address, "Sending key to signer");
        self.send(SignerCommand::SetKey {
            address,
            key: Zeroizing::new(key.to_vec()),
        })
    }

    async fn clear_active_key(&self) -> Result<()> {
        debug!("Clearing signer key");
        self.send(SignerCommand::Clear)
    }
}
