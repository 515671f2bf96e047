//! Session telemetry.
//!
//! Events never carry secrets or passwords. Emitting is fire-and-forget:
//! a sink that cannot deliver an event drops it.

use chrono::{DateTime, Utc};
use launcher_crypto_address::Address;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEventKind {
    AccountCreated { address: Address },
    LoginSucceeded { address: Address },
    LoginFailed { address: Address },
    LoggedOut { address: Address },
    PasswordReset { address: Address },
    AccountRemoved { address: Address },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: SessionEventKind,
}

impl SessionEvent {
    pub fn now(kind: SessionEventKind) -> Self {
        Self {
            at: Utc::now(),
            kind,
        }
    }

    /// Tracking name used by the launcher's analytics.
    pub fn name(&self) -> &'static str {
        match self.kind {
            SessionEventKind::AccountCreated { .. } => "Launcher/CreatePrivateKey",
            SessionEventKind::LoginSucceeded { .. } => "Launcher/Login",
            SessionEventKind::LoginFailed { .. } => "Launcher/LoginFailed",
            SessionEventKind::LoggedOut { .. } => "Launcher/Logout",
            SessionEventKind::PasswordReset { .. } => "Launcher/ResetPassword",
            SessionEventKind::AccountRemoved { .. } => "Launcher/RemoveAccount",
        }
    }

    pub fn address(&self) -> Address {
        match self.kind {
            SessionEventKind::AccountCreated { address }
            | SessionEventKind::LoginSucceeded { address }
            | SessionEventKind::LoginFailed { address }
            | SessionEventKind::LoggedOut { address }
            | SessionEventKind::PasswordReset { address }
            | SessionEventKind::AccountRemoved { address } => address,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: SessionEvent) {
        let address = event.address();
        match event.kind {
            SessionEventKind::LoginFailed { .. } => {
                warn!(event = event.name(), %address, "session event")
            }
            _ => info!(event = event.name(), %address, "session event"),
        }
    }
}

/// Forwards events to a bounded channel, dropping them when it is full or
/// closed.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<SessionEvent>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!("Dropping session event: {}", e);
        }
    }
}
