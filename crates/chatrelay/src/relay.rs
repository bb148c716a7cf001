use crate::config::RelayMode;
use crate::error::RelayError;
use crate::metrics::{counters, histograms};
use crate::registry::{ConnHandle, ConnectionRegistry};
use chat_common::token::{unix_now, TokenKeys};
use chat_common::wire::{relayed_line, TOKEN_INVALID_DIAGNOSTIC};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Tally of one fan-out pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Recipients the message was queued for.
    pub delivered: usize,
    /// Recipients removed because their token no longer verifies.
    pub evicted: usize,
    /// Recipients whose queue was full or already closed.
    pub unreachable: usize,
}

/// The sending side of a relayed message.
#[derive(Debug, Clone, Copy)]
pub struct Sender<'a> {
    /// Connection id of the sender.
    pub id: u64,
    /// Display name bound at admission.
    pub display_name: &'a str,
}

/// Fans each inbound message out to every registered connection.
#[derive(Debug)]
pub struct Relay {
    registry: Arc<ConnectionRegistry>,
    keys: TokenKeys,
    mode: RelayMode,
}

impl Relay {
    /// Create a relay over `registry`, re-verifying keys with `keys` in
    /// authenticated mode.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, keys: TokenKeys, mode: RelayMode) -> Self {
        Self {
            registry,
            keys,
            mode,
        }
    }

    /// The registry this relay reads from and evicts out of.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Mode this relay runs in.
    #[must_use]
    pub const fn mode(&self) -> RelayMode {
        self.mode
    }

    /// Relay one inbound `payload` from `sender`.
    pub fn on_message(&self, sender: Sender<'_>, payload: &str) -> RelayOutcome {
        self.on_message_at(sender, payload, unix_now())
    }

    /// Relay one inbound `payload`, re-verifying tokens as of Unix time `now`.
    pub fn on_message_at(&self, sender: Sender<'_>, payload: &str, now: u64) -> RelayOutcome {
        let start = Instant::now();
        let outcome = match self.mode {
            RelayMode::Authenticated => self.fan_out_verified(sender, payload, now),
            RelayMode::Open => self.fan_out_open(sender, payload),
        };
        histograms::fanout_seconds(start.elapsed().as_secs_f64());
        counters::messages_relayed_total(outcome.delivered as u64);
        debug!(
            sender = sender.id,
            delivered = outcome.delivered,
            evicted = outcome.evicted,
            unreachable = outcome.unreachable,
            "fan-out complete"
        );
        outcome
    }

    fn fan_out_verified(&self, sender: Sender<'_>, payload: &str, now: u64) -> RelayOutcome {
        let mut outcome = RelayOutcome::default();
        let line = relayed_line(sender.display_name, payload);

        // The sender's own entry is included: it sees its message echoed.
        for (key, conn) in self.registry.snapshot() {
            match self.keys.verify_at(&key, now) {
                Ok(_) => match self.deliver(&key, &conn, line.clone()) {
                    Ok(()) => outcome.delivered += 1,
                    Err(e) => {
                        debug!(conn = conn.id, "{}", e);
                        outcome.unreachable += 1;
                    }
                },
                Err(reason) => {
                    debug!(
                        conn = conn.id,
                        reason = reason.as_str(),
                        session_secs = conn.admitted_at.elapsed().as_secs(),
                        "evicting recipient"
                    );
                    // Full means a concurrent pass already queued it.
                    if conn
                        .terminate
                        .try_send(TOKEN_INVALID_DIAGNOSTIC.to_string())
                        .is_err()
                    {
                        debug!(conn = conn.id, "diagnostic already queued or task gone");
                    }
                    self.registry.remove_if(&key, conn.id);
                    counters::recipients_evicted_total(reason.as_str());
                    outcome.evicted += 1;
                }
            }
        }
        outcome
    }

    fn fan_out_open(&self, sender: Sender<'_>, payload: &str) -> RelayOutcome {
        let mut outcome = RelayOutcome::default();
        for (key, conn) in self.registry.snapshot() {
            if conn.id == sender.id {
                continue;
            }
            match self.deliver(&key, &conn, payload.to_string()) {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    debug!(conn = conn.id, "{}", e);
                    outcome.unreachable += 1;
                }
            }
        }
        outcome
    }

    fn deliver(&self, key: &str, conn: &ConnHandle, line: String) -> Result<(), RelayError> {
        match conn.tx.try_send(line) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                counters::recipients_unreachable_total("full");
                Err(RelayError::RecipientUnreachable(conn.id))
            }
            Err(TrySendError::Closed(_)) => {
                counters::recipients_unreachable_total("closed");
                self.registry.remove_if(key, conn.id);
                Err(RelayError::RecipientUnreachable(conn.id))
            }
        }
    }
}
