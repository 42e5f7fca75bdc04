//! Command correlation.
//!
//! Every outbound command carries a fresh `tid`; inbound replies are
//! matched back to exactly one waiter by that id. Replies with no waiter
//! (late, duplicate or unsolicited) are dropped, so delivery to callers
//! is at-most-once.

use crate::codec::CommandEnvelope;
use crate::session::SessionManager;
use crate::transport::QosLevel;
use serde_json::Value;
use skyhook_core::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;
use uuid::Uuid;

struct PendingCommand {
    method: String,
    reply_tx: oneshot::Sender<Value>,
}

/// Table of in-flight commands keyed by `tid`.
pub struct CommandCorrelator {
    pending: Mutex<HashMap<Uuid, PendingCommand>>,
    default_timeout: Duration,
}

impl CommandCorrelator {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Publish a command and wait for its correlated reply.
    ///
    /// The pending entry is registered before the publish so a reply
    /// racing the publish acknowledgment still finds its waiter. A failed
    /// publish removes the entry again and surfaces the publish error.
    pub async fn send(
        &self,
        session: &SessionManager,
        topic: &str,
        method: &str,
        data: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let envelope = CommandEnvelope::new(method, data);
        let payload = envelope.to_bytes()?;
        let tid = envelope.tid;
        let rx = self.register(envelope).await;

        if let Err(e) = session.publish(topic, payload, QosLevel::AtLeastOnce).await {
            self.discard(tid).await;
            return Err(e);
        }

        self.wait(tid, method, rx, timeout.unwrap_or(self.default_timeout))
            .await
    }

    /// Register a waiter for the envelope's `tid`.
    pub async fn register(&self, envelope: CommandEnvelope) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().await;
        pending.insert(
            envelope.tid,
            PendingCommand {
                method: envelope.method,
                reply_tx: tx,
            },
        );
        rx
    }

    /// Hand a reply to its waiter. Returns false when no waiter exists,
    /// which covers late replies after a timeout and unsolicited frames.
    pub async fn resolve(&self, tid: Uuid, data: Value) -> bool {
        let entry = self.pending.lock().await.remove(&tid);
        match entry {
            Some(entry) => entry.reply_tx.send(data).is_ok(),
            None => false,
        }
    }

    /// Wait for the reply registered under `tid`.
    ///
    /// On timeout the pending entry is purged, so a reply arriving later
    /// finds nothing and is dropped. A closed channel means the session
    /// was torn down while the command was in flight.
    pub async fn wait(
        &self,
        tid: Uuid,
        method: &str,
        rx: oneshot::Receiver<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(_)) => Err(Error::cancelled(format!(
                "command '{}' abandoned: session closed",
                method
            ))),
            Err(_) => {
                self.discard(tid).await;
                Err(Error::CommandTimeout {
                    tid,
                    method: method.to_string(),
                    waited_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn discard(&self, tid: Uuid) {
        self.pending.lock().await.remove(&tid);
    }

    /// Cancel every in-flight command. Dropping the senders wakes each
    /// waiter with a `Cancelled` error. Returns how many were cancelled.
    pub async fn cancel_all(&self) -> usize {
        let mut pending = self.pending.lock().await;
        let count = pending.len();
        for (tid, entry) in pending.drain() {
            debug!(tid = %tid, method = %entry.method, "cancelling pending command");
        }
        count
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
