//! Command dialect negotiation.
//!
//! Bridge firmwares disagree on the command topic suffix (`services` vs
//! `commands`). Rather than trying every candidate on every command, the
//! first command of a session probes the candidates in order and the
//! winner is cached until the session closes.

use crate::correlator::CommandCorrelator;
use crate::session::SessionManager;
use serde_json::json;
use skyhook_core::{topics, DeviceIdentity};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Reply window per probed candidate.
const PROBE_TIMEOUT: Duration = Duration::from_millis(2_000);

/// Probe method; harmless and answered by every known bridge.
const PROBE_METHOD: &str = "ping";

/// Negotiated command addressing for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDialect {
    /// Topic suffix commands are published under.
    pub suffix: String,
}

pub struct DialectNegotiator {
    candidates: Vec<String>,
    cached: Mutex<Option<CommandDialect>>,
}

impl DialectNegotiator {
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            cached: Mutex::new(None),
        }
    }

    /// Dialect for this session, probing on first use.
    ///
    /// Candidates are tried in configured order and the first one whose
    /// probe is answered wins. When every candidate stays silent the
    /// first is used anyway, so commands still go somewhere observable.
    /// The outcome is cached either way: one probe round per session.
    pub async fn resolve(
        &self,
        correlator: &CommandCorrelator,
        session: &SessionManager,
        identity: &DeviceIdentity,
    ) -> CommandDialect {
        let mut cached = self.cached.lock().await;
        if let Some(dialect) = cached.as_ref() {
            return dialect.clone();
        }

        let serial = match identity.command_serial() {
            Some(serial) => serial.to_string(),
            None => {
                warn!("no command serial known, skipping dialect probe");
                let dialect = self.fallback();
                *cached = Some(dialect.clone());
                return dialect;
            }
        };

        for suffix in &self.candidates {
            let topic = topics::services(&serial, suffix);
            match correlator
                .send(session, &topic, PROBE_METHOD, json!({}), Some(PROBE_TIMEOUT))
                .await
            {
                Ok(_) => {
                    info!(suffix = %suffix, "command dialect negotiated");
                    let dialect = CommandDialect {
                        suffix: suffix.clone(),
                    };
                    *cached = Some(dialect.clone());
                    return dialect;
                }
                Err(e) if e.is_timeout() => {
                    debug!(suffix = %suffix, "dialect candidate silent");
                }
                Err(e) => {
                    // Transport trouble, not a verdict on the dialect.
                    // Use the fallback now but leave the cache empty so
                    // the next command probes again.
                    warn!(error = %e, "dialect probe aborted, deferring negotiation");
                    return self.fallback();
                }
            }
        }

        warn!("no dialect candidate answered, falling back to the first");
        let dialect = self.fallback();
        *cached = Some(dialect.clone());
        dialect
    }

    fn fallback(&self) -> CommandDialect {
        CommandDialect {
            suffix: self
                .candidates
                .first()
                .cloned()
                .unwrap_or_else(|| "services".to_string()),
        }
    }

    /// Drop the cached dialect at session end.
    pub async fn reset(&self) {
        *self.cached.lock().await = None;
    }

    /// Currently cached dialect, if negotiation already ran.
    pub async fn current(&self) -> Option<CommandDialect> {
        self.cached.lock().await.clone()
    }
}
