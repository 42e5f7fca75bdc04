//! Broker session lifecycle.
//!
//! One driver task owns the link. It polls transport events, replays the
//! subscription set after every connection acknowledgment and walks the
//! state machine Disconnected -> Connecting -> Connected -> Reconnecting
//! -> Failed. Outbound calls are rejected whenever the session is not
//! Connected instead of queuing silently.

use crate::router::TopicRouter;
use crate::transport::{LinkEvent, LinkHandle, MqttTransport, QosLevel};
use rand::Rng;
use skyhook_core::{
    Error, EventBus, GatewayConfig, GatewayEvent, Result, SessionState, SessionStats,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Stream of session state transitions.
pub struct StatusStream {
    rx: broadcast::Receiver<SessionState>,
}

impl StatusStream {
    /// Next transition, or `None` once the session manager is gone.
    pub async fn recv(&mut self) -> Option<SessionState> {
        loop {
            match self.rx.recv().await {
                Ok(state) => return Some(state),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "status stream lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Wait until the session reports `target`, consuming transitions on
    /// the way. `None` means the stream closed or a terminal state was
    /// reached first.
    pub async fn wait_for(&mut self, target: SessionState) -> Option<SessionState> {
        while let Some(state) = self.recv().await {
            if state == target {
                return Some(state);
            }
            if state == SessionState::Failed && target != SessionState::Failed {
                return None;
            }
        }
        None
    }
}

/// Owns the broker link and the session state machine.
pub struct SessionManager {
    config: GatewayConfig,
    transport: Arc<dyn MqttTransport>,
    router: Arc<TopicRouter>,
    bus: EventBus,
    /// Current state, readable without subscribing.
    state_tx: watch::Sender<SessionState>,
    /// Transition feed behind [`StatusStream`].
    status_tx: broadcast::Sender<SessionState>,
    /// Outbound handle of the most recent link, cleared on disconnect.
    link: RwLock<Option<Arc<dyn LinkHandle>>>,
    /// Desired subscriptions, replayed on every connection acknowledgment.
    subscriptions: Mutex<HashMap<String, QosLevel>>,
    stats: Mutex<SessionStats>,
    shutdown_tx: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        config: GatewayConfig,
        transport: Arc<dyn MqttTransport>,
        router: Arc<TopicRouter>,
        bus: EventBus,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (status_tx, _) = broadcast::channel(64);
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            transport,
            router,
            bus,
            state_tx,
            status_tx,
            link: RwLock::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            stats: Mutex::new(SessionStats::default()),
            shutdown_tx,
            driver: Mutex::new(None),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn status_stream(&self) -> StatusStream {
        StatusStream {
            rx: self.status_tx.subscribe(),
        }
    }

    pub async fn stats(&self) -> SessionStats {
        self.stats.lock().await.clone()
    }

    /// Start the session driver.
    ///
    /// Validates the configuration before any connection attempt. While a
    /// driver is already active this is a no-op that hands back a fresh
    /// status stream instead of opening a second connection.
    pub async fn connect(self: &Arc<Self>) -> Result<StatusStream> {
        self.config.validate()?;

        let stream = self.status_stream();
        let mut driver = self.driver.lock().await;
        if self.state().is_active() {
            debug!("session already active, reusing driver");
            return Ok(stream);
        }

        // A finished driver may still be parked here after Failed.
        let _ = driver.take();

        // The receiver must exist before the spawn: a shutdown sent
        // before the driver's first poll would otherwise find no
        // receiver and never be stored.
        let _ = self.shutdown_tx.send_replace(false);
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.set_state(SessionState::Connecting).await;

        let manager = Arc::clone(self);
        *driver = Some(tokio::spawn(async move { manager.run(shutdown_rx).await }));
        Ok(stream)
    }

    /// Tear the session down: stop the driver, close the link, clear the
    /// subscription set and settle on Disconnected. Safe to call in any
    /// state.
    pub async fn disconnect(&self) {
        {
            // Signal while holding the driver slot so a racing connect()
            // cannot subscribe a fresh receiver after this value landed
            // and mark it as already seen.
            let mut driver = self.driver.lock().await;
            let _ = self.shutdown_tx.send_replace(true);
            if let Some(handle) = driver.take() {
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        error!(error = %e, "session driver panicked");
                    }
                }
            }
        }

        let link = self.link.write().await.take();
        if let Some(link) = link {
            if let Err(e) = link.disconnect().await {
                debug!(error = %e, "link disconnect during teardown");
            }
        }

        self.subscriptions.lock().await.clear();
        self.set_state(SessionState::Disconnected).await;
        info!("session disconnected");
    }

    /// Publish one frame, honoring the configured publish timeout.
    ///
    /// Rejected with [`Error::NotConnected`] in every state but Connected.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QosLevel) -> Result<()> {
        let state = self.state();
        if state != SessionState::Connected {
            return Err(Error::NotConnected(state));
        }
        let link = self
            .link
            .read()
            .await
            .clone()
            .ok_or(Error::NotConnected(state))?;

        let timeout = self.config.publish_timeout();
        match tokio::time::timeout(timeout, link.publish(topic, payload, qos, false)).await {
            Ok(Ok(())) => {
                self.stats.lock().await.record_published();
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::transport(format!(
                "publish to '{}' timed out after {}ms",
                topic,
                timeout.as_millis()
            ))),
        }
    }

    /// Subscribe a topic pattern and remember it for replay.
    ///
    /// Idempotent per pattern. Rejected with [`Error::NotConnected`] in
    /// every state but Connected.
    pub async fn subscribe(&self, pattern: &str, qos: QosLevel) -> Result<()> {
        let state = self.state();
        if state != SessionState::Connected {
            return Err(Error::NotConnected(state));
        }

        let mut subs = self.subscriptions.lock().await;
        if subs.contains_key(pattern) {
            return Ok(());
        }
        let link = self
            .link
            .read()
            .await
            .clone()
            .ok_or(Error::NotConnected(state))?;
        link.subscribe(pattern, qos).await?;
        subs.insert(pattern.to_string(), qos);
        debug!(pattern, "subscribed");
        Ok(())
    }

    /// Seed patterns into the subscription set before the session is up.
    /// They are installed by the replay that runs on every connection
    /// acknowledgment, the initial one included.
    pub(crate) async fn seed_subscriptions(&self, patterns: &[(String, QosLevel)]) {
        let mut subs = self.subscriptions.lock().await;
        for (pattern, qos) in patterns {
            subs.entry(pattern.clone()).or_insert(*qos);
        }
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut attempts: u32 = 0;

        'session: loop {
            let opened = tokio::select! {
                _ = shutdown_rx.changed() => break 'session,
                opened = self.transport.open(&self.config.broker) => opened,
            };

            let (handle, mut events) = match opened {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "failed to open broker link");
                    if !self.backoff(&mut attempts, &mut shutdown_rx).await {
                        break 'session;
                    }
                    continue 'session;
                }
            };

            *self.link.write().await = Some(Arc::clone(&handle));

            loop {
                let event = tokio::select! {
                    _ = shutdown_rx.changed() => break 'session,
                    event = events.next() => event,
                };

                match event {
                    Ok(LinkEvent::ConnAck) => {
                        if self.state() == SessionState::Reconnecting {
                            self.stats.lock().await.record_reconnect();
                        }
                        attempts = 0;
                        self.replay_subscriptions(&handle).await;
                        self.set_state(SessionState::Connected).await;
                        info!(broker = %self.config.broker.broker_addr(), "session connected");
                    }
                    Ok(LinkEvent::Frame { topic, payload }) => {
                        self.stats.lock().await.record_received();
                        self.router.dispatch(&topic, &payload).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "broker link lost");
                        if !self.backoff(&mut attempts, &mut shutdown_rx).await {
                            break 'session;
                        }
                        // Polling the same event source again starts the
                        // next connect attempt.
                    }
                }
            }
        }
    }

    /// Count one failed attempt and sleep the backoff delay.
    ///
    /// Returns false when the retry budget is exhausted (the state is
    /// already Failed then) or a shutdown arrived during the sleep.
    async fn backoff(&self, attempts: &mut u32, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        *attempts += 1;
        if *attempts >= self.config.reconnect.max_attempts {
            error!(
                attempts = *attempts,
                "connect retry budget exhausted, giving up"
            );
            self.set_state(SessionState::Failed).await;
            return false;
        }

        self.set_state(SessionState::Reconnecting).await;
        let delay = self.retry_delay(*attempts);
        debug!(
            attempt = *attempts,
            delay_ms = delay.as_millis() as u64,
            "waiting before reconnect"
        );
        tokio::select! {
            _ = shutdown_rx.changed() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Exponential backoff with jitter so a fleet of gateways does not
    /// reconnect in lockstep.
    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.config.reconnect.delay_for(attempt);
        let spread = (base.as_millis() as u64 / 4).max(1);
        let jitter = rand::thread_rng().gen_range(0..spread);
        base + Duration::from_millis(jitter)
    }

    async fn replay_subscriptions(&self, link: &Arc<dyn LinkHandle>) {
        let subs = self.subscriptions.lock().await.clone();
        for (pattern, qos) in subs {
            match link.subscribe(&pattern, qos).await {
                Ok(()) => debug!(pattern = %pattern, "subscription installed"),
                Err(e) => warn!(pattern = %pattern, error = %e, "subscription replay failed"),
            }
        }
    }

    /// Record a transition and fan it out to the status stream and the
    /// event bus. Same-state transitions are dropped.
    async fn set_state(&self, state: SessionState) {
        let previous = *self.state_tx.borrow();
        if previous == state {
            return;
        }
        self.state_tx.send_replace(state);
        let _ = self.status_tx.send(state);
        self.bus
            .publish_with_source(
                GatewayEvent::SessionStatus {
                    state,
                    timestamp: chrono::Utc::now().timestamp_millis(),
                },
                "session",
            )
            .await;
        info!(from = %previous, to = %state, "session state changed");
    }
}
