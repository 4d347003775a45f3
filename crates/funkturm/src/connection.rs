//! Persistent broker session with auto-reconnect and typed inbound routing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use zeromq::prelude::*;
use zeromq::{PubSocket, SubSocket, ZmqMessage};

use fahrplan_core::config::BrokerConfig;

use crate::error::BrokerError;
use crate::message::BrokerMessage;
use crate::topics::{InboundRoute, CLOUD_SUBSCRIPTIONS};
use crate::transport::BrokerEndpoints;

/// Reason code the broker attaches to a server-initiated disconnect when the
/// presented app credential is no longer accepted.
pub const DISCONNECT_NOT_AUTHORIZED: u8 = 135;

/// Source of the app credential presented to the broker.
///
/// The identity client implements this; tests inject fakes.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Current credential, refreshing it first when expired.
    async fn access_token(&self) -> Result<String, BrokerError>;

    /// Whether the cached credential has passed its expiry.
    async fn is_expired(&self) -> bool;

    /// Force-acquire a fresh credential. Failure here is fatal for the
    /// adapter: every retry against the identity service has already been
    /// exhausted inside the source.
    async fn refresh(&self) -> Result<(), BrokerError>;
}

/// Publishes device-bound payloads onto broker topics.
#[async_trait]
pub trait TaskPublisher: Send + Sync {
    /// Publish `payload` on `topic` with the given QoS. Blocks until a
    /// connection is available, bounded by the configured connect timeout.
    async fn publish(&self, topic: &str, payload: &[u8], qos: u8) -> Result<(), BrokerError>;
}

/// Blanket implementation so `Arc<dyn TaskPublisher>` can be used directly.
#[async_trait]
impl<T: TaskPublisher + ?Sized> TaskPublisher for Arc<T> {
    async fn publish(&self, topic: &str, payload: &[u8], qos: u8) -> Result<(), BrokerError> {
        (**self).publish(topic, payload, qos).await
    }
}

/// Why the broker session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Server-initiated disconnect carrying a reason code.
    ServerRequested(u8),
    /// The transport failed underneath the session.
    Transport(String),
}

impl DisconnectReason {
    pub fn is_not_authorized(&self) -> bool {
        matches!(self, Self::ServerRequested(code) if *code == DISCONNECT_NOT_AUTHORIZED)
    }
}

/// An event observed on the broker session.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// An inbound message arrived on one of the cloud subscriptions.
    Message(BrokerMessage),
    /// The session dropped.
    Disconnected(DisconnectReason),
}

/// Owns the broker sockets and the reconnect/resubscribe lifecycle.
///
/// Inbound messages are routed by [`InboundRoute`] onto a typed channel the
/// response router consumes. Publishes await an active connection.
pub struct ConnectionManager {
    endpoints: BrokerEndpoints,
    qos: u8,
    connect_timeout: Duration,
    reconnect_delay: Duration,
    credentials: Arc<dyn CredentialSource>,
    publish_socket: Mutex<Option<PubSocket>>,
    connected_tx: watch::Sender<bool>,
    connected_rx: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionManager {
    pub fn new(
        config: &BrokerConfig,
        credentials: Arc<dyn CredentialSource>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (connected_tx, connected_rx) = watch::channel(false);
        Self {
            endpoints: BrokerEndpoints::from_config(config),
            qos: config.qos,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            credentials,
            publish_socket: Mutex::new(None),
            connected_tx,
            connected_rx,
            shutdown,
        }
    }

    /// The QoS configured for outbound publishes.
    pub fn qos(&self) -> u8 {
        self.qos
    }

    /// Run the broker session until shutdown. Returns an error only for the
    /// fatal case: the identity service stayed unreachable across all
    /// retries while re-authenticating the session.
    pub async fn run(
        self: Arc<Self>,
        inbound_tx: mpsc::Sender<(InboundRoute, BrokerMessage)>,
    ) -> Result<(), BrokerError> {
        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                self.set_connected(false).await;
                return Ok(());
            }

            let mut subscriber = match self.connect().await {
                Ok(sub) => sub,
                Err(err) => {
                    warn!(error = %err, "failed to establish broker connection");
                    self.handle_disconnect(DisconnectReason::Transport(err.to_string()))
                        .await?;
                    if self.wait_reconnect_delay().await {
                        return Ok(());
                    }
                    continue;
                }
            };

            info!("broker connection is up, subscribed to cloud topics");

            loop {
                let event = tokio::select! {
                    received = subscriber.recv() => Self::classify(received),
                    _ = shutdown.changed() => {
                        info!("broker adapter received shutdown signal");
                        self.set_connected(false).await;
                        return Ok(());
                    }
                };

                let Some(event) = event else {
                    // Undecodable frame; skip it and keep the session.
                    continue;
                };

                match self.handle_event(event, &inbound_tx).await? {
                    SessionState::Active => {}
                    SessionState::Dropped => break,
                }
            }

            if self.wait_reconnect_delay().await {
                return Ok(());
            }
        }
    }

    /// Establish both sockets and re-subscribe the cloud topics. Invoked on
    /// every connection attempt, including reconnects.
    async fn connect(&self) -> Result<SubSocket, BrokerError> {
        // Present a current app credential for the session. The token also
        // gates re-auth handling on later disconnects.
        let _token = self.credentials.access_token().await?;

        self.endpoints.frontend.ensure_ipc_dir().map_err(|e| {
            BrokerError::Transport(format!("failed to prepare IPC socket dir: {e}"))
        })?;

        let mut publisher = PubSocket::new();
        publisher.connect(&self.endpoints.frontend.endpoint()).await?;

        let mut subscriber = SubSocket::new();
        subscriber.connect(&self.endpoints.backend.endpoint()).await?;
        for topic in CLOUD_SUBSCRIPTIONS {
            subscriber.subscribe(topic).await?;
            debug!(topic, "subscribed to cloud topic");
        }

        *self.publish_socket.lock().await = Some(publisher);
        self.set_connected(true).await;
        Ok(subscriber)
    }

    /// Turn a raw socket result into a session event. Undecodable frames
    /// yield `None` and are skipped without dropping the session.
    fn classify(received: Result<ZmqMessage, zeromq::ZmqError>) -> Option<BrokerEvent> {
        let zmq_msg = match received {
            Ok(msg) => msg,
            Err(err) => {
                return Some(BrokerEvent::Disconnected(DisconnectReason::Transport(
                    err.to_string(),
                )))
            }
        };

        // Two-frame messages carry [topic, envelope]; a single frame is the
        // bare envelope.
        let frames: Vec<_> = zmq_msg.iter().collect();
        let envelope = match frames.len() {
            0 => {
                warn!("dropping empty broker frame");
                return None;
            }
            1 => frames[0].as_ref(),
            _ => frames[1].as_ref(),
        };

        match BrokerMessage::from_bytes(envelope) {
            Ok(message) => Some(BrokerEvent::Message(message)),
            Err(err) => {
                warn!(error = %err, "dropping undecodable broker frame");
                None
            }
        }
    }

    /// Process one session event. Fatal identity failure propagates as an
    /// error; everything else resolves to the next session state.
    pub async fn handle_event(
        &self,
        event: BrokerEvent,
        inbound_tx: &mpsc::Sender<(InboundRoute, BrokerMessage)>,
    ) -> Result<SessionState, BrokerError> {
        match event {
            BrokerEvent::Message(message) => {
                match InboundRoute::from_topic(&message.topic) {
                    Some(route) => {
                        if inbound_tx.send((route, message)).await.is_err() {
                            // Router side is gone; treat as shutdown.
                            return Err(BrokerError::Shutdown);
                        }
                    }
                    None => {
                        warn!(topic = %message.topic, "dropping message on unroutable topic");
                    }
                }
                Ok(SessionState::Active)
            }
            BrokerEvent::Disconnected(reason) => {
                self.handle_disconnect(reason).await?;
                Ok(SessionState::Dropped)
            }
        }
    }

    /// React to a dropped session. A not-authorized disconnect, or any
    /// disconnect while the credential is expired, forces a fresh credential
    /// before the next connection attempt; if the identity service cannot be
    /// reached across all its retries, the error is fatal.
    async fn handle_disconnect(&self, reason: DisconnectReason) -> Result<(), BrokerError> {
        self.set_connected(false).await;
        warn!(?reason, "broker connection dropped");

        if reason.is_not_authorized() || self.credentials.is_expired().await {
            info!("refreshing app credential before reconnecting to the broker");
            if let Err(err) = self.credentials.refresh().await {
                error!(error = %err, "all attempts to refresh the app credential failed");
                return Err(err);
            }
        }
        Ok(())
    }

    async fn set_connected(&self, up: bool) {
        if !up {
            *self.publish_socket.lock().await = None;
        }
        let _ = self.connected_tx.send(up);
    }

    /// Sleep for the reconnect delay. Returns `true` when shutdown was
    /// signalled during the wait.
    async fn wait_reconnect_delay(&self) -> bool {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.reconnect_delay) => false,
            _ = shutdown.changed() => true,
        }
    }

    /// Wait (bounded) until the session is up.
    async fn await_connection(&self) -> Result<(), BrokerError> {
        if *self.connected_rx.borrow() {
            return Ok(());
        }
        let mut rx = self.connected_rx.clone();
        let wait = async {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        };
        timeout(self.connect_timeout, wait)
            .await
            .map_err(|_| BrokerError::ConnectTimeout)?;
        if !*self.connected_rx.borrow() {
            return Err(BrokerError::NotConnected);
        }
        Ok(())
    }
}

/// Whether the session survived the last event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Dropped,
}

#[async_trait]
impl TaskPublisher for ConnectionManager {
    async fn publish(&self, topic: &str, payload: &[u8], qos: u8) -> Result<(), BrokerError> {
        // Await an active connection first so publishes issued during a
        // disconnect block until the session returns or the bound elapses.
        self.await_connection().await?;

        let envelope = BrokerMessage::new(topic, payload.to_vec(), qos);
        let bytes = envelope
            .to_bytes()
            .map_err(|e| BrokerError::Serialize(e.to_string()))?;

        let mut zmq_msg = ZmqMessage::from(topic);
        zmq_msg.push_back(bytes.into());

        let mut guard = self.publish_socket.lock().await;
        let socket = guard.as_mut().ok_or(BrokerError::NotConnected)?;
        socket.send(zmq_msg).await?;

        debug!(topic, qos, "published message to broker");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FakeCredentials {
        expired: AtomicBool,
        refresh_calls: AtomicU32,
        refresh_fails: bool,
    }

    impl FakeCredentials {
        fn new(expired: bool, refresh_fails: bool) -> Self {
            Self {
                expired: AtomicBool::new(expired),
                refresh_calls: AtomicU32::new(0),
                refresh_fails,
            }
        }
    }

    #[async_trait]
    impl CredentialSource for FakeCredentials {
        async fn access_token(&self) -> Result<String, BrokerError> {
            Ok("token".into())
        }

        async fn is_expired(&self) -> bool {
            self.expired.load(Ordering::SeqCst)
        }

        async fn refresh(&self) -> Result<(), BrokerError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if self.refresh_fails {
                return Err(BrokerError::CredentialRefresh("identity unreachable".into()));
            }
            self.expired.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_manager(
        credentials: Arc<FakeCredentials>,
    ) -> (ConnectionManager, watch::Sender<bool>) {
        let config = fahrplan_core::config::BrokerConfig {
            broker_type: "tcp".into(),
            host: "127.0.0.1".into(),
            port: 18990,
            keep_alive_secs: 30,
            qos: 1,
            reconnect_delay_secs: 1,
            connect_timeout_secs: 1,
        };
        let (tx, rx) = watch::channel(false);
        (ConnectionManager::new(&config, credentials, rx), tx)
    }

    #[tokio::test]
    async fn synthetic_messages_route_by_topic() {
        let creds = Arc::new(FakeCredentials::new(false, false));
        let (manager, _shutdown) = test_manager(creds);
        let (tx, mut rx) = mpsc::channel(4);

        let task_response = BrokerMessage::new(crate::topics::TASK_RESPONSES_TOPIC, vec![1], 0);
        let state = manager
            .handle_event(BrokerEvent::Message(task_response), &tx)
            .await
            .unwrap();
        assert_eq!(state, SessionState::Active);

        let device_msg = BrokerMessage::new(crate::topics::DEVICE_MESSAGES_TOPIC, vec![2], 0);
        manager
            .handle_event(BrokerEvent::Message(device_msg), &tx)
            .await
            .unwrap();

        let (route, msg) = rx.recv().await.unwrap();
        assert_eq!(route, InboundRoute::TaskResponse);
        assert_eq!(msg.payload, vec![1]);
        let (route, _) = rx.recv().await.unwrap();
        assert_eq!(route, InboundRoute::DeviceToService);
    }

    #[tokio::test]
    async fn unroutable_topics_are_dropped() {
        let (manager, _shutdown) = test_manager(Arc::new(FakeCredentials::new(false, false)));
        let (tx, mut rx) = mpsc::channel(1);

        let stray = BrokerMessage::new("v1/some-device/tasks", vec![9], 0);
        let state = manager
            .handle_event(BrokerEvent::Message(stray), &tx)
            .await
            .unwrap();
        assert_eq!(state, SessionState::Active);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn not_authorized_disconnect_refreshes_credentials() {
        let creds = Arc::new(FakeCredentials::new(false, false));
        let (manager, _shutdown) = test_manager(creds.clone());
        let (tx, _rx) = mpsc::channel(1);

        let state = manager
            .handle_event(
                BrokerEvent::Disconnected(DisconnectReason::ServerRequested(
                    DISCONNECT_NOT_AUTHORIZED,
                )),
                &tx,
            )
            .await
            .unwrap();
        assert_eq!(state, SessionState::Dropped);
        assert_eq!(creds.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_drop_with_valid_credential_skips_refresh() {
        let creds = Arc::new(FakeCredentials::new(false, false));
        let (manager, _shutdown) = test_manager(creds.clone());
        let (tx, _rx) = mpsc::channel(1);

        manager
            .handle_event(
                BrokerEvent::Disconnected(DisconnectReason::Transport("reset".into())),
                &tx,
            )
            .await
            .unwrap();
        assert_eq!(creds.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_credential_on_any_disconnect_forces_refresh() {
        let creds = Arc::new(FakeCredentials::new(true, false));
        let (manager, _shutdown) = test_manager(creds.clone());
        let (tx, _rx) = mpsc::channel(1);

        manager
            .handle_event(
                BrokerEvent::Disconnected(DisconnectReason::Transport("reset".into())),
                &tx,
            )
            .await
            .unwrap();
        assert_eq!(creds.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_identity_retries_are_fatal() {
        let creds = Arc::new(FakeCredentials::new(false, true));
        let (manager, _shutdown) = test_manager(creds);
        let (tx, _rx) = mpsc::channel(1);

        let result = manager
            .handle_event(
                BrokerEvent::Disconnected(DisconnectReason::ServerRequested(
                    DISCONNECT_NOT_AUTHORIZED,
                )),
                &tx,
            )
            .await;
        assert!(matches!(result, Err(BrokerError::CredentialRefresh(_))));
    }

    #[tokio::test]
    async fn publish_without_connection_times_out() {
        let (manager, _shutdown) = test_manager(Arc::new(FakeCredentials::new(false, false)));
        let result = manager.publish("v1/dev/tasks", b"x", 0).await;
        assert!(matches!(result, Err(BrokerError::ConnectTimeout)));
    }
}
