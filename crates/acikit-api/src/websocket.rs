//! Notification channel over the controller's WebSocket.
//!
//! The controller streams changes for every live subscription over a single
//! socket opened at `wss://<host>/socket<token>`. Subscriptions themselves
//! are registered over HTTP (`subscription=yes` queries) and must be
//! refreshed through `subscriptionRefresh` before their lifetime runs out.
//!
//! [`EventChannel`] owns the socket, the per-id refresh bookkeeping, and the
//! generation counter bumped on every (re)open. It is driven by a single
//! owner (the core crate's pump task) so it needs no internal locking.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut channel = EventChannel::new(session, Arc::new(WsConnector::new(&transport)?), ChannelConfig::default());
//! channel.ensure_open().await?;
//! let ack = channel.allocate_subscription_id("/api/class/fvTenant.json?subscription=yes").await?;
//! while let Ok(note) = channel.read_next().await {
//!     println!("{:?}: {} objects", note.subscription_ids, note.imdata.len());
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::Error;
use crate::models::{Notification, SubscriptionAck, SubscriptionId};
use crate::session::Session;
use crate::transport::TransportConfig;

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for channel reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * jitter`, never above `max`.
///
/// Jitter is +-25% to spread out reconnection storms from multiple clients.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let max = config.max_delay.as_secs_f64();
    let capped = base.min(max);

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).clamp(0.0, max);

    Duration::from_secs_f64(with_jitter)
}

// ── Socket seam ──────────────────────────────────────────────────────

/// A connected notification socket yielding text frames.
#[async_trait]
pub trait FrameStream: Send {
    /// Next text frame. `None` when the stream ended cleanly.
    async fn next_frame(&mut self) -> Option<Result<String, Error>>;

    async fn close(&mut self);
}

/// Opens notification sockets.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    async fn connect(&self, url: &Url) -> Result<Box<dyn FrameStream>, Error>;
}

/// Connector backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsConnector {
    tls: Option<Arc<rustls::ClientConfig>>,
}

impl WsConnector {
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            tls: transport.websocket_tls()?,
        })
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn FrameStream>, Error> {
        debug!(host = url.host_str().unwrap_or(""), "connecting notification socket");

        let uri: tungstenite::http::Uri = url.as_str().parse().map_err(
            |e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()),
        )?;
        let request = ClientRequestBuilder::new(uri);

        let connector = self
            .tls
            .as_ref()
            .map(|cfg| tokio_tungstenite::Connector::Rustls(Arc::clone(cfg)));
        let (stream, _response) =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
                .await
                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        Ok(Box::new(WsFrames { stream }))
    }
}

struct WsFrames {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameStream for WsFrames {
    async fn next_frame(&mut self) -> Option<Result<String, Error>> {
        loop {
            match self.stream.next().await? {
                Ok(tungstenite::Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(tungstenite::Message::Ping(_)) => {
                    // tungstenite queues the pong reply itself
                    trace!("notification socket ping");
                }
                Ok(tungstenite::Message::Close(frame)) => {
                    let (code, reason) = frame.map_or((1000, String::new()), |cf| {
                        (u16::from(cf.code), cf.reason.as_str().to_owned())
                    });
                    info!(code, reason = %reason, "notification socket close frame");
                    return Some(Err(Error::WebSocketClosed { code, reason }));
                }
                Ok(_) => {}
                Err(e) => return Some(Err(Error::WebSocketConnect(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "error closing notification socket");
        }
        // Drain so the close handshake completes.
        let _ = self.stream.flush().await;
    }
}

// ── EventChannel ─────────────────────────────────────────────────────

/// Channel tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub reconnect: ReconnectConfig,
    /// How long the controller keeps a subscription without a refresh.
    pub subscription_lifetime: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            subscription_lifetime: Duration::from_secs(60),
        }
    }
}

/// Channel-level counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub generation: u64,
    pub reconnects: u64,
    pub frames: u64,
    pub malformed_frames: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
}

/// Duplex notification channel layered on a [`Session`].
pub struct EventChannel {
    session: Arc<Session>,
    connector: Arc<dyn Connector>,
    config: ChannelConfig,
    stream: Option<Box<dyn FrameStream>>,
    refreshed: HashMap<SubscriptionId, Instant>,
    stats: ChannelStats,
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("open", &self.is_open())
            .field("subscriptions", &self.refreshed.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl EventChannel {
    pub fn new(session: Arc<Session>, connector: Arc<dyn Connector>, config: ChannelConfig) -> Self {
        Self {
            session,
            connector,
            config,
            stream: None,
            refreshed: HashMap::new(),
            stats: ChannelStats::default(),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Incremented every time the socket is (re)opened.
    pub fn generation(&self) -> u64 {
        self.stats.generation
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// Open the socket if it is not open. Returns `true` when a new
    /// generation was started.
    pub async fn ensure_open(&mut self) -> Result<bool, Error> {
        if self.stream.is_some() {
            return Ok(false);
        }
        let url = self.session.websocket_url()?;
        let stream = self.connector.connect(&url).await?;
        self.stream = Some(stream);
        self.refreshed.clear();
        self.stats.generation += 1;
        if self.stats.generation > 1 {
            self.stats.reconnects += 1;
        }
        info!(generation = self.stats.generation, "notification channel open");
        Ok(true)
    }

    /// Register `url` with the controller and return the id it assigned
    /// together with the initial snapshot.
    pub async fn allocate_subscription_id(&mut self, url: &str) -> Result<SubscriptionAck, Error> {
        if self.stream.is_none() {
            return Err(Error::ChannelClosed);
        }
        let resp = self.session.get(url).await?.error_for_status()?;
        let ack: SubscriptionAck =
            serde_json::from_value(resp.json.clone()).map_err(|e| Error::Deserialization {
                message: format!("subscription response: {e}"),
                body: resp.text.clone(),
            })?;
        debug!(id = %ack.id, url, snapshot = ack.imdata.len(), "subscription registered");
        self.refreshed.insert(ack.id.clone(), Instant::now());
        Ok(ack)
    }

    /// Extend the controller-side lifetime of `id`.
    ///
    /// On failure the id is de-listed; the caller should treat the channel
    /// as broken and reconnect.
    pub async fn refresh(&mut self, id: &SubscriptionId) -> Result<(), Error> {
        let path = format!("/api/subscriptionRefresh.json?id={id}");
        let result = match self.session.get(&path).await {
            Ok(resp) => resp.error_for_status().map(|_| ()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                trace!(%id, "subscription refreshed");
                self.stats.refreshes += 1;
                self.refreshed.insert(id.clone(), Instant::now());
                Ok(())
            }
            Err(e) => {
                warn!(%id, error = %e, "subscription refresh failed");
                self.stats.refresh_failures += 1;
                self.refreshed.remove(id);
                Err(e)
            }
        }
    }

    /// How often the owner should check for due refreshes.
    pub fn refresh_tick(&self) -> Duration {
        (self.config.subscription_lifetime / 8).max(Duration::from_millis(10))
    }

    /// Ids whose last refresh is at least a quarter-lifetime old. With
    /// checks every [`refresh_tick`](Self::refresh_tick) each id is
    /// refreshed before half its lifetime has elapsed.
    pub fn due_refreshes(&self, now: Instant) -> Vec<SubscriptionId> {
        let threshold = self.config.subscription_lifetime / 4;
        let mut due: Vec<SubscriptionId> = self
            .refreshed
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) >= threshold)
            .map(|(id, _)| id.clone())
            .collect();
        due.sort();
        due
    }

    /// Stop refreshing `id`; the controller expires it on its own.
    pub fn forget(&mut self, id: &SubscriptionId) {
        self.refreshed.remove(id);
    }

    pub fn live_ids(&self) -> usize {
        self.refreshed.len()
    }

    /// Read the next notification. Malformed frames are logged and skipped.
    pub async fn read_next(&mut self) -> Result<Notification, Error> {
        loop {
            let stream = self.stream.as_mut().ok_or(Error::ChannelClosed)?;
            match stream.next_frame().await {
                Some(Ok(text)) => {
                    self.stats.frames += 1;
                    match Notification::parse(&text) {
                        Ok(note) => return Ok(note),
                        Err(e) => {
                            self.stats.malformed_frames += 1;
                            debug!(error = %e, "skipping malformed notification frame");
                        }
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Err(Error::ChannelClosed),
            }
        }
    }

    /// Close the socket and forget all refresh bookkeeping.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close().await;
            debug!(generation = self.stats.generation, "notification channel closed");
        }
        self.refreshed.clear();
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, &self.config.reconnect)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::Credentials;
    use crate::mock::{MockConnector, MockDispatcher};
    use serde_json::json;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_never_exceeds_cap() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        };
        for attempt in 0..64 {
            assert!(calculate_backoff(attempt, &config) <= Duration::from_secs(10));
        }
    }

    async fn open_channel() -> (EventChannel, Arc<MockDispatcher>, Arc<MockConnector>) {
        let mock = Arc::new(MockDispatcher::new());
        mock.on_login("T1", 300);
        let session = Arc::new(Session::with_dispatcher(
            Url::parse("https://c.example/").unwrap(),
            Credentials::password("admin", "p"),
            mock.clone(),
        ));
        session.login().await.unwrap();
        let connector = Arc::new(MockConnector::new());
        let channel = EventChannel::new(session, connector.clone(), ChannelConfig::default());
        (channel, mock, connector)
    }

    #[tokio::test]
    async fn ensure_open_bumps_generation_once() {
        let (mut channel, _mock, connector) = open_channel().await;
        assert!(channel.ensure_open().await.unwrap());
        assert!(!channel.ensure_open().await.unwrap());
        assert_eq!(channel.generation(), 1);
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(connector.urls()[0].as_str(), "wss://c.example/socketT1");
    }

    #[tokio::test]
    async fn allocate_requires_open_channel() {
        let (mut channel, _mock, _connector) = open_channel().await;
        let err = channel
            .allocate_subscription_id("/api/class/fvTenant.json?subscription=yes")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChannelClosed));
    }

    #[tokio::test]
    async fn allocate_records_refresh_time() {
        let (mut channel, mock, _connector) = open_channel().await;
        mock.respond_json(
            crate::dispatch::Method::Get,
            "/api/class/fvTenant.json?subscription=yes",
            json!({ "subscriptionId": "1001", "imdata": [] }),
        );
        channel.ensure_open().await.unwrap();
        let ack = channel
            .allocate_subscription_id("/api/class/fvTenant.json?subscription=yes")
            .await
            .unwrap();
        assert_eq!(ack.id, SubscriptionId::from("1001"));
        assert_eq!(channel.live_ids(), 1);

        let later = Instant::now() + Duration::from_secs(20);
        assert_eq!(channel.due_refreshes(later), vec![SubscriptionId::from("1001")]);
        assert!(channel.due_refreshes(Instant::now()).is_empty());
    }

    #[tokio::test]
    async fn failed_refresh_delists_id() {
        let (mut channel, mock, _connector) = open_channel().await;
        mock.respond_json(
            crate::dispatch::Method::Get,
            "/api/class/fvTenant.json?subscription=yes",
            json!({ "subscriptionId": "1001", "imdata": [] }),
        );
        mock.respond(
            crate::dispatch::Method::Get,
            "/api/subscriptionRefresh.json?id=1001",
            400,
            json!({ "imdata": [{ "error": { "attributes": { "code": "400", "text": "unknown id" }}}]}),
        );
        channel.ensure_open().await.unwrap();
        let ack = channel
            .allocate_subscription_id("/api/class/fvTenant.json?subscription=yes")
            .await
            .unwrap();

        assert!(channel.refresh(&ack.id).await.is_err());
        assert_eq!(channel.live_ids(), 0);
        assert_eq!(channel.stats().refresh_failures, 1);
    }

    #[tokio::test]
    async fn read_next_skips_malformed_frames() {
        let (mut channel, _mock, connector) = open_channel().await;
        channel.ensure_open().await.unwrap();

        connector.send_raw("garbage");
        connector.send_frame(&json!({ "subscriptionId": ["1001"], "imdata": [] }));

        let note = channel.read_next().await.unwrap();
        assert_eq!(note.subscription_ids, vec![SubscriptionId::from("1001")]);
        assert_eq!(channel.stats().malformed_frames, 1);
        assert_eq!(channel.stats().frames, 2);
    }

    #[tokio::test]
    async fn dropped_socket_surfaces_error_and_reopen_is_new_generation() {
        let (mut channel, _mock, connector) = open_channel().await;
        channel.ensure_open().await.unwrap();

        connector.drop_connection();
        assert!(channel.read_next().await.is_err());

        channel.close().await;
        assert!(!channel.is_open());
        assert!(channel.ensure_open().await.unwrap());
        assert_eq!(channel.generation(), 2);
        assert_eq!(channel.stats().reconnects, 1);
    }
}
