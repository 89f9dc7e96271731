// ── Controller abstraction ──
//
// Lifecycle of one fabric controller connection: authentication, the
// subscription pump, graph-building queries and pushes. Everything the
// application needs goes through here; the wire types stay in acikit-api.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use acikit_api::websocket::{ChannelConfig, Connector, EventChannel, WsConnector};
use acikit_api::{
    ClassQuery, Clock, Dispatcher, MoQuery, QueryTarget, Response, RspSubtree, Session,
    query::mo_path,
};

use crate::config::ControllerConfig;
use crate::error::CoreError;
use crate::event::SubscriptionEvent;
use crate::graph::{BuildReport, Graph, NodeId};
use crate::registry::Registry;
use crate::subscription::{Multiplexer, MuxStats, SubscriptionHandle};

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

// ── Seams ────────────────────────────────────────────────────────────

/// Replacements for the network edges, mainly for tests.
#[derive(Debug, Clone, Default)]
pub struct Seams {
    pub dispatcher: Option<Arc<dyn Dispatcher>>,
    pub connector: Option<Arc<dyn Connector>>,
    pub clock: Option<Arc<dyn Clock>>,
}

// ── Query results ────────────────────────────────────────────────────

/// A freshly built graph and how the build went.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub graph: Graph,
    pub report: BuildReport,
}

impl Snapshot {
    /// Top-level nodes of the response, in response order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.report.nodes
    }
}

/// Options for [`Controller::get_deep`].
#[derive(Debug, Clone)]
pub struct DeepQuery {
    /// Only instantiate these classes below the root (empty = all).
    pub limit_to: Vec<String>,
    pub subtree: RspSubtree,
    /// Ask the controller for configurable attributes only.
    pub config_only: bool,
}

impl Default for DeepQuery {
    fn default() -> Self {
        Self {
            limit_to: Vec::new(),
            subtree: RspSubtree::Full,
            config_only: false,
        }
    }
}

// ── Controller ───────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Call
/// [`connect`](Self::connect) before anything else.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ControllerConfig,
    registry: Arc<Registry>,
    seams: Seams,
    connection_state: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
    /// Child token for the current connection, replaced on reconnect.
    cancel_child: Mutex<CancellationToken>,
    session: ArcSwapOption<Session>,
    mux: ArcSwapOption<Multiplexer>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("url", &self.inner.config.url.as_str())
            .field("state", &*self.inner.connection_state.borrow())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Create a controller with the built-in classes. Does NOT connect.
    pub fn new(config: ControllerConfig) -> Self {
        Self::with_registry(config, Registry::with_defaults())
    }

    pub fn with_registry(config: ControllerConfig, registry: Registry) -> Self {
        Self::with_seams(config, registry, Seams::default())
    }

    pub fn with_seams(config: ControllerConfig, registry: Registry, seams: Seams) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();
        Self {
            inner: Arc::new(ControllerInner {
                config,
                registry: Arc::new(registry),
                seams,
                connection_state: Arc::new(connection_state),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                session: ArcSwapOption::empty(),
                mux: ArcSwapOption::empty(),
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// An empty graph sharing this controller's registry.
    pub fn new_graph(&self) -> Graph {
        Graph::new(Arc::clone(&self.inner.registry))
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Log in and, when subscriptions are enabled, start the pump. The
    /// notification socket itself opens on the first subscribe.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Connecting);

        match self.start().await {
            Ok(()) => {
                let _ = self.inner.connection_state.send(ConnectionState::Connected);
                info!(url = %self.inner.config.url, "connected");
                Ok(())
            }
            Err(e) => {
                let _ = self.inner.connection_state.send(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    async fn start(&self) -> Result<(), CoreError> {
        let config = &self.inner.config;
        let seams = &self.inner.seams;

        // Fresh child token for this connection (supports reconnect).
        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();

        let credentials = config.auth.to_credentials()?;
        let transport = config.transport();
        let session = match &seams.dispatcher {
            Some(dispatcher) => {
                Session::with_dispatcher(config.url.clone(), credentials, Arc::clone(dispatcher))
            }
            None => Session::new(config.url.clone(), credentials, transport.clone())?,
        };
        let mut session = session.refresh_guard(config.refresh_guard);
        if let Some(clock) = &seams.clock {
            session = session.clock(Arc::clone(clock));
        }
        let session = Arc::new(session);

        session.login().await?;
        debug!(login = config.auth.login(), "authenticated");
        self.inner.session.store(Some(Arc::clone(&session)));

        if config.subscription_enabled {
            let connector: Arc<dyn Connector> = match &seams.connector {
                Some(c) => Arc::clone(c),
                None => Arc::new(WsConnector::new(&transport)?),
            };
            let channel = EventChannel::new(
                session,
                connector,
                ChannelConfig {
                    reconnect: config.reconnect.clone(),
                    subscription_lifetime: config.subscription_lifetime,
                },
            );
            let mux = Multiplexer::start(
                channel,
                Arc::clone(&self.inner.connection_state),
                config.queue_capacity,
                child,
            );
            self.inner.mux.store(Some(Arc::new(mux)));
        }
        Ok(())
    }

    /// Stop the pump, log out and reset to
    /// [`Disconnected`](ConnectionState::Disconnected).
    pub async fn disconnect(&self) {
        self.inner.cancel_child.lock().await.cancel();

        if let Some(mux) = self.inner.mux.swap(None) {
            mux.shutdown().await;
        }
        if let Some(session) = self.inner.session.swap(None) {
            if let Err(e) = session.logout().await {
                warn!(error = %e, "logout failed (non-fatal)");
            }
        }

        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    /// One-shot: connect without subscriptions, run closure, disconnect.
    pub async fn oneshot<F, Fut, T>(config: ControllerConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Controller) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut cfg = config;
        cfg.subscription_enabled = false;

        let controller = Controller::new(cfg);
        controller.connect().await?;
        let result = f(controller.clone()).await;
        controller.disconnect().await;
        result
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// The authenticated session, for raw requests.
    pub fn session(&self) -> Result<Arc<Session>, CoreError> {
        self.inner
            .session
            .load_full()
            .ok_or(CoreError::ControllerDisconnected)
    }

    fn mux(&self) -> Result<Arc<Multiplexer>, CoreError> {
        if !self.inner.config.subscription_enabled {
            return Err(CoreError::SubscriptionsDisabled);
        }
        self.inner
            .mux
            .load_full()
            .ok_or(CoreError::ControllerDisconnected)
    }

    // ── Graph building ───────────────────────────────────────────────

    /// Every object of `class_name` (`query-target=self`), each placed
    /// under implicit ancestors derived from its DN.
    pub async fn get_class(&self, class_name: &str) -> Result<Snapshot, CoreError> {
        let path = ClassQuery::new(class_name)
            .target(QueryTarget::SelfOnly)
            .path();
        let mut graph = self.new_graph();
        let report = self.fetch_into(&mut graph, &path, None, &[]).await?;
        Ok(Snapshot { graph, report })
    }

    /// The object at `dn` with its subtree.
    pub async fn get_deep(&self, dn: &str, query: &DeepQuery) -> Result<Snapshot, CoreError> {
        let mut mo = MoQuery::new(dn)
            .rsp_subtree(query.subtree)
            .config_only(query.config_only);
        for class in &query.limit_to {
            mo = mo.rsp_subtree_class(class.as_str());
        }
        let limit: Vec<&str> = query.limit_to.iter().map(String::as_str).collect();

        let mut graph = self.new_graph();
        let report = self.fetch_into(&mut graph, &mo.path(), None, &limit).await?;
        if report.nodes.is_empty() && report.errors.is_empty() {
            return Err(CoreError::NotFound {
                identifier: dn.to_owned(),
            });
        }
        Ok(Snapshot { graph, report })
    }

    /// Every object of `class_name`, each with its subtree.
    pub async fn get_class_deep(
        &self,
        class_name: &str,
        query: &DeepQuery,
    ) -> Result<Snapshot, CoreError> {
        let mut cq = ClassQuery::new(class_name)
            .rsp_subtree(query.subtree)
            .config_only(query.config_only);
        for class in &query.limit_to {
            cq = cq.rsp_subtree_class(class.as_str());
        }
        let limit: Vec<&str> = query.limit_to.iter().map(String::as_str).collect();

        let mut graph = self.new_graph();
        let report = self.fetch_into(&mut graph, &cq.path(), None, &limit).await?;
        Ok(Snapshot { graph, report })
    }

    /// Run `path` and build the response into `graph`.
    ///
    /// The graph is only touched after the response has arrived, so a
    /// cancelled or timed-out call leaves it unchanged. A non-empty
    /// `limit_to` restricts descendants; the response's own top-level
    /// classes are always built.
    pub async fn fetch_into(
        &self,
        graph: &mut Graph,
        path: &str,
        parent: Option<NodeId>,
        limit_to: &[&str],
    ) -> Result<BuildReport, CoreError> {
        let session = self.session()?;
        let imdata = session.get_imdata(path).await?;

        let mut allowed: Vec<&str> = limit_to.to_vec();
        if !allowed.is_empty() {
            for fragment in &imdata.imdata {
                if let Some(class) = fragment.as_object().and_then(|o| o.keys().next()) {
                    if !allowed.contains(&class.as_str()) {
                        allowed.push(class.as_str());
                    }
                }
            }
        }

        let report = graph.build(&imdata.imdata, parent, &allowed);
        debug!(
            path,
            created = report.created,
            errors = report.errors.len(),
            skipped = report.skipped.len(),
            "built graph from response"
        );
        Ok(report)
    }

    // ── Push ─────────────────────────────────────────────────────────

    /// POST `id` and its subtree under its parent's DN (or `uni`).
    ///
    /// A response the controller rejected is returned, not raised; on
    /// success the caller may [`Graph::clear_pushed`].
    pub async fn push(&self, graph: &Graph, id: NodeId) -> Result<Response, CoreError> {
        let node = graph.node(id);
        let parent_dn = match node.parent() {
            Some(p) => graph.dn(p).to_owned(),
            None => node.class().root_dn().unwrap_or("uni").to_owned(),
        };
        self.push_json(&parent_dn, &graph.get_json(id)).await
    }

    /// POST a prebuilt body to `/api/mo/<parent_dn>.json`.
    pub async fn push_json(&self, parent_dn: &str, body: &Value) -> Result<Response, CoreError> {
        let session = self.session()?;
        let resp = session.push(&mo_path(parent_dn), body).await?;
        if !resp.is_ok() {
            warn!(status = resp.status, parent_dn, "push rejected");
        }
        Ok(resp)
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Subscribe to every object of `class_name`.
    pub async fn subscribe_class(
        &self,
        class_name: &str,
        only_new: bool,
    ) -> Result<SubscriptionHandle, CoreError> {
        self.subscribe(&ClassQuery::new(class_name).path(), only_new)
            .await
    }

    /// Subscribe to the object at `dn`.
    pub async fn subscribe_instance(
        &self,
        dn: &str,
        only_new: bool,
    ) -> Result<SubscriptionHandle, CoreError> {
        self.subscribe(&MoQuery::new(dn).path(), only_new).await
    }

    pub async fn subscribe(&self, url: &str, only_new: bool) -> Result<SubscriptionHandle, CoreError> {
        self.mux()?.subscribe(url, only_new).await
    }

    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), CoreError> {
        self.mux()?.unsubscribe(handle).await
    }

    pub fn has_events(&self, handle: SubscriptionHandle) -> bool {
        self.mux().is_ok_and(|m| m.has_events(handle))
    }

    pub fn pop_event(&self, handle: SubscriptionHandle) -> Option<SubscriptionEvent> {
        self.mux().ok()?.pop_event(handle)
    }

    pub async fn next_event(
        &self,
        handle: SubscriptionHandle,
        timeout: Duration,
    ) -> Result<SubscriptionEvent, CoreError> {
        self.mux()?.next_event(handle, timeout).await
    }

    pub fn is_subscribed(&self, url: &str) -> bool {
        self.mux().is_ok_and(|m| m.is_subscribed(url))
    }

    /// Pop every queued event and merge the object events into `graph`.
    /// Events that cannot be mapped are counted by the graph and skipped.
    pub fn apply_pending(
        &self,
        handle: SubscriptionHandle,
        graph: &mut Graph,
    ) -> Vec<SubscriptionEvent> {
        let mut drained = Vec::new();
        while let Some(event) = self.pop_event(handle) {
            if let SubscriptionEvent::Object(ref mo) = event {
                let _ = graph.apply_event(mo);
            }
            drained.push(event);
        }
        drained
    }

    pub fn stats(&self) -> Option<MuxStats> {
        self.mux().ok().map(|m| m.stats())
    }
}
