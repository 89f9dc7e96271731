// ── Subscription multiplexer ──
//
// Maps query URLs to subscription slots and controller-assigned ids to the
// slot whose queue receives their events. A single pump task owns the
// notification channel: it registers URLs, refreshes ids before they
// expire, reads frames and dispatches them, and replays every slot after a
// reconnect. Application tasks talk to the pump through a command channel
// and read events straight from the slot queues.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use acikit_api::query::with_subscription;
use acikit_api::websocket::{ChannelStats, EventChannel};
use acikit_api::{Notification, SubscriptionId};

use crate::controller::ConnectionState;
use crate::error::CoreError;
use crate::event::{MoEvent, SubscriptionEvent};

const COMMAND_CHANNEL_SIZE: usize = 64;

type ApiError = acikit_api::Error;

// ── Public types ─────────────────────────────────────────────────────

/// Opaque handle returned by [`Multiplexer::subscribe`]. Subscribing the
/// same URL twice yields the same handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SubscriptionState {
    New,
    Registering,
    Live,
    /// Channel reconnected; waiting for the URL to be registered again.
    Replaying,
    Closed,
}

/// Counters across the channel and every subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxStats {
    pub channel: ChannelStats,
    pub subscriptions: usize,
    /// Events queued for consumers.
    pub events: u64,
    /// Frames naming a subscription id no slot holds.
    pub unknown_ids: u64,
    /// Fragments that could not be read as an object event.
    pub malformed_fragments: u64,
    /// Events discarded because a queue was full.
    pub overflowed: u64,
}

// ── Slots ────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Slot {
    handle: SubscriptionHandle,
    url: String,
    only_new: bool,
    capacity: usize,
    inner: Mutex<SlotState>,
    notify: Notify,
}

#[derive(Debug)]
struct SlotState {
    refcount: usize,
    state: SubscriptionState,
    ids: Vec<SubscriptionId>,
    queue: VecDeque<SubscriptionEvent>,
    /// Why registration failed, handed to every waiting subscriber.
    failure: Option<CoreError>,
}

impl Slot {
    fn state(&self) -> SubscriptionState {
        self.inner.lock().state
    }

    /// Move to `state` unless the slot was closed meanwhile.
    fn advance(&self, state: SubscriptionState) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == SubscriptionState::Closed {
            return false;
        }
        inner.state = state;
        drop(inner);
        self.notify.notify_waiters();
        true
    }

    /// Wait until registration has settled. Live and replaying slots are
    /// usable; a closed slot reports why it never became live.
    async fn settled(&self) -> Result<(), CoreError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let inner = self.inner.lock();
                match inner.state {
                    SubscriptionState::New | SubscriptionState::Registering => {}
                    SubscriptionState::Live | SubscriptionState::Replaying => return Ok(()),
                    SubscriptionState::Closed => {
                        return Err(inner
                            .failure
                            .clone()
                            .unwrap_or(CoreError::ControllerDisconnected));
                    }
                }
            }
            notified.await;
        }
    }

    /// Append an event, dropping the oldest when full. Returns `false` if
    /// an event had to be dropped.
    fn push(&self, event: SubscriptionEvent) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == SubscriptionState::Closed {
            return true;
        }
        let mut fit = true;
        if inner.queue.len() >= self.capacity {
            inner.queue.pop_front();
            fit = false;
            warn!(url = %self.url, capacity = self.capacity, "subscription queue full, dropping oldest event");
        }
        inner.queue.push_back(event);
        drop(inner);
        self.notify.notify_waiters();
        fit
    }

    fn pop(&self) -> Option<SubscriptionEvent> {
        self.inner.lock().queue.pop_front()
    }

    fn close(&self) -> Vec<SubscriptionId> {
        let mut inner = self.inner.lock();
        inner.state = SubscriptionState::Closed;
        inner.queue.clear();
        let ids = std::mem::take(&mut inner.ids);
        drop(inner);
        self.notify.notify_waiters();
        ids
    }
}

#[derive(Debug, Default)]
struct Tables {
    by_url: HashMap<String, Arc<Slot>>,
    by_handle: HashMap<SubscriptionHandle, Arc<Slot>>,
    by_id: HashMap<SubscriptionId, Arc<Slot>>,
}

impl Tables {
    fn remove(&mut self, slot: &Slot, ids: &[SubscriptionId]) {
        // A newer slot may already hold the URL.
        if self.by_url.get(&slot.url).is_some_and(|s| s.handle == slot.handle) {
            self.by_url.remove(&slot.url);
        }
        self.by_handle.remove(&slot.handle);
        for id in ids {
            self.by_id.remove(id);
        }
    }

    fn open_slots(&self) -> Vec<Arc<Slot>> {
        let mut slots: Vec<Arc<Slot>> = self
            .by_handle
            .values()
            .filter(|s| s.state() != SubscriptionState::Closed)
            .cloned()
            .collect();
        slots.sort_by_key(|s| s.handle);
        slots
    }
}

#[derive(Debug, Default)]
struct Counters {
    events: AtomicU64,
    unknown_ids: AtomicU64,
    malformed_fragments: AtomicU64,
    overflowed: AtomicU64,
}

#[derive(Debug)]
struct MuxShared {
    tables: Mutex<Tables>,
    next_handle: AtomicU64,
    capacity: usize,
    counters: Counters,
    channel_stats: ArcSwap<ChannelStats>,
}

impl MuxShared {
    fn slot(&self, handle: SubscriptionHandle) -> Option<Arc<Slot>> {
        self.tables.lock().by_handle.get(&handle).cloned()
    }

    fn enqueue(&self, slot: &Slot, event: SubscriptionEvent) {
        self.counters.events.fetch_add(1, Ordering::Relaxed);
        if !slot.push(event) {
            self.counters.overflowed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a fresh registration and queue its snapshot. Returns `false`
    /// when the slot was closed while the controller was answering.
    fn activate(&self, slot: &Arc<Slot>, id: SubscriptionId, snapshot: &[Value]) -> bool {
        {
            let mut tables = self.tables.lock();
            let mut inner = slot.inner.lock();
            if inner.state == SubscriptionState::Closed {
                return false;
            }
            tables.by_id.insert(id.clone(), Arc::clone(slot));
            inner.ids = vec![id];
        }
        if !slot.only_new {
            for fragment in snapshot {
                match MoEvent::snapshot(fragment) {
                    Some(event) => self.enqueue(slot, SubscriptionEvent::Object(event)),
                    None => {
                        self.counters.malformed_fragments.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        slot.advance(SubscriptionState::Live)
    }

    /// Close a slot whose registration failed and record why.
    fn fail(&self, slot: &Slot, err: CoreError) {
        let mut tables = self.tables.lock();
        slot.inner.lock().failure = Some(err);
        let ids = slot.close();
        tables.remove(slot, &ids);
    }

    /// Drop one reference. Returns the ids to release when it was the last.
    fn release(&self, slot: &Slot) -> Option<Vec<SubscriptionId>> {
        let mut tables = self.tables.lock();
        let remaining = {
            let mut inner = slot.inner.lock();
            inner.refcount = inner.refcount.saturating_sub(1);
            inner.refcount
        };
        if remaining > 0 {
            debug!(handle = %slot.handle, remaining, "subscription still shared");
            return None;
        }
        let ids = slot.close();
        tables.remove(slot, &ids);
        debug!(handle = %slot.handle, url = %slot.url, "subscription closed");
        Some(ids)
    }
}

// ── Commands ─────────────────────────────────────────────────────────

enum MuxCommand {
    Register {
        slot: Arc<Slot>,
    },
    Release {
        ids: Vec<SubscriptionId>,
    },
}

// ── Multiplexer ──────────────────────────────────────────────────────

/// Subscription registry plus the background pump that feeds it.
///
/// All methods are safe to call concurrently with the pump and with each
/// other. Each subscription queue is FIFO.
#[derive(Debug)]
pub struct Multiplexer {
    shared: Arc<MuxShared>,
    command_tx: mpsc::Sender<MuxCommand>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MuxCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register { slot } => write!(f, "Register({})", slot.url),
            Self::Release { ids } => write!(f, "Release({} ids)", ids.len()),
        }
    }
}

impl Multiplexer {
    /// Spawn the pump over `channel`. The pump stops when `cancel` fires or
    /// on [`shutdown`](Self::shutdown).
    pub fn start(
        channel: EventChannel,
        state: Arc<watch::Sender<ConnectionState>>,
        queue_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        let shared = Arc::new(MuxShared {
            tables: Mutex::new(Tables::default()),
            next_handle: AtomicU64::new(1),
            capacity: queue_capacity.max(1),
            counters: Counters::default(),
            channel_stats: ArcSwap::from_pointee(channel.stats()),
        });
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let pump = Pump {
            channel,
            shared: Arc::clone(&shared),
            commands: command_rx,
            state,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(pump.run());
        Self {
            shared,
            command_tx,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Register interest in `url`. The URL is canonicalized first (see
    /// [`with_subscription`]), so parameter order does not matter.
    ///
    /// The first subscriber waits until the controller has acknowledged the
    /// URL; with `only_new = false` the initial snapshot is queued as
    /// `created` events before anything else. Further subscribers of the
    /// same URL share the handle and bump its reference count; while the
    /// first registration is still in flight they wait for it and share its
    /// outcome. Dropping the returned future before it resolves gives the
    /// reference back.
    pub async fn subscribe(&self, url: &str, only_new: bool) -> Result<SubscriptionHandle, CoreError> {
        let url = with_subscription(url);

        let (slot, fresh) = {
            let mut tables = self.shared.tables.lock();
            let existing = tables
                .by_url
                .get(&url)
                .filter(|s| s.state() != SubscriptionState::Closed)
                .cloned();
            if let Some(existing) = existing {
                existing.inner.lock().refcount += 1;
                debug!(%url, handle = %existing.handle, "sharing existing subscription");
                (existing, false)
            } else {
                let handle = SubscriptionHandle(self.shared.next_handle.fetch_add(1, Ordering::Relaxed));
                let slot = Arc::new(Slot {
                    handle,
                    url: url.clone(),
                    only_new,
                    capacity: self.shared.capacity,
                    inner: Mutex::new(SlotState {
                        refcount: 1,
                        state: SubscriptionState::New,
                        ids: Vec::new(),
                        queue: VecDeque::new(),
                        failure: None,
                    }),
                    notify: Notify::new(),
                });
                tables.by_url.insert(url.clone(), Arc::clone(&slot));
                tables.by_handle.insert(handle, Arc::clone(&slot));
                (slot, true)
            }
        };

        let mut pending = PendingRef {
            shared: Arc::clone(&self.shared),
            command_tx: self.command_tx.clone(),
            slot: Arc::clone(&slot),
            armed: true,
        };
        if fresh {
            let sent = self
                .command_tx
                .send(MuxCommand::Register {
                    slot: Arc::clone(&slot),
                })
                .await;
            if sent.is_err() {
                self.shared.fail(&slot, CoreError::ControllerDisconnected);
            }
        }

        let result = slot.settled().await;
        pending.armed = false;
        match result {
            Ok(()) => Ok(slot.handle),
            Err(e) => {
                debug!(%url, error = %e, "subscribe failed");
                Err(e)
            }
        }
    }

    /// Drop one reference to `handle`. The last reference closes the
    /// subscription, discards queued events and stops refreshing its ids.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), CoreError> {
        let slot = self
            .shared
            .slot(handle)
            .ok_or_else(|| CoreError::UnknownSubscription {
                url: handle.to_string(),
            })?;
        let Some(ids) = self.shared.release(&slot) else {
            return Ok(());
        };

        // The pump may already be gone; the slot is closed either way.
        let _ = self.command_tx.send(MuxCommand::Release { ids }).await;
        Ok(())
    }

    pub fn has_events(&self, handle: SubscriptionHandle) -> bool {
        self.shared
            .slot(handle)
            .is_some_and(|s| !s.inner.lock().queue.is_empty())
    }

    /// Next queued event, or `None` if the queue is empty or the handle
    /// is not subscribed.
    pub fn pop_event(&self, handle: SubscriptionHandle) -> Option<SubscriptionEvent> {
        self.shared.slot(handle)?.pop()
    }

    /// Wait up to `timeout` for the next event.
    pub async fn next_event(
        &self,
        handle: SubscriptionHandle,
        timeout: Duration,
    ) -> Result<SubscriptionEvent, CoreError> {
        let slot = self
            .shared
            .slot(handle)
            .ok_or_else(|| CoreError::UnknownSubscription {
                url: handle.to_string(),
            })?;

        let wait = async {
            loop {
                let notified = slot.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if let Some(event) = slot.pop() {
                    return Ok(event);
                }
                if slot.state() == SubscriptionState::Closed {
                    return Err(CoreError::UnknownSubscription {
                        url: slot.url.clone(),
                    });
                }
                notified.await;
            }
        };
        crate::deadline::within(timeout, wait).await
    }

    /// Whether `url` currently has an open subscription.
    pub fn is_subscribed(&self, url: &str) -> bool {
        self.shared
            .tables
            .lock()
            .by_url
            .get(&with_subscription(url))
            .is_some_and(|s| s.state() != SubscriptionState::Closed)
    }

    pub fn state(&self, handle: SubscriptionHandle) -> Option<SubscriptionState> {
        self.shared.slot(handle).map(|s| s.state())
    }

    /// Canonical URL behind `handle`.
    pub fn url(&self, handle: SubscriptionHandle) -> Option<String> {
        self.shared.slot(handle).map(|s| s.url.clone())
    }

    pub fn stats(&self) -> MuxStats {
        let counters = &self.shared.counters;
        MuxStats {
            channel: **self.shared.channel_stats.load(),
            subscriptions: self.shared.tables.lock().by_handle.len(),
            events: counters.events.load(Ordering::Relaxed),
            unknown_ids: counters.unknown_ids.load(Ordering::Relaxed),
            malformed_fragments: counters.malformed_fragments.load(Ordering::Relaxed),
            overflowed: counters.overflowed.load(Ordering::Relaxed),
        }
    }

    /// Stop the pump, close the channel and every subscription.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One reference taken by [`Multiplexer::subscribe`] that has not been
/// handed to the caller yet.
struct PendingRef {
    shared: Arc<MuxShared>,
    command_tx: mpsc::Sender<MuxCommand>,
    slot: Arc<Slot>,
    armed: bool,
}

impl Drop for PendingRef {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(ids) = self.shared.release(&self.slot) {
            debug!(url = %self.slot.url, "subscribe abandoned before it settled");
            if let Err(e) = self.command_tx.try_send(MuxCommand::Release { ids }) {
                warn!(error = %e, "could not hand abandoned subscription back to the pump");
            }
        }
    }
}

// ── Pump ─────────────────────────────────────────────────────────────

struct Pump {
    channel: EventChannel,
    shared: Arc<MuxShared>,
    commands: mpsc::Receiver<MuxCommand>,
    state: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
}

enum Outcome {
    Continue,
    Stop,
}

impl Pump {
    async fn run(mut self) {
        let mut refresh = tokio::time::interval(self.channel.refresh_tick());
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        refresh.tick().await;

        loop {
            let open = self.channel.is_open();
            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Outcome::Stop,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => {
                        self.handle_command(cmd).await;
                        Outcome::Continue
                    }
                    None => Outcome::Stop,
                },
                _ = refresh.tick(), if open => self.refresh_due().await,
                note = self.channel.read_next(), if open => match note {
                    Ok(note) => {
                        self.dispatch(&note);
                        Outcome::Continue
                    }
                    Err(e) => self.reconnect(&e).await,
                },
            };
            self.publish_stats();
            if matches!(outcome, Outcome::Stop) {
                break;
            }
        }

        self.channel.close().await;
        let slots = self.shared.tables.lock().open_slots();
        for slot in slots {
            slot.close();
        }
        self.publish_stats();
        debug!("subscription pump stopped");
    }

    fn publish_stats(&self) {
        self.shared.channel_stats.store(Arc::new(self.channel.stats()));
    }

    async fn handle_command(&mut self, cmd: MuxCommand) {
        match cmd {
            MuxCommand::Register { slot } => self.register(&slot).await,
            MuxCommand::Release { ids } => {
                for id in &ids {
                    self.channel.forget(id);
                }
                if self.shared.tables.lock().by_handle.is_empty() && self.channel.is_open() {
                    info!("last subscription released, closing notification channel");
                    self.channel.close().await;
                }
            }
        }
    }

    /// Register a new slot and settle it: live on success, closed with the
    /// failure recorded otherwise. Abandoned slots are skipped.
    async fn register(&mut self, slot: &Arc<Slot>) {
        if !slot.advance(SubscriptionState::Registering) {
            debug!(url = %slot.url, "subscribe abandoned, skipping registration");
            return;
        }
        if let Err(e) = self.try_register(slot).await {
            warn!(url = %slot.url, error = %e, "subscription failed");
            self.shared.fail(slot, e.into());
        }
    }

    async fn try_register(&mut self, slot: &Arc<Slot>) -> Result<(), ApiError> {
        self.open().await?;
        let ack = self.channel.allocate_subscription_id(&slot.url).await?;
        if self.shared.activate(slot, ack.id.clone(), &ack.imdata) {
            info!(url = %slot.url, id = %ack.id, "subscribed");
        } else {
            debug!(url = %slot.url, id = %ack.id, "subscribe abandoned during registration");
            self.channel.forget(&ack.id);
        }
        Ok(())
    }

    /// Open the channel if needed. A new generation re-registers every
    /// slot waiting for replay.
    async fn open(&mut self) -> Result<(), ApiError> {
        self.authenticate().await?;
        let opened = match self.channel.ensure_open().await {
            Err(e) if e.is_auth_expired() => {
                warn!(error = %e, "notification channel refused the token, logging in again");
                self.channel.session().login().await?;
                self.channel.ensure_open().await?
            }
            other => other?,
        };
        if opened {
            self.replay().await?;
        }
        Ok(())
    }

    /// The socket URL carries the token, so it must be current before
    /// every connect.
    async fn authenticate(&mut self) -> Result<(), ApiError> {
        let session = self.channel.session();
        match session.ensure_fresh().await {
            Err(e) if e.is_auth_expired() => {
                warn!(error = %e, "token refresh failed, logging in again");
                session.login().await
            }
            other => other,
        }
    }

    async fn replay(&mut self) -> Result<(), ApiError> {
        let generation = self.channel.generation();
        let waiting: Vec<Arc<Slot>> = self
            .shared
            .tables
            .lock()
            .open_slots()
            .into_iter()
            .filter(|s| s.state() == SubscriptionState::Replaying)
            .collect();

        for slot in waiting {
            self.shared
                .enqueue(&slot, SubscriptionEvent::SubscriptionLost { generation });
            let ack = self.channel.allocate_subscription_id(&slot.url).await?;
            if self.shared.activate(&slot, ack.id.clone(), &ack.imdata) {
                debug!(url = %slot.url, id = %ack.id, generation, "subscription replayed");
            } else {
                self.channel.forget(&ack.id);
            }
        }
        Ok(())
    }

    /// Close the socket and move every open slot to `Replaying`.
    async fn drop_channel(&mut self) {
        self.channel.close().await;
        let mut tables = self.shared.tables.lock();
        tables.by_id.clear();
        for slot in tables.open_slots() {
            let mut inner = slot.inner.lock();
            inner.ids.clear();
            if inner.state != SubscriptionState::Closed {
                inner.state = SubscriptionState::Replaying;
            }
        }
    }

    async fn refresh_due(&mut self) -> Outcome {
        for id in self.channel.due_refreshes(Instant::now()) {
            if let Err(e) = self.channel.refresh(&id).await {
                return self.reconnect(&e).await;
            }
        }
        Outcome::Continue
    }

    fn dispatch(&self, note: &Notification) {
        let slots: Vec<Arc<Slot>> = {
            let tables = self.shared.tables.lock();
            let mut slots: Vec<Arc<Slot>> = Vec::new();
            for id in &note.subscription_ids {
                match tables.by_id.get(id) {
                    Some(slot) if !slots.iter().any(|s| s.handle == slot.handle) => {
                        slots.push(Arc::clone(slot));
                    }
                    Some(_) => {}
                    None => {
                        trace!(%id, "notification for unknown subscription id");
                        self.shared.counters.unknown_ids.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            slots
        };
        if slots.is_empty() {
            return;
        }

        for fragment in &note.imdata {
            let Some(event) = MoEvent::from_fragment(fragment) else {
                self.shared
                    .counters
                    .malformed_fragments
                    .fetch_add(1, Ordering::Relaxed);
                continue;
            };
            trace!(dn = %event.dn, status = %event.status, "event");
            for slot in &slots {
                self.shared
                    .enqueue(slot, SubscriptionEvent::Object(event.clone()));
            }
        }
    }

    /// Re-establish the channel with backoff. Returns `Stop` only when
    /// cancelled; exhausted retries and rejected credentials leave the
    /// state at `Failed` and the pump idle until the next subscribe.
    async fn reconnect(&mut self, reason: &ApiError) -> Outcome {
        warn!(error = %reason, "notification channel lost");
        self.drop_channel().await;
        if self.shared.tables.lock().open_slots().is_empty() {
            return Outcome::Continue;
        }

        let config = self.channel.config().reconnect.clone();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if config.max_retries.is_some_and(|max| attempt > max) {
                error!(attempts = attempt - 1, "giving up on notification channel");
                let _ = self.state.send(ConnectionState::Failed);
                return Outcome::Continue;
            }
            let _ = self.state.send(ConnectionState::Reconnecting { attempt });

            let delay = self.channel.backoff(attempt - 1);
            debug!(attempt, delay_ms = delay.as_millis(), "waiting before reconnect");
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Outcome::Stop,
                () = tokio::time::sleep(delay) => {}
            }

            match self.open().await {
                Ok(()) => {
                    info!(attempt, generation = self.channel.generation(), "notification channel restored");
                    let _ = self.state.send(ConnectionState::Connected);
                    return Outcome::Continue;
                }
                Err(e) if e.is_auth_expired() => {
                    error!(error = %e, "re-authentication failed");
                    self.drop_channel().await;
                    let _ = self.state.send(ConnectionState::Failed);
                    return Outcome::Continue;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    self.drop_channel().await;
                }
            }
        }
    }
}
