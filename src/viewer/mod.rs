//! Viewer session: owns every instance, the command queue and the handler
//! lists, and is driven by its host through [`Viewer::tick`].
//!
//! # Architecture
//!
//! ```text
//!        host loop ──tick_at(now)──►┌──────────────────────────┐
//!                                   │          Viewer          │
//!   add/delete/resize/... ─────────►│  InstanceStore (arena)   │
//!                                   │  CommandQueue            │
//!                                   │  jobs (next tick)        │
//!                                   │  event/fault handlers    │
//!                                   └────────────┬─────────────┘
//!                                                │ Box<dyn Transport>
//!                                                ▼
//!                                            provider
//! ```
//!
//! Each tick polls every inbound reply and event, runs the jobs scheduled
//! on the previous tick, sends at most one queued command and, while
//! disconnected, tries to reconnect when due.
//!
//! # Usage
//!
//! ```ignore
//! let mut viewer = Viewer::new(config, Box::new(UnixTransport::new(path)));
//! viewer.init()?;
//! let h = viewer.add("pkg.widget", None, None, None, -1.0, SizeType::S1x1, None)?;
//! loop {
//!     viewer.tick();
//!     std::thread::sleep(viewer.drain_interval());
//! }
//! ```

mod accessors;
mod api;
mod dispatch;

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::{Config, Options, ViewerOption};
use crate::constants::SYNC_REQUEST_TIMEOUT;
use crate::error::{Result, ViewerError};
use crate::handlers::{Event, EventHandler, Fault, FaultHandler, HandlerList, HandlerToken};
use crate::instance::{CommonId, InstanceState, InstanceStore, Op, Visibility, WidgetHandle};
use crate::packet::Packet;
use crate::protocol::Generation;
use crate::rpc::{Command, CommandQueue, Retry, RpcCompletion};
use crate::service::{DefaultService, WidgetService};
use crate::transport::{Inbound, Transport};

/// Package-level completion (no handle involved).
pub type PackageCompletion = Box<dyn FnOnce(&mut Viewer, Result<i32>)>;

type Job = Box<dyn FnOnce(&mut Viewer)>;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No provider connection.
    Disconnected,
    /// Connected, handshake not yet acknowledged.
    Connecting,
    /// Handshake acknowledged.
    Connected,
}

/// A viewer session.
pub struct Viewer {
    config: Config,
    generation: Generation,
    options: Options,
    transport: Box<dyn Transport>,
    service: Box<dyn WidgetService>,
    queue: CommandQueue,
    store: InstanceStore,
    jobs: VecDeque<Job>,
    event_handlers: HandlerList<EventHandler>,
    fault_handlers: HandlerList<FaultHandler>,
    state: SessionState,
    initialized: bool,
    reconnect_at: Option<Instant>,
    last_timestamp: f64,
    pid: u32,
}

impl std::fmt::Debug for Viewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Viewer")
            .field("generation", &self.generation)
            .field("state", &self.state)
            .field("options", &self.options)
            .field("queue", &self.queue)
            .field("commons", &self.store.common_count())
            .field("handles", &self.store.handle_count())
            .field("jobs", &self.jobs.len())
            .finish_non_exhaustive()
    }
}

impl Viewer {
    /// Create a session over `transport`. Nothing is sent until [`init`](Self::init).
    pub fn new(config: Config, transport: Box<dyn Transport>) -> Self {
        Self {
            generation: config.generation,
            options: config.options(),
            queue: CommandQueue::new(config.drain_interval()),
            config,
            transport,
            service: Box::new(DefaultService::new()),
            store: InstanceStore::default(),
            jobs: VecDeque::new(),
            event_handlers: HandlerList::default(),
            fault_handlers: HandlerList::default(),
            state: SessionState::Disconnected,
            initialized: false,
            reconnect_at: None,
            last_timestamp: 0.0,
            pid: std::process::id(),
        }
    }

    /// Replace the package resolver.
    #[must_use]
    pub fn with_service(mut self, service: Box<dyn WidgetService>) -> Self {
        self.service = service;
        self
    }

    // ── Session ─────────────────────────────────────────────────────────────

    /// Connect to the provider and queue the handshake.
    ///
    /// A provider that is not up yet is not an error: the session stays
    /// disconnected and retries on [`notify_provider_ready`](Self::notify_provider_ready)
    /// or after the reconnect interval.
    ///
    /// # Errors
    ///
    /// [`ViewerError::AlreadyExist`] if the session is already initialised.
    pub fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Err(ViewerError::AlreadyExist);
        }
        self.initialized = true;
        log::info!(
            "[Viewer] Init (generation={:?}, pid={})",
            self.generation,
            self.pid
        );
        self.try_connect(Instant::now());
        Ok(())
    }

    /// Tear the session down.
    ///
    /// Sends `release` synchronously, fails every outstanding command, and
    /// destroys all instances without emitting events.
    pub fn fini(&mut self) {
        if !self.initialized {
            return;
        }
        if self.transport.is_connected() {
            let packet = Packet::new("release").arg(self.pid);
            if let Err(e) = self.transport.send_sync(&packet, SYNC_REQUEST_TIMEOUT) {
                log::warn!("[Viewer] Release failed: {:#}", e);
            }
        }
        for command in self.queue.clear_all() {
            self.finish(command, None);
        }
        self.transport.disconnect();
        self.state = SessionState::Disconnected;
        self.reconnect_at = None;
        self.jobs.clear();
        self.store = InstanceStore::default();
        self.initialized = false;
        log::info!("[Viewer] Fini");
    }

    /// The host learned the provider (re)started; reconnect now.
    pub fn notify_provider_ready(&mut self) {
        if self.initialized && self.state == SessionState::Disconnected {
            log::info!("[Viewer] Provider ready, reconnecting");
            self.try_connect(Instant::now());
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.state
    }

    /// Whether the handshake completed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Naming generation spoken on the wire.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Queue drain interval; a sensible host tick period.
    #[must_use]
    pub fn drain_interval(&self) -> Duration {
        self.config.drain_interval()
    }

    /// Read a runtime option.
    #[must_use]
    pub fn option(&self, option: ViewerOption) -> bool {
        self.options.get(option)
    }

    /// Change a runtime option.
    pub fn set_option(&mut self, option: ViewerOption, value: bool) {
        log::debug!("[Viewer] Option {:?} = {}", option, value);
        self.options.set(option, value);
    }

    /// Command names waiting in the queue, front first.
    #[must_use]
    pub fn queued_commands(&self) -> Vec<&str> {
        self.queue.queued_names()
    }

    /// Sent requests still waiting for a reply.
    #[must_use]
    pub fn pending_replies(&self) -> usize {
        self.queue.pending_len()
    }

    /// Number of provider instances currently tracked.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.store.common_count()
    }

    // ── Main loop ───────────────────────────────────────────────────────────

    /// [`tick_at`](Self::tick_at) with the current time.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Run one step of the session.
    pub fn tick_at(&mut self, now: Instant) {
        while let Some(inbound) = self.transport.poll() {
            match inbound {
                Inbound::Reply { id, packet } => match self.queue.take_pending(id) {
                    Some(command) => self.finish(command, Some(&packet)),
                    None => log::warn!("[Rpc] Reply for unknown request {} ('{}')", id, packet.command),
                },
                Inbound::Event(packet) => self.dispatch_event(&packet),
                Inbound::Disconnected => self.handle_disconnect(now),
            }
        }

        self.run_jobs();
        self.drain(now);

        if self.initialized
            && self.state == SessionState::Disconnected
            && self.reconnect_at.is_some_and(|at| now >= at)
        {
            self.try_connect(now);
        }
    }

    fn run_jobs(&mut self) {
        let jobs = std::mem::take(&mut self.jobs);
        for job in jobs {
            job(self);
        }
    }

    fn drain(&mut self, now: Instant) {
        let Some(command) = self.queue.pop_due(now) else {
            return;
        };

        if !command.is_acked() {
            if let Err(e) = self.transport.send_only(&command.packet) {
                log::warn!("[Rpc] Dropping '{}': {:#}", command.name(), e);
            }
            self.release_command(command);
            return;
        }

        match self.transport.send(&command.packet) {
            Ok(id) => {
                log::trace!("[Rpc] Sent '{}' as request {}", command.name(), id);
                self.queue.insert_pending(id, command);
            }
            Err(e) => {
                log::warn!("[Rpc] Send '{}' failed: {:#}", command.name(), e);
                if let Retry::Exhausted(command) = self.queue.retry(command) {
                    log::error!("[Rpc] '{}' out of retries", command.name());
                    self.finish(command, None);
                }
            }
        }
    }

    // ── Connection ──────────────────────────────────────────────────────────

    fn try_connect(&mut self, now: Instant) {
        self.reconnect_at = None;
        if let Err(e) = self.transport.connect() {
            log::warn!("[Viewer] Connect failed: {:#}", e);
            self.reconnect_at = Some(now + self.config.reconnect_interval());
            return;
        }
        self.state = SessionState::Connecting;

        let packet = Packet::new("acquire").arg(self.pid).arg(self.next_timestamp());
        let completion: RpcCompletion = Box::new(|v, _, reply| v.on_acquire_reply(reply));
        self.enqueue(Command::acked(packet, self.config.rpc_ttl, completion), true);
    }

    fn on_acquire_reply(&mut self, reply: Option<&Packet>) {
        if self.state != SessionState::Connecting {
            return;
        }
        match reply_status(reply) {
            Ok(_) => {
                log::info!("[Viewer] Connected to provider");
                self.state = SessionState::Connected;
            }
            Err(ViewerError::Fault) if reply.is_none() => self.handle_disconnect(Instant::now()),
            Err(e) => {
                log::error!("[Viewer] Provider rejected handshake: {}", e);
                self.fire_fault(&Fault::HandshakeRejected(e));
                self.handle_disconnect(Instant::now());
            }
        }
    }

    /// The provider went away: fail everything and forget every instance.
    pub(crate) fn handle_disconnect(&mut self, now: Instant) {
        if self.state == SessionState::Disconnected {
            return;
        }
        log::warn!("[Viewer] Provider disconnected");
        self.transport.disconnect();
        self.state = SessionState::Disconnected;

        for command in self.queue.clear_all() {
            self.finish(command, None);
        }

        self.fire_fault(&Fault::ProviderDisconnected);

        for h in self.store.live_handles() {
            self.fail_callbacks(h, &[Op::Created, Op::Deleted]);
            let notified = self.complete(h, Op::Created, Err(ViewerError::Fault))
                || self.complete(h, Op::Deleted, Ok(0));
            if !notified {
                self.emit(h, Event::Deleted);
            }
            self.destroy_handle(h);
        }
        for cid in self.store.common_ids() {
            self.store.destroy_common(cid);
        }

        if self.initialized {
            self.reconnect_at = Some(now + self.config.reconnect_interval());
        }
    }

    // ── Commands ────────────────────────────────────────────────────────────

    /// Queue a command, taking a reference on its owning handle.
    pub(crate) fn enqueue(&mut self, command: Command, urgent: bool) {
        if let Some(h) = command.handle {
            self.store.ref_handle(h);
        }
        self.queue.push(command, urgent);
    }

    /// Run a command's completion and drop its handle reference.
    fn finish(&mut self, mut command: Command, reply: Option<&Packet>) {
        if let Some(completion) = command.completion.take() {
            completion(self, command.handle, reply);
        }
        self.release_command(command);
    }

    fn release_command(&mut self, command: Command) {
        if let Some(h) = command.handle {
            self.store.unref_handle(h);
        }
    }

    /// Fail queued commands of a package.
    pub(crate) fn clear_package(&mut self, pkgname: &str) {
        let removed = self.queue.clear_for_package(pkgname);
        if !removed.is_empty() {
            log::info!("[Rpc] Cleared {} queued commands of {}", removed.len(), pkgname);
        }
        for command in removed {
            self.finish(command, None);
        }
    }

    /// Strictly increasing correlation timestamp in seconds.
    pub(crate) fn next_timestamp(&mut self) -> f64 {
        let now = chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        let ts = if now > self.last_timestamp {
            now
        } else {
            f64::from_bits(self.last_timestamp.to_bits() + 1)
        };
        self.last_timestamp = ts;
        ts
    }

    // ── Jobs ────────────────────────────────────────────────────────────────

    /// Run `job` on the next tick.
    pub(crate) fn defer(&mut self, job: impl FnOnce(&mut Viewer) + 'static) {
        self.jobs.push_back(Box::new(job));
    }

    /// Run `job` on the next tick, keeping `h` allocated until then.
    pub(crate) fn defer_for(&mut self, h: WidgetHandle, job: impl FnOnce(&mut Viewer, WidgetHandle) + 'static) {
        self.store.ref_handle(h);
        self.defer(move |v| {
            job(v, h);
            v.store.unref_handle(h);
        });
    }

    // ── Callbacks and handlers ──────────────────────────────────────────────

    /// Invoke and clear the handle's completion for `op`.
    ///
    /// Returns whether a completion was registered.
    pub(crate) fn complete(&mut self, h: WidgetHandle, op: Op, result: Result<i32>) -> bool {
        let Some(cb) = self.store.handle_mut(h).and_then(|handle| handle.take_callback(op)) else {
            return false;
        };
        cb(self, h, result);
        true
    }

    /// Completion if registered, otherwise `event` on success.
    pub(crate) fn complete_or_emit(&mut self, h: WidgetHandle, op: Op, result: Result<i32>, event: Event) {
        let ok = result.is_ok();
        if !self.complete(h, op, result) && ok {
            self.emit(h, event);
        }
    }

    /// Fail every registered completion except those in `keep`.
    fn fail_callbacks(&mut self, h: WidgetHandle, keep: &[Op]) {
        for op in Op::ALL {
            if !keep.contains(&op) {
                self.complete(h, op, Err(ViewerError::Fault));
            }
        }
    }

    /// Deliver an event to every event handler.
    pub(crate) fn emit(&mut self, h: WidgetHandle, event: Event) {
        log::trace!("[Viewer] Event {:?} for {:?}", event, h);
        let n = self.event_handlers.begin();
        for i in 0..n {
            if let Some(mut cb) = self.event_handlers.take(i) {
                cb(self, h, event);
                self.event_handlers.restore(i, cb);
            }
        }
        self.event_handlers.end();
    }

    pub(crate) fn fire_fault(&mut self, fault: &Fault) {
        log::debug!("[Viewer] Fault {:?}", fault);
        let n = self.fault_handlers.begin();
        for i in 0..n {
            if let Some(mut cb) = self.fault_handlers.take(i) {
                cb(self, fault);
                self.fault_handlers.restore(i, cb);
            }
        }
        self.fault_handlers.end();
    }

    /// Register an instance event handler.
    pub fn add_event_handler(
        &mut self,
        handler: impl FnMut(&mut Viewer, WidgetHandle, Event) + 'static,
    ) -> HandlerToken {
        self.event_handlers.add(Box::new(handler))
    }

    /// Unregister an event handler. Safe to call from inside a handler.
    ///
    /// # Errors
    ///
    /// [`ViewerError::InvalidParameter`] for an unknown token.
    pub fn remove_event_handler(&mut self, token: HandlerToken) -> Result<()> {
        if self.event_handlers.remove(token) {
            Ok(())
        } else {
            Err(ViewerError::InvalidParameter)
        }
    }

    /// Register a session fault handler.
    pub fn add_fault_handler(&mut self, handler: impl FnMut(&mut Viewer, &Fault) + 'static) -> HandlerToken {
        self.fault_handlers.add(Box::new(handler))
    }

    /// Unregister a fault handler. Safe to call from inside a handler.
    ///
    /// # Errors
    ///
    /// [`ViewerError::InvalidParameter`] for an unknown token.
    pub fn remove_fault_handler(&mut self, token: HandlerToken) -> Result<()> {
        if self.fault_handlers.remove(token) {
            Ok(())
        } else {
            Err(ViewerError::InvalidParameter)
        }
    }

    // ── Instance helpers ────────────────────────────────────────────────────

    /// Mark a handle destroyed, fail its leftover completions, unlink it and
    /// drop the owner reference. Returns the common it was attached to.
    pub(crate) fn destroy_handle(&mut self, h: WidgetHandle) -> Option<CommonId> {
        let handle = self.store.handle_mut(h)?;
        if handle.state == InstanceState::Destroyed {
            return None;
        }
        handle.state = InstanceState::Destroyed;
        self.fail_callbacks(h, &[]);
        let cid = self.store.detach(h);
        self.store.unref_handle(h);
        cid
    }

    /// Destroy every handle of a common, then the common.
    pub(crate) fn destroy_common_and_handles(&mut self, cid: CommonId) {
        for h in self.store.handles_of(cid) {
            self.destroy_handle(h);
        }
        self.store.destroy_common(cid);
    }

    /// Announce the aggregate visibility if it changed.
    pub(crate) fn sync_visibility(&mut self, cid: CommonId) {
        let aggregate = self.store.aggregate_visibility(cid);
        let Some(common) = self.store.common_mut(cid) else {
            return;
        };
        if common.visible == aggregate || common.state != InstanceState::Create {
            return;
        }
        let Ok((pkgname, id)) = common.target() else {
            return;
        };
        common.visible = aggregate;
        log::debug!("[Viewer] {} {} visibility -> {:?}", pkgname, id, aggregate);
        let packet = Packet::new("change,visibility")
            .arg(pkgname.as_str())
            .arg(id)
            .arg(aggregate.code());
        self.enqueue(Command::notify(packet).for_package(&pkgname), false);
    }

    /// Live handle's common, or `InvalidParameter`.
    pub(crate) fn common_of(&self, h: WidgetHandle) -> Result<CommonId> {
        self.store
            .live(h)
            .and_then(|handle| handle.common)
            .ok_or(ViewerError::InvalidParameter)
    }

    /// Whether `h` is in a visibility state that defers updates.
    pub(crate) fn is_paused(&self, h: WidgetHandle) -> bool {
        self.store
            .live(h)
            .is_some_and(|handle| handle.visible == Visibility::HideWithPause)
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        if self.initialized {
            self.fini();
        }
    }
}

/// Status of an acknowledged reply; `Fault` when there is none.
pub(crate) fn reply_status(reply: Option<&Packet>) -> Result<i32> {
    match reply {
        Some(packet) => packet.status().and_then(ViewerError::check),
        None => Err(ViewerError::Fault),
    }
}
