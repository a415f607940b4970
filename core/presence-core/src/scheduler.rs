//! Timer loop that drives one [`EngineState`].
//!
//! All engine mutation happens on the thread that calls [`Scheduler::run`].
//! Network calls run on short-lived worker threads and report back through a
//! channel, so the loop never blocks on the upstream.
//!
//! # Timers
//!
//! | Timer    | Default | Work                                   |
//! |----------|---------|----------------------------------------|
//! | presence | 5s      | paginated present-set poll             |
//! | liveness | 10s     | stream liveness poll (adaptive opt-in) |
//! | viewport | 5s      | recompute window (no I/O)              |
//!
//! Presence and liveness are independent. A timer that fires while its
//! previous fetch is still in flight is skipped, never queued.
//!
//! # Teardown
//!
//! [`SchedulerHandle::dispose`] sets a shared flag. Workers check it after the
//! fetch returns and drop their result; the loop checks it on every wakeup and
//! before applying any completion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::PollingConfig;
use crate::engine::{Effects, EngineState};
use crate::error::FetchError;
use crate::events::RenderSink;
use crate::fetch::Fetch;
use crate::poller::{poll_liveness, poll_present_set, Snapshot, TargetIds};
use crate::sessions::Liveness;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Presence,
    Liveness,
    Viewport,
}

impl TimerKind {
    const ALL: [TimerKind; 3] = [TimerKind::Presence, TimerKind::Liveness, TimerKind::Viewport];
}

#[derive(Debug)]
pub enum Completion {
    Presence(Result<Snapshot, FetchError>),
    Liveness(Result<Liveness, FetchError>),
}

/// User-driven viewport commands, applied on the loop thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCommand {
    Select {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    FitAll,
    Follow,
    FocusSession(String),
}

#[derive(Debug)]
enum Message {
    Completed(Completion),
    Command(ViewCommand),
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Cloneable control surface for a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: Sender<Message>,
    disposed: Arc<AtomicBool>,
}

impl SchedulerHandle {
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Queues a viewport command. Returns false once the scheduler is gone.
    pub fn send(&self, command: ViewCommand) -> bool {
        self.tx.send(Message::Command(command)).is_ok()
    }
}

pub struct Scheduler {
    engine: EngineState,
    store: Arc<dyn Store>,
    fetch: Arc<dyn Fetch>,
    ids: TargetIds,
    sinks: Vec<Box<dyn RenderSink>>,
    intervals: HashMap<TimerKind, Duration>,
    next_due: HashMap<TimerKind, Instant>,
    busy: HashMap<TimerKind, bool>,
    max_pages: usize,
    disposed: Arc<AtomicBool>,
    tx: Sender<Message>,
    rx: Receiver<Message>,
    clock: Clock,
}

impl Scheduler {
    pub fn new(
        engine: EngineState,
        store: Arc<dyn Store>,
        fetch: Arc<dyn Fetch>,
        ids: TargetIds,
        polling: &PollingConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let intervals = HashMap::from([
            (TimerKind::Presence, polling.presence_interval()),
            (TimerKind::Liveness, polling.liveness_interval()),
            (TimerKind::Viewport, polling.viewport_interval()),
        ]);

        Self {
            engine,
            store,
            fetch,
            ids,
            sinks: Vec::new(),
            intervals,
            next_due: HashMap::new(),
            busy: HashMap::new(),
            max_pages: polling.max_pages,
            disposed: Arc::new(AtomicBool::new(false)),
            tx,
            rx,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn subscribe(&mut self, sink: Box<dyn RenderSink>) {
        self.sinks.push(sink);
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            tx: self.tx.clone(),
            disposed: Arc::clone(&self.disposed),
        }
    }

    pub fn engine(&self) -> &EngineState {
        &self.engine
    }

    pub fn interval(&self, kind: TimerKind) -> Duration {
        self.intervals
            .get(&kind)
            .copied()
            .unwrap_or(Duration::from_secs(5))
    }

    pub fn is_busy(&self, kind: TimerKind) -> bool {
        self.busy.get(&kind).copied().unwrap_or(false)
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Fires one timer. Returns false when skipped (busy or disposed).
    pub fn on_timer(&mut self, kind: TimerKind) -> bool {
        if self.is_disposed() {
            return false;
        }
        if self.is_busy(kind) {
            debug!(timer = ?kind, "Previous fetch still in flight; skipping tick");
            return false;
        }

        match kind {
            TimerKind::Viewport => {
                let now = (self.clock)();
                let effects = self.engine.recompute_view(now);
                self.publish(effects, now);
                true
            }
            TimerKind::Presence => {
                let fetch = Arc::clone(&self.fetch);
                let ids = self.ids.clone();
                let max_pages = self.max_pages;
                self.spawn_fetch(kind, move || {
                    Completion::Presence(poll_present_set(fetch.as_ref(), &ids, max_pages))
                })
            }
            TimerKind::Liveness => {
                let fetch = Arc::clone(&self.fetch);
                let login = self.ids.login.clone();
                self.spawn_fetch(kind, move || {
                    Completion::Liveness(poll_liveness(fetch.as_ref(), &login))
                })
            }
        }
    }

    fn spawn_fetch<F>(&mut self, kind: TimerKind, work: F) -> bool
    where
        F: FnOnce() -> Completion + Send + 'static,
    {
        let tx = self.tx.clone();
        let disposed = Arc::clone(&self.disposed);
        let spawned = thread::Builder::new()
            .name(format!("presence-{:?}", kind).to_lowercase())
            .spawn(move || {
                let completion = work();
                if disposed.load(Ordering::SeqCst) {
                    return;
                }
                // The loop may already be gone; nothing to deliver to then.
                let _ = tx.send(Message::Completed(completion));
            });

        match spawned {
            Ok(_) => {
                self.busy.insert(kind, true);
                true
            }
            Err(err) => {
                warn!(timer = ?kind, error = %err, "Failed to spawn fetch worker");
                false
            }
        }
    }

    /// Applies a finished fetch. Results arriving after dispose are dropped.
    pub fn on_completion(&mut self, completion: Completion) {
        let kind = match &completion {
            Completion::Presence(_) => TimerKind::Presence,
            Completion::Liveness(_) => TimerKind::Liveness,
        };
        self.busy.insert(kind, false);

        if self.is_disposed() {
            debug!(timer = ?kind, "Discarding result after dispose");
            return;
        }

        let now = (self.clock)();
        let effects = match completion {
            Completion::Presence(result) => self.engine.apply_presence(result, now),
            Completion::Liveness(result) => self.engine.apply_liveness(result, now),
        };

        if let Some(next) = effects.next_liveness_interval {
            self.intervals.insert(TimerKind::Liveness, next);
            self.next_due.insert(TimerKind::Liveness, Instant::now() + next);
        }
        self.publish(effects, now);
    }

    pub fn on_command(&mut self, command: ViewCommand) {
        if self.is_disposed() {
            return;
        }
        let now = (self.clock)();
        let effects = match command {
            ViewCommand::Select { start, end } => self.engine.user_selection(start, end, now),
            ViewCommand::FitAll => self.engine.fit_all(now),
            ViewCommand::Follow => self.engine.follow(now),
            ViewCommand::FocusSession(id) => self.engine.focus_session(&id, now),
        };
        self.publish(effects, now);
    }

    fn publish(&mut self, effects: Effects, now: DateTime<Utc>) {
        if let Err(err) = self.engine.commit(self.store.as_ref(), &effects) {
            warn!(channel = %self.engine.target(), error = %err, "Failed to persist engine state");
        }
        if effects.events.is_empty() || self.sinks.is_empty() {
            return;
        }
        let view = self.engine.view_model(now);
        for sink in &mut self.sinks {
            sink.render(&view, &effects.events);
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Completed(completion) => self.on_completion(completion),
            Message::Command(command) => self.on_command(command),
        }
    }

    /// Waits up to `timeout` for one completion or command and applies it.
    /// Returns false on timeout.
    pub fn process_next(&mut self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => {
                self.handle_message(message);
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Runs until disposed or until `deadline` passes. Every timer fires once
    /// immediately, then on its interval.
    pub fn run(&mut self, deadline: Option<Instant>) {
        info!(
            channel = %self.engine.target(),
            presence_secs = self.interval(TimerKind::Presence).as_secs(),
            liveness_secs = self.interval(TimerKind::Liveness).as_secs(),
            "Scheduler started"
        );

        let start = Instant::now();
        for kind in TimerKind::ALL {
            self.next_due.entry(kind).or_insert(start);
        }

        loop {
            if self.is_disposed() {
                break;
            }
            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                info!("Scheduler deadline reached");
                self.disposed.store(true, Ordering::SeqCst);
                break;
            }

            for kind in TimerKind::ALL {
                let due = self.next_due.get(&kind).copied().unwrap_or(now);
                if due <= now {
                    self.on_timer(kind);
                    self.next_due.insert(kind, now + self.interval(kind));
                }
            }

            let mut wake = self.next_due.values().copied().min().unwrap_or(now);
            if let Some(deadline) = deadline {
                wake = wake.min(deadline);
            }
            match self.rx.recv_timeout(wake.saturating_duration_since(Instant::now())) {
                Ok(message) => self.handle_message(message),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!(channel = %self.engine.target(), "Scheduler stopped");
    }
}
