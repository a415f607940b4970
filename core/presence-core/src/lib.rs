//! # presence-core
//!
//! Presence timeline engine for one live channel: polls who is present,
//! turns consecutive snapshots into per-entity intervals, tracks broadcast
//! sessions and viewer counts, and computes the visible time window.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Fetches run on worker threads; all
//!   state changes happen on the scheduler's loop thread.
//! - **Pure transitions**: [`EngineState`] methods return [`Effects`]; writing
//!   the store and rendering are separate steps.
//! - **Graceful degradation**: Failed polls and corrupt records never erase
//!   history. The previous state stays until a good snapshot arrives.
//! - **Pluggable seams**: upstream ([`Fetch`]), persistence ([`Store`]) and
//!   rendering ([`RenderSink`]) are traits.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use presence_core::*;
//!
//! let config = EngineConfig::default();
//! let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
//! let target = TargetKey::parse("somechannel")?;
//! let engine = EngineState::load(store.as_ref(), target.clone(), &config);
//! let ids = resolve_target(fetch.as_ref(), &target)?;
//! let mut scheduler = Scheduler::new(engine, store, fetch, ids, &config.polling);
//! scheduler.run(None);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fetch;
pub mod flow;
pub mod intervals;
pub mod poller;
pub mod scheduler;
pub mod sessions;
pub mod store;
pub mod timezone;
pub mod viewers;
pub mod viewport;

pub use config::{load_config, parse_config, EngineConfig, StorageConfig};
pub use engine::{clear_target, Effects, EngineState, Persist};
pub use error::{FetchError, PresenceError, Result, StoreError};
pub use events::{ChangeEvent, RecordingSink, RenderSink};
pub use fetch::{Fetch, HelixClient, StaticToken, TokenFile, TokenSource};
pub use flow::FlowBuffer;
pub use intervals::{coalesce, PresenceDiff, PresenceTimeline, PresentSet};
pub use poller::{poll_liveness, poll_present_set, resolve_target, Snapshot, TargetIds};
pub use scheduler::{Completion, Scheduler, SchedulerHandle, TimerKind, ViewCommand};
pub use sessions::{
    LiveStream, Liveness, ReactivationPolicy, Session, SessionDetector, SessionEvent,
    SessionSelection, SessionState,
};
pub use store::{FileStore, MemoryStore, RecordKind, Store, TargetKey};
pub use timezone::{suggest, DisplaySettings, DisplayZone};
pub use viewers::{AdaptiveInterval, ViewerSample, ViewerSeries};
pub use viewport::{Viewport, ViewportController, ViewportMode, ViewportSettings};
