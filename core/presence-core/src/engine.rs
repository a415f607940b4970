//! Engine state for one tracked target.
//!
//! [`EngineState`] owns every mutable piece (timeline, session log, flow
//! buffer, viewer series, viewport, poll status) and is driven by one thread:
//! each input returns [`Effects`] describing which store keys to write and
//! which change events to publish. Applying effects is a separate step
//! ([`EngineState::commit`]) so the state transitions stay testable without a
//! store.
//!
//! # Key ownership
//!
//! | Key                | Writer                       |
//! |--------------------|------------------------------|
//! | `timeline`         | presence ticks, import       |
//! | `flow`             | presence ticks               |
//! | `sessions`         | liveness ticks               |
//! | `viewers:<id>`     | liveness ticks               |
//! | `viewport`, `fit-mode` | viewport commands        |
//!
//! A failed tick only touches the in-memory status: it never closes intervals,
//! finalizes sessions or writes the store.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use presence_protocol::{
    SessionMarker, StatusView, TimelineView, ViewerPoint, VIEW_SCHEMA_VERSION,
};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{FetchError, Result, StoreError};
use crate::events::ChangeEvent;
use crate::flow::FlowBuffer;
use crate::intervals::PresenceTimeline;
use crate::poller::Snapshot;
use crate::sessions::{Liveness, Session, SessionDetector, SessionEvent, SessionSelection};
use crate::store::{load_record, save_record, target_keys, RecordKind, Store, TargetKey};
use crate::viewers::{AdaptiveInterval, ViewerSample, ViewerSeries};
use crate::viewport::{SelectionOutcome, SelectionRecord, ViewportController, ViewportMode};

/// A store write requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Persist {
    Timeline,
    Sessions,
    Flow,
    /// Manual selection and fit-mode flag.
    Viewport,
    Viewers(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Effects {
    pub persist: BTreeSet<Persist>,
    pub events: Vec<ChangeEvent>,
    /// Set when adaptive liveness wants a different polling interval.
    pub next_liveness_interval: Option<Duration>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.persist.is_empty() && self.events.is_empty()
    }

    fn merge(&mut self, other: Effects) {
        self.persist.extend(other.persist);
        self.events.extend(other.events);
        if other.next_liveness_interval.is_some() {
            self.next_liveness_interval = other.next_liveness_interval;
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineState {
    target: TargetKey,
    config: EngineConfig,
    timeline: PresenceTimeline,
    sessions: SessionDetector,
    flow: FlowBuffer,
    viewers: BTreeMap<String, ViewerSeries>,
    viewport: ViewportController,
    adaptive: AdaptiveInterval,
    focused_session: Option<String>,
    status: StatusView,
}

impl EngineState {
    pub fn new(target: TargetKey, config: &EngineConfig) -> Self {
        Self {
            target,
            config: config.clone(),
            timeline: PresenceTimeline::new(),
            sessions: SessionDetector::new(config.sessions.reactivation),
            flow: FlowBuffer::new(config.timeline.flow_capacity),
            viewers: BTreeMap::new(),
            viewport: ViewportController::new(config.viewport.settings()),
            adaptive: AdaptiveInterval::new(),
            focused_session: None,
            status: StatusView::default(),
        }
    }

    /// Restores everything persisted for `target`. Corrupt records start fresh.
    pub fn load(store: &dyn Store, target: TargetKey, config: &EngineConfig) -> Self {
        let mut state = Self::new(target, config);
        let key = |kind| state.target.record(kind);

        if let Some(timeline) = load_record::<PresenceTimeline>(store, &key(RecordKind::Timeline)) {
            state.timeline = timeline.normalized();
        }
        if let Some(log) = load_record::<Vec<Session>>(store, &key(RecordKind::Sessions)) {
            state.sessions = SessionDetector::from_log(log, config.sessions.reactivation);
        }
        if let Some(points) = load_record(store, &key(RecordKind::Flow)) {
            state.flow = FlowBuffer::from_points(points, config.timeline.flow_capacity);
        }

        let fit_mode = load_record::<bool>(store, &key(RecordKind::FitMode)).unwrap_or(false);
        let manual = load_record::<SelectionRecord>(store, &key(RecordKind::Viewport));
        state.viewport = ViewportController::restore(config.viewport.settings(), fit_mode, manual);

        let prefix = state.target.viewers_prefix();
        match store.keys_with_prefix(&prefix) {
            Ok(keys) => {
                for series_key in keys {
                    let id = series_key[prefix.len()..].to_string();
                    if let Some(samples) = load_record::<Vec<ViewerSample>>(store, &series_key) {
                        state.viewers.insert(
                            id,
                            ViewerSeries::from_samples(samples, config.timeline.viewer_capacity),
                        );
                    }
                }
            }
            Err(err) => warn!(channel = %state.target, error = %err, "Failed to list viewer series"),
        }

        info!(
            channel = %state.target,
            entities = state.timeline.len(),
            sessions = state.sessions.sessions().len(),
            flow_points = state.flow.len(),
            viewport = ?state.viewport.mode(),
            "Engine state loaded"
        );
        state
    }

    pub fn target(&self) -> &TargetKey {
        &self.target
    }

    pub fn timeline(&self) -> &PresenceTimeline {
        &self.timeline
    }

    pub fn sessions(&self) -> &SessionDetector {
        &self.sessions
    }

    pub fn flow(&self) -> &FlowBuffer {
        &self.flow
    }

    pub fn viewer_series(&self, session_id: &str) -> Option<&ViewerSeries> {
        self.viewers.get(session_id)
    }

    pub fn viewport_mode(&self) -> ViewportMode {
        self.viewport.mode()
    }

    pub fn status(&self) -> &StatusView {
        &self.status
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Poll results
    // ─────────────────────────────────────────────────────────────────────────

    pub fn apply_presence(&mut self, result: std::result::Result<Snapshot, FetchError>, now: DateTime<Utc>) -> Effects {
        self.status.last_attempt_at = Some(now);
        let mut effects = Effects::default();

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(channel = %self.target, error = %err, "Presence tick failed; keeping previous state");
                self.status.error = Some(err.to_string());
                effects.events.push(ChangeEvent::StatusChanged(self.status.clone()));
                return effects;
            }
        };

        let diff = self.timeline.reconcile(&snapshot.present, now);
        let point = self.flow.append(&diff, &self.timeline, now).clone();

        self.status.last_success_at = Some(now);
        self.status.present_count = snapshot.present.len();
        self.status.truncated = snapshot.truncated;
        self.status.error = None;

        debug!(
            channel = %self.target,
            present = snapshot.present.len(),
            arrivals = diff.arrivals.len(),
            departures = diff.departures.len(),
            pages = snapshot.pages,
            "Presence tick applied"
        );

        effects.persist.insert(Persist::Timeline);
        effects.persist.insert(Persist::Flow);
        effects.events.push(ChangeEvent::IntervalsChanged {
            arrivals: diff.arrivals.len(),
            departures: diff.departures.len(),
        });
        effects.events.push(ChangeEvent::FlowAppended(point));
        effects.events.push(ChangeEvent::StatusChanged(self.status.clone()));
        effects.merge(self.recompute_view(now));
        effects
    }

    pub fn apply_liveness(&mut self, result: std::result::Result<Liveness, FetchError>, now: DateTime<Utc>) -> Effects {
        let mut effects = Effects::default();

        let liveness = match result {
            Ok(liveness) => liveness,
            Err(err) => {
                warn!(channel = %self.target, error = %err, "Liveness tick failed; sessions unchanged");
                self.status.error = Some(format!("liveness: {}", err));
                effects.events.push(ChangeEvent::StatusChanged(self.status.clone()));
                return effects;
            }
        };

        let session_events = self.sessions.observe(&liveness, now);
        if !session_events.is_empty() {
            effects.persist.insert(Persist::Sessions);
            effects.events.push(ChangeEvent::SessionsChanged);
        }
        let started = self.sessions.active_id().is_some()
            && session_events
                .iter()
                .any(|event| matches!(event, SessionEvent::Started(_) | SessionEvent::Reactivated(_)));
        if started {
            // A new session becomes the default view.
            self.focused_session = None;
        }

        if let (Liveness::Active(stream), Some(id)) = (&liveness, self.sessions.active_id()) {
            let id = id.to_string();
            let capacity = self.config.timeline.viewer_capacity;
            let interval = self.liveness_interval();
            self.viewers
                .entry(id.clone())
                .or_insert_with(|| ViewerSeries::new(capacity))
                .record(now, stream.viewer_count, interval);
            effects.persist.insert(Persist::Viewers(id));
        }

        if self.config.polling.adaptive_liveness {
            let viewers = match &liveness {
                Liveness::Active(stream) => Some(stream.viewer_count),
                Liveness::Inactive => None,
            };
            let before = self.adaptive.current();
            let next = self.adaptive.observe(viewers);
            if next != before {
                debug!(channel = %self.target, interval_secs = next.as_secs(), "Liveness interval adapted");
                effects.next_liveness_interval = Some(next);
            }
        }

        effects.merge(self.recompute_view(now));
        effects
    }

    /// Cadence the liveness timer is currently running at.
    fn liveness_interval(&self) -> Duration {
        if self.config.polling.adaptive_liveness {
            self.adaptive.current()
        } else {
            self.config.polling.liveness_interval()
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Viewport
    // ─────────────────────────────────────────────────────────────────────────

    pub fn recompute_view(&mut self, now: DateTime<Utc>) -> Effects {
        let mut effects = Effects::default();
        let (viewport, changed) = self.viewport.recompute(&self.timeline, &self.sessions, now);
        if changed {
            effects.events.push(ChangeEvent::WindowChanged(viewport.window()));
        }
        effects
    }

    pub fn user_selection(&mut self, start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> Effects {
        let boundaries = self.sessions.boundaries();
        let mut effects = Effects::default();
        match self.viewport.user_selection(start, end, &boundaries, now) {
            SelectionOutcome::Echo | SelectionOutcome::Collapsed => return effects,
            SelectionOutcome::Following | SelectionOutcome::Manual(_) => {
                effects.persist.insert(Persist::Viewport);
            }
        }
        effects.merge(self.recompute_view(now));
        effects
    }

    pub fn fit_all(&mut self, now: DateTime<Utc>) -> Effects {
        self.viewport.fit_all();
        let mut effects = Effects::default();
        effects.persist.insert(Persist::Viewport);
        effects.merge(self.recompute_view(now));
        effects
    }

    pub fn follow(&mut self, now: DateTime<Utc>) -> Effects {
        self.viewport.follow();
        self.focused_session = None;
        let mut effects = Effects::default();
        effects.persist.insert(Persist::Viewport);
        effects.merge(self.recompute_view(now));
        effects
    }

    /// Focuses the window on one session. Unknown ids change nothing.
    pub fn focus_session(&mut self, id: &str, now: DateTime<Utc>) -> Effects {
        let mut effects = Effects::default();
        if self.viewport.focus_session(&self.sessions, id).is_none() {
            debug!(channel = %self.target, session = %id, "Focus requested for unknown session");
            return effects;
        }
        self.focused_session = Some(id.to_string());
        effects.persist.insert(Persist::Viewport);
        effects.merge(self.recompute_view(now));
        effects
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Import / export
    // ─────────────────────────────────────────────────────────────────────────

    pub fn export_timeline(&self) -> PresenceTimeline {
        self.timeline.clone()
    }

    /// Merges an exported timeline into ours, coalescing per entity.
    pub fn import_timeline(&mut self, incoming: PresenceTimeline, now: DateTime<Utc>) -> Effects {
        let before = self.timeline.len();
        self.timeline.merge_from(incoming.normalized());
        info!(
            channel = %self.target,
            entities_before = before,
            entities_after = self.timeline.len(),
            "Timeline imported"
        );

        let mut effects = Effects::default();
        effects.persist.insert(Persist::Timeline);
        effects.events.push(ChangeEvent::IntervalsChanged {
            arrivals: 0,
            departures: 0,
        });
        effects.merge(self.recompute_view(now));
        effects
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    /// Writes the keys named in `effects`.
    pub fn commit(&self, store: &dyn Store, effects: &Effects) -> std::result::Result<(), StoreError> {
        for persist in &effects.persist {
            match persist {
                Persist::Timeline => {
                    save_record(store, &self.target.record(RecordKind::Timeline), &self.timeline)?
                }
                Persist::Sessions => save_record(
                    store,
                    &self.target.record(RecordKind::Sessions),
                    &self.sessions.sessions(),
                )?,
                Persist::Flow => {
                    save_record(store, &self.target.record(RecordKind::Flow), &self.flow.to_vec())?
                }
                Persist::Viewport => {
                    let viewport_key = self.target.record(RecordKind::Viewport);
                    match self.viewport.manual_selection() {
                        Some(record) => save_record(store, &viewport_key, &record)?,
                        None => store.remove(&viewport_key)?,
                    }
                    save_record(
                        store,
                        &self.target.record(RecordKind::FitMode),
                        &self.viewport.fit_mode(),
                    )?;
                }
                Persist::Viewers(id) => {
                    if let Some(series) = self.viewers.get(id) {
                        save_record(store, &self.target.viewers(id), &series.samples())?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Drops all in-memory state for the target, keeping configuration.
    pub fn reset(&mut self) {
        *self = Self::new(self.target.clone(), &self.config);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // View-model
    // ─────────────────────────────────────────────────────────────────────────

    fn selected_session(&self) -> Option<&str> {
        if let Some(id) = self.focused_session.as_deref() {
            return Some(id);
        }
        match self.sessions.default_selection() {
            SessionSelection::Active(_) => self.sessions.active_id(),
            SessionSelection::Finalized(id) => self.sessions.get(&id).map(|s| s.id.as_str()),
            SessionSelection::Offline => None,
        }
    }

    pub fn view_model(&self, now: DateTime<Utc>) -> TimelineView {
        let viewport = match self.viewport.last_emitted() {
            Some(viewport) => *viewport,
            None => {
                let mut scratch = self.viewport.clone();
                scratch.recompute(&self.timeline, &self.sessions, now).0
            }
        };

        let mut names = BTreeMap::new();
        let mut intervals = BTreeMap::new();
        for (id, record) in self.timeline.entities() {
            names.insert(id.clone(), self.timeline.display_name(id).to_string());
            intervals.insert(id.clone(), record.intervals.clone());
        }

        let sessions = self
            .sessions
            .labels()
            .into_iter()
            .map(|(session, live)| SessionMarker {
                id: session.id.clone(),
                start: session.start,
                end: session.end,
                live,
                sample_count: session.sample_count,
            })
            .collect();

        let viewers = self
            .selected_session()
            .and_then(|id| self.viewers.get(id))
            .map(|series| {
                series
                    .samples()
                    .iter()
                    .zip(series.deltas())
                    .map(|(sample, (_, delta))| ViewerPoint {
                        t: sample.t,
                        viewers: sample.viewers,
                        delta,
                        gap: sample.gap,
                    })
                    .collect()
            })
            .unwrap_or_default();

        TimelineView {
            version: VIEW_SCHEMA_VERSION,
            target: self.target.to_string(),
            generated_at: now,
            entity_rows: self.timeline.entity_rows(),
            names,
            intervals,
            flow: self.flow.to_vec(),
            window: viewport.window(),
            pinned_to_live_edge: viewport.pinned_to_live_edge(),
            sessions,
            viewers,
            status: self.status.clone(),
        }
    }
}

/// Removes every key owned by `target` in one `remove_all` call. Returns how
/// many of those keys held a record (corrupt ones included).
pub fn clear_target(store: &dyn Store, target: &TargetKey) -> Result<usize> {
    let keys = target_keys(store, target)?;
    let existing = keys
        .iter()
        .filter(|key| !matches!(store.get(key), Ok(None)))
        .count();
    store.remove_all(&keys)?;
    info!(channel = %target, removed = existing, "Cleared stored data for target");
    Ok(existing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intervals::PresentSet;
    use crate::sessions::LiveStream;
    use crate::store::MemoryStore;
    use presence_protocol::PresenceInterval;

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("parse")
            .with_timezone(&Utc)
    }

    fn snapshot(ids: &[&str]) -> Snapshot {
        Snapshot {
            present: ids
                .iter()
                .map(|id| (id.to_string(), id.to_uppercase()))
                .collect::<PresentSet>(),
            pages: 1,
            truncated: false,
        }
    }

    fn live(marker: &str, viewers: u32) -> Liveness {
        Liveness::Active(LiveStream {
            start_marker: marker.to_string(),
            viewer_count: viewers,
            title: String::new(),
            category_id: String::new(),
            category_name: String::new(),
        })
    }

    fn engine() -> EngineState {
        EngineState::new(TargetKey::parse("chan").unwrap(), &EngineConfig::default())
    }

    #[test]
    fn failed_presence_tick_keeps_intervals_open() {
        let mut state = engine();
        state.apply_presence(Ok(snapshot(&["a"])), at("2026-01-31T10:00:00Z"));

        let effects = state.apply_presence(
            Err(FetchError::Transport("timeout".into())),
            at("2026-01-31T10:00:05Z"),
        );

        assert!(effects.persist.is_empty());
        assert!(matches!(effects.events[..], [ChangeEvent::StatusChanged(_)]));
        assert!(state.timeline().is_present("a"));
        assert_eq!(state.flow().len(), 1);
        assert_eq!(state.status().last_success_at, Some(at("2026-01-31T10:00:00Z")));
        assert_eq!(state.status().last_attempt_at, Some(at("2026-01-31T10:00:05Z")));
        assert!(state.status().error.as_deref().unwrap_or("").contains("timeout"));
    }

    #[test]
    fn successful_tick_clears_error_and_requests_persistence() {
        let mut state = engine();
        state.apply_presence(Err(FetchError::Unauthorized("expired".into())), at("2026-01-31T10:00:00Z"));
        let effects = state.apply_presence(Ok(snapshot(&["a", "b"])), at("2026-01-31T10:00:05Z"));

        assert!(effects.persist.contains(&Persist::Timeline));
        assert!(effects.persist.contains(&Persist::Flow));
        assert!(effects
            .events
            .contains(&ChangeEvent::IntervalsChanged { arrivals: 2, departures: 0 }));
        assert!(effects.events.iter().any(|e| matches!(e, ChangeEvent::WindowChanged(_))));
        assert_eq!(state.status().error, None);
        assert_eq!(state.status().present_count, 2);
    }

    #[test]
    fn truncated_snapshot_is_accepted_and_flagged() {
        let mut state = engine();
        let mut partial = snapshot(&["a"]);
        partial.truncated = true;
        state.apply_presence(Ok(partial), at("2026-01-31T10:00:00Z"));

        assert!(state.status().truncated);
        assert!(state.timeline().is_present("a"));
    }

    #[test]
    fn liveness_records_viewers_and_sessions() {
        let mut state = engine();
        let marker = "2026-01-31T09:00:00Z";
        let effects = state.apply_liveness(Ok(live(marker, 10)), at("2026-01-31T10:00:00Z"));
        state.apply_liveness(Ok(live(marker, 14)), at("2026-01-31T10:00:10Z"));

        assert!(effects.persist.contains(&Persist::Sessions));
        assert!(effects.persist.contains(&Persist::Viewers(marker.to_string())));
        assert!(effects.events.contains(&ChangeEvent::SessionsChanged));

        let series = state.viewer_series(marker).expect("series");
        assert_eq!(series.len(), 2);
        assert_eq!(state.sessions().active().map(|s| s.sample_count), Some(2));

        let view = state.view_model(at("2026-01-31T10:00:10Z"));
        assert_eq!(view.viewers.len(), 2);
        assert_eq!(view.viewers[1].delta, Some(4));
        assert!(view.sessions[0].live);
    }

    #[test]
    fn failed_liveness_tick_does_not_finalize() {
        let mut state = engine();
        let marker = "2026-01-31T09:00:00Z";
        state.apply_liveness(Ok(live(marker, 10)), at("2026-01-31T10:00:00Z"));
        let effects = state.apply_liveness(
            Err(FetchError::Upstream {
                status: 503,
                body: String::new(),
            }),
            at("2026-01-31T10:00:10Z"),
        );

        assert!(effects.persist.is_empty());
        assert_eq!(state.sessions().active_id(), Some(marker));
        assert!(state.sessions().active().map_or(false, Session::is_open));
    }

    #[test]
    fn adaptive_liveness_reports_new_interval() {
        let mut config = EngineConfig::default();
        config.polling.adaptive_liveness = true;
        let mut state = EngineState::new(TargetKey::parse("chan").unwrap(), &config);
        let marker = "2026-01-31T09:00:00Z";

        let first = state.apply_liveness(Ok(live(marker, 10)), at("2026-01-31T10:00:00Z"));
        let second = state.apply_liveness(Ok(live(marker, 10)), at("2026-01-31T10:00:10Z"));

        assert_eq!(first.next_liveness_interval, None);
        assert_eq!(second.next_liveness_interval, Some(Duration::from_secs(30)));
    }

    #[test]
    fn adaptive_cadence_does_not_insert_gap_markers() {
        let mut config = EngineConfig::default();
        config.polling.adaptive_liveness = true;
        let mut state = EngineState::new(TargetKey::parse("chan").unwrap(), &config);
        let marker = "2026-01-31T09:00:00Z";

        let mut now = at("2026-01-31T10:00:00Z");
        let mut interval = Duration::from_secs(10);
        for _ in 0..5 {
            let effects = state.apply_liveness(Ok(live(marker, 10)), now);
            if let Some(next) = effects.next_liveness_interval {
                interval = next;
            }
            now += chrono::Duration::from_std(interval).unwrap();
        }

        let series = state.viewer_series(marker).expect("series");
        assert_eq!(series.len(), 5);
        assert!(series.samples().iter().all(|sample| !sample.gap));
        let deltas: Vec<Option<i64>> = series.deltas().into_iter().map(|(_, delta)| delta).collect();
        assert_eq!(deltas, vec![None, Some(0), Some(0), Some(0), Some(0)]);
    }

    #[test]
    fn commit_and_load_round_trip() {
        let store = MemoryStore::new();
        let target = TargetKey::parse("Chan").unwrap();
        let config = EngineConfig::default();
        let mut state = EngineState::new(target.clone(), &config);

        let marker = "2026-01-31T09:00:00Z";
        let mut effects = state.apply_liveness(Ok(live(marker, 3)), at("2026-01-31T10:00:00Z"));
        effects.merge(state.apply_presence(Ok(snapshot(&["a"])), at("2026-01-31T10:00:00Z")));
        effects.merge(state.apply_presence(Ok(snapshot(&[])), at("2026-01-31T10:00:05Z")));
        effects.merge(state.fit_all(at("2026-01-31T10:00:05Z")));
        state.commit(&store, &effects).unwrap();

        let loaded = EngineState::load(&store, TargetKey::parse("chan").unwrap(), &config);
        assert_eq!(
            loaded.timeline().intervals("a"),
            &[PresenceInterval::closed(at("2026-01-31T10:00:00Z"), at("2026-01-31T10:00:05Z"))]
        );
        assert_eq!(loaded.flow().len(), 2);
        assert_eq!(loaded.sessions().active_id(), Some(marker));
        assert_eq!(loaded.viewport_mode(), ViewportMode::Pinned);
        assert_eq!(loaded.viewer_series(marker).map(ViewerSeries::len), Some(1));
    }

    #[test]
    fn corrupt_records_start_fresh() {
        let store = MemoryStore::new();
        let target = TargetKey::parse("chan").unwrap();
        store
            .set(&target.record(RecordKind::Timeline), &serde_json::json!([1, 2, 3]))
            .unwrap();
        store
            .set(&target.record(RecordKind::Sessions), &serde_json::json!({"bad": true}))
            .unwrap();

        let state = EngineState::load(&store, target, &EngineConfig::default());
        assert!(state.timeline().is_empty());
        assert!(state.sessions().sessions().is_empty());
    }

    #[test]
    fn following_selection_removes_saved_viewport() {
        let store = MemoryStore::new();
        let mut state = engine();
        let now = at("2026-01-31T12:00:00Z");
        state.apply_presence(Ok(snapshot(&["a"])), at("2026-01-31T10:00:00Z"));

        let manual = state.user_selection(at("2026-01-31T10:00:00Z"), at("2026-01-31T11:00:00Z"), now + chrono::Duration::seconds(5));
        state.commit(&store, &manual).unwrap();
        let key = state.target().record(RecordKind::Viewport);
        assert!(store.get(&key).unwrap().is_some());

        let back = state.follow(now + chrono::Duration::seconds(10));
        state.commit(&store, &back).unwrap();
        assert!(store.get(&key).unwrap().is_none());
        assert_eq!(
            store.get(&state.target().record(RecordKind::FitMode)).unwrap(),
            Some(serde_json::json!(false))
        );
    }

    #[test]
    fn import_merges_into_existing_timeline() {
        let mut state = engine();
        state.apply_presence(Ok(snapshot(&["a"])), at("2026-01-31T10:00:00Z"));
        state.apply_presence(Ok(snapshot(&[])), at("2026-01-31T10:10:00Z"));

        let mut other = PresenceTimeline::new();
        other.reconcile(&snapshot(&["a", "b"]).present, at("2026-01-31T10:05:00Z"));
        other.reconcile(&PresentSet::new(), at("2026-01-31T10:20:00Z"));

        let effects = state.import_timeline(other, at("2026-01-31T11:00:00Z"));
        assert!(effects.persist.contains(&Persist::Timeline));
        assert_eq!(
            state.timeline().intervals("a"),
            &[PresenceInterval::closed(at("2026-01-31T10:00:00Z"), at("2026-01-31T10:20:00Z"))]
        );
        assert_eq!(state.timeline().len(), 2);
    }

    #[test]
    fn clear_target_removes_every_owned_key() {
        let store = MemoryStore::new();
        let target = TargetKey::parse("chan").unwrap();
        let mut state = EngineState::new(target.clone(), &EngineConfig::default());
        let mut effects = state.apply_liveness(Ok(live("2026-01-31T09:00:00Z", 1)), at("2026-01-31T10:00:00Z"));
        effects.merge(state.apply_presence(Ok(snapshot(&["a"])), at("2026-01-31T10:00:00Z")));
        effects.merge(state.fit_all(at("2026-01-31T10:00:00Z")));
        state.commit(&store, &effects).unwrap();
        store.set("other:timeline", &serde_json::json!({"users": {}})).unwrap();

        // timeline, sessions, flow, fit-mode and one viewer series
        let removed = clear_target(&store, &target).unwrap();
        assert_eq!(removed, 5);
        assert!(store.keys_with_prefix("chan:").unwrap().is_empty());
        assert!(store.get("other:timeline").unwrap().is_some());

        state.reset();
        assert!(state.timeline().is_empty());
    }

    #[test]
    fn view_model_lists_rows_and_window() {
        let mut state = engine();
        state.apply_presence(Ok(snapshot(&["b", "a"])), at("2026-01-31T10:00:00Z"));
        state.apply_presence(Ok(snapshot(&["b"])), at("2026-01-31T10:00:05Z"));

        let view = state.view_model(at("2026-01-31T10:00:05Z"));
        assert_eq!(view.entity_rows, vec!["b", "a"]);
        assert_eq!(view.names["a"], "A");
        assert!(view.pinned_to_live_edge);
        assert!(view.window.start <= view.window.end);
        assert_eq!(view.flow.len(), 2);
        assert!(view.viewers.is_empty());
    }
}
