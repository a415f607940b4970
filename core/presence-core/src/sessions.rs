//! Session lifecycle detection from periodic liveness samples.
//!
//! A session is one continuous "activity is live" stretch, identified by the
//! upstream start marker (the stream's `started_at`). Markers are stable across
//! restarts, which is what makes creation idempotent: seeing a marker that is
//! already in the log never creates a second record.
//!
//! # Transitions
//!
//! ```text
//! Offline ──active(m)──▶ Live(m)          create-or-track m
//! Live(m) ──inactive───▶ Offline          finalize m (once)
//! Live(m) ──active(m)──▶ Live(m)          sample only
//! Live(m) ──active(n)──▶ Live(n)          finalize m, create-or-track n
//! ```
//!
//! A marker whose session is already finalized is handled by the
//! [`ReactivationPolicy`]. Under `KeepFinalized` the detector stays `Offline`
//! and ignores that marker until the upstream reports something else.
//!
//! The log is append-only apart from setting `end` and bumping `sample_count`.
//! At most one session is open at a time, and only an open session is live.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default, alias = "count")]
    pub sample_count: u32,
    #[serde(default)]
    pub last_sample_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Latest instant this session is known to cover.
    pub fn end_or(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.end.unwrap_or(now).max(self.start)
    }
}

/// Snapshot of the live stream reported by the liveness query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveStream {
    pub start_marker: String,
    pub viewer_count: u32,
    pub title: String,
    pub category_id: String,
    pub category_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    Inactive,
    Active(LiveStream),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Offline,
    Live(String),
}

/// What to do when a marker whose session was already finalized shows up live
/// again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactivationPolicy {
    /// Keep the first recorded `end` and ignore the marker while it stays live.
    #[default]
    KeepFinalized,
    /// Clear `end` so the session continues.
    Reopen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started(String),
    Reactivated(String),
    Finalized(String),
    Sampled(String),
}

/// Which session the viewport should show when the user has not chosen one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSelection {
    Active(String),
    Finalized(String),
    Offline,
}

#[derive(Debug, Clone)]
pub struct SessionDetector {
    state: SessionState,
    sessions: Vec<Session>,
    policy: ReactivationPolicy,
    /// Finalized marker the upstream still reports live (`KeepFinalized`).
    ignored: Option<String>,
}

impl SessionDetector {
    pub fn new(policy: ReactivationPolicy) -> Self {
        Self {
            state: SessionState::Offline,
            sessions: Vec::new(),
            policy,
            ignored: None,
        }
    }

    /// Restores from a persisted log. An open session means we were live when
    /// the log was last written; the next liveness sample decides whether it
    /// still is. If several are open (hand-edited or legacy logs), all but the
    /// newest are closed at their last sample.
    pub fn from_log(mut sessions: Vec<Session>, policy: ReactivationPolicy) -> Self {
        sessions.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        sessions.dedup_by(|later, earlier| later.id == earlier.id);

        let newest_open = sessions.iter().rposition(Session::is_open);
        for (index, session) in sessions.iter_mut().enumerate() {
            if session.is_open() && Some(index) != newest_open {
                session.end = Some(session.last_sample_at.unwrap_or(session.start));
            }
        }

        let state = match newest_open {
            Some(index) => SessionState::Live(sessions[index].id.clone()),
            None => SessionState::Offline,
        };

        Self {
            state,
            sessions,
            policy,
            ignored: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn active_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Live(id) => Some(id),
            SessionState::Offline => None,
        }
    }

    pub fn active(&self) -> Option<&Session> {
        self.active_id().and_then(|id| self.get(id))
    }

    pub fn observe(&mut self, liveness: &Liveness, now: DateTime<Utc>) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        match liveness {
            Liveness::Inactive => {
                self.ignored = None;
                if let SessionState::Live(id) = std::mem::replace(&mut self.state, SessionState::Offline) {
                    self.finalize(&id, now, &mut events);
                }
            }
            Liveness::Active(stream) => {
                let marker = stream.start_marker.as_str();
                let tracked = self.active_id().map(str::to_string);

                match tracked {
                    Some(id) if marker.is_empty() || id == marker => {}
                    // No marker and nothing tracked: nothing to key a session on.
                    None if marker.is_empty() => return events,
                    None if self.ignored.as_deref() == Some(marker) => return events,
                    Some(previous) => {
                        self.finalize(&previous, now, &mut events);
                        self.activate(marker, now, &mut events);
                    }
                    None => self.activate(marker, now, &mut events),
                }

                if let SessionState::Live(id) = &self.state {
                    let id = id.clone();
                    if let Some(session) = self.sessions.iter_mut().find(|s| s.id == id) {
                        session.sample_count = session.sample_count.saturating_add(1);
                        session.last_sample_at = Some(now);
                    }
                    events.push(SessionEvent::Sampled(id));
                }
            }
        }

        events
    }

    fn activate(&mut self, marker: &str, now: DateTime<Utc>, events: &mut Vec<SessionEvent>) {
        let others: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| s.is_open() && s.id != marker)
            .map(|s| s.id.clone())
            .collect();
        for id in others {
            self.finalize(&id, now, events);
        }

        let policy = self.policy;
        self.ignored = None;
        match self.sessions.iter_mut().find(|s| s.id == marker) {
            Some(existing) if existing.is_open() => {
                debug!(session = %marker, "Tracking existing open session");
            }
            Some(existing) => {
                info!(session = %marker, policy = ?policy, "Finalized session reported live again");
                events.push(SessionEvent::Reactivated(marker.to_string()));
                match policy {
                    ReactivationPolicy::Reopen => existing.end = None,
                    ReactivationPolicy::KeepFinalized => {
                        self.ignored = Some(marker.to_string());
                        self.state = SessionState::Offline;
                        return;
                    }
                }
            }
            None => {
                let start = DateTime::parse_from_rfc3339(marker)
                    .map(|parsed| parsed.with_timezone(&Utc))
                    .unwrap_or(now);
                self.sessions.push(Session {
                    id: marker.to_string(),
                    start,
                    end: None,
                    sample_count: 0,
                    last_sample_at: None,
                });
                info!(session = %marker, start = %start, "Session started");
                events.push(SessionEvent::Started(marker.to_string()));
            }
        }

        self.state = SessionState::Live(marker.to_string());
    }

    fn finalize(&mut self, id: &str, now: DateTime<Utc>, events: &mut Vec<SessionEvent>) {
        if let Some(session) = self.sessions.iter_mut().find(|s| s.id == id) {
            if session.end.is_none() {
                session.end = Some(now.max(session.start));
                info!(session = %id, end = %now, samples = session.sample_count, "Session finalized");
                events.push(SessionEvent::Finalized(id.to_string()));
            }
        }
    }

    pub fn default_selection(&self) -> SessionSelection {
        if let Some(id) = self.active_id() {
            return SessionSelection::Active(id.to_string());
        }
        self.finalized_newest_first()
            .next()
            .map(|s| SessionSelection::Finalized(s.id.clone()))
            .unwrap_or(SessionSelection::Offline)
    }

    /// The active session (flagged live) followed by the five most recent
    /// other sessions, newest first.
    pub fn labels(&self) -> Vec<(&Session, bool)> {
        let active = self.active();
        let mut labels: Vec<(&Session, bool)> = active.iter().map(|s| (*s, true)).collect();
        labels.extend(
            self.finalized_newest_first()
                .filter(|s| active.map_or(true, |a| a.id != s.id))
                .take(5)
                .map(|s| (s, false)),
        );
        labels
    }

    fn finalized_newest_first(&self) -> impl Iterator<Item = &Session> {
        let mut finalized: Vec<&Session> = self.sessions.iter().filter(|s| !s.is_open()).collect();
        finalized.sort_by(|a, b| b.start.cmp(&a.start));
        finalized.into_iter()
    }

    /// Every session start and end, for snapping viewport edges.
    pub fn boundaries(&self) -> Vec<DateTime<Utc>> {
        let mut boundaries: Vec<DateTime<Utc>> = self
            .sessions
            .iter()
            .flat_map(|s| std::iter::once(s.start).chain(s.end))
            .collect();
        boundaries.sort();
        boundaries.dedup();
        boundaries
    }

    pub fn extent(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.sessions.iter().map(|s| s.start).min()?;
        let end = self.sessions.iter().map(|s| s.end_or(now)).max()?;
        Some((start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("parse")
            .with_timezone(&Utc)
    }

    fn live(marker: &str) -> Liveness {
        Liveness::Active(LiveStream {
            start_marker: marker.to_string(),
            viewer_count: 10,
            title: "title".to_string(),
            category_id: "1".to_string(),
            category_name: "Chatting".to_string(),
        })
    }

    const S1: &str = "2026-01-31T09:55:00Z";
    const S2: &str = "2026-01-31T12:00:00Z";

    fn open_count(detector: &SessionDetector) -> usize {
        detector.sessions().iter().filter(|s| s.is_open()).count()
    }

    #[test]
    fn finalized_session_is_not_recreated_or_reopened_by_default() {
        let t0 = at("2026-01-31T10:00:00Z");
        let t1 = at("2026-01-31T10:00:10Z");
        let t2 = at("2026-01-31T10:00:20Z");
        let mut detector = SessionDetector::new(ReactivationPolicy::default());

        let events = detector.observe(&live(S1), t0);
        assert!(events.contains(&SessionEvent::Started(S1.to_string())));
        let events = detector.observe(&Liveness::Inactive, t1);
        assert_eq!(events, vec![SessionEvent::Finalized(S1.to_string())]);
        let events = detector.observe(&live(S1), t2);
        assert_eq!(events, vec![SessionEvent::Reactivated(S1.to_string())]);
        let events = detector.observe(&live(S1), t2 + chrono::Duration::seconds(10));
        assert!(events.is_empty());

        assert_eq!(detector.sessions().len(), 1);
        let session = &detector.sessions()[0];
        assert_eq!(session.start, at(S1));
        assert_eq!(session.end, Some(t1));
        assert_eq!(session.sample_count, 1);
        assert_eq!(detector.state(), &SessionState::Offline);
        assert_eq!(detector.active(), None);
        assert_eq!(
            detector.default_selection(),
            SessionSelection::Finalized(S1.to_string())
        );
        assert!(detector.labels().iter().all(|(session, live)| !live || session.is_open()));
    }

    #[test]
    fn new_marker_after_ignored_reactivation_starts_a_session() {
        let mut detector = SessionDetector::new(ReactivationPolicy::default());
        detector.observe(&live(S1), at("2026-01-31T10:00:00Z"));
        detector.observe(&Liveness::Inactive, at("2026-01-31T10:00:10Z"));
        detector.observe(&live(S1), at("2026-01-31T10:00:20Z"));

        let events = detector.observe(&live(S2), at("2026-01-31T12:00:05Z"));
        assert!(events.contains(&SessionEvent::Started(S2.to_string())));
        assert_eq!(detector.active_id(), Some(S2));
        assert_eq!(open_count(&detector), 1);
    }

    #[test]
    fn reopen_policy_clears_end() {
        let mut detector = SessionDetector::new(ReactivationPolicy::Reopen);
        detector.observe(&live(S1), at("2026-01-31T10:00:00Z"));
        detector.observe(&Liveness::Inactive, at("2026-01-31T10:00:10Z"));
        detector.observe(&live(S1), at("2026-01-31T10:00:20Z"));

        assert_eq!(detector.sessions().len(), 1);
        assert!(detector.sessions()[0].is_open());
        assert_eq!(detector.active_id(), Some(S1));
    }

    #[test]
    fn repeated_inactivity_finalizes_once() {
        let mut detector = SessionDetector::new(ReactivationPolicy::default());
        detector.observe(&live(S1), at("2026-01-31T10:00:00Z"));
        detector.observe(&Liveness::Inactive, at("2026-01-31T10:00:10Z"));
        let events = detector.observe(&Liveness::Inactive, at("2026-01-31T10:00:20Z"));

        assert!(events.is_empty());
        assert_eq!(detector.sessions()[0].end, Some(at("2026-01-31T10:00:10Z")));
    }

    #[test]
    fn marker_change_finalizes_previous_session() {
        let mut detector = SessionDetector::new(ReactivationPolicy::default());
        detector.observe(&live(S1), at("2026-01-31T10:00:00Z"));
        let events = detector.observe(&live(S2), at("2026-01-31T12:00:05Z"));

        assert_eq!(events[0], SessionEvent::Finalized(S1.to_string()));
        assert!(events.contains(&SessionEvent::Started(S2.to_string())));
        assert_eq!(open_count(&detector), 1);
        assert_eq!(detector.active_id(), Some(S2));
    }

    #[test]
    fn samples_are_counted_on_every_active_observation() {
        let mut detector = SessionDetector::new(ReactivationPolicy::default());
        for n in 0..3 {
            detector.observe(&live(S1), at("2026-01-31T10:00:00Z") + chrono::Duration::seconds(n * 10));
        }
        let session = detector.active().expect("active");
        assert_eq!(session.sample_count, 3);
        assert_eq!(session.last_sample_at, Some(at("2026-01-31T10:00:20Z")));
    }

    #[test]
    fn restart_while_live_tracks_existing_session() {
        let mut first = SessionDetector::new(ReactivationPolicy::default());
        first.observe(&live(S1), at("2026-01-31T10:00:00Z"));
        let log = first.sessions().to_vec();

        let mut restored = SessionDetector::from_log(log, ReactivationPolicy::default());
        assert_eq!(restored.active_id(), Some(S1));
        let events = restored.observe(&live(S1), at("2026-01-31T10:05:00Z"));

        assert_eq!(events, vec![SessionEvent::Sampled(S1.to_string())]);
        assert_eq!(restored.sessions().len(), 1);
        assert_eq!(restored.sessions()[0].sample_count, 2);
    }

    #[test]
    fn restored_log_keeps_at_most_one_open_session() {
        let open = |id: &str| Session {
            id: id.to_string(),
            start: at(id),
            end: None,
            sample_count: 1,
            last_sample_at: None,
        };
        let detector = SessionDetector::from_log(vec![open(S2), open(S1)], ReactivationPolicy::default());

        assert_eq!(open_count(&detector), 1);
        assert_eq!(detector.active_id(), Some(S2));
        assert_eq!(detector.get(S1).and_then(|s| s.end), Some(at(S1)));
    }

    #[test]
    fn empty_marker_does_not_create_a_session() {
        let mut detector = SessionDetector::new(ReactivationPolicy::default());
        let events = detector.observe(&live(""), at("2026-01-31T10:00:00Z"));
        assert!(events.is_empty());
        assert!(detector.sessions().is_empty());
    }

    #[test]
    fn unparseable_marker_starts_at_observation_time() {
        let mut detector = SessionDetector::new(ReactivationPolicy::default());
        let now = at("2026-01-31T10:00:00Z");
        detector.observe(&live("opaque-marker"), now);
        assert_eq!(detector.sessions()[0].start, now);
    }

    #[test]
    fn default_selection_prefers_active_then_latest_finalized() {
        let mut detector = SessionDetector::new(ReactivationPolicy::default());
        assert_eq!(detector.default_selection(), SessionSelection::Offline);

        detector.observe(&live(S1), at("2026-01-31T10:00:00Z"));
        assert_eq!(
            detector.default_selection(),
            SessionSelection::Active(S1.to_string())
        );

        detector.observe(&Liveness::Inactive, at("2026-01-31T11:00:00Z"));
        assert_eq!(
            detector.default_selection(),
            SessionSelection::Finalized(S1.to_string())
        );
    }

    #[test]
    fn labels_show_live_then_five_recent() {
        let mut detector = SessionDetector::new(ReactivationPolicy::default());
        let base = at("2026-01-01T00:00:00Z");
        for day in 0..7 {
            let start = base + chrono::Duration::days(day);
            let marker = start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
            detector.observe(&live(&marker), start);
            detector.observe(&Liveness::Inactive, start + chrono::Duration::hours(2));
        }
        let marker = "2026-02-01T00:00:00Z";
        detector.observe(&live(marker), at(marker));

        let labels = detector.labels();
        assert_eq!(labels.len(), 6);
        assert_eq!(labels[0].0.id, marker);
        assert!(labels[0].1);
        assert_eq!(labels[1].0.id, "2026-01-07T00:00:00Z");
        assert!(labels[1..].iter().all(|(_, live)| !live));
    }

    #[test]
    fn boundaries_include_starts_and_ends() {
        let mut detector = SessionDetector::new(ReactivationPolicy::default());
        detector.observe(&live(S1), at("2026-01-31T10:00:00Z"));
        detector.observe(&Liveness::Inactive, at("2026-01-31T11:00:00Z"));
        assert_eq!(
            detector.boundaries(),
            vec![at(S1), at("2026-01-31T11:00:00Z")]
        );
    }
}
