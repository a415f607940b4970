//! Viewport controller: decides which time window the render sink shows.
//!
//! # Modes
//!
//! - **Following**: the selection ends at the live edge (`now + live_pad`) and
//!   starts at the active session start (minus pre-pad) or a fixed lookback.
//! - **Pinned**: "fit to all data". Recomputed from the full data extent on
//!   every tick, so it grows as data arrives.
//! - **ManuallyPositioned**: the user dragged or zoomed. The selection is frozen
//!   and persisted; it only returns to Following when the user's new end lands
//!   within the snap tolerance of the live edge.
//!
//! # Full range
//!
//! Derived on every recompute, never persisted: the union of presence and
//! session extents, widened by `pre_pad` at the front and extended to
//! `max(data_end, now) + live_pad` at the back. With no data at all it is
//! `[now - lookback, now + live_pad]`.
//!
//! # Invariants
//!
//! The emitted selection always satisfies
//! `full_start <= selection_start <= selection_end <= full_end`. A clamped
//! manual selection that no longer contains any data is replaced by the full
//! range when data exists.
//!
//! # Echo suppression
//!
//! Render sinks typically report every window change back as a zoom event,
//! including the ones we wrote ourselves. Each programmatic change arms a short
//! suppression window; the first zoom reported inside it is dropped.

use chrono::{DateTime, Duration, Utc};
use presence_protocol::WindowView;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::intervals::PresenceTimeline;
use crate::sessions::{SessionDetector, SessionSelection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportSettings {
    pub lookback: Duration,
    pub pre_pad: Duration,
    pub live_pad: Duration,
    pub finished_pad: Duration,
    pub snap_tolerance: Duration,
    pub echo_suppression: Duration,
}

impl Default for ViewportSettings {
    fn default() -> Self {
        Self {
            lookback: Duration::hours(1),
            pre_pad: Duration::minutes(30),
            live_pad: Duration::minutes(5),
            finished_pad: Duration::minutes(30),
            snap_tolerance: Duration::seconds(60),
            echo_suppression: Duration::milliseconds(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewportMode {
    Following,
    Pinned,
    ManuallyPositioned,
}

/// A manual selection as persisted under the `viewport` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub full_range_start: DateTime<Utc>,
    pub full_range_end: DateTime<Utc>,
    pub selection_start: DateTime<Utc>,
    pub selection_end: DateTime<Utc>,
    pub mode: ViewportMode,
}

impl Viewport {
    /// True while the window end tracks `full_range_end`. Fit-all keeps
    /// tracking it, only a manual selection lets go.
    pub fn pinned_to_live_edge(&self) -> bool {
        self.mode != ViewportMode::ManuallyPositioned
    }

    pub fn window(&self) -> WindowView {
        WindowView {
            start: self.selection_start,
            end: self.selection_end,
        }
    }
}

/// Outcome of a user-driven selection change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// Dropped as the echo of our own programmatic write.
    Echo,
    /// Snapping collapsed the window; the previous selection is kept.
    Collapsed,
    /// The end reached the live edge; back to Following.
    Following,
    /// Frozen as a manual selection.
    Manual(SelectionRecord),
}

#[derive(Debug, Clone)]
pub struct ViewportController {
    settings: ViewportSettings,
    mode: ViewportMode,
    manual: Option<SelectionRecord>,
    last_emitted: Option<Viewport>,
    suppress_until: Option<DateTime<Utc>>,
}

impl ViewportController {
    pub fn new(settings: ViewportSettings) -> Self {
        Self {
            settings,
            mode: ViewportMode::Following,
            manual: None,
            last_emitted: None,
            suppress_until: None,
        }
    }

    /// Restores persisted state: fit-mode wins, then a saved manual selection,
    /// else Following.
    pub fn restore(settings: ViewportSettings, fit_mode: bool, manual: Option<SelectionRecord>) -> Self {
        let mut controller = Self::new(settings);
        controller.manual = manual.filter(|m| m.start < m.end);
        controller.mode = if fit_mode {
            ViewportMode::Pinned
        } else if controller.manual.is_some() {
            ViewportMode::ManuallyPositioned
        } else {
            ViewportMode::Following
        };
        controller
    }

    pub fn mode(&self) -> ViewportMode {
        self.mode
    }

    pub fn fit_mode(&self) -> bool {
        self.mode == ViewportMode::Pinned
    }

    pub fn manual_selection(&self) -> Option<SelectionRecord> {
        match self.mode {
            ViewportMode::ManuallyPositioned => self.manual,
            _ => None,
        }
    }

    pub fn last_emitted(&self) -> Option<&Viewport> {
        self.last_emitted.as_ref()
    }

    /// Enters Pinned ("fit to all data").
    pub fn fit_all(&mut self) {
        if self.mode != ViewportMode::Pinned {
            info!(from = ?self.mode, "Viewport pinned to full extent");
        }
        self.mode = ViewportMode::Pinned;
    }

    /// Returns to following the live edge.
    pub fn follow(&mut self) {
        if self.mode != ViewportMode::Following {
            info!(from = ?self.mode, "Viewport following live edge");
        }
        self.mode = ViewportMode::Following;
        self.manual = None;
    }

    /// Shows one session: the active one is followed, a finalized one is
    /// framed with pre/post padding as a manual selection.
    pub fn focus_session(&mut self, sessions: &SessionDetector, id: &str) -> Option<SelectionOutcome> {
        let session = sessions.get(id)?;
        if sessions.active_id() == Some(id) {
            self.follow();
            return Some(SelectionOutcome::Following);
        }
        let end = session.end.unwrap_or(session.start);
        let record = SelectionRecord {
            start: session.start - self.settings.pre_pad,
            end: end + self.settings.finished_pad,
        };
        self.set_manual(record);
        Some(SelectionOutcome::Manual(record))
    }

    fn set_manual(&mut self, record: SelectionRecord) {
        if self.mode != ViewportMode::ManuallyPositioned {
            info!(from = ?self.mode, "Viewport manually positioned");
        }
        self.mode = ViewportMode::ManuallyPositioned;
        self.manual = Some(record);
    }

    /// Handles a drag/zoom reported by the render sink.
    pub fn user_selection(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        boundaries: &[DateTime<Utc>],
        now: DateTime<Utc>,
    ) -> SelectionOutcome {
        if let Some(until) = self.suppress_until.take() {
            if now < until {
                debug!("Ignoring zoom echo of programmatic window change");
                return SelectionOutcome::Echo;
            }
        }

        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        let tolerance = self.settings.snap_tolerance;
        let start = snap(start, boundaries, tolerance);
        let end = snap(end, boundaries, tolerance);

        if end <= start {
            debug!(start = %start, end = %end, "Snapped selection collapsed; keeping previous");
            return SelectionOutcome::Collapsed;
        }

        if end >= now - tolerance {
            self.follow();
            return SelectionOutcome::Following;
        }

        let record = SelectionRecord { start, end };
        self.set_manual(record);
        SelectionOutcome::Manual(record)
    }

    /// Computes the window to emit. Returns the viewport and whether it differs
    /// from the previously emitted one; a change arms echo suppression.
    pub fn recompute(
        &mut self,
        timeline: &PresenceTimeline,
        sessions: &SessionDetector,
        now: DateTime<Utc>,
    ) -> (Viewport, bool) {
        let s = self.settings;
        let extent = data_extent(timeline, sessions, now);

        let (full_start, full_end) = match extent {
            Some((lo, hi)) => (lo.min(now) - s.pre_pad, hi.max(now) + s.live_pad),
            None => (now - s.lookback, now + s.live_pad),
        };

        let (start, end) = match self.mode {
            ViewportMode::Pinned => (full_start, full_end),
            ViewportMode::Following => {
                let start = match sessions.default_selection() {
                    SessionSelection::Active(id) => sessions
                        .get(&id)
                        .map(|session| session.start - s.pre_pad)
                        .unwrap_or(now - s.lookback),
                    _ => now - s.lookback,
                };
                (start, full_end)
            }
            ViewportMode::ManuallyPositioned => match self.manual {
                Some(record) => (record.start, record.end),
                None => (full_start, full_end),
            },
        };

        let (mut start, mut end) = clamp(start, end, full_start, full_end);
        if self.mode == ViewportMode::ManuallyPositioned
            && extent.is_some()
            && !has_data(timeline, sessions, start, end, now)
        {
            debug!("Manual selection holds no data; showing full extent");
            start = full_start;
            end = full_end;
        }

        let viewport = Viewport {
            full_range_start: full_start,
            full_range_end: full_end,
            selection_start: start,
            selection_end: end,
            mode: self.mode,
        };

        let changed = self.last_emitted.map_or(true, |last| {
            last.selection_start != start || last.selection_end != end || last.mode != self.mode
        });
        if changed {
            self.suppress_until = Some(now + s.echo_suppression);
        }
        self.last_emitted = Some(viewport);
        (viewport, changed)
    }
}

fn data_extent(
    timeline: &PresenceTimeline,
    sessions: &SessionDetector,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    match (timeline.extent(now), sessions.extent(now)) {
        (Some((a0, a1)), Some((b0, b1))) => Some((a0.min(b0), a1.max(b1))),
        (Some(extent), None) | (None, Some(extent)) => Some(extent),
        (None, None) => None,
    }
}

fn has_data(
    timeline: &PresenceTimeline,
    sessions: &SessionDetector,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    timeline.has_data_in(start, end, now)
        || sessions
            .sessions()
            .iter()
            .any(|session| session.start <= end && session.end_or(now) >= start)
}

fn clamp(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    lo: DateTime<Utc>,
    hi: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = start.max(lo).min(hi);
    let end = end.min(hi).max(start);
    (start, end)
}

/// Pulls `edge` onto the nearest boundary within `tolerance`.
fn snap(edge: DateTime<Utc>, boundaries: &[DateTime<Utc>], tolerance: Duration) -> DateTime<Utc> {
    let limit = tolerance.num_milliseconds();
    boundaries
        .iter()
        .map(|boundary| (*boundary, (edge - *boundary).num_milliseconds().abs()))
        .filter(|(_, distance)| *distance <= limit)
        .min_by_key(|(_, distance)| *distance)
        .map(|(boundary, _)| boundary)
        .unwrap_or(edge)
}
