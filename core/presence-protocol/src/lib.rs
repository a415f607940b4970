//! Wire types shared by the presence engine and its clients.
//!
//! Two families live here:
//!
//! - Upstream payloads (Helix-style `{ data, pagination }` envelopes) for the
//!   present-set, liveness and user lookups. Decoding is lenient: unknown
//!   fields are ignored and missing optional fields default, because the
//!   upstream is a best-effort snapshot API.
//! - The render view-model handed to sinks. Sinks only ever see these types,
//!   so the engine can change internally without breaking consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const VIEW_SCHEMA_VERSION: u32 = 1;

/// Hard cap on pages followed for a single present-set poll.
pub const MAX_PRESENCE_PAGES: usize = 10;
/// Page size requested from the present-set endpoint (upstream maximum).
pub const PRESENCE_PAGE_SIZE: usize = 1000;

pub const USERS_PATH: &str = "/users";
pub const CHATTERS_PATH: &str = "/chat/chatters";
pub const STREAMS_PATH: &str = "/streams";

// ═══════════════════════════════════════════════════════════════════════════════
// Upstream payloads
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Generic `{ data: [...], pagination: { cursor } }` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

impl<T> Page<T> {
    /// Continuation cursor, treating an empty string the same as a missing one.
    pub fn next_cursor(&self) -> Option<&str> {
        self.pagination
            .as_ref()
            .and_then(|p| p.cursor.as_deref())
            .filter(|cursor| !cursor.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatterEntry {
    #[serde(default)]
    pub user_id: String,
    pub user_login: String,
    #[serde(default)]
    pub user_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamEntry {
    #[serde(default)]
    pub started_at: String,
    #[serde(default)]
    pub viewer_count: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub game_id: String,
    #[serde(default)]
    pub game_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserEntry {
    pub id: String,
    pub login: String,
    #[serde(default)]
    pub display_name: String,
}

/// Decodes an upstream envelope from an already-parsed JSON value.
pub fn parse_page<T>(value: Value) -> Result<Page<T>, String>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(value).map_err(|err| format!("Malformed upstream page: {}", err))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Timeline records
// ═══════════════════════════════════════════════════════════════════════════════

/// One contiguous stretch of presence for an entity.
///
/// `end == None` means the entity was still present as of the last
/// successful poll.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceInterval {
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl PresenceInterval {
    pub fn open(start: DateTime<Utc>) -> Self {
        Self { start, end: None }
    }

    pub fn closed(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// End for drawing and extent purposes; open intervals extend to `now`.
    pub fn end_or(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.end.unwrap_or(now).max(self.start)
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.start <= end && self.end_or(now) >= start
    }
}

/// Arrivals and departures observed on one presence tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FlowPoint {
    pub t: DateTime<Utc>,
    pub arrivals: u32,
    pub departures: u32,
    #[serde(default)]
    pub arrival_names: Vec<String>,
    #[serde(default)]
    pub departure_names: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Render view-model
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowView {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionMarker {
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub live: bool,
    pub sample_count: u32,
}

/// One point of the viewer-count chart. Gap markers carry no count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewerPoint {
    pub t: DateTime<Utc>,
    pub viewers: Option<u32>,
    pub delta: Option<i64>,
    #[serde(default)]
    pub gap: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub present_count: usize,
    pub truncated: bool,
    pub error: Option<String>,
}

/// Everything a sink needs to draw the timeline, recomputed on every change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimelineView {
    pub version: u32,
    pub target: String,
    pub generated_at: DateTime<Utc>,
    pub entity_rows: Vec<String>,
    pub names: BTreeMap<String, String>,
    pub intervals: BTreeMap<String, Vec<PresenceInterval>>,
    pub flow: Vec<FlowPoint>,
    pub window: WindowView,
    /// False only while a manual selection holds the window.
    pub pinned_to_live_edge: bool,
    pub sessions: Vec<SessionMarker>,
    /// Viewer series of the session the window is focused on, if any.
    #[serde(default)]
    pub viewers: Vec<ViewerPoint>,
    pub status: StatusView,
}
