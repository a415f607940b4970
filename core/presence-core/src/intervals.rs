//! Presence interval engine: turns present-set snapshots into per-entity
//! intervals.
//!
//! # Model
//!
//! Every entity ever observed owns an ordered list of [`PresenceInterval`]s,
//! ascending by start and non-overlapping. Only the last interval may be open
//! (`end == None`), meaning "present as of the last successful poll".
//!
//! # Reconcile
//!
//! Each successful tick diffs the present set against the open intervals:
//!
//! | Previously open | Present now | Effect                          |
//! |-----------------|-------------|---------------------------------|
//! | yes             | no          | close at `now` (departure)      |
//! | no              | yes         | open at `now` (arrival)         |
//! | yes             | yes         | unchanged                       |
//!
//! A failed tick never reaches this module, so "fetch failed" can never be
//! read as "everyone left".
//!
//! Identity is by entity id. Display names are captured the first time a
//! non-empty one is seen and retained after that.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use presence_protocol::PresenceInterval;
use serde::{Deserialize, Serialize};

/// Entity id → display name (possibly empty) for one poll.
pub type PresentSet = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub intervals: Vec<PresenceInterval>,
}

impl EntityRecord {
    fn is_present(&self) -> bool {
        self.intervals.last().is_some_and(PresenceInterval::is_open)
    }
}

/// Arrivals and departures produced by one reconcile, as sorted entity ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceDiff {
    pub arrivals: Vec<String>,
    pub departures: Vec<String>,
}

impl PresenceDiff {
    pub fn is_empty(&self) -> bool {
        self.arrivals.is_empty() && self.departures.is_empty()
    }
}

/// Persisted as `{ "users": { "<id>": { "name": "...", "intervals": [...] } } }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceTimeline {
    #[serde(default)]
    users: BTreeMap<String, EntityRecord>,
}

impl PresenceTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes a timeline decoded from storage or an import document:
    /// every entity's intervals are coalesced.
    pub fn normalized(mut self) -> Self {
        for record in self.users.values_mut() {
            record.intervals = coalesce(std::mem::take(&mut record.intervals));
        }
        self.users.retain(|_, record| !record.intervals.is_empty());
        self
    }

    pub fn reconcile(&mut self, present: &PresentSet, now: DateTime<Utc>) -> PresenceDiff {
        let mut diff = PresenceDiff::default();

        for (id, record) in self.users.iter_mut() {
            if present.contains_key(id) {
                continue;
            }
            if let Some(last) = record.intervals.last_mut() {
                if last.is_open() {
                    last.end = Some(now.max(last.start));
                    diff.departures.push(id.clone());
                }
            }
        }

        for (id, name) in present {
            let record = self.users.entry(id.clone()).or_default();
            if record.name.is_empty() && !name.is_empty() {
                record.name = name.clone();
            }
            if record.is_present() {
                continue;
            }

            // A tick stamped at or before the previous close continues that
            // interval rather than creating an overlap.
            let continues = record
                .intervals
                .last()
                .and_then(|last| last.end)
                .is_some_and(|end| end >= now);
            match record.intervals.last_mut() {
                Some(last) if continues => last.end = None,
                _ => record.intervals.push(PresenceInterval::open(now)),
            }
            diff.arrivals.push(id.clone());
        }

        diff
    }

    /// Merges another timeline in, coalescing per entity. The first non-empty
    /// name wins.
    pub fn merge_from(&mut self, other: PresenceTimeline) {
        for (id, incoming) in other.users {
            let record = self.users.entry(id).or_default();
            if record.name.is_empty() {
                record.name = incoming.name;
            }
            let mut combined = std::mem::take(&mut record.intervals);
            combined.extend(incoming.intervals);
            record.intervals = coalesce(combined);
        }
        self.users.retain(|_, record| !record.intervals.is_empty());
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn intervals(&self, id: &str) -> &[PresenceInterval] {
        self.users
            .get(id)
            .map(|record| record.intervals.as_slice())
            .unwrap_or(&[])
    }

    /// Display label: the captured name, falling back to the id.
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        match self.users.get(id) {
            Some(record) if !record.name.is_empty() => &record.name,
            _ => id,
        }
    }

    pub fn is_present(&self, id: &str) -> bool {
        self.users.get(id).is_some_and(EntityRecord::is_present)
    }

    pub fn present_count(&self) -> usize {
        self.users.values().filter(|r| r.is_present()).count()
    }

    pub fn entities(&self) -> impl Iterator<Item = (&String, &EntityRecord)> {
        self.users.iter()
    }

    /// Every observed entity: present ones first, then alphabetical by id.
    pub fn entity_rows(&self) -> Vec<String> {
        let present: BTreeSet<&String> = self
            .users
            .iter()
            .filter(|(_, record)| record.is_present())
            .map(|(id, _)| id)
            .collect();

        let mut rows: Vec<String> = present.iter().map(|id| (*id).clone()).collect();
        rows.extend(
            self.users
                .keys()
                .filter(|id| !present.contains(id))
                .cloned(),
        );
        rows
    }

    /// Earliest start and latest end (open intervals end at `now`).
    pub fn extent(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let mut bounds: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
        for interval in self.users.values().flat_map(|r| r.intervals.iter()) {
            let end = interval.end_or(now);
            bounds = Some(match bounds {
                None => (interval.start, end),
                Some((lo, hi)) => (lo.min(interval.start), hi.max(end)),
            });
        }
        bounds
    }

    pub fn has_data_in(&self, start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.users
            .values()
            .flat_map(|r| r.intervals.iter())
            .any(|interval| interval.overlaps(start, end, now))
    }
}

/// Sorts by start and merges overlapping or touching intervals.
///
/// `B` is absorbed into `A` when `B.start <= A.end` (an open `A` absorbs
/// everything after it); the merged end is the max of both, with open
/// winning. Idempotent.
pub fn coalesce(mut intervals: Vec<PresenceInterval>) -> Vec<PresenceInterval> {
    intervals.sort_by_key(|interval| interval.start);

    let mut out: Vec<PresenceInterval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        let Some(last) = out.last_mut() else {
            out.push(interval);
            continue;
        };

        match last.end {
            None => {}
            Some(last_end) if interval.start <= last_end => {
                last.end = match interval.end {
                    None => None,
                    Some(end) => Some(end.max(last_end)),
                };
            }
            Some(_) => out.push(interval),
        }
    }

    for interval in &mut out {
        if let Some(end) = interval.end {
            interval.end = Some(end.max(interval.start));
        }
    }
    out
}
