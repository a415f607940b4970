//! Arrivals/departures flow: one point per successful presence tick, kept in a
//! bounded ring buffer.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use presence_protocol::FlowPoint;

use crate::intervals::{PresenceDiff, PresenceTimeline};

pub const DEFAULT_FLOW_CAPACITY: usize = 5000;

#[derive(Debug, Clone)]
pub struct FlowBuffer {
    points: VecDeque<FlowPoint>,
    capacity: usize,
}

impl FlowBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Restores persisted points, keeping only the newest `capacity` and
    /// dropping any that would break time ordering.
    pub fn from_points(points: Vec<FlowPoint>, capacity: usize) -> Self {
        let mut buffer = Self::new(capacity);
        for point in points {
            if buffer.last_t().is_some_and(|last| point.t < last) {
                continue;
            }
            buffer.push_point(point);
        }
        buffer
    }

    /// Appends the point for one tick. `t` is clamped so the buffer never goes
    /// back in time even if the wall clock does.
    pub fn append(&mut self, diff: &PresenceDiff, timeline: &PresenceTimeline, now: DateTime<Utc>) -> &FlowPoint {
        let t = self.last_t().map_or(now, |last| now.max(last));
        let names = |ids: &[String]| -> Vec<String> {
            ids.iter()
                .map(|id| timeline.display_name(id).to_string())
                .collect()
        };

        self.push_point(FlowPoint {
            t,
            arrivals: diff.arrivals.len() as u32,
            departures: diff.departures.len() as u32,
            arrival_names: names(&diff.arrivals),
            departure_names: names(&diff.departures),
        })
    }

    fn push_point(&mut self, point: FlowPoint) -> &FlowPoint {
        self.points.push_back(point);
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
        // Non-empty: we just pushed.
        &self.points[self.points.len() - 1]
    }

    fn last_t(&self) -> Option<DateTime<Utc>> {
        self.points.back().map(|p| p.t)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowPoint> {
        self.points.iter()
    }

    pub fn to_vec(&self) -> Vec<FlowPoint> {
        self.points.iter().cloned().collect()
    }

    pub fn in_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<FlowPoint> {
        self.points
            .iter()
            .filter(|p| p.t >= start && p.t <= end)
            .cloned()
            .collect()
    }
}
