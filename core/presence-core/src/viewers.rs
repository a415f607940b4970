//! Per-session viewer-count series sampled by the liveness poller.
//!
//! Each live sample appends `{t, viewers}`. When the time since the previous
//! sample exceeds 1.5x the liveness interval, a gap marker (`viewers: null`,
//! `gap: true`) is inserted 1ms before the new sample so charts break the line
//! instead of interpolating across downtime.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_VIEWER_CAPACITY: usize = 720;

/// Liveness intervals stepped through while the viewer count holds steady.
pub const ADAPTIVE_STEPS_SECS: [u64; 4] = [10, 30, 60, 120];

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewerSample {
    pub t: DateTime<Utc>,
    pub viewers: Option<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub gap: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerSeries {
    samples: Vec<ViewerSample>,
    capacity: usize,
}

impl ViewerSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn from_samples(samples: Vec<ViewerSample>, capacity: usize) -> Self {
        let mut series = Self {
            samples,
            capacity: capacity.max(1),
        };
        series.samples.sort_by_key(|s| s.t);
        series.trim();
        series
    }

    pub fn record(&mut self, now: DateTime<Utc>, viewers: u32, interval: Duration) {
        if let Some(last) = self.samples.last() {
            let gap_limit = chrono::Duration::milliseconds((interval.as_millis() as i64) * 3 / 2);
            if now - last.t > gap_limit {
                self.samples.push(ViewerSample {
                    t: now - chrono::Duration::milliseconds(1),
                    viewers: None,
                    gap: true,
                });
            }
        }
        self.samples.push(ViewerSample {
            t: now,
            viewers: Some(viewers),
            gap: false,
        });
        self.trim();
    }

    fn trim(&mut self) {
        if self.samples.len() > self.capacity {
            let excess = self.samples.len() - self.capacity;
            self.samples.drain(..excess);
        }
    }

    pub fn samples(&self) -> &[ViewerSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Change from the previous known count. `None` for the first sample and
    /// for gap markers.
    pub fn deltas(&self) -> Vec<(DateTime<Utc>, Option<i64>)> {
        let mut previous: Option<u32> = None;
        self.samples
            .iter()
            .map(|sample| match (sample.viewers, previous) {
                (Some(current), Some(prev)) => {
                    previous = Some(current);
                    (sample.t, Some(i64::from(current) - i64::from(prev)))
                }
                (Some(current), None) => {
                    previous = Some(current);
                    (sample.t, None)
                }
                (None, _) => (sample.t, None),
            })
            .collect()
    }
}

/// Backs the liveness interval off while the viewer count is unchanged and
/// snaps back to the fastest step on any change.
#[derive(Debug, Clone)]
pub struct AdaptiveInterval {
    index: usize,
    last_viewers: Option<Option<u32>>,
}

impl Default for AdaptiveInterval {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveInterval {
    pub fn new() -> Self {
        Self {
            index: 0,
            last_viewers: None,
        }
    }

    pub fn current(&self) -> Duration {
        Duration::from_secs(ADAPTIVE_STEPS_SECS[self.index])
    }

    /// Feeds one liveness result (`None` when offline) and returns the
    /// interval to wait before the next sample.
    pub fn observe(&mut self, viewers: Option<u32>) -> Duration {
        let changed = self.last_viewers.map_or(true, |last| last != viewers);
        self.last_viewers = Some(viewers);
        self.index = if changed {
            0
        } else {
            (self.index + 1).min(ADAPTIVE_STEPS_SECS.len() - 1)
        };
        self.current()
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
