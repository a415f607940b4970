//! Typed change notifications and the render sink seam.
//!
//! Every engine mutation reports what changed as a list of [`ChangeEvent`]s.
//! Subscribers get the events plus a freshly built view-model; they never
//! reach into engine state.

use std::sync::{Arc, Mutex};

use presence_protocol::{FlowPoint, StatusView, TimelineView, WindowView};

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// Rows or intervals changed (arrivals, departures, import, clear).
    IntervalsChanged { arrivals: usize, departures: usize },
    WindowChanged(WindowView),
    FlowAppended(FlowPoint),
    SessionsChanged,
    StatusChanged(StatusView),
}

impl ChangeEvent {
    /// Events that alter what a chart draws. Status-only updates do not.
    pub fn affects_render(&self) -> bool {
        !matches!(self, ChangeEvent::StatusChanged(_))
    }
}

/// Receives view-models whenever rows, a tick or the window changes.
pub trait RenderSink: Send {
    fn render(&mut self, view: &TimelineView, events: &[ChangeEvent]);
}

/// Keeps every rendered view in memory. Used by tests and `show`.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    views: Arc<Mutex<Vec<(TimelineView, Vec<ChangeEvent>)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn renders(&self) -> Vec<(TimelineView, Vec<ChangeEvent>)> {
        self.views
            .lock()
            .map(|views| views.clone())
            .unwrap_or_default()
    }

    pub fn last_view(&self) -> Option<TimelineView> {
        self.views
            .lock()
            .ok()
            .and_then(|views| views.last().map(|(view, _)| view.clone()))
    }
}

impl RenderSink for RecordingSink {
    fn render(&mut self, view: &TimelineView, events: &[ChangeEvent]) {
        if let Ok(mut views) = self.views.lock() {
            views.push((view.clone(), events.to_vec()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_changes_do_not_affect_render() {
        assert!(!ChangeEvent::StatusChanged(StatusView::default()).affects_render());
        assert!(ChangeEvent::SessionsChanged.affects_render());
        assert!(ChangeEvent::IntervalsChanged {
            arrivals: 1,
            departures: 0
        }
        .affects_render());
    }
}
