//! Render sinks used by `run`.

use std::io::Write;
use std::path::{Path, PathBuf};

use presence_core::{ChangeEvent, RenderSink};
use presence_protocol::TimelineView;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Keeps the latest view-model at a fixed path so external charts can poll
/// it. Writes go through a temp file in the same directory and a rename.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn write(&self, view: &TimelineView) -> Result<(), String> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let content = serde_json::to_vec_pretty(view)
            .map_err(|err| format!("Failed to serialize view: {}", err))?;

        let mut temp_file = NamedTempFile::new_in(dir)
            .map_err(|err| format!("Failed to create temp view file: {}", err))?;
        temp_file
            .write_all(&content)
            .map_err(|err| format!("Failed to write temp view file: {}", err))?;
        temp_file
            .persist(&self.path)
            .map_err(|err| format!("Failed to persist view file: {}", err.error))?;
        Ok(())
    }
}

impl RenderSink for JsonFileSink {
    fn render(&mut self, view: &TimelineView, _events: &[ChangeEvent]) {
        match self.write(view) {
            Ok(()) => debug!(path = %self.path.display(), rows = view.entity_rows.len(), "View written"),
            Err(err) => warn!(path = %self.path.display(), error = %err, "Failed to write view"),
        }
    }
}

/// Logs a one-line summary whenever something a chart draws has changed.
#[derive(Default)]
pub struct SummarySink;

impl RenderSink for SummarySink {
    fn render(&mut self, view: &TimelineView, events: &[ChangeEvent]) {
        if !events.iter().any(ChangeEvent::affects_render) {
            return;
        }
        let (arrivals, departures) = events.iter().fold((0usize, 0usize), |(a, d), event| match event {
            ChangeEvent::IntervalsChanged {
                arrivals,
                departures,
            } => (a + *arrivals, d + *departures),
            _ => (a, d),
        });
        let live = view.sessions.first().is_some_and(|session| session.live);
        info!(
            channel = %view.target,
            present = view.status.present_count,
            entities = view.entity_rows.len(),
            arrivals,
            departures,
            live,
            "Timeline updated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use presence_protocol::{StatusView, WindowView, VIEW_SCHEMA_VERSION};

    fn view() -> TimelineView {
        let now = Utc::now();
        TimelineView {
            version: VIEW_SCHEMA_VERSION,
            target: "chan".to_string(),
            generated_at: now,
            entity_rows: vec!["alice".to_string()],
            names: Default::default(),
            intervals: Default::default(),
            flow: Vec::new(),
            window: WindowView { start: now, end: now },
            pinned_to_live_edge: true,
            sessions: Vec::new(),
            viewers: Vec::new(),
            status: StatusView::default(),
        }
    }

    #[test]
    fn json_sink_replaces_file_contents() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("view.json");
        let mut sink = JsonFileSink::new(path.clone());

        sink.render(&view(), &[ChangeEvent::SessionsChanged]);
        let mut second = view();
        second.entity_rows.push("bob".to_string());
        sink.render(&second, &[ChangeEvent::SessionsChanged]);

        let written: TimelineView =
            serde_json::from_slice(&std::fs::read(&path).expect("read view")).expect("parse view");
        assert_eq!(written.entity_rows, vec!["alice", "bob"]);
    }
}
