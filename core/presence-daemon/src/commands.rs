//! Subcommand implementations.
//!
//! Each command opens the configured store, does its work and returns;
//! `run` is the only long-lived one.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use fs_err as fs;
use presence_core::{
    clear_target, resolve_target, suggest, DisplaySettings, DisplayZone, EngineConfig, EngineState,
    Fetch, FileStore, HelixClient, MemoryStore, PresenceError, PresenceTimeline, Result,
    Scheduler, StorageConfig, Store, StoreError, TargetKey, TokenFile,
};
use presence_protocol::{PresenceInterval, TimelineView};
use tracing::{info, warn};

use crate::db::SqliteStore;
use crate::sink::{JsonFileSink, SummarySink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    Sqlite,
    File,
    Memory,
}

pub fn open_store(backend: Backend, storage: &StorageConfig) -> Result<Arc<dyn Store>> {
    storage.ensure_root()?;
    let store: Arc<dyn Store> = match backend {
        Backend::Sqlite => Arc::new(SqliteStore::open(storage.database_file())?),
        Backend::File => Arc::new(FileStore::open(&storage.store_dir())?),
        Backend::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

// ═══════════════════════════════════════════════════════════════════════════════
// run
// ═══════════════════════════════════════════════════════════════════════════════

pub fn run(
    storage: &StorageConfig,
    config: &EngineConfig,
    store: Arc<dyn Store>,
    target: TargetKey,
    max_runtime: Option<Duration>,
) -> Result<()> {
    if config.upstream.client_id.is_empty() {
        warn!("No upstream client id configured; set [upstream].client_id or PRESENCE_CLIENT_ID");
    }
    let token_path = storage.resolve_path(&config.upstream.token_file);
    let client: Arc<dyn Fetch> = Arc::new(HelixClient::new(
        &config.upstream.base_url,
        &config.upstream.client_id,
        config.upstream.request_timeout(),
        Box::new(TokenFile::new(&token_path)),
    ));

    let ids = resolve_target(client.as_ref(), &target)?;
    let engine = EngineState::load(store.as_ref(), target, config);

    let mut scheduler = Scheduler::new(engine, store, client, ids, &config.polling);
    scheduler.subscribe(Box::new(JsonFileSink::new(storage.view_file())));
    scheduler.subscribe(Box::new(SummarySink));

    let deadline = max_runtime.map(|runtime| Instant::now() + runtime);
    scheduler.run(deadline);
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// show
// ═══════════════════════════════════════════════════════════════════════════════

pub fn show(store: &dyn Store, config: &EngineConfig, target: TargetKey, json: bool) -> Result<()> {
    let now = Utc::now();
    let mut engine = EngineState::load(store, target, config);
    engine.recompute_view(now);
    let view = engine.view_model(now);

    if json {
        let rendered = serde_json::to_string_pretty(&view).map_err(|source| PresenceError::Json {
            context: "render view".to_string(),
            source,
        })?;
        println!("{}", rendered);
        return Ok(());
    }

    let zone = DisplaySettings::load(store).zone();
    print!("{}", render_text(&view, zone));
    Ok(())
}

fn format_interval(interval: &PresenceInterval, zone: DisplayZone) -> String {
    match interval.end {
        Some(end) => format!("{} -> {}", zone.format(interval.start), zone.format(end)),
        None => format!("{} -> present", zone.format(interval.start)),
    }
}

fn render_text(view: &TimelineView, zone: DisplayZone) -> String {
    let mut out = String::new();
    let fmt_opt = |at: Option<chrono::DateTime<Utc>>| {
        at.map(|at| zone.format(at))
            .unwrap_or_else(|| "never".to_string())
    };

    out.push_str(&format!("Target: {}\n", view.target));
    out.push_str(&format!(
        "Status: last success {}, last attempt {}, {} present{}\n",
        fmt_opt(view.status.last_success_at),
        fmt_opt(view.status.last_attempt_at),
        view.status.present_count,
        if view.status.truncated { " (truncated)" } else { "" },
    ));
    if let Some(error) = &view.status.error {
        out.push_str(&format!("Last error: {}\n", error));
    }
    out.push_str(&format!(
        "Window: {} -> {}{}\n",
        zone.format(view.window.start),
        zone.format(view.window.end),
        if view.pinned_to_live_edge { " (live)" } else { "" },
    ));

    out.push_str(&format!("\nSessions ({}):\n", view.sessions.len()));
    for session in &view.sessions {
        let label = if session.live { "LIVE " } else { "" };
        let end = session
            .end
            .map(|end| zone.format(end))
            .unwrap_or_else(|| "ongoing".to_string());
        out.push_str(&format!(
            "  {}{} -> {} ({} samples)\n",
            label,
            zone.format(session.start),
            end,
            session.sample_count
        ));
    }

    out.push_str(&format!("\nEntities ({}):\n", view.entity_rows.len()));
    for id in &view.entity_rows {
        let name = view.names.get(id).map(String::as_str).unwrap_or(id);
        let intervals = view
            .intervals
            .get(id)
            .map(|intervals| {
                intervals
                    .iter()
                    .map(|interval| format_interval(interval, zone))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        out.push_str(&format!("  {}: {}\n", name, intervals));
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// clear / export / import
// ═══════════════════════════════════════════════════════════════════════════════

pub fn clear(store: &dyn Store, target: &TargetKey) -> Result<()> {
    let removed = clear_target(store, target)?;
    println!("Cleared {} record(s) for {}", removed, target);
    Ok(())
}

pub fn export(store: &dyn Store, config: &EngineConfig, target: TargetKey, path: &Path) -> Result<()> {
    let engine = EngineState::load(store, target.clone(), config);
    let timeline = engine.export_timeline();
    let content = serde_json::to_string_pretty(&timeline).map_err(|source| PresenceError::Json {
        context: format!("export {}", target),
        source,
    })?;
    fs::write(path, content).map_err(|source| StoreError::Io {
        context: format!("write {}", path.display()),
        source,
    })?;
    info!(channel = %target, path = %path.display(), entities = timeline.len(), "Timeline exported");
    Ok(())
}

pub fn import(store: &dyn Store, config: &EngineConfig, target: TargetKey, path: &Path) -> Result<()> {
    let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
        context: format!("read {}", path.display()),
        source,
    })?;
    let incoming: PresenceTimeline =
        serde_json::from_str(&content).map_err(|source| PresenceError::Json {
            context: format!("import {}", path.display()),
            source,
        })?;

    let mut engine = EngineState::load(store, target, config);
    let effects = engine.import_timeline(incoming, Utc::now());
    engine.commit(store, &effects)?;
    println!("Imported into {} ({} entities)", engine.target(), engine.timeline().len());
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// timezone
// ═══════════════════════════════════════════════════════════════════════════════

pub fn timezone_set(store: &dyn Store, zone: &str) -> Result<()> {
    let mut settings = DisplaySettings::load(store);
    let selected = settings.set_zone(zone)?;
    settings.save(store)?;
    println!("Display time zone: {}", selected.name());
    Ok(())
}

pub fn timezone_show(store: &dyn Store) -> Result<()> {
    let settings = DisplaySettings::load(store);
    let zone = settings.zone();
    println!("Display time zone: {}", zone.name());
    println!("Now: {}", zone.format(Utc::now()));
    if !settings.recents.is_empty() {
        println!("Recent: {}", settings.recents.join(", "));
    }
    Ok(())
}

pub fn timezone_suggest(query: &str) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for name in suggest(query) {
        // Broken pipe (e.g. `| head`) is not worth failing over.
        if writeln!(out, "{}", name).is_err() {
            break;
        }
    }
    Ok(())
}
