//! Paths and runtime configuration.
//!
//! [`StorageConfig`] is the single source of truth for on-disk locations; tests
//! inject a temp root with [`StorageConfig::with_root`]. [`EngineConfig`] is
//! read from `config.toml` under that root. A missing file means defaults; a
//! malformed one is an error rather than a silent fallback.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use fs_err as fs;
use serde::Deserialize;
use tracing::warn;

use crate::error::{PresenceError, Result};
use crate::sessions::ReactivationPolicy;
use crate::viewport::ViewportSettings;

const ROOT_DIR_NAME: &str = ".presence-timeline";
pub const HOME_ENV: &str = "PRESENCE_HOME";
pub const CLIENT_ID_ENV: &str = "PRESENCE_CLIENT_ID";

// ═══════════════════════════════════════════════════════════════════════════════
// Storage paths
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    /// Explicit root, else `$PRESENCE_HOME`, else `~/.presence-timeline`.
    pub fn resolve(root: Option<PathBuf>) -> Result<Self> {
        if let Some(root) = root {
            return Ok(Self::with_root(root));
        }
        if let Some(root) = env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
            return Ok(Self::with_root(PathBuf::from(root)));
        }
        let home = dirs::home_dir().ok_or(PresenceError::HomeDirNotFound)?;
        Ok(Self::with_root(home.join(ROOT_DIR_NAME)))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// SQLite database used by the daemon's default backend.
    pub fn database_file(&self) -> PathBuf {
        self.root.join("store.db")
    }

    /// Directory for the one-file-per-key backend.
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    /// Latest rendered view-model.
    pub fn view_file(&self) -> PathBuf {
        self.root.join("view.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Resolves a configured path: absolute paths as-is, relative ones under root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|source| PresenceError::ConfigRead {
            path: self.root.clone(),
            source,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine configuration
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub timeline: TimelineConfig,
    #[serde(default)]
    pub viewport: ViewportConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            client_id: String::new(),
            token_file: default_token_file(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PollingConfig {
    #[serde(default = "default_presence_interval_secs")]
    pub presence_interval_secs: u64,
    #[serde(default = "default_liveness_interval_secs")]
    pub liveness_interval_secs: u64,
    #[serde(default = "default_viewport_interval_secs")]
    pub viewport_interval_secs: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default)]
    pub adaptive_liveness: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            presence_interval_secs: default_presence_interval_secs(),
            liveness_interval_secs: default_liveness_interval_secs(),
            viewport_interval_secs: default_viewport_interval_secs(),
            max_pages: default_max_pages(),
            adaptive_liveness: false,
        }
    }
}

impl PollingConfig {
    pub fn presence_interval(&self) -> Duration {
        Duration::from_secs(self.presence_interval_secs)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    pub fn viewport_interval(&self) -> Duration {
        Duration::from_secs(self.viewport_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TimelineConfig {
    #[serde(default = "default_flow_capacity")]
    pub flow_capacity: usize,
    #[serde(default = "default_viewer_capacity")]
    pub viewer_capacity: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            flow_capacity: default_flow_capacity(),
            viewer_capacity: default_viewer_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ViewportConfig {
    #[serde(default = "default_lookback_secs")]
    pub lookback_secs: i64,
    #[serde(default = "default_pre_pad_secs")]
    pub pre_pad_secs: i64,
    #[serde(default = "default_live_pad_secs")]
    pub live_pad_secs: i64,
    #[serde(default = "default_finished_pad_secs")]
    pub finished_pad_secs: i64,
    #[serde(default = "default_snap_tolerance_secs")]
    pub snap_tolerance_secs: i64,
    #[serde(default = "default_echo_suppression_ms")]
    pub echo_suppression_ms: i64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            lookback_secs: default_lookback_secs(),
            pre_pad_secs: default_pre_pad_secs(),
            live_pad_secs: default_live_pad_secs(),
            finished_pad_secs: default_finished_pad_secs(),
            snap_tolerance_secs: default_snap_tolerance_secs(),
            echo_suppression_ms: default_echo_suppression_ms(),
        }
    }
}

impl ViewportConfig {
    pub fn settings(&self) -> ViewportSettings {
        ViewportSettings {
            lookback: ChronoDuration::seconds(self.lookback_secs.max(0)),
            pre_pad: ChronoDuration::seconds(self.pre_pad_secs.max(0)),
            live_pad: ChronoDuration::seconds(self.live_pad_secs.max(0)),
            finished_pad: ChronoDuration::seconds(self.finished_pad_secs.max(0)),
            snap_tolerance: ChronoDuration::seconds(self.snap_tolerance_secs.max(0)),
            echo_suppression: ChronoDuration::milliseconds(self.echo_suppression_ms.max(0)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SessionsConfig {
    #[serde(default)]
    pub reactivation: ReactivationPolicy,
}

fn default_base_url() -> String {
    "https://api.twitch.tv/helix".to_string()
}

fn default_token_file() -> PathBuf {
    PathBuf::from("token.json")
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_presence_interval_secs() -> u64 {
    5
}

fn default_liveness_interval_secs() -> u64 {
    10
}

fn default_viewport_interval_secs() -> u64 {
    5
}

fn default_max_pages() -> usize {
    presence_protocol::MAX_PRESENCE_PAGES
}

fn default_flow_capacity() -> usize {
    crate::flow::DEFAULT_FLOW_CAPACITY
}

fn default_viewer_capacity() -> usize {
    crate::viewers::DEFAULT_VIEWER_CAPACITY
}

fn default_lookback_secs() -> i64 {
    3600
}

fn default_pre_pad_secs() -> i64 {
    1800
}

fn default_live_pad_secs() -> i64 {
    300
}

fn default_finished_pad_secs() -> i64 {
    1800
}

fn default_snap_tolerance_secs() -> i64 {
    60
}

fn default_echo_suppression_ms() -> i64 {
    500
}

fn clamp_logged<T: PartialOrd + Copy + std::fmt::Display>(name: &str, value: T, min: T, max: T) -> T {
    let clamped = if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    };
    if clamped != value {
        warn!(setting = name, value = %value, clamped = %clamped, "Config value out of range; clamped");
    }
    clamped
}

impl EngineConfig {
    /// Applies range clamps and environment overrides.
    pub fn sanitized(mut self) -> Self {
        let polling = &mut self.polling;
        polling.presence_interval_secs =
            clamp_logged("presence_interval_secs", polling.presence_interval_secs, 1, 600);
        polling.liveness_interval_secs =
            clamp_logged("liveness_interval_secs", polling.liveness_interval_secs, 1, 600);
        polling.viewport_interval_secs =
            clamp_logged("viewport_interval_secs", polling.viewport_interval_secs, 1, 600);
        polling.max_pages = clamp_logged("max_pages", polling.max_pages, 1, 100);

        self.timeline.flow_capacity = self.timeline.flow_capacity.max(1);
        self.timeline.viewer_capacity = self.timeline.viewer_capacity.max(1);

        if let Ok(client_id) = env::var(CLIENT_ID_ENV) {
            if !client_id.trim().is_empty() {
                self.upstream.client_id = client_id.trim().to_string();
            }
        }
        self
    }
}

pub fn parse_config(content: &str, path: &Path) -> Result<EngineConfig> {
    toml::from_str::<EngineConfig>(content)
        .map(EngineConfig::sanitized)
        .map_err(|err| PresenceError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })
}

pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default().sanitized());
    }

    let content = fs::read_to_string(path).map_err(|source| PresenceError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempdir().unwrap();
        let config = load_config(&temp.path().join("config.toml")).unwrap();

        assert_eq!(config.polling.presence_interval_secs, 5);
        assert_eq!(config.polling.liveness_interval_secs, 10);
        assert_eq!(config.polling.max_pages, 10);
        assert_eq!(config.timeline.flow_capacity, 5000);
        assert_eq!(config.timeline.viewer_capacity, 720);
        assert_eq!(config.upstream.base_url, "https://api.twitch.tv/helix");
        assert_eq!(config.sessions.reactivation, ReactivationPolicy::KeepFinalized);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = parse_config(
            r#"
            [polling]
            presence_interval_secs = 7

            [sessions]
            reactivation = "reopen"
            "#,
            Path::new("config.toml"),
        )
        .unwrap();

        assert_eq!(config.polling.presence_interval_secs, 7);
        assert_eq!(config.polling.liveness_interval_secs, 10);
        assert_eq!(config.sessions.reactivation, ReactivationPolicy::Reopen);
        assert_eq!(config.viewport.snap_tolerance_secs, 60);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let config = parse_config(
            "[polling]\npresence_interval_secs = 0\nmax_pages = 500\n",
            Path::new("config.toml"),
        )
        .unwrap();

        assert_eq!(config.polling.presence_interval_secs, 1);
        assert_eq!(config.polling.max_pages, 100);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let err = parse_config("[polling\n", Path::new("config.toml")).unwrap_err();
        assert!(matches!(err, PresenceError::ConfigMalformed { .. }));

        let err = parse_config("[bogus]\nx = 1\n", Path::new("config.toml")).unwrap_err();
        assert!(matches!(err, PresenceError::ConfigMalformed { .. }));
    }

    #[test]
    fn viewport_settings_use_configured_pads() {
        let settings = ViewportConfig::default().settings();
        assert_eq!(settings, ViewportSettings::default());
    }

    #[test]
    fn storage_paths_hang_off_root() {
        let storage = StorageConfig::with_root(PathBuf::from("/tmp/pt"));
        assert_eq!(storage.config_file(), PathBuf::from("/tmp/pt/config.toml"));
        assert_eq!(storage.database_file(), PathBuf::from("/tmp/pt/store.db"));
        assert_eq!(
            storage.resolve_path(Path::new("token.json")),
            PathBuf::from("/tmp/pt/token.json")
        );
        assert_eq!(
            storage.resolve_path(Path::new("/etc/token.json")),
            PathBuf::from("/etc/token.json")
        );
    }

    #[test]
    fn explicit_root_wins() {
        let storage = StorageConfig::resolve(Some(PathBuf::from("/tmp/explicit"))).unwrap();
        assert_eq!(storage.root(), Path::new("/tmp/explicit"));
    }
}
