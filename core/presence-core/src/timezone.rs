//! Display time zone selection.
//!
//! Timestamps are stored and computed in UTC; the display zone only affects
//! how `show` renders them. Accepted input:
//!
//! - `system` (the host's local zone)
//! - `UTC`
//! - any IANA name known to `chrono-tz` (case-insensitive)
//! - common abbreviations, mapped to a representative IANA zone
//!
//! Invalid input is rejected and the previous zone stays selected.

use std::collections::HashMap;

use chrono::{DateTime, Local, Utc};
use chrono_tz::{Tz, TZ_VARIANTS};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PresenceError, Result};
use crate::store::{load_record, save_record, Store, DISPLAY_SETTINGS_KEY};

pub const MAX_RECENT_ZONES: usize = 5;
pub const MAX_SUGGESTIONS: usize = 20;

static ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("PST", "America/Los_Angeles"),
        ("PDT", "America/Los_Angeles"),
        ("MST", "America/Denver"),
        ("MDT", "America/Denver"),
        ("CST", "America/Chicago"),
        ("CDT", "America/Chicago"),
        ("EST", "America/New_York"),
        ("EDT", "America/New_York"),
        ("GMT", "UTC"),
        ("BST", "Europe/London"),
        ("CET", "Europe/Paris"),
        ("CEST", "Europe/Paris"),
        ("IST", "Asia/Kolkata"),
        ("JST", "Asia/Tokyo"),
        ("AEST", "Australia/Sydney"),
        ("AEDT", "Australia/Sydney"),
    ])
});

static RE_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[/_]+").unwrap());
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Lowercases and turns `/`, `_` and runs of whitespace into single spaces, so
/// `new york` matches `America/New_York`.
fn normalize_for_search(value: &str) -> String {
    let lowered = value.to_lowercase();
    let spaced = RE_SEPARATORS.replace_all(&lowered, " ");
    RE_WHITESPACE.replace_all(&spaced, " ").trim().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayZone {
    System,
    Utc,
    Named(Tz),
}

impl DisplayZone {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(PresenceError::InvalidTimeZone(input.to_string()));
        }

        let lowered = trimmed.to_lowercase();
        if lowered == "system" || lowered == "local" {
            return Ok(DisplayZone::System);
        }

        let candidate = ALIASES
            .get(trimmed.to_uppercase().as_str())
            .copied()
            .unwrap_or(trimmed);
        if candidate.eq_ignore_ascii_case("utc") {
            return Ok(DisplayZone::Utc);
        }

        if let Ok(tz) = candidate.parse::<Tz>() {
            return Ok(DisplayZone::Named(tz));
        }
        TZ_VARIANTS
            .iter()
            .find(|tz| tz.name().eq_ignore_ascii_case(candidate))
            .map(|tz| DisplayZone::Named(*tz))
            .ok_or_else(|| PresenceError::InvalidTimeZone(input.to_string()))
    }

    /// Stable name used for persistence and display.
    pub fn name(&self) -> &'static str {
        match self {
            DisplayZone::System => "system",
            DisplayZone::Utc => "UTC",
            DisplayZone::Named(tz) => tz.name(),
        }
    }

    pub fn format(&self, at: DateTime<Utc>) -> String {
        const FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";
        match self {
            DisplayZone::System => at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S %:z").to_string(),
            DisplayZone::Utc => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            DisplayZone::Named(tz) => at.with_timezone(tz).format(FORMAT).to_string(),
        }
    }
}

/// Zone names matching `query`: an alias target first, then IANA names that
/// contain the normalized phrase or every one of its tokens.
pub fn suggest(query: &str) -> Vec<String> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut out: Vec<String> = Vec::new();
    if let Some(target) = ALIASES.get(trimmed.to_uppercase().as_str()) {
        out.push(target.to_string());
    }

    let phrase = normalize_for_search(trimmed);
    let tokens: Vec<&str> = phrase.split(' ').collect();
    for tz in TZ_VARIANTS.iter() {
        if out.len() >= MAX_SUGGESTIONS {
            break;
        }
        let name = tz.name();
        let normalized = normalize_for_search(name);
        let matched = normalized.contains(&phrase) || tokens.iter().all(|t| normalized.contains(t));
        if matched && !out.iter().any(|existing| existing == name) {
            out.push(name.to_string());
        }
    }
    out
}

/// Persisted under `settings:display`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplaySettings {
    #[serde(default = "default_zone_name")]
    pub zone: String,
    #[serde(default)]
    pub recents: Vec<String>,
}

fn default_zone_name() -> String {
    "system".to_string()
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            zone: default_zone_name(),
            recents: Vec::new(),
        }
    }
}

impl DisplaySettings {
    pub fn load(store: &dyn Store) -> Self {
        load_record(store, DISPLAY_SETTINGS_KEY).unwrap_or_default()
    }

    pub fn save(&self, store: &dyn Store) -> Result<()> {
        save_record(store, DISPLAY_SETTINGS_KEY, self)?;
        Ok(())
    }

    /// The selected zone; a stored name that no longer parses falls back to
    /// the system zone.
    pub fn zone(&self) -> DisplayZone {
        DisplayZone::parse(&self.zone).unwrap_or(DisplayZone::System)
    }

    /// Validates and selects `input`. On error nothing changes.
    pub fn set_zone(&mut self, input: &str) -> Result<DisplayZone> {
        let zone = DisplayZone::parse(input)?;
        let name = zone.name().to_string();

        self.recents.retain(|recent| recent != &name);
        self.recents.insert(0, name.clone());
        self.recents.truncate(MAX_RECENT_ZONES);

        if self.zone != name {
            info!(from = %self.zone, to = %name, "Display time zone changed");
        }
        self.zone = name;
        Ok(zone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn parses_iana_aliases_and_keywords() {
        assert_eq!(DisplayZone::parse("system").unwrap(), DisplayZone::System);
        assert_eq!(DisplayZone::parse("utc").unwrap(), DisplayZone::Utc);
        assert_eq!(DisplayZone::parse("GMT").unwrap(), DisplayZone::Utc);
        assert_eq!(
            DisplayZone::parse("pst").unwrap(),
            DisplayZone::Named(chrono_tz::America::Los_Angeles)
        );
        assert_eq!(
            DisplayZone::parse("europe/berlin").unwrap(),
            DisplayZone::Named(chrono_tz::Europe::Berlin)
        );
    }

    #[test]
    fn rejects_unknown_zone() {
        let err = DisplayZone::parse("Mars/Olympus_Mons").unwrap_err();
        assert!(matches!(err, PresenceError::InvalidTimeZone(_)));
        assert!(DisplayZone::parse("  ").is_err());
    }

    #[test]
    fn invalid_input_keeps_previous_zone() {
        let mut settings = DisplaySettings::default();
        settings.set_zone("Asia/Tokyo").unwrap();
        assert!(settings.set_zone("Nowhere/Special").is_err());

        assert_eq!(settings.zone, "Asia/Tokyo");
        assert_eq!(settings.recents, vec!["Asia/Tokyo"]);
    }

    #[test]
    fn recents_are_deduplicated_and_capped() {
        let mut settings = DisplaySettings::default();
        for zone in ["UTC", "JST", "CET", "EST", "PST", "IST", "JST"] {
            settings.set_zone(zone).unwrap();
        }

        assert_eq!(settings.recents.len(), MAX_RECENT_ZONES);
        assert_eq!(settings.recents[0], "Asia/Tokyo");
        assert_eq!(
            settings.recents.iter().filter(|z| *z == "Asia/Tokyo").count(),
            1
        );
        assert!(!settings.recents.contains(&"UTC".to_string()));
    }

    #[test]
    fn suggestions_put_alias_first_and_cap_results() {
        let suggestions = suggest("EST");
        assert_eq!(suggestions[0], "America/New_York");

        let suggestions = suggest("new york");
        assert!(suggestions.contains(&"America/New_York".to_string()));

        let suggestions = suggest("america");
        assert_eq!(suggestions.len(), MAX_SUGGESTIONS);

        assert!(suggest("   ").is_empty());
    }

    #[test]
    fn settings_round_trip_through_store() {
        let store = MemoryStore::new();
        let mut settings = DisplaySettings::load(&store);
        assert_eq!(settings.zone(), DisplayZone::System);

        settings.set_zone("Europe/London").unwrap();
        settings.save(&store).unwrap();

        let loaded = DisplaySettings::load(&store);
        assert_eq!(loaded.zone(), DisplayZone::Named(chrono_tz::Europe::London));
    }

    #[test]
    fn named_zone_formats_with_abbreviation() {
        let at = DateTime::parse_from_rfc3339("2026-01-31T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let zone = DisplayZone::parse("Asia/Tokyo").unwrap();
        assert_eq!(zone.format(at), "2026-01-31 21:00:00 JST");
        assert_eq!(DisplayZone::Utc.format(at), "2026-01-31 12:00:00 UTC");
    }
}
