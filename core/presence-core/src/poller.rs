//! Snapshot polling against the upstream: target resolution, present-set
//! pagination, and liveness.
//!
//! These are plain blocking functions. The scheduler runs them on worker
//! threads and feeds the results back into the engine.

use presence_protocol::{
    parse_page, ChatterEntry, Page, StreamEntry, UserEntry, CHATTERS_PATH, PRESENCE_PAGE_SIZE,
    STREAMS_PATH, USERS_PATH,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{FetchError, PresenceError};
use crate::fetch::Fetch;
use crate::intervals::PresentSet;
use crate::sessions::{LiveStream, Liveness};
use crate::store::TargetKey;

/// Upstream ids needed to query the present set for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetIds {
    pub login: String,
    pub broadcaster_id: String,
    pub moderator_id: String,
}

/// Result of one present-set poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub present: PresentSet,
    pub pages: usize,
    /// More pages existed past the page cap; the set is partial.
    pub truncated: bool,
}

fn decode<T>(value: Value) -> Result<Page<T>, FetchError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    parse_page(value).map_err(FetchError::Decode)
}

/// Resolves the tracked login to its broadcaster id, and the authenticated
/// user to the moderator id the present-set query requires.
pub fn resolve_target(fetch: &dyn Fetch, target: &TargetKey) -> Result<TargetIds, PresenceError> {
    let page: Page<UserEntry> = decode(fetch.request(USERS_PATH, &[("login", target.as_str())])?)?;
    let broadcaster = page
        .data
        .into_iter()
        .next()
        .ok_or_else(|| PresenceError::TargetNotFound(target.to_string()))?;

    let me: Page<UserEntry> = decode(fetch.request(USERS_PATH, &[])?)?;
    let moderator = me.data.into_iter().next().ok_or_else(|| {
        FetchError::Unauthorized("token does not identify a user".to_string())
    })?;

    debug!(
        channel = %target,
        broadcaster_id = %broadcaster.id,
        moderator_id = %moderator.id,
        "Resolved target"
    );

    Ok(TargetIds {
        login: broadcaster.login,
        broadcaster_id: broadcaster.id,
        moderator_id: moderator.id,
    })
}

/// Fetches the full present set, following cursors up to `max_pages`.
///
/// Entities are keyed by lowercased login; the display name is the first
/// non-empty one seen in this poll.
pub fn poll_present_set(fetch: &dyn Fetch, ids: &TargetIds, max_pages: usize) -> Result<Snapshot, FetchError> {
    let max_pages = max_pages.max(1);
    let first = PRESENCE_PAGE_SIZE.to_string();
    let mut snapshot = Snapshot::default();
    let mut cursor: Option<String> = None;

    loop {
        let mut params: Vec<(&str, &str)> = vec![
            ("broadcaster_id", ids.broadcaster_id.as_str()),
            ("moderator_id", ids.moderator_id.as_str()),
            ("first", first.as_str()),
        ];
        if let Some(after) = cursor.as_deref() {
            params.push(("after", after));
        }

        let page: Page<ChatterEntry> = decode(fetch.request(CHATTERS_PATH, &params)?)?;
        snapshot.pages += 1;

        for entry in &page.data {
            let id = entry.user_login.trim().to_lowercase();
            if id.is_empty() {
                continue;
            }
            let name = snapshot.present.entry(id).or_default();
            if name.is_empty() {
                name.clone_from(&entry.user_name);
            }
        }

        let next = page.next_cursor().map(str::to_string);
        match next {
            None => break,
            Some(_) if snapshot.pages >= max_pages => {
                snapshot.truncated = true;
                warn!(
                    channel = %ids.login,
                    pages = snapshot.pages,
                    present = snapshot.present.len(),
                    "Present set truncated at page cap"
                );
                break;
            }
            Some(next) => cursor = Some(next),
        }
    }

    Ok(snapshot)
}

/// Queries whether the target is live right now.
pub fn poll_liveness(fetch: &dyn Fetch, login: &str) -> Result<Liveness, FetchError> {
    let page: Page<StreamEntry> = decode(fetch.request(STREAMS_PATH, &[("user_login", login)])?)?;
    Ok(match page.data.into_iter().next() {
        None => Liveness::Inactive,
        Some(stream) => Liveness::Active(LiveStream {
            start_marker: stream.started_at,
            viewer_count: stream.viewer_count,
            title: stream.title,
            category_id: stream.game_id,
            category_name: stream.game_name,
        }),
    })
}
