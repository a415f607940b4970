//! Authenticated upstream fetch.
//!
//! The engine only sees the [`Fetch`] trait: a resource path plus query
//! parameters in, decoded JSON or a classified [`FetchError`] out. Token
//! acquisition and refresh belong to an external OAuth collaborator; this
//! module just reads whatever access token it was handed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fs_err as fs;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::FetchError;

pub trait Fetch: Send + Sync {
    fn request(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, FetchError>;
}

impl<F: Fetch + ?Sized> Fetch for Arc<F> {
    fn request(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, FetchError> {
        (**self).request(path, params)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tokens
// ═══════════════════════════════════════════════════════════════════════════════

pub trait TokenSource: Send + Sync {
    fn access_token(&self) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenSource for StaticToken {
    fn access_token(&self) -> Result<String, FetchError> {
        if self.0.trim().is_empty() {
            return Err(FetchError::Unauthorized("no access token configured".to_string()));
        }
        Ok(self.0.clone())
    }
}

/// Reads `{ "access_token": "..." }` from disk on every request, so a token
/// refreshed by the OAuth helper is picked up without a restart.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

#[derive(Deserialize)]
struct TokenDocument {
    #[serde(default)]
    access_token: String,
}

impl TokenFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl TokenSource for TokenFile {
    fn access_token(&self) -> Result<String, FetchError> {
        let content = fs::read_to_string(&self.path)
            .map_err(|err| FetchError::Unauthorized(format!("token unavailable: {}", err)))?;
        let document: TokenDocument = serde_json::from_str(&content).map_err(|err| {
            FetchError::Unauthorized(format!("token file {} malformed: {}", self.path.display(), err))
        })?;
        StaticToken(document.access_token).access_token()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helix client
// ═══════════════════════════════════════════════════════════════════════════════

pub struct HelixClient {
    agent: ureq::Agent,
    base_url: String,
    client_id: String,
    token: Box<dyn TokenSource>,
}

impl HelixClient {
    pub fn new(base_url: &str, client_id: &str, timeout: Duration, token: Box<dyn TokenSource>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            token,
        }
    }
}

impl Fetch for HelixClient {
    fn request(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, FetchError> {
        let token = self.token.access_token()?;
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, params = params.len(), "Upstream request");

        let mut request = self
            .agent
            .get(&url)
            .set("Client-Id", &self.client_id)
            .set("Authorization", &format!("Bearer {}", token));
        for (name, value) in params {
            request = request.query(name, value);
        }

        match request.call() {
            Ok(resp) => resp
                .into_json::<Value>()
                .map_err(|err| FetchError::Decode(err.to_string())),
            Err(ureq::Error::Status(401, resp)) => {
                Err(FetchError::Unauthorized(resp.into_string().unwrap_or_default()))
            }
            Err(ureq::Error::Status(429, resp)) => Err(FetchError::RateLimited {
                retry_after_secs: parse_retry_after(&resp),
            }),
            Err(ureq::Error::Status(status, resp)) => Err(FetchError::Upstream {
                status,
                body: resp.into_string().unwrap_or_default(),
            }),
            Err(ureq::Error::Transport(err)) => Err(FetchError::Transport(err.to_string())),
        }
    }
}

/// `Retry-After` in seconds, else Helix's `Ratelimit-Reset` epoch timestamp.
fn parse_retry_after(resp: &ureq::Response) -> Option<u64> {
    if let Some(secs) = resp
        .header("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Some(secs);
    }
    resp.header("ratelimit-reset")
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(|reset| reset.saturating_sub(Utc::now().timestamp()).max(0) as u64)
}
