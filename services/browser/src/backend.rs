//! Client for the external semantic search backend.
//!
//! Each call forwards a reshaped request and maps the backend's frame list
//! into [`ProxyResult`]s. When the backend is unreachable or answers with a
//! failure the call degrades to placeholder results derived from the
//! requested id, tagged [`ResultSource::Placeholder`] so callers can tell them
//! apart from real hits.

use crate::catalog::key::{find_key_in_text, FrameKey};
use crate::config::BackendConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Score reported by a placeholder exact-id lookup
pub const EXACT_MATCH_SCORE: f64 = 1.0;

/// Score reported by every other placeholder result
pub const PLACEHOLDER_SCORE: f64 = 0.5;

/// Upper bound on synthesized placeholder results
pub const MAX_PLACEHOLDERS: usize = 20;

const DEFAULT_GROUP: &str = "L01";
const DEFAULT_VIDEO: &str = "V001";
const DEFAULT_FRAME_WIDTH: usize = 5;

/// Where a result set came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Backend,
    Placeholder,
}

/// One frame as returned to the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyResult {
    pub image_id: String,
    pub score: f64,
    pub group: Option<String>,
    pub video: Option<String>,
    pub frame: Option<String>,
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl ProxyResult {
    fn from_key(image_id: String, key: Option<&FrameKey>, score: f64) -> Self {
        Self {
            image_id,
            score,
            group: key.map(|k| k.group.clone()),
            video: key.map(|k| k.video.clone()),
            frame: key.map(|k| k.frame.clone()),
            image_url: key.map(|k| format!("/api/images/{}", k.image_path())),
            public_url: None,
            file_size: None,
            content_type: None,
        }
    }
}

/// Proxy response body
#[derive(Debug, Clone, Serialize)]
pub struct ProxyResponse {
    pub results: Vec<ProxyResult>,
    pub total: usize,
    pub source: ResultSource,
}

impl ProxyResponse {
    fn new(results: Vec<ProxyResult>, source: ResultSource) -> Self {
        Self {
            total: results.len(),
            results,
            source,
        }
    }
}

/// Backend reply shared by `/search`, `/neighbor` and `/getById`
#[derive(Debug, Deserialize)]
struct BackendReply {
    #[serde(default)]
    frames: Vec<BackendFrame>,
}

#[derive(Debug, Deserialize)]
struct BackendFrame {
    s3_key: Option<String>,
    image_id: Option<String>,
    score: Option<f64>,
    file_size: Option<i64>,
    content_type: Option<String>,
    public_url: Option<String>,
}

#[derive(Serialize)]
struct SearchBody<'a> {
    query: &'a str,
    limit: u32,
}

#[derive(Serialize)]
struct NeighborBody<'a> {
    id: &'a str,
    limit: u32,
}

#[derive(Serialize)]
struct LookupBody<'a> {
    id: &'a str,
}

/// HTTP client for the search backend
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("vbs-browser/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build backend HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<BackendReply> {
        let url = format!("{}{}", self.base_url, path);

        let reply = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Backend request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("Backend {url} returned an error status"))?
            .json::<BackendReply>()
            .await
            .with_context(|| format!("Backend {url} returned an unreadable body"))?;

        debug!(url = %url, frames = reply.frames.len(), "Backend replied");
        Ok(reply)
    }

    fn degrade(&self, route: &'static str, err: anyhow::Error, fallback: Vec<ProxyResult>) -> ProxyResponse {
        warn!(route, error = %format!("{err:#}"), "Backend unavailable, serving placeholders");
        metrics::counter!("browser.proxy.fallbacks", "route" => route).increment(1);
        ProxyResponse::new(fallback, ResultSource::Placeholder)
    }

    /// Text-to-image search
    #[instrument(skip(self))]
    pub async fn semantic_search(&self, query: &str, limit: u32) -> ProxyResponse {
        metrics::counter!("browser.proxy.requests", "route" => "search").increment(1);
        match self.post("/search", &SearchBody { query, limit }).await {
            Ok(reply) => reshape(reply, 0.0),
            Err(e) => self.degrade("search", e, placeholder_search(query, limit as usize)),
        }
    }

    /// Frames adjacent to `id` in its video
    #[instrument(skip(self))]
    pub async fn neighbors(&self, id: &str, limit: u32) -> ProxyResponse {
        metrics::counter!("browser.proxy.requests", "route" => "neighbor").increment(1);
        match self.post("/neighbor", &NeighborBody { id, limit }).await {
            Ok(reply) => reshape(reply, 0.0),
            Err(e) => self.degrade("neighbor", e, placeholder_neighbors(id, limit as usize)),
        }
    }

    /// Exact lookup by frame id
    #[instrument(skip(self))]
    pub async fn lookup(&self, id: &str) -> ProxyResponse {
        metrics::counter!("browser.proxy.requests", "route" => "lookup").increment(1);
        match self.post("/getById", &LookupBody { id }).await {
            Ok(reply) => reshape(reply, EXACT_MATCH_SCORE),
            Err(e) => self.degrade("lookup", e, placeholder_lookup(id)),
        }
    }
}

fn reshape(reply: BackendReply, default_score: f64) -> ProxyResponse {
    let results = reply
        .frames
        .into_iter()
        .filter_map(|frame| {
            let image_id = frame.image_id.or(frame.s3_key)?;
            let key = FrameKey::parse(&image_id);
            let mut result =
                ProxyResult::from_key(image_id, key.as_ref(), frame.score.unwrap_or(default_score));
            result.public_url = frame.public_url;
            result.file_size = frame.file_size;
            result.content_type = frame.content_type;
            Some(result)
        })
        .collect();

    ProxyResponse::new(results, ResultSource::Backend)
}

fn key_or_default(id: &str) -> FrameKey {
    FrameKey::parse(id)
        .unwrap_or_else(|| FrameKey::build(DEFAULT_GROUP, DEFAULT_VIDEO, 0, DEFAULT_FRAME_WIDTH))
}

/// Single exact-match placeholder carrying the requested id
pub fn placeholder_lookup(id: &str) -> Vec<ProxyResult> {
    let key = key_or_default(id);
    vec![ProxyResult::from_key(id.to_string(), Some(&key), EXACT_MATCH_SCORE)]
}

/// A full window of `limit` frames around `center`, shifted to stay within
/// `0..=u64::MAX` at either end
fn frames_around(center: &FrameKey, limit: usize) -> Vec<ProxyResult> {
    let count = limit.clamp(1, MAX_PLACEHOLDERS) as u64;
    let start = center
        .frame_number()
        .saturating_sub(count / 2)
        .min(u64::MAX - (count - 1));

    (start..=start + (count - 1))
        .map(|n| {
            let key = center.with_frame(n);
            ProxyResult::from_key(key.to_string(), Some(&key), PLACEHOLDER_SCORE)
        })
        .collect()
}

/// Consecutive frames centred on `id`
pub fn placeholder_neighbors(id: &str, limit: usize) -> Vec<ProxyResult> {
    frames_around(&key_or_default(id), limit)
}

/// Frames around a key mentioned in the query, or the head of a default video
pub fn placeholder_search(query: &str, limit: usize) -> Vec<ProxyResult> {
    match find_key_in_text(query) {
        Some(key) => frames_around(&key, limit),
        None => {
            let count = limit.clamp(1, MAX_PLACEHOLDERS) as u64;
            (0..count)
                .map(|n| {
                    let key = FrameKey::build(DEFAULT_GROUP, DEFAULT_VIDEO, n, DEFAULT_FRAME_WIDTH);
                    ProxyResult::from_key(key.to_string(), Some(&key), PLACEHOLDER_SCORE)
                })
                .collect()
        }
    }
}
