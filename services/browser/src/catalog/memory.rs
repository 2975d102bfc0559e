//! In-process catalog backed by a JSON snapshot of file records.
//!
//! Used for offline development against an exported `file_metadata`
//! collection, and as the reference store in tests.

use super::groups::{summarize_videos, VideoSummary};
use super::key::FrameKey;
use super::search::{Facets, PageRequest, SearchOutcome, SearchPlan};
use super::{CatalogStore, FileRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

pub struct MemoryCatalogStore {
    /// Sorted by key
    records: Vec<FileRecord>,
}

impl MemoryCatalogStore {
    pub fn new(mut records: Vec<FileRecord>) -> Self {
        records.sort_by(|a, b| a.s3_key.cmp(&b.s3_key));
        Self { records }
    }

    /// Load a JSON array of records
    pub async fn from_snapshot(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        let records: Vec<FileRecord> =
            serde_json::from_slice(&raw).context("Failed to parse snapshot records")?;

        info!(path = %path.display(), records = records.len(), "Loaded catalog snapshot");

        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn page_of<T: Clone>(items: &[T], page: PageRequest) -> Vec<T> {
    items
        .iter()
        .skip(page.offset() as usize)
        .take(page.limit as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn video_summaries(&self, group: Option<&str>) -> Result<Vec<VideoSummary>> {
        let videos = summarize_videos(&self.records);
        Ok(match group {
            Some(group) => videos.into_iter().filter(|v| v.group == group).collect(),
            None => videos,
        })
    }

    async fn video_frames(
        &self,
        group: &str,
        video: &str,
        page: PageRequest,
    ) -> Result<(Vec<FileRecord>, i64)> {
        let mut frames: Vec<(u64, &FileRecord)> = self
            .records
            .iter()
            .filter_map(|r| FrameKey::parse(&r.s3_key).map(|k| (k, r)))
            .filter(|(k, _)| k.group == group && k.video == video)
            .map(|(k, r)| (k.frame_number(), r))
            .collect();
        frames.sort_by_key(|(n, _)| *n);

        let total = frames.len() as i64;
        let ordered: Vec<&FileRecord> = frames.into_iter().map(|(_, r)| r).collect();
        let frames = page_of(&ordered, page).into_iter().cloned().collect();

        Ok((frames, total))
    }

    async fn search(&self, plan: &SearchPlan, page: PageRequest) -> Result<SearchOutcome> {
        let matched: Vec<&FileRecord> = self.records.iter().filter(|r| plan.matches(r)).collect();
        let facets = Facets::compute(matched.iter().copied());
        let results = page_of(&matched, page).into_iter().cloned().collect();

        Ok(SearchOutcome {
            results,
            total: matched.len() as i64,
            facets,
        })
    }

    async fn close(&self) {}
}
