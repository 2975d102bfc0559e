//! Frame catalog: the read-only record store and the browse/search queries
//! built on top of it.

pub mod groups;
pub mod key;
pub mod memory;
pub mod postgres;
pub mod search;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{instrument, warn};

use groups::{rank_groups, rank_videos, summarize_groups, GroupSummary, SortKey, VideoSummary};
use search::{suggest, PageRequest, SearchOutcome, SearchPlan, Suggestion};

pub use memory::MemoryCatalogStore;
pub use postgres::PgCatalogStore;

/// One stored frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FileRecord {
    /// `<group>_<video>_<frame>` key
    pub s3_key: String,
    /// Object size in bytes
    pub file_size: i64,
    /// MIME type of the stored image
    pub content_type: String,
    /// When ingestion uploaded the frame
    pub upload_date: DateTime<Utc>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub file_hash: Option<String>,
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

/// Storage backend for frame records
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Cheap connectivity check behind `/ready`
    async fn ping(&self) -> Result<()>;

    /// Per-video aggregates, optionally restricted to one group.
    /// Records with malformed keys never contribute.
    async fn video_summaries(&self, group: Option<&str>) -> Result<Vec<VideoSummary>>;

    /// One page of a video's frames ordered by frame number, plus the total
    async fn video_frames(
        &self,
        group: &str,
        video: &str,
        page: PageRequest,
    ) -> Result<(Vec<FileRecord>, i64)>;

    /// Page, total and facets for a compiled search
    async fn search(&self, plan: &SearchPlan, page: PageRequest) -> Result<SearchOutcome>;

    /// Release connections
    async fn close(&self);
}

/// Catalog query failures
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Query exceeded time budget of {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Browse and search operations over an injected store, each bounded by a
/// time budget
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn CatalogStore>,
    query_timeout: Duration,
}

impl Catalog {
    pub fn new(store: Arc<dyn CatalogStore>, query_timeout: Duration) -> Self {
        Self {
            store,
            query_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, CatalogError>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(result) => result.map_err(CatalogError::Store),
            Err(_) => {
                warn!(budget_ms = self.query_timeout.as_millis() as u64, "Catalog query timed out");
                Err(CatalogError::Timeout(self.query_timeout))
            }
        }
    }

    /// Group summaries sorted by `sort`, at most `limit`
    #[instrument(skip(self))]
    pub async fn groups(&self, sort: SortKey, limit: usize) -> Result<Vec<GroupSummary>, CatalogError> {
        let videos = self.bounded(self.store.video_summaries(None)).await?;
        Ok(rank_groups(summarize_groups(&videos), sort, limit))
    }

    /// Video summaries inside one group, at most `limit`, plus how many the
    /// group holds in total
    #[instrument(skip(self))]
    pub async fn videos(
        &self,
        group: &str,
        sort: SortKey,
        limit: usize,
    ) -> Result<(Vec<VideoSummary>, usize), CatalogError> {
        let videos = self.bounded(self.store.video_summaries(Some(group))).await?;
        let total = videos.len();
        Ok((rank_videos(videos, sort, limit), total))
    }

    /// One page of frames in a video
    #[instrument(skip(self))]
    pub async fn frames(
        &self,
        group: &str,
        video: &str,
        page: PageRequest,
    ) -> Result<(Vec<FileRecord>, i64), CatalogError> {
        self.bounded(self.store.video_frames(group, video, page)).await
    }

    #[instrument(skip(self, plan), fields(pattern = %plan.pattern()))]
    pub async fn search(&self, plan: &SearchPlan, page: PageRequest) -> Result<SearchOutcome, CatalogError> {
        self.bounded(self.store.search(plan, page)).await
    }

    #[instrument(skip(self))]
    pub async fn suggestions(&self, query: &str, limit: usize) -> Result<Vec<Suggestion>, CatalogError> {
        if query.trim().chars().count() < search::MIN_SUGGESTION_QUERY {
            return Ok(Vec::new());
        }
        let videos = self.bounded(self.store.video_summaries(None)).await?;
        Ok(suggest(&videos, query, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::groups::tests::record;

    struct SlowStore;

    #[async_trait]
    impl CatalogStore for SlowStore {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn video_summaries(&self, _group: Option<&str>) -> Result<Vec<VideoSummary>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }

        async fn video_frames(
            &self,
            _group: &str,
            _video: &str,
            _page: PageRequest,
        ) -> Result<(Vec<FileRecord>, i64)> {
            Ok((Vec::new(), 0))
        }

        async fn search(&self, _plan: &SearchPlan, _page: PageRequest) -> Result<SearchOutcome> {
            Ok(SearchOutcome::default())
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_timeout_is_an_error_not_a_partial_result() {
        let catalog = Catalog::new(Arc::new(SlowStore), Duration::from_millis(20));
        let err = catalog.groups(SortKey::Name, 50).await.unwrap_err();
        assert!(matches!(err, CatalogError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_groups_through_memory_store() {
        let store = MemoryCatalogStore::new(vec![
            record("L02_V001_001", 10, 1),
            record("L01_V001_001", 10, 1),
            record("L01_V002_001", 10, 1),
        ]);
        let catalog = Catalog::new(Arc::new(store), Duration::from_secs(1));

        let groups = catalog.groups(SortKey::Name, 1).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, "L01");
        assert_eq!(groups[0].video_count, 2);

        let (videos, total) = catalog.videos("L01", SortKey::Name, 10).await.unwrap();
        assert_eq!(videos.len(), 2);
        assert_eq!(total, 2);

        let (videos, total) = catalog.videos("L01", SortKey::Name, 1).await.unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(total, 2);

        assert!(catalog.suggestions("L", 10).await.unwrap().is_empty());
        assert_eq!(catalog.suggestions("L0", 10).await.unwrap().len(), 5);
    }
}
