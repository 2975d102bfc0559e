use super::groups::{DateSpan, VideoSummary};
use super::key::FRAME_KEY_PATTERN;
use super::search::{FacetCount, Facets, PageRequest, SearchOutcome, SearchPlan, FACET_LIMIT};
use super::{CatalogStore, FileRecord};
use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder};
use tracing::{debug, info, instrument};

const RECORD_COLUMNS: &str = "s3_key, file_size, content_type, upload_date, bucket, file_hash, public_url, region";

/// Group id of a well-formed key, NULL otherwise
const GROUP_EXPR: &str = r"substring(s3_key from '^(L[0-9]+)_V[0-9]+_[0-9]+$')";

/// `<group>_<video>` of a well-formed key, NULL otherwise
const VIDEO_EXPR: &str = r"substring(s3_key from '^(L[0-9]+_V[0-9]+)_[0-9]+$')";

/// Per-video aggregate row
#[derive(Debug, FromRow)]
struct VideoRow {
    group_id: String,
    video: String,
    frame_count: i64,
    total_size: i64,
    first_upload: DateTime<Utc>,
    last_upload: DateTime<Utc>,
}

impl From<VideoRow> for VideoSummary {
    fn from(row: VideoRow) -> Self {
        Self {
            id: format!("{}_{}", row.group_id, row.video),
            group: row.group_id,
            video: row.video,
            frame_count: row.frame_count,
            total_size: row.total_size,
            date_range: DateSpan {
                start: row.first_upload,
                end: row.last_upload,
            },
        }
    }
}

/// Frame catalog backed by the `file_metadata` table in PostgreSQL
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    /// Create a new store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    #[cfg(test)]
    fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn facet(&self, expr: &str, plan: &SearchPlan) -> Result<Vec<FacetCount>> {
        let mut qb = facet_query(expr, plan);

        qb.build_query_as::<FacetCount>()
            .fetch_all(&self.pool)
            .await
            .context("Failed to compute facet")
    }
}

/// Top buckets of `expr` over the filtered set. Ties break on byte order so
/// the cutoff matches [`rank_facet`](super::search::rank_facet).
fn facet_query(expr: &str, plan: &SearchPlan) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new(format!(
        "SELECT value, COUNT(*)::BIGINT AS count FROM (SELECT {expr} AS value FROM file_metadata"
    ));
    push_search_filters(&mut qb, plan);
    qb.push(r#") f WHERE value IS NOT NULL GROUP BY value ORDER BY count DESC, value COLLATE "C" LIMIT "#);
    qb.push_bind(FACET_LIMIT as i64);
    qb
}

/// Escape LIKE wildcards in a literal prefix
fn like_prefix(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Append ` WHERE ...` for a search plan. Every filter is its own AND-ed
/// predicate.
fn push_search_filters(qb: &mut QueryBuilder<'_, Postgres>, plan: &SearchPlan) {
    let filters = plan.filters();

    qb.push(" WHERE (s3_key ~* ");
    qb.push_bind(plan.pattern().to_string());
    if plan.matches_content_type() {
        qb.push(" OR content_type ~* ");
        qb.push_bind(plan.pattern().to_string());
    }
    qb.push(")");

    if !filters.groups.is_empty() {
        qb.push(format!(" AND {GROUP_EXPR} = ANY("));
        qb.push_bind(filters.groups.clone());
        qb.push(")");
    }
    if !filters.videos.is_empty() {
        qb.push(format!(" AND {VIDEO_EXPR} = ANY("));
        qb.push_bind(filters.videos.clone());
        qb.push(")");
    }
    if !filters.content_types.is_empty() {
        qb.push(" AND content_type = ANY(");
        qb.push_bind(filters.content_types.clone());
        qb.push(")");
    }
    if let Some(from) = filters.date_from() {
        qb.push(" AND upload_date >= ");
        qb.push_bind(from);
    }
    if let Some(to) = filters.date_to() {
        qb.push(" AND upload_date <= ");
        qb.push_bind(to);
    }
    if let Some(min) = filters.size_min() {
        qb.push(" AND file_size >= ");
        qb.push_bind(min);
    }
    if let Some(max) = filters.size_max() {
        qb.push(" AND file_size <= ");
        qb.push_bind(max);
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn video_summaries(&self, group: Option<&str>) -> Result<Vec<VideoSummary>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"
            SELECT group_id, video,
                   COUNT(*)::BIGINT AS frame_count,
                   COALESCE(SUM(file_size), 0)::BIGINT AS total_size,
                   MIN(upload_date) AS first_upload,
                   MAX(upload_date) AS last_upload
            FROM (
                SELECT substring(s3_key from '^(L[0-9]+)_') AS group_id,
                       substring(s3_key from '^L[0-9]+_(V[0-9]+)_') AS video,
                       file_size, upload_date
                FROM file_metadata
                WHERE s3_key ~ "#,
        );
        qb.push_bind(FRAME_KEY_PATTERN);
        if let Some(group) = group {
            qb.push(" AND s3_key LIKE ");
            qb.push_bind(like_prefix(&format!("{group}_")));
        }
        qb.push(") v GROUP BY group_id, video");

        let rows = qb
            .build_query_as::<VideoRow>()
            .fetch_all(&self.pool)
            .await
            .context("Failed to aggregate videos")?;

        debug!(videos = rows.len(), "Aggregated video summaries");

        Ok(rows.into_iter().map(VideoSummary::from).collect())
    }

    #[instrument(skip(self))]
    async fn video_frames(
        &self,
        group: &str,
        video: &str,
        page: PageRequest,
    ) -> Result<(Vec<FileRecord>, i64)> {
        let prefix = like_prefix(&format!("{group}_{video}_"));

        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM file_metadata
            WHERE s3_key LIKE $1 AND s3_key ~ $2
            ORDER BY CAST(substring(s3_key from '_([0-9]+)$') AS BIGINT)
            LIMIT $3 OFFSET $4
            "#
        );

        let frames_query = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(&prefix)
            .bind(FRAME_KEY_PATTERN)
            .bind(i64::from(page.limit))
            .bind(page.offset())
            .fetch_all(&self.pool);

        let count_query = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*)::BIGINT FROM file_metadata WHERE s3_key LIKE $1 AND s3_key ~ $2",
        )
        .bind(&prefix)
        .bind(FRAME_KEY_PATTERN)
        .fetch_one(&self.pool);

        let (frames, (total,)) = tokio::try_join!(frames_query, count_query)
            .context("Failed to query video frames")?;

        Ok((frames, total))
    }

    #[instrument(skip(self, plan), fields(pattern = %plan.pattern()))]
    async fn search(&self, plan: &SearchPlan, page: PageRequest) -> Result<SearchOutcome> {
        let mut page_qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {RECORD_COLUMNS} FROM file_metadata"));
        push_search_filters(&mut page_qb, plan);
        page_qb.push(r#" ORDER BY s3_key COLLATE "C" LIMIT "#);
        page_qb.push_bind(i64::from(page.limit));
        page_qb.push(" OFFSET ");
        page_qb.push_bind(page.offset());

        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*)::BIGINT FROM file_metadata");
        push_search_filters(&mut count_qb, plan);

        let results = async {
            page_qb
                .build_query_as::<FileRecord>()
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch search page")
        };
        let total = async {
            count_qb
                .build_query_as::<(i64,)>()
                .fetch_one(&self.pool)
                .await
                .map(|(n,)| n)
                .context("Failed to count search results")
        };

        let (results, total, groups, videos, content_types) = tokio::try_join!(
            results,
            total,
            self.facet(GROUP_EXPR, plan),
            self.facet(VIDEO_EXPR, plan),
            self.facet("content_type", plan),
        )?;

        Ok(SearchOutcome {
            results,
            total,
            facets: Facets {
                groups,
                videos,
                content_types,
            },
        })
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL pool closed");
    }
}
