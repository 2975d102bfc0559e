use crate::backend::{BackendClient, ProxyResponse};
use crate::catalog::groups::{GroupSummary, GroupTotals, SortKey, VideoSummary};
use crate::catalog::key::{is_group_id, parse_video_id};
use crate::catalog::search::{
    Facets, PageRequest, Pagination, SearchFilters, SearchPlan, SearchScope, Suggestion,
};
use crate::catalog::{Catalog, FileRecord};
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::images::{ImagePath, ImageResolver, ServedImage};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 1000;
const DEFAULT_FRAME_LIMIT: u32 = 50;
const MAX_FRAME_LIMIT: u32 = 200;
const DEFAULT_SEARCH_LIMIT: u32 = 20;
const MAX_SEARCH_LIMIT: u32 = 100;
const DEFAULT_SUGGESTION_LIMIT: usize = 10;
const MAX_SUGGESTION_LIMIT: usize = 50;
const DEFAULT_PROXY_LIMIT: i64 = 20;
const MAX_PROXY_LIMIT: i64 = 200;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub catalog: Catalog,
    pub backend: Arc<BackendClient>,
    pub images: Arc<ImageResolver>,
}

/// Query parameters for group and video listings
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// `name`, `frames`, `size` or `date`
    pub sort: Option<String>,
    pub limit: Option<usize>,
}

impl ListQuery {
    fn sort_key(&self) -> Result<SortKey, ApiError> {
        match self.sort.as_deref() {
            None | Some("") => Ok(SortKey::default()),
            Some(raw) => raw.parse().map_err(ApiError::Validation),
        }
    }

    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct GroupListResponse {
    pub groups: Vec<GroupSummary>,
    pub totals: GroupTotals,
    pub sort: SortKey,
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct VideoListResponse {
    pub group: String,
    pub videos: Vec<VideoSummary>,
    pub total: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct FrameListResponse {
    pub video: String,
    pub frames: Vec<FileRecord>,
    pub total: i64,
    pub pagination: Pagination,
}

/// Search request body
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    pub query: String,
    pub scope: SearchScope,
    pub filters: SearchFilters,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<FileRecord>,
    pub total: i64,
    pub pagination: Pagination,
    pub facets: Facets,
}

#[derive(Debug, Default, Deserialize)]
pub struct SuggestionQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SuggestionResponse {
    pub suggestions: Vec<Suggestion>,
}

/// Body shared by the backend proxy routes
#[derive(Debug, Default, Deserialize)]
pub struct ProxyRequest {
    pub query: Option<String>,
    pub id: Option<String>,
    pub limit: Option<i64>,
}

impl ProxyRequest {
    fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_PROXY_LIMIT)
            .clamp(1, MAX_PROXY_LIMIT) as u32
    }
}

fn required(value: Option<&str>, field: &str) -> Result<String, ApiError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ApiError::missing_field(field)),
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/groups", get(list_groups))
        .route("/api/groups/:group/videos", get(list_videos))
        .route("/api/videos/:video/frames", get(list_frames))
        .route("/api/search", post(search))
        .route("/api/search/suggestions", get(suggestions))
        .route("/api/search/semantic", post(semantic_search))
        .route("/api/search/neighbors", post(neighbors))
        .route("/api/frames/lookup", post(lookup))
        .route("/api/images/*path", get(serve_image))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "browser-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.catalog.store().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "database": "disconnected",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Group summaries
#[instrument(skip(state))]
pub async fn list_groups(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<GroupListResponse>, ApiError> {
    let sort = params.sort_key()?;
    let limit = params.limit();
    metrics::counter!("browser.groups.queries").increment(1);

    let groups = state.catalog.groups(sort, limit).await?;
    let totals = GroupTotals::from_groups(&groups);

    Ok(Json(GroupListResponse {
        groups,
        totals,
        sort,
        limit,
    }))
}

/// Videos inside one group
#[instrument(skip(state))]
pub async fn list_videos(
    State(state): State<AppState>,
    Path(group): Path<String>,
    Query(params): Query<ListQuery>,
) -> Result<Json<VideoListResponse>, ApiError> {
    if !is_group_id(&group) {
        return Err(ApiError::Validation(format!("Invalid group id '{group}'")));
    }
    let sort = params.sort_key()?;

    let (videos, total) = state.catalog.videos(&group, sort, params.limit()).await?;
    if total == 0 {
        return Err(ApiError::NotFound {
            resource: format!("Group {group}"),
        });
    }

    Ok(Json(VideoListResponse {
        total,
        group,
        videos,
    }))
}

/// One page of a video's frames
#[instrument(skip(state))]
pub async fn list_frames(
    State(state): State<AppState>,
    Path(video): Path<String>,
    Query(params): Query<PageQuery>,
) -> Result<Json<FrameListResponse>, ApiError> {
    let (group_id, video_id) = parse_video_id(&video)
        .ok_or_else(|| ApiError::Validation(format!("Invalid video id '{video}'")))?;
    let page = PageRequest::new(params.page, params.limit, DEFAULT_FRAME_LIMIT, MAX_FRAME_LIMIT);

    let (frames, total) = state.catalog.frames(&group_id, &video_id, page).await?;
    if total == 0 {
        return Err(ApiError::NotFound {
            resource: format!("Video {video}"),
        });
    }

    Ok(Json(FrameListResponse {
        video,
        frames,
        total,
        pagination: Pagination::new(page, total),
    }))
}

/// Substring search with facets
#[instrument(skip(state, request), fields(query = %request.query, scope = ?request.scope))]
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let page = PageRequest::new(request.page, request.limit, DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT);
    let plan = SearchPlan::new(&request.query, request.scope, request.filters)?;
    metrics::counter!("browser.search.queries", "scope" => request.scope.as_str()).increment(1);

    let outcome = state.catalog.search(&plan, page).await?;

    Ok(Json(SearchResponse {
        pagination: Pagination::new(page, outcome.total),
        results: outcome.results,
        total: outcome.total,
        facets: outcome.facets,
    }))
}

/// Type-ahead suggestions
#[instrument(skip(state))]
pub async fn suggestions(
    State(state): State<AppState>,
    Query(params): Query<SuggestionQuery>,
) -> Result<Json<SuggestionResponse>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SUGGESTION_LIMIT)
        .clamp(1, MAX_SUGGESTION_LIMIT);
    let suggestions = state.catalog.suggestions(&params.q, limit).await?;
    Ok(Json(SuggestionResponse { suggestions }))
}

/// Text-to-image search through the backend
#[instrument(skip(state, request))]
pub async fn semantic_search(
    State(state): State<AppState>,
    Json(request): Json<ProxyRequest>,
) -> Result<Json<ProxyResponse>, ApiError> {
    let query = required(request.query.as_deref(), "query")?;
    Ok(Json(state.backend.semantic_search(&query, request.limit()).await))
}

/// Frames adjacent to a frame id
#[instrument(skip(state, request))]
pub async fn neighbors(
    State(state): State<AppState>,
    Json(request): Json<ProxyRequest>,
) -> Result<Json<ProxyResponse>, ApiError> {
    let id = required(request.id.as_deref(), "id")?;
    Ok(Json(state.backend.neighbors(&id, request.limit()).await))
}

/// Exact frame lookup
#[instrument(skip(state, request))]
pub async fn lookup(
    State(state): State<AppState>,
    Json(request): Json<ProxyRequest>,
) -> Result<Json<ProxyResponse>, ApiError> {
    let id = required(request.id.as_deref(), "id")?;
    Ok(Json(state.backend.lookup(&id).await))
}

/// Frame image from disk, CDN or placeholder
pub async fn serve_image(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<ServedImage, ApiError> {
    let path = ImagePath::parse(&path).map_err(|e| ApiError::Validation(e.to_string()))?;
    Ok(state.images.resolve(&path).await)
}

/// Start the API server and run until `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ResultSource;
    use crate::catalog::groups::tests::record;
    use crate::catalog::MemoryCatalogStore;
    use crate::config::BackendConfig;
    use std::time::Duration;

    fn state(root: &std::path::Path) -> AppState {
        let mut records = Vec::new();
        for i in 1..=10 {
            records.push(record(&format!("L01_V001_{i:05}"), 100, 1));
        }
        for i in 1..=50 {
            records.push(record(&format!("L02_V001_{i:05}"), 10, 3));
        }
        for i in 1..=5 {
            records.push(record(&format!("L02_V002_{i:05}"), 10, 2));
        }
        records.push(record("thumbnail.png", 5, 1));

        let backend = BackendClient::new(&BackendConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_ms: 500,
        })
        .unwrap();

        AppState {
            catalog: Catalog::new(
                Arc::new(MemoryCatalogStore::new(records)),
                Duration::from_secs(2),
            ),
            backend: Arc::new(backend),
            images: Arc::new(ImageResolver::new(root.to_path_buf(), None, 60)),
        }
    }

    #[tokio::test]
    async fn test_list_groups_sorted_by_frames() {
        let root = tempfile::tempdir().unwrap();
        let Json(response) = list_groups(
            State(state(root.path())),
            Query(ListQuery {
                sort: Some("frames".to_string()),
                limit: None,
            }),
        )
        .await
        .unwrap();

        let ids: Vec<_> = response.groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["L02", "L01"]);
        assert_eq!(response.groups[0].video_count, 2);
        assert_eq!(response.totals.frames, 65);
        assert_eq!(response.totals.videos, 3);
        assert_eq!(response.limit, DEFAULT_LIST_LIMIT);
    }

    #[tokio::test]
    async fn test_list_groups_rejects_unknown_sort() {
        let root = tempfile::tempdir().unwrap();
        let err = list_groups(
            State(state(root.path())),
            Query(ListQuery {
                sort: Some("color".to_string()),
                limit: Some(5),
            }),
        )
        .await
        .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_videos_and_frames() {
        let root = tempfile::tempdir().unwrap();
        let state = state(root.path());

        let Json(videos) = list_videos(
            State(state.clone()),
            Path("L02".to_string()),
            Query(ListQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(videos.total, 2);
        assert_eq!(videos.videos[0].id, "L02_V001");

        let Json(first) = list_videos(
            State(state.clone()),
            Path("L02".to_string()),
            Query(ListQuery {
                limit: Some(1),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(first.videos.len(), 1);
        assert_eq!(first.total, 2);

        let missing = list_videos(
            State(state.clone()),
            Path("L99".to_string()),
            Query(ListQuery::default()),
        )
        .await
        .unwrap_err();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let Json(frames) = list_frames(
            State(state.clone()),
            Path("L02_V001".to_string()),
            Query(PageQuery {
                page: Some(3),
                limit: Some(20),
            }),
        )
        .await
        .unwrap();
        assert_eq!(frames.total, 50);
        assert_eq!(frames.frames.len(), 10);
        assert_eq!(frames.frames[0].s3_key, "L02_V001_00041");
        assert!(!frames.pagination.has_next);
        assert!(frames.pagination.has_prev);

        let invalid = list_frames(
            State(state),
            Path("V001".to_string()),
            Query(PageQuery::default()),
        )
        .await
        .unwrap_err();
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search_pagination_and_facets() {
        let root = tempfile::tempdir().unwrap();
        let Json(response) = search(
            State(state(root.path())),
            Json(SearchRequest {
                query: "l02".to_string(),
                scope: SearchScope::Group,
                limit: Some(20),
                page: Some(1),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.total, 55);
        assert_eq!(response.results.len(), 20);
        assert!(response.pagination.has_next);
        assert!(!response.pagination.has_prev);
        assert_eq!(response.pagination.total_pages, 3);
        assert_eq!(response.facets.videos[0].value, "L02_V001");
        assert_eq!(response.facets.videos[0].count, 50);
    }

    #[tokio::test]
    async fn test_suggestions_short_query_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let state = state(root.path());

        let Json(short) = suggestions(
            State(state.clone()),
            Query(SuggestionQuery {
                q: "L".to_string(),
                limit: None,
            }),
        )
        .await
        .unwrap();
        assert!(short.suggestions.is_empty());

        let Json(hits) = suggestions(
            State(state),
            Query(SuggestionQuery {
                q: "l02".to_string(),
                limit: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(hits.suggestions[0].text, "L02");
        assert_eq!(hits.suggestions.len(), 3);
    }

    #[tokio::test]
    async fn test_proxy_handlers_validate_and_fall_back() {
        let root = tempfile::tempdir().unwrap();
        let state = state(root.path());

        let err = semantic_search(
            State(state.clone()),
            Json(ProxyRequest {
                query: Some("   ".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Missing 'query' field");

        let err = neighbors(State(state.clone()), Json(ProxyRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing 'id' field");

        let Json(response) = lookup(
            State(state),
            Json(ProxyRequest {
                id: Some("L01_V001_00500".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.source, ResultSource::Placeholder);
        assert_eq!(response.results[0].image_id, "L01_V001_00500");
        assert_eq!(response.results[0].score, 1.0);
    }

    #[test]
    fn test_proxy_limit_clamped() {
        let request = |limit| ProxyRequest {
            limit,
            ..Default::default()
        };
        assert_eq!(request(None).limit(), 20);
        assert_eq!(request(Some(0)).limit(), 1);
        assert_eq!(request(Some(-4)).limit(), 1);
        assert_eq!(request(Some(5000)).limit(), 200);
    }

    #[tokio::test]
    async fn test_health_and_readiness() {
        let root = tempfile::tempdir().unwrap();

        let health = health_check().await.into_response();
        assert_eq!(health.status(), StatusCode::OK);

        let ready = readiness_check(State(state(root.path())))
            .await
            .into_response();
        assert_eq!(ready.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_serve_image_placeholder_and_rejection() {
        let root = tempfile::tempdir().unwrap();
        let state = state(root.path());

        let response = serve_image(State(state.clone()), Path("L21/L21_V001/001.jpg".to_string()))
            .await
            .unwrap()
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-image-source"], "placeholder");
        assert_eq!(
            response.headers()["cache-control"],
            "public, max-age=60, must-revalidate"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&body).contains("L21/L21_V001/001.jpg"));

        let err = serve_image(State(state), Path("L21/../secret".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
