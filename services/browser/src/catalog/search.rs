//! Text search over frame records.
//!
//! A [`SearchPlan`] is compiled once per request from the query, scope and
//! filters. The memory store evaluates it record by record; the Postgres store
//! binds the same pattern into `~*` predicates so both agree on what matches.

use super::groups::VideoSummary;
use super::key::{id_number, FrameKey};
use super::FileRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Maximum entries returned per facet
pub const FACET_LIMIT: usize = 20;

/// Minimum query length for suggestions
pub const MIN_SUGGESTION_QUERY: usize = 2;

/// Which part of the key the query is matched against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    /// Substring of key or content type
    #[default]
    All,
    /// Key starts with the group id
    Group,
    /// Key contains a `_<VIDEO>` segment
    Video,
}

impl SearchScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Group => "group",
            Self::Video => "video",
        }
    }
}

/// Inclusive upload date bounds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRangeFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Inclusive byte size bounds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeRangeFilter {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

/// Additive (AND) filters applied on top of the text match
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    /// Group id allow-list
    pub groups: Vec<String>,
    /// `<group>_<video>` allow-list
    pub videos: Vec<String>,
    /// Content type allow-list
    pub content_types: Vec<String>,
    pub date_range: Option<DateRangeFilter>,
    pub size_range: Option<SizeRangeFilter>,
}

impl SearchFilters {
    pub fn date_from(&self) -> Option<DateTime<Utc>> {
        self.date_range.as_ref().and_then(|r| r.from)
    }

    pub fn date_to(&self) -> Option<DateTime<Utc>> {
        self.date_range.as_ref().and_then(|r| r.to)
    }

    pub fn size_min(&self) -> Option<i64> {
        self.size_range.as_ref().and_then(|r| r.min)
    }

    pub fn size_max(&self) -> Option<i64> {
        self.size_range.as_ref().and_then(|r| r.max)
    }

    fn accepts(&self, record: &FileRecord) -> bool {
        let key = FrameKey::parse(&record.s3_key);

        if !self.groups.is_empty()
            && !key.as_ref().is_some_and(|k| self.groups.contains(&k.group))
        {
            return false;
        }
        if !self.videos.is_empty()
            && !key.as_ref().is_some_and(|k| self.videos.contains(&k.video_id()))
        {
            return false;
        }
        if !self.content_types.is_empty() && !self.content_types.contains(&record.content_type) {
            return false;
        }
        if self.date_from().is_some_and(|from| record.upload_date < from) {
            return false;
        }
        if self.date_to().is_some_and(|to| record.upload_date > to) {
            return false;
        }
        if self.size_min().is_some_and(|min| record.file_size < min) {
            return false;
        }
        if self.size_max().is_some_and(|max| record.file_size > max) {
            return false;
        }
        true
    }
}

/// Compiled search: text pattern plus filters
#[derive(Debug, Clone)]
pub struct SearchPlan {
    pattern: String,
    regex: Regex,
    scope: SearchScope,
    filters: SearchFilters,
}

impl SearchPlan {
    pub fn new(query: &str, scope: SearchScope, filters: SearchFilters) -> Result<Self> {
        let query = query.trim();
        let escaped = match scope {
            SearchScope::All => regex::escape(query),
            SearchScope::Group | SearchScope::Video => regex::escape(&query.to_uppercase()),
        };
        let pattern = match scope {
            SearchScope::All => escaped,
            SearchScope::Group => format!("^{escaped}"),
            SearchScope::Video => format!("_{escaped}"),
        };
        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .context("Failed to compile search pattern")?;

        Ok(Self {
            pattern,
            regex,
            scope,
            filters,
        })
    }

    /// Pattern in a syntax shared by the regex crate and Postgres `~*`
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether the content type column takes part in the text match
    pub fn matches_content_type(&self) -> bool {
        self.scope == SearchScope::All
    }

    pub fn filters(&self) -> &SearchFilters {
        &self.filters
    }

    pub fn matches(&self, record: &FileRecord) -> bool {
        let text_hit = self.regex.is_match(&record.s3_key)
            || (self.matches_content_type() && self.regex.is_match(&record.content_type));
        text_hit && self.filters.accepts(record)
    }
}

/// Requested page, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    /// Clamp raw input: page >= 1, `1 <= limit <= max_limit`
    pub fn new(page: Option<u32>, limit: Option<u32>, default_limit: u32, max_limit: u32) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(default_limit).clamp(1, max_limit),
        }
    }

    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.limit)
    }
}

/// Pagination metadata returned with every page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(request: PageRequest, total: i64) -> Self {
        let limit = i64::from(request.limit);
        Self {
            page: request.page,
            limit: request.limit,
            total_pages: (total + limit - 1) / limit,
            has_next: request.offset() + limit < total,
            has_prev: request.page > 1,
        }
    }
}

/// One facet bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FacetCount {
    pub value: String,
    pub count: i64,
}

/// Facet breakdowns over the filtered set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Facets {
    pub groups: Vec<FacetCount>,
    pub videos: Vec<FacetCount>,
    pub content_types: Vec<FacetCount>,
}

impl Facets {
    /// Count every matching record, not just the current page
    pub fn compute<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a FileRecord>,
    {
        let mut groups: HashMap<String, i64> = HashMap::new();
        let mut videos: HashMap<String, i64> = HashMap::new();
        let mut content_types: HashMap<String, i64> = HashMap::new();

        for record in records {
            if let Some(key) = FrameKey::parse(&record.s3_key) {
                *videos.entry(key.video_id()).or_default() += 1;
                *groups.entry(key.group).or_default() += 1;
            }
            *content_types.entry(record.content_type.clone()).or_default() += 1;
        }

        Self {
            groups: rank_facet(groups),
            videos: rank_facet(videos),
            content_types: rank_facet(content_types),
        }
    }
}

/// Order buckets by count descending, then value, and cap at [`FACET_LIMIT`]
pub fn rank_facet(counts: HashMap<String, i64>) -> Vec<FacetCount> {
    let mut buckets: Vec<FacetCount> = counts
        .into_iter()
        .map(|(value, count)| FacetCount { value, count })
        .collect();
    buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    buckets.truncate(FACET_LIMIT);
    buckets
}

/// What a store returns for one search
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub results: Vec<FileRecord>,
    pub total: i64,
    pub facets: Facets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Group,
    Video,
}

/// Type-ahead entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
    pub description: String,
}

/// Group and video ids containing `query`, groups first, at most `limit`
pub fn suggest(videos: &[VideoSummary], query: &str, limit: usize) -> Vec<Suggestion> {
    let query = query.trim();
    if query.chars().count() < MIN_SUGGESTION_QUERY {
        return Vec::new();
    }
    let needle = query.to_uppercase();

    let mut group_frames: BTreeMap<&str, i64> = BTreeMap::new();
    for video in videos {
        *group_frames.entry(video.group.as_str()).or_default() += video.frame_count;
    }

    let mut groups: Vec<(&str, i64)> = group_frames
        .into_iter()
        .filter(|(id, _)| id.to_uppercase().contains(&needle))
        .collect();
    groups.sort_by(|a, b| id_number(a.0).cmp(&id_number(b.0)).then_with(|| a.0.cmp(b.0)));

    let mut matching_videos: Vec<&VideoSummary> = videos
        .iter()
        .filter(|v| v.id.to_uppercase().contains(&needle))
        .collect();
    matching_videos.sort_by(|a, b| {
        id_number(&a.group)
            .cmp(&id_number(&b.group))
            .then_with(|| id_number(&a.video).cmp(&id_number(&b.video)))
            .then_with(|| a.id.cmp(&b.id))
    });

    groups
        .into_iter()
        .map(|(id, frames)| Suggestion {
            text: id.to_string(),
            kind: SuggestionKind::Group,
            description: format!("Group {id} · {frames} frames"),
        })
        .chain(matching_videos.into_iter().map(|v| Suggestion {
            text: v.id.clone(),
            kind: SuggestionKind::Video,
            description: format!("Video {} in {} · {} frames", v.video, v.group, v.frame_count),
        }))
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::groups::summarize_videos;
    use crate::catalog::groups::tests::record;

    fn plan(query: &str, scope: SearchScope) -> SearchPlan {
        SearchPlan::new(query, scope, SearchFilters::default()).unwrap()
    }

    #[test]
    fn test_all_scope_matches_key_or_content_type() {
        let p = plan("v001", SearchScope::All);
        assert!(p.matches(&record("L01_V001_001", 1, 1)));
        assert!(!p.matches(&record("L01_V002_001", 1, 1)));

        let p = plan("JPEG", SearchScope::All);
        assert!(p.matches(&record("L01_V002_001", 1, 1)));
    }

    #[test]
    fn test_group_scope_is_anchored() {
        let p = plan("l01", SearchScope::Group);
        assert_eq!(p.pattern(), "^L01");
        assert!(p.matches(&record("L01_V001_001", 1, 1)));
        assert!(!p.matches(&record("L10_V001_001", 1, 1)));
        assert!(!p.matches(&record("XL01_V001_001", 1, 1)));
    }

    #[test]
    fn test_video_scope_requires_segment() {
        let p = plan("v002", SearchScope::Video);
        assert_eq!(p.pattern(), "_V002");
        assert!(p.matches(&record("L01_V002_001", 1, 1)));
        assert!(!p.matches(&record("L01_V001_002", 1, 1)));
        // content type does not take part outside the `all` scope
        let p = plan("jpeg", SearchScope::Video);
        assert!(!p.matches(&record("L01_V001_001", 1, 1)));
    }

    #[test]
    fn test_query_is_escaped() {
        let p = plan("L0.", SearchScope::All);
        assert!(!p.matches(&record("L01_V001_001", 1, 1)));
        assert!(plan("", SearchScope::All).matches(&record("anything", 1, 1)));
    }

    #[test]
    fn test_filters_are_additive() {
        let filters = SearchFilters {
            groups: vec!["L01".to_string(), "L02".to_string()],
            size_range: Some(SizeRangeFilter {
                min: Some(10),
                max: Some(100),
            }),
            date_range: Some(DateRangeFilter {
                from: Some(record("x", 0, 2).upload_date),
                to: None,
            }),
            ..Default::default()
        };
        let p = SearchPlan::new("", SearchScope::All, filters).unwrap();

        assert!(p.matches(&record("L01_V001_001", 50, 3)));
        assert!(!p.matches(&record("L03_V001_001", 50, 3)));
        assert!(!p.matches(&record("L01_V001_001", 500, 3)));
        assert!(!p.matches(&record("L01_V001_001", 50, 1)));
        assert!(!p.matches(&record("malformed", 50, 3)));
    }

    #[test]
    fn test_video_and_content_type_filters() {
        let mut png = record("L01_V002_001", 1, 1);
        png.content_type = "image/png".to_string();
        let filters = SearchFilters {
            videos: vec!["L01_V002".to_string()],
            content_types: vec!["image/jpeg".to_string()],
            ..Default::default()
        };
        let p = SearchPlan::new("", SearchScope::All, filters).unwrap();

        assert!(p.matches(&record("L01_V002_003", 1, 1)));
        assert!(!p.matches(&png));
        assert!(!p.matches(&record("L01_V001_003", 1, 1)));
    }

    #[test]
    fn test_pagination_flags() {
        let p = Pagination::new(PageRequest { page: 1, limit: 20 }, 45);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_next);
        assert!(!p.has_prev);

        let p = Pagination::new(PageRequest { page: 3, limit: 20 }, 45);
        assert!(!p.has_next);
        assert!(p.has_prev);

        let p = Pagination::new(PageRequest { page: 2, limit: 20 }, 40);
        assert!(!p.has_next);

        let p = Pagination::new(PageRequest { page: 1, limit: 20 }, 0);
        assert_eq!(p.total_pages, 0);
        assert!(!p.has_next);
    }

    #[test]
    fn test_page_request_clamps() {
        let r = PageRequest::new(Some(0), Some(1000), 20, 100);
        assert_eq!(r, PageRequest { page: 1, limit: 100 });
        assert_eq!(PageRequest::new(None, None, 20, 100).limit, 20);
        assert_eq!(PageRequest { page: 3, limit: 20 }.offset(), 40);
    }

    #[test]
    fn test_facets_rank_by_count() {
        let records = vec![
            record("L01_V001_001", 1, 1),
            record("L01_V001_002", 1, 1),
            record("L02_V001_001", 1, 1),
            record("odd-key", 1, 1),
        ];
        let facets = Facets::compute(&records);

        assert_eq!(facets.groups[0], FacetCount { value: "L01".to_string(), count: 2 });
        assert_eq!(facets.videos.len(), 2);
        assert_eq!(facets.content_types[0].count, 4);
    }

    #[test]
    fn test_facet_limit() {
        let counts: HashMap<String, i64> = (0..30).map(|i| (format!("L{i:02}"), i)).collect();
        let ranked = rank_facet(counts);
        assert_eq!(ranked.len(), FACET_LIMIT);
        assert_eq!(ranked[0].value, "L29");
    }

    #[test]
    fn test_suggestions() {
        let videos = summarize_videos(&[
            record("L01_V001_001", 1, 1),
            record("L01_V002_001", 1, 1),
            record("L10_V001_001", 1, 1),
            record("L21_V001_001", 1, 1),
        ]);

        assert!(suggest(&videos, "l", 10).is_empty());

        let hits = suggest(&videos, "l1", 10);
        let texts: Vec<_> = hits.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["L10", "L10_V001"]);
        assert_eq!(hits[0].kind, SuggestionKind::Group);
        assert_eq!(hits[1].kind, SuggestionKind::Video);

        let hits = suggest(&videos, "v001", 10);
        assert!(hits.iter().all(|s| s.kind == SuggestionKind::Video));
        assert_eq!(hits.len(), 3);

        assert_eq!(suggest(&videos, "L", 10).len(), 0);
        assert_eq!(suggest(&videos, "_V", 2).len(), 2);
    }
}
