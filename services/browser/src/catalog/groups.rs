//! Group and video summaries.
//!
//! Stores produce per-video rows (steps a-c: prefix extraction, malformed-key
//! exclusion, `(group, video)` aggregation). Rolling videos up into groups,
//! sorting and truncation happen here so every store orders results the same
//! way.

use super::key::{id_number, FrameKey};
use super::FileRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Sort order for group and video listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Id ascending, numeric-aware
    #[default]
    Name,
    /// Frame count descending
    Frames,
    /// Total bytes descending
    Size,
    /// Earliest upload descending
    Date,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "frames" => Ok(Self::Frames),
            "size" => Ok(Self::Size),
            "date" => Ok(Self::Date),
            other => Err(format!(
                "Invalid sort '{other}', expected one of name, frames, size, date"
            )),
        }
    }
}

/// Inclusive upload date bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateSpan {
    fn at(ts: DateTime<Utc>) -> Self {
        Self { start: ts, end: ts }
    }

    fn widen(&mut self, other: &DateSpan) {
        self.start = self.start.min(other.start);
        self.end = self.end.max(other.end);
    }
}

/// Per-video aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSummary {
    /// `<group>_<video>`
    pub id: String,
    pub group: String,
    pub video: String,
    pub frame_count: i64,
    pub total_size: i64,
    pub date_range: DateSpan,
}

/// Per-group aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub id: String,
    pub name: String,
    pub video_count: i64,
    pub frame_count: i64,
    pub total_size: i64,
    pub date_range: DateSpan,
}

/// Totals over a list of groups
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupTotals {
    pub groups: i64,
    pub videos: i64,
    pub frames: i64,
    pub size: i64,
}

impl GroupTotals {
    pub fn from_groups(groups: &[GroupSummary]) -> Self {
        groups.iter().fold(
            Self {
                groups: groups.len() as i64,
                ..Default::default()
            },
            |mut acc, g| {
                acc.videos += g.video_count;
                acc.frames += g.frame_count;
                acc.size += g.total_size;
                acc
            },
        )
    }
}

/// Aggregate raw records into per-video summaries, skipping malformed keys
pub fn summarize_videos<'a, I>(records: I) -> Vec<VideoSummary>
where
    I: IntoIterator<Item = &'a FileRecord>,
{
    let mut videos: BTreeMap<String, VideoSummary> = BTreeMap::new();

    for record in records {
        let Some(key) = FrameKey::parse(&record.s3_key) else {
            continue;
        };
        let span = DateSpan::at(record.upload_date);

        videos
            .entry(key.video_id())
            .and_modify(|v| {
                v.frame_count += 1;
                v.total_size += record.file_size;
                v.date_range.widen(&span);
            })
            .or_insert_with(|| VideoSummary {
                id: key.video_id(),
                group: key.group.clone(),
                video: key.video.clone(),
                frame_count: 1,
                total_size: record.file_size,
                date_range: span,
            });
    }

    videos.into_values().collect()
}

/// Roll per-video summaries up into per-group summaries
pub fn summarize_groups(videos: &[VideoSummary]) -> Vec<GroupSummary> {
    let mut groups: BTreeMap<&str, GroupSummary> = BTreeMap::new();

    for video in videos {
        groups
            .entry(video.group.as_str())
            .and_modify(|g| {
                g.video_count += 1;
                g.frame_count += video.frame_count;
                g.total_size += video.total_size;
                g.date_range.widen(&video.date_range);
            })
            .or_insert_with(|| GroupSummary {
                id: video.group.clone(),
                name: format!("Group {}", video.group),
                video_count: 1,
                frame_count: video.frame_count,
                total_size: video.total_size,
                date_range: video.date_range,
            });
    }

    groups.into_values().collect()
}

fn by_id(a: &str, b: &str) -> Ordering {
    id_number(a).cmp(&id_number(b)).then_with(|| a.cmp(b))
}

/// Sort groups by `sort` and keep at most `limit`
pub fn rank_groups(mut groups: Vec<GroupSummary>, sort: SortKey, limit: usize) -> Vec<GroupSummary> {
    groups.sort_by(|a, b| {
        let primary = match sort {
            SortKey::Name => Ordering::Equal,
            SortKey::Frames => b.frame_count.cmp(&a.frame_count),
            SortKey::Size => b.total_size.cmp(&a.total_size),
            SortKey::Date => b.date_range.start.cmp(&a.date_range.start),
        };
        primary.then_with(|| by_id(&a.id, &b.id))
    });
    groups.truncate(limit);
    groups
}

/// Sort videos by `sort` and keep at most `limit`
pub fn rank_videos(mut videos: Vec<VideoSummary>, sort: SortKey, limit: usize) -> Vec<VideoSummary> {
    videos.sort_by(|a, b| {
        let primary = match sort {
            SortKey::Name => by_id(&a.group, &b.group),
            SortKey::Frames => b.frame_count.cmp(&a.frame_count),
            SortKey::Size => b.total_size.cmp(&a.total_size),
            SortKey::Date => b.date_range.start.cmp(&a.date_range.start),
        };
        primary.then_with(|| by_id(&a.video, &b.video))
    });
    videos.truncate(limit);
    videos
}
