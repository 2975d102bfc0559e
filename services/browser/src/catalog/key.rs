//! Frame key hierarchy.
//!
//! Keys encode the browse hierarchy implicitly: `L21_V001_00042` is frame
//! `00042` of video `V001` in group `L21`. Nothing about groups or videos is
//! stored; every level is derived from the key.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Well-formed frame key pattern, shared with the SQL store.
pub const FRAME_KEY_PATTERN: &str = r"^(L[0-9]+)_(V[0-9]+)_([0-9]+)$";

fn frame_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(FRAME_KEY_PATTERN).expect("frame key pattern compiles"))
}

fn video_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(L[0-9]+)_(V[0-9]+)$").expect("video id pattern compiles"))
}

fn group_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^L[0-9]+$").expect("group id pattern compiles"))
}

/// Parsed `<group>_<video>_<frame>` key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameKey {
    /// Group id, e.g. `L21`
    pub group: String,
    /// Video id within the group, e.g. `V001`
    pub video: String,
    /// Frame index exactly as written in the key (zero padding kept)
    pub frame: String,
}

impl FrameKey {
    /// Parse a key, returning `None` for anything not shaped `L\d+_V\d+_\d+`
    pub fn parse(key: &str) -> Option<Self> {
        let caps = frame_key_regex().captures(key)?;
        Some(Self {
            group: caps[1].to_string(),
            video: caps[2].to_string(),
            frame: caps[3].to_string(),
        })
    }

    /// Build a key with the frame number zero-padded to `width` digits
    pub fn build(group: &str, video: &str, frame_number: u64, width: usize) -> Self {
        Self {
            group: group.to_string(),
            video: video.to_string(),
            frame: format!("{:0width$}", frame_number, width = width),
        }
    }

    /// `<group>_<video>` prefix shared by every frame of the video
    pub fn video_id(&self) -> String {
        format!("{}_{}", self.group, self.video)
    }

    /// Numeric frame index
    pub fn frame_number(&self) -> u64 {
        self.frame.parse().unwrap_or(0)
    }

    /// A sibling key in the same video, keeping this key's padding width
    pub fn with_frame(&self, frame_number: u64) -> Self {
        Self::build(&self.group, &self.video, frame_number, self.frame.len())
    }

    /// Image path served by the image endpoint for this frame
    pub fn image_path(&self) -> String {
        format!("{}/{}/{}.jpg", self.group, self.video_id(), self.frame)
    }
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.group, self.video, self.frame)
    }
}

/// Whether `id` is a group id (`L\d+`)
pub fn is_group_id(id: &str) -> bool {
    group_id_regex().is_match(id)
}

/// Split a `<group>_<video>` id into its parts
pub fn parse_video_id(id: &str) -> Option<(String, String)> {
    let caps = video_id_regex().captures(id)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Numeric part of an id such as `L10` or `V007`, used for natural ordering
pub fn id_number(id: &str) -> u64 {
    id.trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .unwrap_or(u64::MAX)
}

/// Find the first key-shaped token in free text
pub fn find_key_in_text(text: &str) -> Option<FrameKey> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)\b(L[0-9]+)_(V[0-9]+)_([0-9]+)\b").expect("key token pattern compiles")
    });
    let caps = re.captures(text)?;
    Some(FrameKey {
        group: caps[1].to_uppercase(),
        video: caps[2].to_uppercase(),
        frame: caps[3].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_key() {
        let key = FrameKey::parse("L11_V017_24726").unwrap();
        assert_eq!(key.group, "L11");
        assert_eq!(key.video, "V017");
        assert_eq!(key.frame, "24726");
        assert_eq!(key.video_id(), "L11_V017");
        assert_eq!(key.frame_number(), 24726);
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        for key in [
            "",
            "L11",
            "L11_V017",
            "X11_V017_001",
            "L11_017_001",
            "L11_V017_abc",
            "L11_V017_001_extra",
            "l11_v017_001",
            "thumbnail.jpg",
        ] {
            assert!(FrameKey::parse(key).is_none(), "{key} should be rejected");
        }
    }

    #[test]
    fn test_build_keeps_padding() {
        assert_eq!(FrameKey::build("L21", "V001", 1, 3).to_string(), "L21_V001_001");
        let key = FrameKey::parse("L01_V001_00500").unwrap();
        assert_eq!(key.with_frame(499).to_string(), "L01_V001_00499");
        assert_eq!(key.image_path(), "L01/L01_V001/00500.jpg");
    }

    #[test]
    fn test_id_helpers() {
        assert!(is_group_id("L21"));
        assert!(!is_group_id("L21_V001"));
        assert_eq!(
            parse_video_id("L21_V001"),
            Some(("L21".to_string(), "V001".to_string()))
        );
        assert_eq!(parse_video_id("L21"), None);
        assert!(id_number("L2") < id_number("L10"));
        assert_eq!(id_number("V007"), 7);
    }

    #[test]
    fn test_find_key_in_text() {
        let key = find_key_in_text("frames near l01_v002_00100 please").unwrap();
        assert_eq!(key.to_string(), "L01_V002_00100");
        assert!(find_key_in_text("a person riding a bike").is_none());
    }
}
