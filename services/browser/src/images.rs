//! Frame image resolution: local disk, then the CDN bucket, then a generated
//! SVG placeholder. Every request gets an image back unless the path itself
//! is malformed.

use crate::cdn::ObjectSource;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Long-lived cache directive for real frame bytes
pub const IMMUTABLE_CACHE: &str = "public, max-age=31536000, immutable";

pub const IMAGE_SOURCE_HEADER: &str = "x-image-source";

const SVG_CONTENT_TYPE: &str = "image/svg+xml";

/// Where a served image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    Local,
    Cdn,
    Placeholder,
}

impl ImageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cdn => "cdn",
            Self::Placeholder => "placeholder",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("Invalid image path: {0}")]
pub struct InvalidImagePath(pub String);

/// Validated `<group>/<group>_<video>/<filename>` path
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePath {
    segments: Vec<String>,
}

impl ImagePath {
    pub fn parse(raw: &str) -> Result<Self, InvalidImagePath> {
        let segments: Vec<String> = raw
            .trim_start_matches('/')
            .split('/')
            .map(String::from)
            .collect();

        if segments.len() < 3 {
            return Err(InvalidImagePath(format!(
                "expected <group>/<video>/<file>, got {} segment(s)",
                segments.len()
            )));
        }

        for segment in &segments {
            if segment.is_empty()
                || segment == "."
                || segment == ".."
                || segment.contains('\\')
                || segment.contains('\0')
            {
                return Err(InvalidImagePath(format!("illegal segment {segment:?}")));
            }
        }

        Ok(Self { segments })
    }

    pub fn as_string(&self) -> String {
        self.segments.join("/")
    }

    fn file_name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    fn extension(&self) -> Option<&str> {
        Path::new(self.file_name()).extension().and_then(|e| e.to_str())
    }

    /// Flat CDN key: `L21/L21_V001/001.jpg` is stored as `L21_V001_001`
    pub fn cdn_key(&self) -> String {
        let video = &self.segments[self.segments.len() - 2];
        let file_name = self.file_name();
        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name);
        format!("{video}_{stem}")
    }

    fn local_path(&self, root: &Path) -> PathBuf {
        self.segments.iter().fold(root.to_path_buf(), |p, s| p.join(s))
    }
}

/// Image bytes plus the headers they are served with
#[derive(Debug, Clone)]
pub struct ServedImage {
    pub source: ImageSource,
    pub content_type: String,
    pub cache_control: String,
    pub bytes: Vec<u8>,
}

impl IntoResponse for ServedImage {
    fn into_response(self) -> Response {
        (
            [
                (header::CONTENT_TYPE, self.content_type),
                (header::CACHE_CONTROL, self.cache_control),
                (
                    header::HeaderName::from_static(IMAGE_SOURCE_HEADER),
                    self.source.as_str().to_string(),
                ),
            ],
            self.bytes,
        )
            .into_response()
    }
}

/// Content type for an image file extension
pub fn get_content_type(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        "svg" => SVG_CONTENT_TYPE,
        _ => "application/octet-stream",
    }
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Diagnostic SVG naming the requested path
pub fn placeholder_svg(path: &str) -> String {
    format!(
        concat!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="320" height="180" viewBox="0 0 320 180">"##,
            r##"<rect width="320" height="180" fill="#e5e7eb"/>"##,
            r##"<text x="160" y="80" text-anchor="middle" font-family="sans-serif" font-size="14" fill="#4b5563">Image not available</text>"##,
            r##"<text x="160" y="105" text-anchor="middle" font-family="monospace" font-size="11" fill="#6b7280">{}</text>"##,
            "</svg>"
        ),
        escape_xml(path)
    )
}

/// Resolves image paths against the local root and the CDN
pub struct ImageResolver {
    root: PathBuf,
    cdn: Option<Arc<dyn ObjectSource>>,
    placeholder_max_age_secs: u64,
}

impl ImageResolver {
    pub fn new(
        root: PathBuf,
        cdn: Option<Arc<dyn ObjectSource>>,
        placeholder_max_age_secs: u64,
    ) -> Self {
        Self {
            root,
            cdn,
            placeholder_max_age_secs,
        }
    }

    #[instrument(skip(self, path), fields(path = %path.as_string()))]
    pub async fn resolve(&self, path: &ImagePath) -> ServedImage {
        let served = match self.local(path).await {
            Some(image) => image,
            None => match self.from_cdn(path).await {
                Some(image) => image,
                None => self.placeholder(path),
            },
        };

        metrics::counter!("browser.images.served", "source" => served.source.as_str()).increment(1);
        served
    }

    async fn local(&self, path: &ImagePath) -> Option<ServedImage> {
        let root = tokio::fs::canonicalize(&self.root).await.ok()?;
        let candidate = tokio::fs::canonicalize(path.local_path(&root)).await.ok()?;

        if !candidate.starts_with(&root) {
            warn!(resolved = %candidate.display(), "Image path escapes the image root");
            return None;
        }

        match tokio::fs::read(&candidate).await {
            Ok(bytes) => {
                debug!(size_bytes = bytes.len(), "Serving local image");
                Some(ServedImage {
                    source: ImageSource::Local,
                    content_type: get_content_type(path.extension().unwrap_or_default()).to_string(),
                    cache_control: IMMUTABLE_CACHE.to_string(),
                    bytes,
                })
            }
            Err(e) => {
                debug!(error = %e, "Local image unreadable");
                None
            }
        }
    }

    async fn from_cdn(&self, path: &ImagePath) -> Option<ServedImage> {
        let cdn = self.cdn.as_ref()?;
        let key = path.cdn_key();

        match cdn.fetch_object(&key).await {
            Ok(Some(object)) => Some(ServedImage {
                source: ImageSource::Cdn,
                content_type: object.content_type.unwrap_or_else(|| {
                    get_content_type(path.extension().unwrap_or_default()).to_string()
                }),
                cache_control: IMMUTABLE_CACHE.to_string(),
                bytes: object.bytes,
            }),
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %format!("{e:#}"), "CDN fetch failed");
                None
            }
        }
    }

    fn placeholder(&self, path: &ImagePath) -> ServedImage {
        ServedImage {
            source: ImageSource::Placeholder,
            content_type: SVG_CONTENT_TYPE.to_string(),
            cache_control: format!(
                "public, max-age={}, must-revalidate",
                self.placeholder_max_age_secs
            ),
            bytes: placeholder_svg(&path.as_string()).into_bytes(),
        }
    }
}
