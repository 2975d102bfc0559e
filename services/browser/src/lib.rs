//! VBS Browser Service
//!
//! Backend for the video-frame browser UI. Frame records (one per extracted
//! video frame, keyed `<group>_<video>_<frame>`) are read from PostgreSQL or a
//! JSON snapshot; images come from local disk or the CDN bucket.
//!
//! ## Features
//!
//! - **Tiered browsing**: groups, then the videos in a group, then the frames
//!   in a video, all derived from record keys
//! - **Search**: escaped substring matching with AND-ed filters, facets over
//!   the whole filtered set, and type-ahead suggestions
//! - **Semantic proxy**: text search, neighbour search and id lookup forwarded
//!   to the AI backend, with placeholder results when it is down
//! - **Image serving**: local file, then CDN object, then an SVG placeholder
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!   Browser UI ───────▶│ HTTP API     │
//!                      └──────────────┘
//!                        │    │     │
//!           ┌────────────┘    │     └──────────────┐
//!           ▼                 ▼                    ▼
//!   ┌──────────────┐  ┌──────────────┐     ┌──────────────┐
//!   │ Catalog      │  │ Backend      │     │ Image        │
//!   │ (groups,     │  │ client       │     │ resolver     │
//!   │  search)     │  └──────────────┘     └──────────────┘
//!   └──────────────┘         │               │         │
//!           │                ▼               ▼         ▼
//!           ▼         ┌──────────────┐   local disk  ┌──────────────┐
//!   ┌──────────────┐  │ AI backend   │               │ CDN bucket   │
//!   │ PostgreSQL / │  └──────────────┘               └──────────────┘
//!   │ snapshot     │
//!   └──────────────┘
//! ```

pub mod api;
pub mod backend;
pub mod catalog;
pub mod cdn;
pub mod config;
pub mod error;
pub mod images;

pub use api::AppState;
pub use backend::{BackendClient, ProxyResponse, ProxyResult, ResultSource};
pub use catalog::{Catalog, CatalogStore, FileRecord, MemoryCatalogStore, PgCatalogStore};
pub use cdn::{ObjectSource, S3ObjectSource};
pub use config::Config;
pub use error::ApiError;
pub use images::{ImagePath, ImageResolver};
