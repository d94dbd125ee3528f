//! Core data types for books, catalogs, and stored chapters.
//!
//! These types are the contract between the site plugins (which produce them),
//! the chapter store (which persists them), and exporters (which consume them
//! read-only). Catalog order inside [`BookInfo`] is authoritative: the
//! downloader enqueues chapters in exactly this order and exporters re-sort
//! completion results against it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque site-specific key/value payload attached to a chapter
/// (author notes, image manifests, font-encryption markers, ...).
pub type ExtraMap = Map<String, Value>;

/// A single chapter entry in a book's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRef {
    /// Chapter identifier, unique within the book.
    pub chapter_id: String,
    /// Chapter title as listed in the catalog.
    pub title: String,
    /// Chapter URL (absolute or site-relative, as the site lists it).
    pub url: String,
}

/// An ordered grouping of chapters within a book.
///
/// Volumes are cosmetic for the pipeline but preserved for exporters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume display name.
    pub volume_name: String,
    /// Chapters in catalog order.
    pub chapters: Vec<ChapterRef>,
}

/// Book metadata and catalog recovered from a site's info/catalog pages.
///
/// Missing optional fields are empty strings / empty lists rather than
/// parse failures; only a page that is not a book page at all should make
/// a parser return `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookInfo {
    pub book_name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub cover_url: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub update_time: String,
    /// Ordered volumes; ordering across and within volumes is authoritative.
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl BookInfo {
    /// Iterates all chapter references in catalog order, across volumes.
    pub fn chapters(&self) -> impl Iterator<Item = &ChapterRef> {
        self.volumes.iter().flat_map(|v| v.chapters.iter())
    }

    /// Total number of chapters across all volumes.
    #[must_use]
    pub fn chapter_count(&self) -> usize {
        self.volumes.iter().map(|v| v.chapters.len()).sum()
    }
}

/// A persisted chapter: the unit written to the chapter store.
///
/// `content` may be the empty string only when the record is a placeholder,
/// i.e. `need_refetch` is true (access-limited or encrypted content) or the
/// site intentionally serves an empty chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRecord {
    /// Primary key within a book.
    pub id: String,
    pub title: String,
    pub content: String,
    /// True when the stored content is provisional and should be fetched
    /// again on a future run (VIP wall, font encryption, soft failure).
    #[serde(default)]
    pub need_refetch: bool,
    #[serde(default)]
    pub extra: ExtraMap,
}

impl ChapterRecord {
    /// Creates a complete chapter record with no extra payload.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            need_refetch: false,
            extra: ExtraMap::new(),
        }
    }

    /// Creates an empty placeholder record.
    ///
    /// Used for the two short-circuit terminal outcomes: access-limited
    /// content (`need_refetch = true`) and intentionally empty chapters
    /// (`need_refetch = false`).
    #[must_use]
    pub fn placeholder(id: impl Into<String>, need_refetch: bool) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            content: String::new(),
            need_refetch,
            extra: ExtraMap::new(),
        }
    }
}
