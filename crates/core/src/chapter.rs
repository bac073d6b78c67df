//! The unit of readable content produced by a site `Parser` and persisted
//! by `quelle_storage::ChapterStorage`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::ChapterId;

/// Well-known `extra` keys. Sites are free to stash anything else in
/// `extra`; these are just the ones the core understands.
pub mod extra_keys {
    pub const NEXT_CID: &str = "next_cid";
    pub const ENCRYPTED: &str = "encrypted";
    pub const IMAGE_POSITIONS: &str = "image_positions";
    pub const AUTHOR_SAY: &str = "author_say";
}

/// A single parsed chapter: title, plain-text body (`\n`-separated
/// paragraphs), and an open `extra` bag for site-specific metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl Chapter {
    pub fn new(id: ChapterId, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            content: content.into(),
            extra: Map::new(),
        }
    }

    /// The chapter ID that should follow this one in the catalog, if the
    /// site's page exposed it. Used by `ChapterIdRepairer`.
    pub fn next_cid(&self) -> Option<ChapterId> {
        self.extra
            .get(extra_keys::NEXT_CID)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ChapterId::from)
    }

    /// `true` if the site marked this chapter as encrypted / requiring a
    /// later re-fetch. The default `needs_refetch_hook` checks exactly this.
    pub fn is_encrypted(&self) -> bool {
        self.extra
            .get(extra_keys::ENCRYPTED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Optional author's afterword, rendered by exporters as trailing
    /// content; the core itself never reads this beyond exposing it.
    pub fn author_say(&self) -> Option<&str> {
        self.extra.get(extra_keys::AUTHOR_SAY).and_then(Value::as_str)
    }
}
