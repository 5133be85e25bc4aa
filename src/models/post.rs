use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{ContentClass, SourceId};

/// A topic transformed into a publishable post.
///
/// Produced by [`crate::processor::transform`]; the orchestrator relays its
/// images and finalizes the body before publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub source_id: SourceId,
    /// Never empty; a configured placeholder or a single space at worst.
    pub title: String,
    pub body_html: String,
    /// In traversal order, duplicates kept.
    pub image_urls: Vec<String>,
    pub tags: BTreeSet<String>,
    /// At least one entry.
    pub categories: Vec<String>,
    pub is_featured: bool,
    pub content_class: ContentClass,
    pub created_at: Option<String>,
    /// Destination post type (`post` or a custom type such as `moment`).
    pub post_type: String,
    /// Set when the title is a placeholder because title sync is off.
    pub title_sync_disabled: bool,
}

impl OutputRecord {
    /// Returns the tags as an ordered list, the shape publishers expect.
    pub fn tag_list(&self) -> Vec<String> {
        self.tags.iter().cloned().collect()
    }
}
