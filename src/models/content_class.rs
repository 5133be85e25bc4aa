use serde::{Deserialize, Serialize};
use std::fmt;

/// Destination shape of a transformed topic.
///
/// Decided from the topic's structure rather than the platform's own type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    /// Long-form article: titled from its first line, paragraph-wrapped body.
    Article,
    /// Short post: prefixed digest title, compact body.
    ShortForm,
}

impl ContentClass {
    pub fn is_article(self) -> bool {
        matches!(self, Self::Article)
    }
}

impl fmt::Display for ContentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Article => write!(f, "article"),
            Self::ShortForm => write!(f, "short_form"),
        }
    }
}
