use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a source topic.
///
/// The platform hands out numeric ids that overflow some JSON consumers, so
/// they are carried as strings. The same logical topic always yields the same
/// id across fetches, which makes it the deduplication key for sync state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Creates a new source id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_serializes_as_raw_string() {
        let id = SourceId::new("48888111254428");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""48888111254428""#);

        let deserialized: SourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, id);
    }

    #[test]
    fn source_id_displays_inner_value() {
        assert_eq!(SourceId::from("42").to_string(), "42");
    }
}
