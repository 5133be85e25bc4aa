use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::SourceId;

/// Key the fetch layer uses to attach a column (series) name to a topic.
pub const COLUMN_NAME_KEY: &str = "_column_name";
/// Key the fetch layer uses to attach the sync target a topic came from.
pub const SYNC_TARGET_KEY: &str = "_sync_target";
/// Key holding the expanded full article attached by the orchestrator.
pub const FULL_ARTICLE_KEY: &str = "_full_article";

/// Origin shape of a topic, as tagged by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Talk,
    Question,
    Answer,
    Article,
    Other(String),
}

impl RecordKind {
    fn parse(tag: &str) -> Self {
        match tag {
            "talk" => Self::Talk,
            "q&a-question" | "question" => Self::Question,
            "q&a-answer" | "answer" => Self::Answer,
            "article" => Self::Article,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A raw topic as returned by the source API.
///
/// The payload is an arbitrarily nested JSON tree; accessors pick out the
/// handful of fields the transformation needs and default gracefully when a
/// field is absent or has an unexpected shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRecord(Value);

impl SourceRecord {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Parses a topic from its JSON text.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text).map(Self)
    }

    /// Returns the underlying JSON tree.
    pub fn raw(&self) -> &Value {
        &self.0
    }

    pub fn into_raw(self) -> Value {
        self.0
    }

    fn object(&self) -> Option<&Map<String, Value>> {
        self.0.as_object()
    }

    pub fn is_object(&self) -> bool {
        self.0.is_object()
    }

    /// Returns the topic id, accepting both string and numeric encodings.
    pub fn id(&self) -> Option<SourceId> {
        match self.0.get("topic_id")? {
            Value::String(s) if !s.is_empty() => Some(SourceId::new(s.as_str())),
            Value::Number(n) => Some(SourceId::new(n.to_string())),
            _ => None,
        }
    }

    /// Returns the raw type tag, defaulting to `talk` like the platform does.
    pub fn kind_tag(&self) -> &str {
        self.0.get("type").and_then(Value::as_str).unwrap_or("talk")
    }

    pub fn kind(&self) -> RecordKind {
        RecordKind::parse(self.kind_tag())
    }

    /// Returns the nested payload object that carries the body for this kind.
    fn payload(&self) -> Option<&Value> {
        let key = match self.kind() {
            RecordKind::Talk => "talk",
            RecordKind::Question => "question",
            RecordKind::Answer => "answer",
            _ => "content",
        };
        self.0
            .get(key)
            .or_else(|| self.0.get("content"))
            .filter(|v| v.is_object())
    }

    /// Returns the text body, or an empty string when none is present.
    pub fn body_text(&self) -> &str {
        self.payload()
            .and_then(|p| p.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Returns an explicitly supplied title, if any.
    pub fn explicit_title(&self) -> Option<&str> {
        self.0
            .get("content")
            .and_then(|c| c.get("title"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }

    pub fn created_at(&self) -> Option<&str> {
        self.0
            .get("create_time")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }

    /// Whether the topic is marked featured ("digested" by the platform).
    pub fn is_featured(&self) -> bool {
        self.flag("digested")
    }

    /// Whether the topic is pinned ("sticky" by the platform).
    pub fn is_pinned(&self) -> bool {
        self.flag("sticky")
    }

    fn flag(&self, key: &str) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Returns the column name attached by the fetch layer.
    pub fn column_name(&self) -> Option<&str> {
        self.0
            .get(COLUMN_NAME_KEY)
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
    }

    /// Returns the embedded article object of a talk, when non-empty.
    pub fn talk_article(&self) -> Option<&Map<String, Value>> {
        self.0
            .get("talk")
            .and_then(|t| t.get("article"))
            .and_then(Value::as_object)
            .filter(|a| !a.is_empty())
    }

    /// Returns the sync target object attached by the fetch layer.
    pub fn sync_target(&self) -> Option<&Value> {
        self.0.get(SYNC_TARGET_KEY)
    }

    /// Sets a top-level field, ignoring non-object records.
    pub fn attach(&mut self, key: &str, value: Value) {
        if let Some(map) = self.0.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }

    /// Replaces the text body in place, creating the payload object if needed.
    pub fn set_body_text(&mut self, text: &str) {
        let key = match self.kind() {
            RecordKind::Talk => "talk",
            RecordKind::Question => "question",
            RecordKind::Answer => "answer",
            _ => "content",
        };
        if let Some(map) = self.0.as_object_mut() {
            let payload = map
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(payload) = payload.as_object_mut() {
                payload.insert("text".to_string(), Value::String(text.to_string()));
            }
        }
    }

    /// Copies the fetch-layer attachments (`_`-prefixed keys) from `other`.
    pub fn inherit_attachments(&mut self, other: &SourceRecord) {
        let Some(source) = other.object() else {
            return;
        };
        for (key, value) in source.iter().filter(|(k, _)| k.starts_with('_')) {
            self.attach(key, value.clone());
        }
    }
}

impl From<Value> for SourceRecord {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_accepts_numeric_and_string_forms() {
        let numeric = SourceRecord::new(json!({"topic_id": 1234567890123u64}));
        let string = SourceRecord::new(json!({"topic_id": "1234567890123"}));

        assert_eq!(numeric.id(), Some(SourceId::new("1234567890123")));
        assert_eq!(string.id(), numeric.id());
        assert_eq!(SourceRecord::new(json!({})).id(), None);
    }

    #[test]
    fn body_text_follows_kind() {
        let talk = SourceRecord::new(json!({"type": "talk", "talk": {"text": "t"}}));
        let question =
            SourceRecord::new(json!({"type": "q&a-question", "question": {"text": "q"}}));
        let answer = SourceRecord::new(json!({"type": "q&a-answer", "answer": {"text": "a"}}));
        let content = SourceRecord::new(json!({"content": {"text": "c"}}));

        assert_eq!(talk.body_text(), "t");
        assert_eq!(question.body_text(), "q");
        assert_eq!(answer.body_text(), "a");
        assert_eq!(content.body_text(), "c");
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let record = SourceRecord::new(json!({"type": "talk"}));
        assert_eq!(record.body_text(), "");
        assert_eq!(record.created_at(), None);
        assert!(!record.is_featured());
        assert!(!record.is_pinned());
        assert!(record.explicit_title().is_none());
    }

    #[test]
    fn talk_article_ignores_empty_object() {
        let empty = SourceRecord::new(json!({"type": "talk", "talk": {"article": {}}}));
        let full = SourceRecord::new(
            json!({"type": "talk", "talk": {"article": {"title": "x"}}}),
        );
        assert!(empty.talk_article().is_none());
        assert!(full.talk_article().is_some());
    }

    #[test]
    fn set_body_text_replaces_payload_text() {
        let mut record = SourceRecord::new(json!({"type": "talk", "talk": {"text": "short"}}));
        record.set_body_text("much longer text");
        assert_eq!(record.body_text(), "much longer text");
    }

    #[test]
    fn inherit_attachments_copies_underscore_keys_only() {
        let listed = SourceRecord::new(json!({
            "topic_id": "1",
            "_column_name": "Rust",
            "_sync_target": {"type": "column"},
            "talk": {"text": "summary"}
        }));
        let mut detail = SourceRecord::new(json!({"topic_id": "1", "talk": {"text": "full"}}));
        detail.inherit_attachments(&listed);

        assert_eq!(detail.column_name(), Some("Rust"));
        assert!(detail.sync_target().is_some());
        assert_eq!(detail.body_text(), "full");
    }
}
