use crate::models::{ContentClass, RecordKind, SourceRecord};

/// Decides whether a record is published as an article or a short-form post.
///
/// Talks become articles only when they embed a non-empty `article` object;
/// questions, answers and articles are always articles; anything else is
/// short-form.
pub fn classify(record: &SourceRecord) -> ContentClass {
    match record.kind() {
        RecordKind::Talk if record.talk_article().is_some() => ContentClass::Article,
        RecordKind::Talk => ContentClass::ShortForm,
        RecordKind::Question | RecordKind::Answer | RecordKind::Article => ContentClass::Article,
        RecordKind::Other(_) => ContentClass::ShortForm,
    }
}
