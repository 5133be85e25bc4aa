mod content_class;
mod ids;
mod post;
mod record;

pub use content_class::ContentClass;
pub use ids::SourceId;
pub use post::OutputRecord;
pub use record::{COLUMN_NAME_KEY, FULL_ARTICLE_KEY, RecordKind, SYNC_TARGET_KEY, SourceRecord};
