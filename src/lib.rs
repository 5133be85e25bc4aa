pub mod config;
pub mod logging;
pub mod models;
pub mod processor;
pub mod relay;
pub mod state;
pub mod sync;
pub mod utils;
pub mod wordpress;
pub mod zsxq;

pub use config::{AppConfig, ConfigError, TransformConfig};
pub use models::{ContentClass, OutputRecord, SourceId, SourceRecord};
pub use processor::{TransformError, finalize_body, transform};
pub use relay::{ObjectRelay, PassthroughRelay, QiniuRelay};
pub use state::{StateError, StateStore};
pub use sync::{SyncError, SyncStats, Syncer, SyncerBuilder, TopicOutcome};
pub use wordpress::{PostDraft, Publisher, WordPressClient, WordPressClientBuilder, WordPressError};
pub use zsxq::{Feed, TopicSource, ZsxqClient, ZsxqClientBuilder, ZsxqError};
