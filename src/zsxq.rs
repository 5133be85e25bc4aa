/// Source platform HTTP client module.
///
/// This module provides a blocking client for the topic API, including
/// error handling, retry logic, pagination and timeout configuration.
mod client;

pub use client::{
    Backoff, DEFAULT_BASE_URL, Feed, MAX_PAGE_SIZE, TopicSource, ZsxqClient, ZsxqClientBuilder,
    ZsxqError, check_envelope, retry_with_backoff,
};
