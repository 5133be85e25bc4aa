//! Content transformation core.
//!
//! Turns raw topics into publishable posts: classification, title synthesis,
//! duplicate title-line removal, markup normalization and extraction of
//! images, tags and categories. Everything here is pure and performs no I/O,
//! so it can run on any number of worker threads at once.

mod classify;
mod dedupe;
mod extract;
mod markup;
mod timestamp;
mod title;
mod transform;

pub use classify::classify;
pub use dedupe::{duplicate_rule, remove_leading_duplicate};
pub use extract::{FEATURED_TAG, determine_categories, extract_images, extract_tags};
pub use markup::{
    decode_attribute, is_image_url, normalize_article, normalize_short_form, strip_footer,
    strip_tags,
};
pub use timestamp::{
    TimestampError, format_footer_time, format_share_date, format_short_stamp, parse_timestamp,
};
pub use title::{SynthesizedTitle, article_title, short_form_title, synthesize_title};
pub use transform::{TransformError, finalize_body, transform};
