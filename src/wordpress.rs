/// WordPress publishing module.
///
/// This module provides a blocking XML-RPC client for publishing posts,
/// the small XML-RPC codec it speaks, and the `Publisher` trait.
mod client;
mod xmlrpc;

pub use client::{
    FALLBACK_TAG, FALLBACK_TITLE_PREFIX, PostDraft, Publisher, STANDARD_POST_TYPE,
    WordPressClient, WordPressClientBuilder, WordPressError, xmlrpc_endpoint,
};
pub use xmlrpc::{XmlRpcError, XmlRpcValue, decode_response, encode_call};
