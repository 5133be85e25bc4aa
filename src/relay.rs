/// Image re-hosting module.
///
/// Relaying is best effort: a failed relay keeps the original URL, so a post
/// is never held back by an image.
mod qiniu;

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::AppConfig;

pub use qiniu::{
    DEFAULT_UPLOAD_HOST, QiniuRelay, RelayError, choose_extension, object_key, public_url,
    upload_token,
};

/// Maximum concurrent relays per post.
pub const DEFAULT_RELAY_WORKERS: usize = 3;

/// Re-hosts a remote object and returns the URL to publish.
pub trait ObjectRelay: Send + Sync {
    /// Returns the new URL, or `url` unchanged when relaying fails.
    fn relay(&self, url: &str) -> String;
}

/// Relay that keeps every URL as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughRelay;

impl ObjectRelay for PassthroughRelay {
    fn relay(&self, url: &str) -> String {
        url.to_string()
    }
}

/// Chooses the relay for a configuration: Qiniu when fully configured and
/// its credentials sign a token, passthrough otherwise.
pub fn relay_from_config(config: &AppConfig) -> Box<dyn ObjectRelay> {
    if !config.has_qiniu() {
        info!("Qiniu not configured, images keep their original URLs");
        return Box::new(PassthroughRelay);
    }

    match QiniuRelay::new(&config.qiniu).and_then(|r| r.validate_config().map(|_| r)) {
        Ok(relay) => {
            info!(bucket = %config.qiniu.bucket, "Relaying images through Qiniu");
            Box::new(relay)
        }
        Err(e) => {
            warn!(error = %e, "Qiniu configuration rejected, images keep their original URLs");
            Box::new(PassthroughRelay)
        }
    }
}

/// Relays every distinct URL on a pool of at most `workers` threads and
/// returns an original-to-new map.
pub fn relay_all(
    relay: &dyn ObjectRelay,
    urls: &[String],
    workers: usize,
) -> HashMap<String, String> {
    let mut unique: Vec<&String> = Vec::with_capacity(urls.len());
    for url in urls {
        if !unique.contains(&url) {
            unique.push(url);
        }
    }
    if unique.is_empty() {
        return HashMap::new();
    }

    let threads = workers.clamp(1, unique.len());
    let relay_one = |url: &&String| ((*url).clone(), relay.relay(url));

    let map: HashMap<String, String> = match rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
    {
        Ok(pool) => pool.install(|| unique.par_iter().map(relay_one).collect()),
        Err(e) => {
            warn!(error = %e, "Falling back to sequential relay");
            unique.iter().map(relay_one).collect()
        }
    };

    let relayed = map.iter().filter(|(from, to)| from != to).count();
    debug!(total = map.len(), relayed, "Relayed images");
    map
}
