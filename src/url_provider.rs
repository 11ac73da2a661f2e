//! Named URL lookup and `{{URI 'name'}}` template rendering

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use crate::Result;
use crate::cache::{Clock, SystemClock, TtlCache};
use crate::config::Config;
use crate::kv::KvStore;

/// Default lifetime of cached lookups
pub const DEFAULT_URL_CACHE_TTL: Duration = Duration::from_secs(3600);

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{URI '(\w+)'\}\}").expect("static regex"))
}

/// Resolves named URLs from the store's URL hash.
pub struct UrlProvider {
    kv: Arc<dyn KvStore>,
    key: String,
    cache: TtlCache<Option<String>>,
}

impl UrlProvider {
    /// Provider reading `key` (normally `{prefix}:URIS`).
    pub fn new(kv: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self::with_clock(kv, key, DEFAULT_URL_CACHE_TTL, Arc::new(SystemClock))
    }

    /// Provider for the configured URL hash.
    pub fn from_config(kv: Arc<dyn KvStore>, config: &Config) -> Self {
        Self::new(kv, config.urls_key())
    }

    /// Provider with an explicit cache TTL and clock.
    pub fn with_clock(
        kv: Arc<dyn KvStore>,
        key: impl Into<String>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kv,
            key: key.into(),
            cache: TtlCache::with_clock(ttl, clock),
        }
    }

    /// Look up `name`, bypassing the cache.
    pub async fn get_url(&self, name: &str) -> Result<Option<String>> {
        self.kv.hget(&self.key, name).await
    }

    /// Look up `name` through the cache. Misses are cached as well.
    pub async fn get_url_cached(&self, name: &str) -> Result<Option<String>> {
        if let Some(hit) = self.cache.get(name) {
            return Ok(hit);
        }
        let url = self.get_url(name).await?;
        self.cache.set(name, url.clone());
        Ok(url)
    }

    /// Replace every placeholder in `template`, bypassing the cache.
    pub async fn render_url(&self, template: &str) -> Result<String> {
        self.render(template, false).await
    }

    /// Replace every placeholder in `template` using cached lookups.
    pub async fn render_url_cached(&self, template: &str) -> Result<String> {
        self.render(template, true).await
    }

    /// Drop all cached lookups.
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    async fn render(&self, template: &str, cached: bool) -> Result<String> {
        let mut rendered = String::with_capacity(template.len());
        let mut last = 0;

        for caps in placeholder().captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            rendered.push_str(&template[last..whole.start()]);

            let url = if cached {
                self.get_url_cached(name.as_str()).await?
            } else {
                self.get_url(name.as_str()).await?
            };
            match url {
                Some(url) => rendered.push_str(&url),
                None => warn!(name = name.as_str(), hash = %self.key, "Unknown URL name"),
            }
            last = whole.end();
        }

        rendered.push_str(&template[last..]);
        debug!(template, rendered = %rendered, "Rendered URL template");
        Ok(rendered)
    }
}
