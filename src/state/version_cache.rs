use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use regex_lite::Regex;

static FE_VERSION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"prod-fe-[a-zA-Z0-9.-]+").ok());

/// First `prod-fe-…` token in a front-end page.
#[must_use]
pub fn extract_fe_version(html: &str) -> Option<&str> {
    FE_VERSION
        .as_ref()?
        .find(html)
        .map(|found| found.as_str())
}

/// Current `X-FE-Version` header value, refreshed in the background.
pub struct VersionCache {
    current: RwLock<Arc<str>>,
    refreshing: AtomicBool,
}

impl VersionCache {
    #[must_use]
    pub fn new(fallback: &str) -> Self {
        Self {
            current: RwLock::new(Arc::from(fallback)),
            refreshing: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn current(&self) -> Arc<str> {
        self.current.read().clone()
    }

    pub fn set(&self, version: &str) {
        *self.current.write() = Arc::from(version);
    }

    /// Fetch `{base_url}/` and keep the first version token found.
    ///
    /// Returns whether the stored value changed. Concurrent refreshes are
    /// skipped; failures keep the previous value.
    pub async fn refresh(&self, client: &reqwest::Client, base_url: &str) -> bool {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            return false;
        }
        let updated = self.fetch_and_store(client, base_url).await;
        self.refreshing.store(false, Ordering::Release);
        updated
    }

    async fn fetch_and_store(&self, client: &reqwest::Client, base_url: &str) -> bool {
        let url = format!("{}/", base_url.trim_end_matches('/'));
        let page = match client.get(&url).send().await {
            Ok(response) => match response.text().await {
                Ok(page) => page,
                Err(err) => {
                    tracing::warn!(target: "zai_proxy::version", "failed to read fe version page: {err}");
                    return false;
                }
            },
            Err(err) => {
                tracing::warn!(target: "zai_proxy::version", "failed to fetch fe version: {err}");
                return false;
            }
        };

        let Some(found) = extract_fe_version(&page) else {
            tracing::warn!(target: "zai_proxy::version", "no fe version found at {url}");
            return false;
        };
        if *self.current() == *found {
            return false;
        }
        self.set(found);
        tracing::info!(target: "zai_proxy::version", version = found, "updated fe version");
        true
    }
}
