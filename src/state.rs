mod request_id;
mod version_cache;

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::error::ProxyError;
use crate::routing::ModelTable;
use crate::transport::{HttpTransport, ZaiClient};

use request_id::RequestIdGenerator;
pub use version_cache::{extract_fe_version, VersionCache};

/// Shared application state accessible to all handlers.
///
/// Everything here is read-only per request apart from the version cache
/// and the id counter.
pub struct AppState {
    pub config: AppConfig,
    pub models: ModelTable,
    pub zai: ZaiClient,
    request_ids: RequestIdGenerator,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, zai: ZaiClient) -> Self {
        Self {
            config,
            models: ModelTable::new(),
            zai,
            request_ids: RequestIdGenerator::new(),
        }
    }

    /// Build the HTTP client, version cache and upstream client from config.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Config`] when the HTTP client cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Self, ProxyError> {
        let http = HttpTransport::new(&config)?;
        let versions = Arc::new(VersionCache::new(&config.upstream.fe_version_fallback));
        let zai = ZaiClient::new(http, &config.upstream, versions);
        Ok(Self::new(config, zai))
    }

    pub fn next_request_seq(&self) -> u64 {
        self.request_ids.next_seq()
    }

    #[must_use]
    pub fn completion_id(&self, request_seq: u64) -> String {
        self.request_ids.completion_id(request_seq)
    }

    /// Whether `stream=true` requests must be answered with one document.
    #[must_use]
    pub fn buffered_only(&self) -> bool {
        self.config.server.buffered_only
    }
}

/// Refresh the front-end version now and then every `version_refresh_secs`.
///
/// Returns `None` when refreshing is disabled.
pub fn spawn_version_refresher(state: &Arc<AppState>) -> Option<tokio::task::JoinHandle<()>> {
    let every = state.config.upstream.version_refresh_secs;
    if every == 0 {
        return None;
    }
    let state = Arc::clone(state);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(every));
        loop {
            ticker.tick().await;
            let zai = &state.zai;
            zai.versions().refresh(zai.http(), zai.base_url()).await;
        }
    }))
}
