use std::time::Duration;

use crate::config::AppConfig;
use crate::error::ProxyError;
use crate::util::truncate_on_char_boundary;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const UPSTREAM_ERROR_MAX_LEN: usize = 500;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    timeout: Duration,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, ProxyError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout);

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| ProxyError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| ProxyError::Config(format!("Failed to build HTTP client: {err}")))
}

/// Shared pooled HTTP client for every upstream call.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build the client from server pool settings and upstream proxy settings.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Config`] when the proxy URL is invalid or the
    /// client cannot be built.
    pub fn new(config: &AppConfig) -> Result<Self, ProxyError> {
        let server = &config.server;
        let pool_idle_timeout = if server.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(server.http_pool_idle_timeout_secs))
        };
        let client = build_reqwest_client(
            server.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            Duration::from_secs(server.timeout),
            config.upstream.use_env_proxy,
            config.upstream.proxy.as_deref(),
        )?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Map a request-level reqwest failure.
pub(crate) fn transport_error(context: &str, err: &reqwest::Error) -> ProxyError {
    tracing::error!(target: "zai_proxy::upstream", "{context}: {err}");
    ProxyError::Transport(format!("{context}: {err}"))
}

/// Extract a short, client-safe message from an upstream error body.
///
/// Attempts to extract just the `error.message` (or top-level `message`)
/// field from JSON responses. Falls back to a truncated UTF-8 rendering.
pub(crate) fn sanitize_upstream_error(body: &[u8]) -> String {
    let message = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .and_then(|err| err.get("message").or(Some(err)))
                .and_then(serde_json::Value::as_str)
                .or_else(|| json.get("message").and_then(serde_json::Value::as_str))
                .map(str::to_owned)
        });
    let raw = message.unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
    let truncated = truncate_on_char_boundary(&raw, UPSTREAM_ERROR_MAX_LEN);
    if truncated.len() < raw.len() {
        format!("{truncated}...")
    } else {
        raw
    }
}
