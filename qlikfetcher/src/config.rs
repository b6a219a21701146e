use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{QlikFetcherError, Result};

/// Header the Qlik proxy compares against the `xrfkey` query parameter.
pub const XRFKEY_HEADER: &str = "X-Qlik-Xrfkey";

const DEFAULT_TIMEOUT_MS: u64 = 60_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

#[derive(Deserialize, Debug, Clone)]
pub struct EngineConfig {
    /// Base websocket URL of the Qlik Sense proxy, e.g. `wss://qlik.example.com`.
    pub server: String,
    #[serde(default)]
    pub virtual_proxy: Option<String>,
    /// Deadline for one whole request/reply exchange.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra handshake headers, typically the proxy session cookie.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl EngineConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            virtual_proxy: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            headers: BTreeMap::new(),
        }
    }

    /// Reads `QLIK_SERVER`, `QLIK_VIRTUAL_PROXY`, `QLIK_ENGINE_TIMEOUT_MS` and
    /// `QLIK_SESSION_COOKIE`.
    pub fn from_env() -> Result<Self> {
        let server = std::env::var("QLIK_SERVER")
            .map_err(|_| QlikFetcherError::InvalidParam("QLIK_SERVER must be set".into()))?;
        let mut config = Self::new(server);
        config.virtual_proxy = std::env::var("QLIK_VIRTUAL_PROXY").ok();
        if let Ok(raw) = std::env::var("QLIK_ENGINE_TIMEOUT_MS") {
            config.timeout_ms = raw.parse().map_err(|err| {
                QlikFetcherError::InvalidParam(format!("QLIK_ENGINE_TIMEOUT_MS '{raw}': {err}"))
            })?;
        }
        if let Ok(cookie) = std::env::var("QLIK_SESSION_COOKIE") {
            config.headers.insert("Cookie".into(), cookie);
        }
        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn with_virtual_proxy(mut self, prefix: impl Into<String>) -> Self {
        self.virtual_proxy = Some(prefix.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// `<server>[/<virtual_proxy>]/app/<app_id>?xrfkey=<xrfkey>`
    pub fn app_url(&self, app_id: &str, xrfkey: &str) -> Result<Url> {
        if app_id.trim().is_empty() {
            return Err(QlikFetcherError::InvalidParam("app id must not be empty".into()));
        }
        let mut url = Url::parse(&self.server)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(QlikFetcherError::InvalidParam(format!(
                "server must be a ws:// or wss:// URL, got '{}'",
                self.server
            )));
        }
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                QlikFetcherError::InvalidParam(format!("server '{}' cannot be a base", self.server))
            })?;
            segments.pop_if_empty();
            if let Some(prefix) = self.virtual_proxy.as_deref() {
                let prefix = prefix.trim_matches('/');
                if !prefix.is_empty() {
                    segments.push(prefix);
                }
            }
            segments.push("app").push(app_id);
        }
        url.query_pairs_mut().append_pair("xrfkey", xrfkey);
        Ok(url)
    }
}

/// A fresh 16-character key for the proxy's cross-site request forgery check.
pub fn generate_xrfkey() -> String {
    let mut key = uuid::Uuid::new_v4().simple().to_string();
    key.truncate(16);
    key
}
