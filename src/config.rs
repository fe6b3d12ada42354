//! Client configuration.
//!
//! Built through a fluent builder; `build()` validates and fails with
//! `InvalidArgument` rather than letting a zero-capacity queue or a
//! non-WebSocket URL surface as a runtime mystery.

use std::sync::Arc;
use std::time::Duration;

use crate::backoff::BackoffStrategy;
use crate::circuit::CircuitBreakerConfig;
use crate::error::KrakenError;
use crate::gap::GapConfig;
use crate::types::{GapEvent, ReconnectEvent};

/// Public v2 endpoint.
pub const DEFAULT_URL: &str = "wss://ws.kraken.com/v2";
/// Authenticated v2 endpoint for private channels.
pub const DEFAULT_AUTH_URL: &str = "wss://ws-auth.kraken.com/v2";

pub const DEFAULT_QUEUE_CAPACITY: usize = 65_536;

pub(crate) type ReconnectCallback = Arc<dyn Fn(&ReconnectEvent) + Send + Sync>;
pub(crate) type GapCallback = Arc<dyn Fn(&GapEvent) + Send + Sync>;

/// Telemetry identity and enablement. The counters themselves are always
/// maintained; this only describes the reporting identity for exporters
/// layered on top.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub metrics_enabled: bool,
    pub metrics_interval: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "kraken-stream".into(),
            service_version: env!("CARGO_PKG_VERSION").into(),
            environment: "production".into(),
            metrics_enabled: true,
            metrics_interval: Duration::from_secs(15),
        }
    }
}

/// Token-bucket settings for outbound control frames.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub burst: usize,
}

/// Complete client configuration. Construct via [`ClientConfig::builder`].
pub struct ClientConfig {
    pub(crate) url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) api_secret: Option<String>,
    pub(crate) ws_token: Option<String>,
    pub(crate) queue_capacity: usize,
    pub(crate) validate_checksums: bool,
    pub(crate) use_queue: bool,
    pub(crate) offline_mode: bool,
    pub(crate) gap: GapConfig,
    pub(crate) connect_timeout: Duration,
    pub(crate) rate_limit: Option<RateLimitConfig>,
    pub(crate) breaker: CircuitBreakerConfig,
    pub(crate) telemetry: TelemetryConfig,
    pub(crate) backoff: Option<Box<dyn BackoffStrategy + Send>>,
    pub(crate) on_reconnect: Option<ReconnectCallback>,
    pub(crate) on_gap: Option<GapCallback>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.into(),
            api_key: None,
            api_secret: None,
            ws_token: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            validate_checksums: true,
            use_queue: true,
            offline_mode: false,
            gap: GapConfig::default(),
            connect_timeout: Duration::from_secs(10),
            rate_limit: None,
            breaker: CircuitBreakerConfig::default(),
            telemetry: TelemetryConfig::default(),
            backoff: None,
            on_reconnect: None,
            on_gap: None,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn api_secret(&self) -> Option<&str> {
        self.api_secret.as_deref()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn validate_checksums(&self) -> bool {
        self.validate_checksums
    }

    pub fn is_authenticated(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }

    pub fn offline_mode(&self) -> bool {
        self.offline_mode
    }

    pub fn use_queue(&self) -> bool {
        self.use_queue
    }

    pub fn telemetry(&self) -> &TelemetryConfig {
        &self.telemetry
    }

    /// Token sent with private subscribes. An explicitly provisioned
    /// WebSocket token wins; otherwise the API secret stands in (token
    /// acquisition over REST is outside this crate).
    pub(crate) fn auth_token(&self) -> Option<String> {
        self.ws_token.clone().or_else(|| self.api_secret.clone())
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("authenticated", &self.is_authenticated())
            .field("queue_capacity", &self.queue_capacity)
            .field("validate_checksums", &self.validate_checksums)
            .field("use_queue", &self.use_queue)
            .field("offline_mode", &self.offline_mode)
            .field("gap", &self.gap)
            .field("connect_timeout", &self.connect_timeout)
            .field("rate_limit", &self.rate_limit)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn api_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.api_secret = Some(secret.into());
        self
    }

    /// Pre-provisioned WebSocket token for private channels.
    pub fn ws_token(mut self, token: impl Into<String>) -> Self {
        self.config.ws_token = Some(token.into());
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn validate_checksums(mut self, validate: bool) -> Self {
        self.config.validate_checksums = validate;
        self
    }

    pub fn backoff(mut self, strategy: Box<dyn BackoffStrategy + Send>) -> Self {
        self.config.backoff = Some(strategy);
        self
    }

    pub fn circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.config.breaker = breaker;
        self
    }

    pub fn on_reconnect(
        mut self,
        callback: impl Fn(&ReconnectEvent) + Send + Sync + 'static,
    ) -> Self {
        self.config.on_reconnect = Some(Arc::new(callback));
        self
    }

    pub fn gap_detection(mut self, enabled: bool) -> Self {
        self.config.gap.enabled = enabled;
        self
    }

    pub fn gap_tolerance(mut self, tolerance: u64) -> Self {
        self.config.gap.tolerance = tolerance;
        self
    }

    pub fn on_gap(mut self, callback: impl Fn(&GapEvent) + Send + Sync + 'static) -> Self {
        self.config.on_gap = Some(Arc::new(callback));
        self
    }

    pub fn telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.config.telemetry = telemetry;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn rate_limiting(mut self, requests_per_second: f64, burst: usize) -> Self {
        self.config.rate_limit = Some(RateLimitConfig {
            requests_per_second,
            burst,
        });
        self
    }

    /// Disable the reader -> dispatcher queue and dispatch inline. For
    /// offline replay tests.
    pub fn use_queue(mut self, enabled: bool) -> Self {
        self.config.use_queue = enabled;
        self
    }

    /// Do not start the reader thread; messages come from the replay
    /// injector instead.
    pub fn offline_mode(mut self, enabled: bool) -> Self {
        self.config.offline_mode = enabled;
        self
    }

    pub fn build(self) -> Result<ClientConfig, KrakenError> {
        if self.config.queue_capacity == 0 {
            return Err(KrakenError::InvalidArgument(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if !self.config.url.starts_with("wss://") && !self.config.url.starts_with("ws://") {
            return Err(KrakenError::InvalidArgument(format!(
                "url must be a ws:// or wss:// endpoint: {}",
                self.config.url
            )));
        }
        if let Some(limit) = &self.config.rate_limit {
            if limit.requests_per_second <= 0.0 || limit.burst == 0 {
                return Err(KrakenError::InvalidArgument(
                    "rate limit needs a positive rate and burst".into(),
                ));
            }
        }
        Ok(self.config)
    }
}
