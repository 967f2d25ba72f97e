//! Configuration for the gateway → service → storage/worker pipeline.

use std::net::SocketAddr;
use std::time::Duration;

use crate::Error;

/// Environment variable prefix read by [`PipelineConfig::from_env`].
pub const ENV_PREFIX: &str = "TRACEMUX_";

/// Addresses and knobs for the demo pipeline.
///
/// ## Environment
///
/// | Variable                        | Default          |
/// |---------------------------------|------------------|
/// | `TRACEMUX_GATEWAY_ADDR`         | `127.0.0.1:8080` |
/// | `TRACEMUX_SERVICE_ADDR`         | `127.0.0.1:8081` |
/// | `TRACEMUX_STORAGE_ADDR`         | `127.0.0.1:8082` |
/// | `TRACEMUX_QUEUE_CHANNEL`        | `job-queue`      |
/// | `TRACEMUX_REQUEST_TIMEOUT_MS`   | `5000`           |
/// | `TRACEMUX_INJECT_FAILURE`       | `false`          |
///
/// ## Example
///
/// ```rust
/// use tracemux::config::PipelineConfig;
///
/// let config = PipelineConfig::from_env_with(|key| match key {
///     "TRACEMUX_QUEUE_CHANNEL" => Some("jobs".to_string()),
///     _ => None,
/// })
/// .unwrap();
///
/// assert_eq!(config.queue_channel, "jobs");
/// ```
#[derive(Debug, Clone, bon::Builder)]
pub struct PipelineConfig {
    /// Listen address of the gateway.
    #[builder(default = SocketAddr::from(([127, 0, 0, 1], 8080)))]
    pub gateway_addr: SocketAddr,

    /// Listen address of the service.
    #[builder(default = SocketAddr::from(([127, 0, 0, 1], 8081)))]
    pub service_addr: SocketAddr,

    /// Listen address of the storage node (gRPC and REST on one port).
    #[builder(default = SocketAddr::from(([127, 0, 0, 1], 8082)))]
    pub storage_addr: SocketAddr,

    /// Queue channel the service publishes jobs on and the worker consumes.
    #[builder(into, default = "job-queue".to_string())]
    pub queue_channel: String,

    /// Bound on outbound calls and queue request/reply.
    #[builder(default = Duration::from_secs(5))]
    pub request_timeout: Duration,

    /// Makes the service run its failing operation on every request.
    #[builder(default)]
    pub inject_failure: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PipelineConfig {
    /// Loads the configuration from `TRACEMUX_*` environment variables.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through an arbitrary variable lookup.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(v) = var("GATEWAY_ADDR") {
            config.gateway_addr = parse_addr("GATEWAY_ADDR", &v)?;
        }
        if let Some(v) = var("SERVICE_ADDR") {
            config.service_addr = parse_addr("SERVICE_ADDR", &v)?;
        }
        if let Some(v) = var("STORAGE_ADDR") {
            config.storage_addr = parse_addr("STORAGE_ADDR", &v)?;
        }
        if let Some(v) = var("QUEUE_CHANNEL") {
            config.queue_channel = v;
        }
        if let Some(v) = var("REQUEST_TIMEOUT_MS") {
            let ms: u64 = v.trim().parse().map_err(|_| {
                Error::configuration(format!(
                    "{ENV_PREFIX}REQUEST_TIMEOUT_MS: expected milliseconds, got {v:?}"
                ))
            })?;
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = var("INJECT_FAILURE") {
            config.inject_failure = parse_bool("INJECT_FAILURE", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.queue_channel.trim().is_empty() {
            return Err(Error::configuration("queue channel must not be empty"));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::configuration("request timeout must be positive"));
        }
        Ok(())
    }

    /// Sets the queue channel.
    #[must_use]
    pub fn with_queue_channel(mut self, channel: impl Into<String>) -> Self {
        self.queue_channel = channel.into();
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enables or disables the failing operation.
    #[must_use]
    pub fn with_inject_failure(mut self, inject: bool) -> Self {
        self.inject_failure = inject;
        self
    }

    /// Binds every node to an ephemeral loopback port.
    #[must_use]
    pub fn ephemeral() -> Self {
        let any = SocketAddr::from(([127, 0, 0, 1], 0));
        Self::builder()
            .gateway_addr(any)
            .service_addr(any)
            .storage_addr(any)
            .build()
    }
}

fn parse_addr(name: &str, value: &str) -> Result<SocketAddr, Error> {
    value.trim().parse().map_err(|e| {
        Error::configuration(format!("{ENV_PREFIX}{name}: invalid address {value:?}"))
            .with_source(e)
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::configuration(format!(
            "{ENV_PREFIX}{name}: expected a boolean, got {value:?}"
        ))),
    }
}
