//! Readiness gate: block until a TCP endpoint accepts connections.
//!
//! The loop is binary. Either the endpoint answers within the budget and the
//! caller proceeds, or [`GateError::Unreachable`] is returned and the caller
//! is expected to exit non-zero.
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("{endpoint} did not accept connections within {waited:?} ({attempts} attempts, last error: {last_error})")]
    Unreachable {
        endpoint: Endpoint,
        waited: Duration,
        attempts: u32,
        last_error: String,
    },
    #[error("invalid endpoint {0:?}: expected host:port")]
    InvalidEndpoint(String),
}

/// A `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GateError::InvalidEndpoint(s.to_string());
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() || host.contains(['[', ']']) {
            return Err(invalid());
        }
        let port: u16 = port.parse().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }
        Ok(Endpoint::new(host, port))
    }
}

/// How long to wait and how often to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    /// Sleep between attempts; also bounds a single connection attempt.
    pub interval: Duration,
}

impl GatePolicy {
    pub fn new(timeout: Option<Duration>, interval: Duration) -> Self {
        Self {
            timeout,
            interval: interval.max(Duration::from_millis(1)),
        }
    }
}

/// A single reachability check.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Try once. `budget` bounds how long the attempt may take.
    async fn probe(&self, endpoint: &Endpoint, budget: Duration) -> Result<(), String>;
}

/// Plain TCP connect, dropped right after the handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, endpoint: &Endpoint, budget: Duration) -> Result<(), String> {
        let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
        match tokio::time::timeout(budget, connect).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!("connect timed out after {budget:?}")),
        }
    }
}

/// Poll `endpoint` until it answers or the policy's timeout elapses.
///
/// Returns how long the wait took. A never-reachable endpoint fails no
/// earlier than `timeout` and no later than `timeout + interval`.
#[instrument(skip(probe, endpoint), fields(endpoint = %endpoint))]
pub async fn wait_until_ready(
    probe: &dyn Probe,
    endpoint: &Endpoint,
    policy: &GatePolicy,
) -> Result<Duration, GateError> {
    let start = Instant::now();
    // A timeout too large to represent as an instant never expires.
    let deadline = policy.timeout.and_then(|t| start.checked_add(t));
    let mut attempts = 0u32;

    loop {
        attempts = attempts.saturating_add(1);
        let last_error = match probe.probe(endpoint, policy.interval).await {
            Ok(()) => {
                let waited = start.elapsed();
                info!(attempts, ?waited, "endpoint is accepting connections");
                return Ok(waited);
            }
            Err(err) => err,
        };

        let now = Instant::now();
        if attempts == 1 {
            warn!(error = %last_error, timeout = ?policy.timeout, "endpoint not reachable yet; waiting");
        } else {
            debug!(attempts, error = %last_error, "endpoint still unreachable");
        }

        let pause = match deadline {
            Some(deadline) if now >= deadline => {
                return Err(GateError::Unreachable {
                    endpoint: endpoint.clone(),
                    waited: now - start,
                    attempts,
                    last_error,
                });
            }
            Some(deadline) => policy.interval.min(deadline - now),
            None => policy.interval,
        };
        tokio::time::sleep(pause).await;
    }
}
