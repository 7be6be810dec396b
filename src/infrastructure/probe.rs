//! HTTP health probing
//!
//! Polls an endpoint with the container-runtime health check policy:
//! an attempt is healthy on a 2xx answer within the timeout, failures inside
//! the start period are not counted, and `retries` consecutive counted
//! failures make the target unhealthy.

use crate::manifest::HealthCheck;
use crate::manifest::healthcheck::{
    DEFAULT_INTERVAL, DEFAULT_RETRIES, DEFAULT_START_PERIOD, DEFAULT_TIMEOUT,
};
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// Errors while setting up a probe
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The endpoint is not an absolute HTTP(S) URL
    #[error("Invalid probe URL '{url}': {reason}")]
    InvalidUrl {
        /// Rejected URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// The HTTP client could not be created
    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Timing policy of a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    /// Time between attempts
    pub interval: Duration,
    /// Time allowed for one attempt
    pub timeout: Duration,
    /// Consecutive counted failures before unhealthy
    pub retries: u32,
    /// Grace period in which failures are not counted
    pub start_period: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            start_period: DEFAULT_START_PERIOD,
        }
    }
}

impl From<&HealthCheck> for ProbePolicy {
    fn from(check: &HealthCheck) -> Self {
        Self {
            interval: check.interval,
            timeout: check.timeout,
            retries: check.retries,
            start_period: check.start_period,
        }
    }
}

/// Final verdict of a probe run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    /// An attempt succeeded
    Healthy,
    /// Too many consecutive failures
    Unhealthy,
}

/// One request against the endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeAttempt {
    /// HTTP status, if an answer arrived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Transport error or timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether this failure counted toward `retries`
    pub counted: bool,
    /// Time since the probe started
    pub at_ms: u64,
}

impl ProbeAttempt {
    /// Returns true for a 2xx answer
    pub fn is_success(&self) -> bool {
        self.status.is_some_and(|status| (200..300).contains(&status))
    }
}

/// Outcome of [`HealthProbe::run`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    /// Probed URL
    pub url: String,
    /// Verdict
    pub status: ProbeStatus,
    /// Every attempt made
    pub attempts: Vec<ProbeAttempt>,
}

impl ProbeReport {
    /// Returns true if the endpoint became healthy
    pub fn is_healthy(&self) -> bool {
        self.status == ProbeStatus::Healthy
    }
}

/// Polls an HTTP endpoint until it is healthy or out of retries
#[derive(Debug, Clone)]
pub struct HealthProbe {
    url: Url,
    policy: ProbePolicy,
}

impl HealthProbe {
    /// Creates a probe for `url` with the default policy
    ///
    /// # Errors
    ///
    /// Fails unless `url` is an absolute `http` or `https` URL.
    pub fn new(url: &str) -> Result<Self, ProbeError> {
        let parsed = Url::parse(url).map_err(|e| ProbeError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProbeError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        Ok(Self {
            url: parsed,
            policy: ProbePolicy::default(),
        })
    }

    /// Creates a probe from a stage health check that fetches a URL
    ///
    /// Returns `Ok(None)` when the check names no HTTP endpoint.
    ///
    /// # Errors
    ///
    /// Fails when the endpoint found in the check is not a valid URL.
    pub fn from_healthcheck(check: &HealthCheck) -> Result<Option<Self>, ProbeError> {
        let Some(endpoint) = check.endpoint() else {
            return Ok(None);
        };
        Ok(Some(Self::new(&endpoint)?.with_policy(ProbePolicy::from(check))))
    }

    /// Replaces the timing policy
    #[must_use]
    pub fn with_policy(mut self, policy: ProbePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Probed URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Timing policy
    pub fn policy(&self) -> ProbePolicy {
        self.policy
    }

    /// Polls until healthy or `retries` consecutive counted failures
    ///
    /// The first attempt is made immediately, later ones every `interval`.
    ///
    /// # Errors
    ///
    /// Fails only when the HTTP client cannot be built.
    pub async fn run(&self) -> Result<ProbeReport, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(self.policy.timeout)
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;

        let started = Instant::now();
        let retries = self.policy.retries.max(1);
        let mut consecutive = 0;
        let mut attempts = Vec::new();

        loop {
            let mut attempt = self.attempt(&client, started).await;

            if attempt.is_success() {
                tracing::info!(url = %self.url, attempts = attempts.len() + 1, "Endpoint healthy");
                attempts.push(attempt);
                return Ok(self.report(ProbeStatus::Healthy, attempts));
            }

            attempt.counted = started.elapsed() >= self.policy.start_period;
            if attempt.counted {
                consecutive += 1;
            }
            tracing::debug!(
                url = %self.url,
                status = ?attempt.status,
                error = ?attempt.error,
                counted = attempt.counted,
                consecutive,
                "Probe attempt failed"
            );
            attempts.push(attempt);

            if consecutive >= retries {
                tracing::warn!(url = %self.url, consecutive, "Endpoint unhealthy");
                return Ok(self.report(ProbeStatus::Unhealthy, attempts));
            }

            tokio::time::sleep(self.policy.interval).await;
        }
    }

    async fn attempt(&self, client: &reqwest::Client, started: Instant) -> ProbeAttempt {
        let response = client.get(self.url.clone()).send().await;
        #[allow(clippy::cast_possible_truncation)]
        let at_ms = started.elapsed().as_millis() as u64;

        match response {
            Ok(response) => ProbeAttempt {
                status: Some(response.status().as_u16()),
                error: None,
                counted: false,
                at_ms,
            },
            Err(e) => ProbeAttempt {
                status: None,
                error: Some(if e.is_timeout() {
                    format!("timed out after {:?}", self.policy.timeout)
                } else {
                    e.to_string()
                }),
                counted: false,
                at_ms,
            },
        }
    }

    fn report(&self, status: ProbeStatus, attempts: Vec<ProbeAttempt>) -> ProbeReport {
        ProbeReport {
            url: self.url.to_string(),
            status,
            attempts,
        }
    }
}
