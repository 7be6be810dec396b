//! Health check declarations
//!
//! A health check is stage metadata handed to the container runtime. The
//! runtime runs the test every `interval`, gives up on one attempt after
//! `timeout`, ignores failures during `start_period` and marks the container
//! unhealthy after `retries` consecutive failures.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use super::errors::ValidationError;
use super::instruction::CommandForm;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;

/// Default probe interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
/// Default per-attempt timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default grace period after container start
pub const DEFAULT_START_PERIOD: Duration = Duration::from_secs(5);
/// Default number of consecutive failures before unhealthy
pub const DEFAULT_RETRIES: u32 = 3;

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s'"|;&]+"#).expect("static regex"));

/// Health check for a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Probe command; `None` disables a health check inherited from the parent
    pub test: Option<CommandForm>,

    /// Time between probes
    #[serde(with = "duration_str", default = "default_interval")]
    pub interval: Duration,

    /// Time allowed for a single probe
    #[serde(with = "duration_str", default = "default_timeout")]
    pub timeout: Duration,

    /// Grace period during which failures are not counted
    #[serde(with = "duration_str", default = "default_start_period")]
    pub start_period: Duration,

    /// Consecutive failures before the container is unhealthy
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_start_period() -> Duration {
    DEFAULT_START_PERIOD
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            test: None,
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            start_period: DEFAULT_START_PERIOD,
            retries: DEFAULT_RETRIES,
        }
    }
}

impl HealthCheck {
    /// Creates a health check running `command` through the shell
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            test: Some(CommandForm::Shell(command.into())),
            ..Self::default()
        }
    }

    /// Creates a health check that fetches `url` and fails on a non-2xx answer
    pub fn http(url: impl AsRef<str>) -> Self {
        Self::shell(format!("curl -f {} || exit 1", url.as_ref()))
    }

    /// Creates a `HEALTHCHECK NONE` declaration
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Sets the probe interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the start period
    pub fn with_start_period(mut self, start_period: Duration) -> Self {
        self.start_period = start_period;
        self
    }

    /// Sets the retry count
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Returns true for `HEALTHCHECK NONE`
    pub fn is_disabled(&self) -> bool {
        self.test.is_none()
    }

    /// Returns the first HTTP(S) URL mentioned by the probe command
    pub fn endpoint(&self) -> Option<String> {
        let text = match self.test.as_ref()? {
            CommandForm::Shell(command) => command.clone(),
            CommandForm::Exec(args) => args.join(" "),
        };
        URL_PATTERN.find(&text).map(|m| m.as_str().to_string())
    }
}

impl super::Validate for HealthCheck {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        let Some(test) = &self.test else {
            return Ok(());
        };
        if test.is_empty() {
            return Err(ValidationError::InvalidHealthCheck(
                "probe command cannot be empty".to_string(),
            ));
        }
        if self.interval.is_zero() {
            return Err(ValidationError::InvalidHealthCheck(
                "interval must be positive".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ValidationError::InvalidHealthCheck(
                "timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Formats a duration the way Docker flags expect it (`1m30s`, `500ms`)
pub fn format_duration(duration: Duration) -> String {
    let mut millis = duration.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for (unit, size) in [("h", 3_600_000u128), ("m", 60_000), ("s", 1_000), ("ms", 1)] {
        if millis >= size {
            let _ = write!(out, "{}{unit}", millis / size);
            millis %= size;
        }
    }
    out
}

/// Parses a Docker duration flag value (`30s`, `1m30s`, `1.5s`, `250ms`)
///
/// # Errors
///
/// Returns a message when the text is not a sequence of number/unit pairs.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_ms = 0f64;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration '{text}'"))?;
        if number_len == 0 {
            return Err(format!("invalid duration '{text}'"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid number in duration '{text}'"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let factor = match &rest[..unit_len] {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            other => return Err(format!("unknown duration unit '{other}' in '{text}'")),
        };
        rest = &rest[unit_len..];
        total_ms += value * factor;
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(Duration::from_millis(total_ms.round() as u64))
}

/// Serde adapter storing durations as Docker duration strings
pub mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serializes a duration as a string
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*value))
    }

    /// Deserializes a duration from a string
    ///
    /// # Errors
    ///
    /// Fails when the string is not a valid duration.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::super::Validate;
    use super::*;

    #[test]
    fn test_http_health_check_defaults() {
        let check = HealthCheck::http("http://localhost:3000/health");
        assert_eq!(check.interval, Duration::from_secs(30));
        assert_eq!(check.timeout, Duration::from_secs(10));
        assert_eq!(check.start_period, Duration::from_secs(5));
        assert_eq!(check.retries, 3);
        assert_eq!(
            check.endpoint().as_deref(),
            Some("http://localhost:3000/health")
        );
    }

    #[test]
    fn test_endpoint_from_exec_form() {
        let check = HealthCheck {
            test: Some(CommandForm::Exec(vec![
                "wget".to_string(),
                "-qO-".to_string(),
                "https://127.0.0.1:8443/ready".to_string(),
            ])),
            ..HealthCheck::default()
        };
        assert_eq!(
            check.endpoint().as_deref(),
            Some("https://127.0.0.1:8443/ready")
        );
    }

    #[test]
    fn test_disabled_health_check_validates() {
        let check = HealthCheck::disabled();
        assert!(check.is_disabled());
        assert!(check.endpoint().is_none());
        assert!(check.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let check = HealthCheck::shell("true").with_interval(Duration::ZERO);
        assert!(matches!(
            check.validate(),
            Err(ValidationError::InvalidHealthCheck(_))
        ));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1s500ms");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("1.5s"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("0"), Ok(Duration::ZERO));
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_serde_durations_as_strings() {
        let check = HealthCheck::http("http://localhost:3000/health");
        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["interval"], "30s");
        assert_eq!(json["start_period"], "5s");

        let back: HealthCheck = serde_json::from_value(json).unwrap();
        assert_eq!(back, check);
    }
}
