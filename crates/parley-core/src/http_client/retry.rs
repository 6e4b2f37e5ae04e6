//! Retry policies for transient HTTP failures.
//!
//! [`RetryConfig`] is the configurable policy used by every provider: it classifies an
//! [`Error`] as transient or not from its status code, and computes an exponential backoff
//! between attempts.

use std::time::Duration;

use futures_timer::Delay;
use http::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{Error, HttpClientExt, LazyBody};

/// Decides whether (and when) a failed request is retried.
pub trait RetryPolicy {
    /// Returns the delay before the next attempt, or `None` to give up.
    /// `last_retry` holds the number of retries already performed and the last delay used.
    fn retry(&self, error: &Error, last_retry: Option<(usize, Duration)>) -> Option<Duration>;

    /// Set a new reconnection time if one is received from the server (SSE `retry:` field).
    fn set_reconnection_time(&mut self, duration: Duration);
}

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
}

impl Backoff {
    pub const fn new(initial_interval: Duration, multiplier: f64, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            multiplier,
            max_interval,
        }
    }

    fn next(&self, last: Option<Duration>) -> Duration {
        match last {
            None => self.initial_interval.min(self.max_interval),
            // A negative, NaN or overflowing product falls back to the cap.
            Some(last) => Duration::try_from_secs_f64(last.as_secs_f64() * self.multiplier)
                .map_or(self.max_interval, |next| next.min(self.max_interval)),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        DEFAULT_RETRY.backoff
    }
}

/// Retry configuration.
///
/// A status is retried when it is listed in `on_http_codes`. Otherwise client errors (4xx)
/// are not retried unless `on_client_errors` is set, statuses listed in `exclude_on_http_codes`
/// are never retried, and everything else (5xx) is. Transport failures are always transient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, the first one included.
    pub max_attempts: usize,
    pub backoff: Backoff,
    pub on_client_errors: bool,
    pub exclude_on_http_codes: Vec<u16>,
    pub on_http_codes: Vec<u16>,
}

pub const DEFAULT_RETRY: RetryConfig = RetryConfig {
    max_attempts: 10,
    backoff: Backoff::new(Duration::from_secs(2), 5.0, Duration::from_secs(180)),
    on_client_errors: false,
    exclude_on_http_codes: Vec::new(),
    on_http_codes: Vec::new(),
};

impl Default for RetryConfig {
    fn default() -> Self {
        DEFAULT_RETRY
    }
}

/// Whether a failure may succeed if the request is sent again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    Transient,
    NonTransient,
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..DEFAULT_RETRY
        }
    }

    /// Reads overrides from `PARLEY_RETRY_MAX_ATTEMPTS`, `PARLEY_RETRY_ON_HTTP_CODES` and
    /// `PARLEY_RETRY_EXCLUDE_ON_HTTP_CODES` (comma separated status codes) on top of the defaults.
    pub fn from_env() -> Result<Self, RetryConfigError> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("PARLEY_RETRY_MAX_ATTEMPTS") {
            config.max_attempts = value
                .trim()
                .parse()
                .map_err(|_| RetryConfigError::InvalidValue("PARLEY_RETRY_MAX_ATTEMPTS", value))?;
        }
        if let Ok(value) = std::env::var("PARLEY_RETRY_ON_HTTP_CODES") {
            config.on_http_codes = parse_status_codes("PARLEY_RETRY_ON_HTTP_CODES", &value)?;
        }
        if let Ok(value) = std::env::var("PARLEY_RETRY_EXCLUDE_ON_HTTP_CODES") {
            config.exclude_on_http_codes =
                parse_status_codes("PARLEY_RETRY_EXCLUDE_ON_HTTP_CODES", &value)?;
        }

        Ok(config)
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn on_client_errors(mut self, on_client_errors: bool) -> Self {
        self.on_client_errors = on_client_errors;
        self
    }

    pub fn on_http_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.on_http_codes = codes.into_iter().collect();
        self
    }

    pub fn exclude_on_http_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.exclude_on_http_codes = codes.into_iter().collect();
        self
    }

    pub fn classify_status(&self, status: StatusCode) -> Retryability {
        let code = status.as_u16();

        if self.on_http_codes.contains(&code) {
            return Retryability::Transient;
        }

        if (!self.on_client_errors && status.is_client_error())
            || self.exclude_on_http_codes.contains(&code)
        {
            return Retryability::NonTransient;
        }

        Retryability::Transient
    }

    pub fn classify(&self, error: &Error) -> Retryability {
        if let Some(status) = error.status() {
            return self.classify_status(status);
        }

        match error {
            Error::Instance(_) => Retryability::Transient,
            _ => Retryability::NonTransient,
        }
    }
}

impl RetryPolicy for RetryConfig {
    fn retry(&self, error: &Error, last_retry: Option<(usize, Duration)>) -> Option<Duration> {
        if self.classify(error) == Retryability::NonTransient {
            return None;
        }

        let retries_done = last_retry.map(|(count, _)| count).unwrap_or(0);
        if retries_done + 1 >= self.max_attempts {
            return None;
        }

        Some(self.backoff.next(last_retry.map(|(_, delay)| delay)))
    }

    fn set_reconnection_time(&mut self, duration: Duration) {
        self.backoff.initial_interval = duration;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryConfigError {
    #[error("Invalid value for `{0}`: {1}")]
    InvalidValue(&'static str, String),
}

fn parse_status_codes(variable: &'static str, value: &str) -> Result<Vec<u16>, RetryConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(|code| {
            code.parse::<u16>()
                .ok()
                .filter(|code| StatusCode::from_u16(*code).is_ok())
                .ok_or_else(|| RetryConfigError::InvalidValue(variable, value.to_string()))
        })
        .collect()
}

/// Sends `req`, retrying transient failures according to `policy`.
///
/// The last error is returned unchanged once the policy gives up, so the upstream status is
/// preserved for the caller.
pub async fn send_with_retry<C, P>(
    client: &C,
    req: Request<Vec<u8>>,
    policy: &P,
) -> super::Result<Response<LazyBody<Vec<u8>>>>
where
    C: HttpClientExt + ?Sized,
    P: RetryPolicy + ?Sized,
{
    let mut last_retry: Option<(usize, Duration)> = None;

    loop {
        match client.send(req.clone()).await {
            Ok(response) => return Ok(response),
            Err(error) => {
                let Some(delay) = policy.retry(&error, last_retry) else {
                    return Err(error);
                };

                let attempt = last_retry.map(|(count, _)| count).unwrap_or(0) + 1;
                tracing::warn!(
                    target: "parley::completions",
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "Retrying request after transient failure"
                );

                Delay::new(delay).await;
                last_retry = Some((attempt, delay));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(code: u16) -> Error {
        Error::InvalidStatusCodeWithMessage(
            StatusCode::from_u16(code).expect("valid status"),
            "upstream said no".to_string(),
        )
    }

    #[test]
    fn server_errors_are_transient_by_default() {
        let config = RetryConfig::default();
        assert_eq!(
            config.classify(&status_error(503)),
            Retryability::Transient
        );
        assert_eq!(
            config.classify(&status_error(500)),
            Retryability::Transient
        );
    }

    #[test]
    fn client_errors_are_not_retried_by_default() {
        let config = RetryConfig::default();
        assert_eq!(
            config.classify(&status_error(400)),
            Retryability::NonTransient
        );
        assert_eq!(
            config.classify(&status_error(429)),
            Retryability::NonTransient
        );
    }

    #[test]
    fn on_http_codes_take_precedence() {
        let config = RetryConfig::default()
            .on_http_codes([429])
            .exclude_on_http_codes([429, 503]);
        assert_eq!(
            config.classify(&status_error(429)),
            Retryability::Transient
        );
        assert_eq!(
            config.classify(&status_error(503)),
            Retryability::NonTransient
        );
    }

    #[test]
    fn on_client_errors_retries_4xx() {
        let config = RetryConfig::default().on_client_errors(true);
        assert_eq!(
            config.classify(&status_error(409)),
            Retryability::Transient
        );
    }

    #[test]
    fn non_status_errors() {
        let config = RetryConfig::default();
        assert_eq!(
            config.classify(&Error::StreamEnded),
            Retryability::NonTransient
        );
        let transport = Error::Instance("connection reset".into());
        assert_eq!(config.classify(&transport), Retryability::Transient);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let config = RetryConfig::default().backoff(Backoff::new(
            Duration::from_millis(100),
            3.0,
            Duration::from_millis(500),
        ));
        let error = status_error(503);

        let first = config.retry(&error, None);
        assert_eq!(first, Some(Duration::from_millis(100)));

        let second = config.retry(&error, Some((1, Duration::from_millis(100))));
        assert_eq!(second, Some(Duration::from_millis(300)));

        let third = config.retry(&error, Some((2, Duration::from_millis(300))));
        assert_eq!(third, Some(Duration::from_millis(500)));
    }

    #[test]
    fn invalid_multiplier_falls_back_to_max_interval() {
        let config: RetryConfig = serde_json::from_value(serde_json::json!({
            "backoff": {
                "initial_interval": {"secs": 1, "nanos": 0},
                "multiplier": -2.0,
                "max_interval": {"secs": 30, "nanos": 0}
            }
        }))
        .expect("config should deserialize");
        let error = status_error(503);

        assert_eq!(config.retry(&error, None), Some(Duration::from_secs(1)));
        assert_eq!(
            config.retry(&error, Some((1, Duration::from_secs(1)))),
            Some(Duration::from_secs(30))
        );

        let overflowing = config.backoff(Backoff::new(
            Duration::from_secs(1),
            f64::MAX,
            Duration::from_secs(30),
        ));
        assert_eq!(
            overflowing.retry(&error, Some((1, Duration::from_secs(60)))),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let config = RetryConfig::default().max_attempts(3);
        let error = status_error(503);

        assert!(config.retry(&error, None).is_some());
        assert!(config.retry(&error, Some((1, Duration::from_secs(2)))).is_some());
        assert!(config.retry(&error, Some((2, Duration::from_secs(10)))).is_none());
    }

    #[test]
    fn none_never_retries() {
        assert!(RetryConfig::none().retry(&status_error(503), None).is_none());
    }

    #[test]
    fn parses_status_code_lists() {
        assert_eq!(
            parse_status_codes("X", "429, 503,,").expect("valid codes"),
            vec![429, 503]
        );
        assert!(parse_status_codes("X", "429,nope").is_err());
        assert!(parse_status_codes("X", "42").is_err());
    }

    #[test]
    fn deserializes_partial_config() {
        let config: RetryConfig =
            serde_json::from_value(serde_json::json!({ "on_http_codes": [429] }))
                .expect("config should deserialize");
        assert_eq!(config.on_http_codes, vec![429]);
        assert_eq!(config.max_attempts, DEFAULT_RETRY.max_attempts);
    }
}
