//! Shared HTTP plumbing: client construction, error classification and the
//! retry policy every outbound client uses.

use std::time::Duration;

use backon::ExponentialBuilder;
use reqwest::{Client, Response, StatusCode};

use super::config::RetryConfig;

/// Transient failures are worth retrying; permanent ones are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

impl ErrorClass {
    /// 408, 425, 429 and every 5xx (including Anthropic's 529 "overloaded")
    /// are transient.
    pub fn from_status(status: u16) -> Self {
        match status {
            408 | 425 | 429 => ErrorClass::Transient,
            500..=599 => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }

    /// Timeouts and connection failures are transient; anything else reqwest
    /// reports (bad URL, body decode) is not.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16());
        }
        if err.is_timeout() || err.is_connect() || err.is_request() {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

/// Build a reqwest client with an explicit request timeout.
pub fn build_client(timeout_secs: u64) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
}

/// Exponential backoff with jitter, bounded by the configured attempt count.
pub fn backoff(retry: &RetryConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(retry.min_delay_ms))
        .with_max_delay(Duration::from_millis(retry.max_delay_ms.max(retry.min_delay_ms)))
        .with_max_times(retry.max_times)
        .with_jitter()
}

/// Drain a failed response into `(status, body)` for error messages.
pub async fn failure_parts(response: Response) -> (StatusCode, String) {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    (status, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ErrorClass::from_status(429), ErrorClass::Transient);
        assert_eq!(ErrorClass::from_status(500), ErrorClass::Transient);
        assert_eq!(ErrorClass::from_status(503), ErrorClass::Transient);
        assert_eq!(ErrorClass::from_status(529), ErrorClass::Transient);
        assert_eq!(ErrorClass::from_status(408), ErrorClass::Transient);
        assert_eq!(ErrorClass::from_status(400), ErrorClass::Permanent);
        assert_eq!(ErrorClass::from_status(401), ErrorClass::Permanent);
        assert_eq!(ErrorClass::from_status(404), ErrorClass::Permanent);
        assert_eq!(ErrorClass::from_status(422), ErrorClass::Permanent);
    }

    #[test]
    fn test_build_client_with_zero_timeout() {
        assert!(build_client(0).is_ok());
    }
}
