//! Failure classification.
//!
//! Every failed Emailit API call is mapped onto a [`RetryCategory`], which in
//! turn selects the [`RetryStrategy`](crate::RetryStrategy) used to decide
//! whether and when to try again.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Classification of a failure, driving strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCategory {
    /// The request never produced a response (connection refused, reset, DNS).
    #[serde(rename = "network_error")]
    Network,
    /// The request or the API timed out.
    Timeout,
    /// The API asked us to slow down (HTTP 429).
    RateLimit,
    /// The API failed on its side (HTTP 5xx).
    ServerError,
    /// The account's sending quota is exhausted until a reset time.
    QuotaExceeded,
    /// The request itself was rejected (HTTP 4xx); sending it again won't help.
    ClientError,
    /// Anything else; handled by the default strategy.
    #[serde(other)]
    Unknown,
}

impl RetryCategory {
    pub const ALL: [Self; 7] = [
        Self::Network,
        Self::Timeout,
        Self::RateLimit,
        Self::ServerError,
        Self::QuotaExceeded,
        Self::ClientError,
        Self::Unknown,
    ];

    /// The key this category is persisted and configured under.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network_error",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::ServerError => "server_error",
            Self::QuotaExceeded => "quota_exceeded",
            Self::ClientError => "client_error",
            Self::Unknown => "unknown",
        }
    }

    /// Map an Emailit API failure onto a category.
    ///
    /// `status` is the HTTP status of the response, `None` when no response
    /// arrived at all. `code` is the `error.code` field of the API's JSON
    /// error body, if one was returned.
    #[must_use]
    pub fn classify(status: Option<u16>, code: Option<&str>) -> Self {
        let code = code.map(str::to_ascii_lowercase);
        let code_mentions = |needle: &str| code.as_deref().is_some_and(|c| c.contains(needle));

        match status {
            None if code_mentions("timeout") => Self::Timeout,
            None => Self::Network,
            Some(408) => Self::Timeout,
            Some(429) if code_mentions("quota") => Self::QuotaExceeded,
            Some(429) => Self::RateLimit,
            Some(_) if code_mentions("timeout") => Self::Timeout,
            Some(500..=599) => Self::ServerError,
            Some(400..=499) => Self::ClientError,
            Some(_) => Self::Unknown,
        }
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetryCategory {
    type Err = std::convert::Infallible;

    /// Unrecognised keys parse as [`RetryCategory::Unknown`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "network_error" | "network" => Self::Network,
            "timeout" => Self::Timeout,
            "rate_limit" => Self::RateLimit,
            "server_error" => Self::ServerError,
            "quota_exceeded" => Self::QuotaExceeded,
            "client_error" => Self::ClientError,
            _ => Self::Unknown,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_classify_by_status() {
        assert_eq!(RetryCategory::classify(None, None), RetryCategory::Network);
        assert_eq!(RetryCategory::classify(Some(408), None), RetryCategory::Timeout);
        assert_eq!(RetryCategory::classify(Some(429), None), RetryCategory::RateLimit);
        assert_eq!(RetryCategory::classify(Some(500), None), RetryCategory::ServerError);
        assert_eq!(RetryCategory::classify(Some(503), None), RetryCategory::ServerError);
        assert_eq!(RetryCategory::classify(Some(422), None), RetryCategory::ClientError);
        assert_eq!(RetryCategory::classify(Some(302), None), RetryCategory::Unknown);
    }

    #[test]
    fn test_classify_by_error_code() {
        assert_eq!(
            RetryCategory::classify(Some(429), Some("QUOTA_EXCEEDED")),
            RetryCategory::QuotaExceeded
        );
        assert_eq!(
            RetryCategory::classify(None, Some("request_timeout")),
            RetryCategory::Timeout
        );
        assert_eq!(
            RetryCategory::classify(Some(504), Some("gateway_timeout")),
            RetryCategory::Timeout
        );
    }

    #[test]
    fn test_keys_round_trip() {
        for category in RetryCategory::ALL {
            assert_eq!(category.as_str().parse::<RetryCategory>(), Ok(category));
        }

        assert_eq!("bogus".parse::<RetryCategory>(), Ok(RetryCategory::Unknown));
    }

    #[test]
    fn test_serde_uses_keys() {
        let json = serde_json::to_string(&RetryCategory::Network).unwrap_or_default();
        assert_eq!(json, "\"network_error\"");

        let parsed: RetryCategory =
            serde_json::from_str("\"something_new\"").unwrap_or(RetryCategory::Network);
        assert_eq!(parsed, RetryCategory::Unknown);
    }
}
