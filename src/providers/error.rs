use std::fmt;

/// Classified upstream error: tells the aggregator why a provider call
/// failed so it can pick the right recovery strategy (fallback search, retry
/// without reviews, degrade to cache). Full detail stays internal; end users
/// only ever see a generic apology.
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// 401/403: bad API key or permissions.
    Auth,
    /// 400 or provider INVALID_REQUEST: the request itself was malformed.
    /// Drives the retry-without-reviews path on detail fetches.
    InvalidRequest,
    /// 429 or provider OVER_QUERY_LIMIT.
    RateLimit,
    /// 408 / request timeout.
    Timeout,
    /// Connection refused, DNS failure, reset, etc.
    Network,
    /// 500/502/503/504: provider-side outage.
    ServerError,
    /// Anything else.
    Unknown,
}

impl ProviderError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            400 => ProviderErrorKind::InvalidRequest,
            401 | 403 => ProviderErrorKind::Auth,
            408 => ProviderErrorKind::Timeout,
            429 => ProviderErrorKind::RateLimit,
            500 | 502 | 503 | 504 => ProviderErrorKind::ServerError,
            _ => ProviderErrorKind::Unknown,
        };
        Self {
            kind,
            status: Some(status),
            message: truncate_body(body),
        }
    }

    /// Map a Places-style textual status ("REQUEST_DENIED", "INVALID_REQUEST",
    /// "OVER_QUERY_LIMIT", ...) onto a classified kind. "OK"/"ZERO_RESULTS"
    /// never reach here; adapters turn those into results or empty vectors.
    pub fn from_provider_status(status: &str, message: Option<&str>) -> Self {
        let kind = match status {
            "INVALID_REQUEST" | "NOT_FOUND" => ProviderErrorKind::InvalidRequest,
            "REQUEST_DENIED" => ProviderErrorKind::Auth,
            "OVER_QUERY_LIMIT" => ProviderErrorKind::RateLimit,
            "UNKNOWN_ERROR" => ProviderErrorKind::ServerError,
            _ => ProviderErrorKind::Unknown,
        };
        Self {
            kind,
            status: None,
            message: format!("{}: {}", status, message.unwrap_or("")),
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else {
            ProviderErrorKind::Network
        };
        Self {
            kind,
            status: None,
            message: err.to_string(),
        }
    }
}

fn truncate_body(body: &str) -> String {
    let mut out: String = body.chars().take(300).collect();
    if out.len() < body.len() {
        out.push_str("...");
    }
    out
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{:?} (HTTP {}): {}", self.kind, status, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ProviderError {}
