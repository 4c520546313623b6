//! GitHub API error types.
//!
//! Errors are split into transient and permanent failures. The distinction
//! drives retry logic:
//!
//! - **Transient** errors are retriable (5xx, rate limits, network failures)
//! - **Permanent** errors are reported to the user (most 4xx)

use std::fmt;
use thiserror::Error;

/// The kind of GitHub API error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    /// Transient error - safe to retry with backoff.
    ///
    /// Examples:
    /// - HTTP 5xx (server errors)
    /// - HTTP 429 (rate limited)
    /// - HTTP 403 with rate limit headers
    /// - Network timeouts
    Transient,

    /// Permanent error - retrying will not help.
    ///
    /// Examples:
    /// - HTTP 4xx (except rate limits and specific transient messages)
    /// - PR or branch not found (404)
    /// - Validation failures (422), e.g. a PR for the branch already exists
    /// - Authentication failures (401, 403 non-rate-limit)
    Permanent,
}

impl GitHubErrorKind {
    /// Returns true if this error is retriable.
    pub fn is_retriable(&self) -> bool {
        matches!(self, GitHubErrorKind::Transient)
    }
}

/// A GitHub API error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct GitHubApiError {
    /// Whether the error is worth retrying.
    pub kind: GitHubErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,

    /// The underlying octocrab error, if available.
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for GitHubApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "GitHub API error (HTTP {}): {}", code, self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl GitHubApiError {
    /// Creates a permanent error without an octocrab source.
    pub fn permanent_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transient error without an octocrab source.
    pub fn transient_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Transient,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Categorizes an octocrab error.
    ///
    /// This function examines the error to determine if it's transient (retriable)
    /// or permanent. The categorization is based on:
    /// - HTTP status codes
    /// - Error message patterns for known GitHub API responses
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let status_code = Self::extract_status_code(&err);
        let message = err.to_string();

        // Check for specific transient messages first
        if is_transient_message(&message) {
            return Self {
                kind: GitHubErrorKind::Transient,
                status_code,
                message,
                source: Some(err),
            };
        }

        Self {
            kind: kind_for(status_code, &message),
            status_code,
            message,
            source: Some(err),
        }
    }

    /// Categorizes a raw HTTP failure that octocrab did not turn into an error
    /// (responses read through `_get_with_headers`).
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: kind_for(Some(status_code), &message),
            status_code: Some(status_code),
            message,
            source: None,
        }
    }

    /// Returns true if GitHub answered 404.
    pub fn is_not_found(&self) -> bool {
        self.status_code == Some(404)
    }

    /// Extracts the HTTP status code from an octocrab error, if present.
    ///
    /// # Implementation Note
    ///
    /// This uses string parsing which is inherently fragile and may break if
    /// octocrab changes its error message format. However, this is a pragmatic
    /// choice because:
    ///
    /// 1. octocrab's `Error` type doesn't expose a stable API for extracting
    ///    HTTP status codes across all error variants
    /// 2. The fallback behavior (returning `None`) is safe: it results in
    ///    conservative error categorization via `from_octocrab`
    /// 3. The patterns matched are well-established HTTP error conventions
    ///    (e.g., "404" with "not found") that are unlikely to change
    ///
    /// If octocrab adds a proper status code accessor in the future, this
    /// function should be updated to use it.
    fn extract_status_code(err: &octocrab::Error) -> Option<u16> {
        let err_str = err.to_string();

        // Try to extract status code from common error message patterns
        // octocrab formats errors like "GitHub API returned error 404"
        // or includes "status code: 404" in messages
        if let Some(idx) = err_str.find("status: ") {
            let rest = &err_str[idx + 8..];
            if let Some(end) = rest.find(|c: char| !c.is_ascii_digit()) {
                if let Ok(code) = rest[..end].parse() {
                    return Some(code);
                }
            } else if let Ok(code) = rest.trim().parse() {
                return Some(code);
            }
        }

        // Another common pattern
        if err_str.contains("404") && err_str.to_lowercase().contains("not found") {
            return Some(404);
        }
        if err_str.contains("409") && err_str.to_lowercase().contains("conflict") {
            return Some(409);
        }
        if err_str.contains("422") {
            return Some(422);
        }
        if err_str.contains("403") {
            return Some(403);
        }
        if err_str.contains("401") {
            return Some(401);
        }
        if err_str.contains("429") {
            return Some(429);
        }
        if err_str.contains("500") {
            return Some(500);
        }
        if err_str.contains("502") {
            return Some(502);
        }
        if err_str.contains("503") {
            return Some(503);
        }

        None
    }
}

fn kind_for(status_code: Option<u16>, message: &str) -> GitHubErrorKind {
    match status_code {
        Some(429) => GitHubErrorKind::Transient,
        Some(403) if is_rate_limit_error(message) => GitHubErrorKind::Transient,
        Some(code) if (500..600).contains(&code) => GitHubErrorKind::Transient,
        Some(_) => GitHubErrorKind::Permanent,
        None if is_network_error(message) => GitHubErrorKind::Transient,
        None => GitHubErrorKind::Permanent,
    }
}

/// Checks if an error message indicates a transient condition.
///
/// These messages indicate GitHub API quirks that resolve with retries:
/// - Git data not yet replicated right after a push or PR creation
/// - Generic "try again" suggestions
fn is_transient_message(message: &str) -> bool {
    let message_lower = message.to_lowercase();

    // A freshly pushed branch can briefly be unknown to the PR endpoint.
    if message_lower.contains("reference does not exist") {
        return true;
    }

    message_lower.contains("try again")
}

/// Checks if an error message indicates a rate limit.
fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}

/// Checks if an error message indicates a network-level error.
fn is_network_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("timeout")
        || message_lower.contains("connection")
        || message_lower.contains("network")
        || message_lower.contains("dns")
        || message_lower.contains("timed out")
}
