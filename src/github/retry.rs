//! Retry schedules for GitHub effects.
//!
//! Every effect is retried on transient failures with a doubling delay. How
//! long to keep trying depends on the effect: opening a PR waits out GitHub
//! indexing the freshly pushed branch, patch downloads of large commits are
//! slow to render, and best-effort calls are tried once.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::effects::GitHubEffect;

use super::error::GitHubApiError;

/// How often and how long to retry one effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles after each one.
    pub initial_delay: Duration,
    /// Cap on a single delay.
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Reads and ordinary writes: 2s, 4s, 8s.
    pub const STANDARD: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(16),
    };

    /// Opening a PR for a branch pushed moments ago.
    pub const PATIENT: Self = Self {
        max_retries: 10,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
    };

    /// Downloading a commit patch.
    pub const PATCH: Self = Self {
        max_retries: 5,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(8),
    };

    /// A single attempt.
    pub const ONCE: Self = Self {
        max_retries: 0,
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };

    pub fn for_effect(effect: &GitHubEffect) -> Self {
        match effect {
            GitHubEffect::CreatePr { .. } => Self::PATIENT,
            GitHubEffect::GetCommitPatch { .. } => Self::PATCH,
            // Callers log these failures and carry on.
            GitHubEffect::RemoveLabel { .. } | GitHubEffect::RequestReviewers { .. } => Self::ONCE,
            _ => Self::STANDARD,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Sum of all delays when every retry is used.
    pub fn total_max_wait(&self) -> Duration {
        (0..self.max_retries)
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }
}

/// True if `err` from `effect` is worth another attempt.
///
/// Besides transient errors, GitHub answers a patch request for a large
/// commit with "taking too long to generate" until the diff is cached.
pub fn is_retriable(effect: &GitHubEffect, err: &GitHubApiError) -> bool {
    if err.kind.is_retriable() {
        return true;
    }
    matches!(effect, GitHubEffect::GetCommitPatch { .. })
        && err.message.to_lowercase().contains("taking too long")
}

/// Runs `operation` for `effect` until it succeeds, fails for good, or the
/// effect's retries run out. The last error is returned.
pub async fn retry_with_backoff<T, F, Fut>(
    effect: &GitHubEffect,
    config: RetryConfig,
    mut operation: F,
) -> Result<T, GitHubApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GitHubApiError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_retries && is_retriable(effect, &e) => {
                let delay = config.delay_for_attempt(attempt);
                attempt += 1;
                warn!(
                    effect = effect.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying GitHub call"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PrNumber, Sha};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FAST: RetryConfig = RetryConfig {
        max_retries: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    };

    fn patch_effect() -> GitHubEffect {
        GitHubEffect::GetCommitPatch {
            sha: Sha::parse("a".repeat(40)).unwrap(),
        }
    }

    #[test]
    fn schedules_by_effect() {
        let create = GitHubEffect::CreatePr {
            title: "[8-x-y] Fix".to_string(),
            body: "Backport of #1".to_string(),
            head: "8-x-y-bp".to_string(),
            base: "8-x-y".to_string(),
        };
        let remove = GitHubEffect::RemoveLabel {
            pr: PrNumber(1),
            label: "target/8-x-y".to_string(),
        };
        assert_eq!(RetryConfig::for_effect(&create), RetryConfig::PATIENT);
        assert_eq!(RetryConfig::for_effect(&patch_effect()), RetryConfig::PATCH);
        assert_eq!(RetryConfig::for_effect(&remove), RetryConfig::ONCE);
        assert_eq!(
            RetryConfig::for_effect(&GitHubEffect::ListBranches),
            RetryConfig::STANDARD
        );
    }

    #[test]
    fn delays_double_up_to_the_cap() {
        let delays: Vec<_> = (0..3)
            .map(|a| RetryConfig::STANDARD.delay_for_attempt(a).as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8]);
        assert_eq!(RetryConfig::STANDARD.total_max_wait(), Duration::from_secs(14));
        // 1 + 2 + 4 + 8 + 16 + 30 * 5
        assert_eq!(RetryConfig::PATIENT.total_max_wait(), Duration::from_secs(181));
        assert_eq!(RetryConfig::ONCE.total_max_wait(), Duration::ZERO);
        assert_eq!(
            RetryConfig::PATCH.delay_for_attempt(40),
            RetryConfig::PATCH.max_delay
        );
    }

    #[test]
    fn slow_patch_rendering_is_retriable() {
        let slow = GitHubApiError::from_status(422, "Sorry, this diff is taking too long to generate.");
        assert!(is_retriable(&patch_effect(), &slow));
        assert!(!is_retriable(&GitHubEffect::ListBranches, &slow));

        let missing = GitHubApiError::from_status(404, "No commit found");
        assert!(!is_retriable(&patch_effect(), &missing));
        let down = GitHubApiError::from_status(502, "Bad gateway");
        assert!(is_retriable(&GitHubEffect::ListBranches, &down));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&GitHubEffect::ListBranches, FAST, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(GitHubApiError::transient_without_source("temporary failure"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_run_out_with_the_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&GitHubEffect::ListBranches, FAST, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(GitHubApiError::transient_without_source(format!("failure {n}"))) }
        })
        .await;

        assert_eq!(result.unwrap_err().message, "failure 3");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_errors_and_single_attempts_stop_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&GitHubEffect::ListBranches, FAST, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GitHubApiError::permanent_without_source("not found")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let calls = AtomicU32::new(0);
        let remove = GitHubEffect::RemoveLabel {
            pr: PrNumber(1),
            label: "in-flight/8-x-y".to_string(),
        };
        let result: Result<(), _> = retry_with_backoff(&remove, RetryConfig::ONCE, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GitHubApiError::transient_without_source("timeout")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_patch_is_fetched_on_retry() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&patch_effect(), FAST, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(GitHubApiError::from_status(422, "this diff is taking too long to generate"))
                } else {
                    Ok("From aaaa".to_string())
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "From aaaa");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    proptest! {
        #[test]
        fn delays_are_monotonic_and_capped(
            initial_ms in 1u64..2000,
            max_ms in 2000u64..60000,
            retries in 1u32..40,
        ) {
            let config = RetryConfig {
                max_retries: retries,
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_millis(max_ms),
            };
            let delays: Vec<_> = (0..retries).map(|a| config.delay_for_attempt(a)).collect();
            prop_assert_eq!(delays[0], Duration::from_millis(initial_ms));
            for pair in delays.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
            prop_assert!(delays.iter().all(|d| *d <= config.max_delay));
        }
    }
}
