//! Runtime configuration.
//!
//! All settings have defaults and can be overridden through `BACKPORT_*`
//! environment variables. Values are validated once at startup so that a bad
//! branch pattern or a zero concurrency limit fails fast instead of surfacing
//! in the middle of a job.

use std::path::PathBuf;

use thiserror::Error;

use crate::branches::{BranchMatcher, DEFAULT_SUPPORTED_BRANCH_PATTERN};
use crate::git::CommitIdentity;
use crate::state::LabelPrefixes;

/// Default number of concurrently running backport jobs.
pub const DEFAULT_MAX_ACTIVE_JOBS: usize = 5;

/// Default number of supported release lines.
pub const DEFAULT_SUPPORTED_VERSIONS: usize = 3;

/// PRs with this many commits or more are never replayed automatically.
pub const DEFAULT_COMMIT_LIMIT: usize = 240;

/// Default upstream host for repository clones.
pub const DEFAULT_REMOTE_BASE: &str = "https://github.com";

/// Errors from configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A numeric variable failed to parse.
    #[error("{var} must be a non-negative integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    /// A limit that must be positive was zero.
    #[error("{var} must be greater than zero")]
    ZeroLimit { var: &'static str },

    /// The supported-branch pattern is not a valid regex.
    #[error("invalid supported-branch pattern: {0}")]
    InvalidBranchPattern(#[from] regex::Error),

    /// Two label prefixes collide, so phases could not be told apart.
    #[error("label prefixes must be distinct and non-empty")]
    AmbiguousLabelPrefixes,
}

/// Configuration consumed by the backport engine.
#[derive(Debug, Clone)]
pub struct BackportConfig {
    /// Label prefixes encoding the backport lifecycle.
    pub labels: LabelPrefixes,

    /// Matcher for branches that may receive backports.
    pub branches: BranchMatcher,

    /// How many of the most recent release lines are supported.
    pub supported_versions: usize,

    /// Maximum number of concurrently running jobs.
    pub max_active_jobs: usize,

    /// Commit-count ceiling for automatic backports.
    pub commit_limit: usize,

    /// Login of the bot account, used to tell automated actors apart.
    pub bot_login: String,

    /// Identity used for commits created while applying patches.
    pub commit_identity: CommitIdentity,

    /// Directory holding the per-repository bare clones and working copies.
    pub cache_dir: PathBuf,

    /// Base location of upstream repositories (`<base>/<owner>/<name>.git`).
    pub remote_base: String,
}

impl Default for BackportConfig {
    fn default() -> Self {
        BackportConfig {
            labels: LabelPrefixes::default(),
            branches: BranchMatcher::default(),
            supported_versions: DEFAULT_SUPPORTED_VERSIONS,
            max_active_jobs: DEFAULT_MAX_ACTIVE_JOBS,
            commit_limit: DEFAULT_COMMIT_LIMIT,
            bot_login: "backport-bot[bot]".to_string(),
            commit_identity: CommitIdentity {
                name: "Backport Bot".to_string(),
                email: "backport-bot@users.noreply.github.com".to_string(),
            },
            cache_dir: std::env::temp_dir().join("backport-bot"),
            remote_base: DEFAULT_REMOTE_BASE.to_string(),
        }
    }
}

impl BackportConfig {
    /// Builds a configuration from `BACKPORT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let number = |var: &'static str, default: usize| -> Result<usize, ConfigError> {
            match lookup(var) {
                Some(value) => value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber { var, value }),
                None => Ok(default),
            }
        };

        let pattern = lookup("BACKPORT_SUPPORTED_BRANCH_PATTERN")
            .unwrap_or_else(|| DEFAULT_SUPPORTED_BRANCH_PATTERN.to_string());

        let labels = LabelPrefixes {
            target: lookup("BACKPORT_TARGET_LABEL_PREFIX").unwrap_or(defaults.labels.target),
            in_flight: lookup("BACKPORT_IN_FLIGHT_LABEL_PREFIX")
                .unwrap_or(defaults.labels.in_flight),
            merged: lookup("BACKPORT_MERGED_LABEL_PREFIX").unwrap_or(defaults.labels.merged),
            needs_manual: lookup("BACKPORT_NEEDS_MANUAL_LABEL_PREFIX")
                .unwrap_or(defaults.labels.needs_manual),
        };

        let config = BackportConfig {
            labels,
            branches: BranchMatcher::new(&pattern)?,
            supported_versions: number("BACKPORT_NUM_SUPPORTED_VERSIONS", defaults.supported_versions)?,
            max_active_jobs: number("BACKPORT_MAX_ACTIVE_JOBS", defaults.max_active_jobs)?,
            commit_limit: number("BACKPORT_COMMIT_LIMIT", defaults.commit_limit)?,
            bot_login: lookup("BACKPORT_BOT_LOGIN").unwrap_or(defaults.bot_login),
            commit_identity: CommitIdentity {
                name: lookup("BACKPORT_COMMITTER_NAME").unwrap_or(defaults.commit_identity.name),
                email: lookup("BACKPORT_COMMITTER_EMAIL")
                    .unwrap_or(defaults.commit_identity.email),
            },
            cache_dir: lookup("BACKPORT_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            remote_base: lookup("BACKPORT_REMOTE_BASE").unwrap_or(defaults.remote_base),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_active_jobs == 0 {
            return Err(ConfigError::ZeroLimit {
                var: "BACKPORT_MAX_ACTIVE_JOBS",
            });
        }
        if self.commit_limit == 0 {
            return Err(ConfigError::ZeroLimit {
                var: "BACKPORT_COMMIT_LIMIT",
            });
        }
        if !self.labels.is_unambiguous() {
            return Err(ConfigError::AmbiguousLabelPrefixes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = BackportConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.max_active_jobs, DEFAULT_MAX_ACTIVE_JOBS);
        assert_eq!(config.commit_limit, 240);
        assert_eq!(config.supported_versions, 3);
        assert_eq!(config.labels.target, "target/");
        assert_eq!(config.branches.pattern(), DEFAULT_SUPPORTED_BRANCH_PATTERN);
        assert_eq!(config.remote_base, "https://github.com");
    }

    #[test]
    fn variables_override_defaults() {
        let config = BackportConfig::from_lookup(lookup(&[
            ("BACKPORT_MAX_ACTIVE_JOBS", "2"),
            ("BACKPORT_NUM_SUPPORTED_VERSIONS", "4"),
            ("BACKPORT_TARGET_LABEL_PREFIX", "backport-to/"),
            ("BACKPORT_BOT_LOGIN", "trop[bot]"),
            ("BACKPORT_CACHE_DIR", "/var/cache/backport"),
        ]))
        .unwrap();
        assert_eq!(config.max_active_jobs, 2);
        assert_eq!(config.supported_versions, 4);
        assert_eq!(config.labels.target, "backport-to/");
        assert_eq!(config.bot_login, "trop[bot]");
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/backport"));
    }

    #[test]
    fn rejects_bad_numbers_and_zero_limits() {
        let err = BackportConfig::from_lookup(lookup(&[("BACKPORT_COMMIT_LIMIT", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { var: "BACKPORT_COMMIT_LIMIT", .. }));

        let err = BackportConfig::from_lookup(lookup(&[("BACKPORT_MAX_ACTIVE_JOBS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroLimit { .. }));
    }

    #[test]
    fn rejects_invalid_branch_pattern() {
        let err = BackportConfig::from_lookup(lookup(&[(
            "BACKPORT_SUPPORTED_BRANCH_PATTERN",
            "([",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBranchPattern(_)));
    }

    #[test]
    fn rejects_colliding_label_prefixes() {
        let err = BackportConfig::from_lookup(lookup(&[(
            "BACKPORT_MERGED_LABEL_PREFIX",
            "target/",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::AmbiguousLabelPrefixes));
    }
}
