//! Release branch eligibility and version ordering.
//!
//! A branch is a backport target when its name matches the supported-branch
//! pattern (by default `8-x-y` or `7-1-x` style release lines). The capture
//! groups of that pattern are the branch's version components, and ranking
//! compares those components numerically where possible.

use std::cmp::Ordering;

use regex::Regex;

/// Default supported-branch pattern: a major version followed by either a
/// `<minor>-x` suffix or the `x-y` wildcard suffix.
pub const DEFAULT_SUPPORTED_BRANCH_PATTERN: &str = r"^(\d+)-(?:(\d+)-x|x-y)$";

/// Matches and ranks release branches.
#[derive(Debug, Clone)]
pub struct BranchMatcher {
    pattern: Regex,
}

impl Default for BranchMatcher {
    fn default() -> Self {
        BranchMatcher {
            pattern: Regex::new(DEFAULT_SUPPORTED_BRANCH_PATTERN)
                .expect("default supported-branch pattern is valid"),
        }
    }
}

impl BranchMatcher {
    /// Creates a matcher from a user-supplied pattern.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(BranchMatcher {
            pattern: Regex::new(pattern)?,
        })
    }

    /// Returns the pattern source.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Returns true if `branch` is a valid backport target.
    pub fn is_supported(&self, branch: &str) -> bool {
        self.pattern.is_match(short_branch_name(branch))
    }

    /// Returns the `limit` most recent supported branches, sorted ascending.
    ///
    /// Unsupported names are ignored. When several branches share a major
    /// version only the highest-ranked one survives.
    pub fn supported_branches<S: AsRef<str>>(&self, branches: &[S], limit: usize) -> Vec<String> {
        let mut ranked: Vec<(Vec<Option<&str>>, &str)> = branches
            .iter()
            .map(|b| short_branch_name(b.as_ref()))
            .filter_map(|name| self.version_components(name).map(|v| (v, name)))
            .collect();

        ranked.sort_by(|(a, _), (b, _)| compare_versions(a, b));

        // Sorted ascending, so the last entry per major is the most specific one.
        let mut by_major: Vec<(Vec<Option<&str>>, &str)> = Vec::with_capacity(ranked.len());
        for entry in ranked {
            match by_major.last_mut() {
                Some(last) if last.0.first() == entry.0.first() => *last = entry,
                _ => by_major.push(entry),
            }
        }

        let skip = by_major.len().saturating_sub(limit);
        by_major
            .into_iter()
            .skip(skip)
            .map(|(_, name)| name.to_string())
            .collect()
    }

    /// Captured version components of `branch`, or `None` if unsupported.
    fn version_components<'a>(&self, branch: &'a str) -> Option<Vec<Option<&'a str>>> {
        let caps = self.pattern.captures(branch)?;
        Some(
            caps.iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str()))
                .collect(),
        )
    }
}

/// Strips `refs/heads/` and `origin/` prefixes produced by git plumbing.
fn short_branch_name(branch: &str) -> &str {
    let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);
    branch.strip_prefix("origin/").unwrap_or(branch)
}

/// Compares two version tuples component by component.
fn compare_versions(a: &[Option<&str>], b: &[Option<&str>]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = compare_component(*x, *y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Numeric when both sides are all digits, lexicographic otherwise. A missing
/// component sorts before a present one.
fn compare_component(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) if is_numeric(a) && is_numeric(b) => {
            // Compare by magnitude without overflowing on long digit runs.
            let a = a.trim_start_matches('0');
            let b = b.trim_start_matches('0');
            a.len().cmp(&b.len()).then_with(|| a.cmp(b))
        }
        (Some(a), Some(b)) => a.cmp(b),
    }
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
