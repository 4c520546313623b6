//! Parsing of "Backport of #N" references in pull request bodies.
//!
//! Backport PRs opened by the bot, and manual backports opened by maintainers,
//! declare the PR they backport in their body. The matcher is case-insensitive
//! and anchored at the start of a line, so quoted text in the middle of a
//! sentence is not mistaken for a declaration.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::PrNumber;

static BACKPORT_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:manual(?:ly)?[ \t]+)?backport[ \t]+(?:of[ \t]+)?(?:#(\d+)|https://github\.com/[^/\s]+/[^/\s]+/pull/(\d+))",
    )
    .expect("backport reference pattern is valid")
});

/// Returns every PR number `body` declares as backported, in order of appearance.
///
/// Duplicates are preserved; zero is not a valid PR number and is skipped.
pub fn backport_references(body: &str) -> Vec<PrNumber> {
    BACKPORT_REFERENCE
        .captures_iter(body)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .filter_map(|m| m.as_str().parse::<u64>().ok())
        .filter(|n| *n != 0)
        .map(PrNumber)
        .collect()
}

/// Returns the first PR number `body` declares as backported.
pub fn first_backport_reference(body: &str) -> Option<PrNumber> {
    backport_references(body).into_iter().next()
}
