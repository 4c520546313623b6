//! Text the bot posts to GitHub: comments, PR titles and bodies, check-run
//! output.
//!
//! Everything here is pure so the exact wording can be tested.

use crate::git::ConflictAnnotation;
use crate::state::LabelPhase;
use crate::types::PrNumber;

/// GitHub's comment size limit (65536 characters).
pub const GITHUB_COMMENT_SIZE_LIMIT: usize = 65536;

/// Maximum size of one conflict excerpt in a comment.
const MAX_EXCERPT_LEN: usize = 4096;

/// Label added to every PR the bot opens, next to the target branch name.
pub const BACKPORT_LABEL: &str = "backport";

pub fn check_run_name(branch: &str) -> String {
    format!("Backportable? - {branch}")
}

pub fn backport_title(branch: &str, original_title: &str) -> String {
    format!("[{branch}] {original_title}")
}

/// Body of a backport PR.
///
/// The first line is the `Backport of #N` declaration that links the PR back
/// to its original; release notes from the original are carried over.
pub fn backport_body(original: PrNumber, original_body: &str) -> String {
    let mut body = format!("Backport of #{}\n\nSee that PR for details.\n", original.0);
    if let Some(notes) = release_notes(original_body) {
        body.push_str(&format!("\nNotes: {notes}"));
    }
    body
}

/// Extracts the `Notes:` line of a PR body, if any.
///
/// Only the first line is kept; an empty note yields `None`.
pub fn release_notes(body: &str) -> Option<&str> {
    body.lines().find_map(|line| {
        let line = line.trim();
        let (head, rest) = line.split_at_checked(6)?;
        if !head.eq_ignore_ascii_case("notes:") {
            return None;
        }
        let notes = rest.trim();
        (!notes.is_empty()).then_some(notes)
    })
}

pub fn backport_opened(branch: &str, backport: PrNumber) -> String {
    format!(
        "I have automatically backported this PR to \"{branch}\", please check out #{}",
        backport.0
    )
}

pub fn manual_backport_opened(author: &str, branch: &str, backport: PrNumber) -> String {
    format!(
        "@{author} has manually backported this PR to \"{branch}\", please check out #{}",
        backport.0
    )
}

pub fn branch_not_found(branch: &str) -> String {
    format!("The branch \"{branch}\" does not exist, so this PR cannot be backported to it.")
}

pub fn too_many_commits(branch: &str, count: usize, limit: usize) -> String {
    format!(
        "This PR has {count} commits, which is at or above the limit of {limit} for \
         automatic backports. A manual backport to \"{branch}\" is required."
    )
}

/// Posted when the backport's current phase does not allow opening a PR.
pub fn backport_not_opened(branch: &str, phase: LabelPhase) -> String {
    format!(
        "The backport to \"{branch}\" is marked {phase}, so no automatic backport PR was opened."
    )
}

pub fn no_commits(branch: &str) -> String {
    format!("This PR has no commits to backport to \"{branch}\".")
}

/// Comment posted when patches did not apply.
///
/// Lists each conflicting region with an excerpt, trimmed so the whole
/// comment stays under GitHub's size limit.
pub fn backport_conflicted(branch: &str, annotations: &[ConflictAnnotation]) -> String {
    let mut body = format!(
        "I was unable to backport this PR to \"{branch}\" cleanly;\n\
         you will need to perform this backport manually."
    );

    if annotations.is_empty() {
        return body;
    }

    body.push_str("\n\n<details><summary>Conflicts</summary>\n");
    for annotation in annotations {
        let excerpt = truncate_with_suffix(&annotation.raw_conflict_text, MAX_EXCERPT_LEN);
        let section = format!(
            "\n`{}` lines {}-{}:\n\n```\n{}\n```\n",
            annotation.path, annotation.start_line, annotation.end_line, excerpt
        );
        // Leave room for the omission note and closing tag.
        if body.len() + section.len() + 64 > GITHUB_COMMENT_SIZE_LIMIT {
            body.push_str("\n(more conflicts omitted)\n");
            break;
        }
        body.push_str(&section);
    }
    body.push_str("\n</details>");
    body
}

pub const CHECK_PASSED_TITLE: &str = "Clean backport";
pub const CHECK_FAILED_TITLE: &str = "Backport requires manual intervention";

pub fn check_passed_summary(branch: &str) -> String {
    format!("This PR can be backported to \"{branch}\" automatically.")
}

/// Comment posted when a backport job fails for any other reason.
pub fn backport_errored(branch: &str, error: &str) -> String {
    let error = truncate_with_suffix(error, MAX_EXCERPT_LEN);
    format!(
        "An error occurred while backporting this PR to \"{branch}\":\n\n```\n{error}\n```"
    )
}

/// Truncates a string to the given length with a "... [truncated]" suffix.
pub fn truncate_with_suffix(s: &str, max_len: usize) -> String {
    const SUFFIX: &str = "... [truncated]";

    if s.len() <= max_len {
        return s.to_string();
    }

    let content_len = max_len.saturating_sub(SUFFIX.len());

    // Find a valid UTF-8 boundary
    let mut end = content_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}{}", &s[..end], SUFFIX)
}
