//! Conflict diagnostics extracted from a conflicted working copy.
//!
//! After a failed three-way `git am`, conflicted files contain marker blocks
//! (`<<<<<<<` .. `>>>>>>>`). Running `git diff` then yields a combined diff
//! (`diff --cc`) whose hunks include those markers. Each hunk holding markers
//! becomes one [`ConflictAnnotation`] spanning its first start marker to its
//! last end marker, with line numbers in the conflicted file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{GitResult, run_git};

const START_MARKER: &str = "<<<<<<<";
const END_MARKER: &str = ">>>>>>>";

/// A conflicting region of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictAnnotation {
    /// File path relative to the repository root.
    pub path: String,
    /// First line of the region (1-based, inclusive).
    pub start_line: u32,
    /// Last line of the region (1-based, inclusive).
    pub end_line: u32,
    pub message: String,
    /// The region's text, markers included.
    pub raw_conflict_text: String,
}

/// Collect conflict annotations from the working copy at `workdir`.
pub async fn diff_conflicts(workdir: &Path) -> GitResult<Vec<ConflictAnnotation>> {
    let output = run_git(workdir, &["diff", "--no-color", "--no-ext-diff"]).await?;
    Ok(parse_conflicts(&String::from_utf8_lossy(&output.stdout)))
}

/// A hunk being scanned.
struct Hunk {
    /// Number of parent columns in each line prefix.
    parents: usize,
    /// Line number of the hunk's first line in the result file.
    start: u32,
    /// Result-side lines seen so far in this hunk.
    lines: Vec<String>,
    /// Index into `lines` of the first marker seen.
    first: Option<usize>,
    /// Index into `lines` of the last end marker seen.
    last_end: Option<usize>,
    /// A start marker has not been closed yet.
    open: bool,
}

impl Hunk {
    fn push(&mut self, content: &str) {
        self.lines.push(content.to_string());
        let idx = self.lines.len() - 1;
        if content.starts_with(START_MARKER) {
            self.first = self.first.or(Some(idx));
            self.open = true;
        } else if content.starts_with(END_MARKER) {
            // An end marker with no start began before the hunk.
            self.first = self.first.or(Some(0));
            self.last_end = Some(idx);
            self.open = false;
        }
    }

    /// Emits the hunk's annotation, if it holds any markers.
    fn finish(self, path: &str, out: &mut Vec<ConflictAnnotation>) {
        let Some(from) = self.first else {
            return;
        };
        let last = self.lines.len() - 1;
        let to = match self.last_end {
            Some(end) if !self.open => end,
            _ => last,
        };
        out.push(ConflictAnnotation {
            path: path.to_string(),
            start_line: self.start + from as u32,
            end_line: self.start + to as u32,
            message: format!("Patch conflict in {path}"),
            raw_conflict_text: self.lines[from..=to].join("\n"),
        });
    }
}

/// Parse `git diff` output (plain or combined) into conflict annotations.
///
/// Binary files are skipped. One annotation per conflicted hunk. A region
/// whose start marker precedes the hunk is clamped to the hunk's first line;
/// a block still open at the end of a hunk ends at the hunk's last line.
pub fn parse_conflicts(diff: &str) -> Vec<ConflictAnnotation> {
    let mut out = Vec::new();
    let mut path: Option<String> = None;
    let mut hunk: Option<Hunk> = None;

    for line in diff.lines() {
        if line.starts_with("diff ") {
            if let (Some(h), Some(p)) = (hunk.take(), path.as_deref()) {
                h.finish(p, &mut out);
            }
            path = file_path_from_header(line);
            continue;
        }

        let Some(current_path) = path.as_deref() else {
            continue;
        };

        if line.starts_with("@@") {
            if let Some(h) = hunk.take() {
                h.finish(current_path, &mut out);
            }
            hunk = parse_hunk_header(line);
            continue;
        }

        let Some(h) = hunk.as_mut() else {
            // File header lines between `diff` and the first hunk.
            if line.starts_with("Binary files ") {
                path = None;
            } else if let Some(p) = line.strip_prefix("+++ b/") {
                path = Some(p.to_string());
            }
            continue;
        };

        if line.starts_with('\\') {
            continue;
        }

        let split = line
            .char_indices()
            .nth(h.parents)
            .map(|(i, _)| i)
            .unwrap_or(line.len());
        let (prefix, content) = line.split_at(split);
        if prefix.contains('-') {
            // Only present in a parent, not in the conflicted file.
            continue;
        }

        h.push(content);
    }

    if let (Some(h), Some(p)) = (hunk, path.as_deref()) {
        h.finish(p, &mut out);
    }
    out
}

/// Path from `diff --git a/x b/x`, `diff --cc x` or `diff --combined x`.
fn file_path_from_header(line: &str) -> Option<String> {
    if let Some(rest) = line.strip_prefix("diff --git ") {
        return rest.rfind(" b/").map(|i| rest[i + 3..].to_string());
    }
    line.strip_prefix("diff --cc ")
        .or_else(|| line.strip_prefix("diff --combined "))
        .map(str::to_string)
}

/// Parse `@@ -a,b +c,d @@` or `@@@ -a,b -c,d +e,f @@@`.
fn parse_hunk_header(line: &str) -> Option<Hunk> {
    let ats = line.chars().take_while(|c| *c == '@').count();
    let parents = ats.checked_sub(1).filter(|p| *p > 0)?;
    let result_range = line[ats..]
        .split_whitespace()
        .take_while(|tok| !tok.starts_with('@'))
        .find(|tok| tok.starts_with('+'))?;
    let start: u32 = result_range[1..]
        .split(',')
        .next()?
        .parse()
        .ok()?;
    Some(Hunk {
        parents,
        start,
        lines: Vec::new(),
        first: None,
        last_end: None,
        open: false,
    })
}
