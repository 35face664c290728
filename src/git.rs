//! Git status/diff helpers for the per-command change tracking.
//!
//! Everything here is best-effort: a missing `git` binary, a non-repository
//! working directory, or a non-zero exit all collapse to `None`, and the
//! session manager reacts by disabling further sampling for that session.
//!
//! Snapshots are [`IndexMap`]s so iteration follows `git status --short`
//! output order; re-listing an already-seen path updates its code in place
//! without moving it.

use std::path::Path;
use std::process::Stdio;

use indexmap::IndexMap;
use tokio::process::Command;

/// `{path → two-char status code}` snapshot of `git status --short`.
pub type StatusMap = IndexMap<String, String>;

/// Difference between two status snapshots, one formatted entry per line.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatusDelta {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl StatusDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

const DELTA_HEADER: &str = "=== Git Diff Before/After ===";
const DELTA_FOOTER: &str = "==============================";

/// Run `git <args>` in `cwd` and return its stdout, or `None` on any failure.
async fn run_git(args: &[&str], cwd: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Split a `git status --short` line into `(code, path)`.
///
/// Columns 0–1 carry the status code, column 2 is a separator, the rest is
/// the path (for renames git prints `old -> new`, kept verbatim).
fn split_status_line(line: &str) -> (String, String) {
    let code = line.get(..2).unwrap_or(line).trim().to_string();
    let path = line.get(3..).unwrap_or("").trim().to_string();
    (code, path)
}

/// Parse `git status --short` output into a `{path → code}` map.
///
/// Later lines for the same path overwrite earlier ones without changing
/// their position.
fn parse_status(output: &str) -> StatusMap {
    let mut status = StatusMap::new();
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let (code, path) = split_status_line(line);
        status.insert(path, code);
    }
    status
}

/// Snapshot the working tree as a `{path → code}` map.
pub async fn status_map(cwd: &Path) -> Option<StatusMap> {
    let output = run_git(&["status", "--short"], cwd).await?;
    Some(parse_status(&output))
}

/// Snapshot the working tree as ordered `(code, path)` rows.
pub async fn status_rows(cwd: &Path) -> Option<Vec<(String, String)>> {
    let output = run_git(&["status", "--short"], cwd).await?;
    Some(
        output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(split_status_line)
            .collect(),
    )
}

/// `git diff --stat` output, or `None` on failure.
pub async fn diff_stat(cwd: &Path) -> Option<String> {
    run_git(&["diff", "--stat"], cwd).await
}

/// Compute the added/modified/deleted buckets between two snapshots.
///
/// Bucket entries follow `after`'s iteration order (`before`'s for
/// deletions) and are pre-rendered for [`format_delta`].
pub fn diff_status(before: &StatusMap, after: &StatusMap) -> StatusDelta {
    let mut delta = StatusDelta::default();
    for (path, code) in after {
        match before.get(path) {
            None => delta.added.push(format!("{path} ({code})")),
            Some(prev) if prev != code => {
                delta.modified.push(format!("{path} ({prev} -> {code})"));
            }
            Some(_) => {}
        }
    }
    for (path, code) in before {
        if !after.contains_key(path) {
            delta.deleted.push(format!("{path} ({code})"));
        }
    }
    delta
}

/// Render a delta as the block injected into the terminal stream.
pub fn format_delta(delta: &StatusDelta, command: Option<&str>) -> String {
    if delta.is_empty() {
        return format!("{DELTA_HEADER}\n无文件变更\n{DELTA_FOOTER}");
    }
    let mut lines = vec![DELTA_HEADER.to_string()];
    if let Some(command) = command.filter(|c| !c.is_empty()) {
        lines.push(format!("Command: {command}"));
    }
    for (title, bucket) in [
        ("Added:", &delta.added),
        ("Modified:", &delta.modified),
        ("Deleted:", &delta.deleted),
    ] {
        if bucket.is_empty() {
            continue;
        }
        lines.push(title.to_string());
        lines.extend(bucket.iter().map(|item| format!("  {item}")));
    }
    lines.push(DELTA_FOOTER.to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, &str)]) -> StatusMap {
        entries
            .iter()
            .map(|(path, code)| ((*path).to_string(), (*code).to_string()))
            .collect()
    }

    #[test]
    fn parses_short_status_lines() {
        let status = parse_status(" M src/main.rs\n?? notes.txt\nA  src/new.rs\n");
        assert_eq!(status.get("src/main.rs").map(String::as_str), Some("M"));
        assert_eq!(status.get("notes.txt").map(String::as_str), Some("??"));
        assert_eq!(status.get("src/new.rs").map(String::as_str), Some("A"));
    }

    #[test]
    fn later_lines_overwrite_in_place() {
        let status = parse_status("?? a.txt\n M b.txt\nM  a.txt\n");
        assert_eq!(status.get("a.txt").map(String::as_str), Some("M"));
        // a.txt keeps its original (first) position.
        let paths: Vec<&str> = status.keys().map(String::as_str).collect();
        assert_eq!(paths, ["a.txt", "b.txt"]);
    }

    #[test]
    fn parse_is_stable_under_reserialization() {
        let status = parse_status("?? a\n M b\n");
        let reserialized: String = status
            .iter()
            .map(|(path, code)| format!("{code:<2} {path}\n"))
            .collect();
        assert_eq!(parse_status(&reserialized), status);
    }

    #[test]
    fn diff_of_identical_snapshots_is_empty() {
        let snap = snapshot(&[("a", "M"), ("b", "??")]);
        assert!(diff_status(&snap, &snap).is_empty());
    }

    #[test]
    fn diff_buckets_cover_set_differences() {
        let before = snapshot(&[("keep", "M"), ("gone", "M"), ("retouched", "??")]);
        let after = snapshot(&[("keep", "M"), ("retouched", "A"), ("fresh", "??")]);
        let delta = diff_status(&before, &after);
        assert_eq!(delta.added, ["fresh (??)"]);
        assert_eq!(delta.modified, ["retouched (?? -> A)"]);
        assert_eq!(delta.deleted, ["gone (M)"]);
    }

    #[test]
    fn diff_preserves_after_iteration_order() {
        let before = StatusMap::new();
        let after = snapshot(&[("z", "??"), ("a", "??"), ("m", "??")]);
        let delta = diff_status(&before, &after);
        assert_eq!(delta.added, ["z (??)", "a (??)", "m (??)"]);
    }

    #[test]
    fn empty_delta_formats_as_three_line_block() {
        let text = format_delta(&StatusDelta::default(), Some("ls"));
        assert_eq!(
            text,
            "=== Git Diff Before/After ===\n无文件变更\n=============================="
        );
    }

    #[test]
    fn format_lists_sections_in_fixed_order() {
        let delta = StatusDelta {
            added: vec!["x (??)".to_string()],
            modified: vec!["y (M -> A)".to_string()],
            deleted: vec!["z (M)".to_string()],
        };
        let text = format_delta(&delta, Some("touch x"));
        assert_eq!(
            text,
            "=== Git Diff Before/After ===\n\
             Command: touch x\n\
             Added:\n  x (??)\n\
             Modified:\n  y (M -> A)\n\
             Deleted:\n  z (M)\n\
             =============================="
        );
    }

    #[test]
    fn empty_command_label_is_omitted() {
        let delta = StatusDelta {
            added: vec!["x (??)".to_string()],
            ..StatusDelta::default()
        };
        let text = format_delta(&delta, Some(""));
        assert!(!text.contains("Command:"));
    }

    #[tokio::test]
    async fn status_map_outside_a_repository_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(status_map(dir.path()).await, None);
        assert_eq!(status_rows(dir.path()).await, None);
        assert_eq!(diff_stat(dir.path()).await, None);
    }
}
