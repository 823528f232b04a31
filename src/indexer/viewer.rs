// src/indexer/viewer.rs
// Deterministic, line-numbered excerpt of a session file, for surfacing a
// search hit's surrounding context to a human.

use crate::error::{HiveError, Result};
use std::path::Path;

pub struct ViewRequest<'a> {
    pub path: &'a Path,
    pub line: usize,
    pub context: usize,
}

const RULE: &str = "----------------------------------------";

/// Reads `path`, trims trailing empty lines, and renders lines
/// `max(1, line-context)..=min(N, line+context)` with the target line
/// marked by a leading `>`.
pub fn view(req: ViewRequest<'_>) -> Result<String> {
    let text = std::fs::read_to_string(req.path)?;
    let mut lines: Vec<&str> = text.lines().collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    let total = lines.len();

    if req.line < 1 || req.line > total {
        return Err(HiveError::OutOfRange(total));
    }

    let start = req.line.saturating_sub(req.context).max(1);
    let end = (req.line + req.context).min(total);

    let mut out = String::new();
    out.push_str(&format!("File: {}\n", req.path.display()));
    out.push_str(&format!("Line: {} (context: {})\n", req.line, req.context));
    out.push_str(RULE);
    out.push('\n');
    for n in start..=end {
        let marker = if n == req.line { '>' } else { ' ' };
        out.push_str(&format!("{marker}{:>5} | {}\n", n, lines[n - 1]));
    }
    out.push_str(RULE);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for i in 1..=7 {
            writeln!(f, "{{\"id\":{i}}}").unwrap();
        }
        f
    }

    #[test]
    fn renders_deterministic_block_with_target_marked() {
        let file = sample_file();
        let output = view(ViewRequest { path: file.path(), line: 4, context: 2 }).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert!(lines[0].starts_with("File: "));
        assert_eq!(lines[1], "Line: 4 (context: 2)");
        assert_eq!(lines[2], RULE);
        assert_eq!(lines.last().unwrap(), &RULE);
        assert!(lines.iter().any(|l| l.starts_with('>') && l.contains("4 |")));
        // lines 2..6 rendered: 5 content lines between the two rules
        assert_eq!(lines.len(), 2 + 1 + 5 + 1);
    }

    #[test]
    fn out_of_range_line_errors() {
        let file = sample_file();
        let err = view(ViewRequest { path: file.path(), line: 100, context: 1 }).unwrap_err();
        assert!(matches!(err, HiveError::OutOfRange(7)));
    }

    #[test]
    fn content_line_count_matches_invariant() {
        let file = sample_file();
        let output = view(ViewRequest { path: file.path(), line: 1, context: 2 }).unwrap();
        // n=1, k=2, N=7: min(7,3) - max(1,-1) + 1 = 3
        let content_lines = output.lines().count() - 4;
        assert_eq!(content_lines, 3);
    }
}
