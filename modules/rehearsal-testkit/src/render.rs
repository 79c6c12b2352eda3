//! Human-readable renderings of messages for failure reports.

use std::fmt::Write;

use rehearsal_engine::AnyMessage;

use crate::compare::structure;

pub trait Renderer: Send + Sync {
    fn render_message(&self, m: &dyn AnyMessage) -> String;
}

/// Renders the short type name followed by the message as pretty JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRenderer;

impl Renderer for DefaultRenderer {
    fn render_message(&self, m: &dyn AnyMessage) -> String {
        let value = structure(m);
        let body = serde_json::to_string_pretty(&value).unwrap_or_else(|_| format!("{m:?}"));
        format!("{} {}", m.message_type(), body)
    }
}

/// Write a line diff of `expected` against `actual`.
///
/// Unchanged lines are prefixed with two spaces, lines only in `expected`
/// with "- " and lines only in `actual` with "+ ".
pub fn write_diff(out: &mut String, expected: &str, actual: &str) {
    let a: Vec<&str> = expected.lines().collect();
    let b: Vec<&str> = actual.lines().collect();

    // lcs[i][j] is the length of the longest common subsequence of a[i..] and b[j..].
    let mut lcs = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        if i < a.len() && j < b.len() && a[i] == b[j] {
            let _ = writeln!(out, "  {}", a[i]);
            i += 1;
            j += 1;
        } else if i < a.len() && (j == b.len() || lcs[i + 1][j] >= lcs[i][j + 1]) {
            let _ = writeln!(out, "- {}", a[i]);
            i += 1;
        } else {
            let _ = writeln!(out, "+ {}", b[j]);
            j += 1;
        }
    }
}
