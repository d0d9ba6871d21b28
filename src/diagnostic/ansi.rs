//! Terminal rendering of compiler messages, with the offending source line
//! and carets under the span when one is known.

use std::fmt::Write;

use super::{CompilerMessage, Severity};
use crate::ast::SourceMap;

const BOLD: &str = "1";
const RED: &str = "1;31";
const CYAN: &str = "36";
const DIM: &str = "2";

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn paint(&self, code: &str, s: &str) -> String {
        if self.use_color { format!("\x1b[{code}m{s}\x1b[0m") } else { s.to_string() }
    }

    pub fn render(&self, m: &CompilerMessage, source: &str) -> String {
        let label = match m.severity {
            Severity::Error => self.paint(RED, "error"),
            Severity::Info => self.paint(CYAN, "info"),
        };
        let mut out = format!("{label}: {}\n", self.paint(BOLD, &m.text));
        if m.line > 0 {
            self.snippet(&mut out, m, source);
        }
        let bullet = self.paint(DIM, "=");
        for note in &m.notes {
            let _ = writeln!(out, "  {bullet} note: {note}");
        }
        if let Some(suggestion) = &m.suggestion {
            let _ = writeln!(out, "  {bullet} suggestion: {suggestion}");
        }
        out
    }

    /// `--> line[:col]`, the source line in a gutter, and carets clipped to it.
    fn snippet(&self, out: &mut String, m: &CompilerMessage, source: &str) {
        let map = SourceMap::new(source);
        let line = m.line as usize;
        let text = map.line_text(source, line);
        let col = m.span.map(|span| map.lookup(span.start).1);

        let arrow = self.paint(CYAN, "-->");
        let _ = match col {
            Some(col) => writeln!(out, "  {arrow} {line}:{col}"),
            None => writeln!(out, "  {arrow} {line}"),
        };

        let width = line.to_string().len();
        let blank = " ".repeat(width);
        let bar = self.paint(CYAN, "|");
        let number = self.paint(CYAN, &format!("{line:>width$}"));
        let _ = writeln!(out, "{blank} {bar}");
        let _ = writeln!(out, "{number} {bar} {text}");
        if let (Some(span), Some(col)) = (m.span, col) {
            let offset = col - 1;
            let room = text.len().saturating_sub(offset).max(1);
            let len = span.end.saturating_sub(span.start).clamp(1, room);
            let carets = self.paint(RED, &"^".repeat(len));
            let _ = writeln!(out, "{blank} {bar} {}{carets}", " ".repeat(offset));
        }
        let _ = writeln!(out, "{blank} {bar}");
    }
}
