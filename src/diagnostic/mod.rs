pub mod ansi;
pub mod json;

use crate::ast::{SourceMap, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Info,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Error => "Error",
            Severity::Info => "Message",
        }
    }
}

/// One entry of a compile attempt's log. Line 0 means no location.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilerMessage {
    pub sequence: u32,
    pub severity: Severity,
    pub line: u32,
    pub text: String,
    pub span: Option<Span>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
}

impl CompilerMessage {
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Severity::Error, text)
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(Severity::Info, text)
    }

    fn new(severity: Severity, text: impl Into<String>) -> Self {
        CompilerMessage {
            sequence: 0,
            severity,
            line: 0,
            text: text.into(),
            span: None,
            notes: Vec::new(),
            suggestion: None,
        }
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    /// The line is filled in from the span when the message is logged.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// `Error (3): text`, or `Message: text` without a line, with `<` and `>`
    /// escaped for rich-text views.
    pub fn display(&self) -> String {
        let text = self.text.replace('<', "&lt;").replace('>', "&gt;");
        match self.line {
            0 => format!("{}: {text}", self.severity.label()),
            line => format!("{} ({line}): {text}", self.severity.label()),
        }
    }
}

impl std::fmt::Display for CompilerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            0 => write!(f, "{}: {}", self.severity.label(), self.text),
            line => write!(f, "{} ({line}): {}", self.severity.label(), self.text),
        }
    }
}

/// Collects the messages of one compile attempt.
#[derive(Debug)]
pub struct MessageLog {
    map: SourceMap,
    messages: Vec<CompilerMessage>,
    next_sequence: u32,
}

impl MessageLog {
    pub fn new(source: &str) -> Self {
        MessageLog { map: SourceMap::new(source), messages: Vec::new(), next_sequence: 0 }
    }

    /// Adds a message unless one with the same severity, line and text is
    /// already logged.
    pub fn push(&mut self, mut message: CompilerMessage) {
        if message.line == 0 {
            if let Some(span) = message.span {
                message.line = self.map.line(span.start);
            }
        }
        let duplicate = self.messages.iter().any(|m| {
            m.severity == message.severity && m.line == message.line && m.text == message.text
        });
        if duplicate {
            return;
        }
        message.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.messages.push(message);
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(CompilerMessage::is_error)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages ordered by `(line, sequence)`.
    pub fn into_sorted(mut self) -> Vec<CompilerMessage> {
        self.messages.sort_by_key(|m| (m.line, m.sequence));
        self.messages
    }
}

// ---- Conversions from each pipeline stage ----

impl From<&crate::lexer::LexError> for CompilerMessage {
    fn from(e: &crate::lexer::LexError) -> Self {
        let span = Span {
            start: e.position,
            end: e.position + e.snippet.len().max(1),
        };
        let mut m = CompilerMessage::error(format!("unexpected token '{}'", e.snippet)).with_span(span);
        if !e.suggestion.is_empty() {
            m = m.with_suggestion(e.suggestion.clone());
        }
        m
    }
}

impl From<&crate::parser::ParseError> for CompilerMessage {
    fn from(e: &crate::parser::ParseError) -> Self {
        CompilerMessage::error(&e.message).with_span(e.span)
    }
}

impl From<&crate::verify::VerifyError> for CompilerMessage {
    fn from(e: &crate::verify::VerifyError) -> Self {
        let mut m = CompilerMessage::error(&e.message).with_span(e.span);
        if e.function != crate::verify::TOP_LEVEL {
            m = m.with_note(format!("in function '{}'", e.function));
        }
        if let Some(hint) = &e.hint {
            m = m.with_suggestion(hint.clone());
        }
        m
    }
}

impl From<&crate::vm::ScriptError> for CompilerMessage {
    fn from(e: &crate::vm::ScriptError) -> Self {
        CompilerMessage::error(e.error.to_string()).at_line(e.line.unwrap_or(0))
    }
}

impl From<&crate::vm::CompileError> for CompilerMessage {
    fn from(e: &crate::vm::CompileError) -> Self {
        CompilerMessage::error(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_builder() {
        let m = CompilerMessage::error("something went wrong");
        assert_eq!(m.severity, Severity::Error);
        assert_eq!(m.text, "something went wrong");
        assert_eq!(m.line, 0);
        assert!(m.span.is_none());
        assert!(m.notes.is_empty());
        assert!(m.suggestion.is_none());
    }

    #[test]
    fn display_form() {
        assert_eq!(CompilerMessage::error("program is empty").display(), "Error: program is empty");
        assert_eq!(
            CompilerMessage::info("a < b").at_line(3).display(),
            "Message (3): a &lt; b"
        );
        assert_eq!(CompilerMessage::error("x > y").at_line(7).to_string(), "Error (7): x > y");
    }

    #[test]
    fn log_resolves_span_lines() {
        let mut log = MessageLog::new("a = 1\nb = 2\nc = 3");
        log.push(CompilerMessage::error("bad").with_span(Span { start: 8, end: 9 }));
        let messages = log.into_sorted();
        assert_eq!(messages[0].line, 2);
    }

    #[test]
    fn log_drops_duplicates() {
        let mut log = MessageLog::new("");
        log.push(CompilerMessage::error("same").at_line(1));
        log.push(CompilerMessage::error("same").at_line(1));
        log.push(CompilerMessage::info("same").at_line(1));
        log.push(CompilerMessage::error("same").at_line(2));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn log_sorts_by_line_then_sequence() {
        let mut log = MessageLog::new("");
        log.push(CompilerMessage::error("third").at_line(5));
        log.push(CompilerMessage::error("first").at_line(0));
        log.push(CompilerMessage::info("second").at_line(5));
        log.push(CompilerMessage::error("zeroth").at_line(0));
        let texts: Vec<String> = log.into_sorted().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, ["first", "zeroth", "third", "second"]);
    }

    #[test]
    fn from_lex_error() {
        let e = crate::lexer::LexError {
            position: 3,
            snippet: "!=".to_string(),
            suggestion: "use '~=' for inequality".to_string(),
        };
        let m = CompilerMessage::from(&e);
        assert!(m.text.contains("!="));
        assert_eq!(m.span, Some(Span { start: 3, end: 5 }));
        assert!(m.suggestion.is_some());
    }

    #[test]
    fn from_parse_error() {
        let e = crate::parser::ParseError {
            position: 2,
            span: Span { start: 10, end: 15 },
            message: "expected 'end'".to_string(),
        };
        let m = CompilerMessage::from(&e);
        assert_eq!(m.text, "expected 'end'");
        assert_eq!(m.span, Some(Span { start: 10, end: 15 }));
    }

    #[test]
    fn from_verify_error() {
        let e = crate::verify::VerifyError {
            function: "main".to_string(),
            message: "undefined function 'torsoin'".to_string(),
            hint: Some("did you mean 'torsion'?".to_string()),
            span: Span { start: 0, end: 7 },
        };
        let m = CompilerMessage::from(&e);
        assert!(m.notes.iter().any(|n| n.contains("main")));
        assert_eq!(m.suggestion.as_deref(), Some("did you mean 'torsion'?"));
    }

    #[test]
    fn from_script_error_keeps_line() {
        let e = crate::vm::ScriptError::at(4, crate::vm::VmError::Runtime("boom".into()));
        let m = CompilerMessage::from(&e);
        assert_eq!(m.line, 4);
        assert_eq!(m.text, "boom");
        let e = crate::vm::ScriptError::from(crate::vm::VmError::StackOverflow(200));
        assert_eq!(CompilerMessage::from(&e).line, 0);
    }

    #[test]
    fn from_compile_error() {
        let e = crate::vm::CompileError::TooManyGlobals;
        let m = CompilerMessage::from(&e);
        assert!(m.text.contains("too many globals"));
    }
}
