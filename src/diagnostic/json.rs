use crate::ast::SourceMap;
use super::{CompilerMessage, Severity};

/// One JSON object per message, on a single line.
pub fn render(m: &CompilerMessage, source: Option<&str>) -> String {
    let severity = match m.severity {
        Severity::Error => "error",
        Severity::Info => "info",
    };

    let mut obj = serde_json::json!({
        "sequence": m.sequence,
        "severity": severity,
        "line": m.line,
        "text": m.text,
        "notes": m.notes,
    });

    if let Some(span) = m.span {
        let mut label = serde_json::json!({ "start": span.start, "end": span.end });
        if let Some(source) = source {
            let (_, col) = SourceMap::new(source).lookup(span.start);
            label["col"] = serde_json::Value::from(col);
        }
        obj["span"] = label;
    }

    if let Some(s) = &m.suggestion {
        obj["suggestion"] = serde_json::Value::String(s.clone());
    }

    serde_json::to_string(&obj).unwrap_or_else(|_| r#"{"severity":"error","text":"internal error serializing message"}"#.to_string())
}
