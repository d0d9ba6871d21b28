use logos::Logos;

use crate::ast::Span;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    // `-- line` and `--[[ block ]]` comments are skipped
    #[token("--", skip_comment)]
    Comment,

    // Keywords
    #[token("and")]
    And,
    #[token("break")]
    Break,
    #[token("do")]
    Do,
    #[token("else")]
    Else,
    #[token("elseif")]
    Elseif,
    #[token("end")]
    End,
    #[token("false")]
    False,
    #[token("for")]
    For,
    #[token("function")]
    Function,
    #[token("if")]
    If,
    #[token("local")]
    Local,
    #[token("nil")]
    Nil,
    #[token("not")]
    Not,
    #[token("or")]
    Or,
    #[token("return")]
    Return,
    #[token("then")]
    Then,
    #[token("true")]
    True,
    #[token("while")]
    While,

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("^")]
    Caret,
    #[token("#")]
    Hash,
    #[token("..")]
    DotDot,
    #[token("==")]
    EqEq,
    #[token("~=")]
    NotEq,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEq,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEq,
    #[token("=")]
    Assign,

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,

    // Literals
    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, |lex| unescape(lex.slice()))]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

fn skip_comment(lex: &mut logos::Lexer<Token>) -> logos::Skip {
    let rest = lex.remainder();
    let len = match rest.strip_prefix("[[") {
        Some(body) => body.find("]]").map(|i| i + 4).unwrap_or(rest.len()),
        None => rest.find('\n').unwrap_or(rest.len()),
    };
    lex.bump(len);
    logos::Skip
}

/// Strip the quotes and resolve backslash escapes. Unknown escapes are kept verbatim.
fn unescape(quoted: &str) -> Option<String> {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => return None,
        }
    }
    Some(out)
}

/// Lex source code into a stream of tokens with byte spans.
/// Stops at the first unrecognised input and reports where it is.
pub fn lex(source: &str) -> Result<Vec<(Token, Span)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let range = lexer.span();
        match result {
            Ok(token) => tokens.push((token, Span { start: range.start, end: range.end })),
            Err(()) => {
                let snippet = source[range.clone()].to_string();
                return Err(LexError {
                    position: range.start,
                    suggestion: suggest_fix(source, range.start),
                    snippet,
                });
            }
        }
    }

    Ok(tokens)
}

/// Operators borrowed from C-like languages get pointed at their spelling here.
fn suggest_fix(source: &str, position: usize) -> String {
    let rest = &source[position..];
    if rest.starts_with("!=") {
        "use '~=' for inequality".to_string()
    } else if rest.starts_with("&&") {
        "use 'and' for logical conjunction".to_string()
    } else if rest.starts_with("||") {
        "use 'or' for logical disjunction".to_string()
    } else if rest.starts_with('!') {
        "use 'not' for logical negation".to_string()
    } else if rest.starts_with('"') || rest.starts_with('\'') {
        "unfinished string".to_string()
    } else {
        let c = rest.chars().next().unwrap_or(' ');
        format!("unexpected symbol '{c}'")
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("lex error at byte {position}: '{snippet}' ({suggestion})")]
pub struct LexError {
    pub position: usize,
    pub snippet: String,
    pub suggestion: String,
}
