//! SQL safety gate
//!
//! Approves, rejects or rewrites a candidate query before it reaches the
//! database. Forbidden keywords are matched on raw words, not on a parsed
//! statement: a forbidden keyword inside a string literal
//! (`WHERE note = 'drop'`) or a comment is still rejected. Row caps are
//! detected on the outermost statement only, outside quotes and
//! parentheses.

use crate::config::SqlGuardConfig;
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Outcome of validating a candidate query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "value", rename_all = "lowercase")]
pub enum ValidationVerdict {
    /// The query (possibly rewritten with a row cap) may be executed
    Approved(String),

    /// The query must not be executed
    Rejected(String),
}

impl ValidationVerdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, ValidationVerdict::Approved(_))
    }

    /// Convert into the approved query or a `QueryRejected` error
    pub fn into_result(self) -> AppResult<String> {
        match self {
            ValidationVerdict::Approved(query) => Ok(query),
            ValidationVerdict::Rejected(reason) => Err(AppError::QueryRejected(reason)),
        }
    }
}

/// Syntax used when adding a row cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitStyle {
    /// `SELECT ... LIMIT n` (SQLite, PostgreSQL, MySQL)
    Limit,

    /// `SELECT TOP n ...` (SQL Server)
    Top,
}

impl LimitStyle {
    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "limit" => Ok(Self::Limit),
            "top" => Ok(Self::Top),
            other => Err(AppError::ConfigError(format!(
                "unknown limit style '{}' (expected limit or top)",
                other
            ))),
        }
    }
}

/// Tokens that already bound the number of returned rows
const ROW_LIMIT_TOKENS: &[&str] = &["LIMIT", "FETCH"];

/// Keyword-blacklist query validator
#[derive(Debug, Clone)]
pub struct SafetyGate {
    forbidden: Vec<String>,
    row_limit: u32,
    style: LimitStyle,
}

impl SafetyGate {
    pub fn new<I, S>(forbidden: I, row_limit: u32, style: LimitStyle) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            forbidden: forbidden
                .into_iter()
                .map(|k| k.as_ref().trim().to_ascii_uppercase())
                .filter(|k| !k.is_empty())
                .collect(),
            row_limit,
            style,
        }
    }

    pub fn from_config(config: &SqlGuardConfig) -> Self {
        Self::new(&config.forbidden_keywords, config.row_limit, config.limit_style)
    }

    pub fn row_limit(&self) -> u32 {
        self.row_limit
    }

    /// Validate a candidate query
    ///
    /// Comments are removed from an approved query. A row cap is added
    /// unless the outermost statement already carries one.
    pub fn validate(&self, raw: &str) -> ValidationVerdict {
        if raw.trim().is_empty() {
            return ValidationVerdict::Rejected("empty query".to_string());
        }

        // Every word counts here, including words in literals and comments
        if let Some(keyword) = tokenize(raw)
            .iter()
            .find(|token| self.forbidden.iter().any(|f| f == &token.upper))
        {
            return ValidationVerdict::Rejected(format!(
                "forbidden keyword: {}",
                keyword.upper
            ));
        }

        let uncommented = strip_comments(raw);
        let body = strip_trailing_semicolons(uncommented.trim());
        if body.is_empty() {
            return ValidationVerdict::Rejected("empty query".to_string());
        }
        if body.contains(';') {
            return ValidationVerdict::Rejected("multiple statements are not allowed".to_string());
        }

        let tokens = tokenize(body);
        match tokens.first() {
            Some(first) if first.is_code() && first.upper == "SELECT" => {}
            _ => {
                return ValidationVerdict::Rejected(
                    "only SELECT statements are allowed".to_string(),
                )
            }
        }

        if has_row_cap(&tokens) {
            return ValidationVerdict::Approved(body.to_string());
        }

        ValidationVerdict::Approved(self.add_row_limit(body, &tokens))
    }

    fn add_row_limit(&self, body: &str, tokens: &[Token]) -> String {
        match self.style {
            LimitStyle::Limit => format!("{} LIMIT {}", body, self.row_limit),
            LimitStyle::Top => {
                let anchor = tokens[top_anchor(tokens)].end;
                format!(
                    "{} TOP {} {}",
                    &body[..anchor],
                    self.row_limit,
                    body[anchor..].trim_start()
                )
            }
        }
    }
}

/// Index of the token `TOP n` follows: SELECT, or SELECT DISTINCT / SELECT ALL
fn top_anchor(tokens: &[Token]) -> usize {
    match tokens.get(1) {
        Some(t) if t.is_code() && (t.upper == "DISTINCT" || t.upper == "ALL") => 1,
        _ => 0,
    }
}

/// Whether the outermost statement already limits its rows
fn has_row_cap(tokens: &[Token]) -> bool {
    let top = tokens
        .get(top_anchor(tokens) + 1)
        .is_some_and(|t| t.is_code() && t.upper == "TOP");

    top || tokens
        .iter()
        .any(|t| t.is_code() && ROW_LIMIT_TOKENS.contains(&t.upper.as_str()))
}

/// Identifier-like token with its byte span in the original text
#[derive(Debug)]
struct Token {
    upper: String,
    end: usize,
    /// Parenthesis nesting level
    depth: usize,
    /// Inside a string literal or quoted identifier
    quoted: bool,
}

impl Token {
    /// Outermost, unquoted SQL word
    fn is_code(&self) -> bool {
        self.depth == 0 && !self.quoted
    }
}

/// Closing delimiter for a quote opened by `ch`
fn closing_quote(ch: char) -> Option<char> {
    match ch {
        '\'' => Some('\''),
        '"' => Some('"'),
        '`' => Some('`'),
        '[' => Some(']'),
        _ => None,
    }
}

fn tokenize(query: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for (idx, ch) in query.char_indices() {
        let is_word = ch.is_alphanumeric() || ch == '_';
        if let (false, Some(s)) = (is_word, start) {
            tokens.push(Token {
                upper: query[s..idx].to_uppercase(),
                end: idx,
                depth,
                quoted: quote.is_some(),
            });
            start = None;
        }
        if is_word {
            start.get_or_insert(idx);
            continue;
        }

        match quote {
            Some(close) if ch == close => quote = None,
            Some(_) => {}
            None => match ch {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ => quote = closing_quote(ch),
            },
        }
    }
    if let Some(s) = start {
        tokens.push(Token {
            upper: query[s..].to_uppercase(),
            end: query.len(),
            depth,
            quoted: quote.is_some(),
        });
    }
    tokens
}

/// Remove `-- line` and `/* block */` comments outside quotes
fn strip_comments(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        if let Some(close) = quote {
            if ch == close {
                quote = None;
            }
            out.push(ch);
            continue;
        }

        match (ch, chars.peek()) {
            ('-', Some('-')) => {
                // Keep the newline so the surrounding words stay apart
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut previous = '\0';
                for c in chars.by_ref() {
                    if previous == '*' && c == '/' {
                        break;
                    }
                    previous = c;
                }
                out.push(' ');
            }
            _ => {
                quote = closing_quote(ch);
                out.push(ch);
            }
        }
    }
    out
}

fn strip_trailing_semicolons(query: &str) -> &str {
    query.trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}
