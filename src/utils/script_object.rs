//! Recovers configuration objects that pages assign to the global scope from
//! inline scripts, e.g.
//!
//! ```js
//! window.masterPlaylist = {
//!     params: { 'token': 'abc', 'expires': '1700000000', },
//!     url: 'https://vixcloud.co/playlist/1?b=1',
//! }
//! window.canPlayFHD = true
//! ```
//!
//! Values are JavaScript object literals, so each one goes through a small
//! token based repair pipeline before being parsed as JSON.

use std::{ops::Range, sync::OnceLock};

use indexmap::IndexMap;
use regex::Regex;
use scraper::Selector;
use serde_json::{Map, Value};
use strum_macros::Display;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("no script containing '{marker}' found")]
    NotFound { marker: String },
    #[error("malformed script object{}: {reason}", .identifier.as_ref().map(|id| format!(" '{id}'")).unwrap_or_default())]
    Malformed {
        identifier: Option<String>,
        reason: String,
    },
}

/// Text of the first `<script>` whose inline source contains `marker`.
pub fn extract_named_script(document: &scraper::Html, marker: &str) -> Result<String, ScriptError> {
    static SCRIPT_SELECTOR: OnceLock<Selector> = OnceLock::new();

    document
        .select(SCRIPT_SELECTOR.get_or_init(|| Selector::parse("script").unwrap()))
        .map(|el| el.text().collect::<String>())
        .find(|script| script.contains(marker))
        .ok_or_else(|| ScriptError::NotFound {
            marker: marker.to_owned(),
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawScriptAssignment {
    pub identifier: String,
    pub value: String,
}

fn assignment_regex() -> &'static Regex {
    static ASSIGNMENT_RE: OnceLock<Regex> = OnceLock::new();
    ASSIGNMENT_RE.get_or_init(|| {
        Regex::new(
            r#"\b(?:window|globalThis|global)\s*(?:\.\s*(?<dot>[A-Za-z_$][\w$]*)|\[\s*['"](?<index>[^'"\]]+)['"]\s*\])\s*="#,
        )
        .unwrap()
    })
}

/// Byte ranges of string literals, quotes included. An unterminated literal
/// runs to the end of the text.
fn string_literal_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = vec![];
    let mut chars = text.char_indices();

    while let Some((start, quote)) = chars.next() {
        if !matches!(quote, '"' | '\'' | '`') {
            continue;
        }

        let mut end = text.len();
        while let Some((idx, c)) = chars.next() {
            if c == '\\' {
                chars.next();
            } else if c == quote {
                end = idx + c.len_utf8();
                break;
            }
        }
        spans.push(start..end);
    }

    spans
}

/// Splits a script at every global assignment and pairs each identifier with
/// the text up to the next assignment. Text before the first one is dropped,
/// and assignments quoted inside string literals are not boundaries.
pub fn scan_assignments(script: &str) -> Vec<RawScriptAssignment> {
    let literals = string_literal_spans(script);

    let matches: Vec<_> = assignment_regex()
        .captures_iter(script)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            if literals.iter().any(|span| span.contains(&whole.start())) {
                return None;
            }
            // `window.x == y` is a comparison
            if script[whole.end()..].starts_with('=') {
                return None;
            }
            let identifier = caps.name("dot").or_else(|| caps.name("index"))?.as_str();
            Some((identifier.to_owned(), whole.start(), whole.end()))
        })
        .collect();

    matches
        .iter()
        .enumerate()
        .map(|(idx, (identifier, _, value_start))| {
            let value_end = matches
                .get(idx + 1)
                .map(|(_, start, _)| *start)
                .unwrap_or(script.len());

            RawScriptAssignment {
                identifier: identifier.clone(),
                value: script[*value_start..value_end].to_owned(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str {
        quote: char,
        body: String,
        closed: bool,
    },
    Word(String),
    Space(String),
    Punct(char),
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = vec![];
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' | '\'' | '`' => {
                let mut body = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == '\\' {
                        body.push(c);
                        if let Some(escaped) = chars.next() {
                            body.push(escaped);
                        }
                    } else if c == ch {
                        closed = true;
                        break;
                    } else {
                        body.push(c);
                    }
                }
                tokens.push(Token::Str {
                    quote: ch,
                    body,
                    closed,
                });
            }
            c if c.is_whitespace() => {
                let mut space = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !next.is_whitespace() {
                        break;
                    }
                    space.push(next);
                    chars.next();
                }
                tokens.push(Token::Space(space));
            }
            c if is_word_char(c) => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !is_word_char(next) {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
            c => tokens.push(Token::Punct(c)),
        }
    }

    tokens
}

fn render(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Str {
                quote,
                body,
                closed,
            } => {
                out.push(*quote);
                out.push_str(body);
                if *closed {
                    out.push(*quote);
                }
            }
            Token::Word(word) => out.push_str(word),
            Token::Space(space) => out.push_str(space),
            Token::Punct(ch) => out.push(*ch),
        }
    }
    out
}

fn prev_significant(tokens: &[Token], idx: usize) -> Option<&Token> {
    tokens[..idx]
        .iter()
        .rev()
        .find(|t| !matches!(t, Token::Space(_)))
}

fn next_significant(tokens: &[Token], idx: usize) -> Option<&Token> {
    tokens[idx + 1..]
        .iter()
        .find(|t| !matches!(t, Token::Space(_)))
}

/// Lexical fixes turning a JavaScript object literal into JSON. None of them
/// looks inside string literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RepairRule {
    /// Drops `;` statement terminators.
    StripTerminators,
    /// `{key: 1}` -> `{"key": 1}` for keys right after `{`, `[` or `,`.
    QuoteBareKeys,
    /// `[1, 2,]` -> `[1, 2]`
    StripTrailingCommas,
    /// Single quoted and template strings become double quoted.
    NormalizeQuotes,
}

impl RepairRule {
    pub const PIPELINE: [RepairRule; 4] = [
        RepairRule::StripTerminators,
        RepairRule::QuoteBareKeys,
        RepairRule::StripTrailingCommas,
        RepairRule::NormalizeQuotes,
    ];

    pub fn apply(self, text: &str) -> String {
        render(&self.apply_tokens(tokenize(text)))
    }

    fn apply_tokens(self, tokens: Vec<Token>) -> Vec<Token> {
        match self {
            RepairRule::StripTerminators => tokens
                .into_iter()
                .filter(|t| *t != Token::Punct(';'))
                .collect(),
            RepairRule::QuoteBareKeys => quote_bare_keys(tokens),
            RepairRule::StripTrailingCommas => strip_trailing_commas(tokens),
            RepairRule::NormalizeQuotes => tokens.into_iter().map(normalize_quotes).collect(),
        }
    }
}

fn quote_bare_keys(tokens: Vec<Token>) -> Vec<Token> {
    let keys: Vec<bool> = (0..tokens.len())
        .map(|idx| {
            matches!(tokens[idx], Token::Word(_))
                && matches!(
                    prev_significant(&tokens, idx),
                    Some(Token::Punct('{' | '[' | ','))
                )
                && matches!(next_significant(&tokens, idx), Some(Token::Punct(':')))
        })
        .collect();

    tokens
        .into_iter()
        .zip(keys)
        .map(|(token, is_key)| match token {
            Token::Word(word) if is_key => Token::Str {
                quote: '"',
                body: word,
                closed: true,
            },
            other => other,
        })
        .collect()
}

fn strip_trailing_commas(tokens: Vec<Token>) -> Vec<Token> {
    let trailing: Vec<bool> = (0..tokens.len())
        .map(|idx| {
            tokens[idx] == Token::Punct(',')
                && matches!(
                    next_significant(&tokens, idx),
                    Some(Token::Punct('}' | ']'))
                )
        })
        .collect();

    tokens
        .into_iter()
        .zip(trailing)
        .filter_map(|(token, is_trailing)| (!is_trailing).then_some(token))
        .collect()
}

fn normalize_quotes(token: Token) -> Token {
    let (quote, body, closed) = match token {
        Token::Str {
            quote,
            body,
            closed,
        } => (quote, body, closed),
        other => return other,
    };

    let mut normalized = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some('\'') => normalized.push('\''),
                Some(escaped) => {
                    normalized.push('\\');
                    normalized.push(escaped);
                }
                None => normalized.push('\\'),
            },
            '"' if quote != '"' => normalized.push_str("\\\""),
            '\n' => normalized.push_str("\\n"),
            '\r' => normalized.push_str("\\r"),
            '\t' => normalized.push_str("\\t"),
            c => normalized.push(c),
        }
    }

    Token::Str {
        quote: '"',
        body: normalized,
        closed,
    }
}

/// Runs every rule of [`RepairRule::PIPELINE`] in order and trims the result.
pub fn repair_value(raw: &str) -> String {
    let tokens = RepairRule::PIPELINE
        .iter()
        .fold(tokenize(raw), |tokens, rule| rule.apply_tokens(tokens));

    render(&tokens).trim().to_owned()
}

/// Identifier -> parsed value of every global assignment in a script, in
/// source order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RepairedObject(pub Map<String, Value>);

impl RepairedObject {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn lookup(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.0.get(*first)?, |value, key| value.get(key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn parse_assignments(script: &str) -> Result<RepairedObject, ScriptError> {
    let assignments = scan_assignments(script);
    if assignments.is_empty() {
        return Err(ScriptError::Malformed {
            identifier: None,
            reason: "no global assignments found".into(),
        });
    }

    // later assignments overwrite earlier ones but keep the first position
    let mut repaired: IndexMap<String, String> = IndexMap::new();
    for assignment in assignments {
        repaired.insert(assignment.identifier, repair_value(&assignment.value));
    }

    let entries: Vec<String> = repaired
        .iter()
        .map(|(identifier, value)| format!("{}: {value}", Value::from(identifier.as_str())))
        .collect();
    let json = format!("{{\n{}\n}}", entries.join(",\n"));

    serde_json::from_str::<Map<String, Value>>(&json)
        .map(RepairedObject)
        .map_err(|err| ScriptError::Malformed {
            identifier: repaired
                .iter()
                .find(|(_, value)| serde_json::from_str::<Value>(value).is_err())
                .map(|(identifier, _)| identifier.clone()),
            reason: err.to_string(),
        })
}
