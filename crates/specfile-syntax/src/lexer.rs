//! # Lexer - Tokenizing Option Strings
//!
//! Recipe directives (`%setup`, `%patch`, ...) and section headers carry
//! option strings with popt-like rules: whitespace separates words, single
//! and double quotes group text, a backslash escapes the next character and
//! macro references such as `%{name}-%{version}` are atomic, even when they
//! contain whitespace.
//!
//! ## The Lossless Guarantee
//!
//! Every byte of the input appears in exactly one token. Each [`Token`] keeps
//! both its raw text and its decoded value, so concatenating the raw texts
//! gives back the original string:
//!
//! ```
//! use specfile_syntax::lexer::tokenize;
//!
//! let input = r#"-q  -n "my dir" %{?with_x:-a 1}"#;
//! let tokens = tokenize(input).unwrap();
//! let reconstructed: String = tokens.iter().map(|t| t.raw()).collect();
//! assert_eq!(input, reconstructed);
//! ```
//!
//! The raw Logos fragments are merged into words afterwards: `%{name}`,
//! `-` and `%{version}` lex separately but form one word.

use logos::{Lexer, Logos};

use crate::options::OptionsError;

/// Fragments produced by the Logos lexer, before adjacent word pieces are
/// merged.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
enum Fragment {
    #[regex(r"\s+")]
    Whitespace,

    #[regex(r"'([^'\\]|\\(.|\n))*'")]
    SingleQuoted,

    #[regex(r#""([^"\\]|\\(.|\n))*""#)]
    DoubleQuoted,

    /// Plain characters and backslash escapes
    #[regex(r#"([^\s'"\\%]|\\(.|\n))+"#)]
    Text,

    #[token("%%")]
    EscapedPercent,

    /// `%` starting an unbracketed macro reference like `%name`
    #[token("%")]
    Percent,

    /// A bracketed macro reference, consumed up to its matching bracket
    #[token("%{", balanced)]
    #[token("%(", balanced)]
    #[token("%[", balanced)]
    Macro,
}

/// Consumes the remainder of a bracketed macro reference.
fn balanced(lex: &mut Lexer<Fragment>) -> bool {
    let (open, close) = match lex.slice().as_bytes()[1] {
        b'{' => (b'{', b'}'),
        b'(' => (b'(', b')'),
        _ => (b'[', b']'),
    };
    let bytes = lex.remainder().as_bytes();
    let mut depth = 1usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    lex.bump(i + 1);
                    return true;
                }
            }
            _ => {}
        }
        i += 1;
    }
    false
}

/// Kinds of tokens in an option string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    /// Unquoted word, possibly containing escapes and macro references
    Word,
    SingleQuoted,
    DoubleQuoted,
}

/// A token with its raw text and decoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    kind: TokenKind,
    raw: String,
    value: String,
}

impl Token {
    pub fn whitespace(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            kind: TokenKind::Whitespace,
            raw: text.clone(),
            value: text,
        }
    }

    /// Creates an unquoted word, escaping quotes, whitespace and backslashes.
    pub fn word(value: impl Into<String>) -> Self {
        let value = value.into();
        let mut raw = String::with_capacity(value.len());
        for c in value.chars() {
            if c == '\'' || c == '"' || c == '\\' || c.is_whitespace() {
                raw.push('\\');
            }
            raw.push(c);
        }
        Self {
            kind: TokenKind::Word,
            raw,
            value,
        }
    }

    /// Creates a quoted token. `kind` must be one of the quoted kinds.
    pub fn quoted(kind: TokenKind, value: impl Into<String>) -> Self {
        let value = value.into();
        let quote = match kind {
            TokenKind::SingleQuoted => '\'',
            _ => '"',
        };
        let mut raw = String::with_capacity(value.len() + 2);
        raw.push(quote);
        for c in value.chars() {
            if c == quote {
                raw.push('\\');
            }
            raw.push(c);
        }
        raw.push(quote);
        Self {
            kind: if quote == '\'' {
                TokenKind::SingleQuoted
            } else {
                TokenKind::DoubleQuoted
            },
            raw,
            value,
        }
    }

    /// Creates a word, or a double-quoted token when the value contains
    /// whitespace.
    pub fn for_value(value: impl Into<String>) -> Self {
        let value = value.into();
        if needs_quoting(&value) {
            Self::quoted(TokenKind::DoubleQuoted, value)
        } else {
            Self::word(value)
        }
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Text exactly as it appears in the option string.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Value with quotes and escapes removed. Macro references are kept
    /// verbatim.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_whitespace(&self) -> bool {
        self.kind == TokenKind::Whitespace
    }

    pub fn is_quoted(&self) -> bool {
        matches!(self.kind, TokenKind::SingleQuoted | TokenKind::DoubleQuoted)
    }
}

/// Whether a value has to be quoted to survive as a single token.
pub fn needs_quoting(value: &str) -> bool {
    value.chars().any(char::is_whitespace)
}

fn unescape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape_quoted(raw: &str, quote: char) -> String {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) if next == quote => out.push(next),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Tokenize an option string.
///
/// Fails on an unclosed quote, a trailing backslash or an unterminated
/// bracketed macro reference.
pub fn tokenize(input: &str) -> Result<Vec<Token>, OptionsError> {
    let mut tokens = Vec::new();
    let mut word: Option<(String, String)> = None;
    let mut lexer = Fragment::lexer(input);

    fn flush(tokens: &mut Vec<Token>, word: &mut Option<(String, String)>) {
        if let Some((raw, value)) = word.take() {
            tokens.push(Token {
                kind: TokenKind::Word,
                raw,
                value,
            });
        }
    }

    while let Some(result) = lexer.next() {
        let text = lexer.slice();
        let fragment = result.map_err(|()| match text.chars().next() {
            Some('\'' | '"') => OptionsError::UnclosedQuote,
            Some('\\') => OptionsError::TrailingBackslash,
            _ => OptionsError::UnterminatedMacro,
        })?;
        match fragment {
            Fragment::Whitespace => {
                flush(&mut tokens, &mut word);
                tokens.push(Token::whitespace(text));
            }
            Fragment::SingleQuoted => {
                flush(&mut tokens, &mut word);
                tokens.push(Token {
                    kind: TokenKind::SingleQuoted,
                    raw: text.to_string(),
                    value: unescape_quoted(text, '\''),
                });
            }
            Fragment::DoubleQuoted => {
                flush(&mut tokens, &mut word);
                tokens.push(Token {
                    kind: TokenKind::DoubleQuoted,
                    raw: text.to_string(),
                    value: unescape_quoted(text, '"'),
                });
            }
            Fragment::Text => {
                let (raw, value) = word.get_or_insert_with(Default::default);
                raw.push_str(text);
                value.push_str(&unescape_text(text));
            }
            Fragment::EscapedPercent | Fragment::Percent | Fragment::Macro => {
                let (raw, value) = word.get_or_insert_with(Default::default);
                raw.push_str(text);
                value.push_str(text);
            }
        }
    }
    flush(&mut tokens, &mut word);

    Ok(tokens)
}
