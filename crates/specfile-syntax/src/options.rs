//! Getopt-style view over a tokenized option string.
//!
//! An optstring lists the recognized option characters; a character followed
//! by `:` takes an argument, either attached (`-p1`) or as the next word
//! (`-p 1`). Edits touch as few tokens as possible so the rest of the string
//! keeps its original spelling.

use std::fmt;

use crate::lexer::{Token, needs_quoting, tokenize};

/// Errors from tokenizing or editing an option string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    #[error("No closing quotation")]
    UnclosedQuote,

    #[error("No escaped character")]
    TrailingBackslash,

    #[error("Unterminated macro reference in option string")]
    UnterminatedMacro,

    #[error("Unrecognized option -{0}")]
    UnknownOption(char),

    #[error("Option -{0} requires an argument")]
    MissingArgument(char),

    #[error("Option -{0} is a flag")]
    NotAnArgumentOption(char),
}

/// Value of an option present in the string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Flag,
    Number(u64),
    Text(String),
}

impl OptionValue {
    fn from_argument(value: &str) -> Self {
        if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = value.parse() {
                return OptionValue::Number(n);
            }
        }
        OptionValue::Text(value.to_string())
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Flag => Ok(()),
            OptionValue::Number(n) => write!(f, "{n}"),
            OptionValue::Text(s) => f.write_str(s),
        }
    }
}

/// Where an option was found in the token list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Found {
    /// `-q`, or a cluster of flags like `-qc`
    Flag(usize),
    /// `-p1`
    Attached(usize),
    /// `-p 1`, with the index of the argument token
    Separate(usize, usize),
    /// `-p` with no argument following
    Missing(usize),
}

impl Found {
    fn option_index(self) -> usize {
        match self {
            Found::Flag(i) | Found::Attached(i) | Found::Separate(i, _) | Found::Missing(i) => i,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    tokens: Vec<Token>,
    optstring: String,
}

impl Options {
    /// Tokenize `input` and interpret it against `optstring`.
    pub fn parse(input: &str, optstring: &str) -> Result<Self, OptionsError> {
        Ok(Self {
            tokens: tokenize(input)?,
            optstring: optstring.to_string(),
        })
    }

    pub fn empty(optstring: &str) -> Self {
        Self {
            tokens: Vec::new(),
            optstring: optstring.to_string(),
        }
    }

    pub fn optstring(&self) -> &str {
        &self.optstring
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn is_known(&self, option: char) -> bool {
        option != ':' && self.optstring.contains(option)
    }

    pub fn requires_argument(&self, option: char) -> bool {
        let mut chars = self.optstring.chars().peekable();
        while let Some(c) = chars.next() {
            if c == option {
                return chars.peek() == Some(&':');
            }
        }
        false
    }

    /// Rejects options that require an argument but have none.
    pub fn validate(&self) -> Result<(), OptionsError> {
        for (i, token) in self.tokens.iter().enumerate() {
            if token.is_quoted() {
                continue;
            }
            let value = token.value();
            let mut chars = value.chars();
            if chars.next() != Some('-') {
                continue;
            }
            let Some(option) = chars.next() else {
                continue;
            };
            if chars.next().is_none()
                && self.is_known(option)
                && self.requires_argument(option)
                && self.argument_after(i).is_none()
            {
                return Err(OptionsError::MissingArgument(option));
            }
        }
        Ok(())
    }

    fn next_word(&self, i: usize) -> Option<usize> {
        let mut j = i + 1;
        if self.tokens.get(j).is_some_and(Token::is_whitespace) {
            j += 1;
        }
        (j < self.tokens.len()).then_some(j)
    }

    fn argument_after(&self, i: usize) -> Option<usize> {
        self.next_word(i).filter(|&j| {
            let token = &self.tokens[j];
            token.is_quoted() || !token.value().starts_with('-')
        })
    }

    fn is_flag_cluster(&self, letters: &str) -> bool {
        letters.len() > 1
            && letters
                .chars()
                .all(|c| self.is_known(c) && !self.requires_argument(c))
    }

    fn find(&self, option: char) -> Option<Found> {
        for (i, token) in self.tokens.iter().enumerate().rev() {
            if token.is_whitespace() || token.is_quoted() {
                continue;
            }
            let Some(letters) = token.value().strip_prefix('-') else {
                continue;
            };
            if self.requires_argument(option) {
                let Some(rest) = letters.strip_prefix(option) else {
                    continue;
                };
                if !rest.is_empty() {
                    return Some(Found::Attached(i));
                }
                return Some(match self.argument_after(i) {
                    Some(j) => Found::Separate(i, j),
                    None => Found::Missing(i),
                });
            }
            if letters.len() == option.len_utf8() && letters.starts_with(option) {
                return Some(Found::Flag(i));
            }
            if self.is_flag_cluster(letters) && letters.contains(option) {
                return Some(Found::Flag(i));
            }
        }
        None
    }

    /// Whether `option` appears in the string.
    pub fn has(&self, option: char) -> bool {
        self.is_known(option) && self.find(option).is_some()
    }

    /// Value of the last occurrence of `option`.
    pub fn get(&self, option: char) -> Option<OptionValue> {
        if !self.is_known(option) {
            return None;
        }
        match self.find(option)? {
            Found::Flag(_) => Some(OptionValue::Flag),
            Found::Attached(i) => {
                let value = self.tokens[i].value();
                let start = 1 + option.len_utf8();
                Some(OptionValue::from_argument(&value[start..]))
            }
            Found::Separate(_, j) => Some(OptionValue::from_argument(self.tokens[j].value())),
            Found::Missing(_) => None,
        }
    }

    pub fn flag(&self, option: char) -> bool {
        matches!(self.get(option), Some(OptionValue::Flag))
    }

    pub fn number(&self, option: char) -> Option<u64> {
        match self.get(option)? {
            OptionValue::Number(n) => Some(n),
            _ => None,
        }
    }

    /// Argument of `option` as text, numeric arguments included.
    pub fn text(&self, option: char) -> Option<String> {
        match self.get(option)? {
            OptionValue::Flag => None,
            other => Some(other.to_string()),
        }
    }

    /// Options present, in optstring order.
    pub fn present(&self) -> Vec<char> {
        self.optstring
            .chars()
            .filter(|&c| c != ':' && self.find(c).is_some())
            .collect()
    }

    fn append(&mut self, tokens: impl IntoIterator<Item = Token>) {
        if !self.tokens.is_empty() && !self.tokens.last().is_some_and(Token::is_whitespace) {
            self.tokens.push(Token::whitespace(" "));
        }
        self.tokens.extend(tokens);
    }

    /// Add or remove a flag.
    pub fn set_flag(&mut self, option: char, on: bool) -> Result<(), OptionsError> {
        if !self.is_known(option) {
            return Err(OptionsError::UnknownOption(option));
        }
        if self.requires_argument(option) {
            return Err(OptionsError::MissingArgument(option));
        }
        match (on, self.find(option)) {
            (true, None) => self.append([Token::word(format!("-{option}"))]),
            (false, Some(_)) => {
                self.remove(option);
            }
            _ => {}
        }
        Ok(())
    }

    /// Set a textual argument, rewriting only the tokens of that option.
    pub fn set_text(&mut self, option: char, value: &str) -> Result<(), OptionsError> {
        self.set_argument(option, value, false)
    }

    /// Set a numeric argument. New options use the attached form (`-p1`).
    pub fn set_number(&mut self, option: char, value: u64) -> Result<(), OptionsError> {
        self.set_argument(option, &value.to_string(), true)
    }

    fn set_argument(&mut self, option: char, value: &str, numeric: bool) -> Result<(), OptionsError> {
        if !self.is_known(option) {
            return Err(OptionsError::UnknownOption(option));
        }
        if !self.requires_argument(option) {
            return Err(OptionsError::NotAnArgumentOption(option));
        }
        match self.find(option) {
            None if numeric => self.append([Token::word(format!("-{option}{value}"))]),
            None => self.append([
                Token::word(format!("-{option}")),
                Token::whitespace(" "),
                Token::for_value(value),
            ]),
            Some(Found::Separate(_, j)) => {
                let replacement = if needs_quoting(value) && self.tokens[j].is_quoted() {
                    Token::quoted(self.tokens[j].kind(), value)
                } else {
                    Token::for_value(value)
                };
                self.tokens[j] = replacement;
            }
            Some(Found::Attached(i)) => {
                if needs_quoting(value) {
                    self.tokens[i] = Token::word(format!("-{option}"));
                    self.tokens
                        .splice(i + 1..i + 1, [Token::whitespace(" "), Token::for_value(value)]);
                } else {
                    self.tokens[i] = Token::word(format!("-{option}{value}"));
                }
            }
            Some(Found::Missing(i)) => {
                self.tokens
                    .splice(i + 1..i + 1, [Token::whitespace(" "), Token::for_value(value)]);
            }
            Some(Found::Flag(_)) => return Err(OptionsError::NotAnArgumentOption(option)),
        }
        Ok(())
    }

    /// Remove the last occurrence of `option` along with its argument and
    /// the whitespace separating it from its neighbours.
    pub fn remove(&mut self, option: char) -> bool {
        if !self.is_known(option) {
            return false;
        }
        let Some(found) = self.find(option) else {
            return false;
        };
        let mut i = found.option_index();
        if let Found::Flag(_) = found {
            let letters = self.tokens[i].value()[1..].to_string();
            if letters.chars().count() > 1 {
                let rest: String = letters.chars().filter(|&c| c != option).collect();
                self.tokens[i] = Token::word(format!("-{rest}"));
                return true;
            }
        }
        let mut j = match found {
            Found::Separate(_, j) => j,
            _ => i,
        };
        if i == 0 {
            if self.tokens.get(j + 1).is_some_and(Token::is_whitespace) {
                j += 1;
            }
        } else if self.tokens[i - 1].is_whitespace() {
            i -= 1;
        }
        self.tokens.drain(i..=j);
        true
    }

    fn positional_indices(&self) -> Vec<usize> {
        let mut result = Vec::new();
        let mut i = 0;
        while i < self.tokens.len() {
            let token = &self.tokens[i];
            if token.is_whitespace() {
                i += 1;
                continue;
            }
            if !token.is_quoted() && token.value().starts_with('-') {
                let mut chars = token.value().chars().skip(1);
                i += 1;
                if let (Some(option), None) = (chars.next(), chars.next()) {
                    if self.is_known(option) && self.requires_argument(option) {
                        if self.tokens.get(i).is_some_and(Token::is_whitespace) {
                            i += 1;
                        }
                        i += 1;
                    }
                }
                continue;
            }
            result.push(i);
            i += 1;
        }
        result
    }

    /// Positional arguments in order.
    pub fn positionals(&self) -> Vec<String> {
        self.positional_indices()
            .into_iter()
            .map(|i| self.tokens[i].value().to_string())
            .collect()
    }

    pub fn push_positional(&mut self, value: &str) {
        self.append([Token::for_value(value)]);
    }

    /// Remove the positional at `index`. Returns false when out of range.
    pub fn remove_positional(&mut self, index: usize) -> bool {
        let Some(&at) = self.positional_indices().get(index) else {
            return false;
        };
        if at == 0 {
            let end = if self.tokens.get(1).is_some_and(Token::is_whitespace) {
                1
            } else {
                0
            };
            self.tokens.drain(0..=end);
        } else if self.tokens[at - 1].is_whitespace() {
            self.tokens.drain(at - 1..=at);
        } else {
            self.tokens.remove(at);
        }
        true
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            f.write_str(token.raw())?;
        }
        Ok(())
    }
}
