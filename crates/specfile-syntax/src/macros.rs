//! Macro reference scanning.
//!
//! [`parse_value`] splits a string into literal text and macro references the
//! way the packaging tool's macro expander walks its input, without expanding
//! anything. [`count_brackets`] reports how many `{` and `(` are still open at
//! the end of a string, which decides whether a tag value or macro body
//! continues on the next line.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Unterminated macro reference")]
pub struct UnterminatedMacro;

/// A piece of a scanned value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroNode {
    Literal(String),
    /// `%%`
    Percent,
    /// `%name`, `%?name`, `%!?name`
    Substitution { prefix: String, name: String },
    /// `%{name}`, `%{?name}`, `%{name arg1 arg2}`
    Enclosed {
        prefix: String,
        name: String,
        args: Vec<String>,
    },
    /// `%{?name:body}`, `%{!?name:body}`
    Conditional {
        prefix: String,
        name: String,
        body: Vec<MacroNode>,
    },
    /// `%{expand:body}`, `%{lower:body}`, ...
    Builtin { name: String, body: String },
    /// `%(command)`
    Shell(String),
    /// `%[expression]`
    Expression(String),
}

impl MacroNode {
    /// Whether a `?` in the prefix makes this reference conditional on the
    /// macro being defined.
    pub fn is_conditional(prefix: &str) -> bool {
        prefix.contains('?')
    }

    /// Whether a `!` in the prefix negates the condition.
    pub fn is_negated(prefix: &str) -> bool {
        prefix.contains('!')
    }
}

fn write_nodes(f: &mut fmt::Formatter<'_>, nodes: &[MacroNode]) -> fmt::Result {
    for node in nodes {
        write!(f, "{node}")?;
    }
    Ok(())
}

impl fmt::Display for MacroNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacroNode::Literal(s) => f.write_str(s),
            MacroNode::Percent => f.write_str("%%"),
            MacroNode::Substitution { prefix, name } => write!(f, "%{prefix}{name}"),
            MacroNode::Enclosed { prefix, name, args } => {
                write!(f, "%{{{prefix}{name}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                f.write_str("}")
            }
            MacroNode::Conditional { prefix, name, body } => {
                write!(f, "%{{{prefix}{name}:")?;
                write_nodes(f, body)?;
                f.write_str("}")
            }
            MacroNode::Builtin { name, body } => write!(f, "%{{{name}:{body}}}"),
            MacroNode::Shell(body) => write!(f, "%({body})"),
            MacroNode::Expression(body) => write!(f, "%[{body}]"),
        }
    }
}

fn split_prefix(s: &str) -> (String, String) {
    let end = s.find(|c| c != '?' && c != '!').unwrap_or(s.len());
    (s[..end].to_string(), s[end..].to_string())
}

fn closing(open: char) -> Option<char> {
    match open {
        '(' => Some(')'),
        '{' => Some('}'),
        '[' => Some(']'),
        _ => None,
    }
}

/// Byte offset just past the bracket matching the one at `start`.
fn find_matching_bracket(value: &str, start: usize) -> Option<usize> {
    let open = value[start..].chars().next()?;
    let close = closing(open)?;
    let mut level = 0i32;
    for (offset, c) in value[start..].char_indices() {
        if c == '\\' {
            continue;
        }
        if c == close {
            level -= 1;
            if level <= 0 {
                return Some(start + offset + 1);
            }
        } else if c == open {
            level += 1;
        }
    }
    None
}

/// Byte offset just past the macro reference whose body begins at `start`
/// (the character after `%`).
pub fn find_macro_end(value: &str, start: usize) -> Option<usize> {
    let rest = &value[start..];
    let first = rest.chars().next()?;
    if closing(first).is_some() {
        return find_matching_bracket(value, start);
    }
    let bytes = value.as_bytes();
    let mut i = start;
    while i < bytes.len() && (bytes[i] == b'?' || bytes[i] == b'!') {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'-' {
        i += 1;
    }
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    if value[i..].starts_with("**") {
        i += 2;
    } else if i < bytes.len() && (bytes[i] == b'*' || bytes[i] == b'#') {
        i += 1;
    }
    Some(i)
}

/// Scan `value` into literal text and macro references.
pub fn parse_value(value: &str) -> Result<Vec<MacroNode>, UnterminatedMacro> {
    let mut result = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    while i < value.len() {
        let Some(offset) = value[i..].find('%') else {
            literal.push_str(&value[i..]);
            break;
        };
        let percent = i + offset;
        literal.push_str(&value[i..percent]);
        let after = percent + 1;
        match value[after..].chars().next() {
            None => return Err(UnterminatedMacro),
            Some('%') => {
                if !literal.is_empty() {
                    result.push(MacroNode::Literal(std::mem::take(&mut literal)));
                }
                result.push(MacroNode::Percent);
                i = after + 1;
                continue;
            }
            Some(_) => {}
        }
        if !literal.is_empty() {
            result.push(MacroNode::Literal(std::mem::take(&mut literal)));
        }
        let end = find_macro_end(value, after).ok_or(UnterminatedMacro)?;
        let node = match value[after..].chars().next() {
            Some('(') => MacroNode::Shell(value[after + 1..end - 1].to_string()),
            Some('[') => MacroNode::Expression(value[after + 1..end - 1].to_string()),
            Some('{') => {
                let inner = &value[after + 1..end - 1];
                match inner.split_once(':') {
                    Some((condition, body)) => {
                        let (prefix, name) = split_prefix(condition);
                        if MacroNode::is_conditional(&prefix) {
                            MacroNode::Conditional {
                                prefix,
                                name,
                                body: parse_value(body)?,
                            }
                        } else {
                            MacroNode::Builtin {
                                name,
                                body: body.to_string(),
                            }
                        }
                    }
                    None => {
                        let (prefix, rest) = split_prefix(inner);
                        let mut words = rest.split_whitespace().map(str::to_string);
                        MacroNode::Enclosed {
                            prefix,
                            name: words.next().unwrap_or_default(),
                            args: words.collect(),
                        }
                    }
                }
            }
            _ => {
                let (prefix, name) = split_prefix(&value[after..end]);
                MacroNode::Substitution { prefix, name }
            }
        };
        result.push(node);
        i = end;
    }
    if !literal.is_empty() {
        result.push(MacroNode::Literal(literal));
    }
    Ok(result)
}

/// Net number of unclosed `{` and `(` in `s`. Escaped brackets and `%%` are
/// ignored.
pub fn count_brackets(s: &str) -> (i32, i32) {
    let mut braces = 0;
    let mut parens = 0;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek().is_some_and(|n| "{}%()".contains(*n)) => {
                chars.next();
            }
            '%' if chars.peek() == Some(&'%') => {
                chars.next();
            }
            '{' => braces += 1,
            '}' => braces -= 1,
            '(' => parens += 1,
            ')' => parens -= 1,
            _ => {}
        }
    }
    (braces, parens)
}

/// Whether a line continues onto the next one, either through a trailing
/// backslash or an unclosed bracket.
pub fn continues(s: &str) -> bool {
    let (braces, parens) = count_brackets(s);
    braces > 0 || parens > 0 || s.ends_with('\\')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn literal(s: &str) -> MacroNode {
        MacroNode::Literal(s.to_string())
    }

    #[test]
    fn literal_only() {
        assert_eq!(parse_value("plain text").unwrap(), vec![literal("plain text")]);
    }

    #[test]
    fn substitutions_and_enclosed() {
        assert_eq!(
            parse_value("%name-%{?dist}").unwrap(),
            vec![
                MacroNode::Substitution {
                    prefix: String::new(),
                    name: "name".to_string()
                },
                literal("-"),
                MacroNode::Enclosed {
                    prefix: "?".to_string(),
                    name: "dist".to_string(),
                    args: vec![]
                },
            ]
        );
    }

    #[test]
    fn conditional_with_nested_body() {
        assert_eq!(
            parse_value("%{?epoch:%{epoch}:}").unwrap(),
            vec![MacroNode::Conditional {
                prefix: "?".to_string(),
                name: "epoch".to_string(),
                body: vec![
                    MacroNode::Enclosed {
                        prefix: String::new(),
                        name: "epoch".to_string(),
                        args: vec![]
                    },
                    literal(":"),
                ],
            }]
        );
    }

    #[test]
    fn builtins_shell_and_expressions() {
        assert_eq!(
            parse_value("%{expand:%x} %(echo hi) %[1+1]").unwrap(),
            vec![
                MacroNode::Builtin {
                    name: "expand".to_string(),
                    body: "%x".to_string()
                },
                literal(" "),
                MacroNode::Shell("echo hi".to_string()),
                literal(" "),
                MacroNode::Expression("1+1".to_string()),
            ]
        );
    }

    #[test]
    fn escaped_percent() {
        assert_eq!(
            parse_value("100%% sure").unwrap(),
            vec![literal("100"), MacroNode::Percent, literal(" sure")]
        );
    }

    #[rstest]
    #[case("%{name")]
    #[case("trailing %")]
    #[case("%(echo")]
    fn unterminated(#[case] input: &str) {
        assert_eq!(parse_value(input), Err(UnterminatedMacro));
    }

    #[rstest]
    #[case("%{name}-%{version}")]
    #[case("%{?with_docs:--enable-docs} %{!?rhel:x}")]
    #[case("%%global %{expand:%%{name}}")]
    fn display_reproduces_input(#[case] input: &str) {
        let rendered: String = parse_value(input)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(rendered, input);
    }

    #[rstest]
    #[case("plain", (0, 0))]
    #[case("%{expand:", (1, 0))]
    #[case("%(echo (a)", (0, 1))]
    #[case("%{x} \\{", (0, 0))]
    #[case("%%{", (1, 0))]
    fn bracket_counts(#[case] input: &str, #[case] expected: (i32, i32)) {
        assert_eq!(count_brackets(input), expected);
    }

    #[test]
    fn continuation() {
        assert!(continues("foo \\"));
        assert!(continues("%{lua:"));
        assert!(!continues("%{name}"));
    }
}
