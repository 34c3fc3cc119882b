use std::collections::BTreeMap;

use specfile_syntax::{MacroNode, Options, parse_value};

use super::context::MacroContext;
use super::expression;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpandError {
    #[error("Macro %{0} is not defined")]
    Undefined(String),

    #[error("Malformed macro reference in `{0}`")]
    Malformed(String),

    #[error("Macro expansion nested too deeply")]
    TooDeep,

    #[error("Unsupported macro construct `{0}`")]
    Unsupported(String),
}

/// Expands macro references against a [`MacroContext`].
pub trait MacroEvaluator {
    fn expand(&self, text: &str, context: &MacroContext) -> Result<String, ExpandError>;

    /// Expand a single macro by name.
    fn expand_name(&self, name: &str, context: &MacroContext) -> Result<String, ExpandError> {
        self.expand(&format!("%{{{name}}}"), context)
    }
}

/// Outcome of evaluating a conditional expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Indeterminate,
}

impl From<bool> for Truth {
    fn from(value: bool) -> Self {
        if value { Truth::True } else { Truth::False }
    }
}

/// Resolves an already expanded `%if` expression.
pub trait ConditionEvaluator {
    fn evaluate(&self, expression: &str, context: &MacroContext) -> Truth;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BasicConditionEvaluator;

impl ConditionEvaluator for BasicConditionEvaluator {
    fn evaluate(&self, expression: &str, _context: &MacroContext) -> Truth {
        match expression::evaluate(expression) {
            Ok(value) => value.is_true().into(),
            Err(err) => {
                log::debug!("Cannot evaluate `{expression}`: {err}");
                Truth::Indeterminate
            }
        }
    }
}

type Locals = BTreeMap<String, String>;

const MAX_DEPTH: usize = 64;

/// Expander for the common subset of the macro language.
///
/// Handles plain and conditional references, parametric macros (options and
/// positional arguments), `%[...]` expressions, `%{with ...}` and a handful
/// of string built-ins. Shell expansion and embedded scripting are reported
/// as [`ExpandError::Unsupported`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicEvaluator;

impl MacroEvaluator for BasicEvaluator {
    fn expand(&self, text: &str, context: &MacroContext) -> Result<String, ExpandError> {
        self.expand_text(text, context, &Locals::new(), 0)
    }
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

impl BasicEvaluator {
    fn expand_text(
        &self,
        text: &str,
        context: &MacroContext,
        locals: &Locals,
        depth: usize,
    ) -> Result<String, ExpandError> {
        if depth > MAX_DEPTH {
            return Err(ExpandError::TooDeep);
        }
        let nodes = parse_value(text).map_err(|_| ExpandError::Malformed(text.to_string()))?;
        self.expand_nodes(&nodes, context, locals, depth)
    }

    fn expand_nodes(
        &self,
        nodes: &[MacroNode],
        context: &MacroContext,
        locals: &Locals,
        depth: usize,
    ) -> Result<String, ExpandError> {
        let mut out = String::new();
        for node in nodes {
            match node {
                MacroNode::Literal(text) => out.push_str(text),
                MacroNode::Percent => out.push('%'),
                MacroNode::Substitution { prefix, name } if name.is_empty() => {
                    out.push('%');
                    out.push_str(prefix);
                }
                MacroNode::Substitution { prefix, name } => {
                    out.push_str(&self.reference(prefix, name, &[], context, locals, depth)?);
                }
                MacroNode::Enclosed { prefix, name, args } => {
                    out.push_str(&self.reference(prefix, name, args, context, locals, depth)?);
                }
                MacroNode::Conditional { prefix, name, body } => {
                    if self.is_defined(name, context, locals) != MacroNode::is_negated(prefix) {
                        out.push_str(&self.expand_nodes(body, context, locals, depth)?);
                    }
                }
                MacroNode::Builtin { name, body } => {
                    out.push_str(&self.builtin(name, body, context, locals, depth)?);
                }
                MacroNode::Shell(body) => {
                    return Err(ExpandError::Unsupported(format!("%({body})")));
                }
                MacroNode::Expression(body) => {
                    let expanded = self.expand_text(body, context, locals, depth + 1)?;
                    let value = expression::evaluate(&expanded)
                        .map_err(|err| ExpandError::Malformed(format!("%[{body}]: {err}")))?;
                    out.push_str(&value.to_string());
                }
            }
        }
        Ok(out)
    }

    fn is_defined(&self, name: &str, context: &MacroContext, locals: &Locals) -> bool {
        locals.contains_key(name) || context.is_defined(name)
    }

    fn reference(
        &self,
        prefix: &str,
        name: &str,
        args: &[String],
        context: &MacroContext,
        locals: &Locals,
        depth: usize,
    ) -> Result<String, ExpandError> {
        if MacroNode::is_conditional(prefix)
            && (MacroNode::is_negated(prefix) || !self.is_defined(name, context, locals))
        {
            return Ok(String::new());
        }
        if let [arg] = args {
            match name {
                "with" => return Ok(flag(context.is_defined(&format!("with_{arg}")))),
                "without" => return Ok(flag(!context.is_defined(&format!("with_{arg}")))),
                "defined" => return Ok(flag(self.is_defined(arg, context, locals))),
                "undefined" => return Ok(flag(!self.is_defined(arg, context, locals))),
                _ => {}
            }
        }
        if let Some(value) = locals.get(name) {
            return Ok(value.clone());
        }
        let value = context
            .lookup(name)
            .ok_or_else(|| ExpandError::Undefined(name.to_string()))?;
        match &value.params {
            Some(params) => {
                let locals = Self::bind_arguments(name, params, args)?;
                self.expand_text(&value.body, context, &locals, depth + 1)
            }
            None => self.expand_text(&value.body, context, locals, depth + 1),
        }
    }

    /// Locals of a parametric macro call: `%0`, `%1`..., `%*`, `%**`, `%#`,
    /// and `%{-x}`/`%{-x*}` for each option given.
    fn bind_arguments(name: &str, params: &str, args: &[String]) -> Result<Locals, ExpandError> {
        let joined = args.join(" ");
        let options = Options::parse(&joined, params)
            .map_err(|err| ExpandError::Malformed(format!("%{name} {joined}: {err}")))?;
        let mut locals = Locals::new();
        locals.insert("0".to_string(), name.to_string());
        for option in options.present() {
            match options.text(option) {
                Some(value) => {
                    locals.insert(format!("-{option}"), format!("-{option} {value}"));
                    locals.insert(format!("-{option}*"), value);
                }
                None => {
                    locals.insert(format!("-{option}"), format!("-{option}"));
                }
            }
        }
        let positionals = options.positionals();
        for (i, value) in positionals.iter().enumerate() {
            locals.insert((i + 1).to_string(), value.clone());
        }
        locals.insert("#".to_string(), positionals.len().to_string());
        locals.insert("*".to_string(), positionals.join(" "));
        locals.insert("**".to_string(), joined);
        Ok(locals)
    }

    fn builtin(
        &self,
        name: &str,
        body: &str,
        context: &MacroContext,
        locals: &Locals,
        depth: usize,
    ) -> Result<String, ExpandError> {
        let expanded = || self.expand_text(body, context, locals, depth + 1);
        Ok(match name {
            "expand" => self.expand_text(&expanded()?, context, locals, depth + 1)?,
            "quote" => expanded()?,
            "lower" => expanded()?.to_lowercase(),
            "upper" => expanded()?.to_uppercase(),
            "len" => expanded()?.chars().count().to_string(),
            "basename" => {
                let value = expanded()?;
                value.rsplit('/').next().unwrap_or_default().to_string()
            }
            "dirname" => {
                let value = expanded()?;
                match value.rfind('/') {
                    Some(0) => "/".to_string(),
                    Some(i) => value[..i].to_string(),
                    None => ".".to_string(),
                }
            }
            "suffix" => {
                let value = expanded()?;
                let base = value.rsplit('/').next().unwrap_or_default();
                base.rsplit_once('.').map(|(_, s)| s.to_string()).unwrap_or_default()
            }
            "shrink" => expanded()?.split_whitespace().collect::<Vec<_>>().join(" "),
            "echo" | "warn" | "error" | "verbose" => {
                expanded()?;
                String::new()
            }
            "defined" => flag(self.is_defined(body.trim(), context, locals)),
            "undefined" => flag(!self.is_defined(body.trim(), context, locals)),
            "lua" | "load" | "include" | "uncompress" | "getenv" => {
                return Err(ExpandError::Unsupported(format!("%{{{name}:...}}")));
            }
            _ => {
                // A user macro given its argument after a colon
                let args = vec![expanded()?];
                self.reference("", name, &args, context, locals, depth)?
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::MacroValue;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn context() -> MacroContext {
        let mut context = MacroContext::new();
        context.define_document("name", MacroValue::new("foo"));
        context.define_document("version", MacroValue::new("1.2"));
        context.define_document("fullname", MacroValue::new("%{name}-%{version}"));
        context.define_document("with_docs", MacroValue::new("1"));
        context.define_document(
            "greet",
            MacroValue::with_params("hello%{?-n: %{-n*}} %1 (%#)", "n:"),
        );
        context
    }

    #[rstest]
    #[case("%name", "foo")]
    #[case("%{fullname}.tar.gz", "foo-1.2.tar.gz")]
    #[case("0%{?fedora}", "0")]
    #[case("%{!?fedora:no fedora}", "no fedora")]
    #[case("%{?name:has name}", "has name")]
    #[case("%{!?name:x}", "")]
    #[case("%{with docs}/%{without docs}", "1/0")]
    #[case("%{upper:%name}", "FOO")]
    #[case("%{len:%version}", "3")]
    #[case("%{basename:/a/b/c.tar}", "c.tar")]
    #[case("%{dirname:/a/b/c.tar}", "/a/b")]
    #[case("%{expand:%%{name}}", "foo")]
    #[case("%[1 + 2]", "3")]
    #[case("100%%", "100%")]
    #[case("%{greet -n bob world}", "hello bob world (1)")]
    #[case("%{greet world}", "hello world (1)")]
    fn test_expand(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(BasicEvaluator.expand(input, &context()).unwrap(), expected);
    }

    #[rstest]
    #[case("%fedora", ExpandError::Undefined("fedora".to_string()))]
    #[case("%{rhel}", ExpandError::Undefined("rhel".to_string()))]
    #[case("%(uname -m)", ExpandError::Unsupported("%(uname -m)".to_string()))]
    #[case("%{name", ExpandError::Malformed("%{name".to_string()))]
    fn test_expand_errors(#[case] input: &str, #[case] expected: ExpandError) {
        assert_eq!(BasicEvaluator.expand(input, &context()), Err(expected));
    }

    #[test]
    fn test_recursive_definition_is_too_deep() {
        let mut context = MacroContext::new();
        context.define_document("loop", MacroValue::new("%loop"));

        assert_eq!(BasicEvaluator.expand("%loop", &context), Err(ExpandError::TooDeep));
    }

    #[test]
    fn test_expand_name() {
        assert_eq!(BasicEvaluator.expand_name("fullname", &context()).unwrap(), "foo-1.2");
    }

    #[rstest]
    #[case("038 >= 36", Truth::True)]
    #[case("030 >= 36", Truth::False)]
    #[case("fedora >= 36", Truth::Indeterminate)]
    fn test_condition_evaluator(#[case] input: &str, #[case] expected: Truth) {
        assert_eq!(BasicConditionEvaluator.evaluate(input, &MacroContext::new()), expected);
    }
}
