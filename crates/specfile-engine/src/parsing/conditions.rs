//! Conditional blocks and line validity.
//!
//! A single forward scan keeps a stack of open `%if` blocks. A line is live
//! when every block on the stack is in a true branch. Boolean conditions are
//! expanded with the [`MacroEvaluator`] and resolved by the
//! [`ConditionEvaluator`]; `%ifarch` and `%ifos` test list membership of the
//! expanded `_target_cpu` and `_target_os`.
//!
//! The full scan also registers what the document defines into the
//! [`MacroContext`] as it reaches each live line, so later conditions see
//! earlier definitions the way the build tool would.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use specfile_config::IndeterminatePolicy;
use specfile_syntax::macros::continues;

use crate::error::{EngineError, Result};
use crate::macros::{ConditionEvaluator, MacroContext, MacroEvaluator, MacroValue, Truth};
use crate::parsing::lines::{LineId, LineStore, Validity};
use crate::parsing::macro_definitions::{MacroDefinition, MacroDefinitions};
use crate::parsing::sections::{header_name, is_known_section};

static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<kwd>%(?:(?:el)?if(?:n?(?:arch|os))?|endif|else))(?:\s+(?P<expr>.*?))?\s*$")
        .expect("valid conditional directive regex")
});

static UNDEFINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*%undefine\s+(\w+)").expect("valid undefine regex"));

static BCOND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*%bcond(?:_(with|without))?\s+(\w+)(?:\s+(\S+))?").expect("valid bcond regex")
});

/// Preamble tags that define a macro of the same name.
static MACRO_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(name|version|release|epoch|summary|license|url)\s*:\s*(.*?)\s*$")
        .expect("valid macro tag regex")
});

static DEFINING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%(?:global|define|undefine|bcond(?:_with|_without)?|dnl)\b").expect("valid defining regex")
});

/// Findings that don't stop parsing but reduce confidence in the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A condition that could not be expanded or evaluated. The lines it
    /// guards were resolved by the configured policy.
    UnresolvedCondition {
        line: LineId,
        expression: String,
        reason: String,
    },
}

impl Diagnostic {
    pub fn line(&self) -> LineId {
        match self {
            Diagnostic::UnresolvedCondition { line, .. } => *line,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnresolvedCondition {
                expression, reason, ..
            } => write!(f, "Unresolved condition `{expression}`: {reason}"),
        }
    }
}

/// A conditional directive line: keyword and expression.
pub fn directive(line: &str) -> Option<(String, String)> {
    let caps = DIRECTIVE.captures(line)?;
    let keyword = caps.name("kwd")?.as_str().to_string();
    let expression = caps
        .name("expr")
        .map_or(String::new(), |m| m.as_str().to_string());
    Some((keyword, expression))
}

/// Whether editing `line` can change which lines are live or what the
/// document defines, so a partial re-scan would not be enough.
pub fn is_structural(line: &str) -> bool {
    DIRECTIVE.is_match(line)
        || DEFINING.is_match(line)
        || MACRO_TAG.is_match(line)
        || header_name(line).is_some_and(is_known_section)
        || continues(line)
}

#[derive(Debug, Clone, Copy)]
struct Block {
    start: usize,
    /// Whether the enclosing branch is live
    parent: bool,
    /// Whether some branch of this block was already taken
    taken: bool,
    current: bool,
}

/// Line ranges of the outermost conditional blocks, `%if` to `%endif`
/// inclusive.
pub fn block_spans(store: &LineStore) -> Result<Vec<Range<usize>>> {
    let definitions = MacroDefinitions::parse(store);
    let mut spans = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut i = 0;
    while i < store.len() {
        let index = i;
        i += 1;
        if definitions.covers(index) {
            continue;
        }
        let Some((keyword, mut expression)) = directive(store.text(index)) else {
            continue;
        };
        match keyword.as_str() {
            "%endif" => {
                let start = open
                    .pop()
                    .ok_or_else(|| EngineError::malformed_document(index, "%endif without %if"))?;
                if open.is_empty() {
                    spans.push(start..index + 1);
                }
            }
            "%else" => {
                if open.is_empty() {
                    return Err(EngineError::malformed_document(index, "%else without %if"));
                }
            }
            keyword => {
                if keyword.starts_with("%el") {
                    if open.is_empty() {
                        return Err(EngineError::malformed_document(index, format!("{keyword} without %if")));
                    }
                } else {
                    open.push(index);
                }
                while expression.ends_with('\\') && i < store.len() {
                    expression.pop();
                    expression.push_str(store.text(i));
                    i += 1;
                }
            }
        }
    }
    match open.first() {
        Some(&start) => Err(EngineError::malformed_document(start, "unterminated %if")),
        None => Ok(spans),
    }
}

/// Macro context as it stood when the scan reached an outermost `%if`.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub line: LineId,
    pub context: MacroContext,
    in_preamble: bool,
}

/// Result of a full scan.
#[derive(Debug, Default)]
pub struct Scan {
    pub diagnostics: Vec<Diagnostic>,
    pub checkpoints: Vec<Checkpoint>,
}

impl Scan {
    pub fn checkpoint(&self, line: LineId) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.line == line)
    }
}

/// Walks conditional blocks and assigns validity to every line.
pub struct ConditionTracker<'a> {
    context: &'a mut MacroContext,
    evaluator: &'a dyn MacroEvaluator,
    conditions: &'a dyn ConditionEvaluator,
    policy: IndeterminatePolicy,
    diagnostics: Vec<Diagnostic>,
    checkpoints: Vec<Checkpoint>,
    in_preamble: bool,
}

impl<'a> ConditionTracker<'a> {
    pub fn new(
        context: &'a mut MacroContext,
        evaluator: &'a dyn MacroEvaluator,
        conditions: &'a dyn ConditionEvaluator,
        policy: IndeterminatePolicy,
    ) -> Self {
        Self {
            context,
            evaluator,
            conditions,
            policy,
            diagnostics: Vec::new(),
            checkpoints: Vec::new(),
            in_preamble: true,
        }
    }

    /// Scan the whole document. The document layer of the macro context is
    /// rebuilt from scratch.
    pub fn scan(mut self, store: &mut LineStore) -> Result<Scan> {
        self.context.clear_document();
        let all = 0..store.len();
        self.walk(store, all)?;
        Ok(Scan {
            diagnostics: self.diagnostics,
            checkpoints: self.checkpoints,
        })
    }

    /// Re-scan one outermost block. The tracker's context must be a copy of
    /// the block's [`Checkpoint`]; definitions inside the block are
    /// registered into that copy only.
    pub fn rescan(
        mut self,
        store: &mut LineStore,
        block: Range<usize>,
        checkpoint: &Checkpoint,
    ) -> Result<Vec<Diagnostic>> {
        self.in_preamble = checkpoint.in_preamble;
        self.walk(store, block)?;
        Ok(self.diagnostics)
    }

    fn walk(&mut self, store: &mut LineStore, range: Range<usize>) -> Result<()> {
        let definitions = MacroDefinitions::parse(store);
        let starts: HashMap<usize, &MacroDefinition> = definitions
            .iter()
            .filter(|d| !d.commented_out)
            .filter_map(|d| Some((store.position(d.id()?)?, d)))
            .collect();
        let mut stack: Vec<Block> = Vec::new();
        let mut i = range.start;
        while i < range.end {
            let index = i;
            i += 1;
            let live = stack.last().is_none_or(|b| b.current);
            if definitions.covers(index) {
                store.set_validity(index, Validity::from_bool(live));
                if let (true, Some(definition)) = (live, starts.get(&index)) {
                    self.register_definition(definition);
                }
                continue;
            }
            let Some((keyword, mut expression)) = directive(store.text(index)) else {
                store.set_validity(index, Validity::from_bool(live));
                if live {
                    let text = store.text(index).to_string();
                    self.register_line(&text);
                }
                continue;
            };
            let id = store.lines()[index].id();
            match keyword.as_str() {
                "%endif" => {
                    let block = stack
                        .pop()
                        .ok_or_else(|| EngineError::malformed_document(index, "%endif without %if"))?;
                    store.set_validity(index, Validity::from_bool(block.parent));
                }
                "%else" => {
                    let block = stack
                        .last_mut()
                        .ok_or_else(|| EngineError::malformed_document(index, "%else without %if"))?;
                    store.set_validity(index, Validity::from_bool(block.parent));
                    block.current = block.parent && !block.taken;
                    block.taken = true;
                }
                keyword => {
                    let is_elif = keyword.starts_with("%el");
                    let (parent, evaluate) = if is_elif {
                        let block = stack.last().ok_or_else(|| {
                            EngineError::malformed_document(index, format!("{keyword} without %if"))
                        })?;
                        (block.parent, block.parent && !block.taken)
                    } else {
                        if stack.is_empty() {
                            self.checkpoints.push(Checkpoint {
                                line: id,
                                context: self.context.clone(),
                                in_preamble: self.in_preamble,
                            });
                        }
                        (live, live)
                    };
                    store.set_validity(index, Validity::from_bool(parent));
                    while expression.ends_with('\\') && i < range.end {
                        expression.pop();
                        expression.push_str(store.text(i));
                        store.set_validity(i, Validity::from_bool(parent));
                        i += 1;
                    }
                    let truth = evaluate && self.resolve(keyword, &expression, id);
                    match stack.last_mut() {
                        Some(block) if is_elif => {
                            block.current = truth;
                            block.taken |= truth;
                        }
                        _ => stack.push(Block {
                            start: index,
                            parent,
                            taken: truth,
                            current: truth,
                        }),
                    }
                }
            }
        }
        match stack.first() {
            Some(block) => Err(EngineError::malformed_document(block.start, "unterminated %if")),
            None => Ok(()),
        }
    }

    fn resolve(&mut self, keyword: &str, expression: &str, line: LineId) -> bool {
        let context: &MacroContext = self.context;
        let outcome = if keyword.ends_with("arch") || keyword.ends_with("os") {
            let target = if keyword.ends_with("arch") {
                MacroContext::TARGET_CPU
            } else {
                MacroContext::TARGET_OS
            };
            let negated = keyword.contains("ifn");
            self.evaluator
                .expand_name(target, context)
                .and_then(|target| {
                    let list = self.evaluator.expand(expression, context)?;
                    Ok(list.split_whitespace().any(|t| t == target))
                })
                .map(|matched| Truth::from(matched != negated))
        } else if expression.trim().is_empty() {
            Ok(Truth::False)
        } else {
            self.evaluator
                .expand(expression, context)
                .map(|expanded| self.conditions.evaluate(&expanded, context))
        };
        match outcome {
            Ok(Truth::True) => true,
            Ok(Truth::False) => false,
            Ok(Truth::Indeterminate) => {
                self.indeterminate(line, expression, "expression can't be evaluated".to_string())
            }
            Err(err) => self.indeterminate(line, expression, err.to_string()),
        }
    }

    fn indeterminate(&mut self, line: LineId, expression: &str, reason: String) -> bool {
        log::warn!("Unresolved condition `{expression}`: {reason}");
        self.diagnostics.push(Diagnostic::UnresolvedCondition {
            line,
            expression: expression.to_string(),
            reason,
        });
        self.policy == IndeterminatePolicy::AssumeLive
    }

    fn register_definition(&mut self, definition: &MacroDefinition) {
        let body = if definition.is_global && definition.params.is_none() {
            // %global bodies are expanded once, at the point of definition
            self.evaluator
                .expand(&definition.body, self.context)
                .unwrap_or_else(|_| definition.body.clone())
        } else {
            definition.body.clone()
        };
        let value = MacroValue {
            body,
            params: definition.params.clone(),
        };
        self.context.define_document(&definition.name, value);
    }

    fn register_line(&mut self, text: &str) {
        if header_name(text).is_some_and(is_known_section) {
            self.in_preamble = false;
        } else if let Some(caps) = UNDEFINE.captures(text) {
            self.context.undefine_document(&caps[1]);
        } else if let Some(caps) = BCOND.captures(text) {
            let name = &caps[2];
            let default_on = match caps.get(1).map(|m| m.as_str()) {
                Some("with") => false,
                Some(_) => true,
                None => caps.get(3).is_some_and(|default| {
                    self.evaluator
                        .expand(default.as_str(), self.context)
                        .is_ok_and(|v| v.trim().parse::<i64>().is_ok_and(|n| n != 0))
                }),
            };
            let enabled = if default_on {
                !self.context.is_defined(&format!("_without_{name}"))
            } else {
                self.context.is_defined(&format!("_with_{name}"))
            };
            if enabled {
                self.context
                    .define_document(&format!("with_{name}"), MacroValue::new("1"));
            }
        } else if self.in_preamble {
            if let Some(caps) = MACRO_TAG.captures(text) {
                let raw = &caps[2];
                let value = self
                    .evaluator
                    .expand(raw, self.context)
                    .unwrap_or_else(|_| raw.to_string());
                self.context
                    .define_document(&caps[1].to_lowercase(), MacroValue::new(value));
            }
        }
    }
}
