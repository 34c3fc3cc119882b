//! `%global` and `%define` lines, including commented-out definitions.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use specfile_syntax::macros::continues;

use crate::error::{EngineError, Result};
use crate::parsing::best_match;
use crate::parsing::lines::{LineId, LineStore};

static DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\s*)(%dnl)?(.*?)(global|define)(\s+)(\w+(?:\(.*?\))?)(\s+)(.*?)(\s*|\\)$",
    )
    .expect("valid macro definition regex")
});

/// How a definition is disabled without deleting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommentOutStyle {
    /// `%dnl %global ...`
    #[default]
    Dnl,
    /// `#global ...`
    Hash,
    /// `# %%global ...`, a `#` followed by anything and an escaped `%`
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDefinition {
    pub name: String,
    /// Option string of a parametric macro, `foo(n:)` gives `n:`
    pub params: Option<String>,
    /// Body, newline separated when it spans several lines
    pub body: String,
    pub is_global: bool,
    pub commented_out: bool,
    pub comment_out_style: CommentOutStyle,
    pub valid: bool,
    /// Whitespace before the directive, before the name, before the body
    /// and after the body
    whitespace: [String; 4],
    /// Text between the `%dnl` or line start and the `%`/`#` of the keyword
    prefix: String,
    location: Option<(LineId, usize)>,
}

impl MacroDefinition {
    pub fn new(name: &str, body: &str, is_global: bool) -> Self {
        let (name, params) = split_params(name);
        Self {
            name,
            params,
            body: body.to_string(),
            is_global,
            commented_out: false,
            comment_out_style: CommentOutStyle::Dnl,
            valid: true,
            whitespace: [String::new(), " ".to_string(), " ".to_string(), String::new()],
            prefix: String::new(),
            location: None,
        }
    }

    /// First line of the definition, for definitions read from a document.
    pub fn id(&self) -> Option<LineId> {
        self.location.map(|(id, _)| id)
    }

    /// Number of lines the definition occupied when it was read.
    pub fn line_count(&self) -> usize {
        self.location.map_or(0, |(_, count)| count)
    }

    pub fn comment_out(&mut self, style: CommentOutStyle) {
        if self.commented_out {
            self.uncomment();
        }
        self.commented_out = true;
        self.comment_out_style = style;
        match style {
            CommentOutStyle::Dnl => self.prefix = " ".to_string(),
            CommentOutStyle::Hash => self.prefix.clear(),
            CommentOutStyle::Other => self.prefix = "# %".to_string(),
        }
    }

    pub fn uncomment(&mut self) {
        self.commented_out = false;
        self.prefix.clear();
    }

    /// The definition as document lines.
    pub fn render(&self) -> Vec<String> {
        let [ws0, ws1, ws2, ws3] = &self.whitespace;
        let dnl = if self.commented_out && self.comment_out_style == CommentOutStyle::Dnl {
            "%dnl"
        } else {
            ""
        };
        let sigil = if self.commented_out && self.comment_out_style == CommentOutStyle::Hash {
            '#'
        } else {
            '%'
        };
        let keyword = if self.is_global { "global" } else { "define" };
        let name = match &self.params {
            Some(params) => format!("{}({params})", self.name),
            None => self.name.clone(),
        };
        format!(
            "{ws0}{dnl}{}{sigil}{keyword}{ws1}{name}{ws2}{}{ws3}",
            self.prefix, self.body
        )
        .split('\n')
        .map(str::to_string)
        .collect()
    }
}

fn split_params(name: &str) -> (String, Option<String>) {
    match name.split_once('(') {
        Some((name, rest)) => (
            name.to_string(),
            Some(rest.strip_suffix(')').unwrap_or(rest).to_string()),
        ),
        None => (name.to_string(), None),
    }
}

/// Whether the text before the keyword forms a definition: `%`, `#`, a `#`
/// comment ending in `%`, or anything ending in `%` after `%dnl`.
fn valid_start(start: &str, dnl: bool) -> bool {
    if dnl {
        start.ends_with('%')
    } else {
        start == "%" || start == "#" || (start.starts_with('#') && start.ends_with('%'))
    }
}

fn is_horizontal_whitespace(c: char) -> bool {
    c.is_whitespace() && c != '\n'
}

/// Every definition in the document, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroDefinitions {
    items: Vec<MacroDefinition>,
    /// Line ranges occupied by active definitions
    spans: Vec<Range<usize>>,
}

impl MacroDefinitions {
    pub fn parse(store: &LineStore) -> Self {
        let mut items = Vec::new();
        let mut spans = Vec::new();
        let mut i = 0;
        while i < store.len() {
            let start = i;
            i += 1;
            let Some(caps) = DEFINITION.captures(store.text(start)) else {
                continue;
            };
            let dnl = caps.get(2).is_some();
            let sigil = &caps[3];
            if !valid_start(sigil, dnl) {
                continue;
            }
            let escaped = sigil.ends_with("%%");
            let hashed = sigil.ends_with('#');
            let commented_out = dnl || hashed || (escaped && sigil.contains('#'));
            let mut body = caps[8].to_string();
            let mut trailing = caps[9].to_string();
            if !dnl && !escaped && !hashed {
                if trailing == "\\" {
                    body.push('\\');
                    trailing.clear();
                }
                while continues(&body) && i < store.len() {
                    body.push_str(&trailing);
                    trailing.clear();
                    body.push('\n');
                    body.push_str(store.text(i));
                    i += 1;
                }
            }
            let trimmed = body.trim_end_matches(is_horizontal_whitespace).len();
            let trailing = format!("{}{trailing}", &body[trimmed..]);
            body.truncate(trimmed);

            let (name, params) = split_params(&caps[6]);
            let comment_out_style = if hashed {
                CommentOutStyle::Hash
            } else if escaped && sigil.contains('#') {
                CommentOutStyle::Other
            } else {
                CommentOutStyle::Dnl
            };
            let line = &store.lines()[start];
            if !commented_out {
                spans.push(start..i);
            }
            items.push(MacroDefinition {
                name,
                params,
                body,
                is_global: &caps[4] == "global",
                commented_out,
                comment_out_style,
                valid: line.is_live(),
                whitespace: [
                    caps[1].to_string(),
                    caps[5].to_string(),
                    caps[7].to_string(),
                    trailing,
                ],
                prefix: sigil[..sigil.len() - 1].to_string(),
                location: Some((line.id(), i - start)),
            });
        }
        log::debug!("Parsed {} macro definitions", items.len());
        Self { items, spans }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MacroDefinition> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Best match for `name`: the last valid definition, or the last one
    /// when none is valid.
    pub fn get(&self, name: &str) -> Option<&MacroDefinition> {
        best_match(self.find_all(name), |d| d.valid)
    }

    pub fn find_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a MacroDefinition> + use<'a> {
        let name = name.to_string();
        self.items.iter().filter(move |d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find_all(name).next().is_some()
    }

    /// Whether the line at `index` belongs to an active definition.
    pub fn covers(&self, index: usize) -> bool {
        self.spans.iter().any(|span| span.contains(&index))
    }

    /// Whether the line at `index` continues the body of a definition that
    /// started on an earlier line.
    pub fn is_body_line(&self, index: usize) -> bool {
        self.spans
            .iter()
            .any(|span| span.start < index && index < span.end)
    }

    /// Line index just past the last definition.
    pub fn end(&self, store: &LineStore) -> Option<usize> {
        let last = self.items.last()?;
        let (id, count) = last.location?;
        store.position(id).map(|start| start + count)
    }
}

fn located(store: &LineStore, definition: &MacroDefinition) -> Result<Range<usize>> {
    definition
        .location
        .and_then(|(id, count)| store.position(id).map(|start| start..start + count))
        .ok_or_else(|| EngineError::NotFound(format!("macro definition {}", definition.name)))
}

/// Write a modified definition back over the lines it was read from.
pub fn update(store: &mut LineStore, definition: &MacroDefinition) -> Result<()> {
    let range = located(store, definition)?;
    store.replace(range, definition.render());
    Ok(())
}

pub fn remove(store: &mut LineStore, definition: &MacroDefinition) -> Result<()> {
    let range = located(store, definition)?;
    store.delete(range);
    Ok(())
}

/// Insert a new definition after the last existing one, or at the top of
/// the document when there is none.
pub fn append(store: &mut LineStore, definition: &MacroDefinition) {
    let at = MacroDefinitions::parse(store).end(store).unwrap_or(0);
    store.insert(at, definition.render());
}
