//! `Name: value` tag lines in the preamble and `%package` sections.

use std::fmt;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use specfile_syntax::macros::continues;

use crate::error::{EngineError, Result};
use crate::macros::{ExpandError, MacroContext, MacroEvaluator};
use crate::parsing::best_match;
use crate::parsing::lines::{LineId, LineStore};
use crate::parsing::macro_definitions::MacroDefinitions;
use crate::parsing::sections::{self, Section, Sections};

/// Recognised tag names, lowercase.
pub const TAG_NAMES: &[&str] = &[
    "autoprov",
    "autoreq",
    "autoreqprov",
    "bugurl",
    "buildarch",
    "buildarchitectures",
    "buildconflicts",
    "buildoption",
    "buildprereq",
    "buildrequires",
    "buildroot",
    "buildsystem",
    "conflicts",
    "copyright",
    "distribution",
    "disttag",
    "docdir",
    "enhances",
    "epoch",
    "excludearch",
    "excludeos",
    "exclusivearch",
    "exclusiveos",
    "group",
    "icon",
    "license",
    "modularitylabel",
    "name",
    "nopatch",
    "nosource",
    "obsoletes",
    "orderwithrequires",
    "packager",
    "patch",
    "platform",
    "prefix",
    "prefixes",
    "prereq",
    "provides",
    "recommends",
    "release",
    "removepathpostfixes",
    "requires",
    "serial",
    "source",
    "sourcelicense",
    "suggests",
    "summary",
    "supplements",
    "translationurl",
    "upstreamreleases",
    "url",
    "vcs",
    "vendor",
    "version",
];

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]+)(\d*)(?:\(([^()]*)\))?(\s*:\s*)(.*?)(\s*)$").expect("valid tag regex")
});

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*#\s*)(.*)$").expect("valid comment regex"));

/// Whether `name` followed by `digits` is a tag. Only `Source` and `Patch`
/// take a numeric suffix.
pub fn is_tag_name(name: &str, digits: &str) -> bool {
    let name = name.to_ascii_lowercase();
    TAG_NAMES.contains(&name.as_str()) && (digits.is_empty() || name == "source" || name == "patch")
}

/// A comment line directly above a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub text: String,
    /// `#` with the whitespace around it
    pub prefix: String,
}

impl Comment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            prefix: "# ".to_string(),
        }
    }
}

impl fmt::Display for Comment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Location {
    /// First line, which is the first comment line when there are comments
    first: LineId,
    comments: usize,
    lines: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Name as written, numeric suffix included (`Source0`)
    pub name: String,
    /// `post` in `Requires(post)`
    pub qualifier: Option<String>,
    /// Raw value, newline separated when continued over several lines
    pub value: String,
    pub comments: Vec<Comment>,
    /// Whether the tag line is live
    pub valid: bool,
    separator: String,
    trailing: String,
    section: String,
    location: Option<Location>,
}

impl Tag {
    /// A new tag. `name` may carry a qualifier, as in `Requires(post)`.
    pub fn new(name: &str, value: &str) -> Self {
        let (name, qualifier) = match name.split_once('(') {
            Some((name, rest)) => (
                name.to_string(),
                Some(rest.strip_suffix(')').unwrap_or(rest).to_string()),
            ),
            None => (name.to_string(), None),
        };
        Self {
            name,
            qualifier,
            value: value.to_string(),
            comments: Vec::new(),
            valid: true,
            separator: ": ".to_string(),
            trailing: String::new(),
            section: String::new(),
            location: None,
        }
    }

    /// Name and qualifier as written, `Requires(post)`.
    pub fn label(&self) -> String {
        match &self.qualifier {
            Some(qualifier) => format!("{}({qualifier})", self.name),
            None => self.name.clone(),
        }
    }

    /// Lowercase label used for lookup.
    pub fn key(&self) -> String {
        self.label().to_lowercase()
    }

    /// Name without the numeric suffix.
    pub fn base_name(&self) -> &str {
        self.name.trim_end_matches(|c: char| c.is_ascii_digit())
    }

    /// Digits of the numeric suffix, empty when there is none.
    pub fn suffix(&self) -> &str {
        &self.name[self.base_name().len()..]
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Id of the section the tag was read from.
    pub fn section(&self) -> &str {
        &self.section
    }

    /// First line of the tag, comments included.
    pub fn id(&self) -> Option<LineId> {
        self.location.map(|l| l.first)
    }

    pub fn expanded_value(
        &self,
        evaluator: &dyn MacroEvaluator,
        context: &MacroContext,
    ) -> Result<String, ExpandError> {
        evaluator.expand(&self.value, context)
    }

    pub fn render(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.comments.iter().map(ToString::to_string).collect();
        let line = format!("{}{}{}{}", self.label(), self.separator, self.value, self.trailing);
        lines.extend(line.split('\n').map(str::to_string));
        lines
    }

    fn aligned_to(&mut self, neighbour: &Tag) {
        let separator = &neighbour.separator;
        if separator.contains('\t') {
            self.separator = separator.clone();
            return;
        }
        let colon = separator.find(':').unwrap_or(0);
        let width = neighbour.label().len();
        let length = self.label().len();
        self.separator = if colon > 0 {
            let pad = (width + colon).saturating_sub(length).max(1);
            format!("{}:{}", " ".repeat(pad), &separator[colon + 1..])
        } else {
            let pad = (width + separator.len()).saturating_sub(length + 1).max(1);
            format!(":{}", " ".repeat(pad))
        };
    }
}

fn is_horizontal_whitespace(c: char) -> bool {
    c.is_whitespace() && c != '\n'
}

/// Tags of one or more sections, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    items: Vec<Tag>,
}

impl Tags {
    /// Tags in the body of `section`.
    pub fn parse(store: &LineStore, definitions: &MacroDefinitions, section: &Section) -> Self {
        let mut items = Vec::new();
        Self::scan(store, definitions, section, &mut items);
        Self { items }
    }

    /// Tags of the preamble and every `%package` section.
    pub fn parse_all(store: &LineStore, definitions: &MacroDefinitions, sections: &Sections) -> Self {
        let mut items = Vec::new();
        for section in sections.iter().filter(|s| s.normalized_name() == sections::PREAMBLE) {
            Self::scan(store, definitions, section, &mut items);
        }
        Self { items }
    }

    fn scan(store: &LineStore, definitions: &MacroDefinitions, section: &Section, items: &mut Vec<Tag>) {
        let body = section.body();
        let mut comments: Vec<Comment> = Vec::new();
        let mut i = body.start;
        while i < body.end {
            let index = i;
            i += 1;
            let text = store.text(index);
            if definitions.covers(index) {
                comments.clear();
                continue;
            }
            if let Some(caps) = COMMENT.captures(text) {
                comments.push(Comment {
                    text: caps[2].to_string(),
                    prefix: caps[1].to_string(),
                });
                continue;
            }
            let Some(caps) = TAG.captures(text) else {
                comments.clear();
                continue;
            };
            if !is_tag_name(&caps[1], &caps[2]) || caps[5].is_empty() {
                comments.clear();
                continue;
            }
            let mut value = caps[5].to_string();
            let mut trailing = caps[6].to_string();
            if continues(&value) {
                while continues(&value) && i < body.end {
                    value.push_str(&trailing);
                    trailing.clear();
                    value.push('\n');
                    value.push_str(store.text(i));
                    i += 1;
                }
                let trimmed = value.trim_end_matches(is_horizontal_whitespace).len();
                trailing = value[trimmed..].to_string();
                value.truncate(trimmed);
            }
            let first = index - comments.len();
            items.push(Tag {
                name: format!("{}{}", &caps[1], &caps[2]),
                qualifier: caps.get(3).map(|m| m.as_str().to_string()),
                value,
                comments: std::mem::take(&mut comments),
                valid: store.is_live(index),
                separator: caps[4].to_string(),
                trailing,
                section: section.id(),
                location: Some(Location {
                    first: store.lines()[first].id(),
                    comments: index - first,
                    lines: i - first,
                }),
            });
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn last(&self) -> Option<&Tag> {
        self.items.last()
    }

    /// Best match for `name`, compared case-insensitively and including
    /// any qualifier.
    pub fn get(&self, name: &str) -> Option<&Tag> {
        best_match(self.find_all(name), |t| t.valid)
    }

    pub fn find_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Tag> + use<'a> {
        let key = name.to_lowercase();
        self.items.iter().filter(move |t| t.key() == key)
    }

    /// Position of the best match for `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        let tag = self.get(name)?;
        self.items.iter().position(|t| std::ptr::eq(t, tag))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find_all(name).next().is_some()
    }
}

fn located(store: &LineStore, tag: &Tag) -> Result<Range<usize>> {
    tag.location
        .and_then(|l| store.position(l.first).map(|start| start..start + l.lines))
        .ok_or_else(|| EngineError::NotFound(format!("tag {}", tag.label())))
}

/// Write a modified tag back over the lines it was read from.
pub fn update(store: &mut LineStore, tag: &Tag) -> Result<()> {
    let range = located(store, tag)?;
    store.replace(range, tag.render());
    Ok(())
}

pub fn set_value(store: &mut LineStore, tags: &Tags, name: &str, value: &str) -> Result<()> {
    let mut tag = tags
        .get(name)
        .cloned()
        .ok_or_else(|| EngineError::NotFound(format!("tag {name}")))?;
    tag.value = value.to_string();
    update(store, &tag)
}

pub fn set_name(store: &mut LineStore, tags: &Tags, name: &str, new_name: &str) -> Result<()> {
    let mut tag = tags
        .get(name)
        .cloned()
        .ok_or_else(|| EngineError::NotFound(format!("tag {name}")))?;
    let renamed = Tag::new(new_name, "");
    tag.name = renamed.name;
    tag.qualifier = renamed.qualifier;
    update(store, &tag)
}

pub fn set_comments(store: &mut LineStore, tags: &Tags, name: &str, comments: Vec<Comment>) -> Result<()> {
    let mut tag = tags
        .get(name)
        .cloned()
        .ok_or_else(|| EngineError::NotFound(format!("tag {name}")))?;
    tag.comments = comments;
    update(store, &tag)
}

/// Remove a tag together with its comments.
pub fn remove(store: &mut LineStore, tag: &Tag) -> Result<()> {
    let range = located(store, tag)?;
    store.delete(range);
    Ok(())
}

/// Insert `tag` directly after `anchor`, aligning its value with the anchor.
pub fn insert_after(store: &mut LineStore, anchor: &Tag, mut tag: Tag) -> Result<()> {
    let range = located(store, anchor)?;
    tag.aligned_to(anchor);
    store.insert(range.end, tag.render());
    Ok(())
}

/// Insert `tag` directly before `anchor` and its comments.
pub fn insert_before(store: &mut LineStore, anchor: &Tag, mut tag: Tag) -> Result<()> {
    let range = located(store, anchor)?;
    tag.aligned_to(anchor);
    store.insert(range.start, tag.render());
    Ok(())
}

/// Insert `tag` before the tag at `index` of `tags`, or after the last tag
/// when `index` is past the end. A section without tags gets the new tag
/// after its last non-blank line.
pub fn insert(store: &mut LineStore, section: &Section, tags: &Tags, index: usize, tag: Tag) -> Result<()> {
    match (tags.items.get(index), tags.last()) {
        (Some(anchor), _) => insert_before(store, anchor, tag),
        (None, Some(anchor)) => insert_after(store, anchor, tag),
        (None, None) => {
            let range = sections::locate(store, section)?;
            let start = if section.is_preamble() {
                range.start
            } else {
                range.start + 1
            };
            let mut at = range.end;
            while at > start && store.text(at - 1).trim().is_empty() {
                at -= 1;
            }
            store.insert(at, tag.render());
            Ok(())
        }
    }
}
