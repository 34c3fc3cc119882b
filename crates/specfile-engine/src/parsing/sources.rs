//! Numbered `Source`/`Patch` references, from tags and from
//! `%sourcelist`/`%patchlist` sections.

use url::Url;

use crate::error::{EngineError, Result};
use crate::macros::{MacroContext, MacroEvaluator};
use crate::parsing::best_match;
use crate::parsing::conditions::directive;
use crate::parsing::lines::{LineId, LineStore};
use crate::parsing::macro_definitions::MacroDefinitions;
use crate::parsing::sections::{self, Section, Sections};
use crate::parsing::tags::{self, Comment, Tag, Tags};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Source,
    Patch,
}

impl SourceKind {
    /// Tag name without a number.
    pub fn prefix(self) -> &'static str {
        match self {
            SourceKind::Source => "Source",
            SourceKind::Patch => "Patch",
        }
    }

    /// Section listing additional entries, one per line.
    pub fn list_section(self) -> &'static str {
        match self {
            SourceKind::Source => "sourcelist",
            SourceKind::Patch => "patchlist",
        }
    }
}

/// Where an entry is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Tag(Tag),
    List(LineId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub kind: SourceKind,
    pub number: u32,
    /// Whether the number is written in the tag name
    pub explicit: bool,
    /// Digits of the written number, zero padding included
    pub width: usize,
    pub location: String,
    /// Location after macro expansion, when it could be expanded
    pub expanded_location: Option<String>,
    pub valid: bool,
    origin: Origin,
}

impl Source {
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Whether the entry comes from a `%sourcelist` or `%patchlist` section.
    pub fn is_listed(&self) -> bool {
        matches!(self.origin, Origin::List(_))
    }

    pub fn comments(&self) -> &[Comment] {
        match &self.origin {
            Origin::Tag(tag) => &tag.comments,
            Origin::List(_) => &[],
        }
    }

    /// Last path component of the location. A `name=value` query or
    /// fragment yields the value.
    pub fn filename(&self) -> String {
        filename(self.expanded_location.as_deref().unwrap_or(&self.location))
    }

    /// Whether the expanded location is a URL with a host.
    pub fn remote(&self) -> bool {
        self.expanded_location
            .as_deref()
            .and_then(|location| Url::parse(location).ok())
            .is_some_and(|url| url.host_str().is_some_and(|host| !host.is_empty()))
    }
}

/// Number after the running maximum, `0` for the first entry.
fn following(max: Option<u32>, entry: &str) -> Result<u32> {
    match max {
        None => Ok(0),
        Some(max) => max
            .checked_add(1)
            .ok_or_else(|| EngineError::malformed_directive(entry, format!("no number left after {max}"))),
    }
}

fn filename(location: &str) -> String {
    let base = location.rsplit('/').next().unwrap_or(location);
    base.rsplit('=').next().unwrap_or(base).to_string()
}

/// All sources or all patches of a document, in numbering order.
#[derive(Debug, Clone)]
pub struct Sources {
    kind: SourceKind,
    items: Vec<Source>,
    /// Preamble tags, used to place new entries
    tags: Tags,
    preamble: Section,
    lists: Vec<Section>,
    allow_duplicates: bool,
}

impl Sources {
    pub fn parse(
        store: &LineStore,
        definitions: &MacroDefinitions,
        sections: &Sections,
        kind: SourceKind,
        evaluator: &dyn MacroEvaluator,
        context: &MacroContext,
    ) -> Result<Self> {
        let expand = |location: &str| evaluator.expand(location, context).ok();
        let preamble = sections.preamble().clone();
        let tags = Tags::parse(store, definitions, &preamble);
        let mut items = Vec::new();
        let mut max: Option<u32> = None;
        for tag in tags.iter() {
            if !tag.base_name().eq_ignore_ascii_case(kind.prefix()) || tag.qualifier.is_some() {
                continue;
            }
            let digits = tag.suffix();
            let number = if digits.is_empty() {
                following(max, &tag.name)?
            } else {
                digits
                    .parse::<u32>()
                    .map_err(|err| EngineError::malformed_directive(&tag.name, err))?
            };
            max = Some(max.map_or(number, |m| m.max(number)));
            items.push(Source {
                kind,
                number,
                explicit: !digits.is_empty(),
                width: digits.len(),
                location: tag.value.clone(),
                expanded_location: expand(&tag.value),
                valid: tag.valid,
                origin: Origin::Tag(tag.clone()),
            });
        }
        let lists: Vec<Section> = sections.find_all(kind.list_section()).cloned().collect();
        for section in &lists {
            for index in section.body() {
                let text = store.text(index);
                let entry = text.trim();
                if entry.is_empty()
                    || entry.starts_with('#')
                    || definitions.covers(index)
                    || directive(text).is_some()
                {
                    continue;
                }
                let number = following(max, entry)?;
                max = Some(number);
                items.push(Source {
                    kind,
                    number,
                    explicit: false,
                    width: 0,
                    location: entry.to_string(),
                    expanded_location: expand(entry),
                    valid: store.is_live(index),
                    origin: Origin::List(store.lines()[index].id()),
                });
            }
        }
        log::debug!("Found {} {} entries", items.len(), kind.prefix().to_lowercase());
        Ok(Self {
            kind,
            items,
            tags,
            preamble,
            lists,
            allow_duplicates: false,
        })
    }

    /// Accept locations that are already present.
    pub fn allowing_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = allow;
        self
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Best match for `number`.
    pub fn get(&self, number: u32) -> Option<&Source> {
        best_match(self.items.iter().filter(|s| s.number == number), |s| s.valid)
    }

    pub fn contains(&self, location: &str) -> bool {
        self.items.iter().any(|s| s.location == location)
    }

    /// Number the next appended entry gets.
    pub fn next_number(&self) -> Result<u32> {
        let max = self.items.iter().map(|s| s.number).max();
        following(max, self.kind.prefix())
    }

    /// Whether tag entries are written without numbers.
    pub fn is_implicit(&self) -> bool {
        let mut tags = self.tag_entries().peekable();
        tags.peek().is_some() && tags.all(|s| !s.explicit)
    }

    fn tag_entries(&self) -> impl Iterator<Item = &Source> {
        self.items.iter().filter(|s| !s.is_listed())
    }

    fn check_duplicate(&self, location: &str, except: Option<u32>) -> Result<()> {
        if self.allow_duplicates {
            return Ok(());
        }
        if self
            .items
            .iter()
            .any(|s| s.location == location && Some(s.number) != except)
        {
            return Err(EngineError::Conflict(format!(
                "{} `{location}` already exists",
                self.kind.prefix()
            )));
        }
        Ok(())
    }

    fn tag_name(&self, base: &str, number: Option<u32>, width: usize) -> String {
        match number {
            Some(number) => format!("{base}{number:0width$}", width = width.max(1)),
            None => base.to_string(),
        }
    }

    /// Place a tag for a kind that has no tag entries yet. Patches follow
    /// the last Source tag.
    fn insert_first(&self, store: &mut LineStore, tag: Tag) -> Result<()> {
        let last_source = self
            .tags
            .iter()
            .filter(|t| t.base_name().eq_ignore_ascii_case(SourceKind::Source.prefix()))
            .last();
        match last_source {
            Some(anchor) if self.kind == SourceKind::Patch => tags::insert_after(store, anchor, tag),
            _ => tags::insert(store, &self.preamble, &self.tags, self.tags.len(), tag),
        }
    }
}

fn insert_list_entry(store: &mut LineStore, section: &Section, location: &str) -> Result<()> {
    let range = sections::locate(store, section)?;
    let mut at = range.end;
    while at > range.start + 1 && store.text(at - 1).trim().is_empty() {
        at -= 1;
    }
    store.insert(at, vec![location.to_string()]);
    Ok(())
}

fn list_position(store: &LineStore, id: LineId) -> Result<usize> {
    store
        .position(id)
        .ok_or_else(|| EngineError::NotFound("list entry".to_string()))
}

/// Add an entry after the last one. Returns its number.
pub fn append(store: &mut LineStore, sources: &Sources, location: &str) -> Result<u32> {
    sources.check_duplicate(location, None)?;
    let number = sources.next_number()?;
    match sources.items.last() {
        Some(Source {
            origin: Origin::List(id),
            ..
        }) => {
            let at = list_position(store, *id)? + 1;
            store.insert(at, vec![location.to_string()]);
        }
        Some(last @ Source {
            origin: Origin::Tag(anchor),
            ..
        }) => {
            let written = (!sources.is_implicit()).then_some(number);
            let name = sources.tag_name(anchor.base_name(), written, last.width);
            tags::insert_after(store, anchor, Tag::new(&name, location))?;
        }
        None => match sources.lists.last() {
            Some(section) => insert_list_entry(store, section, location)?,
            None => {
                let name = sources.tag_name(sources.kind.prefix(), Some(number), 1);
                sources.insert_first(store, Tag::new(&name, location))?;
            }
        },
    }
    Ok(number)
}

/// Add a tag with an explicit number, next to the entry with the nearest
/// number. An existing entry with that number is a conflict unless
/// `overwrite` is set, in which case its location is replaced.
pub fn insert_numbered(
    store: &mut LineStore,
    sources: &Sources,
    number: u32,
    location: &str,
    overwrite: bool,
) -> Result<()> {
    if sources.get(number).is_some() {
        if !overwrite {
            return Err(EngineError::Conflict(format!(
                "{}{number} already exists",
                sources.kind.prefix()
            )));
        }
        return set_location(store, sources, number, location);
    }
    sources.check_duplicate(location, None)?;
    let nearest = sources
        .tag_entries()
        .min_by_key(|s| s.number.abs_diff(number));
    match nearest {
        Some(source @ Source {
            origin: Origin::Tag(anchor),
            ..
        }) => {
            let name = sources.tag_name(anchor.base_name(), Some(number), source.width);
            let tag = Tag::new(&name, location);
            if source.number < number {
                tags::insert_after(store, anchor, tag)
            } else {
                tags::insert_before(store, anchor, tag)
            }
        }
        _ => {
            let name = sources.tag_name(sources.kind.prefix(), Some(number), 1);
            sources.insert_first(store, Tag::new(&name, location))
        }
    }
}

fn remove_entry(store: &mut LineStore, source: &Source) -> Result<()> {
    match &source.origin {
        Origin::Tag(tag) => tags::remove(store, tag),
        Origin::List(id) => {
            let at = list_position(store, *id)?;
            store.delete(at..at + 1);
            Ok(())
        }
    }
}

pub fn remove(store: &mut LineStore, sources: &Sources, number: u32) -> Result<()> {
    let source = sources
        .get(number)
        .ok_or_else(|| EngineError::NotFound(format!("{}{number}", sources.kind.prefix())))?;
    remove_entry(store, source)
}

/// Remove every entry with the given location.
pub fn remove_location(store: &mut LineStore, sources: &Sources, location: &str) -> Result<()> {
    let matching: Vec<&Source> = sources.items.iter().filter(|s| s.location == location).collect();
    if matching.is_empty() {
        return Err(EngineError::NotFound(format!(
            "{} `{location}`",
            sources.kind.prefix()
        )));
    }
    for source in matching.into_iter().rev() {
        remove_entry(store, source)?;
    }
    Ok(())
}

pub fn set_location(store: &mut LineStore, sources: &Sources, number: u32, location: &str) -> Result<()> {
    let source = sources
        .get(number)
        .ok_or_else(|| EngineError::NotFound(format!("{}{number}", sources.kind.prefix())))?;
    sources.check_duplicate(location, Some(number))?;
    match &source.origin {
        Origin::Tag(tag) => {
            let mut tag = tag.clone();
            tag.value = location.to_string();
            tags::update(store, &tag)
        }
        Origin::List(id) => {
            let at = list_position(store, *id)?;
            let text = store.text(at);
            let indent = &text[..text.len() - text.trim_start().len()];
            let line = format!("{indent}{location}");
            store.replace(at..at + 1, vec![line]);
            Ok(())
        }
    }
}
