//! Partitioning of the document into sections.
//!
//! Sections are contiguous and cover the whole document. The preamble comes
//! first and has no header line; every other section starts at a live `%name`
//! line that is not part of a macro definition.

use std::ops::Range;

use specfile_syntax::{MacroNode, Options, parse_value};

use crate::error::{EngineError, Result};
use crate::parsing::lines::{LineId, LineStore};
use crate::parsing::macro_definitions::MacroDefinitions;

/// Name of the implicit first section.
pub const PREAMBLE: &str = "package";

pub const SECTION_NAMES: &[&str] = &[
    "package",
    "description",
    "prep",
    "generate_buildrequires",
    "conf",
    "build",
    "install",
    "check",
    "clean",
    "files",
    "changelog",
    "pre",
    "post",
    "preun",
    "postun",
    "pretrans",
    "posttrans",
    "preuntrans",
    "postuntrans",
    "verifyscript",
    "triggerprein",
    "triggerin",
    "triggerun",
    "triggerpostun",
    "filetriggerin",
    "filetriggerun",
    "filetriggerpostun",
    "transfiletriggerin",
    "transfiletriggerun",
    "transfiletriggerpostun",
    "sourcelist",
    "patchlist",
];

const SCRIPTLETS: &[&str] = &[
    "pre",
    "post",
    "preun",
    "postun",
    "pretrans",
    "posttrans",
    "preuntrans",
    "postuntrans",
    "verifyscript",
];

const BUILD_SCRIPTS: &[&str] = &[
    "prep",
    "generate_buildrequires",
    "conf",
    "build",
    "install",
    "check",
    "clean",
];

pub fn is_known_section(name: &str) -> bool {
    SECTION_NAMES.iter().any(|n| n.eq_ignore_ascii_case(name))
}

/// Option string accepted in the header of a section.
pub fn section_optstring(name: &str) -> &'static str {
    let name = name.to_ascii_lowercase();
    match name.as_str() {
        "package" | "description" => "n:",
        "files" => "n:f:",
        n if SCRIPTLETS.contains(&n) => "en:p:q",
        n if n.contains("trigger") => "en:p:P:q",
        _ => "",
    }
}

/// Name of the section a header line opens, if it is shaped like one:
/// `%name` followed by whitespace or the end of the line, and no trailing
/// backslash.
pub fn header_name(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('%')?;
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    if end == 0 || line.ends_with('\\') {
        return None;
    }
    match rest[end..].chars().next() {
        None => Some(&rest[..end]),
        Some(c) if c.is_whitespace() => Some(&rest[..end]),
        Some(_) => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Name as written, without the `%`
    pub name: String,
    /// Parsed header arguments, `None` when the header has none
    pub options: Option<Options>,
    /// Whether the name is one of the standard section names
    pub standard: bool,
    delimiter: String,
    /// Separator and macro reference standing in for the section content
    inline: Option<(String, String)>,
    header: Option<LineId>,
    lines: Range<usize>,
}

impl Section {
    pub fn is_preamble(&self) -> bool {
        self.header.is_none()
    }

    pub fn normalized_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Name and arguments, e.g. `package -n foo-devel`.
    pub fn id(&self) -> String {
        match &self.options {
            Some(options) if !options.is_empty() => {
                let delimiter = if self.delimiter.is_empty() {
                    " "
                } else {
                    &self.delimiter
                };
                format!("{}{delimiter}{options}", self.name)
            }
            _ => self.name.clone(),
        }
    }

    /// [`Section::id`] with the name lowercased.
    pub fn normalized_id(&self) -> String {
        let id = self.id();
        let rest = &id[self.name.len()..];
        format!("{}{rest}", self.normalized_name())
    }

    /// Header arguments as written.
    pub fn arguments(&self) -> String {
        self.options.as_ref().map(ToString::to_string).unwrap_or_default()
    }

    /// Macro reference on the header line that supplies the content.
    pub fn inline_content(&self) -> Option<&str> {
        self.inline.as_ref().map(|(_, content)| content.as_str())
    }

    pub fn is_script(&self) -> bool {
        let name = self.normalized_name();
        SCRIPTLETS.contains(&name.as_str())
            || BUILD_SCRIPTS.contains(&name.as_str())
            || name.contains("trigger")
    }

    pub fn header_id(&self) -> Option<LineId> {
        self.header
    }

    /// All lines of the section, header included.
    pub fn range(&self) -> Range<usize> {
        self.lines.clone()
    }

    /// Lines after the header.
    pub fn body(&self) -> Range<usize> {
        if self.is_preamble() {
            self.lines.clone()
        } else {
            self.lines.start + 1..self.lines.end
        }
    }

    /// Header line rebuilt from the name, options and inline content.
    pub fn header_line(&self) -> String {
        let mut line = format!("%{}", self.id());
        if let Some((separator, content)) = &self.inline {
            line.push_str(separator);
            line.push_str(content);
        }
        line
    }
}

fn split_whitespace_keep(s: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut in_space = false;
    for (i, c) in s.char_indices() {
        if c.is_whitespace() != in_space {
            tokens.push(&s[start..i]);
            start = i;
            in_space = !in_space;
        }
    }
    tokens.push(&s[start..]);
    tokens
}

/// Whether `token` is a lone macro reference whose definition spans
/// several lines, making it the content of the section rather than an
/// argument.
fn is_inline_content(token: &str, definitions: &MacroDefinitions) -> bool {
    let Ok(nodes) = parse_value(token) else {
        return false;
    };
    let name = match nodes.as_slice() {
        [MacroNode::Substitution { name, .. }] => name,
        [MacroNode::Enclosed { name, args, .. }] if args.is_empty() => name,
        _ => return false,
    };
    definitions.get(name).is_some_and(|d| {
        d.body.starts_with('\n') || d.body.starts_with("\\\n") || d.body.starts_with("%{expand:\n")
    })
}

fn parse_header(
    line: &str,
    standard: bool,
    definitions: &MacroDefinitions,
) -> (String, String, Option<Options>, Option<(String, String)>) {
    let mut tokens = split_whitespace_keep(&line[1..]);
    let mut inline = None;
    if tokens.len() > 2 {
        let last = tokens[tokens.len() - 1];
        if is_inline_content(last, definitions) {
            tokens.pop();
            let separator = tokens.pop().unwrap_or_default();
            inline = Some((separator.to_string(), last.to_string()));
        }
    }
    let name = tokens[0].to_string();
    if tokens.len() > 2 {
        let arguments: String = tokens[2..].concat();
        let optstring = if standard {
            section_optstring(&name)
        } else {
            ""
        };
        // Argument strings that can't be tokenized are kept as plain words
        let options = Options::parse(&arguments, optstring).unwrap_or_else(|err| {
            log::debug!("Keeping unparsable section arguments `{arguments}`: {err}");
            let mut options = Options::empty(optstring);
            options.push_positional(&arguments);
            options
        });
        (name, tokens[1].to_string(), Some(options), inline)
    } else {
        (name, String::new(), None, inline)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sections {
    items: Vec<Section>,
}

impl Sections {
    pub fn parse(store: &LineStore, definitions: &MacroDefinitions, extra: &[String]) -> Self {
        let mut starts = Vec::new();
        for (index, line) in store.lines().iter().enumerate() {
            if !line.is_live() || definitions.covers(index) {
                continue;
            }
            let Some(name) = header_name(line.text()) else {
                continue;
            };
            if is_known_section(name) {
                starts.push((index, true));
            } else if extra.iter().any(|e| e.eq_ignore_ascii_case(name)) {
                starts.push((index, false));
            }
        }
        let first = starts.first().map_or(store.len(), |&(index, _)| index);
        let mut items = vec![Section {
            name: PREAMBLE.to_string(),
            options: None,
            standard: true,
            delimiter: String::new(),
            inline: None,
            header: None,
            lines: 0..first,
        }];
        for (n, &(start, standard)) in starts.iter().enumerate() {
            let end = starts.get(n + 1).map_or(store.len(), |&(index, _)| index);
            let line = &store.lines()[start];
            let (name, delimiter, options, inline) = parse_header(line.text(), standard, definitions);
            items.push(Section {
                name,
                options,
                standard,
                delimiter,
                inline,
                header: Some(line.id()),
                lines: start..end,
            });
        }
        log::debug!("Split document into {} sections", items.len());
        Self { items }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Section> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn preamble(&self) -> &Section {
        &self.items[0]
    }

    /// First section whose id matches, ignoring the case of the name.
    pub fn get(&self, id: &str) -> Option<&Section> {
        let id = id.to_lowercase();
        self.items.iter().find(|s| s.normalized_id() == id)
    }

    /// All sections with the given name, whatever their arguments.
    pub fn find_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Section> + use<'a> {
        let name = name.to_string();
        self.items
            .iter()
            .filter(move |s| s.name.eq_ignore_ascii_case(&name))
    }

    /// Section containing the line at `index`.
    pub fn at(&self, index: usize) -> Option<&Section> {
        self.items.iter().find(|s| s.lines.contains(&index))
    }
}

pub(crate) fn locate(store: &LineStore, section: &Section) -> Result<Range<usize>> {
    match section.header {
        None => Ok(section.lines.clone()),
        Some(id) => store
            .position(id)
            .map(|start| start..start + section.lines.len())
            .ok_or_else(|| EngineError::NotFound(format!("section %{}", section.id()))),
    }
}

/// Replace the content of a section, keeping its header.
pub fn set_lines(store: &mut LineStore, section: &Section, lines: Vec<String>) -> Result<()> {
    let range = locate(store, section)?;
    let body = if section.is_preamble() {
        range
    } else {
        range.start + 1..range.end
    };
    store.replace(body, lines);
    Ok(())
}

/// Rewrite the header line after the options were edited.
pub fn update_header(store: &mut LineStore, section: &Section) -> Result<()> {
    if section.is_preamble() {
        return Err(EngineError::NotFound("header of the preamble".to_string()));
    }
    let range = locate(store, section)?;
    store.replace(range.start..range.start + 1, vec![section.header_line()]);
    Ok(())
}

/// Insert a new section before the section at `index`, or at the end when
/// `index` is past the last one.
pub fn insert(
    store: &mut LineStore,
    sections: &Sections,
    index: usize,
    header: &str,
    lines: Vec<String>,
) -> Result<()> {
    if index == 0 {
        return Err(EngineError::Conflict(
            "sections can't be inserted before the preamble".to_string(),
        ));
    }
    let at = match sections.items.get(index) {
        Some(section) => locate(store, section)?.start,
        None => store.len(),
    };
    let header = header.strip_prefix('%').unwrap_or(header);
    let mut new_lines = vec![format!("%{header}")];
    new_lines.extend(lines);
    store.insert(at, new_lines);
    Ok(())
}

pub fn append(store: &mut LineStore, sections: &Sections, header: &str, lines: Vec<String>) -> Result<()> {
    insert(store, sections, sections.len(), header, lines)
}

/// Remove a section with its header. The preamble can only be emptied.
pub fn remove(store: &mut LineStore, section: &Section) -> Result<()> {
    let range = locate(store, section)?;
    store.delete(range);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const SPEC: &str = "\
Name: foo
Version: 1.0

%description
Foo does things.

%package -n foo-devel
Summary: Headers

%description -n foo-devel
Headers for foo.

%prep
%autosetup
";

    fn parse(text: &str) -> (LineStore, Sections) {
        let store = LineStore::load(text);
        let definitions = MacroDefinitions::parse(&store);
        let sections = Sections::parse(&store, &definitions, &[]);
        (store, sections)
    }

    #[test]
    fn test_sections_cover_document() {
        let (store, sections) = parse(SPEC);

        let ids: Vec<_> = sections.iter().map(Section::id).collect();
        assert_eq!(
            ids,
            vec![
                "package",
                "description",
                "package -n foo-devel",
                "description -n foo-devel",
                "prep"
            ]
        );
        let mut next = 0;
        for section in sections.iter() {
            assert_eq!(section.range().start, next);
            next = section.range().end;
        }
        assert_eq!(next, store.len());
    }

    #[test]
    fn test_section_options() {
        let (_, sections) = parse(SPEC);

        let devel = sections.get("Package -n foo-devel").unwrap();
        assert_eq!(devel.options.as_ref().and_then(|o| o.text('n')).as_deref(), Some("foo-devel"));
        assert_eq!(devel.body(), 7..9);
    }

    #[rstest]
    #[case("%prep", Some("prep"))]
    #[case("%Build -q", Some("Build"))]
    #[case("%description\t-n x", Some("description"))]
    #[case("%prepare", Some("prepare"))]
    #[case("%{name}", None)]
    #[case("%post -p \\", None)]
    #[case("%%prep", None)]
    fn test_header_name(#[case] line: &str, #[case] expected: Option<&str>) {
        assert_eq!(header_name(line), expected);
    }

    #[test]
    fn test_header_inside_definition_body_is_ignored() {
        let (_, sections) = parse("%global desc %{expand:\n%description\ntext}\n%files\n");

        let names: Vec<_> = sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["package", "files"]);
    }

    #[test]
    fn test_dead_header_is_not_a_section() {
        let mut store = LineStore::load("Name: foo\n%if 0\n%files\n%endif\n");
        store.set_validity(2, crate::parsing::lines::Validity::Dead);

        let sections = Sections::parse(&store, &MacroDefinitions::parse(&store), &[]);

        assert_eq!(sections.len(), 1);
    }

    #[test]
    fn test_unknown_sections_need_configuration() {
        let store = LineStore::load("Name: foo\n%mysection\nbody\n");
        let definitions = MacroDefinitions::parse(&store);

        assert_eq!(Sections::parse(&store, &definitions, &[]).len(), 1);

        let sections = Sections::parse(&store, &definitions, &["mysection".to_string()]);
        let custom = sections.get("mysection").unwrap();
        assert!(!custom.standard);
    }

    #[test]
    fn test_inline_section_content() {
        // Given a description supplied by a multi-line macro
        let text = "%global _description %{expand:\nLong text.}\nName: foo\n%description %_description\n";

        // When split into sections
        let (_, sections) = parse(text);

        // Then the macro is the content, not an argument
        let description = sections.get("description").unwrap();
        assert_eq!(description.inline_content(), Some("%_description"));
        assert!(description.options.is_none());
        assert_eq!(description.header_line(), "%description %_description");
    }

    #[test]
    fn test_plain_macro_argument_is_not_inline() {
        let (_, sections) = parse("%global sub devel\n%package %{sub}\n");

        let package = sections.iter().nth(1).unwrap();
        assert_eq!(package.inline_content(), None);
        assert_eq!(package.arguments(), "%{sub}");
    }

    #[test]
    fn test_edit_sections() {
        let (mut store, sections) = parse(SPEC);

        let prep = sections.get("prep").unwrap().clone();
        set_lines(&mut store, &prep, vec!["%setup -q".to_string()]).unwrap();
        let sections = Sections::parse(&store, &MacroDefinitions::parse(&store), &[]);
        append(&mut store, &sections, "build", vec!["make".to_string()]).unwrap();

        assert!(store.render().ends_with("%prep\n%setup -q\n%build\nmake\n"));

        let sections = Sections::parse(&store, &MacroDefinitions::parse(&store), &[]);
        let devel = sections.get("package -n foo-devel").unwrap().clone();
        remove(&mut store, &devel).unwrap();
        assert!(!store.render().contains("Summary: Headers"));
    }

    #[test]
    fn test_update_header() {
        let (mut store, sections) = parse(SPEC);
        let mut devel = sections.get("description -n foo-devel").unwrap().clone();

        if let Some(options) = devel.options.as_mut() {
            options.set_text('n', "foo-headers").unwrap();
        }
        update_header(&mut store, &devel).unwrap();

        assert!(store.render().contains("\n%description -n foo-headers\nHeaders for foo.\n"));
    }

    #[test]
    fn test_cannot_insert_before_preamble() {
        let (mut store, sections) = parse(SPEC);

        let result = insert(&mut store, &sections, 0, "build", vec![]);

        assert!(matches!(result, Err(EngineError::Conflict(_))));
    }
}
