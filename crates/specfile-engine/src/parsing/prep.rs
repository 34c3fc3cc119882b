//! `%setup`, `%patch`, `%autosetup` and `%autopatch` in `%prep`.
//!
//! Only the option grammar of these directives is interpreted. Each one
//! keeps the text around it on its line (indentation, a `%{?cond:` wrapper
//! and its closing brace) so an unmodified directive renders identically.

use std::sync::LazyLock;

use regex::Regex;
use specfile_syntax::macros::find_macro_end;
use specfile_syntax::{OptionValue, Options, OptionsError};

use crate::error::{EngineError, Result};
use crate::parsing::lines::{LineId, LineStore};
use crate::parsing::macro_definitions::MacroDefinitions;
use crate::parsing::sections::{self, Section, Sections};

static WRAPPER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\{!?\?\w+:").expect("valid conditional wrapper regex"));

static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^%])(%(setup|patch\d*|autosetup|autopatch))\b").expect("valid prep directive regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeKind {
    Setup,
    Patch,
    Autosetup,
    Autopatch,
}

impl RecipeKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "setup" => Some(RecipeKind::Setup),
            "autosetup" => Some(RecipeKind::Autosetup),
            "autopatch" => Some(RecipeKind::Autopatch),
            n if n.starts_with("patch") => Some(RecipeKind::Patch),
            _ => None,
        }
    }

    pub fn optstring(self) -> &'static str {
        match self {
            RecipeKind::Setup => "a:b:cDn:Tq",
            RecipeKind::Patch => "P:p:REb:z:F:d:o:Z",
            RecipeKind::Autosetup => "a:b:cDn:TvNS:p:",
            RecipeKind::Autopatch => "vp:m:M:",
        }
    }
}

/// Which patches an `%autopatch` applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutopatchFilter {
    /// `-m N`: patches numbered N and above
    From(u64),
    /// `-M N`: patches numbered up to N
    Until(u64),
    /// A positional number: that patch alone
    Only(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeMacro {
    pub kind: RecipeKind,
    /// Name as written, without `%` (`patch3`)
    pub name: String,
    pub options: Options,
    pub valid: bool,
    prefix: String,
    delimiter: String,
    suffix: String,
    line: Option<LineId>,
}

impl RecipeMacro {
    /// A `%patch -P<number>` directive with `extra` options after it.
    pub fn patch(number: u32, extra: &str) -> Result<Self> {
        let optstring = RecipeKind::Patch.optstring();
        let mut options =
            Options::parse(extra, optstring).map_err(|err| EngineError::malformed_directive(extra, err))?;
        while options.remove('P') {}
        let text = if options.is_empty() {
            format!("-P{number}")
        } else {
            format!("-P{number} {options}")
        };
        let options = Options::parse(&text, optstring)
            .map_err(|err| EngineError::malformed_directive(&text, err))?;
        Ok(Self {
            kind: RecipeKind::Patch,
            name: "patch".to_string(),
            options,
            valid: true,
            prefix: String::new(),
            delimiter: " ".to_string(),
            suffix: String::new(),
            line: None,
        })
    }

    pub fn id(&self) -> Option<LineId> {
        self.line
    }

    /// Patch number of a `%patch`: the `-P` value, then the number in the
    /// name, then the first positional, then 0.
    pub fn patch_number(&self) -> Option<u64> {
        if self.kind != RecipeKind::Patch {
            return None;
        }
        let number = self
            .options
            .number('P')
            .or_else(|| self.name["patch".len()..].parse().ok())
            .or_else(|| self.options.positionals().first().and_then(|p| p.parse().ok()))
            .unwrap_or(0);
        Some(number)
    }

    /// Renumber a `%patch`, through `-P` when present and the name otherwise.
    pub fn set_patch_number(&mut self, number: u64) -> Result<()> {
        if self.kind != RecipeKind::Patch {
            return Err(EngineError::malformed_directive(&self.render(), "not a %patch directive"));
        }
        if self.options.has('P') {
            self.set_option('P', OptionValue::Number(number))
        } else {
            self.name = format!("patch{number}");
            Ok(())
        }
    }

    /// `-p` of `%patch`, `%autosetup` and `%autopatch`.
    pub fn strip_level(&self) -> Option<u64> {
        self.options.number('p')
    }

    pub fn autopatch_filter(&self) -> Result<Option<AutopatchFilter>> {
        if self.kind != RecipeKind::Autopatch {
            return Ok(None);
        }
        check_autopatch(&self.options).map_err(|reason| EngineError::malformed_directive(&self.render(), reason))
    }

    pub fn set_option(&mut self, option: char, value: OptionValue) -> Result<()> {
        let result = match value {
            OptionValue::Flag => self.options.set_flag(option, true),
            OptionValue::Number(n) => self.options.set_number(option, n),
            OptionValue::Text(text) => self.options.set_text(option, &text),
        };
        result.map_err(|err| EngineError::malformed_directive(&self.render(), err))
    }

    /// Remove an option. Returns whether it was present.
    pub fn remove_option(&mut self, option: char) -> bool {
        self.options.remove(option)
    }

    pub fn render(&self) -> String {
        let delimiter = if self.options.is_empty() {
            ""
        } else if self.delimiter.is_empty() {
            " "
        } else {
            &self.delimiter
        };
        format!("{}%{}{delimiter}{}{}", self.prefix, self.name, self.options, self.suffix)
    }
}

fn check_autopatch(options: &Options) -> std::result::Result<Option<AutopatchFilter>, String> {
    let positionals = options.positionals();
    if positionals.len() > 1 {
        return Err("more than one patch number".to_string());
    }
    let positional = match positionals.first() {
        Some(p) => Some(
            p.parse::<u64>()
                .map_err(|_| format!("`{p}` is not a patch number"))?,
        ),
        None => None,
    };
    let filters = [
        options.number('m').map(AutopatchFilter::From),
        options.number('M').map(AutopatchFilter::Until),
        positional.map(AutopatchFilter::Only),
    ];
    let mut present = filters.into_iter().flatten();
    let filter = present.next();
    if present.next().is_some() {
        return Err("-m, -M and a patch number are mutually exclusive".to_string());
    }
    Ok(filter)
}

/// Byte ranges a directive may sit in: the bodies of `%{?cond:...}`
/// wrappers and the text between them.
fn scopes(text: &str) -> Vec<(usize, usize)> {
    let mut scopes = Vec::new();
    let mut from = 0;
    while let Some(wrapper) = WRAPPER.find_at(text, from) {
        let Some(close) = find_macro_end(text, wrapper.start() + 1) else {
            break;
        };
        scopes.push((from, wrapper.start()));
        scopes.push((wrapper.end(), close - 1));
        from = close;
    }
    scopes.push((from, text.len()));
    scopes
}

fn parse_line(text: &str) -> Option<(RecipeKind, String, String, String, &str, String)> {
    scopes(text).into_iter().find_map(|(start, end)| {
        let scope = &text[start..end];
        let caps = DIRECTIVE.captures(scope)?;
        let whole = caps.get(1)?;
        let name = caps[2].to_string();
        let kind = RecipeKind::from_name(&name)?;
        let rest = &scope[whole.end()..];
        let options = rest.trim_start();
        let delimiter = rest[..rest.len() - options.len()].to_string();
        let prefix = text[..start + whole.start()].to_string();
        let suffix = text[end..].to_string();
        Some((kind, name, prefix, delimiter, options, suffix))
    })
}

fn parse_macro(text: &str, line: LineId, live: bool) -> Result<Option<RecipeMacro>> {
    let Some((kind, name, prefix, delimiter, raw, suffix)) = parse_line(text) else {
        return Ok(None);
    };
    let options = Options::parse(raw, kind.optstring())
        .and_then(|options| options.validate().map(|()| options))
        .map_err(|err: OptionsError| EngineError::malformed_directive(text, err))?;
    if kind == RecipeKind::Autopatch {
        check_autopatch(&options).map_err(|reason| EngineError::malformed_directive(text, reason))?;
    }
    Ok(Some(RecipeMacro {
        kind,
        name,
        options,
        valid: live,
        prefix,
        delimiter,
        suffix,
        line: Some(line),
    }))
}

/// Directives of the first `%prep` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prep {
    macros: Vec<RecipeMacro>,
    section: Option<Section>,
}

impl Prep {
    pub fn parse(store: &LineStore, definitions: &MacroDefinitions, sections: &Sections) -> Result<Self> {
        let section = sections.find_all("prep").next().cloned();
        let mut macros = Vec::new();
        if let Some(section) = &section {
            for index in section.body() {
                if definitions.covers(index) {
                    continue;
                }
                let line = &store.lines()[index];
                if let Some(recipe) = parse_macro(line.text(), line.id(), line.is_live())? {
                    macros.push(recipe);
                }
            }
        }
        log::debug!("Found {} %prep directives", macros.len());
        Ok(Self { macros, section })
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecipeMacro> {
        self.macros.iter()
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    /// First directive of the given kind.
    pub fn get(&self, kind: RecipeKind) -> Option<&RecipeMacro> {
        self.macros.iter().find(|m| m.kind == kind)
    }

    pub fn patch(&self, number: u64) -> Option<&RecipeMacro> {
        self.macros.iter().find(|m| m.patch_number() == Some(number))
    }
}

fn located(store: &LineStore, recipe: &RecipeMacro) -> Result<usize> {
    recipe
        .line
        .and_then(|id| store.position(id))
        .ok_or_else(|| EngineError::NotFound(format!("%{} directive", recipe.name)))
}

/// Write a modified directive back over its line.
pub fn update(store: &mut LineStore, recipe: &RecipeMacro) -> Result<()> {
    let at = located(store, recipe)?;
    store.replace(at..at + 1, vec![recipe.render()]);
    Ok(())
}

/// Add `%patch -P<number>` next to the `%patch` with the nearest number,
/// or after the last directive when there is none.
pub fn add_patch_macro(store: &mut LineStore, prep: &Prep, number: u32, extra: &str) -> Result<()> {
    let section = prep
        .section
        .as_ref()
        .ok_or_else(|| EngineError::NotFound("%prep section".to_string()))?;
    let recipe = RecipeMacro::patch(number, extra)?;
    let target = u64::from(number);
    let nearest = prep
        .macros
        .iter()
        .filter_map(|m| m.patch_number().map(|n| (m, n)))
        .min_by_key(|(_, n)| n.abs_diff(target));
    let at = match (nearest, prep.macros.last()) {
        (Some((anchor, n)), _) => {
            let at = located(store, anchor)?;
            if n <= target { at + 1 } else { at }
        }
        (None, Some(last)) => located(store, last)? + 1,
        (None, None) => {
            let range = sections::locate(store, section)?;
            let mut at = range.end;
            while at > range.start + 1 && store.text(at - 1).trim().is_empty() {
                at -= 1;
            }
            at
        }
    };
    store.insert(at, vec![recipe.render()]);
    Ok(())
}

pub fn remove_patch_macro(store: &mut LineStore, prep: &Prep, number: u64) -> Result<()> {
    let recipe = prep
        .patch(number)
        .ok_or_else(|| EngineError::NotFound(format!("%patch {number}")))?;
    let at = located(store, recipe)?;
    store.delete(at..at + 1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const SPEC: &str = "\
Name: foo

%prep
%setup -q -n %{name}-%{version}
%patch0 -p1
%{?with_nss:%patch -P 30 -p3 -b .nss}
  %patch 2 -p1 -R
sed -i 's/a/b/' Makefile

%build
";

    fn parse(store: &LineStore) -> Result<Prep> {
        let definitions = MacroDefinitions::parse(store);
        let sections = Sections::parse(store, &definitions, &[]);
        Prep::parse(store, &definitions, &sections)
    }

    #[test]
    fn test_parse_directives() {
        let store = LineStore::load(SPEC);

        let prep = parse(&store).unwrap();

        let kinds: Vec<_> = prep.iter().map(|m| (m.kind, m.patch_number())).collect();
        assert_eq!(
            kinds,
            vec![
                (RecipeKind::Setup, None),
                (RecipeKind::Patch, Some(0)),
                (RecipeKind::Patch, Some(30)),
                (RecipeKind::Patch, Some(2)),
            ]
        );
        let setup = prep.get(RecipeKind::Setup).unwrap();
        assert!(setup.options.flag('q'));
        assert_eq!(setup.options.text('n').as_deref(), Some("%{name}-%{version}"));
        assert_eq!(prep.patch(30).unwrap().strip_level(), Some(3));
    }

    #[test]
    fn test_render_is_lossless() {
        let store = LineStore::load(SPEC);
        let prep = parse(&store).unwrap();

        let rendered: Vec<_> = prep.iter().map(RecipeMacro::render).collect();

        assert_eq!(rendered, store.texts(3..7));
    }

    #[rstest]
    #[case("%setup -q -n \"foo", "No closing quotation")]
    #[case("%setup -q -n foo\\", "No escaped character")]
    #[case("%patch -p", "Option -p requires an argument")]
    #[case("%autopatch -m 2 -M 4", "-m, -M and a patch number are mutually exclusive")]
    #[case("%autopatch -p1 3 4", "more than one patch number")]
    fn test_malformed_directives(#[case] line: &str, #[case] reason: &str) {
        let store = LineStore::load(&format!("%prep\n{line}\n"));

        let err = parse(&store).unwrap_err();

        match err {
            EngineError::MalformedDirective { reason: actual, .. } => assert_eq!(actual, reason),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[rstest]
    #[case("%autopatch -p1", None)]
    #[case("%autopatch -p1 -m 100", Some(AutopatchFilter::From(100)))]
    #[case("%autopatch -M 99", Some(AutopatchFilter::Until(99)))]
    #[case("%autopatch 7", Some(AutopatchFilter::Only(7)))]
    fn test_autopatch_filter(#[case] line: &str, #[case] expected: Option<AutopatchFilter>) {
        let store = LineStore::load(&format!("%prep\n{line}\n"));

        let prep = parse(&store).unwrap();

        assert_eq!(prep.get(RecipeKind::Autopatch).unwrap().autopatch_filter().unwrap(), expected);
    }

    #[rstest]
    #[case("%patchset -p1")]
    #[case("echo %%patch1")]
    #[case("%setup_x")]
    fn test_not_a_directive(#[case] line: &str) {
        let store = LineStore::load(&format!("%prep\n{line}\n"));

        assert!(parse(&store).unwrap().is_empty());
    }

    #[test]
    fn test_add_patch_macro_by_nearest_number() {
        let mut store = LineStore::load(SPEC);
        let prep = parse(&store).unwrap();

        add_patch_macro(&mut store, &prep, 1, "-p1").unwrap();
        let prep = parse(&store).unwrap();
        add_patch_macro(&mut store, &prep, 40, "").unwrap();

        assert_snapshot!(store.render(), @r"
        Name: foo

        %prep
        %setup -q -n %{name}-%{version}
        %patch0 -p1
        %patch -P1 -p1
        %{?with_nss:%patch -P 30 -p3 -b .nss}
        %patch -P40
          %patch 2 -p1 -R
        sed -i 's/a/b/' Makefile

        %build
        ");
    }

    #[test]
    fn test_add_patch_macro_to_empty_prep() {
        let mut store = LineStore::load("%prep\n\n%build\n");
        let prep = parse(&store).unwrap();

        add_patch_macro(&mut store, &prep, 3, "-p1 -P 9").unwrap();

        assert_eq!(store.render(), "%prep\n%patch -P3 -p1\n\n%build\n");
    }

    #[test]
    fn test_remove_patch_macro() {
        let mut store = LineStore::load(SPEC);
        let prep = parse(&store).unwrap();

        let missing = remove_patch_macro(&mut store, &prep, 5);
        assert!(matches!(missing, Err(EngineError::NotFound(_))));

        remove_patch_macro(&mut store, &prep, 30).unwrap();
        assert!(!store.render().contains("with_nss"));
    }

    #[test]
    fn test_edit_options() {
        let mut store = LineStore::load(SPEC);
        let prep = parse(&store).unwrap();

        let mut setup = prep.get(RecipeKind::Setup).unwrap().clone();
        assert!(setup.remove_option('q'));
        setup.set_option('c', OptionValue::Flag).unwrap();
        update(&mut store, &setup).unwrap();

        let mut wrapped = prep.patch(30).unwrap().clone();
        wrapped.set_option('p', OptionValue::Number(1)).unwrap();
        wrapped.set_patch_number(31).unwrap();
        update(&mut store, &wrapped).unwrap();

        let mut renamed = prep.patch(0).unwrap().clone();
        renamed.set_patch_number(10).unwrap();
        update(&mut store, &renamed).unwrap();

        assert_eq!(
            store.texts(3..6),
            vec![
                "%setup -n %{name}-%{version} -c",
                "%patch10 -p1",
                "%{?with_nss:%patch -P 31 -p1 -b .nss}"
            ]
        );
    }

    #[rstest]
    #[case("%{?with_x:export X=1;} %patch -P2 -p1", 2, "%{?with_x:export X=1;} %patch -P2 -p2")]
    #[case("%patch -P2 -p1 %{?with_x:-b .x}", 2, "%patch -P2 -p2 %{?with_x:-b .x}")]
    #[case("%{?with_x:true} %{!?with_y:%patch -P2 -p1}", 2, "%{?with_x:true} %{!?with_y:%patch -P2 -p2}")]
    fn test_directive_beside_wrapper(#[case] line: &str, #[case] number: u64, #[case] edited: &str) {
        let mut store = LineStore::load(&format!("%prep\n{line}\n"));
        let prep = parse(&store).unwrap();
        assert_eq!(prep.len(), 1);

        let mut patch = prep.patch(number).unwrap().clone();
        assert_eq!(patch.render(), line);
        patch.set_option('p', OptionValue::Number(2)).unwrap();
        update(&mut store, &patch).unwrap();

        assert_eq!(store.text(1), edited);
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        let store = LineStore::load(SPEC);
        let prep = parse(&store).unwrap();
        let mut setup = prep.get(RecipeKind::Setup).unwrap().clone();

        let result = setup.set_option('x', OptionValue::Flag);

        assert!(matches!(result, Err(EngineError::MalformedDirective { .. })));
    }
}
