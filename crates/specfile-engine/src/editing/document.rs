use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::rc::Rc;
use std::sync::LazyLock;

use regex::Regex;
use specfile_config::{Config, IndeterminatePolicy};

use crate::editing::session::{Session, View};
use crate::error::{EngineError, Result};
use crate::io::{DirectoryLocator, FileLocator, FilePersistence, Persistence};
use crate::macros::{
    BasicConditionEvaluator, BasicEvaluator, ConditionEvaluator, ExpandError, MacroContext,
    MacroEvaluator,
};
use crate::parsing::changelog::{Changelog, ChangelogEntry};
use crate::parsing::conditions::{self, Checkpoint, ConditionTracker, Diagnostic};
use crate::parsing::lines::{LineId, LineStore, Validity};
use crate::parsing::macro_definitions::{MacroDefinition, MacroDefinitions};
use crate::parsing::prep::Prep;
use crate::parsing::sections::Sections;
use crate::parsing::sources::{SourceKind, Sources};
use crate::parsing::tags::Tags;

static INCLUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*%include\s+(\S+)").expect("valid include regex"));

static LOAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\{load:([^}]+)\}").expect("valid load regex"));

/// A directive whose content could not be pulled in, so the structure
/// around it is only a best effort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Degradation {
    pub line: LineId,
    pub directive: String,
    pub file: String,
}

/// A parsed spec document.
///
/// Owns the line store and the macro context. Views such as [`Tags`] or
/// [`Sources`] are parsed from the current lines whenever they are asked
/// for; edits go through a [`Session`] opened with [`Document::open`].
pub struct Document {
    pub(crate) store: LineStore,
    context: MacroContext,
    evaluator: Rc<dyn MacroEvaluator>,
    conditions: Rc<dyn ConditionEvaluator>,
    policy: IndeterminatePolicy,
    extra_sections: Vec<String>,
    persistence: Option<Rc<dyn Persistence>>,
    locator: Option<Rc<dyn FileLocator>>,
    autosave: bool,
    diagnostics: Vec<Diagnostic>,
    degradations: Vec<Degradation>,
    pub(crate) redirected: Vec<ChangelogEntry>,
    /// Views of the currently open sessions, outermost first
    pub(crate) open_views: Vec<View>,
    /// Store generation at the last commit
    committed: u64,
    /// Macro context at each outermost conditional block, from the last full scan
    checkpoints: Vec<Checkpoint>,
    /// Rendered macro definitions as of the last full scan
    defined: Vec<Vec<String>>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("lines", &self.store.len())
            .field("context", &self.context)
            .field("policy", &self.policy)
            .field("file_backed", &self.persistence.is_some())
            .field("autosave", &self.autosave)
            .field("diagnostics", &self.diagnostics)
            .field("degradations", &self.degradations)
            .field("open_views", &self.open_views)
            .finish()
    }
}

/// Configures a [`Document`] before its first parse.
pub struct DocumentBuilder {
    context: MacroContext,
    evaluator: Rc<dyn MacroEvaluator>,
    conditions: Rc<dyn ConditionEvaluator>,
    policy: IndeterminatePolicy,
    extra_sections: Vec<String>,
    persistence: Option<Rc<dyn Persistence>>,
    locator: Option<Rc<dyn FileLocator>>,
    autosave: bool,
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self {
            context: MacroContext::new(),
            evaluator: Rc::new(BasicEvaluator),
            conditions: Rc::new(BasicConditionEvaluator),
            policy: IndeterminatePolicy::default(),
            extra_sections: Vec::new(),
            persistence: None,
            locator: None,
            autosave: false,
        }
    }
}

impl DocumentBuilder {
    /// Override a macro for this document only.
    pub fn define(mut self, name: &str, body: &str) -> Self {
        self.context.define(name, body);
        self
    }

    /// Hide a macro from the document and the built-ins.
    pub fn undefine(mut self, name: &str) -> Self {
        self.context.undefine(name);
        self
    }

    pub fn target(mut self, cpu: Option<&str>, os: Option<&str>) -> Self {
        self.context.set_target(cpu, os);
        self
    }

    pub fn evaluator(mut self, evaluator: Rc<dyn MacroEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn condition_evaluator(mut self, conditions: Rc<dyn ConditionEvaluator>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn indeterminate(mut self, policy: IndeterminatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Accept `%name` as a section header in addition to the standard names.
    pub fn extra_section(mut self, name: &str) -> Self {
        self.extra_sections.push(name.to_string());
        self
    }

    pub fn persistence(mut self, persistence: impl Persistence + 'static) -> Self {
        self.persistence = Some(Rc::new(persistence));
        self
    }

    pub fn locator(mut self, locator: impl FileLocator + 'static) -> Self {
        self.locator = Some(Rc::new(locator));
        self
    }

    pub fn autosave(mut self, autosave: bool) -> Self {
        self.autosave = autosave;
        self
    }

    /// Document backed by the file at `path`, with included files looked up
    /// beside it.
    pub fn path(self, path: &Path) -> Self {
        self.persistence(FilePersistence::new(path))
            .locator(DirectoryLocator::beside(path))
    }

    /// Apply a configuration file: overrides, target, policy, extra section
    /// names, autosave and, when set, the spec path and source directory.
    pub fn with_config(mut self, config: &Config) -> Self {
        let mut context = MacroContext::from_config(config);
        for (name, value) in self.context.overrides() {
            match value {
                Some(value) => context.define(name, &value.body),
                None => context.undefine(name),
            }
        }
        self.context = context;
        self.policy = config.indeterminate;
        self.autosave = config.autosave;
        self.extra_sections.extend(config.extra_sections.iter().cloned());
        if let Some(path) = &config.spec_path {
            self = self.path(path);
        }
        if let Some(sourcedir) = &config.sourcedir {
            self = self.locator(DirectoryLocator::new(sourcedir));
        }
        self
    }

    /// Apply the configuration file at `path`, if there is one.
    pub fn with_config_file(self, path: impl AsRef<Path>) -> Result<Self> {
        Ok(match Config::load_from_path(path)? {
            Some(config) => self.with_config(&config),
            None => self,
        })
    }

    /// Read the text from the configured persistence and parse it.
    pub fn build(self) -> Result<Document> {
        let persistence = self.persistence.clone().ok_or(EngineError::NotFileBacked)?;
        let text = persistence.read()?;
        self.build_from_text(&text)
    }

    pub fn build_from_text(self, text: &str) -> Result<Document> {
        let mut document = Document {
            store: LineStore::load(text),
            context: self.context,
            evaluator: self.evaluator,
            conditions: self.conditions,
            policy: self.policy,
            extra_sections: self.extra_sections,
            persistence: self.persistence,
            locator: self.locator,
            autosave: self.autosave,
            diagnostics: Vec::new(),
            degradations: Vec::new(),
            redirected: Vec::new(),
            open_views: Vec::new(),
            committed: 0,
            checkpoints: Vec::new(),
            defined: Vec::new(),
        };
        document.parse()?;
        Ok(document)
    }
}

impl Document {
    pub fn builder() -> DocumentBuilder {
        DocumentBuilder::default()
    }

    pub fn from_text(text: &str) -> Result<Self> {
        Self::builder().build_from_text(text)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::builder().path(path).build()
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::builder().with_config(config).build()
    }

    /// Open the document named by the user's configuration file.
    pub fn from_default_config() -> Result<Self> {
        let config = Config::load()?.unwrap_or_default();
        Self::from_config(&config)
    }

    fn parse(&mut self) -> Result<()> {
        self.scan()?;
        self.detect_degradations();
        self.store.forget_edits(self.store.generation());
        self.committed = self.store.generation();
        log::debug!(
            "Parsed document: {} lines, {} unresolved conditions, {} degraded directives",
            self.store.len(),
            self.diagnostics.len(),
            self.degradations.len()
        );
        Ok(())
    }

    /// Discard all structural state and parse again. A file-backed document
    /// is read back from its storage first.
    pub fn reload(&mut self) -> Result<()> {
        if !self.open_views.is_empty() {
            return Err(EngineError::Reentrancy("reload".to_string()));
        }
        if let Some(persistence) = &self.persistence {
            self.store = LineStore::load(&persistence.read()?);
        } else {
            self.store = LineStore::load(&self.store.render());
        }
        self.redirected.clear();
        self.parse()
    }

    pub fn save(&self) -> Result<()> {
        let persistence = self.persistence.as_ref().ok_or(EngineError::NotFileBacked)?;
        persistence.write(&self.store.render())?;
        log::debug!("Saved document ({} lines)", self.store.len());
        Ok(())
    }

    pub fn is_file_backed(&self) -> bool {
        self.persistence.is_some()
    }

    pub fn autosave(&self) -> bool {
        self.autosave
    }

    pub fn set_autosave(&mut self, autosave: bool) {
        self.autosave = autosave;
    }

    /// Fully independent copy that is not file backed.
    pub fn deep_clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            context: self.context.clone(),
            evaluator: Rc::clone(&self.evaluator),
            conditions: Rc::clone(&self.conditions),
            policy: self.policy,
            extra_sections: self.extra_sections.clone(),
            persistence: None,
            locator: self.locator.clone(),
            autosave: false,
            diagnostics: self.diagnostics.clone(),
            degradations: self.degradations.clone(),
            redirected: self.redirected.clone(),
            open_views: Vec::new(),
            committed: self.committed,
            checkpoints: self.checkpoints.clone(),
            defined: self.defined.clone(),
        }
    }

    /// Read-only access that bypasses sessions. Anything changed through the
    /// returned copy is lost.
    pub fn snapshot(&self) -> Self {
        self.deep_clone()
    }

    /// Open an edit session over `view`.
    pub fn open(&mut self, view: View) -> Result<Session<'_>> {
        Session::begin(self, view)
    }

    pub fn render(&self) -> String {
        self.store.render()
    }

    pub fn lines(&self) -> &LineStore {
        &self.store
    }

    pub fn context(&self) -> &MacroContext {
        &self.context
    }

    /// Set (`Some`) or undefine (`None`) a macro override. Takes effect on
    /// the next [`Document::reload`].
    pub fn set_override(&mut self, name: &str, body: Option<&str>) {
        match body {
            Some(body) => self.context.define(name, body),
            None => self.context.undefine(name),
        }
        self.checkpoints.clear();
    }

    pub fn clear_override(&mut self, name: &str) -> bool {
        self.checkpoints.clear();
        self.context.clear_override(name)
    }

    pub fn expand(&self, text: &str) -> Result<String, ExpandError> {
        self.evaluator.expand(text, &self.context)
    }

    pub fn evaluator(&self) -> &dyn MacroEvaluator {
        &*self.evaluator
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn degradations(&self) -> &[Degradation] {
        &self.degradations
    }

    /// Whether part of the document could not be resolved.
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }

    /// Changelog entries that were not written because the document uses
    /// `%autochangelog`.
    pub fn redirected_entries(&self) -> &[ChangelogEntry] {
        &self.redirected
    }

    pub fn macro_definitions(&self) -> MacroDefinitions {
        MacroDefinitions::parse(&self.store)
    }

    pub fn sections(&self) -> Sections {
        Sections::parse(&self.store, &self.macro_definitions(), &self.extra_sections)
    }

    /// Tags of one section, or of the preamble and every `%package` section
    /// when `section` is `None`.
    pub fn tags(&self, section: Option<&str>) -> Result<Tags> {
        let definitions = self.macro_definitions();
        let sections = Sections::parse(&self.store, &definitions, &self.extra_sections);
        match section {
            None => Ok(Tags::parse_all(&self.store, &definitions, &sections)),
            Some(id) => {
                let section = sections
                    .get(id)
                    .ok_or_else(|| EngineError::NotFound(format!("section %{id}")))?;
                Ok(Tags::parse(&self.store, &definitions, section))
            }
        }
    }

    fn registry(&self, kind: SourceKind) -> Result<Sources> {
        let definitions = self.macro_definitions();
        let sections = Sections::parse(&self.store, &definitions, &self.extra_sections);
        Sources::parse(
            &self.store,
            &definitions,
            &sections,
            kind,
            &*self.evaluator,
            &self.context,
        )
    }

    pub fn sources(&self) -> Result<Sources> {
        self.registry(SourceKind::Source)
    }

    pub fn patches(&self) -> Result<Sources> {
        self.registry(SourceKind::Patch)
    }

    pub fn changelog(&self) -> Changelog {
        Changelog::parse(&self.store, &self.sections())
    }

    pub fn prep(&self) -> Result<Prep> {
        let definitions = self.macro_definitions();
        let sections = Sections::parse(&self.store, &definitions, &self.extra_sections);
        Prep::parse(&self.store, &definitions, &sections)
    }

    /// Called when the outermost session closes.
    pub(crate) fn commit(&mut self) -> Result<()> {
        let generation = self.store.generation();
        if generation == self.committed {
            return Ok(());
        }
        self.revalidate(self.committed)?;
        self.store.forget_edits(generation);
        self.committed = generation;
        if self.autosave && self.persistence.is_some() {
            self.save()?;
        }
        Ok(())
    }

    fn scan(&mut self) -> Result<()> {
        let scan = ConditionTracker::new(
            &mut self.context,
            &*self.evaluator,
            &*self.conditions,
            self.policy,
        )
        .scan(&mut self.store)?;
        self.diagnostics = scan.diagnostics;
        self.checkpoints = scan.checkpoints;
        self.defined = self.rendered_definitions();
        Ok(())
    }

    fn rendered_definitions(&self) -> Vec<Vec<String>> {
        MacroDefinitions::parse(&self.store)
            .iter()
            .map(MacroDefinition::render)
            .collect()
    }

    /// Bring line validity up to date with the edits made since `since`.
    fn revalidate(&mut self, since: u64) -> Result<()> {
        let structural = self
            .store
            .edits_since(since)
            .any(|edit| edit.touched_text().any(conditions::is_structural))
            || self.rendered_definitions() != self.defined;
        if structural {
            log::debug!("Structural edit, re-scanning the whole document");
            self.scan()?;
        } else {
            let spans = conditions::block_spans(&self.store)?;
            let inserted: BTreeSet<usize> = self
                .store
                .edits_since(since)
                .flat_map(|edit| edit.inserted.iter())
                .filter_map(|id| self.store.position(*id))
                .collect();
            let mut affected: Vec<Range<usize>> = Vec::new();
            for index in inserted {
                match spans.iter().find(|span| span.contains(&index)) {
                    Some(span) if !affected.contains(span) => affected.push(span.clone()),
                    Some(_) => {}
                    None => self.store.set_validity(index, Validity::Live),
                }
            }
            let mut resumable = Vec::new();
            for span in affected {
                let start = self.store.lines()[span.start].id();
                match self.checkpoints.iter().position(|c| c.line == start) {
                    Some(checkpoint) => resumable.push((span, checkpoint)),
                    None => {
                        log::debug!("No checkpoint for block at line {}, re-scanning the whole document", span.start + 1);
                        self.scan()?;
                        self.detect_degradations();
                        return Ok(());
                    }
                }
            }
            for (span, checkpoint) in resumable {
                log::debug!("Re-scanning conditional block at lines {}..{}", span.start + 1, span.end);
                let stale: Vec<LineId> = self.store.lines()[span.clone()].iter().map(|l| l.id()).collect();
                self.diagnostics.retain(|d| !stale.contains(&d.line()));
                let checkpoint = &self.checkpoints[checkpoint];
                let mut context = checkpoint.context.clone();
                let found = ConditionTracker::new(
                    &mut context,
                    &*self.evaluator,
                    &*self.conditions,
                    self.policy,
                )
                .rescan(&mut self.store, span, checkpoint)?;
                self.diagnostics.extend(found);
            }
        }
        self.detect_degradations();
        Ok(())
    }

    fn detect_degradations(&mut self) {
        let mut degradations = Vec::new();
        for line in self.store.lines().iter().filter(|l| l.is_live()) {
            let text = line.text();
            let references = INCLUDE
                .captures(text)
                .map(|caps| ("%include", caps[1].to_string()))
                .into_iter()
                .chain(LOAD.captures_iter(text).map(|caps| ("%{load:}", caps[1].to_string())));
            for (directive, raw) in references {
                let file = self
                    .evaluator
                    .expand(&raw, &self.context)
                    .unwrap_or_else(|_| raw.clone());
                let found = self.locator.as_ref().is_some_and(|l| l.exists(&file));
                if !found {
                    log::warn!("{directive} {file} can't be resolved, its content is not parsed");
                    degradations.push(Degradation {
                        line: line.id(),
                        directive: directive.to_string(),
                        file,
                    });
                }
            }
        }
        self.degradations = degradations;
    }
}
