//! Edit sessions.
//!
//! A [`Session`] is the only way to change a [`Document`]. Sessions nest:
//! the outermost one commits when it closes, re-validating conditional
//! blocks touched by the edits and saving when autosave is on. Nested
//! sessions over different views may overlap; two sessions over the same
//! view and scope may not, and a macro definition session never nests with
//! anything.

use std::fmt;
use std::mem;
use std::ops::Deref;

use crate::editing::document::Document;
use crate::error::{EngineError, Result};
use crate::parsing::lines::LineStore;

/// What a session is opened over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Sections,
    /// Tags of one section by id, or of every tag-bearing section
    Tags(Option<String>),
    MacroDefinitions,
    Sources,
    Patches,
    Changelog,
    Prep,
}

impl View {
    pub fn name(&self) -> &'static str {
        match self {
            View::Sections => "sections",
            View::Tags(_) => "tags",
            View::MacroDefinitions => "macro definitions",
            View::Sources => "sources",
            View::Patches => "patches",
            View::Changelog => "changelog",
            View::Prep => "prep",
        }
    }

    /// Whether two sessions over these views would edit the same lines.
    fn overlaps(&self, other: &View) -> bool {
        match (self, other) {
            (View::Tags(Some(a)), View::Tags(Some(b))) => a.eq_ignore_ascii_case(b),
            (a, b) => mem::discriminant(a) == mem::discriminant(b),
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            View::Tags(Some(section)) => write!(f, "tags of %{section}"),
            view => f.write_str(view.name()),
        }
    }
}

/// An open edit session. Dropping it closes it; use [`Session::close`] to
/// see errors from the commit.
pub struct Session<'a> {
    document: &'a mut Document,
    view: View,
    closed: bool,
}

impl<'a> Session<'a> {
    pub(crate) fn begin(document: &'a mut Document, view: View) -> Result<Self> {
        let conflict = document.open_views.iter().find(|open| {
            **open == View::MacroDefinitions || view == View::MacroDefinitions || open.overlaps(&view)
        });
        if let Some(open) = conflict {
            log::debug!("Refusing a {view} session inside a {open} session");
            return Err(EngineError::Reentrancy(view.to_string()));
        }
        document.open_views.push(view.clone());
        log::debug!("Opened {view} session at depth {}", document.open_views.len());
        Ok(Self {
            document,
            view,
            closed: false,
        })
    }

    /// Open a nested session.
    pub fn open(&mut self, view: View) -> Result<Session<'_>> {
        Session::begin(&mut *self.document, view)
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    /// Number of sessions open on the document, this one included.
    pub fn depth(&self) -> usize {
        self.document.open_views.len()
    }

    /// Lines of the document, for the edit functions of the views.
    pub fn lines_mut(&mut self) -> &mut LineStore {
        &mut self.document.store
    }

    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.document.open_views.pop();
        log::debug!("Closed {} session", self.view);
        if self.document.open_views.is_empty() {
            self.document.commit()?;
        }
        Ok(())
    }
}

impl Deref for Session<'_> {
    type Target = Document;

    fn deref(&self) -> &Document {
        self.document
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            log::warn!("Failed to commit {} session: {err}", self.view);
        }
    }
}
