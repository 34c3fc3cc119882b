//! The Line Store: an ordered, mutable sequence of raw lines with stable
//! identity.
//!
//! Every structural view addresses the document through line positions and
//! [`LineId`]s. Positions shift when lines are inserted or removed above them;
//! ids never change for a line that was not touched, so a holder of an id can
//! always find its line again with [`LineStore::position`].

use std::ops::Range;

/// Stable identity of a line. Survives edits to other lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineId(u64);

/// Whether a line lies in a currently-true conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Validity {
    #[default]
    Live,
    Dead,
}

impl Validity {
    pub fn from_bool(live: bool) -> Self {
        if live { Validity::Live } else { Validity::Dead }
    }

    pub fn is_live(self) -> bool {
        self == Validity::Live
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    id: LineId,
    text: String,
    validity: Validity,
}

impl Line {
    pub fn id(&self) -> LineId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn validity(&self) -> Validity {
        self.validity
    }

    pub fn is_live(&self) -> bool {
        self.validity.is_live()
    }
}

/// One mutation of the store, kept until the owning session commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub generation: u64,
    /// Text of the lines that were removed
    pub removed: Vec<String>,
    /// Lines that were inserted, in order
    pub inserted: Vec<LineId>,
    pub inserted_text: Vec<String>,
}

impl Edit {
    /// All text touched by this edit, removed and inserted.
    pub fn touched_text(&self) -> impl Iterator<Item = &str> {
        self.removed
            .iter()
            .chain(self.inserted_text.iter())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct LineStore {
    lines: Vec<Line>,
    trailing_newline: bool,
    next_id: u64,
    generation: u64,
    edits: Vec<Edit>,
}

impl LineStore {
    pub fn load(text: &str) -> Self {
        let trailing_newline = text.is_empty() || text.ends_with('\n');
        let body = text.strip_suffix('\n').unwrap_or(text);
        let mut store = Self {
            lines: Vec::new(),
            trailing_newline,
            next_id: 0,
            generation: 0,
            edits: Vec::new(),
        };
        if !text.is_empty() {
            for line in body.split('\n') {
                let id = store.alloc();
                store.lines.push(Line {
                    id,
                    text: line.to_string(),
                    validity: Validity::Live,
                });
            }
        }
        store
    }

    fn alloc(&mut self) -> LineId {
        let id = LineId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Reproduce the document text. Identical to the loaded text while no
    /// line has been touched.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.lines.iter().map(|l| l.text.len() + 1).sum());
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&line.text);
        }
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn get(&self, index: usize) -> Option<&Line> {
        self.lines.get(index)
    }

    /// Text of the line at `index`, or an empty string past the end.
    pub fn text(&self, index: usize) -> &str {
        self.lines.get(index).map_or("", |l| l.text.as_str())
    }

    pub fn texts(&self, range: Range<usize>) -> Vec<&str> {
        self.lines[range].iter().map(|l| l.text.as_str()).collect()
    }

    pub fn is_live(&self, index: usize) -> bool {
        self.lines.get(index).is_some_and(Line::is_live)
    }

    /// Current position of a line, if it still exists.
    pub fn position(&self, id: LineId) -> Option<usize> {
        self.lines.iter().position(|l| l.id == id)
    }

    pub fn set_validity(&mut self, index: usize, validity: Validity) {
        if let Some(line) = self.lines.get_mut(index) {
            line.validity = validity;
        }
    }

    /// Counter bumped by every mutation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_trailing_newline(&self) -> bool {
        self.trailing_newline
    }

    /// Edits recorded after `generation`.
    pub fn edits_since(&self, generation: u64) -> impl Iterator<Item = &Edit> {
        self.edits.iter().filter(move |e| e.generation > generation)
    }

    /// Drop edit records up to and including `generation`.
    pub fn forget_edits(&mut self, generation: u64) {
        self.edits.retain(|e| e.generation > generation);
    }

    /// Replace `range` with `new_lines`. Lines equal at the start and end of
    /// the range keep their identity, so only the lines that really changed
    /// get new ids. Returns the range now occupied by `new_lines`.
    pub fn replace(&mut self, range: Range<usize>, new_lines: Vec<String>) -> Range<usize> {
        let result = range.start..range.start + new_lines.len();
        let old = &self.lines[range.clone()];
        let prefix = old
            .iter()
            .zip(&new_lines)
            .take_while(|(line, new)| line.text == **new)
            .count();
        let max_suffix = (old.len() - prefix).min(new_lines.len() - prefix);
        let suffix = old
            .iter()
            .rev()
            .zip(new_lines.iter().rev())
            .take(max_suffix)
            .take_while(|(line, new)| line.text == **new)
            .count();
        let start = range.start + prefix;
        let end = range.end - suffix;
        let middle = new_lines[prefix..new_lines.len() - suffix].to_vec();
        if start == end && middle.is_empty() {
            return result;
        }
        self.splice(start..end, middle);
        result
    }

    pub fn insert(&mut self, at: usize, lines: Vec<String>) -> Range<usize> {
        self.replace(at..at, lines)
    }

    pub fn delete(&mut self, range: Range<usize>) {
        self.replace(range, Vec::new());
    }

    fn splice(&mut self, range: Range<usize>, texts: Vec<String>) {
        self.generation += 1;
        // New lines inherit the validity of what they replace, or of the line
        // above when nothing is replaced.
        let validity = if range.is_empty() {
            range.start.checked_sub(1).and_then(|i| self.lines.get(i))
        } else {
            self.lines.get(range.start)
        }
        .map(Line::validity)
        .unwrap_or_default();
        let mut new = Vec::with_capacity(texts.len());
        for text in texts {
            let id = self.alloc();
            new.push(Line { id, text, validity });
        }
        let inserted = new.iter().map(|l| l.id).collect();
        let inserted_text = new.iter().map(|l| l.text.clone()).collect();
        let removed = self.lines.splice(range, new).map(|l| l.text).collect();
        self.edits.push(Edit {
            generation: self.generation,
            removed,
            inserted,
            inserted_text,
        });
    }
}
