//! Structural views over the Line Store.
//!
//! Each view is parsed from the current lines on demand and refers back to
//! them through [`lines::LineId`]s, so a view never holds stale copies of
//! document text. Edits are free functions that locate their target by id
//! and splice the store.

pub mod changelog;
pub mod conditions;
pub mod evr;
pub mod lines;
pub mod macro_definitions;
pub mod prep;
pub mod sections;
pub mod sources;
pub mod tags;

/// Best match among same-named items: the last valid one, or the last one
/// when none is valid.
pub(crate) fn best_match<'a, T: 'a>(
    items: impl IntoIterator<Item = &'a T>,
    valid: impl Fn(&T) -> bool,
) -> Option<&'a T> {
    let mut last = None;
    let mut last_valid = None;
    for item in items {
        if valid(item) {
            last_valid = Some(item);
        }
        last = Some(item);
    }
    last_valid.or(last)
}
