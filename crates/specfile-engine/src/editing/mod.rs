//! Documents and the sessions that edit them.

pub mod accessors;
pub mod document;
pub mod session;

pub use document::{Degradation, Document, DocumentBuilder};
pub use session::{Session, View};
