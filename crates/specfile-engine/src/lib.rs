//! Structural, format-preserving editing of RPM spec files.
//!
//! A [`Document`] keeps the text as lines and parses views (sections, tags,
//! macro definitions, sources and patches, `%prep` directives, changelog)
//! from them on demand. Edits made through a [`Session`] splice only the
//! lines that change, so untouched text renders back byte for byte.

pub mod editing;
pub mod error;
pub mod io;
pub mod macros;
pub mod parsing;

pub use editing::{Degradation, Document, DocumentBuilder, Session, View};
pub use error::{EngineError, Result};
pub use io::{DirectoryLocator, FileLocator, FilePersistence, Persistence};
pub use macros::{
    BasicConditionEvaluator, BasicEvaluator, ConditionEvaluator, ExpandError, MacroContext,
    MacroEvaluator, MacroValue, Truth,
};
pub use parsing::conditions::Diagnostic;
pub use specfile_config::{Config, ConfigError, IndeterminatePolicy};
