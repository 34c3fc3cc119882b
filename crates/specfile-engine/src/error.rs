/// Errors surfaced by the structural model and its edit sessions.
///
/// Unresolvable conditions are not errors; they are recorded as
/// [`Diagnostic`](crate::parsing::conditions::Diagnostic)s.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Malformed directive `{directive}`: {reason}")]
    MalformedDirective { directive: String, reason: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("A {0} session is already open over the same range")]
    Reentrancy(String),

    #[error("Malformed document at line {line}: {reason}")]
    MalformedDocument { line: usize, reason: String },

    #[error("Document is not backed by persistent storage")]
    NotFileBacked,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] specfile_config::ConfigError),
}

impl EngineError {
    pub(crate) fn malformed_directive(directive: &str, reason: impl ToString) -> Self {
        EngineError::MalformedDirective {
            directive: directive.trim().to_string(),
            reason: reason.to_string(),
        }
    }

    /// `index` is zero-based; the message reports one-based line numbers.
    pub(crate) fn malformed_document(index: usize, reason: impl Into<String>) -> Self {
        EngineError::MalformedDocument {
            line: index + 1,
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
