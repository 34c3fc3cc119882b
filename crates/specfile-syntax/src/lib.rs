//! # specfile-syntax
//!
//! Lossless, line-local lexers used by the spec file engine.
//!
//! Nothing in this crate knows about documents, sections or validity. It
//! answers small syntactic questions about a single string:
//!
//! - [`lexer`] splits a directive's option string into tokens using [Logos],
//!   keeping the raw text of every token so an untouched option string
//!   renders back byte for byte.
//! - [`options`] layers getopt-style semantics over those tokens: flags,
//!   options with attached or separate arguments, positionals.
//! - [`macros`] scans macro references (`%name`, `%{?name:body}`, `%(shell)`,
//!   `%[expr]`) into nodes and counts unbalanced brackets, which is how
//!   multi-line values and macro bodies are delimited.
//!
//! [Logos]: https://docs.rs/logos
//!
//! ## Quick Start
//!
//! ```
//! use specfile_syntax::options::{OptionValue, Options};
//!
//! let mut options = Options::parse("-q -n %{name}-%{version}", "a:b:cDn:Tq").unwrap();
//! assert_eq!(options.get('n'), Some(OptionValue::Text("%{name}-%{version}".into())));
//!
//! options.set_flag('c', true).unwrap();
//! assert_eq!(options.to_string(), "-q -n %{name}-%{version} -c");
//! ```

pub mod lexer;
pub mod macros;
pub mod options;

pub use lexer::{Token, TokenKind, tokenize};
pub use macros::{MacroNode, UnterminatedMacro, count_brackets, parse_value};
pub use options::{OptionValue, Options, OptionsError};
