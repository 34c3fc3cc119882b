//! Storage seams of a [`Document`](crate::Document).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Where the text of a document is read from and written back to.
pub trait Persistence {
    fn read(&self) -> io::Result<String>;
    fn write(&self, text: &str) -> io::Result<()>;
}

/// Answers whether a file referenced by `%include` or `%{load:...}` exists.
pub trait FileLocator {
    fn exists(&self, name: &str) -> bool;
}

/// A spec file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Persistence for FilePersistence {
    fn read(&self) -> io::Result<String> {
        fs::read_to_string(&self.path)
    }

    fn write(&self, text: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, text)
    }
}

/// Resolves relative references against a directory, usually the one
/// holding the spec file or the configured source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLocator {
    root: PathBuf,
}

impl DirectoryLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Locator for the directory containing `path`.
    pub fn beside(path: &Path) -> Self {
        Self::new(path.parent().map_or_else(PathBuf::new, Path::to_path_buf))
    }
}

impl FileLocator for DirectoryLocator {
    fn exists(&self, name: &str) -> bool {
        let path = Path::new(name);
        if path.is_absolute() {
            path.is_file()
        } else {
            self.root.join(path).is_file()
        }
    }
}
