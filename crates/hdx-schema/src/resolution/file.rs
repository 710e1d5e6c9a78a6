//! Local filesystem provider

use super::{Scheme, SchemaServiceProvider};
use crate::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Serves `file:` references, optionally below a root directory
#[derive(Debug, Clone, Default)]
pub struct FileProvider {
    root: Option<PathBuf>,
}

impl FileProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `root` instead of the working directory
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl SchemaServiceProvider for FileProvider {
    fn scheme(&self) -> Scheme {
        Scheme::File
    }

    fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path);
        trace!("Reading schema file: {:?}", full_path);

        std::fs::read(&full_path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::UnresolvedReference {
                reference: format!("file:{path}"),
                message: format!("File {} does not exist", full_path.display()),
            },
            _ => Error::Provider {
                scheme: Scheme::File.to_string(),
                message: format!("Failed to read {}: {e}", full_path.display()),
            },
        })
    }
}
