//! Bundled schema provider

use super::{Scheme, SchemaServiceProvider};
use crate::{Error, Result};
use include_dir::{Dir, include_dir};
use tracing::trace;

/// Schemas compiled into the binary from `resources/`
static BUNDLED: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/resources");

/// Serves `classpath:` references out of an embedded directory
#[derive(Debug, Clone, Copy)]
pub struct ClasspathProvider {
    dir: &'static Dir<'static>,
}

impl ClasspathProvider {
    /// Provider over this crate's bundled `resources/` directory
    pub fn bundled() -> Self {
        Self::new(&BUNDLED)
    }

    pub fn new(dir: &'static Dir<'static>) -> Self {
        Self { dir }
    }

    /// Every bundled document path, for listings
    pub fn paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        collect_paths(self.dir, &mut paths);
        paths.sort();
        paths
    }
}

fn collect_paths(dir: &Dir<'_>, paths: &mut Vec<String>) {
    for file in dir.files() {
        paths.push(format!("/{}", file.path().to_string_lossy().replace('\\', "/")));
    }
    for sub in dir.dirs() {
        collect_paths(sub, paths);
    }
}

impl SchemaServiceProvider for ClasspathProvider {
    fn scheme(&self) -> Scheme {
        Scheme::Classpath
    }

    fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let relative = path.trim_start_matches('/');
        trace!("Looking up bundled schema: {}", relative);

        self.dir
            .get_file(relative)
            .map(|file| file.contents().to_vec())
            .ok_or_else(|| Error::UnresolvedReference {
                reference: format!("classpath:/{relative}"),
                message: "No bundled schema at this path".to_string(),
            })
    }
}
