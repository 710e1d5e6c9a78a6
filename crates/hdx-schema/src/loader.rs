//! Schema reader: document parsing, reference resolution and validation
//!
//! Resolution is fail-fast. The first unresolved, unparsable or circular
//! reference aborts the whole tree. Validation runs only once the tree is
//! complete and reports every problem at once.

use crate::config::SchemaConfig;
use crate::document::read_one_document;
use crate::inheritance::{ResolutionStack, apply_overlays};
use crate::model::Flavor;
use crate::registry::DocumentRegistry;
use crate::resolution::{SchemaLocation, SchemaResolutionService};
use crate::schema::Schema;
use crate::{Error, Result};
use hdx_expr::{ExpressionCompiler, SyntaxCompiler};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Loads composed schema trees through a resolution service
#[derive(Clone)]
pub struct SchemaReader {
    resolution: Arc<SchemaResolutionService>,
    compiler: Arc<dyn ExpressionCompiler>,
    registry: Option<Arc<DocumentRegistry>>,
    default_base: Option<String>,
}

impl std::fmt::Debug for SchemaReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaReader")
            .field("resolution", &self.resolution)
            .field("cached", &self.registry.is_some())
            .field("default_base", &self.default_base)
            .finish()
    }
}

impl SchemaReader {
    /// Reader with the built-in syntax compiler and a private document cache
    pub fn new(resolution: Arc<SchemaResolutionService>) -> Self {
        Self {
            resolution,
            compiler: Arc::new(SyntaxCompiler::new()),
            registry: Some(Arc::new(DocumentRegistry::new())),
            default_base: None,
        }
    }

    /// Reader configured from `config`
    pub fn from_config(config: &SchemaConfig) -> Self {
        let reader = Self::new(Arc::new(SchemaResolutionService::new(config.blob_storage())));
        let reader = match &config.default_base {
            Some(base) => reader.with_default_base(base.clone()),
            None => reader,
        };
        if config.cache_documents {
            reader
        } else {
            reader.without_cache()
        }
    }

    #[must_use]
    pub fn with_compiler(mut self, compiler: Arc<dyn ExpressionCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    /// Share a document cache with other readers
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<DocumentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.registry = None;
        self
    }

    #[must_use]
    pub fn with_default_base(mut self, base: impl Into<String>) -> Self {
        self.default_base = Some(base.into());
        self
    }

    pub fn resolution(&self) -> &SchemaResolutionService {
        &self.resolution
    }

    pub fn compiler(&self) -> &dyn ExpressionCompiler {
        self.compiler.as_ref()
    }

    pub fn registry(&self) -> Option<&DocumentRegistry> {
        self.registry.as_deref()
    }

    /// Where `name` lives when looked up from the directory `base`
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedReference`] for a blank name.
    pub fn locate(&self, name: &str, base: Option<&str>) -> Result<SchemaLocation> {
        let name = name.trim();
        if SchemaLocation::is_qualified(name) {
            return SchemaLocation::parse(name);
        }

        match base
            .or(self.default_base.as_deref())
            .map(str::trim)
            .filter(|b| !b.is_empty())
        {
            Some(base) if name.starts_with('/') => {
                let scheme = SchemaLocation::parse(base)?.scheme;
                Ok(SchemaLocation::new(scheme, name))
            }
            Some(base) if !name.is_empty() => {
                SchemaLocation::parse(&format!("{}/{}", base.trim_end_matches('/'), name))
            }
            _ => SchemaLocation::parse(name),
        }
    }

    /// Parse one in-memory document
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the document is malformed.
    pub fn read_one_document(&self, bytes: &[u8], flavor: Flavor) -> Result<Schema> {
        read_one_document(bytes, "<inline>", flavor)
    }

    /// Fetch and parse the single document at `location`
    fn load_document(&self, flavor: Flavor, location: &SchemaLocation) -> Result<Schema> {
        let load = || {
            let bytes = self.resolution.retrieve(location)?;
            read_one_document(&bytes, &location.to_string(), flavor)
        };

        match &self.registry {
            Some(registry) => registry
                .get_or_load(flavor, location, load)
                .map(|cached| cached.as_ref().clone()),
            None => load(),
        }
    }

    /// Resolve `name` and every schema it references into one composed tree
    ///
    /// Element `schema` references are resolved relative to the referencing
    /// document and attached as child trees. A document-level `extends`
    /// loads the parent tree and merges the document over it.
    ///
    /// # Errors
    ///
    /// Fails on the first unresolved, unparsable, mismatched or circular
    /// reference. The tree is not validated.
    pub fn read_schema_tree(&self, name: &str, base: Option<&str>, flavor: Flavor) -> Result<Schema> {
        let location = self.locate(name, base)?;
        let mut stack = ResolutionStack::new();
        self.resolve_tree(flavor, &location, &mut stack)
    }

    fn resolve_tree(
        &self,
        flavor: Flavor,
        location: &SchemaLocation,
        stack: &mut ResolutionStack,
    ) -> Result<Schema> {
        stack.enter(flavor, location)?;
        let result = self.build_tree(flavor, location, stack);
        stack.leave();
        result
    }

    fn build_tree(
        &self,
        flavor: Flavor,
        location: &SchemaLocation,
        stack: &mut ResolutionStack,
    ) -> Result<Schema> {
        let mut schema = self.load_document(flavor, location)?;

        for element in &mut schema.elements {
            let Some(reference) = element.schema.clone().filter(|r| !r.trim().is_empty()) else {
                continue;
            };
            let child_location = location.resolve(&reference)?;
            debug!("Resolving {} referenced from {}", child_location, location);
            let child = self.resolve_tree(flavor, &child_location, stack)?;
            element.schema_ref = Some(Box::new(child));
        }

        let Some(parent_ref) = schema.extends.clone().filter(|r| !r.trim().is_empty()) else {
            return Ok(schema);
        };
        let parent_location = location.resolve(&parent_ref)?;
        info!("Schema {} extends {}", location, parent_location);

        let mut parent = self.resolve_tree(flavor, &parent_location, stack)?;
        parent.merge(&schema)?;
        Ok(parent)
    }

    /// Read and validate a root schema tree
    ///
    /// # Errors
    ///
    /// Resolution errors as for [`SchemaReader::read_schema_tree`], or
    /// [`Error::Validation`] carrying every issue found.
    pub fn from_file(&self, name: &str, base: Option<&str>, flavor: Flavor) -> Result<Schema> {
        let schema = self.read_schema_tree(name, base, flavor)?;
        self.validated(schema)
    }

    /// Read each name as a tree and overlay them left to right
    ///
    /// The composed tree is not validated, so callers can inspect or report
    /// on a broken composition.
    ///
    /// # Errors
    ///
    /// As for [`SchemaReader::read_schema_tree`]; [`Error::TypeMismatch`] if
    /// a layer's flavor differs; [`Error::Config`] if `names` is empty.
    pub fn read_overlaid_tree<S: AsRef<str>>(
        &self,
        names: &[S],
        base: Option<&str>,
        flavor: Flavor,
    ) -> Result<Schema> {
        let (first, rest) = names
            .split_first()
            .ok_or_else(|| Error::Config("At least one schema name is required".to_string()))?;

        let schema = self.read_schema_tree(first.as_ref(), base, flavor)?;
        let layers = rest
            .iter()
            .map(|name| self.read_schema_tree(name.as_ref(), base, flavor))
            .collect::<Result<Vec<_>>>()?;

        apply_overlays(schema, &layers)
    }

    /// Read each name as a tree, overlay them left to right, then validate
    ///
    /// # Errors
    ///
    /// As for [`SchemaReader::read_overlaid_tree`], or [`Error::Validation`]
    /// carrying every issue found.
    pub fn from_files<S: AsRef<str>>(
        &self,
        names: &[S],
        base: Option<&str>,
        flavor: Flavor,
    ) -> Result<Schema> {
        let schema = self.read_overlaid_tree(names, base, flavor)?;
        self.validated(schema)
    }

    fn validated(&self, mut schema: Schema) -> Result<Schema> {
        let issues = schema.validate(self.compiler.as_ref(), false);
        if issues.is_empty() {
            debug!("Schema {} is valid", schema.display_name());
            return Ok(schema);
        }

        warn!(
            "Schema {} failed validation with {} issue(s)",
            schema.display_name(),
            issues.len()
        );
        Err(Error::Validation {
            schema: schema.display_name().to_string(),
            issues,
        })
    }
}

impl Default for SchemaReader {
    fn default() -> Self {
        Self::new(Arc::new(SchemaResolutionService::default()))
    }
}
