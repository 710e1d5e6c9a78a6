//! # hdx-schema
//!
//! Schema model, composition, validation and resolution for message mapping
//! schemas.
//!
//! A schema maps fields of a source message onto a target structure. Schemas
//! come in three flavors (generic, converter, transform), reference each other
//! by name across storage backends, inherit through `extends` and can be
//! layered with overlays:
//! base document → `extends` parents → referenced child schemas → overlays

pub mod config;
pub mod document;
pub mod element;
pub mod inheritance;
pub mod loader;
pub mod model;
pub mod registry;
pub mod resolution;
pub mod schema;
pub mod validation;

pub use config::{BlobStorageInfo, SchemaConfig};
pub use document::read_one_document;
pub use element::{CompiledFields, SchemaElement};
pub use inheritance::{ResolutionStack, apply_overlays, merge_constants};
pub use loader::SchemaReader;
pub use model::{Constants, ElementTarget, Flavor, SchemaHeader, ValueSet};
pub use registry::DocumentRegistry;
pub use resolution::{
    Scheme, SchemaLocation, SchemaResolutionService, SchemaServiceProvider,
    get_schema_service_providers,
};
pub use schema::Schema;
pub use validation::{IssueKind, ValidationIssue};

use thiserror::Error;

/// Errors that can occur when loading, composing or validating schemas
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to parse schema document {location}: {message}")]
    Parse { location: String, message: String },

    #[error("Schema {schema} is invalid: {}", validation::format_issues(.issues))]
    Validation {
        schema: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("Invalid expression in {field}: {source}")]
    ExpressionCompile {
        field: String,
        #[source]
        source: hdx_expr::CompileError,
    },

    #[error("Schema reference {reference} could not be resolved: {message}")]
    UnresolvedReference { reference: String, message: String },

    #[error("Circular schema reference: {}", .chain.join(" -> "))]
    CircularReference { chain: Vec<String> },

    #[error("Cannot merge a {found} schema into a {expected} schema")]
    TypeMismatch { expected: Flavor, found: Flavor },

    #[error("Schema provider {scheme} failed: {message}")]
    Provider { scheme: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn type_mismatch(expected: Flavor, found: Flavor) -> Self {
        Error::TypeMismatch { expected, found }
    }

    pub(crate) fn parse(location: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Parse {
            location: location.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Load and compose a generic schema tree from `path`
///
/// # Errors
///
/// Fails on the first unresolved, unparsable or circular reference.
pub fn retrieve_generic_schema_reference(
    path: &str,
    storage: Option<BlobStorageInfo>,
) -> Result<Schema> {
    retrieve_schema_reference(path, storage, Flavor::Generic)
}

/// Load and compose a converter schema tree from `path`
///
/// # Errors
///
/// Fails on the first unresolved, unparsable or circular reference.
pub fn retrieve_converter_schema_reference(
    path: &str,
    storage: Option<BlobStorageInfo>,
) -> Result<Schema> {
    retrieve_schema_reference(path, storage, Flavor::Converter)
}

/// Load and compose a transform schema tree from `path`
///
/// # Errors
///
/// Fails on the first unresolved, unparsable or circular reference.
pub fn retrieve_transform_schema_reference(
    path: &str,
    storage: Option<BlobStorageInfo>,
) -> Result<Schema> {
    retrieve_schema_reference(path, storage, Flavor::Transform)
}

fn retrieve_schema_reference(
    path: &str,
    storage: Option<BlobStorageInfo>,
    flavor: Flavor,
) -> Result<Schema> {
    let service = SchemaResolutionService::new(storage);
    SchemaReader::new(std::sync::Arc::new(service))
        .without_cache()
        .read_schema_tree(path, None, flavor)
}
