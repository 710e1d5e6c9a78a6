//! Loader and storage configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable holding the process-wide blob connection string
pub const BLOB_CONNECTION_ENV: &str = "AzureWebJobsStorage";

/// Container every blob schema reference is looked up in
pub const BLOB_CONTAINER: &str = "metadata";

/// Explicit blob storage metadata for the `azure:` scheme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobStorageInfo {
    pub connection_string: String,
    pub container: String,
}

impl BlobStorageInfo {
    /// Storage info for the fixed schema container
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            container: BLOB_CONTAINER.to_string(),
        }
    }

    #[must_use]
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    /// Storage info from process configuration, if a connection string is set
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`BlobStorageInfo::from_env`], reading variables through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        lookup(BLOB_CONNECTION_ENV)
            .filter(|value| !value.trim().is_empty())
            .map(Self::new)
    }
}

/// Configuration for [`crate::SchemaReader`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchemaConfig {
    /// Blob connection string; the environment fills it in when absent
    pub blob_connection_string: Option<String>,
    /// Keep parsed documents in a process-wide cache
    pub cache_documents: bool,
    /// Base location for names given without one
    pub default_base: Option<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            blob_connection_string: None,
            cache_documents: true,
            default_base: None,
        }
    }
}

impl SchemaConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text; an empty document yields defaults
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed YAML or unknown keys.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid schema configuration: {e}")))
    }

    /// Fill unset values from the environment, read through `lookup`
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.blob_connection_string.is_none() {
            self.blob_connection_string =
                lookup(BLOB_CONNECTION_ENV).filter(|value| !value.trim().is_empty());
        }
        self
    }

    /// Blob storage metadata derived from this configuration
    pub fn blob_storage(&self) -> Option<BlobStorageInfo> {
        self.blob_connection_string
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .map(BlobStorageInfo::new)
    }
}
