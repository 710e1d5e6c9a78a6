//! Schema Resolution Service
//!
//! Maps each [`Scheme`] to a provider that fetches raw document bytes. The
//! registry always holds exactly one provider per scheme; tests and embedders
//! may swap a provider out with [`SchemaResolutionService::with_provider`].

pub mod blob;
pub mod embedded;
pub mod file;
pub mod location;

pub use blob::{BlobEndpoint, BlobProvider};
pub use embedded::ClasspathProvider;
pub use file::FileProvider;
pub use location::{DEFAULT_EXTENSION, Scheme, SchemaLocation};

use crate::config::BlobStorageInfo;
use crate::Result;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A storage backend serving schema documents for one scheme
pub trait SchemaServiceProvider: Send + Sync + fmt::Debug {
    /// The scheme this provider serves
    fn scheme(&self) -> Scheme;

    /// Fetch the raw document at `path`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnresolvedReference`] if nothing exists at
    /// `path`, and [`crate::Error::Provider`] for any other backend failure.
    fn fetch(&self, path: &str) -> Result<Vec<u8>>;
}

/// Build the default provider set, one per scheme
pub fn get_schema_service_providers(
    storage: Option<BlobStorageInfo>,
) -> HashMap<Scheme, Arc<dyn SchemaServiceProvider>> {
    let storage = storage.or_else(BlobStorageInfo::from_env);

    let mut providers: HashMap<Scheme, Arc<dyn SchemaServiceProvider>> = HashMap::new();
    providers.insert(Scheme::File, Arc::new(FileProvider::new()));
    providers.insert(Scheme::Classpath, Arc::new(ClasspathProvider::bundled()));
    providers.insert(Scheme::Azure, Arc::new(BlobProvider::new(storage)));
    providers
}

/// Scheme-keyed provider registry
#[derive(Debug, Clone)]
pub struct SchemaResolutionService {
    providers: HashMap<Scheme, Arc<dyn SchemaServiceProvider>>,
}

impl SchemaResolutionService {
    /// Registry with the default providers; blob storage falls back to the
    /// process environment when `storage` is `None`
    pub fn new(storage: Option<BlobStorageInfo>) -> Self {
        Self {
            providers: get_schema_service_providers(storage),
        }
    }

    /// Replace the provider serving `provider.scheme()`
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn SchemaServiceProvider>) -> Self {
        self.providers.insert(provider.scheme(), provider);
        self
    }

    pub fn providers(&self) -> &HashMap<Scheme, Arc<dyn SchemaServiceProvider>> {
        &self.providers
    }

    /// Registered schemes, in a stable order
    pub fn schemes(&self) -> Vec<Scheme> {
        let mut schemes: Vec<Scheme> = self.providers.keys().copied().collect();
        schemes.sort();
        schemes
    }

    /// Fetch the document at `location` from its scheme's provider
    ///
    /// # Errors
    ///
    /// Propagates the provider's error.
    pub fn retrieve(&self, location: &SchemaLocation) -> Result<Vec<u8>> {
        let provider = self
            .providers
            .get(&location.scheme)
            .ok_or_else(|| crate::Error::Provider {
                scheme: location.scheme.to_string(),
                message: "No provider registered".to_string(),
            })?;

        debug!("Fetching schema document {}", location);
        provider.fetch(&location.path)
    }
}

impl Default for SchemaResolutionService {
    fn default() -> Self {
        Self::new(None)
    }
}
