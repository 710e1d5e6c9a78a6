//! Schema inheritance and merge logic
//!
//! One override rule applies to every optional field: a value supplied by the
//! overriding side replaces the inherited one wholesale, an absent or empty
//! value inherits. Lists are never concatenated. Constant tables are the one
//! exception and merge key by key.
//!
//! The same rule serves `extends` (parent merged with the child document) and
//! layered overlays (`base.merge(layer1)?.merge(layer2)?`).

use crate::model::{Constants, Flavor};
use crate::resolution::SchemaLocation;
use crate::schema::Schema;
use crate::{Error, Result};
use indexmap::IndexMap;
use tracing::{info, trace};

/// Non-empty text in `other` wins, otherwise `base` is inherited
pub(crate) fn override_text(base: &Option<String>, other: &Option<String>) -> Option<String> {
    match other {
        Some(value) if !value.trim().is_empty() => Some(value.clone()),
        _ => base.clone(),
    }
}

/// Tri-state flags: any explicit value in `other` wins, including `false`
pub(crate) fn override_flag(base: Option<bool>, other: Option<bool>) -> Option<bool> {
    other.or(base)
}

/// A non-empty list in `other` replaces `base` entirely
pub(crate) fn override_list(base: &[String], other: &[String]) -> Vec<String> {
    if other.is_empty() {
        base.to_vec()
    } else {
        other.to_vec()
    }
}

/// A non-empty map in `other` replaces `base` entirely
pub(crate) fn override_map(
    base: &IndexMap<String, String>,
    other: &IndexMap<String, String>,
) -> IndexMap<String, String> {
    if other.is_empty() {
        base.clone()
    } else {
        other.clone()
    }
}

/// Key-wise union of two constant tables; `other` wins on shared keys.
///
/// Keys keep their first-seen position, keys new in `other` are appended.
pub fn merge_constants(base: &Constants, other: &Constants) -> Constants {
    let mut merged = base.clone();
    for (key, value) in other {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Fold overlay layers onto a base schema, left to right
///
/// # Errors
///
/// Fails with [`Error::TypeMismatch`] if any layer has a different flavor.
pub fn apply_overlays(mut base: Schema, layers: &[Schema]) -> Result<Schema> {
    for layer in layers {
        info!(
            "Applying overlay {} onto {}",
            layer.display_name(),
            base.display_name()
        );
        base.merge(layer)?;
    }
    Ok(base)
}

/// The set of documents currently being resolved on one call chain.
///
/// A stack rather than a global set: two unrelated resolutions may load the
/// same document at the same time, only a revisit on the same chain is a cycle.
#[derive(Debug, Default)]
pub struct ResolutionStack {
    frames: Vec<(Flavor, SchemaLocation)>,
}

impl ResolutionStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `location`, failing if it is already being resolved on this chain
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircularReference`] carrying the chain from the first
    /// visit of `location` back to itself.
    pub fn enter(&mut self, flavor: Flavor, location: &SchemaLocation) -> Result<()> {
        if let Some(start) = self
            .frames
            .iter()
            .position(|(f, l)| *f == flavor && l == location)
        {
            let mut chain: Vec<String> = self.frames[start..]
                .iter()
                .map(|(_, l)| l.to_string())
                .collect();
            chain.push(location.to_string());
            return Err(Error::CircularReference { chain });
        }

        trace!("Resolving {} schema {} (depth {})", flavor, location, self.depth());
        self.frames.push((flavor, location.clone()));
        Ok(())
    }

    /// Pop the most recent frame
    pub fn leave(&mut self) {
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn contains(&self, flavor: Flavor, location: &SchemaLocation) -> bool {
        self.frames
            .iter()
            .any(|(f, l)| *f == flavor && l == location)
    }
}
