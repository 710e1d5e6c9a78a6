//! Schema reference paths: `<scheme>:<path>`

use crate::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Extension appended to references that carry none
pub const DEFAULT_EXTENSION: &str = "yml";

/// Storage backend a reference points into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Local filesystem
    File,
    /// Schemas bundled into the binary
    Classpath,
    /// Cloud blob storage
    Azure,
}

impl Scheme {
    pub const ALL: [Scheme; 3] = [Scheme::File, Scheme::Classpath, Scheme::Azure];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::File => "file",
            Scheme::Classpath => "classpath",
            Scheme::Azure => "azure",
        }
    }

    /// Split a known `scheme:` prefix off `text`
    fn split(text: &str) -> Option<(Scheme, &str)> {
        Scheme::ALL.into_iter().find_map(|scheme| {
            text.strip_prefix(scheme.as_str())
                .and_then(|rest| rest.strip_prefix(':'))
                .map(|rest| (scheme, rest))
        })
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Scheme::ALL
            .into_iter()
            .find(|scheme| scheme.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("Unknown schema scheme: {s}")))
    }
}

/// A fully qualified, normalized schema document location
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaLocation {
    pub scheme: Scheme,
    pub path: String,
}

impl SchemaLocation {
    pub fn new(scheme: Scheme, path: &str) -> Self {
        Self {
            scheme,
            path: with_default_extension(&normalize(path)),
        }
    }

    /// Parse a reference; text without a known scheme is a filesystem path
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedReference`] for a blank reference.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::UnresolvedReference {
                reference: String::new(),
                message: "Schema reference is blank".to_string(),
            });
        }

        match Scheme::split(text) {
            Some((Scheme::File, rest)) => {
                // file:///abs and file://abs both name an absolute path
                let rest = match rest.strip_prefix("//") {
                    Some(stripped) if !stripped.starts_with('/') => format!("/{stripped}"),
                    Some(stripped) => stripped.to_string(),
                    None => rest.to_string(),
                };
                Ok(Self::new(Scheme::File, &rest))
            }
            Some((scheme, rest)) => Ok(Self::new(scheme, &format!("/{}", rest.trim_start_matches('/')))),
            None => Ok(Self::new(Scheme::File, text)),
        }
    }

    /// Whether `text` names its scheme explicitly
    pub fn is_qualified(text: &str) -> bool {
        Scheme::split(text.trim()).is_some()
    }

    /// Resolve `reference` as seen from this document
    ///
    /// Qualified references stand alone. An absolute path stays in this
    /// document's scheme. Anything else is relative to this document's
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedReference`] for a blank reference.
    pub fn resolve(&self, reference: &str) -> Result<SchemaLocation> {
        let reference = reference.trim();
        if reference.is_empty() || Self::is_qualified(reference) {
            return Self::parse(reference);
        }
        if reference.starts_with('/') {
            return Ok(Self::new(self.scheme, reference));
        }

        let joined = match (self.parent(), self.path.starts_with('/')) {
            ("", true) => format!("/{reference}"),
            ("", false) => reference.to_string(),
            (parent, _) => format!("{parent}/{reference}"),
        };
        Ok(Self::new(self.scheme, &joined))
    }

    /// Directory part of the path, without a trailing slash; empty at the root
    pub fn parent(&self) -> &str {
        match self.path.rfind('/') {
            Some(0) => "/",
            Some(idx) => &self.path[..idx],
            None => "",
        }
        .trim_end_matches('/')
    }

    /// Final path segment
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Path without its leading slash, as bundled and blob stores key it
    pub fn relative_path(&self) -> &str {
        self.path.trim_start_matches('/')
    }
}

impl fmt::Display for SchemaLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.path)
    }
}

impl FromStr for SchemaLocation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Collapse `.` and `..` segments and repeated slashes
fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

fn with_default_extension(path: &str) -> String {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    if file_name.is_empty() || file_name.contains('.') {
        path.to_string()
    } else {
        format!("{path}.{DEFAULT_EXTENSION}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schemes() {
        let file = SchemaLocation::parse("file:/schemas/a.yml").unwrap();
        assert_eq!(file.scheme, Scheme::File);
        assert_eq!(file.path, "/schemas/a.yml");

        let classpath = SchemaLocation::parse("classpath:metadata/hl7_mapping/ORU_R01").unwrap();
        assert_eq!(classpath.scheme, Scheme::Classpath);
        assert_eq!(classpath.to_string(), "classpath:/metadata/hl7_mapping/ORU_R01.yml");

        let blob = SchemaLocation::parse("azure:/fhir_transforms/common.yaml").unwrap();
        assert_eq!(blob.scheme, Scheme::Azure);
        assert_eq!(blob.relative_path(), "fhir_transforms/common.yaml");
    }

    #[test]
    fn test_parse_file_urls() {
        assert_eq!(
            SchemaLocation::parse("file:///tmp/x.yml").unwrap().path,
            "/tmp/x.yml"
        );
        assert_eq!(
            SchemaLocation::parse("file://tmp/x.yml").unwrap().path,
            "/tmp/x.yml"
        );
    }

    #[test]
    fn test_parse_unqualified_is_file() {
        let loc = SchemaLocation::parse("schemas/./common/../ORU_R01").unwrap();
        assert_eq!(loc.scheme, Scheme::File);
        assert_eq!(loc.path, "schemas/ORU_R01.yml");
    }

    #[test]
    fn test_parse_blank() {
        assert!(matches!(
            SchemaLocation::parse("  "),
            Err(Error::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_resolve_relative_to_parent() {
        let base = SchemaLocation::parse("classpath:/metadata/hl7_mapping/ORU_R01/ORU_R01-base.yml")
            .unwrap();

        let sibling = base.resolve("../common/patient").unwrap();
        assert_eq!(
            sibling.to_string(),
            "classpath:/metadata/hl7_mapping/common/patient.yml"
        );

        let absolute = base.resolve("/metadata/other.yml").unwrap();
        assert_eq!(absolute.to_string(), "classpath:/metadata/other.yml");

        let qualified = base.resolve("file:/tmp/override.yml").unwrap();
        assert_eq!(qualified.scheme, Scheme::File);
    }

    #[test]
    fn test_resolve_from_relative_file() {
        let base = SchemaLocation::parse("a.yml").unwrap();
        assert_eq!(base.parent(), "");
        assert_eq!(base.resolve("b").unwrap().path, "b.yml");
    }

    #[test]
    fn test_parent_and_file_name() {
        let loc = SchemaLocation::parse("file:/a.yml").unwrap();
        assert_eq!(loc.parent(), "");
        assert_eq!(loc.file_name(), "a.yml");
        assert_eq!(loc.resolve("b").unwrap().path, "/b.yml");

        let nested = SchemaLocation::parse("file:/x/y/z.yaml").unwrap();
        assert_eq!(nested.parent(), "/x/y");
    }

    #[test]
    fn test_scheme_from_str() {
        assert_eq!("Azure".parse::<Scheme>().unwrap(), Scheme::Azure);
        assert!("s3".parse::<Scheme>().is_err());
    }
}
