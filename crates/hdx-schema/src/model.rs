//! Schema model definitions shared by every flavor

use crate::inheritance::{override_list, override_map, override_text};
use crate::{Error, Result};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Ordered constant table, visible to an element and all its descendants
pub type Constants = IndexMap<String, String>;

/// Ordered lookup table translating an evaluated value to another code
pub type ValueSet = IndexMap<String, String>;

/// The three schema flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    /// Header: source message type and version
    Generic,
    /// Header: source message class, used for inbound conversion
    Converter,
    /// No header, mutates the canonical structure in place
    Transform,
}

impl Flavor {
    pub const ALL: [Flavor; 3] = [Flavor::Generic, Flavor::Converter, Flavor::Transform];

    pub fn as_str(&self) -> &'static str {
        match self {
            Flavor::Generic => "generic",
            Flavor::Converter => "converter",
            Flavor::Transform => "transform",
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flavor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(Flavor::Generic),
            "converter" | "hl7" => Ok(Flavor::Converter),
            "transform" | "fhir" => Ok(Flavor::Transform),
            other => Err(Error::Config(format!("Unknown schema flavor: {other}"))),
        }
    }
}

/// Flavor-specific schema header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "flavor", rename_all = "lowercase")]
pub enum SchemaHeader {
    Generic {
        #[serde(rename = "hl7Type", skip_serializing_if = "Option::is_none")]
        hl7_type: Option<String>,
        #[serde(rename = "hl7Version", skip_serializing_if = "Option::is_none")]
        hl7_version: Option<String>,
    },
    Converter {
        #[serde(rename = "hl7Class", skip_serializing_if = "Option::is_none")]
        hl7_class: Option<String>,
    },
    Transform,
}

impl SchemaHeader {
    /// An empty header of the given flavor
    pub fn empty(flavor: Flavor) -> Self {
        match flavor {
            Flavor::Generic => SchemaHeader::Generic {
                hl7_type: None,
                hl7_version: None,
            },
            Flavor::Converter => SchemaHeader::Converter { hl7_class: None },
            Flavor::Transform => SchemaHeader::Transform,
        }
    }

    pub fn flavor(&self) -> Flavor {
        match self {
            SchemaHeader::Generic { .. } => Flavor::Generic,
            SchemaHeader::Converter { .. } => Flavor::Converter,
            SchemaHeader::Transform => Flavor::Transform,
        }
    }

    /// Header fields as `(document key, value)` pairs, in document order
    pub fn fields(&self) -> Vec<(&'static str, Option<&str>)> {
        match self {
            SchemaHeader::Generic {
                hl7_type,
                hl7_version,
            } => vec![
                ("hl7Type", hl7_type.as_deref()),
                ("hl7Version", hl7_version.as_deref()),
            ],
            SchemaHeader::Converter { hl7_class } => vec![("hl7Class", hl7_class.as_deref())],
            SchemaHeader::Transform => Vec::new(),
        }
    }

    /// Overlay `other` onto this header; fields `other` leaves empty are inherited
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] when the headers belong to different flavors.
    pub fn merge(&self, other: &SchemaHeader) -> Result<SchemaHeader> {
        match (self, other) {
            (
                SchemaHeader::Generic {
                    hl7_type,
                    hl7_version,
                },
                SchemaHeader::Generic {
                    hl7_type: other_type,
                    hl7_version: other_version,
                },
            ) => Ok(SchemaHeader::Generic {
                hl7_type: override_text(hl7_type, other_type),
                hl7_version: override_text(hl7_version, other_version),
            }),
            (
                SchemaHeader::Converter { hl7_class },
                SchemaHeader::Converter {
                    hl7_class: other_class,
                },
            ) => Ok(SchemaHeader::Converter {
                hl7_class: override_text(hl7_class, other_class),
            }),
            (SchemaHeader::Transform, SchemaHeader::Transform) => Ok(SchemaHeader::Transform),
            (base, other) => Err(Error::type_mismatch(base.flavor(), other.flavor())),
        }
    }
}

/// Flavor-specific destination of a leaf element
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ElementTarget {
    Generic {
        #[serde(rename = "hl7Spec", skip_serializing_if = "Vec::is_empty")]
        hl7_spec: Vec<String>,
    },
    Converter {
        #[serde(rename = "hl7Spec", skip_serializing_if = "Vec::is_empty")]
        hl7_spec: Vec<String>,
        #[serde(rename = "valueSet", skip_serializing_if = "IndexMap::is_empty")]
        value_set: ValueSet,
    },
    Transform {
        #[serde(rename = "bundleProperty", skip_serializing_if = "Option::is_none")]
        bundle_property: Option<String>,
        #[serde(rename = "valueSet", skip_serializing_if = "IndexMap::is_empty")]
        value_set: ValueSet,
    },
}

impl ElementTarget {
    /// An empty target of the given flavor
    pub fn empty(flavor: Flavor) -> Self {
        match flavor {
            Flavor::Generic => ElementTarget::Generic {
                hl7_spec: Vec::new(),
            },
            Flavor::Converter => ElementTarget::Converter {
                hl7_spec: Vec::new(),
                value_set: ValueSet::new(),
            },
            Flavor::Transform => ElementTarget::Transform {
                bundle_property: None,
                value_set: ValueSet::new(),
            },
        }
    }

    pub fn flavor(&self) -> Flavor {
        match self {
            ElementTarget::Generic { .. } => Flavor::Generic,
            ElementTarget::Converter { .. } => Flavor::Converter,
            ElementTarget::Transform { .. } => Flavor::Transform,
        }
    }

    /// Document key naming the target locator for this flavor
    pub fn locator_key(&self) -> &'static str {
        match self {
            ElementTarget::Generic { .. } | ElementTarget::Converter { .. } => "hl7Spec",
            ElementTarget::Transform { .. } => "bundleProperty",
        }
    }

    /// Whether a destination has been declared
    pub fn is_present(&self) -> bool {
        match self {
            ElementTarget::Generic { hl7_spec } | ElementTarget::Converter { hl7_spec, .. } => {
                !hl7_spec.is_empty()
            }
            ElementTarget::Transform {
                bundle_property, ..
            } => bundle_property.as_deref().is_some_and(|p| !p.trim().is_empty()),
        }
    }

    pub fn value_set(&self) -> Option<&ValueSet> {
        match self {
            ElementTarget::Generic { .. } => None,
            ElementTarget::Converter { value_set, .. }
            | ElementTarget::Transform { value_set, .. } => Some(value_set),
        }
    }

    pub fn hl7_spec(&self) -> &[String] {
        match self {
            ElementTarget::Generic { hl7_spec } | ElementTarget::Converter { hl7_spec, .. } => {
                hl7_spec
            }
            ElementTarget::Transform { .. } => &[],
        }
    }

    pub fn bundle_property(&self) -> Option<&str> {
        match self {
            ElementTarget::Transform {
                bundle_property, ..
            } => bundle_property.as_deref(),
            _ => None,
        }
    }

    /// Overlay `other` onto this target, replacing each non-empty field wholesale
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] when the targets belong to different flavors.
    pub fn merge(&self, other: &ElementTarget) -> Result<ElementTarget> {
        match (self, other) {
            (
                ElementTarget::Generic { hl7_spec },
                ElementTarget::Generic {
                    hl7_spec: other_spec,
                },
            ) => Ok(ElementTarget::Generic {
                hl7_spec: override_list(hl7_spec, other_spec),
            }),
            (
                ElementTarget::Converter {
                    hl7_spec,
                    value_set,
                },
                ElementTarget::Converter {
                    hl7_spec: other_spec,
                    value_set: other_set,
                },
            ) => Ok(ElementTarget::Converter {
                hl7_spec: override_list(hl7_spec, other_spec),
                value_set: override_map(value_set, other_set),
            }),
            (
                ElementTarget::Transform {
                    bundle_property,
                    value_set,
                },
                ElementTarget::Transform {
                    bundle_property: other_property,
                    value_set: other_set,
                },
            ) => Ok(ElementTarget::Transform {
                bundle_property: override_text(bundle_property, other_property),
                value_set: override_map(value_set, other_set),
            }),
            (base, other) => Err(Error::type_mismatch(base.flavor(), other.flavor())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flavor_from_str() {
        assert_eq!("Converter".parse::<Flavor>().unwrap(), Flavor::Converter);
        assert_eq!("fhir".parse::<Flavor>().unwrap(), Flavor::Transform);
        assert!("xml".parse::<Flavor>().is_err());
    }

    #[test]
    fn test_header_merge_inherits_missing_fields() {
        let base = SchemaHeader::Generic {
            hl7_type: Some("ORU_R01".to_string()),
            hl7_version: Some("2.5.1".to_string()),
        };
        let overlay = SchemaHeader::Generic {
            hl7_type: None,
            hl7_version: Some("2.7".to_string()),
        };

        let merged = base.merge(&overlay).unwrap();
        assert_eq!(
            merged,
            SchemaHeader::Generic {
                hl7_type: Some("ORU_R01".to_string()),
                hl7_version: Some("2.7".to_string()),
            }
        );
    }

    #[test]
    fn test_header_merge_flavor_mismatch() {
        let base = SchemaHeader::empty(Flavor::Converter);
        let result = base.merge(&SchemaHeader::Transform);
        match result.unwrap_err() {
            Error::TypeMismatch { expected, found } => {
                assert_eq!(expected, Flavor::Converter);
                assert_eq!(found, Flavor::Transform);
            }
            e => panic!("Expected TypeMismatch error, got {:?}", e),
        }
    }

    #[test]
    fn test_target_presence() {
        assert!(!ElementTarget::empty(Flavor::Generic).is_present());
        assert!(
            ElementTarget::Generic {
                hl7_spec: vec![".PID.1".to_string()]
            }
            .is_present()
        );
        assert!(
            !ElementTarget::Transform {
                bundle_property: Some("  ".to_string()),
                value_set: ValueSet::new(),
            }
            .is_present()
        );
    }

    #[test]
    fn test_target_merge_replaces_lists_wholesale() {
        let base = ElementTarget::Converter {
            hl7_spec: vec!["PID-5".to_string(), "PID-6".to_string()],
            value_set: ValueSet::from([("F".to_string(), "female".to_string())]),
        };
        let overlay = ElementTarget::Converter {
            hl7_spec: vec!["NK1-2".to_string()],
            value_set: ValueSet::new(),
        };

        let merged = base.merge(&overlay).unwrap();
        assert_eq!(merged.hl7_spec(), ["NK1-2".to_string()]);
        assert_eq!(merged.value_set().unwrap().len(), 1);
    }
}
