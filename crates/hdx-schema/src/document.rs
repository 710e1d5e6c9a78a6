//! Schema document parsing
//!
//! One YAML document per file. Parsing is strict and all-or-nothing: unknown
//! keys, keys belonging to another flavor, a non-mapping root or a value of
//! the wrong shape fail the whole document.

use crate::element::SchemaElement;
use crate::model::{Constants, ElementTarget, Flavor, SchemaHeader};
use crate::schema::Schema;
use crate::{Error, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::trace;

/// Serializable schema format for loading from files
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct SchemaFile {
    #[serde(default)]
    name: Option<Value>,
    #[serde(default)]
    hl7_type: Option<Value>,
    #[serde(default)]
    hl7_version: Option<Value>,
    #[serde(default)]
    hl7_class: Option<Value>,
    #[serde(default)]
    extends: Option<Value>,
    #[serde(default)]
    constants: Option<IndexMap<String, Value>>,
    #[serde(default)]
    elements: Option<Vec<ElementFile>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ElementFile {
    #[serde(default)]
    name: Option<Value>,
    #[serde(default)]
    condition: Option<Value>,
    #[serde(default)]
    required: Option<Value>,
    #[serde(default)]
    debug: Option<Value>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    hl7_spec: Option<Value>,
    #[serde(default)]
    bundle_property: Option<Value>,
    #[serde(default)]
    value_set: Option<IndexMap<String, Value>>,
    #[serde(default)]
    resource: Option<Value>,
    #[serde(default)]
    resource_index: Option<Value>,
    #[serde(default)]
    schema: Option<Value>,
    #[serde(default)]
    constants: Option<IndexMap<String, Value>>,
}

/// Parse one document into a schema of the given flavor
///
/// `location` only labels errors and is recorded on the schema. Element
/// `schema` references are kept by name and left unresolved.
///
/// # Errors
///
/// Returns [`Error::Parse`] on malformed or empty input, a non-mapping root,
/// unrecognized keys, or values of the wrong shape.
pub fn read_one_document(bytes: &[u8], location: &str, flavor: Flavor) -> Result<Schema> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::parse(location, format!("Document is not valid UTF-8: {e}")))?;

    let blank = text.lines().map(str::trim).all(|line| {
        line.is_empty() || line.starts_with('#') || line == "---" || line == "..."
    });
    if blank {
        return Err(Error::parse(location, "Document is empty"));
    }

    let root: Value = serde_yaml::from_str(text)
        .map_err(|e| Error::parse(location, format!("YAML parse error: {e}")))?;
    match &root {
        Value::Null => return Err(Error::parse(location, "Document is empty")),
        Value::Mapping(_) => {}
        other => {
            return Err(Error::parse(
                location,
                format!("Document root must be a mapping, found {}", kind_of(other)),
            ));
        }
    }

    let file: SchemaFile = serde_yaml::from_value(root)
        .map_err(|e| Error::parse(location, e.to_string()))?;
    let parser = DocumentParser { location, flavor };
    let mut schema = parser.schema(file)?;
    schema.location = Some(location.to_string());

    trace!(
        "Parsed {} schema document {} with {} element(s)",
        flavor,
        location,
        schema.elements.len()
    );
    Ok(schema)
}

struct DocumentParser<'a> {
    location: &'a str,
    flavor: Flavor,
}

impl DocumentParser<'_> {
    fn error(&self, message: impl Into<String>) -> Error {
        Error::parse(self.location, message)
    }

    fn reject(&self, key: &str, present: bool) -> Result<()> {
        if present {
            return Err(self.error(format!(
                "Key '{key}' is not allowed in a {} schema",
                self.flavor
            )));
        }
        Ok(())
    }

    fn schema(&self, file: SchemaFile) -> Result<Schema> {
        let header = match self.flavor {
            Flavor::Generic => {
                self.reject("hl7Class", file.hl7_class.is_some())?;
                SchemaHeader::Generic {
                    hl7_type: self.text("hl7Type", file.hl7_type)?,
                    hl7_version: self.text("hl7Version", file.hl7_version)?,
                }
            }
            Flavor::Converter => {
                self.reject("hl7Type", file.hl7_type.is_some())?;
                self.reject("hl7Version", file.hl7_version.is_some())?;
                SchemaHeader::Converter {
                    hl7_class: self.text("hl7Class", file.hl7_class)?,
                }
            }
            Flavor::Transform => {
                self.reject("hl7Class", file.hl7_class.is_some())?;
                self.reject("hl7Type", file.hl7_type.is_some())?;
                self.reject("hl7Version", file.hl7_version.is_some())?;
                SchemaHeader::Transform
            }
        };

        let mut schema = Schema::with_header(header);
        schema.name = self.text("name", file.name)?;
        schema.extends = self.text("extends", file.extends)?;
        schema.constants = self.table("constants", file.constants)?;
        schema.elements = file
            .elements
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(idx, element)| self.element(idx, element))
            .collect::<Result<_>>()?;
        Ok(schema)
    }

    fn element(&self, idx: usize, file: ElementFile) -> Result<SchemaElement> {
        let field = |key: &str| format!("elements[{idx}].{key}");

        let target = match self.flavor {
            Flavor::Generic => {
                self.reject(&field("bundleProperty"), file.bundle_property.is_some())?;
                self.reject(&field("valueSet"), file.value_set.is_some())?;
                ElementTarget::Generic {
                    hl7_spec: self.list(&field("hl7Spec"), file.hl7_spec)?,
                }
            }
            Flavor::Converter => {
                self.reject(&field("bundleProperty"), file.bundle_property.is_some())?;
                ElementTarget::Converter {
                    hl7_spec: self.list(&field("hl7Spec"), file.hl7_spec)?,
                    value_set: self.table(&field("valueSet"), file.value_set)?,
                }
            }
            Flavor::Transform => {
                self.reject(&field("hl7Spec"), file.hl7_spec.is_some())?;
                ElementTarget::Transform {
                    bundle_property: self.text(&field("bundleProperty"), file.bundle_property)?,
                    value_set: self.table(&field("valueSet"), file.value_set)?,
                }
            }
        };

        let mut element = SchemaElement::new(self.flavor);
        element.name = self.text(&field("name"), file.name)?;
        element.condition = self.text(&field("condition"), file.condition)?;
        element.required = self.flag(&field("required"), file.required)?;
        element.debug = self.flag(&field("debug"), file.debug)?;
        element.value = self.list(&field("value"), file.value)?;
        element.target = target;
        element.resource = self.text(&field("resource"), file.resource)?;
        element.resource_index = self.text(&field("resourceIndex"), file.resource_index)?;
        element.schema = self.text(&field("schema"), file.schema)?;
        element.constants = self.table(&field("constants"), file.constants)?;
        Ok(element)
    }

    /// A scalar rendered as text; `null` reads as absent
    fn text(&self, key: &str, value: Option<Value>) -> Result<Option<String>> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(value) => scalar(&value).map(Some).ok_or_else(|| {
                self.error(format!("'{key}' must be a scalar, found {}", kind_of(&value)))
            }),
        }
    }

    /// A single scalar or a list of scalars
    fn list(&self, key: &str, value: Option<Value>) -> Result<Vec<String>> {
        match value {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Sequence(items)) => items
                .iter()
                .map(|item| {
                    scalar(item).ok_or_else(|| {
                        self.error(format!(
                            "'{key}' entries must be scalars, found {}",
                            kind_of(item)
                        ))
                    })
                })
                .collect(),
            Some(value) => Ok(vec![self.text(key, Some(value))?.unwrap_or_default()]),
        }
    }

    fn flag(&self, key: &str, value: Option<Value>) -> Result<Option<bool>> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(flag)) => Ok(Some(flag)),
            Some(Value::String(text)) if text.eq_ignore_ascii_case("true") => Ok(Some(true)),
            Some(Value::String(text)) if text.eq_ignore_ascii_case("false") => Ok(Some(false)),
            Some(other) => Err(self.error(format!(
                "'{key}' must be a boolean, found {}",
                kind_of(&other)
            ))),
        }
    }

    fn table(&self, key: &str, value: Option<IndexMap<String, Value>>) -> Result<Constants> {
        let mut table = IndexMap::new();
        for (entry, value) in value.unwrap_or_default() {
            let text = scalar(&value).ok_or_else(|| {
                self.error(format!(
                    "'{key}.{entry}' must be a scalar, found {}",
                    kind_of(&value)
                ))
            })?;
            table.insert(entry, text);
        }
        Ok(table)
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Tagged(tagged) => scalar(&tagged.value),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
