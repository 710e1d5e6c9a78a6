//! Structural and expression rules for schemas and elements
//!
//! Rules never stop at the first failure. Each check appends to an issue list
//! so a caller sees everything wrong with a schema tree in one pass.

use crate::element::CompiledFields;
use crate::model::{Constants, ElementTarget, Flavor, SchemaHeader};
use crate::{Error, Result};
use hdx_expr::{CompiledExpression, ExpressionCompiler};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

static MESSAGE_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:ca\.uhn\.hl7v2\.model\.v(?P<version>2[1-8][0-9]?)\.message\.)?(?P<structure>[A-Z][A-Z0-9]{2}(?:_[A-Z][0-9]{2})?)$")
        .expect("message class pattern is valid")
});

/// HL7 v2 message structures a converter schema may target
pub const KNOWN_MESSAGE_STRUCTURES: &[&str] = &[
    "ACK", "ADT_A01", "ADT_A03", "ADT_A05", "ADT_A39", "ADT_A60", "BAR_P01", "DFT_P03",
    "MDM_T02", "MFN_M01", "OML_O21", "OMG_O19", "ORM_O01", "ORL_O22", "ORU_R01", "ORU_R30",
    "OUL_R21", "QBP_Q11", "RDE_O11", "RSP_K11", "SIU_S12", "VXU_V04",
];

/// HL7 v2 versions a generic schema may declare
pub const KNOWN_HL7_VERSIONS: &[&str] = &[
    "2.1", "2.2", "2.3", "2.3.1", "2.4", "2.5", "2.5.1", "2.6", "2.7", "2.7.1", "2.8", "2.8.1",
];

/// What a validation issue is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueKind {
    /// Element has neither a child schema nor a value mapping
    NothingToMap,
    /// Element has both a child schema and a value mapping
    AmbiguousElement,
    /// `schema` is named but was never resolved
    UnresolvedReference,
    /// `value` without a target locator, or the other way round
    IncompleteMapping,
    /// `resourceIndex` without `resource`
    IndexWithoutResource,
    /// `resourceIndex` is not a plain identifier
    InvalidResourceIndex,
    /// `valueSet` without any `value` to translate
    ValueSetWithoutValue,
    /// An expression field failed to compile
    ExpressionCompile { field: String },
    /// A root schema lacks a required header field
    MissingHeader { field: String },
    /// A child schema redeclares a header field
    UnexpectedHeader { field: String },
    /// Header names a message type or version outside the known set
    UnknownMessageType,
    /// Schema has no name
    MissingName,
    /// Schema has no elements
    NoElements,
    /// Two direct siblings share a name
    DuplicateElement,
    /// Element flavor differs from its schema
    FlavorMismatch,
}

/// One structural or expression problem found by validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Slash-separated schema/element trail
    pub path: String,
    #[serde(flatten)]
    pub kind: IssueKind,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Render an issue list the way error messages show it
pub fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Compile one expression field, tagging failures with the field name
///
/// # Errors
///
/// Returns [`Error::ExpressionCompile`] with the compiler's syntax detail.
pub fn compile_field(
    compiler: &dyn ExpressionCompiler,
    field: &str,
    text: &str,
) -> Result<CompiledExpression> {
    compiler
        .compile(text)
        .map_err(|source| Error::ExpressionCompile {
            field: field.to_string(),
            source,
        })
}

fn compile_into(
    compiler: &dyn ExpressionCompiler,
    field: &str,
    text: &str,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<CompiledExpression> {
    match compile_field(compiler, field, text) {
        Ok(compiled) => Some(compiled),
        Err(Error::ExpressionCompile { field, source }) => {
            issues.push(ValidationIssue::new(
                path,
                IssueKind::ExpressionCompile {
                    field: field.clone(),
                },
                format!("Invalid expression in {field} '{text}': {source}"),
            ));
            None
        }
        Err(other) => {
            issues.push(ValidationIssue::new(
                path,
                IssueKind::ExpressionCompile {
                    field: field.to_string(),
                },
                other.to_string(),
            ));
            None
        }
    }
}

/// Borrowed view of the fields element rules look at
pub(crate) struct ElementFacts<'a> {
    pub condition: Option<&'a str>,
    pub value: &'a [String],
    pub target: &'a ElementTarget,
    pub resource: Option<&'a str>,
    pub resource_index: Option<&'a str>,
    pub schema: Option<&'a str>,
    pub has_schema_ref: bool,
    pub constants: &'a Constants,
}

impl ElementFacts<'_> {
    /// Owned copy of every text the expression pass compiles
    pub(crate) fn sources(&self) -> ExpressionSources {
        ExpressionSources {
            value: self.value.to_vec(),
            resource: self.resource.map(str::to_string),
            condition: self.condition.map(str::to_string),
            bundle_property: self.target.bundle_property().map(str::to_string),
            constants: self.constants.clone(),
        }
    }
}

/// Texts a set of [`CompiledFields`] was built from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionSources {
    value: Vec<String>,
    resource: Option<String>,
    condition: Option<String>,
    bundle_property: Option<String>,
    constants: Constants,
}

fn is_set(text: Option<&str>) -> bool {
    text.is_some_and(|t| !t.trim().is_empty())
}

/// Structural rules for one element; independent of expression syntax
pub(crate) fn check_element_structure(
    facts: &ElementFacts<'_>,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let delegates = is_set(facts.schema) || facts.has_schema_ref;
    let has_value = !facts.value.is_empty();
    let has_target = facts.target.is_present();
    let maps_value = has_value || has_target;

    match (delegates, maps_value) {
        (false, false) => issues.push(ValidationIssue::new(
            path,
            IssueKind::NothingToMap,
            "Element must either reference a schema or map a value",
        )),
        (true, true) => issues.push(ValidationIssue::new(
            path,
            IssueKind::AmbiguousElement,
            format!(
                "Element cannot both reference a schema and map a value with {}",
                facts.target.locator_key()
            ),
        )),
        _ => {}
    }

    if is_set(facts.schema) && !facts.has_schema_ref {
        issues.push(ValidationIssue::new(
            path,
            IssueKind::UnresolvedReference,
            format!(
                "Referenced schema '{}' was not resolved",
                facts.schema.unwrap_or_default()
            ),
        ));
    }

    if has_value != has_target {
        let message = if has_value {
            format!("Element has a value but no {}", facts.target.locator_key())
        } else {
            format!("Element has {} but no value", facts.target.locator_key())
        };
        issues.push(ValidationIssue::new(
            path,
            IssueKind::IncompleteMapping,
            message,
        ));
    }

    if let Some(index) = facts.resource_index.filter(|i| !i.trim().is_empty()) {
        if !is_set(facts.resource) {
            issues.push(ValidationIssue::new(
                path,
                IssueKind::IndexWithoutResource,
                format!("resourceIndex '{index}' requires a resource"),
            ));
        }
        if !IDENTIFIER.is_match(index) {
            issues.push(ValidationIssue::new(
                path,
                IssueKind::InvalidResourceIndex,
                format!("resourceIndex '{index}' must be a plain identifier"),
            ));
        }
    }

    if facts.target.value_set().is_some_and(|set| !set.is_empty()) && !has_value {
        issues.push(ValidationIssue::new(
            path,
            IssueKind::ValueSetWithoutValue,
            "valueSet requires a value to translate",
        ));
    }
}

/// Compile every present expression field of an element
///
/// Returns the compiled fields only when all of them compiled.
pub(crate) fn compile_element_expressions(
    facts: &ElementFacts<'_>,
    flavor: Flavor,
    compiler: &dyn ExpressionCompiler,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<CompiledFields> {
    let before = issues.len();
    let mut compiled = CompiledFields {
        sources: facts.sources(),
        ..CompiledFields::default()
    };

    for text in facts.value {
        if let Some(expr) = compile_into(compiler, "value", text, path, issues) {
            compiled.value.push(expr);
        }
    }
    if let Some(text) = facts.resource.filter(|t| !t.trim().is_empty()) {
        compiled.resource = compile_into(compiler, "resource", text, path, issues);
    }
    if let Some(text) = facts.condition.filter(|t| !t.trim().is_empty()) {
        compiled.condition = compile_into(compiler, "condition", text, path, issues);
    }
    if let Some(text) = facts.target.bundle_property().filter(|t| !t.trim().is_empty()) {
        compiled.bundle_property = compile_into(compiler, "bundleProperty", text, path, issues);
    }
    check_constants(facts.constants, flavor, compiler, path, issues);

    (issues.len() == before).then_some(compiled)
}

/// Constants are expressions for the converter and transform flavors
pub(crate) fn check_constants(
    constants: &Constants,
    flavor: Flavor,
    compiler: &dyn ExpressionCompiler,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    if flavor == Flavor::Generic {
        return;
    }
    for (key, text) in constants {
        compile_into(compiler, &format!("constants.{key}"), text, path, issues);
    }
}

/// Header presence for root schemas, absence for child schemas, and content
pub(crate) fn check_header(
    header: &SchemaHeader,
    as_child: bool,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    for (field, value) in header.fields() {
        let present = is_set(value);
        if as_child && present {
            issues.push(ValidationIssue::new(
                path,
                IssueKind::UnexpectedHeader {
                    field: field.to_string(),
                },
                format!("Child schema must not declare {field}"),
            ));
        } else if !as_child && !present {
            issues.push(ValidationIssue::new(
                path,
                IssueKind::MissingHeader {
                    field: field.to_string(),
                },
                format!("Schema must declare {field}"),
            ));
        }
    }

    match header {
        SchemaHeader::Converter {
            hl7_class: Some(class),
        } if is_set(Some(class.as_str())) && !is_known_message_class(class) => {
            issues.push(ValidationIssue::new(
                path,
                IssueKind::UnknownMessageType,
                format!("hl7Class '{class}' does not name a known message type"),
            ));
        }
        SchemaHeader::Generic {
            hl7_version: Some(version),
            ..
        } if is_set(Some(version.as_str())) && !KNOWN_HL7_VERSIONS.contains(&version.trim()) => {
            issues.push(ValidationIssue::new(
                path,
                IssueKind::UnknownMessageType,
                format!("hl7Version '{version}' is not a known HL7 version"),
            ));
        }
        _ => {}
    }
}

/// Whether `class` names a known message structure, by short or qualified name
pub fn is_known_message_class(class: &str) -> bool {
    MESSAGE_CLASS
        .captures(class.trim())
        .and_then(|caps| caps.name("structure"))
        .is_some_and(|structure| KNOWN_MESSAGE_STRUCTURES.contains(&structure.as_str()))
}
