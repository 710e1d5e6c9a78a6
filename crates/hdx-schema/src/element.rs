//! Schema elements: one mapping rule each
//!
//! An element is either a leaf that maps `value` expressions onto a target
//! locator, or a delegation to a child schema named by `schema` and resolved
//! into `schema_ref`. The flavor-specific part lives in [`ElementTarget`].

use crate::inheritance::{merge_constants, override_flag, override_list, override_text};
use crate::model::{Constants, ElementTarget, Flavor, ValueSet};
use crate::schema::Schema;
use crate::validation::{
    ElementFacts, ExpressionSources, ValidationIssue, check_element_structure,
    compile_element_expressions,
};
use crate::{Error, Result};
use hdx_expr::{CompiledExpression, ExpressionCompiler};
use serde::Serialize;

/// Expressions compiled by a successful validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFields {
    pub value: Vec<CompiledExpression>,
    pub resource: Option<CompiledExpression>,
    pub condition: Option<CompiledExpression>,
    pub bundle_property: Option<CompiledExpression>,
    pub(crate) sources: ExpressionSources,
}

/// A single mapping rule
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaElement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Gate expression, `true` when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Absent means inherit during merge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub value: Vec<String>,
    #[serde(flatten)]
    pub target: ElementTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_index: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_ref: Option<Box<Schema>>,
    #[serde(skip_serializing_if = "Constants::is_empty")]
    pub constants: Constants,
    #[serde(skip)]
    compiled: Option<CompiledFields>,
}

impl PartialEq for SchemaElement {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.condition == other.condition
            && self.required == other.required
            && self.debug == other.debug
            && self.value == other.value
            && self.target == other.target
            && self.resource == other.resource
            && self.resource_index == other.resource_index
            && self.schema == other.schema
            && self.schema_ref == other.schema_ref
            && self.constants == other.constants
    }
}

impl SchemaElement {
    /// Create an empty element of the given flavor
    pub fn new(flavor: Flavor) -> Self {
        Self {
            name: None,
            condition: None,
            required: None,
            debug: None,
            value: Vec::new(),
            target: ElementTarget::empty(flavor),
            resource: None,
            resource_index: None,
            schema: None,
            schema_ref: None,
            constants: Constants::new(),
            compiled: None,
        }
    }

    pub fn flavor(&self) -> Flavor {
        self.target.flavor()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Condition text, defaulting to `true`
    pub fn condition_or_default(&self) -> &str {
        self.condition
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or("true")
    }

    /// Whether this element delegates to a child schema
    pub fn is_delegation(&self) -> bool {
        self.schema.is_some() || self.schema_ref.is_some()
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    #[must_use]
    pub fn with_required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    #[must_use]
    pub fn with_value<I, S>(mut self, value: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.value = value.into_iter().map(Into::into).collect();
        self
    }

    /// Set the HL7 destination fields; ignored by the transform flavor
    #[must_use]
    pub fn with_hl7_spec<I, S>(mut self, spec: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec: Vec<String> = spec.into_iter().map(Into::into).collect();
        match &mut self.target {
            ElementTarget::Generic { hl7_spec } | ElementTarget::Converter { hl7_spec, .. } => {
                *hl7_spec = spec;
            }
            ElementTarget::Transform { .. } => {}
        }
        self
    }

    /// Set the destination path; ignored by the HL7 flavors
    #[must_use]
    pub fn with_bundle_property(mut self, property: impl Into<String>) -> Self {
        if let ElementTarget::Transform {
            bundle_property, ..
        } = &mut self.target
        {
            *bundle_property = Some(property.into());
        }
        self
    }

    /// Set the value translation table; ignored by the generic flavor
    #[must_use]
    pub fn with_value_set(mut self, set: ValueSet) -> Self {
        match &mut self.target {
            ElementTarget::Converter { value_set, .. }
            | ElementTarget::Transform { value_set, .. } => *value_set = set,
            ElementTarget::Generic { .. } => {}
        }
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    #[must_use]
    pub fn with_resource_index(mut self, index: impl Into<String>) -> Self {
        self.resource_index = Some(index.into());
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    #[must_use]
    pub fn with_schema_ref(mut self, schema: Schema) -> Self {
        self.schema_ref = Some(Box::new(schema));
        self
    }

    #[must_use]
    pub fn with_constants(mut self, constants: Constants) -> Self {
        self.constants = constants;
        self
    }

    /// Compiled `value` expressions, available after a successful validation
    pub fn value_expressions(&self) -> Option<&[CompiledExpression]> {
        self.compiled.as_ref().map(|c| c.value.as_slice())
    }

    pub fn resource_expression(&self) -> Option<&CompiledExpression> {
        self.compiled.as_ref().and_then(|c| c.resource.as_ref())
    }

    pub fn condition_expression(&self) -> Option<&CompiledExpression> {
        self.compiled.as_ref().and_then(|c| c.condition.as_ref())
    }

    pub fn bundle_property_expression(&self) -> Option<&CompiledExpression> {
        self.compiled
            .as_ref()
            .and_then(|c| c.bundle_property.as_ref())
    }

    /// Whether expressions have been compiled and cached
    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Validate this element on its own; child schemas are not visited
    pub fn validate(&mut self, compiler: &dyn ExpressionCompiler) -> Vec<ValidationIssue> {
        let path = self.name.clone().unwrap_or_else(|| "<unnamed>".to_string());
        let mut issues = Vec::new();
        self.validate_at(compiler, &path, &mut issues);
        issues
    }

    /// Append this element's issues under `path`
    ///
    /// Expressions compile once and are reused until one of their source
    /// texts changes.
    pub(crate) fn validate_at(
        &mut self,
        compiler: &dyn ExpressionCompiler,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let facts = ElementFacts {
            condition: self.condition.as_deref(),
            value: &self.value,
            target: &self.target,
            resource: self.resource.as_deref(),
            resource_index: self.resource_index.as_deref(),
            schema: self.schema.as_deref(),
            has_schema_ref: self.schema_ref.is_some(),
            constants: &self.constants,
        };

        let before = issues.len();
        check_element_structure(&facts, path, issues);

        let sources = facts.sources();
        if self
            .compiled
            .as_ref()
            .is_some_and(|cached| cached.sources == sources)
        {
            return;
        }
        self.compiled = None;
        let compiled = compile_element_expressions(&facts, self.flavor(), compiler, path, issues);
        if issues.len() == before {
            self.compiled = compiled;
        }
    }

    /// Overlay `other` onto this element, producing a new element
    ///
    /// `required` and `debug` take any explicit value from `other`. Every
    /// other field is replaced wholesale when `other` supplies a non-empty
    /// value. Constants merge key by key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] when the elements have different flavors.
    pub fn merge(&self, other: &SchemaElement) -> Result<SchemaElement> {
        if self.flavor() != other.flavor() {
            return Err(Error::type_mismatch(self.flavor(), other.flavor()));
        }

        let delegates = other
            .schema
            .as_deref()
            .is_some_and(|schema| !schema.trim().is_empty())
            || other.schema_ref.is_some();
        let (schema, schema_ref) = if delegates {
            (other.schema.clone(), other.schema_ref.clone())
        } else {
            (self.schema.clone(), self.schema_ref.clone())
        };

        Ok(SchemaElement {
            name: override_text(&self.name, &other.name),
            condition: override_text(&self.condition, &other.condition),
            required: override_flag(self.required, other.required),
            debug: override_flag(self.debug, other.debug),
            value: override_list(&self.value, &other.value),
            target: self.target.merge(&other.target)?,
            resource: override_text(&self.resource, &other.resource),
            resource_index: override_text(&self.resource_index, &other.resource_index),
            schema,
            schema_ref,
            constants: merge_constants(&self.constants, &other.constants),
            compiled: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::IssueKind;
    use hdx_expr::SyntaxCompiler;

    fn kinds(issues: &[ValidationIssue]) -> Vec<IssueKind> {
        issues.iter().map(|i| i.kind.clone()).collect()
    }

    fn leaf(flavor: Flavor) -> SchemaElement {
        let element = SchemaElement::new(flavor)
            .with_name("patient-name")
            .with_condition("%resource.name.exists()")
            .with_required(true)
            .with_value(["%resource.name.family"])
            .with_resource("Bundle.entry.resource.ofType(Patient)")
            .with_constants(Constants::from([(
                "system".to_string(),
                "'urn:oid:1'".to_string(),
            )]));
        match flavor {
            Flavor::Transform => element.with_bundle_property("%resource.name.family"),
            _ => element.with_hl7_spec(["PID-5-1"]),
        }
    }

    #[test]
    fn test_valid_leaf_compiles_once() {
        let compiler = SyntaxCompiler::new();
        let mut element = leaf(Flavor::Converter);

        assert!(element.validate(&compiler).is_empty());
        assert!(element.is_compiled());
        assert_eq!(element.value_expressions().unwrap().len(), 1);
        assert_eq!(
            element.resource_expression().unwrap().text(),
            "Bundle.entry.resource.ofType(Patient)"
        );
        assert!(element.condition_expression().is_some());
        assert!(element.bundle_property_expression().is_none());

        assert!(element.validate(&compiler).is_empty());
    }

    #[test]
    fn test_edited_expression_is_recompiled() {
        let compiler = SyntaxCompiler::new();
        let mut element = leaf(Flavor::Transform);
        assert!(element.validate(&compiler).is_empty());

        element.value = vec!["a..b".to_string()];
        let issues = element.validate(&compiler);
        assert_eq!(
            kinds(&issues),
            vec![IssueKind::ExpressionCompile {
                field: "value".to_string()
            }]
        );
        assert!(!element.is_compiled());

        element.value = vec!["%resource.name.given".to_string()];
        assert!(element.validate(&compiler).is_empty());
        assert_eq!(
            element.value_expressions().unwrap()[0].text(),
            "%resource.name.given"
        );
    }

    #[test]
    fn test_edited_constant_is_rechecked() {
        let compiler = SyntaxCompiler::new();
        let mut element = leaf(Flavor::Converter);
        assert!(element.validate(&compiler).is_empty());

        element
            .constants
            .insert("system".to_string(), "'unterminated".to_string());
        let issues = element.validate(&compiler);
        assert_eq!(
            kinds(&issues),
            vec![IssueKind::ExpressionCompile {
                field: "constants.system".to_string()
            }]
        );
    }

    #[test]
    fn test_transform_leaf_compiles_bundle_property() {
        let mut element = leaf(Flavor::Transform);
        assert!(element.validate(&SyntaxCompiler::new()).is_empty());
        assert!(element.bundle_property_expression().is_some());
    }

    #[test]
    fn test_nothing_to_map() {
        let mut element = SchemaElement::new(Flavor::Generic).with_name("empty");
        let issues = element.validate(&SyntaxCompiler::new());
        assert_eq!(kinds(&issues), vec![IssueKind::NothingToMap]);
        assert!(!element.is_compiled());
    }

    #[test]
    fn test_ambiguous_element() {
        let child = Schema::new(Flavor::Generic).with_name("child");
        let mut element = SchemaElement::new(Flavor::Generic)
            .with_name("both")
            .with_schema("child")
            .with_schema_ref(child)
            .with_value(["'x'"])
            .with_hl7_spec(["PID-3"]);
        let issues = element.validate(&SyntaxCompiler::new());
        assert_eq!(kinds(&issues), vec![IssueKind::AmbiguousElement]);
    }

    #[test]
    fn test_unresolved_reference() {
        let mut element = SchemaElement::new(Flavor::Converter)
            .with_name("patient")
            .with_schema("patient/PID");
        let issues = element.validate(&SyntaxCompiler::new());
        assert_eq!(kinds(&issues), vec![IssueKind::UnresolvedReference]);
    }

    #[test]
    fn test_incomplete_leaf_mapping() {
        let compiler = SyntaxCompiler::new();

        let mut value_only = SchemaElement::new(Flavor::Transform)
            .with_name("value-only")
            .with_value(["'x'"]);
        assert_eq!(
            kinds(&value_only.validate(&compiler)),
            vec![IssueKind::IncompleteMapping]
        );

        let mut target_only = SchemaElement::new(Flavor::Generic)
            .with_name("target-only")
            .with_hl7_spec(["MSH-7"]);
        assert_eq!(
            kinds(&target_only.validate(&compiler)),
            vec![IssueKind::IncompleteMapping]
        );
    }

    #[test]
    fn test_resource_index_requires_resource() {
        let compiler = SyntaxCompiler::new();
        let base = SchemaElement::new(Flavor::Converter)
            .with_name("observations")
            .with_value(["%obs.code"])
            .with_hl7_spec(["OBX-3"])
            .with_resource_index("obsIndex");

        let mut without = base.clone();
        assert_eq!(
            kinds(&without.validate(&compiler)),
            vec![IssueKind::IndexWithoutResource]
        );

        let mut with = base.with_resource("Bundle.entry.resource.ofType(Observation)");
        assert!(with.validate(&compiler).is_empty());
    }

    #[test]
    fn test_expression_errors_accumulate() {
        let mut element = SchemaElement::new(Flavor::Transform)
            .with_name("broken")
            .with_condition("a and")
            .with_resource("ofType(Patient")
            .with_value(["'ok'", "a.."])
            .with_bundle_property("%resource.");
        let issues = element.validate(&SyntaxCompiler::new());

        let fields: Vec<String> = issues
            .iter()
            .filter_map(|i| match &i.kind {
                IssueKind::ExpressionCompile { field } => Some(field.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(fields, vec!["value", "resource", "condition", "bundleProperty"]);
        assert!(!element.is_compiled());
    }

    #[test]
    fn test_merge_with_name_only_is_noop() {
        let original = leaf(Flavor::Converter);
        let overlay = SchemaElement::new(Flavor::Converter).with_name("patient-name");

        let merged = original.merge(&overlay).unwrap();
        assert_eq!(merged, original);
    }

    #[test]
    fn test_merge_required_tri_state() {
        let original = leaf(Flavor::Generic);

        let inherit = SchemaElement::new(Flavor::Generic).with_name("patient-name");
        assert_eq!(original.merge(&inherit).unwrap().required, Some(true));

        let disable = SchemaElement::new(Flavor::Generic)
            .with_name("patient-name")
            .with_required(false);
        assert_eq!(original.merge(&disable).unwrap().required, Some(false));
    }

    #[test]
    fn test_merge_replaces_lists_and_merges_constants() {
        let original = leaf(Flavor::Converter).with_value(["'a'", "'b'"]);
        let overlay = SchemaElement::new(Flavor::Converter)
            .with_name("patient-name")
            .with_value(["'c'"])
            .with_constants(Constants::from([
                ("system".to_string(), "'urn:oid:2'".to_string()),
                ("extra".to_string(), "'e'".to_string()),
            ]));

        let merged = original.merge(&overlay).unwrap();
        assert_eq!(merged.value, vec!["'c'".to_string()]);
        assert_eq!(merged.target.hl7_spec(), ["PID-5-1".to_string()]);
        assert_eq!(merged.constants["system"], "'urn:oid:2'");
        assert_eq!(merged.constants["extra"], "'e'");
        assert_eq!(merged.condition.as_deref(), Some("%resource.name.exists()"));
    }

    #[test]
    fn test_merge_delegation_replaces_pair() {
        let original = SchemaElement::new(Flavor::Converter)
            .with_name("patient")
            .with_schema("patient-v1")
            .with_schema_ref(Schema::new(Flavor::Converter).with_name("patient-v1"));
        let overlay = SchemaElement::new(Flavor::Converter)
            .with_name("patient")
            .with_schema("patient-v2")
            .with_schema_ref(Schema::new(Flavor::Converter).with_name("patient-v2"));

        let merged = original.merge(&overlay).unwrap();
        assert_eq!(merged.schema.as_deref(), Some("patient-v2"));
        assert_eq!(
            merged.schema_ref.unwrap().name.as_deref(),
            Some("patient-v2")
        );
    }

    #[test]
    fn test_merge_blank_schema_keeps_delegation() {
        let original = SchemaElement::new(Flavor::Converter)
            .with_name("patient")
            .with_schema("patient-v1")
            .with_schema_ref(Schema::new(Flavor::Converter).with_name("patient-v1"));
        let overlay = SchemaElement::new(Flavor::Converter)
            .with_name("patient")
            .with_schema("  ");

        let mut merged = original.merge(&overlay).unwrap();
        assert_eq!(merged.schema.as_deref(), Some("patient-v1"));
        assert_eq!(
            merged.schema_ref.as_ref().unwrap().name.as_deref(),
            Some("patient-v1")
        );
        assert!(merged.validate(&SyntaxCompiler::new()).is_empty());
    }

    #[test]
    fn test_merge_flavor_mismatch() {
        let original = leaf(Flavor::Converter);
        let overlay = SchemaElement::new(Flavor::Transform).with_name("patient-name");
        assert!(matches!(
            original.merge(&overlay),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_merge_clears_compiled_cache() {
        let compiler = SyntaxCompiler::new();
        let mut original = leaf(Flavor::Converter);
        assert!(original.validate(&compiler).is_empty());

        let merged = original
            .merge(&SchemaElement::new(Flavor::Converter).with_value(["'new'"]))
            .unwrap();
        assert!(!merged.is_compiled());
    }

    #[test]
    fn test_condition_default() {
        assert_eq!(
            SchemaElement::new(Flavor::Generic).condition_or_default(),
            "true"
        );
    }
}
