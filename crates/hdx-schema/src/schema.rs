//! Schemas: named, ordered collections of elements

use crate::element::SchemaElement;
use crate::inheritance::{merge_constants, override_text};
use crate::model::{Constants, Flavor, SchemaHeader};
use crate::validation::{IssueKind, ValidationIssue, check_constants, check_header};
use crate::{Error, Result};
use hdx_expr::ExpressionCompiler;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

/// A mapping schema of one flavor
#[derive(Debug, Clone, Serialize)]
pub struct Schema {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub header: SchemaHeader,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(skip_serializing_if = "Constants::is_empty")]
    pub constants: Constants,
    pub elements: Vec<SchemaElement>,
    /// Issues found by the last call to [`Schema::validate`]
    #[serde(skip)]
    pub errors: Vec<ValidationIssue>,
    /// Where the defining document was loaded from
    #[serde(skip)]
    pub location: Option<String>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.header == other.header
            && self.extends == other.extends
            && self.constants == other.constants
            && self.elements == other.elements
    }
}

impl Schema {
    /// Create an empty schema of the given flavor
    pub fn new(flavor: Flavor) -> Self {
        Self::with_header(SchemaHeader::empty(flavor))
    }

    pub fn with_header(header: SchemaHeader) -> Self {
        Self {
            name: None,
            header,
            extends: None,
            constants: Constants::new(),
            elements: Vec::new(),
            errors: Vec::new(),
            location: None,
        }
    }

    /// Generic schema with its source type and version
    pub fn generic(hl7_type: impl Into<String>, hl7_version: impl Into<String>) -> Self {
        Self::with_header(SchemaHeader::Generic {
            hl7_type: Some(hl7_type.into()),
            hl7_version: Some(hl7_version.into()),
        })
    }

    /// Converter schema targeting `hl7_class`
    pub fn converter(hl7_class: impl Into<String>) -> Self {
        Self::with_header(SchemaHeader::Converter {
            hl7_class: Some(hl7_class.into()),
        })
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_extends(mut self, extends: impl Into<String>) -> Self {
        self.extends = Some(extends.into());
        self
    }

    #[must_use]
    pub fn with_constants(mut self, constants: Constants) -> Self {
        self.constants = constants;
        self
    }

    #[must_use]
    pub fn with_elements(mut self, elements: Vec<SchemaElement>) -> Self {
        self.elements = elements;
        self
    }

    pub fn flavor(&self) -> Flavor {
        self.header.flavor()
    }

    /// Name for logs and issue paths
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(self.location.as_deref())
            .unwrap_or("<unnamed>")
    }

    /// Validate the whole tree; a child schema must not redeclare the header
    ///
    /// Every problem found is returned, and also kept in [`Schema::errors`]
    /// until the next call.
    pub fn validate(
        &mut self,
        compiler: &dyn ExpressionCompiler,
        as_child: bool,
    ) -> Vec<ValidationIssue> {
        let path = self.display_name().to_string();
        let mut issues = Vec::new();
        self.validate_at(compiler, as_child, &path, &mut issues);
        if !issues.is_empty() {
            debug!(
                "Schema {} has {} validation issue(s)",
                self.display_name(),
                issues.len()
            );
        }
        self.errors = issues.clone();
        issues
    }

    /// `validate(compiler, false)` is empty
    pub fn is_valid(&mut self, compiler: &dyn ExpressionCompiler) -> bool {
        self.validate(compiler, false).is_empty()
    }

    fn validate_at(
        &mut self,
        compiler: &dyn ExpressionCompiler,
        as_child: bool,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let flavor = self.flavor();

        if !as_child && self.name.as_deref().is_none_or(|n| n.trim().is_empty()) {
            issues.push(ValidationIssue::new(
                path,
                IssueKind::MissingName,
                "Schema name cannot be blank",
            ));
        }
        if self.elements.is_empty() {
            issues.push(ValidationIssue::new(
                path,
                IssueKind::NoElements,
                "Schema must declare at least one element",
            ));
        }

        check_header(&self.header, as_child, path, issues);
        check_constants(&self.constants, flavor, compiler, path, issues);

        let mut seen = HashSet::new();
        for (idx, element) in self.elements.iter_mut().enumerate() {
            let element_path = match element.name.as_deref() {
                Some(name) => format!("{path}/{name}"),
                None => format!("{path}/#{idx}"),
            };

            if let Some(name) = element.name.as_deref() {
                if !seen.insert(name.to_string()) {
                    issues.push(ValidationIssue::new(
                        &element_path,
                        IssueKind::DuplicateElement,
                        format!("Element name '{name}' is declared more than once"),
                    ));
                }
            }

            if element.flavor() != flavor {
                issues.push(ValidationIssue::new(
                    &element_path,
                    IssueKind::FlavorMismatch,
                    format!(
                        "{} element cannot appear in a {} schema",
                        element.flavor(),
                        flavor
                    ),
                ));
            }

            element.validate_at(compiler, &element_path, issues);

            if let Some(child) = element.schema_ref.as_deref_mut() {
                if child.flavor() != flavor {
                    issues.push(ValidationIssue::new(
                        &element_path,
                        IssueKind::FlavorMismatch,
                        format!(
                            "Referenced {} schema cannot be used from a {} schema",
                            child.flavor(),
                            flavor
                        ),
                    ));
                }
                let start = issues.len();
                child.validate_at(compiler, true, &element_path, issues);
                child.errors = issues[start..].to_vec();
            }
        }
    }

    /// Depth-first search by name: own elements first, then each child tree in order
    pub fn find_element(&self, name: &str) -> Option<&SchemaElement> {
        let path = self.element_path(name)?;
        self.element_at(&path)
    }

    /// Mutable variant of [`Schema::find_element`]
    pub fn find_element_mut(&mut self, name: &str) -> Option<&mut SchemaElement> {
        let path = self.element_path(name)?;
        self.element_at_mut(&path)
    }

    /// Index trail leading to the first element called `name`
    fn element_path(&self, name: &str) -> Option<Vec<usize>> {
        if let Some(idx) = self
            .elements
            .iter()
            .position(|e| e.name.as_deref() == Some(name))
        {
            return Some(vec![idx]);
        }

        for (idx, element) in self.elements.iter().enumerate() {
            if let Some(child) = element.schema_ref.as_deref() {
                if let Some(mut path) = child.element_path(name) {
                    path.insert(0, idx);
                    return Some(path);
                }
            }
        }

        None
    }

    fn element_at(&self, path: &[usize]) -> Option<&SchemaElement> {
        let (first, rest) = path.split_first()?;
        let element = self.elements.get(*first)?;
        if rest.is_empty() {
            return Some(element);
        }
        element.schema_ref.as_deref()?.element_at(rest)
    }

    fn element_at_mut(&mut self, path: &[usize]) -> Option<&mut SchemaElement> {
        let (first, rest) = path.split_first()?;
        let element = self.elements.get_mut(*first)?;
        if rest.is_empty() {
            return Some(element);
        }
        element.schema_ref.as_deref_mut()?.element_at_mut(rest)
    }

    /// Overlay `other` onto this schema in place
    ///
    /// Elements of `other` are matched by name against the whole tree,
    /// including referenced child schemas, and field-merged where found;
    /// unmatched elements are appended at the top level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if `other` (or any of its elements) has
    /// a different flavor. Nothing is modified in that case.
    pub fn merge(&mut self, other: &Schema) -> Result<&mut Self> {
        let flavor = self.flavor();
        let header = self.header.merge(&other.header)?;
        if let Some(element) = other.elements.iter().find(|e| e.flavor() != flavor) {
            return Err(Error::type_mismatch(flavor, element.flavor()));
        }

        debug!(
            "Merging schema {} into {}",
            other.display_name(),
            self.display_name()
        );

        self.name = override_text(&self.name, &other.name);
        self.header = header;
        self.extends = override_text(&self.extends, &other.extends);
        self.constants = merge_constants(&self.constants, &other.constants);
        if other.location.is_some() {
            self.location.clone_from(&other.location);
        }

        for element in &other.elements {
            let found = element
                .name
                .as_deref()
                .and_then(|name| self.find_element_mut(name));
            match found {
                Some(existing) => {
                    let merged = existing.merge(element)?;
                    *existing = merged;
                }
                None => {
                    info!(
                        "Appending element {} to schema {}",
                        element.name().unwrap_or("<unnamed>"),
                        self.display_name()
                    );
                    self.elements.push(element.clone());
                }
            }
        }

        self.errors.clear();
        Ok(self)
    }
}
