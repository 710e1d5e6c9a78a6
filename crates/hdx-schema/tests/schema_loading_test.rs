use hdx_expr::SyntaxCompiler;
use hdx_schema::{
    Error, Flavor, IssueKind, SchemaHeader, SchemaReader, retrieve_converter_schema_reference,
    retrieve_generic_schema_reference,
};
use std::fs;
use std::path::Path;

fn data_base(dir: &str) -> String {
    format!("file:{}/tests/data/{dir}", env!("CARGO_MANIFEST_DIR"))
}

fn reader() -> SchemaReader {
    SchemaReader::default()
}

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

fn temp_base(dir: &Path) -> String {
    format!("file:{}", dir.display())
}

#[test]
fn test_generic_base_schema_is_valid() {
    let schema = reader()
        .from_file("ORU-R01-Base", Some(&data_base("generic")), Flavor::Generic)
        .unwrap();

    assert_eq!(schema.name.as_deref(), Some("ORU-R01-Base"));
    assert!(schema.clone().is_valid(&SyntaxCompiler::new()));
    assert_eq!(schema.elements.len(), 1);
    assert_eq!(
        schema.elements[0].condition.as_deref(),
        Some("%messageType.exists()")
    );
}

#[test]
fn test_unrecognized_top_level_key_fails_parsing() {
    let result = reader().read_schema_tree(
        "ORU-R01-extra-key",
        Some(&data_base("generic")),
        Flavor::Generic,
    );
    match result {
        Err(Error::Parse { location, message }) => {
            assert!(location.ends_with("generic/ORU-R01-extra-key.yml"));
            assert!(message.contains("reportingFacility"));
        }
        other => panic!("Expected Parse error, got {:?}", other),
    }
}

#[test]
fn test_converter_without_class_is_invalid() {
    let mut schema = reader()
        .read_schema_tree("missing-class", Some(&data_base("converter")), Flavor::Converter)
        .unwrap();

    assert!(!schema.is_valid(&SyntaxCompiler::new()));
    assert_eq!(
        schema.errors[0].kind,
        IssueKind::MissingHeader {
            field: "hl7Class".to_string()
        }
    );
}

#[test]
fn test_is_valid_is_idempotent() {
    let compiler = SyntaxCompiler::new();
    let mut invalid = reader()
        .read_schema_tree("broken", Some(&data_base("transform")), Flavor::Transform)
        .unwrap();
    let mut valid = reader()
        .read_schema_tree("cleanup", Some(&data_base("transform")), Flavor::Transform)
        .unwrap();

    assert_eq!(invalid.is_valid(&compiler), invalid.is_valid(&compiler));
    assert!(!invalid.is_valid(&compiler));
    assert_eq!(valid.is_valid(&compiler), valid.is_valid(&compiler));
    assert!(valid.is_valid(&compiler));
}

#[test]
fn test_validation_reports_every_issue() {
    let result = reader().from_file("broken", Some(&data_base("transform")), Flavor::Transform);

    let issues = match result {
        Err(Error::Validation { schema, issues }) => {
            assert_eq!(schema, "broken");
            issues
        }
        other => panic!("Expected Validation error, got {:?}", other),
    };

    let found: Vec<(&str, &IssueKind)> = issues
        .iter()
        .map(|issue| (issue.path.as_str(), &issue.kind))
        .collect();
    assert_eq!(
        found,
        vec![
            ("broken/both", &IssueKind::AmbiguousElement),
            ("broken/neither", &IssueKind::NothingToMap),
            ("broken/dangling-index", &IssueKind::IndexWithoutResource),
            (
                "broken/bad-condition",
                &IssueKind::ExpressionCompile {
                    field: "condition".to_string()
                }
            ),
        ]
    );
}

#[test]
fn test_overlay_reaches_into_referenced_schema() {
    let schema = reader()
        .from_files(&["B", "B-overlay"], Some(&data_base("converter")), Flavor::Converter)
        .unwrap();

    assert_eq!(schema.name.as_deref(), Some("B-overlay"));
    assert_eq!(schema.constants["system"], "'urn:oid:2.16.840.1.114222'");

    let child = schema.elements[1].schema_ref.as_deref().unwrap();
    assert_eq!(child.name.as_deref(), Some("A"));
    assert_eq!(child.elements[1].value, vec!["'overridden'".to_string()]);
    assert_eq!(child.elements[1].target.hl7_spec(), ["OBX-2".to_string()]);
    assert_eq!(child.elements[0].value, vec!["'one'".to_string()]);

    assert_eq!(schema.elements.len(), 3);
    assert_eq!(schema.elements[2].name.as_deref(), Some("trailer"));
}

#[test]
fn test_extends_inherits_header_and_elements() {
    let schema = reader()
        .from_file("ORU-R01-upgrade", Some(&data_base("generic")), Flavor::Generic)
        .unwrap();

    assert_eq!(schema.name.as_deref(), Some("ORU-R01-Upgrade"));
    assert_eq!(
        schema.header,
        SchemaHeader::Generic {
            hl7_type: Some("ORU_R01".to_string()),
            hl7_version: Some("2.7".to_string()),
        }
    );
    let element = schema.find_element("message-headers").unwrap();
    assert_eq!(element.value, vec!["2".to_string()]);
    assert_eq!(element.condition.as_deref(), Some("%messageType.exists()"));
}

#[test]
fn test_direct_cycle_detected() {
    let result = reader().read_schema_tree("direct-a", Some(&data_base("cycles")), Flavor::Transform);
    match result {
        Err(Error::CircularReference { chain }) => {
            assert_eq!(chain.len(), 3);
            assert!(chain[0].ends_with("cycles/direct-a.yml"));
            assert!(chain[1].ends_with("cycles/direct-b.yml"));
            assert_eq!(chain[0], chain[2]);
        }
        other => panic!("Expected CircularReference error, got {:?}", other),
    }
}

#[test]
fn test_deep_cycle_detected() {
    let result = reader().read_schema_tree("deep-a", Some(&data_base("cycles")), Flavor::Transform);
    match result {
        Err(Error::CircularReference { chain }) => {
            let names: Vec<&str> = chain
                .iter()
                .map(|loc| loc.rsplit('/').next().unwrap())
                .collect();
            assert_eq!(names, vec!["deep-a.yml", "deep-b.yml", "deep-c.yml", "deep-a.yml"]);
        }
        other => panic!("Expected CircularReference error, got {:?}", other),
    }
}

#[test]
fn test_self_extension_detected() {
    let result = reader().read_schema_tree("self", Some(&data_base("cycles")), Flavor::Transform);
    assert!(matches!(result, Err(Error::CircularReference { .. })));
}

#[test]
fn test_cycle_through_extends_and_reference() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "root.yml",
        "name: root\nextends: parent\nelements:\n  - name: r\n    value: [\"'r'\"]\n    bundleProperty: \"%resource.r\"\n",
    );
    write(
        dir.path(),
        "parent.yml",
        "name: parent\nelements:\n  - name: nested\n    schema: nested/child\n",
    );
    fs::create_dir(dir.path().join("nested")).unwrap();
    write(
        &dir.path().join("nested"),
        "child.yml",
        "name: child\nelements:\n  - name: up\n    schema: ../root\n",
    );

    let result = reader().read_schema_tree("root", Some(&temp_base(dir.path())), Flavor::Transform);
    match result {
        Err(Error::CircularReference { chain }) => {
            assert_eq!(chain.len(), 4);
            assert!(chain[2].ends_with("nested/child.yml"));
        }
        other => panic!("Expected CircularReference error, got {:?}", other),
    }
}

#[test]
fn test_shared_child_is_not_a_cycle() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "root.yml",
        "name: root\nelements:\n  - name: first\n    schema: shared\n  - name: second\n    schema: shared\n",
    );
    write(
        dir.path(),
        "shared.yml",
        "name: shared\nelements:\n  - name: code\n    value: [\"'c'\"]\n    bundleProperty: \"%resource.code\"\n",
    );

    let schema = reader()
        .from_file("root", Some(&temp_base(dir.path())), Flavor::Transform)
        .unwrap();
    assert!(schema.elements.iter().all(|e| e.schema_ref.is_some()));
}

#[test]
fn test_missing_reference_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "root.yml",
        "name: root\nelements:\n  - name: gone\n    schema: does-not-exist\n",
    );

    let result = reader().read_schema_tree("root", Some(&temp_base(dir.path())), Flavor::Converter);
    match result {
        Err(Error::UnresolvedReference { reference, .. }) => {
            assert!(reference.ends_with("does-not-exist.yml"));
        }
        other => panic!("Expected UnresolvedReference error, got {:?}", other),
    }
}

#[test]
fn test_overlay_with_foreign_keys_fails_parsing() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "base.yml",
        "name: base\nhl7Class: ORU_R01\nelements:\n  - name: a\n    value: [\"'a'\"]\n    hl7Spec: [OBX-5]\n",
    );
    write(
        dir.path(),
        "layer.yml",
        "name: layer\nelements:\n  - name: a\n    value: [\"'b'\"]\n    bundleProperty: \"%resource.a\"\n",
    );

    let result = reader().from_files(&["base", "layer"], Some(&temp_base(dir.path())), Flavor::Converter);
    assert!(matches!(result, Err(Error::Parse { .. })));
}

#[test]
fn test_retrieve_by_flavor() {
    let generic = retrieve_generic_schema_reference(
        &format!("{}/ORU-R01-Base", data_base("generic")),
        None,
    )
    .unwrap();
    assert_eq!(generic.flavor(), Flavor::Generic);

    let converter = retrieve_converter_schema_reference(
        &format!("{}/B.yml", data_base("converter")),
        None,
    )
    .unwrap();
    assert_eq!(converter.flavor(), Flavor::Converter);
    assert!(converter.find_element("child3").is_some());
}

#[test]
fn test_bundled_schema_loads_and_validates() {
    let schema = reader()
        .from_file(
            "ORU_R01/ORU_R01-base",
            Some("classpath:/metadata/hl7_mapping"),
            Flavor::Converter,
        )
        .unwrap();
    assert_eq!(schema.name.as_deref(), Some("ORU_R01-base"));
    assert!(schema.find_element("patient-sex").is_some());

    let transform = reader()
        .from_file(
            "classpath:/metadata/fhir_transforms/common/patient-cleanup",
            None,
            Flavor::Transform,
        )
        .unwrap();
    assert_eq!(transform.flavor(), Flavor::Transform);
}
