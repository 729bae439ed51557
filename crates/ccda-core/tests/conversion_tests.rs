//! End-to-end conversion tests
//!
//! These tests run the default engine over a complete continuity of care
//! document and check the shape of the resulting bundle.

use ccda_core::*;
use serde_json::json;
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn convert_sample() -> ConversionOutcome {
    ConversionEngine::default()
        .with_id_strategy(IdStrategy::Sequential)
        .convert_file(&fixture("ccd_sample.xml"))
        .unwrap()
}

#[test]
fn test_sample_document_converts_completely() {
    let outcome = convert_sample();
    assert!(outcome.is_complete(), "errors: {:?}", outcome.errors());

    let kinds: Vec<_> = outcome.bundle().iter().map(|r| r.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            RecordKind::Organization,
            RecordKind::Patient,
            RecordKind::Practitioner,
            RecordKind::Condition,
            RecordKind::AllergyIntolerance,
            RecordKind::Location,
            RecordKind::Procedure,
            RecordKind::Observation,
            RecordKind::Observation,
        ]
    );
}

#[test]
fn test_references_resolve_within_the_bundle() {
    let outcome = convert_sample();
    let bundle = outcome.bundle();

    let patient = bundle.of_kind(RecordKind::Patient).next().unwrap();
    let managing = patient.get("managingOrganization").unwrap()["reference"]
        .as_str()
        .unwrap();
    assert_eq!(
        bundle.resolve(managing).map(|r| r.kind()),
        Some(RecordKind::Organization)
    );

    let procedure = bundle.of_kind(RecordKind::Procedure).next().unwrap().to_resource();
    let performer = procedure["performer"][0]["actor"]["reference"].as_str().unwrap();
    let author = bundle.of_kind(RecordKind::Practitioner).next().unwrap();
    assert_eq!(performer, author.reference());
    // The performer's organization is the custodian seen earlier
    assert_eq!(
        procedure["performer"][0]["onBehalfOf"]["reference"].as_str(),
        Some(managing)
    );

    for record in bundle.iter().filter(|r| r.kind() != RecordKind::Organization) {
        let resource = record.to_resource();
        for field in ["subject", "patient"] {
            if let Some(reference) = resource[field]["reference"].as_str() {
                assert_eq!(reference, patient.reference());
            }
        }
    }
}

#[test]
fn test_patient_demographics() {
    let outcome = convert_sample();
    let patient = outcome
        .bundle()
        .of_kind(RecordKind::Patient)
        .next()
        .unwrap()
        .to_resource();

    assert_eq!(patient["resourceType"], json!("Patient"));
    assert_eq!(patient["gender"], json!("female"));
    assert_eq!(patient["birthDate"], json!("1975-05-01"));
    assert_eq!(patient["name"][0]["family"], json!("Everywoman"));
    assert_eq!(patient["address"][0]["city"], json!("Beaverton"));
    assert_eq!(
        patient["communication"][0]["language"]["coding"][0]["code"],
        json!("en")
    );
}

#[test]
fn test_procedure_period_keeps_offsets() {
    let outcome = convert_sample();
    let procedure = outcome
        .bundle()
        .of_kind(RecordKind::Procedure)
        .next()
        .unwrap()
        .to_resource();

    assert_eq!(
        procedure["performedPeriod"],
        json!({ "start": "2012-05-12T09:30:00-05:00", "end": "2012-05-12T10:30:00-05:00" })
    );
}

#[test]
fn test_bundle_json_is_a_collection() {
    let outcome = convert_sample();
    let json = outcome.bundle().to_json();

    assert_eq!(json["resourceType"], json!("Bundle"));
    assert_eq!(json["type"], json!("collection"));
    assert_eq!(json["entry"].as_array().unwrap().len(), 9);
    assert_eq!(json["entry"][0]["resource"]["resourceType"], json!("Organization"));
}

#[test]
fn test_conversion_is_deterministic_with_sequential_ids() {
    assert_eq!(convert_sample(), convert_sample());
}

#[test]
fn test_restricted_sections_from_config() {
    let config = EngineConfig {
        sections: vec![RecordKind::Condition],
        id_strategy: IdStrategy::Sequential,
        ..EngineConfig::default()
    };
    let engine = ConversionEngine::from_config(&config).unwrap();
    let outcome = engine.convert_file(&fixture("ccd_sample.xml")).unwrap();

    let kinds: Vec<_> = outcome.bundle().iter().map(|r| r.kind()).collect();
    assert_eq!(
        kinds,
        vec![RecordKind::Organization, RecordKind::Patient, RecordKind::Condition]
    );
}

#[test]
fn test_partial_outcome_lists_every_error() {
    let xml = std::fs::read_to_string(fixture("ccd_sample.xml"))
        .unwrap()
        .replace(r#"<statusCode code="completed"/>"#, r#"<statusCode code="bogus"/>"#);
    let outcome = ConversionEngine::default().convert_str(&xml).unwrap();

    assert!(!outcome.is_complete());
    // The repeated problem resolves to the first condition before its status
    // is read, leaving the procedure and both results
    assert_eq!(outcome.errors().len(), 3);
    assert!(
        outcome
            .errors()
            .iter()
            .all(|e| e.kind() == ErrorKind::UnrecognizedValue)
    );
    // Records with an unknown status are still produced
    assert_eq!(outcome.bundle().len(), 9);

    let (_, errors) = outcome.into_parts();
    let report = errors.unwrap().to_string();
    assert!(report.starts_with("3 conversion error(s)"));
    assert!(report.contains("[unrecognized-value]"));
}

#[test]
fn test_missing_file_is_an_io_error() {
    let err = ConversionEngine::default()
        .convert_file(&fixture("does_not_exist.xml"))
        .unwrap_err();
    assert!(matches!(err, EngineError::Source(SourceError::Io { .. })));
}

#[test]
fn test_query_selects_nodes_in_document_order() {
    let tree = SourceTree::from_file(fixture("ccd_sample.xml")).unwrap();
    let codes: Vec<_> = tree
        .root()
        .query("//section/code")
        .unwrap()
        .into_iter()
        .filter_map(|node| node.attribute("code"))
        .collect();

    assert_eq!(codes, vec!["11450-4", "48765-2", "47519-4", "30954-2"]);
}
