//! Coding-system OID canonicalization

use std::collections::HashMap;
use std::sync::LazyLock;

pub const LOINC: &str = "http://loinc.org";
pub const SNOMED_CT: &str = "http://snomed.info/sct";
pub const UCUM: &str = "http://unitsofmeasure.org";
pub const RXNORM: &str = "http://www.nlm.nih.gov/research/umls/rxnorm";
pub const NPI: &str = "http://hl7.org/fhir/sid/us-npi";

static KNOWN_SYSTEMS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("2.16.840.1.113883.6.1", LOINC),
        ("2.16.840.1.113883.6.96", SNOMED_CT),
        ("2.16.840.1.113883.6.8", UCUM),
        ("2.16.840.1.113883.6.88", RXNORM),
        ("2.16.840.1.113883.4.6", NPI),
        ("2.16.840.1.113883.6.90", "http://hl7.org/fhir/sid/icd-10-cm"),
        ("2.16.840.1.113883.6.103", "http://hl7.org/fhir/sid/icd-9-cm"),
        ("2.16.840.1.113883.6.12", "http://www.ama-assn.org/go/cpt"),
        ("2.16.840.1.113883.6.285", "urn:oid:2.16.840.1.113883.6.285"),
        ("2.16.840.1.113883.12.292", "http://hl7.org/fhir/sid/cvx"),
        ("2.16.840.1.113883.6.69", "http://hl7.org/fhir/sid/ndc"),
        ("2.16.840.1.113883.4.1", "http://hl7.org/fhir/sid/us-ssn"),
        ("2.16.840.1.113883.5.1", "http://terminology.hl7.org/CodeSystem/v3-AdministrativeGender"),
        ("2.16.840.1.113883.5.4", "http://terminology.hl7.org/CodeSystem/v3-ActCode"),
        ("2.16.840.1.113883.5.6", "http://terminology.hl7.org/CodeSystem/v3-ActClass"),
        ("2.16.840.1.113883.5.83", "http://terminology.hl7.org/CodeSystem/v3-ObservationInterpretation"),
        ("2.16.840.1.113883.5.111", "http://terminology.hl7.org/CodeSystem/v3-RoleCode"),
        ("2.16.840.1.113883.5.1008", "http://terminology.hl7.org/CodeSystem/v3-NullFlavor"),
        ("2.16.840.1.113883.5.1063", "http://terminology.hl7.org/CodeSystem/v3-ObservationValue"),
        ("2.16.840.1.113883.6.238", "urn:oid:2.16.840.1.113883.6.238"),
        ("2.16.840.1.113883.6.101", "http://nucc.org/provider-taxonomy"),
    ])
});

/// Map a coding-system OID to its canonical URI
///
/// Accepts bare OIDs and `urn:oid:` forms. Unknown systems come back unchanged.
pub fn canonical_system(system: &str) -> String {
    let oid = system.strip_prefix("urn:oid:").unwrap_or(system);
    match KNOWN_SYSTEMS.get(oid) {
        Some(uri) => (*uri).to_string(),
        None => system.to_string(),
    }
}
