//! Closed code mappings
//!
//! Each table is total over its declared domain; anything outside the domain
//! is an UnrecognizedValue error rather than a pass-through.

use crate::error::{ConversionError, Result};
use crate::source::SourceNode;

/// Deterministic source-code to target-code table
#[derive(Debug, Clone, Copy)]
pub struct CodeMap {
    name: &'static str,
    entries: &'static [(&'static str, &'static str)],
}

impl CodeMap {
    pub const fn new(name: &'static str, entries: &'static [(&'static str, &'static str)]) -> Self {
        Self { name, entries }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn lookup(&self, code: &str) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(source, _)| *source == code)
            .map(|(_, target)| *target)
    }

    /// Map `code`, failing without a source location
    pub fn normalize(&self, code: &str) -> Result<&'static str> {
        self.lookup(code)
            .ok_or_else(|| ConversionError::unrecognized_at(code, self.name, ""))
    }

    /// Map `code` read from `node`, failing with the node's path
    pub fn normalize_at(&self, code: &str, node: SourceNode<'_>) -> Result<&'static str> {
        self.lookup(code)
            .ok_or_else(|| ConversionError::unrecognized(code, self.name, node))
    }

    pub fn source_codes(&self) -> impl Iterator<Item = &'static str> {
        self.entries.iter().map(|(source, _)| *source)
    }
}

const LIFECYCLE: &[(&str, &str)] = &[
    ("aborted", "resolved"),
    ("completed", "resolved"),
    ("suspended", "inactive"),
    ("active", "active"),
];

pub static CLINICAL_STATUS: CodeMap = CodeMap::new("clinical status", LIFECYCLE);

pub static ALLERGY_CLINICAL_STATUS: CodeMap =
    CodeMap::new("allergy clinical status", LIFECYCLE);

pub static PROCEDURE_STATUS: CodeMap = CodeMap::new(
    "procedure status",
    &[
        ("completed", "completed"),
        ("active", "in-progress"),
        ("aborted", "stopped"),
        ("cancelled", "not-done"),
        ("new", "preparation"),
        ("held", "on-hold"),
        ("suspended", "on-hold"),
    ],
);

pub static OBSERVATION_STATUS: CodeMap = CodeMap::new(
    "observation status",
    &[
        ("completed", "final"),
        ("active", "preliminary"),
        ("aborted", "cancelled"),
    ],
);

pub static ADMINISTRATIVE_GENDER: CodeMap = CodeMap::new(
    "administrative gender",
    &[
        ("M", "male"),
        ("F", "female"),
        ("UN", "other"),
        ("UNK", "unknown"),
    ],
);

pub static ALLERGY_CRITICALITY: CodeMap = CodeMap::new(
    "allergy criticality",
    &[
        ("CRITH", "high"),
        ("CRITL", "low"),
        ("CRITU", "unable-to-assess"),
    ],
);

/// Clinical-status lifecycle normalization
pub fn normalize_clinical_status(code: &str) -> Result<&'static str> {
    CLINICAL_STATUS.normalize(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_clinical_status_lifecycle() {
        assert_eq!(normalize_clinical_status("aborted"), Ok("resolved"));
        assert_eq!(normalize_clinical_status("completed"), Ok("resolved"));
        assert_eq!(normalize_clinical_status("suspended"), Ok("inactive"));
        assert_eq!(normalize_clinical_status("active"), Ok("active"));
    }

    #[test]
    fn test_unknown_status_fails_loudly() {
        let err = normalize_clinical_status("bogus").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnrecognizedValue);
        insta::assert_snapshot!(err.to_string(), @"unrecognized clinical status 'bogus'");
    }

    #[test]
    fn test_tables_are_case_sensitive() {
        assert!(normalize_clinical_status("Active").is_err());
        assert_eq!(ADMINISTRATIVE_GENDER.lookup("f"), None);
    }

    #[test]
    fn test_sibling_tables() {
        assert_eq!(PROCEDURE_STATUS.lookup("cancelled"), Some("not-done"));
        assert_eq!(OBSERVATION_STATUS.lookup("completed"), Some("final"));
        assert_eq!(ADMINISTRATIVE_GENDER.lookup("UN"), Some("other"));
        assert_eq!(ALLERGY_CRITICALITY.lookup("CRITL"), Some("low"));
        assert_eq!(ALLERGY_CLINICAL_STATUS.source_codes().count(), 4);
    }
}
