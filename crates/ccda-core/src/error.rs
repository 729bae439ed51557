//! Error types for the conversion engine
//!
//! Two layers exist:
//! - [`ConversionError`]: the four structured, path-annotated decode failures
//!   raised by converters and value decoders. These are either returned
//!   (fail-fast) or appended to the conversion context (accumulate-and-continue).
//! - [`EngineError`]: fatal failures that abort a whole document conversion.

use crate::record::RecordKind;
use crate::source::{SourceError, SourceNode};
use std::fmt;
use thiserror::Error;

/// Structured decode failure raised while converting one source node
///
/// Every variant carries the absolute path of the offending source node and,
/// optionally, the dotted path of the target field the value was destined for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// A value the target record cannot do without is absent
    #[error("required value not found: {what}{}", located(.source_path, .target_path))]
    RequiredValueNotFound {
        what: String,
        source_path: String,
        target_path: Option<String>,
    },

    /// A type discriminator is valid but not acceptable at this position
    #[error(
        "unexpected type '{found}', expected one of [{}]{}",
        .expected.join(", "),
        located(.source_path, .target_path)
    )]
    UnexpectedType {
        found: String,
        expected: Vec<String>,
        source_path: String,
        target_path: Option<String>,
    },

    /// A value falls outside the closed domain it is decoded against
    #[error("unrecognized {domain} '{value}'{}", located(.source_path, .target_path))]
    UnrecognizedValue {
        value: String,
        domain: String,
        source_path: String,
        target_path: Option<String>,
    },

    /// Cardinality or invariant violation of the target profile
    #[error("profile violation: {message}{}", located(.source_path, .target_path))]
    ProfileRelated {
        message: String,
        source_path: String,
        target_path: Option<String>,
    },
}

/// Error kind enumeration for categorizing conversion errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RequiredValueNotFound,
    UnexpectedType,
    UnrecognizedValue,
    ProfileRelated,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::RequiredValueNotFound => "required-value-not-found",
            ErrorKind::UnexpectedType => "unexpected-type",
            ErrorKind::UnrecognizedValue => "unrecognized-value",
            ErrorKind::ProfileRelated => "profile-related",
        };
        f.write_str(name)
    }
}

fn located(source_path: &str, target_path: &Option<String>) -> String {
    let mut out = String::new();
    if !source_path.is_empty() {
        out.push_str(" at ");
        out.push_str(source_path);
    }
    if let Some(target) = target_path {
        out.push_str(" (target ");
        out.push_str(target);
        out.push(')');
    }
    out
}

impl ConversionError {
    /// Get the error kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConversionError::RequiredValueNotFound { .. } => ErrorKind::RequiredValueNotFound,
            ConversionError::UnexpectedType { .. } => ErrorKind::UnexpectedType,
            ConversionError::UnrecognizedValue { .. } => ErrorKind::UnrecognizedValue,
            ConversionError::ProfileRelated { .. } => ErrorKind::ProfileRelated,
        }
    }

    /// Create a required-value error for a value missing under `node`
    pub fn required(what: impl Into<String>, node: SourceNode<'_>) -> Self {
        Self::required_at(what, node.absolute_path())
    }

    pub fn required_at(what: impl Into<String>, source_path: impl Into<String>) -> Self {
        Self::RequiredValueNotFound {
            what: what.into(),
            source_path: source_path.into(),
            target_path: None,
        }
    }

    /// Create an unexpected-type error
    pub fn unexpected_type<S: AsRef<str>>(
        found: impl Into<String>,
        expected: &[S],
        node: SourceNode<'_>,
    ) -> Self {
        Self::UnexpectedType {
            found: found.into(),
            expected: expected.iter().map(|s| s.as_ref().to_string()).collect(),
            source_path: node.absolute_path(),
            target_path: None,
        }
    }

    /// Create an unrecognized-value error for a value read from `node`
    pub fn unrecognized(
        value: impl Into<String>,
        domain: impl Into<String>,
        node: SourceNode<'_>,
    ) -> Self {
        Self::unrecognized_at(value, domain, node.absolute_path())
    }

    pub fn unrecognized_at(
        value: impl Into<String>,
        domain: impl Into<String>,
        source_path: impl Into<String>,
    ) -> Self {
        Self::UnrecognizedValue {
            value: value.into(),
            domain: domain.into(),
            source_path: source_path.into(),
            target_path: None,
        }
    }

    /// Create a profile (cardinality/invariant) error
    pub fn profile(message: impl Into<String>, node: SourceNode<'_>) -> Self {
        Self::ProfileRelated {
            message: message.into(),
            source_path: node.absolute_path(),
            target_path: None,
        }
    }

    /// Attach the dotted path of the target field this value was destined for
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        let slot = match &mut self {
            ConversionError::RequiredValueNotFound { target_path, .. }
            | ConversionError::UnexpectedType { target_path, .. }
            | ConversionError::UnrecognizedValue { target_path, .. }
            | ConversionError::ProfileRelated { target_path, .. } => target_path,
        };
        *slot = Some(target.into());
        self
    }

    /// Absolute path of the source node the error was raised for
    pub fn source_path(&self) -> &str {
        match self {
            ConversionError::RequiredValueNotFound { source_path, .. }
            | ConversionError::UnexpectedType { source_path, .. }
            | ConversionError::UnrecognizedValue { source_path, .. }
            | ConversionError::ProfileRelated { source_path, .. } => source_path,
        }
    }

    /// Dotted target field path, when known
    pub fn target_path(&self) -> Option<&str> {
        match self {
            ConversionError::RequiredValueNotFound { target_path, .. }
            | ConversionError::UnexpectedType { target_path, .. }
            | ConversionError::UnrecognizedValue { target_path, .. }
            | ConversionError::ProfileRelated { target_path, .. } => target_path.as_deref(),
        }
    }
}

/// Every error accumulated while converting one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateError {
    errors: Vec<ConversionError>,
}

impl AggregateError {
    pub fn new(errors: Vec<ConversionError>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[ConversionError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<ConversionError> {
        self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} conversion error(s)", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  - [{}] {}", error.kind(), error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Fatal failure of a whole document conversion
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("primary organization could not be resolved: {0}")]
    PrimaryOrganization(#[source] ConversionError),

    #[error("document has no primary patient under {path}")]
    PrimaryPatientMissing { path: String },

    #[error("primary patient could not be resolved: {0}")]
    PrimaryPatient(#[source] ConversionError),

    #[error("no section converters registered")]
    NoConverters,

    #[error("unsupported converter for record kind '{kind}': {reason}")]
    UnsupportedConverter { kind: RecordKind, reason: String },

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Result type for converter and decoder operations
pub type Result<T> = std::result::Result<T, ConversionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_target_sets_destination() {
        let err = ConversionError::required_at("code", "/ClinicalDocument[1]")
            .with_target("Condition.code");

        assert_eq!(err.kind(), ErrorKind::RequiredValueNotFound);
        assert_eq!(err.source_path(), "/ClinicalDocument[1]");
        assert_eq!(err.target_path(), Some("Condition.code"));
    }

    #[test]
    fn test_display_includes_paths() {
        let err = ConversionError::unrecognized_at("bogus", "clinical status", "/a[1]/b[2]")
            .with_target("Condition.clinicalStatus");

        insta::assert_snapshot!(
            err.to_string(),
            @"unrecognized clinical status 'bogus' at /a[1]/b[2] (target Condition.clinicalStatus)"
        );
    }

    #[test]
    fn test_display_without_source_path() {
        let err = ConversionError::unrecognized_at("bogus", "clinical status", "");
        assert_eq!(err.to_string(), "unrecognized clinical status 'bogus'");
    }

    #[test]
    fn test_aggregate_enumerates_every_error() {
        let aggregate = AggregateError::new(vec![
            ConversionError::required_at("code", "/x[1]"),
            ConversionError::unrecognized_at("ZZ", "null flavor", "/y[1]"),
        ]);

        assert_eq!(aggregate.len(), 2);
        insta::assert_snapshot!(aggregate.to_string(), @r"
        2 conversion error(s)
          - [required-value-not-found] required value not found: code at /x[1]
          - [unrecognized-value] unrecognized null flavor 'ZZ' at /y[1]
        ");
    }
}
