//! Coded concepts and null flavors

use super::systems::canonical_system;
use crate::error::{ConversionError, Result};
use crate::source::SourceNode;
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;

pub const DATA_ABSENT_REASON_URL: &str =
    "http://hl7.org/fhir/StructureDefinition/data-absent-reason";

/// One (system, code, display) triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Coding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    /// Coding read from `code`/`codeSystem`/`displayName`, if `code` is present
    pub fn from_node(node: SourceNode<'_>) -> Option<Self> {
        let code = node.attribute("code").filter(|c| !c.trim().is_empty())?;
        Some(Self {
            system: node
                .attribute("codeSystem")
                .filter(|s| !s.is_empty())
                .map(canonical_system),
            code: code.trim().to_string(),
            display: node.attribute("displayName").map(str::to_string),
        })
    }

    pub fn to_fhir(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// The fourteen recognized null-flavor tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullFlavor {
    NoInformation,
    Invalid,
    Derived,
    Other,
    NegativeInfinity,
    PositiveInfinity,
    Unencoded,
    Masked,
    NotApplicable,
    Unknown,
    AskedUnknown,
    TemporarilyUnavailable,
    NotAsked,
    NotPresent,
}

impl NullFlavor {
    pub fn from_code(code: &str) -> Option<Self> {
        let flavor = match code {
            "NI" => NullFlavor::NoInformation,
            "INV" => NullFlavor::Invalid,
            "DER" => NullFlavor::Derived,
            "OTH" => NullFlavor::Other,
            "NINF" => NullFlavor::NegativeInfinity,
            "PINF" => NullFlavor::PositiveInfinity,
            "UNC" => NullFlavor::Unencoded,
            "MSK" => NullFlavor::Masked,
            "NA" => NullFlavor::NotApplicable,
            "UNK" => NullFlavor::Unknown,
            "ASKU" => NullFlavor::AskedUnknown,
            "NAV" => NullFlavor::TemporarilyUnavailable,
            "NASK" => NullFlavor::NotAsked,
            "NP" => NullFlavor::NotPresent,
            _ => return None,
        };
        Some(flavor)
    }

    pub fn code(&self) -> &'static str {
        match self {
            NullFlavor::NoInformation => "NI",
            NullFlavor::Invalid => "INV",
            NullFlavor::Derived => "DER",
            NullFlavor::Other => "OTH",
            NullFlavor::NegativeInfinity => "NINF",
            NullFlavor::PositiveInfinity => "PINF",
            NullFlavor::Unencoded => "UNC",
            NullFlavor::Masked => "MSK",
            NullFlavor::NotApplicable => "NA",
            NullFlavor::Unknown => "UNK",
            NullFlavor::AskedUnknown => "ASKU",
            NullFlavor::TemporarilyUnavailable => "NAV",
            NullFlavor::NotAsked => "NASK",
            NullFlavor::NotPresent => "NP",
        }
    }

    /// Matching data-absent-reason code
    pub fn data_absent_reason(&self) -> &'static str {
        match self {
            NullFlavor::NoInformation | NullFlavor::Unknown | NullFlavor::NotPresent => "unknown",
            NullFlavor::Invalid => "error",
            NullFlavor::Derived | NullFlavor::Other => "unsupported",
            NullFlavor::NegativeInfinity => "negative-infinity",
            NullFlavor::PositiveInfinity => "positive-infinity",
            NullFlavor::Unencoded => "as-text",
            NullFlavor::Masked => "masked",
            NullFlavor::NotApplicable => "not-applicable",
            NullFlavor::AskedUnknown => "asked-unknown",
            NullFlavor::TemporarilyUnavailable => "temp-unknown",
            NullFlavor::NotAsked => "not-asked",
        }
    }
}

impl fmt::Display for NullFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Normalized coded concept: codings, optional text, optional absence flag
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodedConcept {
    pub codings: Vec<Coding>,
    pub text: Option<String>,
    pub absent_reason: Option<NullFlavor>,
}

impl CodedConcept {
    /// First coding's code, the one status tables look at
    pub fn primary_code(&self) -> Option<&str> {
        self.codings.first().map(|c| c.code.as_str())
    }

    pub fn to_fhir(&self) -> Value {
        let mut concept = serde_json::Map::new();
        if let Some(flavor) = self.absent_reason {
            concept.insert(
                "extension".into(),
                json!([{
                    "url": DATA_ABSENT_REASON_URL,
                    "valueCode": flavor.data_absent_reason(),
                }]),
            );
        }
        if !self.codings.is_empty() {
            concept.insert(
                "coding".into(),
                Value::Array(self.codings.iter().map(Coding::to_fhir).collect()),
            );
        }
        if let Some(text) = &self.text {
            concept.insert("text".into(), Value::from(text.clone()));
        }
        Value::Object(concept)
    }
}

/// Decode a CD-family node into a [`CodedConcept`]
///
/// Each `translation` child contributes an extra coding. Without a `code`
/// the node must carry a recognized `nullFlavor`.
pub fn to_coded_concept(node: SourceNode<'_>) -> Result<CodedConcept> {
    let mut concept = CodedConcept {
        text: original_text(node),
        ..CodedConcept::default()
    };

    match Coding::from_node(node) {
        Some(coding) => concept.codings.push(coding),
        None => {
            let flavor = node
                .attribute("nullFlavor")
                .ok_or_else(|| ConversionError::required("code", node))?;
            let flavor = NullFlavor::from_code(flavor)
                .ok_or_else(|| ConversionError::unrecognized(flavor, "null flavor", node))?;
            concept.absent_reason = Some(flavor);
        }
    }

    concept
        .codings
        .extend(node.children_named("translation").filter_map(Coding::from_node));

    Ok(concept)
}

/// Translation coding if one exists, otherwise the node's own coding
///
/// With `translation_only` the node's own code is never used.
pub fn to_code_with_fallback(node: SourceNode<'_>, translation_only: bool) -> Option<Coding> {
    let translated = node
        .children_named("translation")
        .find_map(Coding::from_node);
    if translated.is_some() || translation_only {
        return translated;
    }
    Coding::from_node(node)
}

fn original_text(node: SourceNode<'_>) -> Option<String> {
    node.child("originalText")
        .and_then(|text| text.text())
        .map(str::to_string)
}
