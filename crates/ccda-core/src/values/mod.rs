//! Value normalizer
//!
//! Decodes heterogeneous source encodings into the closed set of target value
//! shapes ([`TypedValue`]): coded concepts, text, quantities, instants and
//! intervals. The typed-value decoder dispatches on an explicit `xsi:type`
//! discriminator and never guesses from structure.

mod coded;
mod systems;
mod temporal;

pub use coded::{
    Coding, CodedConcept, DATA_ABSENT_REASON_URL, NullFlavor, to_code_with_fallback,
    to_coded_concept,
};
pub use systems::{LOINC, NPI, RXNORM, SNOMED_CT, UCUM, canonical_system};
pub use temporal::{
    Effective, Instant, Interval, Precision, to_effective, to_instant, to_interval,
};

use crate::error::{ConversionError, Result};
use crate::record::Identifier;
use crate::source::{SourceNode, XSI_NS};
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;

/// System used for identifiers that only carry a root
pub const URI_SYSTEM: &str = "urn:ietf:rfc:3986";

/// Recognized `xsi:type` discriminators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Cd,
    Ce,
    Cv,
    Co,
    Cs,
    St,
    Ed,
    Pq,
    Int,
    Real,
    Ts,
    IvlTs,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Cd => "CD",
            ValueType::Ce => "CE",
            ValueType::Cv => "CV",
            ValueType::Co => "CO",
            ValueType::Cs => "CS",
            ValueType::St => "ST",
            ValueType::Ed => "ED",
            ValueType::Pq => "PQ",
            ValueType::Int => "INT",
            ValueType::Real => "REAL",
            ValueType::Ts => "TS",
            ValueType::IvlTs => "IVL_TS",
        }
    }

    pub fn is_coded(&self) -> bool {
        matches!(
            self,
            ValueType::Cd | ValueType::Ce | ValueType::Cv | ValueType::Co | ValueType::Cs
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let value_type = match s {
            "CD" => ValueType::Cd,
            "CE" => ValueType::Ce,
            "CV" => ValueType::Cv,
            "CO" => ValueType::Co,
            "CS" => ValueType::Cs,
            "ST" => ValueType::St,
            "ED" => ValueType::Ed,
            "PQ" => ValueType::Pq,
            "INT" => ValueType::Int,
            "REAL" => ValueType::Real,
            "TS" => ValueType::Ts,
            "IVL_TS" => ValueType::IvlTs,
            _ => return Err(()),
        };
        Ok(value_type)
    }
}

/// Decimal with optional UCUM unit
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: Option<String>,
}

impl Quantity {
    pub fn to_fhir(&self) -> Value {
        match &self.unit {
            Some(unit) => json!({
                "value": self.value,
                "unit": unit,
                "system": UCUM,
                "code": unit,
            }),
            None => json!({ "value": self.value }),
        }
    }
}

/// Decoded "value" node
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Coded(CodedConcept),
    Text(String),
    Quantity(Quantity),
    Instant(Instant),
    Interval(Interval),
}

impl TypedValue {
    /// FHIR choice-type field name and value, e.g. `valueQuantity`
    pub fn to_fhir_choice(&self, prefix: &str) -> (String, Value) {
        let (suffix, value) = match self {
            TypedValue::Coded(concept) => ("CodeableConcept", concept.to_fhir()),
            TypedValue::Text(text) => ("String", Value::from(text.clone())),
            TypedValue::Quantity(quantity) => ("Quantity", quantity.to_fhir()),
            TypedValue::Instant(instant) => ("DateTime", Value::from(instant.value.clone())),
            TypedValue::Interval(interval) => ("Period", interval.to_fhir()),
        };
        (format!("{prefix}{suffix}"), value)
    }
}

/// Decode a node by its `xsi:type` discriminator
///
/// Fails with RequiredValueNotFound when the discriminator is absent,
/// UnrecognizedValue when it is unknown and UnexpectedType when it is known
/// but outside `allowed`.
pub fn to_typed_value(node: SourceNode<'_>, allowed: Option<&[ValueType]>) -> Result<TypedValue> {
    let raw = node
        .attribute_ns(Some(XSI_NS), "type")
        .ok_or_else(|| ConversionError::required("xsi:type", node))?;
    let local = raw.rsplit(':').next().unwrap_or(raw);
    let value_type: ValueType = local
        .parse()
        .map_err(|_| ConversionError::unrecognized(raw, "value type", node))?;

    if let Some(allowed) = allowed
        && !allowed.contains(&value_type)
    {
        let expected: Vec<&str> = allowed.iter().map(ValueType::as_str).collect();
        return Err(ConversionError::unexpected_type(raw, expected.as_slice(), node));
    }

    match value_type {
        t if t.is_coded() => to_coded_concept(node).map(TypedValue::Coded),
        ValueType::St | ValueType::Ed => node
            .text()
            .map(|text| TypedValue::Text(text.to_string()))
            .ok_or_else(|| ConversionError::required("text", node)),
        ValueType::Pq | ValueType::Int | ValueType::Real => {
            to_quantity(node).map(TypedValue::Quantity)
        }
        ValueType::Ts => to_instant(node)?
            .map(TypedValue::Instant)
            .ok_or_else(|| ConversionError::required("value", node)),
        _ => match to_effective(node)? {
            Some(Effective::Period(interval)) => Ok(TypedValue::Interval(interval)),
            Some(Effective::Instant(instant)) => Ok(TypedValue::Instant(instant)),
            None => Err(ConversionError::required("low or high", node)),
        },
    }
}

/// Decimal `value` with optional `unit`
pub fn to_quantity(node: SourceNode<'_>) -> Result<Quantity> {
    let raw = node
        .attribute("value")
        .ok_or_else(|| ConversionError::required("value", node))?;
    let value = raw
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ConversionError::unrecognized(raw, "decimal", node))?;
    let unit = node
        .attribute("unit")
        .map(str::trim)
        .filter(|u| !u.is_empty() && *u != "1")
        .map(str::to_string);
    Ok(Quantity { value, unit })
}

/// Business identifier from an `II` node
///
/// `root` + `extension` map to (system, value). A bare `root` becomes a URI
/// value under [`URI_SYSTEM`]. Returns `None` for null-flavored ids.
pub fn to_identifier(node: SourceNode<'_>) -> Option<Identifier> {
    let root = node.attribute("root").map(str::trim).filter(|r| !r.is_empty())?;
    match node.attribute("extension").map(str::trim).filter(|e| !e.is_empty()) {
        Some(extension) => Some(Identifier::new(root_system(root), extension)),
        None => Some(Identifier::new(URI_SYSTEM, root_uri(root))),
    }
}

fn root_system(root: &str) -> String {
    let canonical = canonical_system(root);
    if canonical != root {
        return canonical;
    }
    root_uri(root)
}

fn root_uri(root: &str) -> String {
    if uuid::Uuid::parse_str(root).is_ok() {
        format!("urn:uuid:{}", root.to_lowercase())
    } else {
        format!("urn:oid:{root}")
    }
}
