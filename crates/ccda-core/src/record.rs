//! Target record model
//!
//! The engine only understands a record's kind, its correlation id and its
//! business identifiers. Clinical fields live in an opaque JSON payload owned
//! by the converter that produced the record.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Closed set of record kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordKind {
    Resource,
    DomainResource,
    Organization,
    Patient,
    Practitioner,
    Location,
    Condition,
    AllergyIntolerance,
    Procedure,
    Observation,
}

impl RecordKind {
    pub const CONCRETE: [RecordKind; 8] = [
        RecordKind::Organization,
        RecordKind::Patient,
        RecordKind::Practitioner,
        RecordKind::Location,
        RecordKind::Condition,
        RecordKind::AllergyIntolerance,
        RecordKind::Procedure,
        RecordKind::Observation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Resource => "Resource",
            RecordKind::DomainResource => "DomainResource",
            RecordKind::Organization => "Organization",
            RecordKind::Patient => "Patient",
            RecordKind::Practitioner => "Practitioner",
            RecordKind::Location => "Location",
            RecordKind::Condition => "Condition",
            RecordKind::AllergyIntolerance => "AllergyIntolerance",
            RecordKind::Procedure => "Procedure",
            RecordKind::Observation => "Observation",
        }
    }

    /// Abstract kinds can never be produced by a converter
    pub fn is_abstract(&self) -> bool {
        matches!(self, RecordKind::Resource | RecordKind::DomainResource)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordKind::CONCRETE
            .iter()
            .chain(&[RecordKind::Resource, RecordKind::DomainResource])
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown record kind '{s}'"))
    }
}

/// Business identifier: (system, value)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub system: String,
    pub value: String,
}

impl Identifier {
    pub fn new(system: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            value: value.into(),
        }
    }
}

/// Lightweight handle to a record: kind plus correlation id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordRef {
    pub kind: RecordKind,
    pub id: String,
}

impl RecordRef {
    /// Cross-reference string, e.g. `Organization/7`
    pub fn reference(&self) -> String {
        format!("{}/{}", self.kind, self.id)
    }

    /// `{"reference": "Kind/id"}` object for embedding in payloads
    pub fn to_reference_value(&self) -> Value {
        serde_json::json!({ "reference": self.reference() })
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// One normalized output entity
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRecord {
    kind: RecordKind,
    id: String,
    identifiers: Vec<Identifier>,
    payload: Map<String, Value>,
}

impl TargetRecord {
    pub fn new(kind: RecordKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            identifiers: Vec::new(),
            payload: Map::new(),
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn record_ref(&self) -> RecordRef {
        RecordRef {
            kind: self.kind,
            id: self.id.clone(),
        }
    }

    pub fn reference(&self) -> String {
        self.record_ref().reference()
    }

    pub fn identifiers(&self) -> &[Identifier] {
        &self.identifiers
    }

    /// Add a business identifier unless an equal one is already present
    pub fn add_identifier(&mut self, identifier: Identifier) {
        if !self.identifiers.contains(&identifier) {
            self.identifiers.push(identifier);
        }
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    /// Set a payload field, replacing any previous value
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.payload.insert(field.into(), value.into());
    }

    /// Append to an array-valued payload field, creating it when absent
    pub fn push(&mut self, field: &str, value: impl Into<Value>) {
        let slot = self
            .payload
            .entry(field.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match slot {
            Value::Array(items) => items.push(value.into()),
            other => {
                let previous = other.take();
                *other = Value::Array(vec![previous, value.into()]);
            }
        }
    }

    /// Render as a FHIR-shaped JSON object
    pub fn to_resource(&self) -> Value {
        let mut resource = Map::new();
        resource.insert("resourceType".into(), Value::from(self.kind.as_str()));
        resource.insert("id".into(), Value::from(self.id.clone()));
        if !self.identifiers.is_empty() {
            let identifiers = self
                .identifiers
                .iter()
                .map(|i| serde_json::json!({ "system": i.system, "value": i.value }))
                .collect();
            resource.insert("identifier".into(), Value::Array(identifiers));
        }
        for (field, value) in &self.payload {
            resource.insert(field.clone(), value.clone());
        }
        Value::Object(resource)
    }
}

impl Serialize for TargetRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_resource().serialize(serializer)
    }
}

/// Insertion-ordered output of one document conversion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bundle {
    records: Vec<TargetRecord>,
}

impl Bundle {
    pub fn new(records: Vec<TargetRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[TargetRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetRecord> {
        self.records.iter()
    }

    /// Records of one kind, in output order
    pub fn of_kind(&self, kind: RecordKind) -> impl Iterator<Item = &TargetRecord> {
        self.records.iter().filter(move |r| r.kind() == kind)
    }

    /// Resolve a `Kind/id` cross-reference
    pub fn resolve(&self, reference: &str) -> Option<&TargetRecord> {
        self.records.iter().find(|r| r.reference() == reference)
    }

    /// Collection bundle JSON
    pub fn to_json(&self) -> Value {
        let entries: Vec<Value> = self
            .records
            .iter()
            .map(|record| serde_json::json!({ "resource": record.to_resource() }))
            .collect();
        serde_json::json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": entries,
        })
    }
}
