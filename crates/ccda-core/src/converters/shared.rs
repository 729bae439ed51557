//! Steps shared by several converters: identity handling, profile tagging,
//! and the common demographic data types

use crate::context::ConversionContext;
use crate::error::{ConversionError, Result};
use crate::record::{Identifier, RecordKind, RecordRef, TargetRecord};
use crate::source::SourceNode;
use crate::values::{to_identifier, to_instant};
use serde_json::{Map, Value, json};
use tracing::debug;

/// Address lines accepted per address
pub const MAX_ADDRESS_LINES: usize = 4;

/// Result of probing the identity cache before building a record
pub enum Identity {
    /// A record with one of the node's identifiers was produced earlier
    Existing(RecordRef),
    /// A fresh record carrying the node's identifiers and profile tag
    New(TargetRecord),
}

/// Every `id` child of `node` that yields an identifier
pub fn identifiers(node: SourceNode<'_>) -> Vec<Identifier> {
    node.children_named("id").filter_map(to_identifier).collect()
}

/// Probe-and-substitute: reuse a cached record or start a new one
pub fn resolve_identity(
    ctx: &mut ConversionContext,
    kind: RecordKind,
    node: SourceNode<'_>,
) -> Identity {
    let ids = identifiers(node);
    if let Some(existing) = ctx.find_existing(kind, &ids) {
        debug!("Reusing {} for {}", existing, node.absolute_path());
        ctx.link(&existing, &ids);
        return Identity::Existing(existing);
    }

    let mut record = ctx.begin(kind);
    for id in ids {
        record.add_identifier(id);
    }
    tag_profile(&mut record);
    Identity::New(record)
}

pub fn profile_url(kind: RecordKind) -> Option<&'static str> {
    let url = match kind {
        RecordKind::Organization => "http://hl7.org/fhir/us/core/StructureDefinition/us-core-organization",
        RecordKind::Patient => "http://hl7.org/fhir/us/core/StructureDefinition/us-core-patient",
        RecordKind::Practitioner => "http://hl7.org/fhir/us/core/StructureDefinition/us-core-practitioner",
        RecordKind::Location => "http://hl7.org/fhir/us/core/StructureDefinition/us-core-location",
        RecordKind::Condition => {
            "http://hl7.org/fhir/us/core/StructureDefinition/us-core-condition-problems-health-concerns"
        }
        RecordKind::AllergyIntolerance => {
            "http://hl7.org/fhir/us/core/StructureDefinition/us-core-allergyintolerance"
        }
        RecordKind::Procedure => "http://hl7.org/fhir/us/core/StructureDefinition/us-core-procedure",
        RecordKind::Observation => {
            "http://hl7.org/fhir/us/core/StructureDefinition/us-core-observation-lab"
        }
        RecordKind::Resource | RecordKind::DomainResource => return None,
    };
    Some(url)
}

pub fn tag_profile(record: &mut TargetRecord) {
    if let Some(url) = profile_url(record.kind()) {
        record.set("meta", json!({ "profile": [url] }));
    }
}

/// Keep the value on success, accumulate the error otherwise
pub fn accumulate<T>(ctx: &mut ConversionContext, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            ctx.report(error);
            None
        }
    }
}

/// Concept JSON with a single coding
pub fn single_coding(system: &str, code: &str) -> Value {
    json!({ "coding": [{ "system": system, "code": code }] })
}

/// `addr` element to an Address; more than four lines is a profile violation
pub fn address(node: SourceNode<'_>) -> Result<Value> {
    let lines: Vec<&str> = node
        .children_named("streetAddressLine")
        .filter_map(|line| line.text())
        .collect();
    if lines.len() > MAX_ADDRESS_LINES {
        return Err(ConversionError::profile(
            format!(
                "address has {} lines, at most {MAX_ADDRESS_LINES} are allowed",
                lines.len()
            ),
            node,
        )
        .with_target("address.line"));
    }

    let mut address = Map::new();
    if let Some(use_code) = node.attribute("use").and_then(address_use) {
        address.insert("use".into(), Value::from(use_code));
    }
    if !lines.is_empty() {
        address.insert("line".into(), json!(lines));
    }
    for (source, target) in [
        ("city", "city"),
        ("state", "state"),
        ("postalCode", "postalCode"),
        ("country", "country"),
    ] {
        if let Some(text) = node.child(source).and_then(|n| n.text()) {
            address.insert(target.into(), Value::from(text));
        }
    }
    Ok(Value::Object(address))
}

fn address_use(code: &str) -> Option<&'static str> {
    match code {
        "H" | "HP" | "HV" => Some("home"),
        "WP" | "DIR" | "PUB" => Some("work"),
        "TMP" => Some("temp"),
        "OLD" | "BAD" => Some("old"),
        _ => None,
    }
}

/// `name` element (PN/EN) to a HumanName-shaped object
pub fn human_name(node: SourceNode<'_>) -> Value {
    let mut name = Map::new();
    match node.attribute("use") {
        Some("L") => {
            name.insert("use".into(), Value::from("official"));
        }
        Some("P") => {
            name.insert("use".into(), Value::from("nickname"));
        }
        _ => {}
    }

    let texts = |part: &'static str| -> Vec<&str> {
        node.children_named(part).filter_map(|n| n.text()).collect()
    };
    if let Some(family) = texts("family").first() {
        name.insert("family".into(), Value::from(*family));
    }
    for (source, target) in [("given", "given"), ("prefix", "prefix"), ("suffix", "suffix")] {
        let parts = texts(source);
        if !parts.is_empty() {
            name.insert(target.into(), json!(parts));
        }
    }
    if name.is_empty()
        && let Some(text) = node.text()
    {
        name.insert("text".into(), Value::from(text));
    }
    Value::Object(name)
}

/// `telecom` element to a ContactPoint, when it carries a value
pub fn telecom(node: SourceNode<'_>) -> Option<Value> {
    let raw = node.attribute("value")?.trim();
    let (system, value) = if let Some(rest) = raw.strip_prefix("tel:") {
        ("phone", rest)
    } else if let Some(rest) = raw.strip_prefix("mailto:") {
        ("email", rest)
    } else if let Some(rest) = raw.strip_prefix("fax:") {
        ("fax", rest)
    } else if raw.starts_with("http") {
        ("url", raw)
    } else {
        ("other", raw)
    };

    let mut contact = json!({ "system": system, "value": value });
    let use_code = match node.attribute("use") {
        Some("HP" | "H") => Some("home"),
        Some("WP") => Some("work"),
        Some("MC") => Some("mobile"),
        Some("TMP") => Some("temp"),
        _ => None,
    };
    if let Some(use_code) = use_code {
        contact["use"] = Value::from(use_code);
    }
    Some(contact)
}

/// Copy names, addresses and telecoms found under `holder` into `record`
///
/// Address errors are accumulated so the rest of the record survives.
pub fn demographics(
    ctx: &mut ConversionContext,
    record: &mut TargetRecord,
    person: Option<SourceNode<'_>>,
    holder: SourceNode<'_>,
) {
    if let Some(person) = person {
        for name in person.children_named("name") {
            record.push("name", human_name(name));
        }
    }
    for addr in holder.children_named("addr") {
        if let Some(address) = accumulate(ctx, address(addr)) {
            record.push("address", address);
        }
    }
    for contact in holder.children_named("telecom").filter_map(telecom) {
        record.push("telecom", contact);
    }
}

/// Date or dateTime string from a TS child, errors accumulated
pub fn date_time(
    ctx: &mut ConversionContext,
    node: Option<SourceNode<'_>>,
    target: &str,
) -> Option<String> {
    let node = node?;
    let instant = accumulate(
        ctx,
        to_instant(node).map_err(|e| e.with_target(target)),
    )??;
    Some(instant.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdStrategy;
    use crate::error::ErrorKind;
    use crate::source::SourceTree;

    fn parse(fragment: &str) -> SourceTree {
        SourceTree::parse_str(&format!(r#"<root xmlns="urn:hl7-org:v3">{fragment}</root>"#))
            .unwrap()
    }

    #[test]
    fn test_address_with_four_lines() {
        let tree = parse(
            r#"<addr use="HP">
                 <streetAddressLine>1</streetAddressLine><streetAddressLine>2</streetAddressLine>
                 <streetAddressLine>3</streetAddressLine><streetAddressLine>4</streetAddressLine>
                 <city>Boston</city><state>MA</state><postalCode>02101</postalCode>
               </addr>"#,
        );
        let value = address(tree.root().child("addr").unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "use": "home",
                "line": ["1", "2", "3", "4"],
                "city": "Boston",
                "state": "MA",
                "postalCode": "02101",
            })
        );
    }

    #[test]
    fn test_address_with_five_lines_is_profile_error() {
        let tree = parse(
            r#"<addr>
                 <streetAddressLine>1</streetAddressLine><streetAddressLine>2</streetAddressLine>
                 <streetAddressLine>3</streetAddressLine><streetAddressLine>4</streetAddressLine>
                 <streetAddressLine>5</streetAddressLine>
               </addr>"#,
        );
        let err = address(tree.root().child("addr").unwrap()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProfileRelated);
        assert_eq!(err.target_path(), Some("address.line"));
    }

    #[test]
    fn test_human_name_parts() {
        let tree = parse(
            r#"<name use="L"><given>Ada</given><given>M</given><family>Lovelace</family></name>"#,
        );
        assert_eq!(
            human_name(tree.root().child("name").unwrap()),
            json!({ "use": "official", "family": "Lovelace", "given": ["Ada", "M"] })
        );
    }

    #[test]
    fn test_telecom_systems() {
        let tree = parse(
            r#"<telecom value="tel:+1-555-0100" use="HP"/><telecom value="mailto:a@b.org"/><telecom nullFlavor="UNK"/>"#,
        );
        let contacts: Vec<_> = tree.root().children().filter_map(telecom).collect();

        assert_eq!(
            contacts,
            vec![
                json!({ "system": "phone", "value": "+1-555-0100", "use": "home" }),
                json!({ "system": "email", "value": "a@b.org" }),
            ]
        );
    }

    #[test]
    fn test_resolve_identity_substitutes_cached_record() {
        let tree = parse(r#"<org><id root="1.2.3" extension="X"/></org><org><id root="1.2.3" extension="X"/></org>"#);
        let mut ctx = ConversionContext::new(IdStrategy::Sequential);
        let orgs: Vec<_> = tree.root().children().collect();

        let Identity::New(record) = resolve_identity(&mut ctx, RecordKind::Organization, orgs[0]) else {
            panic!("first occurrence must be new");
        };
        let first = ctx.commit(record).into_ref();

        match resolve_identity(&mut ctx, RecordKind::Organization, orgs[1]) {
            Identity::Existing(existing) => assert_eq!(existing, first),
            Identity::New(_) => panic!("second occurrence must reuse the first"),
        }
    }
}
