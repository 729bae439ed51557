use super::shared::{Identity, accumulate, resolve_identity};
use crate::context::ConversionContext;
use crate::error::{ConversionError, Result};
use crate::record::{RecordKind, RecordRef, TargetRecord};
use crate::registry::{ConvertsMany, ConvertsOne, Scope, SectionConverter, convert_each};
use crate::source::{PathExpr, SourceNode};
use crate::status::OBSERVATION_STATUS;
use crate::values::{Effective, ValueType, to_coded_concept, to_effective, to_quantity, to_typed_value};
use serde_json::{Map, Value, json};
use std::sync::LazyLock;

const CATEGORY_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/observation-category";

/// Value types accepted for result observations
pub const RESULT_VALUE_TYPES: &[ValueType] = &[
    ValueType::Pq,
    ValueType::Int,
    ValueType::Real,
    ValueType::Cd,
    ValueType::Ce,
    ValueType::Cv,
    ValueType::Co,
    ValueType::St,
];

static RESULT_OBSERVATIONS: LazyLock<PathExpr> = LazyLock::new(|| {
    PathExpr::cda(
        "/ClinicalDocument/component/structuredBody/component/section[code/@code='30954-2']\
         /entry/organizer/component/observation",
    )
    .expect("valid result path")
});

static REFERENCE_RANGE: LazyLock<PathExpr> = LazyLock::new(|| {
    PathExpr::cda("referenceRange/observationRange/value").expect("valid reference range path")
});

/// Laboratory result observations from result organizers
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservationConverter;

impl ObservationConverter {
    fn reference_range(&self, node: SourceNode<'_>, record: &mut TargetRecord, ctx: &mut ConversionContext) {
        for range in REFERENCE_RANGE.select(node) {
            let mut bounds = Map::new();
            for bound in ["low", "high"] {
                if let Some(child) = range.child(bound)
                    && child.attribute("value").is_some()
                    && let Some(quantity) = accumulate(
                        ctx,
                        to_quantity(child).map_err(|e| e.with_target("Observation.referenceRange")),
                    )
                {
                    bounds.insert(bound.into(), quantity.to_fhir());
                }
            }
            if !bounds.is_empty() {
                record.push("referenceRange", Value::Object(bounds));
            }
        }
    }
}

impl ConvertsOne for ObservationConverter {
    fn convert_one(
        &self,
        node: SourceNode<'_>,
        scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Option<RecordRef>> {
        let mut record = match resolve_identity(ctx, RecordKind::Observation, node) {
            Identity::Existing(existing) => return Ok(Some(existing)),
            Identity::New(record) => record,
        };

        let code_node = node
            .child("code")
            .ok_or_else(|| ConversionError::required("code", node).with_target("Observation.code"))?;
        let code = to_coded_concept(code_node).map_err(|e| e.with_target("Observation.code"))?;

        if let Some(status) = node.child("statusCode")
            && let Some(raw) = status.attribute("code")
            && let Some(mapped) = accumulate(
                ctx,
                OBSERVATION_STATUS
                    .normalize_at(raw, status)
                    .map_err(|e| e.with_target("Observation.status")),
            )
        {
            record.set("status", mapped);
        }

        record.push(
            "category",
            json!({ "coding": [{ "system": CATEGORY_SYSTEM, "code": "laboratory" }] }),
        );
        record.set("code", code.to_fhir());
        if let Some(subject) = scope.patient_reference() {
            record.set("subject", subject);
        }

        if let Some(effective) = node.child("effectiveTime") {
            let result =
                to_effective(effective).map_err(|e| e.with_target("Observation.effective[x]"));
            match accumulate(ctx, result).flatten() {
                Some(Effective::Period(period)) => record.set("effectivePeriod", period.to_fhir()),
                Some(Effective::Instant(instant)) => record.set("effectiveDateTime", instant.value),
                None => {}
            }
        }

        if let Some(value) = node.child("value") {
            let result = to_typed_value(value, Some(RESULT_VALUE_TYPES))
                .map_err(|e| e.with_target("Observation.value[x]"));
            if let Some(typed) = accumulate(ctx, result) {
                let (field, json) = typed.to_fhir_choice("value");
                record.set(field, json);
            }
        }

        for interpretation in node.children_named("interpretationCode") {
            let result = to_coded_concept(interpretation)
                .map_err(|e| e.with_target("Observation.interpretation"));
            if let Some(concept) = accumulate(ctx, result) {
                record.push("interpretation", concept.to_fhir());
            }
        }

        self.reference_range(node, &mut record, ctx);

        Ok(Some(ctx.commit(record).into_ref()))
    }
}

impl ConvertsMany for ObservationConverter {
    fn convert_many(
        &self,
        nodes: &[SourceNode<'_>],
        scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Vec<RecordRef>> {
        convert_each(self, nodes, scope, ctx)
    }
}

impl SectionConverter for ObservationConverter {
    fn kind(&self) -> RecordKind {
        RecordKind::Observation
    }

    fn convert_section(
        &self,
        document: SourceNode<'_>,
        scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Vec<RecordRef>> {
        self.convert_many(&RESULT_OBSERVATIONS.select(document), scope, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdStrategy;
    use crate::error::ErrorKind;
    use crate::source::SourceTree;

    fn results(value: &str) -> SourceTree {
        SourceTree::parse_str(&format!(
            r#"<ClinicalDocument xmlns="urn:hl7-org:v3" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <component><structuredBody><component><section>
    <code code="30954-2"/>
    <entry><organizer classCode="BATTERY" moodCode="EVN"><component><observation>
      <id root="107c2dc0-67a5-11db-bd13-0800200c9a66"/>
      <code code="30313-1" codeSystem="2.16.840.1.113883.6.1" displayName="HGB"/>
      <statusCode code="completed"/>
      <effectiveTime value="200003231430"/>
      {value}
      <interpretationCode code="N" codeSystem="2.16.840.1.113883.5.83"/>
      <referenceRange><observationRange>
        <value xsi:type="IVL_PQ"><low value="13.2" unit="g/dL"/><high value="16.6" unit="g/dL"/></value>
      </observationRange></referenceRange>
    </observation></component></organizer></entry>
  </section></component></structuredBody></component>
</ClinicalDocument>"#
        ))
        .unwrap()
    }

    #[test]
    fn test_quantity_result() {
        let tree = results(r#"<value xsi:type="PQ" value="13.2" unit="g/dL"/>"#);
        let mut ctx = ConversionContext::new(IdStrategy::Sequential);

        let produced = ObservationConverter
            .convert_section(tree.root(), &Scope::default(), &mut ctx)
            .unwrap();
        let resource = ctx.record(&produced[0]).unwrap().to_resource();

        assert_eq!(resource["status"], json!("final"));
        assert_eq!(resource["code"]["coding"][0]["system"], json!("http://loinc.org"));
        assert_eq!(resource["effectiveDateTime"], json!("2000-03-23T14:30:00"));
        assert_eq!(resource["valueQuantity"]["value"], json!(13.2));
        assert_eq!(resource["valueQuantity"]["unit"], json!("g/dL"));
        assert_eq!(resource["referenceRange"][0]["high"]["value"], json!(16.6));
        assert_eq!(ctx.error_count(), 0);
    }

    #[test]
    fn test_disallowed_value_type_is_accumulated() {
        let tree = results(r#"<value xsi:type="TS" value="20200101"/>"#);
        let mut ctx = ConversionContext::new(IdStrategy::Sequential);

        let produced = ObservationConverter
            .convert_section(tree.root(), &Scope::default(), &mut ctx)
            .unwrap();
        assert_eq!(produced.len(), 1);

        let (_, errors) = ctx.finish();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ErrorKind::UnexpectedType);
        assert_eq!(errors[0].target_path(), Some("Observation.value[x]"));
    }
}
