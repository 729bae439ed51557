use super::shared::{Identity, accumulate, date_time, resolve_identity, single_coding};
use crate::context::ConversionContext;
use crate::error::{ConversionError, Result};
use crate::record::{RecordKind, RecordRef, TargetRecord};
use crate::registry::{ConvertsMany, ConvertsOne, Scope, SectionConverter, convert_each};
use crate::source::{PathExpr, SourceNode};
use crate::status::{ALLERGY_CLINICAL_STATUS, ALLERGY_CRITICALITY};
use crate::values::{to_code_with_fallback, to_coded_concept};
use serde_json::json;
use std::sync::LazyLock;

const CLINICAL_STATUS_SYSTEM: &str =
    "http://terminology.hl7.org/CodeSystem/allergyintolerance-clinical";

static ALLERGY_OBSERVATIONS: LazyLock<PathExpr> = LazyLock::new(|| {
    PathExpr::cda(
        "/ClinicalDocument/component/structuredBody/component/section[code/@code='48765-2']\
         /entry/act/entryRelationship/observation",
    )
    .expect("valid allergy path")
});

static CONCERN_STATUS: LazyLock<PathExpr> =
    LazyLock::new(|| PathExpr::cda("../../statusCode").expect("valid status path"));

static SUBSTANCE: LazyLock<PathExpr> = LazyLock::new(|| {
    PathExpr::cda("participant[@typeCode='CSM']/participantRole/playingEntity/code")
        .expect("valid substance path")
});

static REACTIONS: LazyLock<PathExpr> = LazyLock::new(|| {
    PathExpr::cda(
        "entryRelationship[@typeCode='MFST']/observation\
         [templateId/@root='2.16.840.1.113883.10.20.22.4.9']/value",
    )
    .expect("valid reaction path")
});

static CRITICALITY: LazyLock<PathExpr> = LazyLock::new(|| {
    PathExpr::cda(
        "entryRelationship/observation[templateId/@root='2.16.840.1.113883.10.20.22.4.145']/value",
    )
    .expect("valid criticality path")
});

/// Allergy intolerances from allergy concern acts
///
/// The substance code fails fast. Reaction manifestations come from each
/// reaction value's translation when present, else from its own code.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllergyConverter;

impl AllergyConverter {
    fn reactions(&self, node: SourceNode<'_>, record: &mut TargetRecord, ctx: &mut ConversionContext) {
        for value in REACTIONS.select(node) {
            match to_code_with_fallback(value, false) {
                Some(coding) => record.push(
                    "reaction",
                    json!({ "manifestation": [{ "coding": [coding.to_fhir()] }] }),
                ),
                None => ctx.report(
                    ConversionError::required("reaction manifestation code", value)
                        .with_target("AllergyIntolerance.reaction.manifestation"),
                ),
            }
        }
    }
}

impl ConvertsOne for AllergyConverter {
    fn convert_one(
        &self,
        node: SourceNode<'_>,
        scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Option<RecordRef>> {
        let mut record = match resolve_identity(ctx, RecordKind::AllergyIntolerance, node) {
            Identity::Existing(existing) => return Ok(Some(existing)),
            Identity::New(record) => record,
        };

        let substance = SUBSTANCE.select_one(node).ok_or_else(|| {
            ConversionError::required("allergen code", node).with_target("AllergyIntolerance.code")
        })?;
        let code =
            to_coded_concept(substance).map_err(|e| e.with_target("AllergyIntolerance.code"))?;

        if let Some(status) = CONCERN_STATUS.select_one(node)
            && let Some(raw) = status.attribute("code")
            && let Some(clinical) = accumulate(
                ctx,
                ALLERGY_CLINICAL_STATUS
                    .normalize_at(raw, status)
                    .map_err(|e| e.with_target("AllergyIntolerance.clinicalStatus")),
            )
        {
            record.set("clinicalStatus", single_coding(CLINICAL_STATUS_SYSTEM, clinical));
        }

        record.set("code", code.to_fhir());
        if let Some(patient) = scope.patient_reference() {
            record.set("patient", patient);
        }

        let low = node.child("effectiveTime").and_then(|e| e.child("low"));
        if let Some(onset) = date_time(ctx, low, "AllergyIntolerance.onsetDateTime") {
            record.set("onsetDateTime", onset);
        }

        if let Some(value) = CRITICALITY.select_one(node)
            && let Some(raw) = value.attribute("code")
            && let Some(criticality) = accumulate(
                ctx,
                ALLERGY_CRITICALITY
                    .normalize_at(raw, value)
                    .map_err(|e| e.with_target("AllergyIntolerance.criticality")),
            )
        {
            record.set("criticality", criticality);
        }

        self.reactions(node, &mut record, ctx);

        Ok(Some(ctx.commit(record).into_ref()))
    }
}

impl ConvertsMany for AllergyConverter {
    fn convert_many(
        &self,
        nodes: &[SourceNode<'_>],
        scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Vec<RecordRef>> {
        convert_each(self, nodes, scope, ctx)
    }
}

impl SectionConverter for AllergyConverter {
    fn kind(&self) -> RecordKind {
        RecordKind::AllergyIntolerance
    }

    fn convert_section(
        &self,
        document: SourceNode<'_>,
        scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Vec<RecordRef>> {
        self.convert_many(&ALLERGY_OBSERVATIONS.select(document), scope, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdStrategy;
    use crate::source::SourceTree;

    fn allergy(reaction_value: &str) -> SourceTree {
        SourceTree::parse_str(&format!(
            r#"<ClinicalDocument xmlns="urn:hl7-org:v3" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <component><structuredBody><component><section>
    <code code="48765-2"/>
    <entry><act>
      <statusCode code="active"/>
      <entryRelationship typeCode="SUBJ"><observation>
        <id root="4adc1020-7b14-11db-9fe1-0800200c9a66"/>
        <effectiveTime><low value="20070501"/></effectiveTime>
        <participant typeCode="CSM"><participantRole><playingEntity>
          <code code="70618" codeSystem="2.16.840.1.113883.6.88" displayName="Penicillin"/>
        </playingEntity></participantRole></participant>
        <entryRelationship typeCode="MFST" inversionInd="true"><observation>
          <templateId root="2.16.840.1.113883.10.20.22.4.9"/>
          {reaction_value}
        </observation></entryRelationship>
        <entryRelationship typeCode="SUBJ"><observation>
          <templateId root="2.16.840.1.113883.10.20.22.4.145"/>
          <value xsi:type="CD" code="CRITH"/>
        </observation></entryRelationship>
      </observation></entryRelationship>
    </act></entry>
  </section></component></structuredBody></component>
</ClinicalDocument>"#
        ))
        .unwrap()
    }

    fn convert(tree: &SourceTree) -> (serde_json::Value, usize) {
        let mut ctx = ConversionContext::new(IdStrategy::Sequential);
        let produced = AllergyConverter
            .convert_section(tree.root(), &Scope::default(), &mut ctx)
            .unwrap();
        let resource = ctx.record(&produced[0]).unwrap().to_resource();
        (resource, ctx.error_count())
    }

    #[test]
    fn test_allergy_fields() {
        let tree = allergy(r#"<value xsi:type="CD" code="247472004" codeSystem="2.16.840.1.113883.6.96"/>"#);
        let (resource, errors) = convert(&tree);

        assert_eq!(resource["clinicalStatus"]["coding"][0]["code"], json!("active"));
        assert_eq!(resource["code"]["coding"][0]["display"], json!("Penicillin"));
        assert_eq!(resource["criticality"], json!("high"));
        assert_eq!(resource["onsetDateTime"], json!("2007-05-01"));
        assert_eq!(errors, 0);
    }

    #[test]
    fn test_manifestation_from_translation() {
        let tree = allergy(
            r#"<value xsi:type="CD" nullFlavor="OTH"><translation code="422587007" codeSystem="2.16.840.1.113883.6.96"/></value>"#,
        );
        let (resource, errors) = convert(&tree);

        assert_eq!(
            resource["reaction"][0]["manifestation"][0]["coding"][0]["code"],
            json!("422587007")
        );
        assert_eq!(errors, 0);
    }

    #[test]
    fn test_manifestation_without_translation() {
        let tree = allergy(r#"<value xsi:type="CD" code="247472004" codeSystem="2.16.840.1.113883.6.96"/>"#);
        let (resource, _) = convert(&tree);

        assert_eq!(
            resource["reaction"][0]["manifestation"][0]["coding"][0]["code"],
            json!("247472004")
        );
    }

    #[test]
    fn test_manifestation_without_any_code_is_accumulated() {
        let tree = allergy(r#"<value xsi:type="CD" nullFlavor="UNK"/>"#);
        let (resource, errors) = convert(&tree);

        assert!(resource.get("reaction").is_none());
        assert_eq!(errors, 1);
    }
}
