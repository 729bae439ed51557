use super::shared::{Identity, accumulate, date_time, resolve_identity, single_coding};
use crate::context::ConversionContext;
use crate::error::{ConversionError, Result};
use crate::record::{RecordKind, RecordRef};
use crate::registry::{ConvertsMany, ConvertsOne, Scope, SectionConverter, convert_each};
use crate::source::{PathExpr, SourceNode};
use crate::status::CLINICAL_STATUS;
use crate::values::to_coded_concept;
use serde_json::json;
use std::sync::LazyLock;

const CLINICAL_STATUS_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/condition-clinical";
const CATEGORY_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/condition-category";

static PROBLEM_OBSERVATIONS: LazyLock<PathExpr> = LazyLock::new(|| {
    PathExpr::cda(
        "/ClinicalDocument/component/structuredBody/component/section[code/@code='11450-4']\
         /entry/act/entryRelationship/observation",
    )
    .expect("valid problem path")
});

static CONCERN_STATUS: LazyLock<PathExpr> =
    LazyLock::new(|| PathExpr::cda("../../statusCode").expect("valid status path"));

/// Conditions from problem concern acts
///
/// The problem code is required and fails fast; every other field
/// accumulates its errors and is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionConverter;

impl ConvertsOne for ConditionConverter {
    fn convert_one(
        &self,
        node: SourceNode<'_>,
        scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Option<RecordRef>> {
        let mut record = match resolve_identity(ctx, RecordKind::Condition, node) {
            Identity::Existing(existing) => return Ok(Some(existing)),
            Identity::New(record) => record,
        };

        let value = node
            .child("value")
            .ok_or_else(|| ConversionError::required("value", node).with_target("Condition.code"))?;
        let code = to_coded_concept(value).map_err(|e| e.with_target("Condition.code"))?;

        if let Some(status) = CONCERN_STATUS.select_one(node)
            && let Some(raw) = status.attribute("code")
            && let Some(clinical) = accumulate(
                ctx,
                CLINICAL_STATUS
                    .normalize_at(raw, status)
                    .map_err(|e| e.with_target("Condition.clinicalStatus")),
            )
        {
            record.set("clinicalStatus", single_coding(CLINICAL_STATUS_SYSTEM, clinical));
        }

        record.push(
            "category",
            json!({
                "coding": [{
                    "system": CATEGORY_SYSTEM,
                    "code": "problem-list-item",
                    "display": "Problem List Item",
                }]
            }),
        );
        record.set("code", code.to_fhir());

        if let Some(subject) = scope.patient_reference() {
            record.set("subject", subject);
        }

        let effective = node.child("effectiveTime");
        let low = effective.and_then(|e| e.child("low"));
        let high = effective.and_then(|e| e.child("high"));
        if let Some(onset) = date_time(ctx, low, "Condition.onsetDateTime") {
            record.set("onsetDateTime", onset);
        }
        if let Some(abatement) = date_time(ctx, high, "Condition.abatementDateTime") {
            record.set("abatementDateTime", abatement);
        }

        Ok(Some(ctx.commit(record).into_ref()))
    }
}

impl ConvertsMany for ConditionConverter {
    fn convert_many(
        &self,
        nodes: &[SourceNode<'_>],
        scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Vec<RecordRef>> {
        convert_each(self, nodes, scope, ctx)
    }
}

impl SectionConverter for ConditionConverter {
    fn kind(&self) -> RecordKind {
        RecordKind::Condition
    }

    fn convert_section(
        &self,
        document: SourceNode<'_>,
        scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Vec<RecordRef>> {
        self.convert_many(&PROBLEM_OBSERVATIONS.select(document), scope, ctx)
    }
}
