use super::location::LocationConverter;
use super::organization::OrganizationConverter;
use super::practitioner::PractitionerConverter;
use super::shared::{Identity, accumulate, resolve_identity};
use crate::context::ConversionContext;
use crate::error::{ConversionError, Result};
use crate::record::{RecordKind, RecordRef, TargetRecord};
use crate::registry::{ConvertsMany, ConvertsOne, Scope, SectionConverter, convert_each};
use crate::source::{PathExpr, SourceNode};
use crate::status::PROCEDURE_STATUS;
use crate::values::{Effective, to_coded_concept, to_effective};
use serde_json::json;
use std::sync::LazyLock;

static PROCEDURES: LazyLock<PathExpr> = LazyLock::new(|| {
    PathExpr::cda(
        "/ClinicalDocument/component/structuredBody/component/section[code/@code='47519-4']\
         /entry/procedure",
    )
    .expect("valid procedure path")
});

static PERFORMERS: LazyLock<PathExpr> =
    LazyLock::new(|| PathExpr::cda("performer/assignedEntity").expect("valid performer path"));

static LOCATIONS: LazyLock<PathExpr> = LazyLock::new(|| {
    PathExpr::cda("participant[@typeCode='LOC']/participantRole").expect("valid location path")
});

static ENCOUNTER_FACILITY: LazyLock<PathExpr> = LazyLock::new(|| {
    PathExpr::cda("/ClinicalDocument/componentOf/encompassingEncounter/location/healthCareFacility")
        .expect("valid facility path")
});

/// Procedures, invoking the practitioner, organization and location
/// converters for their performers and locations
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcedureConverter;

impl ProcedureConverter {
    fn performers(
        &self,
        node: SourceNode<'_>,
        scope: &Scope,
        record: &mut TargetRecord,
        ctx: &mut ConversionContext,
    ) {
        for performer in PERFORMERS.select(node) {
            let result = PractitionerConverter.convert_one(performer, scope, ctx);
            let Some(Some(practitioner)) = accumulate(ctx, result) else {
                continue;
            };
            let mut entry = json!({ "actor": practitioner.to_reference_value() });

            if let Some(organization) = performer.child("representedOrganization") {
                let result = OrganizationConverter.convert_one(organization, scope, ctx);
                if let Some(Some(organization)) = accumulate(ctx, result) {
                    entry["onBehalfOf"] = organization.to_reference_value();
                }
            }
            record.push("performer", entry);
        }
    }

    fn location(
        &self,
        node: SourceNode<'_>,
        scope: &Scope,
        record: &mut TargetRecord,
        ctx: &mut ConversionContext,
    ) {
        // Without a location participant the procedure took place at the
        // encounter's facility
        let place = LOCATIONS
            .select_one(node)
            .or_else(|| ENCOUNTER_FACILITY.select_one(node));
        if let Some(place) = place {
            let result = LocationConverter.convert_one(place, scope, ctx);
            if let Some(Some(location)) = accumulate(ctx, result) {
                record.set("location", location.to_reference_value());
            }
        }
    }
}

impl ConvertsOne for ProcedureConverter {
    fn convert_one(
        &self,
        node: SourceNode<'_>,
        scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Option<RecordRef>> {
        let mut record = match resolve_identity(ctx, RecordKind::Procedure, node) {
            Identity::Existing(existing) => return Ok(Some(existing)),
            Identity::New(record) => record,
        };

        let code_node = node
            .child("code")
            .ok_or_else(|| ConversionError::required("code", node).with_target("Procedure.code"))?;
        let code = to_coded_concept(code_node).map_err(|e| e.with_target("Procedure.code"))?;

        if let Some(status) = node.child("statusCode")
            && let Some(raw) = status.attribute("code")
            && let Some(mapped) = accumulate(
                ctx,
                PROCEDURE_STATUS
                    .normalize_at(raw, status)
                    .map_err(|e| e.with_target("Procedure.status")),
            )
        {
            record.set("status", mapped);
        }

        record.set("code", code.to_fhir());
        if let Some(subject) = scope.patient_reference() {
            record.set("subject", subject);
        }

        if let Some(effective) = node.child("effectiveTime") {
            let result = to_effective(effective).map_err(|e| e.with_target("Procedure.performed[x]"));
            match accumulate(ctx, result).flatten() {
                Some(Effective::Period(period)) => record.set("performedPeriod", period.to_fhir()),
                Some(Effective::Instant(instant)) => record.set("performedDateTime", instant.value),
                None => {}
            }
        }

        self.performers(node, scope, &mut record, ctx);
        self.location(node, scope, &mut record, ctx);

        Ok(Some(ctx.commit(record).into_ref()))
    }
}

impl ConvertsMany for ProcedureConverter {
    fn convert_many(
        &self,
        nodes: &[SourceNode<'_>],
        scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Vec<RecordRef>> {
        convert_each(self, nodes, scope, ctx)
    }
}

impl SectionConverter for ProcedureConverter {
    fn kind(&self) -> RecordKind {
        RecordKind::Procedure
    }

    fn convert_section(
        &self,
        document: SourceNode<'_>,
        scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Vec<RecordRef>> {
        self.convert_many(&PROCEDURES.select(document), scope, ctx)
    }
}
