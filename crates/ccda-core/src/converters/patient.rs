use super::shared::{Identity, date_time, demographics, resolve_identity};
use crate::context::ConversionContext;
use crate::error::{ConversionError, Result};
use crate::record::{RecordKind, RecordRef};
use crate::registry::{ConvertsOne, PrimaryConverter, Scope};
use crate::source::{PathExpr, SourceNode};
use crate::status::ADMINISTRATIVE_GENDER;
use crate::values::to_coded_concept;
use serde_json::json;
use std::sync::LazyLock;

static PATIENT_ROLE: LazyLock<PathExpr> = LazyLock::new(|| {
    PathExpr::cda("/ClinicalDocument/recordTarget/patientRole").expect("valid patient path")
});

/// The document's subject, from `recordTarget/patientRole`
///
/// Fails fast: the document is unusable without its patient. The managing
/// organization is backfilled by orchestration after this converter returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatientConverter;

impl ConvertsOne for PatientConverter {
    fn convert_one(
        &self,
        node: SourceNode<'_>,
        _scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Option<RecordRef>> {
        let mut record = match resolve_identity(ctx, RecordKind::Patient, node) {
            Identity::Existing(existing) => return Ok(Some(existing)),
            Identity::New(record) => record,
        };
        let patient = node
            .child("patient")
            .ok_or_else(|| ConversionError::required("patient", node).with_target("Patient"))?;

        demographics(ctx, &mut record, Some(patient), node);

        if let Some(gender) = patient.child("administrativeGenderCode") {
            match gender.attribute("code") {
                Some(code) => {
                    let gender_code = ADMINISTRATIVE_GENDER
                        .normalize_at(code, gender)
                        .map_err(|e| e.with_target("Patient.gender"))?;
                    record.set("gender", gender_code);
                }
                None if gender.attribute("nullFlavor").is_some() => record.set("gender", "unknown"),
                None => {}
            }
        }

        if let Some(birth_date) = date_time(ctx, patient.child("birthTime"), "Patient.birthDate") {
            let date = birth_date.split('T').next().unwrap_or(&birth_date).to_string();
            record.set("birthDate", date);
        }

        if let Some(marital) = patient.child("maritalStatusCode")
            && marital.attribute("code").is_some()
        {
            record.set("maritalStatus", to_coded_concept(marital)?.to_fhir());
        }

        for language in patient
            .children_named("languageCommunication")
            .filter_map(|lc| lc.child("languageCode"))
            .filter_map(|code| code.attribute("code"))
        {
            record.push(
                "communication",
                json!({
                    "language": {
                        "coding": [{ "system": "urn:ietf:bcp:47", "code": language }]
                    }
                }),
            );
        }

        Ok(Some(ctx.commit(record).into_ref()))
    }
}

impl PrimaryConverter for PatientConverter {
    fn kind(&self) -> RecordKind {
        RecordKind::Patient
    }

    fn select<'t>(&self, document: SourceNode<'t>) -> Vec<SourceNode<'t>> {
        PATIENT_ROLE.select(document)
    }
}
