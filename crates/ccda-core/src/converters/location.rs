use super::organization::OrganizationConverter;
use super::shared::{Identity, accumulate, demographics, resolve_identity};
use crate::context::ConversionContext;
use crate::error::Result;
use crate::record::{RecordKind, RecordRef};
use crate::registry::{ConvertsOne, Scope};
use crate::source::SourceNode;
use crate::values::to_coded_concept;
use serde_json::Value;

/// Service delivery locations: a `participantRole` with class SDLOC, or an
/// encounter's `healthCareFacility`
///
/// Only reached through other converters; probe-and-substitute.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocationConverter;

impl ConvertsOne for LocationConverter {
    fn convert_one(
        &self,
        node: SourceNode<'_>,
        scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Option<RecordRef>> {
        let mut record = match resolve_identity(ctx, RecordKind::Location, node) {
            Identity::Existing(existing) => return Ok(Some(existing)),
            Identity::New(record) => record,
        };

        let place = node.child("playingEntity").or_else(|| node.child("location"));
        if let Some(name) = place
            .and_then(|place| place.child("name"))
            .and_then(|name| name.text())
        {
            record.set("name", name);
        }

        if let Some(code) = node.child("code")
            && let Some(concept) = accumulate(
                ctx,
                to_coded_concept(code).map_err(|e| e.with_target("Location.type")),
            )
        {
            record.set("type", Value::Array(vec![concept.to_fhir()]));
        }

        demographics(ctx, &mut record, None, node);
        if let Some(place) = place {
            demographics(ctx, &mut record, None, place);
        }
        // Location has a single address
        if let Some(Value::Array(addresses)) = record.get("address").cloned()
            && let Some(first) = addresses.into_iter().next()
        {
            record.set("address", first);
        }

        if let Some(provider) = node.child("serviceProviderOrganization") {
            let result = OrganizationConverter.convert_one(provider, scope, ctx);
            if let Some(Some(organization)) = accumulate(ctx, result) {
                record.set("managingOrganization", organization.to_reference_value());
            }
        }

        Ok(Some(ctx.commit(record).into_ref()))
    }
}
