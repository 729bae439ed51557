use super::shared::{Identity, demographics, resolve_identity};
use crate::context::ConversionContext;
use crate::error::{ConversionError, Result};
use crate::record::{RecordKind, RecordRef};
use crate::registry::{ConvertsOne, PrimaryConverter, Scope};
use crate::source::{PathExpr, SourceNode};
use std::sync::LazyLock;

static CUSTODIAN: LazyLock<PathExpr> = LazyLock::new(|| {
    PathExpr::cda("/ClinicalDocument/custodian/assignedCustodian/representedCustodianOrganization")
        .expect("valid custodian path")
});

/// Organizations: the document custodian, and any organization node handed
/// over by another converter
///
/// Uses probe-and-substitute: a node whose identifier was already converted
/// resolves to the earlier record.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrganizationConverter;

impl ConvertsOne for OrganizationConverter {
    fn convert_one(
        &self,
        node: SourceNode<'_>,
        _scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Option<RecordRef>> {
        let mut record = match resolve_identity(ctx, RecordKind::Organization, node) {
            Identity::Existing(existing) => return Ok(Some(existing)),
            Identity::New(record) => record,
        };

        let name = node.child("name").and_then(|n| n.text());
        if record.identifiers().is_empty() && name.is_none() {
            return Err(ConversionError::required("id or name", node).with_target("Organization"));
        }

        record.set("active", true);
        if let Some(name) = name {
            record.set("name", name);
        }
        demographics(ctx, &mut record, None, node);

        Ok(Some(ctx.commit(record).into_ref()))
    }
}

impl PrimaryConverter for OrganizationConverter {
    fn kind(&self) -> RecordKind {
        RecordKind::Organization
    }

    fn select<'t>(&self, document: SourceNode<'t>) -> Vec<SourceNode<'t>> {
        CUSTODIAN.select(document)
    }
}
