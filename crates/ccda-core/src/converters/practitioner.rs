use super::shared::{Identity, accumulate, demographics, identifiers, resolve_identity};
use crate::context::ConversionContext;
use crate::error::Result;
use crate::record::{RecordKind, RecordRef};
use crate::registry::{ConvertsOne, Scope, SectionConverter};
use crate::source::{PathExpr, SourceNode};
use crate::values::to_coded_concept;
use serde_json::json;
use std::sync::LazyLock;
use tracing::debug;

static AUTHORS: LazyLock<PathExpr> = LazyLock::new(|| {
    PathExpr::cda("/ClinicalDocument/author/assignedAuthor[assignedPerson]")
        .expect("valid author path")
});

/// Practitioners from document authors and from performers handed over by
/// other converters (`assignedAuthor` / `assignedEntity`)
#[derive(Debug, Clone, Copy, Default)]
pub struct PractitionerConverter;

impl ConvertsOne for PractitionerConverter {
    fn convert_one(
        &self,
        node: SourceNode<'_>,
        _scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Option<RecordRef>> {
        let mut record = match resolve_identity(ctx, RecordKind::Practitioner, node) {
            Identity::Existing(existing) => return Ok(Some(existing)),
            Identity::New(record) => record,
        };

        let person = node.child("assignedPerson");
        demographics(ctx, &mut record, person, node);

        if let Some(code) = node.child("code")
            && let Some(concept) = accumulate(
                ctx,
                to_coded_concept(code).map_err(|e| e.with_target("Practitioner.qualification")),
            )
        {
            record.push("qualification", json!({ "code": concept.to_fhir() }));
        }

        Ok(Some(ctx.commit(record).into_ref()))
    }
}

impl SectionConverter for PractitionerConverter {
    fn kind(&self) -> RecordKind {
        RecordKind::Practitioner
    }

    /// Probe-then-continue: authors whose identifier is already known are skipped
    fn convert_section(
        &self,
        document: SourceNode<'_>,
        scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Vec<RecordRef>> {
        let mut produced = Vec::new();
        for node in AUTHORS.select(document) {
            let known = identifiers(node)
                .iter()
                .any(|id| ctx.contains(RecordKind::Practitioner, &id.system, &id.value));
            if known {
                debug!("Author at {} already converted", node.absolute_path());
                continue;
            }
            if let Some(record) = self.convert_one(node, scope, ctx)? {
                produced.push(record);
            }
        }
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdStrategy;
    use crate::source::SourceTree;
    use crate::values::NPI;

    const DOC: &str = r#"<ClinicalDocument xmlns="urn:hl7-org:v3">
  <author><assignedAuthor>
    <id root="2.16.840.1.113883.4.6" extension="99999999"/>
    <code code="207Q00000X" codeSystem="2.16.840.1.113883.6.101" displayName="Family Medicine"/>
    <assignedPerson><name><given>Henry</given><family>Seven</family></name></assignedPerson>
  </assignedAuthor></author>
  <author><assignedAuthor>
    <id root="2.16.840.1.113883.4.6" extension="99999999"/>
    <assignedPerson><name><family>Seven</family></name></assignedPerson>
  </assignedAuthor></author>
  <author><assignedAuthor>
    <id root="1.2.3" extension="device"/>
    <assignedAuthoringDevice><softwareName>EHR</softwareName></assignedAuthoringDevice>
  </assignedAuthor></author>
</ClinicalDocument>"#;

    #[test]
    fn test_repeated_authors_produce_one_practitioner() {
        let tree = SourceTree::parse_str(DOC).unwrap();
        let mut ctx = ConversionContext::new(IdStrategy::Sequential);

        let produced = PractitionerConverter
            .convert_section(tree.root(), &Scope::default(), &mut ctx)
            .unwrap();

        assert_eq!(produced.len(), 1);
        let resource = ctx.record(&produced[0]).unwrap().to_resource();
        assert_eq!(resource["identifier"][0]["system"], json!(NPI));
        assert_eq!(resource["name"][0]["given"], json!(["Henry"]));
        assert_eq!(
            resource["qualification"][0]["code"]["coding"][0]["system"],
            json!("http://nucc.org/provider-taxonomy")
        );
    }
}
