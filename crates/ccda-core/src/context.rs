//! Per-document conversion context
//!
//! One [`ConversionContext`] exists per document. It owns the growing output,
//! the identity cache and the error accumulator, and is passed by `&mut`
//! through every converter call. It must never be reused for a second document.

use crate::cache::IdentityCache;
use crate::config::IdStrategy;
use crate::error::ConversionError;
use crate::record::{Bundle, Identifier, RecordKind, RecordRef, TargetRecord};
use indexmap::IndexMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of committing a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit {
    /// The record was appended to the output
    Created(RecordRef),
    /// An earlier record shares an identity key; the new one was discarded
    Existing(RecordRef),
}

impl Commit {
    pub fn record_ref(&self) -> &RecordRef {
        match self {
            Commit::Created(r) | Commit::Existing(r) => r,
        }
    }

    pub fn into_ref(self) -> RecordRef {
        match self {
            Commit::Created(r) | Commit::Existing(r) => r,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Commit::Created(_))
    }
}

#[derive(Debug)]
enum IdGenerator {
    Uuid,
    Sequential(u64),
}

impl IdGenerator {
    fn next(&mut self) -> String {
        match self {
            IdGenerator::Uuid => Uuid::new_v4().to_string(),
            IdGenerator::Sequential(counter) => {
                *counter += 1;
                counter.to_string()
            }
        }
    }
}

#[derive(Debug)]
pub struct ConversionContext {
    ids: IdGenerator,
    output: IndexMap<String, TargetRecord>,
    cache: IdentityCache,
    errors: Vec<ConversionError>,
}

impl Default for ConversionContext {
    fn default() -> Self {
        Self::new(IdStrategy::default())
    }
}

impl ConversionContext {
    pub fn new(strategy: IdStrategy) -> Self {
        let ids = match strategy {
            IdStrategy::Uuid => IdGenerator::Uuid,
            IdStrategy::Sequential => IdGenerator::Sequential(0),
        };
        Self {
            ids,
            output: IndexMap::new(),
            cache: IdentityCache::new(),
            errors: Vec::new(),
        }
    }

    /// Start a new record with a freshly assigned correlation id
    pub fn begin(&mut self, kind: RecordKind) -> TargetRecord {
        TargetRecord::new(kind, self.ids.next())
    }

    /// Append `record` to the output unless one of its identifiers is cached
    ///
    /// On a collision the earlier record wins and `record` is dropped; its
    /// remaining identifiers are registered against the earlier record.
    pub fn commit(&mut self, record: TargetRecord) -> Commit {
        if let Some(existing) = self.find_existing(record.kind(), record.identifiers()) {
            debug!(
                "Discarding {} in favour of cached {}",
                record.reference(),
                existing
            );
            self.link(&existing, record.identifiers());
            return Commit::Existing(existing);
        }

        let record_ref = record.record_ref();
        self.link(&record_ref, record.identifiers());
        debug!("Committed {}", record_ref);
        self.output.insert(record_ref.reference(), record);
        Commit::Created(record_ref)
    }

    /// First cached record matching any of `identifiers`
    pub fn find_existing(&self, kind: RecordKind, identifiers: &[Identifier]) -> Option<RecordRef> {
        identifiers
            .iter()
            .find_map(|i| self.cache.try_get(kind, &i.system, &i.value))
            .cloned()
    }

    /// Register every identifier in `identifiers` as a key of `record`
    ///
    /// Keys already owned by another record keep their first owner.
    pub fn link(&mut self, record: &RecordRef, identifiers: &[Identifier]) {
        for identifier in identifiers {
            self.cache
                .add(record, &identifier.system, &identifier.value);
        }
    }

    pub fn try_get(&self, kind: RecordKind, system: &str, value: &str) -> Option<&TargetRecord> {
        let record_ref = self.cache.try_get(kind, system, value)?;
        self.output.get(&record_ref.reference())
    }

    pub fn contains(&self, kind: RecordKind, system: &str, value: &str) -> bool {
        self.cache.contains(kind, system, value)
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    pub fn record(&self, record_ref: &RecordRef) -> Option<&TargetRecord> {
        self.output.get(&record_ref.reference())
    }

    /// Reopen a committed record for enrichment
    pub fn reopen(&mut self, record_ref: &RecordRef) -> Option<&mut TargetRecord> {
        self.output.get_mut(&record_ref.reference())
    }

    pub fn len(&self) -> usize {
        self.output.len()
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }

    /// Accumulate a non-fatal error
    pub fn report(&mut self, error: ConversionError) {
        warn!("{}", error);
        self.errors.push(error);
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Consume the context, yielding the output and the accumulated errors
    pub fn finish(self) -> (Bundle, Vec<ConversionError>) {
        let records = self.output.into_values().collect();
        (Bundle::new(records), self.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(ctx: &mut ConversionContext, value: &str) -> TargetRecord {
        let mut record = ctx.begin(RecordKind::Condition);
        record.add_identifier(Identifier::new("urn:oid:1.2", value));
        record
    }

    #[test]
    fn test_sequential_ids_are_unique() {
        let mut ctx = ConversionContext::new(IdStrategy::Sequential);
        let a = ctx.begin(RecordKind::Patient);
        let b = ctx.begin(RecordKind::Patient);

        assert_eq!(a.id(), "1");
        assert_eq!(b.id(), "2");
    }

    #[test]
    fn test_uuid_ids() {
        let mut ctx = ConversionContext::new(IdStrategy::Uuid);
        let record = ctx.begin(RecordKind::Patient);
        assert!(Uuid::parse_str(record.id()).is_ok());
    }

    #[test]
    fn test_commit_deduplicates_by_identifier() {
        let mut ctx = ConversionContext::new(IdStrategy::Sequential);
        let first = condition(&mut ctx, "A");
        let second = condition(&mut ctx, "A");

        let created = ctx.commit(first);
        let existing = ctx.commit(second);

        assert!(created.is_created());
        assert_eq!(existing, Commit::Existing(created.record_ref().clone()));
        assert_eq!(ctx.len(), 1);
        assert_eq!(
            ctx.try_get(RecordKind::Condition, "urn:oid:1.2", "A").map(|r| r.id()),
            Some("1")
        );
    }

    #[test]
    fn test_discarded_record_links_its_other_identifiers() {
        let mut ctx = ConversionContext::new(IdStrategy::Sequential);
        let first = condition(&mut ctx, "A");
        let mut second = condition(&mut ctx, "A");
        second.add_identifier(Identifier::new("urn:oid:1.2", "B"));
        let third = condition(&mut ctx, "B");

        let created = ctx.commit(first).into_ref();
        assert_eq!(ctx.commit(second), Commit::Existing(created.clone()));
        assert_eq!(ctx.commit(third), Commit::Existing(created));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_output_preserves_commit_order() {
        let mut ctx = ConversionContext::new(IdStrategy::Sequential);
        for value in ["C", "A", "B"] {
            let record = condition(&mut ctx, value);
            ctx.commit(record);
        }

        let (bundle, errors) = ctx.finish();
        let ids: Vec<_> = bundle.iter().map(|r| r.identifiers()[0].value.clone()).collect();
        assert_eq!(ids, vec!["C", "A", "B"]);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_reopen_enriches_committed_record() {
        let mut ctx = ConversionContext::new(IdStrategy::Sequential);
        let record = ctx.begin(RecordKind::Patient);
        let patient = ctx.commit(record).into_ref();

        ctx.reopen(&patient)
            .unwrap()
            .set("managingOrganization", serde_json::json!({ "reference": "Organization/9" }));

        assert!(ctx.record(&patient).unwrap().get("managingOrganization").is_some());
    }

    #[test]
    fn test_errors_accumulate_in_order() {
        let mut ctx = ConversionContext::default();
        ctx.report(ConversionError::required_at("code", "/a[1]"));
        ctx.report(ConversionError::required_at("code", "/b[1]"));

        let (_, errors) = ctx.finish();
        let paths: Vec<_> = errors.iter().map(|e| e.source_path().to_string()).collect();
        assert_eq!(paths, vec!["/a[1]", "/b[1]"]);
    }
}
