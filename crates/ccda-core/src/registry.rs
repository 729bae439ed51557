//! Converter capabilities and the converter registry
//!
//! Converters are independent types composed through two capability traits:
//! [`ConvertsOne`] (single-node protocol) and [`ConvertsMany`] (multi-node
//! protocol). The registry is an explicit factory map keyed by record kind,
//! plus two mandatory primary slots for the document's organization and patient.

use crate::config::EngineConfig;
use crate::context::ConversionContext;
use crate::converters::{
    AllergyConverter, ConditionConverter, ObservationConverter, OrganizationConverter,
    PatientConverter, PractitionerConverter, ProcedureConverter,
};
use crate::error::{EngineError, Result};
use crate::record::{RecordKind, RecordRef};
use crate::source::SourceNode;
use indexmap::IndexMap;
use tracing::debug;

/// Cross-references available to every converter of one document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub patient: Option<RecordRef>,
}

impl Scope {
    /// `{"reference": "Patient/…"}` for subject fields
    pub fn patient_reference(&self) -> Option<serde_json::Value> {
        self.patient.as_ref().map(RecordRef::to_reference_value)
    }
}

/// Single-node protocol: zero or one record per source node
///
/// `Ok(Some(_))` may reference a record produced earlier for the same
/// identity instead of a newly created one.
pub trait ConvertsOne {
    fn convert_one(
        &self,
        node: SourceNode<'_>,
        scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Option<RecordRef>>;
}

/// Multi-node protocol: one attempt per pre-selected node
pub trait ConvertsMany {
    fn convert_many(
        &self,
        nodes: &[SourceNode<'_>],
        scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Vec<RecordRef>>;
}

/// Shared per-node loop for [`ConvertsMany`] implementations
///
/// Nodes are attempted in the order given; nodes that produce nothing are
/// skipped. The first hard error stops the loop.
pub fn convert_each<C: ConvertsOne + ?Sized>(
    converter: &C,
    nodes: &[SourceNode<'_>],
    scope: &Scope,
    ctx: &mut ConversionContext,
) -> Result<Vec<RecordRef>> {
    let mut produced = Vec::with_capacity(nodes.len());
    for node in nodes {
        if let Some(record) = converter.convert_one(*node, scope, ctx)? {
            produced.push(record);
        }
    }
    Ok(produced)
}

/// Converter for one of the document's two primary entities
pub trait PrimaryConverter: ConvertsOne {
    fn kind(&self) -> RecordKind;

    /// Candidate nodes; orchestration requires exactly one
    fn select<'t>(&self, document: SourceNode<'t>) -> Vec<SourceNode<'t>>;
}

/// Converter that resolves its own source nodes from the document
pub trait SectionConverter {
    fn kind(&self) -> RecordKind;

    fn convert_section(
        &self,
        document: SourceNode<'_>,
        scope: &Scope,
        ctx: &mut ConversionContext,
    ) -> Result<Vec<RecordRef>>;
}

/// Construction closure for a section converter
pub type ConverterFactory = Box<dyn Fn() -> Box<dyn SectionConverter>>;

/// Registry of converters keyed by record kind
pub struct ConverterRegistry {
    primary_organization: Box<dyn PrimaryConverter>,
    primary_patient: Box<dyn PrimaryConverter>,
    sections: IndexMap<RecordKind, ConverterFactory>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConverterRegistry {
    /// Registry with the primary slots seeded and no section converters
    pub fn new() -> Self {
        Self {
            primary_organization: Box::new(OrganizationConverter),
            primary_patient: Box::new(PatientConverter),
            sections: IndexMap::new(),
        }
    }

    /// Registry with every built-in section converter
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in EngineConfig::default().sections {
            if let Some(factory) = builtin_factory(kind) {
                registry.sections.insert(kind, factory);
            }
        }
        registry
    }

    /// Registry with the sections enabled in `config`, in configured order
    pub fn from_config(config: &EngineConfig) -> std::result::Result<Self, EngineError> {
        let mut registry = Self::new();
        for kind in &config.sections {
            let factory = builtin_factory(*kind).ok_or_else(|| EngineError::UnsupportedConverter {
                kind: *kind,
                reason: "no built-in section converter".into(),
            })?;
            registry.register(*kind, factory)?;
        }
        Ok(registry)
    }

    /// Register or replace the converter for `kind`
    pub fn register(
        &mut self,
        kind: RecordKind,
        factory: ConverterFactory,
    ) -> std::result::Result<(), EngineError> {
        if kind.is_abstract() {
            return Err(EngineError::UnsupportedConverter {
                kind,
                reason: "abstract record kinds cannot be converted".into(),
            });
        }
        if self.sections.insert(kind, factory).is_some() {
            debug!("Replacing converter for {}", kind);
        } else {
            debug!("Registering converter for {}", kind);
        }
        Ok(())
    }

    pub fn set_primary_organization(
        &mut self,
        converter: Box<dyn PrimaryConverter>,
    ) -> std::result::Result<(), EngineError> {
        expect_kind(converter.kind(), RecordKind::Organization)?;
        self.primary_organization = converter;
        Ok(())
    }

    pub fn set_primary_patient(
        &mut self,
        converter: Box<dyn PrimaryConverter>,
    ) -> std::result::Result<(), EngineError> {
        expect_kind(converter.kind(), RecordKind::Patient)?;
        self.primary_patient = converter;
        Ok(())
    }

    pub fn primary_organization(&self) -> &dyn PrimaryConverter {
        self.primary_organization.as_ref()
    }

    pub fn primary_patient(&self) -> &dyn PrimaryConverter {
        self.primary_patient.as_ref()
    }

    /// Registered section kinds in invocation order
    pub fn kinds(&self) -> impl Iterator<Item = RecordKind> + '_ {
        self.sections.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Build every section converter, checking it produces its registered kind
    pub fn instantiate(
        &self,
    ) -> std::result::Result<Vec<(RecordKind, Box<dyn SectionConverter>)>, EngineError> {
        self.sections
            .iter()
            .map(|(kind, factory)| {
                let converter = factory();
                expect_kind(converter.kind(), *kind)?;
                Ok((*kind, converter))
            })
            .collect()
    }
}

fn expect_kind(actual: RecordKind, expected: RecordKind) -> std::result::Result<(), EngineError> {
    if actual == expected {
        return Ok(());
    }
    Err(EngineError::UnsupportedConverter {
        kind: expected,
        reason: format!("converter produces {actual}"),
    })
}

/// Factory building a fresh `C` per conversion
pub fn factory_of<C: SectionConverter + Default + 'static>() -> ConverterFactory {
    Box::new(|| -> Box<dyn SectionConverter> { Box::new(C::default()) })
}

/// Factory for a built-in section converter
pub fn builtin_factory(kind: RecordKind) -> Option<ConverterFactory> {
    let factory = match kind {
        RecordKind::Practitioner => factory_of::<PractitionerConverter>(),
        RecordKind::Condition => factory_of::<ConditionConverter>(),
        RecordKind::AllergyIntolerance => factory_of::<AllergyConverter>(),
        RecordKind::Procedure => factory_of::<ProcedureConverter>(),
        RecordKind::Observation => factory_of::<ObservationConverter>(),
        _ => return None,
    };
    Some(factory)
}
