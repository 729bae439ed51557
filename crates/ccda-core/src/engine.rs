//! Root orchestration of one document conversion
//!
//! 1. exactly one primary organization is converted (fatal on failure)
//! 2. exactly one primary patient is converted and its managing organization
//!    backfilled (fatal on failure)
//! 3. every registered section converter runs in registration order; an error
//!    from one converter is accumulated and the next converter still runs

use crate::config::{EngineConfig, IdStrategy};
use crate::context::ConversionContext;
use crate::error::{AggregateError, ConversionError, EngineError};
use crate::record::Bundle;
use crate::registry::{ConverterRegistry, PrimaryConverter, Scope};
use crate::source::{SourceNode, SourceTree};
use std::path::Path;
use tracing::{debug, info, warn};

/// Terminal state of a successful (possibly partial) conversion
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOutcome {
    /// Every converter finished without accumulated errors
    Complete(Bundle),
    /// Output is usable but some values could not be converted
    Partial {
        bundle: Bundle,
        errors: AggregateError,
    },
}

impl ConversionOutcome {
    pub fn bundle(&self) -> &Bundle {
        match self {
            ConversionOutcome::Complete(bundle) | ConversionOutcome::Partial { bundle, .. } => {
                bundle
            }
        }
    }

    pub fn errors(&self) -> &[ConversionError] {
        match self {
            ConversionOutcome::Complete(_) => &[],
            ConversionOutcome::Partial { errors, .. } => errors.errors(),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ConversionOutcome::Complete(_))
    }

    pub fn into_parts(self) -> (Bundle, Option<AggregateError>) {
        match self {
            ConversionOutcome::Complete(bundle) => (bundle, None),
            ConversionOutcome::Partial { bundle, errors } => (bundle, Some(errors)),
        }
    }
}

/// Converts whole documents using a [`ConverterRegistry`]
pub struct ConversionEngine {
    registry: ConverterRegistry,
    id_strategy: IdStrategy,
}

impl Default for ConversionEngine {
    fn default() -> Self {
        Self::new(ConverterRegistry::with_defaults())
    }
}

impl ConversionEngine {
    pub fn new(registry: ConverterRegistry) -> Self {
        Self {
            registry,
            id_strategy: IdStrategy::default(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        Ok(Self::new(ConverterRegistry::from_config(config)?).with_id_strategy(config.id_strategy))
    }

    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    pub fn registry(&self) -> &ConverterRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ConverterRegistry {
        &mut self.registry
    }

    pub fn convert_str(&self, xml: &str) -> Result<ConversionOutcome, EngineError> {
        let tree = SourceTree::parse_str(xml)?;
        self.convert_document(&tree)
    }

    pub fn convert_file(&self, path: &Path) -> Result<ConversionOutcome, EngineError> {
        let tree = SourceTree::from_file(path)?;
        self.convert_document(&tree)
    }

    /// Convert one parsed document with a fresh context
    pub fn convert_document(&self, tree: &SourceTree) -> Result<ConversionOutcome, EngineError> {
        if self.registry.is_empty() {
            return Err(EngineError::NoConverters);
        }
        let sections = self.registry.instantiate()?;
        let document = tree.root();
        let mut ctx = ConversionContext::new(self.id_strategy);

        // Primary organization
        let converter = self.registry.primary_organization();
        let node = exactly_one(converter, document, "primary organization")
            .map_err(EngineError::PrimaryOrganization)?;
        let organization = converter
            .convert_one(node, &Scope::default(), &mut ctx)
            .map_err(EngineError::PrimaryOrganization)?
            .ok_or_else(|| {
                EngineError::PrimaryOrganization(ConversionError::required(
                    "organization record",
                    node,
                ))
            })?;
        debug!("Primary organization: {}", organization);

        // Primary patient
        let mut scope = Scope::default();
        let converter = self.registry.primary_patient();
        let candidates = converter.select(document);
        let node = match candidates.as_slice() {
            [] => {
                return Err(EngineError::PrimaryPatientMissing {
                    path: document.absolute_path(),
                });
            }
            [node] => *node,
            [_, second, ..] => {
                return Err(EngineError::PrimaryPatient(ConversionError::profile(
                    format!("expected one primary patient, found {}", candidates.len()),
                    *second,
                )));
            }
        };
        let patient = converter
            .convert_one(node, &scope, &mut ctx)
            .map_err(EngineError::PrimaryPatient)?
            .ok_or_else(|| EngineError::PrimaryPatientMissing {
                path: node.absolute_path(),
            })?;
        if let Some(record) = ctx.reopen(&patient) {
            record.set("managingOrganization", organization.to_reference_value());
        }
        debug!("Primary patient: {}", patient);
        scope.patient = Some(patient);

        // Section converters
        for (kind, converter) in &sections {
            debug!("Running {} converter", kind);
            match converter.convert_section(document, &scope, &mut ctx) {
                Ok(records) => debug!("{} converter produced {} record(s)", kind, records.len()),
                Err(error) => {
                    warn!("{} converter aborted", kind);
                    ctx.report(error);
                }
            }
        }

        let (bundle, errors) = ctx.finish();
        info!(
            "Converted document: {} records, {} errors",
            bundle.len(),
            errors.len()
        );

        if errors.is_empty() {
            Ok(ConversionOutcome::Complete(bundle))
        } else {
            Ok(ConversionOutcome::Partial {
                bundle,
                errors: AggregateError::new(errors),
            })
        }
    }
}

fn exactly_one<'t>(
    converter: &dyn PrimaryConverter,
    document: SourceNode<'t>,
    what: &str,
) -> Result<SourceNode<'t>, ConversionError> {
    let candidates = converter.select(document);
    match candidates.as_slice() {
        [] => Err(ConversionError::required(what, document)),
        [node] => Ok(*node),
        [_, second, ..] => Err(ConversionError::profile(
            format!("expected one {what}, found {}", candidates.len()),
            *second,
        )),
    }
}
