//! # ccda-core
//!
//! Conversion engine for C-CDA clinical documents
//!
//! This crate parses a C-CDA XML document into an immutable source tree,
//! evaluates path expressions over it and runs a registry of converters that
//! produce a bundle of FHIR-shaped records. Records sharing a business
//! identifier are produced once and referenced everywhere else.

pub mod cache;
pub mod config;
pub mod context;
pub mod converters;
pub mod engine;
pub mod error;
pub mod record;
pub mod registry;
pub mod source;
pub mod status;
pub mod values;

// Re-exports for convenience
pub use config::{ConfigError, ConfigLoader, EngineConfig, IdStrategy};
pub use context::{Commit, ConversionContext};
pub use engine::{ConversionEngine, ConversionOutcome};
pub use error::{AggregateError, ConversionError, EngineError, ErrorKind, Result};
pub use record::{Bundle, Identifier, RecordKind, RecordRef, TargetRecord};
pub use registry::{
    ConverterFactory, ConverterRegistry, ConvertsMany, ConvertsOne, PrimaryConverter, Scope,
    SectionConverter,
};
pub use source::{Namespaces, PathExpr, PathSyntaxError, SourceError, SourceNode, SourceTree};

/// Initialize the tracing subscriber for logging
///
/// `RUST_LOG` wins over `default_directive`. Output goes to stderr so that
/// converted bundles written to stdout stay clean.
pub fn init_tracing(default_directive: &str) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
