//! Immutable source document tree
//!
//! This module holds the navigable, namespace-aware representation of a
//! clinical document:
//! - [`SourceTree`] / [`SourceNode`]: arena tree with stable document-order identity
//! - [`PathExpr`]: the restricted path-query sublanguage
//! - XML loading via quick-xml ([`SourceTree::parse_str`])

mod loader;
mod path;
mod tree;

pub use loader::SourceError;
pub use path::{PathExpr, PathSyntaxError};
pub use tree::{Attribute, QName, SourceNode, SourceTree, TreeBuilder};

use std::collections::BTreeMap;

/// HL7 v3 / CDA namespace
pub const CDA_NS: &str = "urn:hl7-org:v3";
/// HL7 SDTC extension namespace
pub const SDTC_NS: &str = "urn:hl7-org:sdtc";
/// XML Schema instance namespace (`xsi:type`)
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Prefix table used when compiling path expressions
///
/// Unprefixed step names resolve against the default namespace. Unprefixed
/// attribute names never take the default namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Namespaces {
    default: Option<String>,
    prefixes: BTreeMap<String, String>,
}

impl Namespaces {
    /// Empty table: unprefixed names match elements without a namespace
    pub fn new() -> Self {
        Self::default()
    }

    /// CDA table: default namespace `urn:hl7-org:v3`, prefixes `cda`, `sdtc`, `xsi`
    pub fn cda() -> Self {
        Self::new()
            .with_default(CDA_NS)
            .with_prefix("cda", CDA_NS)
            .with_prefix("sdtc", SDTC_NS)
            .with_prefix("xsi", XSI_NS)
    }

    pub fn with_default(mut self, uri: impl Into<String>) -> Self {
        self.default = Some(uri.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.insert(prefix, uri);
        self
    }

    /// Bind or rebind a prefix
    pub fn insert(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        self.prefixes.insert(prefix.into(), uri.into());
    }

    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(prefix).map(String::as_str)
    }

    pub fn default_namespace(&self) -> Option<&str> {
        self.default.as_deref()
    }
}
