//! Output formatting and reporting

use ccda_core::{Bundle, ConversionError, ConversionOutcome, RecordKind};
use colored::*;
use std::collections::BTreeMap;
use std::path::Path;

use crate::OutputFormat;

/// Record counts of one conversion
#[derive(Debug, Clone, Default)]
pub struct ConversionSummary {
    pub records: usize,
    pub errors: usize,
    pub by_kind: BTreeMap<RecordKind, usize>,
}

impl ConversionSummary {
    pub fn from_outcome(outcome: &ConversionOutcome) -> Self {
        Self::from_bundle(outcome.bundle(), outcome.errors().len())
    }

    fn from_bundle(bundle: &Bundle, errors: usize) -> Self {
        let mut by_kind = BTreeMap::new();
        for record in bundle.iter() {
            *by_kind.entry(record.kind()).or_insert(0) += 1;
        }
        Self {
            records: bundle.len(),
            errors,
            by_kind,
        }
    }

    fn render(&self) -> String {
        let mut out = format!("{}\n", "Summary:".bold());
        out.push_str(&format!("  Records: {}\n", self.records));
        for (kind, count) in &self.by_kind {
            out.push_str(&format!("    {kind}: {count}\n"));
        }
        if self.errors > 0 {
            out.push_str(&format!("  Errors: {}\n", self.errors.to_string().red()));
        } else {
            out.push_str(&format!("  {}\n", "No conversion errors".green()));
        }
        out
    }

    pub fn print(&self, written_to: Option<&Path>) {
        if let Some(path) = written_to {
            println!("Wrote bundle to {}", path.display());
        }
        print!("{}", self.render());
    }
}

/// Render a bundle in the requested format
pub fn render_bundle(bundle: &Bundle, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(&bundle.to_json()),
        OutputFormat::Compact => serde_json::to_string(&bundle.to_json()),
        OutputFormat::Summary => Ok(ConversionSummary::from_bundle(bundle, 0).render()),
    }
}

/// Report accumulated errors on stderr
pub fn print_errors(errors: &[ConversionError]) {
    eprintln!(
        "{} {} conversion error(s)",
        "warning:".yellow().bold(),
        errors.len()
    );
    for error in errors {
        eprintln!("  - [{}] {}", error.kind().to_string().yellow(), error);
    }
}
