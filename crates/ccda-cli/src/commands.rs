//! CLI command implementations
//!
//! Commands are organized hierarchically:
//! - Top-level commands (convert, query) are implemented in this file
//! - commands/config.rs - Configuration management (init, show)

pub mod config;

use anyhow::Context;
use ccda_core::{ConfigLoader, ConversionEngine, EngineConfig, IdStrategy, PathExpr, SourceTree};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use crate::output::{ConversionSummary, print_errors, render_bundle};
use crate::{OutputFormat, Status};

fn load_config(config_path: Option<&Path>, input: &Path) -> anyhow::Result<EngineConfig> {
    // Discover from the document's directory when no path is given
    let start_dir = input.parent().filter(|p| !p.as_os_str().is_empty());
    let config = ConfigLoader::load(config_path, start_dir)?;
    debug!("Using configuration: {:?}", config);
    Ok(config)
}

/// Convert command implementation
pub fn convert_command(
    input: &Path,
    output: Option<&Path>,
    format: OutputFormat,
    strict: bool,
    sequential_ids: bool,
    config_path: Option<&Path>,
) -> anyhow::Result<Status> {
    debug!("Running convert command on {}", input.display());

    let mut config = load_config(config_path, input)?;
    if sequential_ids {
        config.id_strategy = IdStrategy::Sequential;
    }
    let strict = strict || config.strict;

    let engine = ConversionEngine::from_config(&config)?;
    let started = Instant::now();
    let outcome = engine
        .convert_file(input)
        .with_context(|| format!("failed to convert {}", input.display()))?;
    info!(
        "Converted {} in {:.2?}",
        input.display(),
        started.elapsed()
    );

    let rendered = render_bundle(outcome.bundle(), format)?;
    match output {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            ConversionSummary::from_outcome(&outcome).print(Some(path));
        }
        None => println!("{rendered}"),
    }

    if outcome.is_complete() {
        return Ok(Status::Success);
    }
    print_errors(outcome.errors());
    Ok(if strict { Status::Partial } else { Status::Success })
}

/// Query command implementation
///
/// Prints the absolute path of every selected node, with its text when it
/// has any.
pub fn query_command(
    input: &Path,
    expression: &str,
    config_path: Option<&Path>,
) -> anyhow::Result<Status> {
    let config = load_config(config_path, input)?;
    let expr = PathExpr::compile(expression, &config.namespace_table())?;
    let tree = SourceTree::from_file(input)?;

    let nodes = expr.select(tree.root());
    debug!("'{}' selected {} node(s)", expr, nodes.len());
    for node in nodes {
        match node.text() {
            Some(text) => println!("{}\t{}", node.absolute_path(), text),
            None => println!("{}", node.absolute_path()),
        }
    }
    Ok(Status::Success)
}
