//! CCDA CLI
//!
//! Command-line interface for the C-CDA conversion engine

mod commands;
mod output;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ccda")]
#[command(about = "Convert C-CDA clinical documents into FHIR record bundles")]
#[command(version = ccda_core::VERSION)]
#[command(
    long_about = "ccda converts C-CDA clinical documents into bundles of FHIR-shaped records.\n\
Records sharing a business identifier are emitted once and referenced everywhere else.\n\
\n\
Examples:\n  \
ccda convert ccd.xml                      # Print the bundle to stdout\n  \
ccda convert ccd.xml -o bundle.json       # Write the bundle to a file\n  \
ccda query ccd.xml '//section/code'       # Evaluate a path expression\n  \
ccda config init                          # Write a default ccda.toml"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(
        short,
        long,
        global = true,
        help = "Path to configuration file (ccda.toml/.ccdarc.json)"
    )]
    config: Option<PathBuf>,

    /// Verbose output (can be used multiple times for increased verbosity)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a C-CDA document into a record bundle
    Convert {
        /// Source document
        #[arg(help = "Path to the C-CDA XML document")]
        input: PathBuf,

        /// Output file for the bundle
        #[arg(short, long, help = "Write the bundle here instead of stdout")]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "json", help = "Output format for the bundle")]
        format: OutputFormat,

        /// Fail when any conversion error was accumulated
        #[arg(long, help = "Exit with non-zero code on partial conversions")]
        strict: bool,

        /// Use sequential record ids
        #[arg(long, help = "Number records 1, 2, 3... instead of random UUIDs")]
        sequential_ids: bool,
    },

    /// Evaluate a path expression against a document
    Query {
        /// Source document
        #[arg(help = "Path to the XML document")]
        input: PathBuf,

        /// Path expression
        #[arg(help = "Path expression, e.g. //section[code/@code='11450-4']/title")]
        expression: String,
    },

    /// Configuration file management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show version information
    #[command(alias = "ver")]
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Initialize a new configuration file
    Init {
        /// Configuration file format
        #[arg(long, default_value = "toml", help = "Configuration file format")]
        format: ConfigFormat,

        /// Overwrite existing configuration file
        #[arg(long, help = "Overwrite existing configuration file")]
        force: bool,
    },

    /// Show current configuration
    Show,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    /// Pretty-printed bundle JSON
    Json,
    /// One compact JSON line per bundle
    Compact,
    /// Human-readable record summary
    Summary,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ConfigFormat {
    /// TOML configuration format
    Toml,
    /// JSON configuration format
    Json,
}

/// Exit status of a finished command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    /// Conversion finished with accumulated errors under --strict
    Partial,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize colored output
    if cli.no_color || std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    // Initialize tracing based on verbosity
    let directive = match cli.verbose {
        0 => "ccda=info",
        1 => "ccda=debug",
        _ => "ccda=trace",
    };
    ccda_core::init_tracing(directive);

    match run_command(cli) {
        Ok(Status::Success) => ExitCode::SUCCESS,
        Ok(Status::Partial) => ExitCode::from(2),
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run_command(cli: Cli) -> anyhow::Result<Status> {
    match cli.command {
        Some(Commands::Convert {
            input,
            output,
            format,
            strict,
            sequential_ids,
        }) => commands::convert_command(
            &input,
            output.as_deref(),
            format,
            strict,
            sequential_ids,
            cli.config.as_deref(),
        ),

        Some(Commands::Query { input, expression }) => {
            commands::query_command(&input, &expression, cli.config.as_deref())
        }

        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { format, force } => commands::config::init_command(format, force),
            ConfigAction::Show => commands::config::show_command(cli.config.as_deref()),
        },

        Some(Commands::Version) => {
            println!("ccda {}", ccda_core::VERSION);
            Ok(Status::Success)
        }

        None => {
            // No subcommand provided, show help
            let mut cmd = Cli::command();
            cmd.print_help()?;
            Ok(Status::Success)
        }
    }
}
