#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use commands::CommandResult;
use miette::{IntoDiagnostic, Result};
use modlink_core::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "modlink")]
#[command(author, version, about = "Inspect and run module graphs in a linked workspace", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory (the workspace root)
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Show workspace members, their local links and the build order
    Graph,

    /// Resolve a specifier to a resource identifier
    Resolve {
        /// The specifier to resolve
        specifier: String,

        /// Importing file; defaults to the workspace root
        #[arg(long, value_name = "FILE")]
        from: Option<PathBuf>,

        /// Format of the importing request: "eager-sync" or "async-static"
        #[arg(long, value_parser = ["eager-sync", "async-static"])]
        format: Option<String>,
    },

    /// Load and evaluate a module graph, then print the entry's exports
    Run {
        /// Entry file or specifier
        entry: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::new(cwd.clone())
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    logging::init(config.verbosity, config.json_logs);

    let outcome = match cli.command {
        Some(Commands::Version) | None => commands::version::run(cli.json),
        Some(Commands::Graph) => {
            let span = tracing::info_span!("graph", cmd = "graph", cwd = %cwd.display());
            let _guard = span.enter();
            commands::graph::run(&cwd, cli.json)
        }
        Some(Commands::Resolve {
            specifier,
            from,
            format,
        }) => {
            let span = tracing::info_span!("resolve", cmd = "resolve", cwd = %cwd.display());
            let _guard = span.enter();
            commands::resolve::run(&cwd, &specifier, from.as_deref(), format.as_deref(), cli.json)
        }
        Some(Commands::Run { entry }) => {
            let span = tracing::info_span!("run", cmd = "run", cwd = %cwd.display());
            let _guard = span.enter();
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .into_diagnostic()?;
            runtime.block_on(commands::run::run(&cwd, &entry, cli.json))
        }
    };

    report(outcome, cli.json)
}

/// In `--json` mode a failure is one JSON object on stdout and exit code 1;
/// otherwise it becomes a diagnostic.
fn report(outcome: CommandResult, json: bool) -> Result<()> {
    match outcome {
        Ok(()) => Ok(()),
        Err(failure) if json => {
            println!("{}", failure.to_json());
            std::process::exit(1);
        }
        Err(failure) => Err(miette::miette!(code = failure.code, "{}", failure.message)),
    }
}
