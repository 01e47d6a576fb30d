use std::io;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use stepwise_core::constants::CONFIG_FILE;
use stepwise_core::{CancellationFlag, ProcessCommandRunner};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod discovery;
mod session;
mod styles;

use session::Session;
use styles as s;

/// The command-line interface for Stepwise.
#[derive(Debug, Parser)]
#[command(name = "stepwise")]
#[command(version)]
#[command(styles = s::get_clap_styles())]
#[command(
    help_template = "{bin} {version}\n\n{about-with-newline}{usage-heading} {usage}\n\n{all-args}{after-help}"
)]
#[command(about = "Layered workflows over pluggable capability providers")]
#[command(
    long_about = "Stepwise resolves named workflows across project, user, system and provider
tiers, layers overlays onto their bases through hook points, and runs the
resulting steps against capability providers and shell commands."
)]
#[command(
    after_help = "\x1b[1;32mExamples:\x1b[0m\n  \x1b[36mstepwise list\x1b[0m                      \x1b[2m# Workflows across all tiers\x1b[0m\n  \x1b[36mstepwise show deploy\x1b[0m               \x1b[2m# Composed step list\x1b[0m\n  \x1b[36mstepwise run deploy --set env=prod\x1b[0m \x1b[2m# Run with an input\x1b[0m\n  \x1b[36mstepwise providers\x1b[0m                 \x1b[2m# Provider readiness\x1b[0m"
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Path to the stepwise config file.
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: String,
    /// Log at debug level.
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a workflow, optionally tier-qualified (`system:release`).
    Run {
        workflow: String,
        /// Seed shared data before the first step; values are parsed as JSON when possible.
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = commands::parse_key_value)]
        inputs: Vec<(String, Value)>,
    },
    /// List workflows of every tier in precedence order.
    List,
    /// Print the composed step list of a workflow.
    Show { workflow: String },
    /// Show which providers are ready and why the others failed.
    Providers,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .init();
    debug!("parsed cli arguments: {:?}", cli);

    let Some(command) = &cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let session = Session::open(&cli.config)?;
    let mut out = io::stdout().lock();

    match command {
        Commands::Run { workflow, inputs } => {
            let cancellation = CancellationFlag::default();
            let handler_flag = cancellation.clone();
            ctrlc::set_handler(move || handler_flag.cancel())
                .context("failed to install Ctrl-C handler")?;

            let runner = ProcessCommandRunner::new();
            let report =
                commands::run(&session, workflow, inputs, cancellation, &runner, &mut out)?;
            if let Some(reason) = report.halt_reason() {
                bail!("workflow '{}' halted at {}", report.workflow, reason);
            }
            Ok(())
        }
        Commands::List => commands::list(&session, &mut out),
        Commands::Show { workflow } => commands::show(&session, workflow, &mut out),
        Commands::Providers => commands::providers(&session, &mut out),
    }
}
