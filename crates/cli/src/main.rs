// xrecon - two-table reconciliation from the command line

mod exit_codes;
mod recon;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;

use crossrecon::ReconError;
use exit_codes::{recon_exit_code, EXIT_RUNTIME, EXIT_SUCCESS};

#[derive(Parser)]
#[command(name = "xrecon")]
#[command(about = "Reconcile two tables: map columns, validate keys, count and export differences")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a reconciliation from a TOML config file
    #[command(after_help = "\
Examples:
  xrecon run recon.toml
  xrecon run recon.toml --json
  xrecon run recon.toml --output result.json
  xrecon run recon.toml --out-dir /tmp/reports

Exit codes:
  0 no differences, 1 differences found, 7 approximate (a chunk failed)")]
    Run {
        /// Path to the recon config file
        config: PathBuf,

        /// Output JSON to stdout instead of only the human summary
        #[arg(long)]
        json: bool,

        /// Write JSON output to file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Report directory (overrides report.output_dir)
        #[arg(long, env = "XRECON_OUT_DIR")]
        out_dir: Option<PathBuf>,
    },

    /// Validate a recon config without running
    #[command(after_help = "\
Examples:
  xrecon validate recon.toml")]
    Validate {
        /// Path to the recon config file
        config: PathBuf,
    },

    /// List key candidates and their uniqueness on both sides
    #[command(after_help = "\
Examples:
  xrecon keys recon.toml
  xrecon keys recon.toml --json")]
    Keys {
        /// Path to the recon config file
        config: PathBuf,

        /// Output JSON to stdout
        #[arg(long)]
        json: bool,
    },

    /// Print the resolved right-to-left column mapping
    #[command(after_help = "\
Examples:
  xrecon mapping recon.toml
  xrecon mapping recon.toml --json")]
    Mapping {
        /// Path to the recon config file
        config: PathBuf,

        /// Output JSON to stdout
        #[arg(long)]
        json: bool,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  crossrecon ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("TARGET"),
    )
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Run { config, json, output, out_dir } => recon::cmd_run(config, json, output, out_dir),
        Commands::Validate { config } => recon::cmd_validate(config),
        Commands::Keys { config, json } => recon::cmd_keys(config, json),
        Commands::Mapping { config, json } => recon::cmd_mapping(config, json),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self { code: EXIT_RUNTIME, message: msg.into(), hint: None }
    }

    /// Engine error with its mapped exit code; the suggestion becomes the hint.
    pub fn recon(err: &ReconError) -> Self {
        Self {
            code: recon_exit_code(err),
            message: format!("[{}] {}", err.kind(), err.description()),
            hint: Some(err.suggestion()),
        }
    }

    pub fn with_code(mut self, code: u8) -> Self {
        self.code = code;
        self
    }
}
