//! Binary entry point for the idpool administrative CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use idpool::{
    admin::{list_entries, verify, AdminError, VerifyLevel, VerifyReport},
    config::EngineConfig,
    logging::init_logging,
    types::{Entry, NsName},
};

#[derive(Parser, Debug)]
#[command(
    name = "idpool",
    version,
    about = "Offline inspection of idpool state directories",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "IDPOOL_CONFIG",
        value_name = "FILE",
        help = "Config file (defaults to <config dir>/idpool/config.toml)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "State directory; overrides state_dir from the config"
    )]
    state_dir: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Rebuild every pool offline and report what restore would hit")]
    Verify {
        #[arg(
            long,
            value_enum,
            default_value_t = VerifyLevelArg::Full,
            help = "Verification level"
        )]
        level: VerifyLevelArg,
    },

    #[command(about = "List persisted entries")]
    Entries {
        #[arg(long, value_name = "NAMESPACE/NAME", help = "Only entries of this pool")]
        pool: Option<NsName>,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum VerifyLevelArg {
    Fast,
    Full,
}

impl From<VerifyLevelArg> for VerifyLevel {
    fn from(level: VerifyLevelArg) -> Self {
        match level {
            VerifyLevelArg::Fast => VerifyLevel::Fast,
            VerifyLevelArg::Full => VerifyLevel::Full,
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;
    // A subscriber installed by the environment wins.
    let _ = init_logging(&config.log_filter);
    let state_dir = cli
        .state_dir
        .or(config.state_dir)
        .ok_or(AdminError::NoStateDir)?;

    match cli.command {
        Command::Verify { level } => {
            let report = verify(&state_dir, level.into())?;
            emit(&cli.format, &report, |fmt| print_verify_text(fmt, &report))?;
            if !report.success {
                std::process::exit(2);
            }
        }
        Command::Entries { pool } => {
            let entries = list_entries(&state_dir, pool.as_ref())?;
            emit(&cli.format, &entries, |fmt| print_entries_text(fmt, &entries))?;
        }
    }
    Ok(())
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(OutputFormat),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(OutputFormat::Text),
    }
    Ok(())
}

fn print_verify_text(_: OutputFormat, report: &VerifyReport) {
    println!(
        "Verify ({:?}) => success={} pools={} claims={} entries={} failed={} replayed={} orphaned={} drifted={}",
        report.level,
        report.success,
        report.counts.pools_found,
        report.counts.claims_found,
        report.counts.entries_found,
        report.counts.pools_failed,
        report.counts.claims_replayed,
        report.counts.orphaned_entries,
        report.counts.drifted_entries,
    );
    for finding in &report.findings {
        println!("- {:?}: {}", finding.severity, finding.message);
    }
}

fn print_entries_text(_: OutputFormat, entries: &[Entry]) {
    for entry in entries {
        let value = entry
            .value()
            .map(|value| value.to_string())
            .unwrap_or_else(|err| format!("<{err}>"));
        println!(
            "{}  {}  {}  owner={}",
            entry.key(),
            entry.spec.claim_kind,
            value,
            entry.owner_name().unwrap_or("-")
        );
    }
}
