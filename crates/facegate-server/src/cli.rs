use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "facegate",
    about = "Face enrollment and verification service with an append-only audit trail",
    version
)]
pub struct Cli {
    /// Emit structured JSON to stdout instead of human-readable output
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase verbosity (may be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Serve the enroll, verify and presign-upload endpoints over HTTP
    Serve(ServeArgs),
    /// Inspect recorded audit events
    #[command(subcommand)]
    Audit(AuditCommands),
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Config file to load instead of the default search paths
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Listen address (overrides FACEGATE_BIND_ADDR and bind_addr)
    #[arg(long)]
    pub bind: Option<String>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum AuditCommands {
    /// List audit events, oldest first within each subject
    List(AuditListArgs),
}

#[derive(Debug, Clone, Args)]
pub struct AuditListArgs {
    /// Config file to load instead of the default search paths
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Only show events for this subject key (e.g. EMP#E100, VERIFY#UNKNOWN)
    #[arg(long)]
    pub subject: Option<String>,

    /// Audit table to read (defaults to the configured DDB_TABLE_NAME)
    #[arg(long)]
    pub table: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    Human,
    Json,
}

impl From<bool> for OutputMode {
    fn from(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from(self.json)
    }
}
