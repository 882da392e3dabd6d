//! Clap derive structures for the `uicc` CLI.
//!
//! Only depends on clap so the build script can render man pages from it.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// uicc -- boot the UICC stack against card images and inspect it
#[derive(Debug, Parser)]
#[command(
    name = "uicc",
    version,
    about = "Inspect SIM/UICC cards through the UICC stack",
    long_about = "Boots the UICC controller against one simulated modem slot per card\n\
        image and reports slot, profile, records and phonebook state.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Card image (TOML or JSON); repeat for more slots
    #[arg(long, short = 'i', global = true)]
    pub image: Vec<PathBuf>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "UICC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', env = "UICC_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Seconds to wait for cards to settle
    #[arg(long, env = "UICC_TIMEOUT", default_value = "10", global = true)]
    pub timeout: u64,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Slots, cards and profile state for every phone
    #[command(alias = "st")]
    Status,

    /// Records loaded from the current application
    #[command(alias = "rec")]
    Records(PhoneArgs),

    /// Phonebook entries held by the modem
    #[command(alias = "pb")]
    Phonebook(PhoneArgs),

    /// Supply a PIN (or PUK and new PIN) and report the new state
    Unlock(UnlockArgs),

    /// Read or replace the forbidden PLMN list
    Fplmn(FplmnArgs),

    /// Manage the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct PhoneArgs {
    /// Logical modem
    #[arg(long, short = 'p', default_value = "0")]
    pub phone: usize,
}

#[derive(Debug, Args)]
pub struct UnlockArgs {
    #[command(flatten)]
    pub phone: PhoneArgs,

    /// PIN (prompted when omitted)
    #[arg(long)]
    pub pin: Option<String>,

    /// PUK; `--pin` then becomes the new PIN
    #[arg(long)]
    pub puk: Option<String>,
}

#[derive(Debug, Args)]
pub struct FplmnArgs {
    #[command(subcommand)]
    pub command: FplmnCommand,
}

#[derive(Debug, Subcommand)]
pub enum FplmnCommand {
    /// Read EF_FPLMN
    Get(PhoneArgs),

    /// Write EF_FPLMN; unused entries are cleared
    Set {
        #[command(flatten)]
        phone: PhoneArgs,

        /// MCC+MNC values, e.g. 310260
        plmns: Vec<String>,
    },
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display the resolved configuration
    Show,

    /// Print the config file path
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
