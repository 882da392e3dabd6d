mod cli;
mod commands;
mod error;
mod output;
mod session;

use clap::{CommandFactory, Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use uicc_config::Config;

use crate::cli::{Cli, ColorMode, Command, GlobalOpts, OutputFormat};
use crate::commands::Ctx;
use crate::error::CliError;
use crate::session::Session;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let global = &cli.global;
    let path = global.config.clone().unwrap_or_else(uicc_config::config_path);
    let cfg = uicc_config::load_config_from(&path)?;
    let ctx = resolve_ctx(global, &cfg)?;

    match cli.command {
        // Neither needs a card.
        Command::Config(args) => commands::config_cmd::handle(&args, &path, &cfg, &ctx),
        Command::Completions(args) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "uicc", &mut std::io::stdout());
            Ok(())
        }

        cmd => {
            let mut session = Session::boot(global, &cfg)?;
            tracing::debug!(command = ?cmd, "dispatching command");
            let result = commands::dispatch(cmd, &mut session, &ctx).await;
            session.shutdown().await;
            result
        }
    }
}

/// Flags win over the `[defaults]` table.
fn resolve_ctx(global: &GlobalOpts, cfg: &Config) -> Result<Ctx, CliError> {
    let format = match global.output {
        Some(format) => format,
        None => parse_default::<OutputFormat>("defaults.output", &cfg.defaults.output)?,
    };
    let color = match global.color {
        ColorMode::Auto => parse_default::<ColorMode>("defaults.color", &cfg.defaults.color)?,
        explicit => explicit,
    };
    Ok(Ctx {
        format,
        color: output::should_color(color),
        quiet: global.quiet,
    })
}

fn parse_default<T: ValueEnum>(field: &str, value: &str) -> Result<T, CliError> {
    T::from_str(value, true).map_err(|reason| CliError::Validation {
        field: field.into(),
        reason,
    })
}
