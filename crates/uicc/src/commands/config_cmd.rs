//! `uicc config`: inspect or create the config file.

use std::path::Path;

use uicc_config::{Config, ConfigError};

use crate::cli::{ConfigArgs, ConfigCommand, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::Ctx;

pub fn handle(args: &ConfigArgs, path: &Path, cfg: &Config, ctx: &Ctx) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), ctx.quiet);
        }

        ConfigCommand::Show => {
            // The table view is the file itself.
            let out = if ctx.format == OutputFormat::Table {
                toml::to_string_pretty(cfg)
                    .map_err(|e| CliError::Config(ConfigError::Serialization(e)))?
            } else {
                output::render_single(ctx.format, cfg, |_| String::new(), |c| {
                    c.images
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join("\n")
                })?
            };
            output::print_output(&out, ctx.quiet);
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::Validation {
                    field: "config".into(),
                    reason: format!("{} already exists (use --force)", path.display()),
                });
            }
            uicc_config::save_config_to(&Config::default(), path)?;
            if !ctx.quiet {
                eprintln!("Wrote {}", path.display());
            }
        }
    }
    Ok(())
}
