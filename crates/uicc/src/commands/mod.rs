//! Command handlers. Each takes the booted [`Session`] and the resolved
//! output settings.

pub mod config_cmd;
pub mod fplmn;
pub mod phonebook;
pub mod records;
pub mod status;
pub mod unlock;

use crate::cli::{Command, OutputFormat};
use crate::error::CliError;
use crate::session::Session;

/// Output settings resolved from flags and the config file.
#[derive(Debug, Clone, Copy)]
pub struct Ctx {
    pub format: OutputFormat,
    pub color: bool,
    pub quiet: bool,
}

pub async fn dispatch(cmd: Command, session: &mut Session, ctx: &Ctx) -> Result<(), CliError> {
    match cmd {
        Command::Status => status::handle(session, ctx).await,
        Command::Records(args) => records::handle(session, args.phone, ctx).await,
        Command::Phonebook(args) => phonebook::handle(session, args.phone, ctx).await,
        Command::Unlock(args) => unlock::handle(session, args, ctx).await,
        Command::Fplmn(args) => fplmn::handle(session, args, ctx).await,
        // Run before a session exists.
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
