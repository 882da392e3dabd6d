//! `uicc fplmn`: read or replace EF_FPLMN.

use crate::cli::{FplmnArgs, FplmnCommand};
use crate::error::CliError;
use crate::output;
use crate::session::Session;

use super::Ctx;

fn validate(plmn: &str) -> Result<(), CliError> {
    if (5..=6).contains(&plmn.len()) && plmn.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(CliError::Validation {
            field: "plmn".into(),
            reason: format!("{plmn:?} is not a 5 or 6 digit MCC+MNC"),
        })
    }
}

pub async fn handle(session: &mut Session, args: FplmnArgs, ctx: &Ctx) -> Result<(), CliError> {
    let (phone, update) = match args.command {
        FplmnCommand::Get(p) => (p.phone, None),
        FplmnCommand::Set { phone, plmns } => {
            plmns.iter().try_for_each(|p| validate(p))?;
            (phone.phone, Some(plmns))
        }
    };

    let profile = session.require_profile(phone).await?;
    let records = profile.records().ok_or_else(|| CliError::NotReady {
        what: "records".into(),
    })?;

    if let Some(plmns) = update {
        let requested = plmns.len();
        let written = records.set_forbidden_plmns(plmns).await?;
        if written < requested {
            tracing::warn!(requested, written, "EF_FPLMN is full; extra entries dropped");
        }
    }

    let plmns = records.get_forbidden_plmns().await?;
    let out = output::render_single(
        ctx.format,
        &plmns,
        |list| {
            if list.is_empty() {
                "(none)".into()
            } else {
                list.join("\n")
            }
        },
        |list| list.join("\n"),
    )?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}
