//! `uicc unlock`: supply PIN or PUK and report where the profile ends up.

use secrecy::SecretString;
use uicc_core::{ProfileSnapshot, ProfileState};

use crate::cli::UnlockArgs;
use crate::error::CliError;
use crate::output;
use crate::session::{self, Session};

use super::Ctx;

fn secret(value: Option<String>, prompt: &str) -> Result<SecretString, CliError> {
    let value = match value {
        Some(v) => v,
        None => rpassword::prompt_password(prompt)?,
    };
    if value.is_empty() {
        return Err(CliError::Validation {
            field: "pin".into(),
            reason: "must not be empty".into(),
        });
    }
    Ok(SecretString::from(value))
}

pub async fn handle(session: &mut Session, args: UnlockArgs, ctx: &Ctx) -> Result<(), CliError> {
    let phone = args.phone.phone;
    let profile = session.require_profile(phone).await?;
    let state = profile.state();

    match (state, args.puk) {
        (_, Some(puk)) => {
            let puk = secret(Some(puk), "PUK: ")?;
            let new_pin = secret(args.pin, "New PIN: ")?;
            profile.supply_puk(&puk, &new_pin).await?;
        }
        (ProfileState::PukRequired, None) => return Err(CliError::PukRequired),
        (ProfileState::PinRequired, None) => {
            let pin = secret(args.pin, "PIN: ")?;
            profile.supply_pin(&pin).await?;
        }
        (other, None) => {
            tracing::info!(phone, state = %other, "profile is not PIN locked");
        }
    }

    let snap = session
        .wait_until(&profile, |s| session::is_settled(s) && !s.is_locked())
        .await?;
    let out = output::render_single(ctx.format, snap.as_ref(), |p: &ProfileSnapshot| {
        output::detail_table(&[
            ("Phone", Some(p.phone_id.to_string())),
            ("ICCID", p.iccid.clone()),
            ("State", Some(output::paint_state(p.state, ctx.color))),
        ])
    }, |p| p.state.to_string())?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}
