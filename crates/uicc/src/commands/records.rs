//! `uicc records`: what the current application's records hold.

use uicc_core::RecordsSnapshot;

use crate::error::CliError;
use crate::output;
use crate::session::Session;

use super::Ctx;

fn detail(r: &RecordsSnapshot) -> String {
    let join = |v: &[String]| (!v.is_empty()).then(|| v.join(" "));
    output::detail_table(&[
        ("Application", Some(r.app_type.to_string())),
        ("ICCID", r.iccid.clone()),
        ("IMSI", r.imsi.clone()),
        ("Operator", r.operator_numeric.clone()),
        ("MNC length", r.mnc_length.map(|n| n.to_string())),
        ("MSISDN", r.msisdn.clone()),
        ("MDN", r.mdn.clone()),
        ("SPN", r.spn.clone()),
        ("PNN name", r.pnn_home_name.clone()),
        ("Voicemail", r.voicemail_number.clone()),
        ("Language", r.sim_language.clone()),
        ("GID1", r.gid1.clone()),
        ("EHPLMN", join(&r.ehplmns)),
        ("FPLMN", join(&r.fplmns)),
        ("SPDI", join(&r.spdi)),
        ("Loaded", Some(r.loaded.to_string())),
    ])
}

pub async fn handle(session: &mut Session, phone: usize, ctx: &Ctx) -> Result<(), CliError> {
    let profile = session.require_profile(phone).await?;
    let state = profile.state();
    let records = profile.records().ok_or_else(|| CliError::NotReady {
        what: format!("records (profile is {state})"),
    })?;
    let snap = records.snapshot();
    if !snap.loaded {
        tracing::warn!(%state, "records are only partially loaded");
    }

    let out = output::render_single(ctx.format, snap.as_ref(), detail, |r| {
        r.imsi.clone().unwrap_or_default()
    })?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}
