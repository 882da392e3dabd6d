//! `uicc status`: one row per phone.

use std::sync::Arc;

use serde::Serialize;
use tabled::Tabled;
use uicc_core::{ProfileSnapshot, ProfileState, SlotSnapshot};

use crate::error::CliError;
use crate::output;
use crate::session::Session;

use super::Ctx;

#[derive(Debug, Serialize)]
struct PhoneStatus {
    phone_id: usize,
    slot: Option<Arc<SlotSnapshot>>,
    profile: Option<Arc<ProfileSnapshot>>,
}

impl PhoneStatus {
    fn state(&self) -> ProfileState {
        self.profile
            .as_ref()
            .map_or(ProfileState::Absent, |p| p.state)
    }
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Phone")]
    phone: usize,
    #[tabled(rename = "Slot")]
    slot: String,
    #[tabled(rename = "Card")]
    card: String,
    #[tabled(rename = "ICCID")]
    iccid: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Apps")]
    apps: String,
}

fn row(status: &PhoneStatus, color: bool) -> StatusRow {
    let slot = status.slot.as_deref();
    let profile = status.profile.as_deref();
    StatusRow {
        phone: status.phone_id,
        slot: slot.map(|s| s.index.to_string()).unwrap_or_default(),
        card: slot
            .and_then(|s| s.card_state)
            .map(|state| state.to_string())
            .unwrap_or_default(),
        iccid: profile.and_then(|p| p.iccid.clone()).unwrap_or_default(),
        state: output::paint_state(status.state(), color),
        apps: profile
            .map(|p| {
                p.applications
                    .iter()
                    .map(|a| a.app_type.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default(),
    }
}

pub async fn handle(session: &mut Session, ctx: &Ctx) -> Result<(), CliError> {
    let mut all = Vec::new();
    for phone_id in 0..session.controller.num_phones() {
        let profile = session.settle(phone_id).await?;
        all.push(PhoneStatus {
            phone_id,
            slot: session.controller.slot_for_phone(phone_id).map(|s| s.snapshot()),
            profile: profile.map(|p| p.snapshot()),
        });
    }

    let out = output::render_list(
        ctx.format,
        &all,
        |s| row(s, ctx.color),
        |s| format!("{} {}", s.phone_id, s.state()),
    )?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}
