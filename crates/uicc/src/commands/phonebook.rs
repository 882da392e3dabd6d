//! `uicc phonebook`: entries from the modem phonebook cache.

use tabled::Tabled;
use uicc_ril::SimPhonebookRecord;

use crate::error::CliError;
use crate::output;
use crate::session::Session;

use super::Ctx;

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "#")]
    id: u32,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Number")]
    number: String,
    #[tabled(rename = "Email")]
    email: String,
}

impl From<&SimPhonebookRecord> for EntryRow {
    fn from(r: &SimPhonebookRecord) -> Self {
        Self {
            id: r.record_id,
            name: r.alpha_tag.clone(),
            number: r.number.clone(),
            email: r.emails.join(", "),
        }
    }
}

pub async fn handle(session: &mut Session, phone: usize, ctx: &Ctx) -> Result<(), CliError> {
    let profile = session.require_profile(phone).await?;
    let all = profile.phonebook().get_adn_records().await?;
    let used: Vec<&SimPhonebookRecord> = all
        .iter()
        .filter(|r| !r.alpha_tag.is_empty() || !r.number.is_empty())
        .collect();

    let out = output::render_list(
        ctx.format,
        &used,
        |r| EntryRow::from(*r),
        |r| format!("{}\t{}\t{}", r.record_id, r.alpha_tag, r.number),
    )?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}
