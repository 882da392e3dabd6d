// ── Record writes ──
//
// Writes are prepared on the actor from the raw files it holds, run as
// spawned tasks, and applied to the snapshot once the card accepted them.

use tracing::{info, warn};
use uicc_ril::ef::{
    EF_CFF_CPHS, EF_CFIS, EF_FPLMN, EF_MAILBOX_CPHS, EF_MBDN, EF_MSISDN, EF_MWIS,
    EF_VOICE_MAIL_INDICATOR_CPHS,
};

use super::actor::{Msg, PendingFplmn, RecordsActor, Reply, Written};
use crate::adn_cache::update_adn;
use crate::codec::adn::AdnRecord;
use crate::codec::bcd::number_to_called_party;
use crate::codec::plmn::{PLMN_BYTES, decode_plmn_list, encode_plmn_list};
use crate::error::UiccError;
use crate::file_handler::IccFileHandler;

// EF_CFIS layout (TS 31.102 4.2.64).
const CFIS_STATUS: usize = 1;
const CFIS_BCD_LENGTH: usize = 2;
const CFIS_TON_NPI: usize = 3;
const CFIS_CAPABILITY_ID: usize = 14;
const CFIS_EXTENSION_ID: usize = 15;
const CFIS_MIN_LEN: usize = 16;
/// TON/NPI plus ten digit octets.
const CFIS_MAX_NUMBER_BYTES: usize = 11;

/// CPHS mailbox number is present and enabled (EF_INFO_CPHS byte 1).
const CPHS_MAILBOX_ENABLED: u8 = 0x30;
const CPHS_SET: u8 = 0x0A;
const CPHS_CLEAR: u8 = 0x05;

impl RecordsActor {
    fn spawn_write<F>(&self, write: Written, reply: Reply<()>, task: F)
    where
        F: Future<Output = Result<(), UiccError>> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = task.await;
            let _ = tx.send(Msg::Written {
                write,
                result,
                reply,
            });
        });
    }

    pub(super) fn set_msisdn(&mut self, adn: AdnRecord, reply: Reply<()>) {
        let fh = self.ctx.fh.clone();
        let record = adn.clone();
        self.spawn_write(Written::Msisdn(adn), reply, async move {
            update_adn(&fh, &record, EF_MSISDN, 1, None).await
        });
    }

    pub(super) fn set_voicemail(&mut self, adn: AdnRecord, reply: Reply<()>) {
        if self.snap.voicemail_fixed {
            let _ = reply.send(Err(UiccError::VoicemailFixed));
            return;
        }
        let mbdn = self.raw.mailbox_index;
        let cphs = self
            .raw
            .cphs_info
            .as_ref()
            .and_then(|info| info.get(1))
            .is_some_and(|b| b & CPHS_MAILBOX_ENABLED == CPHS_MAILBOX_ENABLED);
        if mbdn.is_none() && !cphs {
            let _ = reply.send(Err(UiccError::VoicemailUnsupported));
            return;
        }

        let fh = self.ctx.fh.clone();
        let record = adn.clone();
        let phone_id = self.ctx.phone_id;
        self.spawn_write(Written::Voicemail(adn), reply, async move {
            let mut targets = Vec::with_capacity(2);
            if let Some(index) = mbdn {
                targets.push((EF_MBDN, index));
            }
            if cphs {
                targets.push((EF_MAILBOX_CPHS, 1));
            }
            let mut written = false;
            let mut last_error = None;
            for (ef, index) in targets {
                match update_adn(&fh, &record, ef, index, None).await {
                    Ok(()) => written = true,
                    Err(e) => {
                        warn!(phone_id, ef = format_args!("{ef:04X}"), error = %e, "voicemail write failed");
                        last_error = Some(e);
                    }
                }
            }
            match (written, last_error) {
                (true, _) => Ok(()),
                (false, Some(e)) => Err(e),
                (false, None) => Err(UiccError::VoicemailUnsupported),
            }
        });
    }

    pub(super) fn set_call_forwarding(
        &mut self,
        enable: bool,
        number: Option<&str>,
        reply: Reply<()>,
    ) {
        let cfis = match self.raw.cfis.clone().map(|cfis| patch_cfis(cfis, enable, number)) {
            Some(Err(e)) => {
                let _ = reply.send(Err(e));
                return;
            }
            Some(Ok(cfis)) => Some(cfis),
            None => None,
        };
        let cff = self.raw.cff.clone().map(|mut cff| {
            cff[0] = (cff[0] & 0xF0) | if enable { CPHS_SET } else { CPHS_CLEAR };
            cff
        });
        if cfis.is_none() && cff.is_none() {
            let _ = reply.send(Err(UiccError::NotReady {
                what: "call forwarding files",
            }));
            return;
        }

        let fh = self.ctx.fh.clone();
        let (cfis_data, cff_data) = (cfis.clone(), cff.clone());
        self.spawn_write(
            Written::CallForwarding { enable, cfis, cff },
            reply,
            async move {
                if let Some(data) = cfis_data {
                    fh.update_linear_record(EF_CFIS, 1, data, None).await?;
                }
                if let Some(data) = cff_data {
                    fh.update_transparent(EF_CFF_CPHS, &data).await?;
                }
                Ok(())
            },
        );
    }

    pub(super) fn set_message_waiting(&mut self, count: i32, reply: Reply<()>) {
        let waiting = count != 0;
        let mwis = self.raw.mwis.clone().map(|mut mwis| {
            mwis[0] = (mwis[0] & 0xFE) | u8::from(waiting);
            mwis[1] = u8::try_from(count.max(0)).unwrap_or(u8::MAX);
            mwis
        });
        let vmi = self.raw.vmi.clone().map(|mut vmi| {
            vmi[0] = (vmi[0] & 0xF0) | if waiting { CPHS_SET } else { CPHS_CLEAR };
            vmi
        });
        if mwis.is_none() && vmi.is_none() {
            let _ = reply.send(Err(UiccError::NotReady {
                what: "message waiting files",
            }));
            return;
        }

        let fh = self.ctx.fh.clone();
        let (mwis_data, vmi_data) = (mwis.clone(), vmi.clone());
        self.spawn_write(
            Written::MessageWaiting { count, mwis, vmi },
            reply,
            async move {
                if let Some(data) = mwis_data {
                    fh.update_linear_record(EF_MWIS, 1, data, None).await?;
                }
                if let Some(data) = vmi_data {
                    fh.update_transparent(EF_VOICE_MAIL_INDICATOR_CPHS, &data)
                        .await?;
                }
                Ok(())
            },
        );
    }

    pub(super) fn on_written(
        &mut self,
        write: Written,
        result: Result<(), UiccError>,
        reply: Reply<()>,
    ) {
        if result.is_ok() {
            match write {
                Written::Msisdn(adn) => {
                    self.snap.msisdn = Some(adn.number).filter(|n| !n.is_empty());
                    self.snap.msisdn_tag = Some(adn.alpha_tag).filter(|t| !t.is_empty());
                }
                Written::Voicemail(adn) => {
                    self.snap.voicemail_number = Some(adn.number).filter(|n| !n.is_empty());
                    self.snap.voicemail_tag = Some(adn.alpha_tag).filter(|t| !t.is_empty());
                }
                Written::CallForwarding { enable, cfis, cff } => {
                    self.snap.call_forwarding_enabled = Some(enable);
                    self.raw.cfis = cfis.or(self.raw.cfis.take());
                    self.raw.cff = cff.or(self.raw.cff.take());
                }
                Written::MessageWaiting { count, mwis, vmi } => {
                    self.snap.voice_message_count = Some(count);
                    self.raw.mwis = mwis.or(self.raw.mwis.take());
                    self.raw.vmi = vmi.or(self.raw.vmi.take());
                }
            }
        }
        let _ = reply.send(result);
    }

    // ── Forbidden PLMNs ──────────────────────────────────────────────

    pub(super) fn read_fplmn(&mut self, id: i32) {
        let fh = self.ctx.fh.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = fh
                .load_transparent(EF_FPLMN)
                .await
                .map(|data| decode_plmn_list(&data));
            let _ = tx.send(Msg::FplmnDone { id, result });
        });
    }

    pub(super) fn write_fplmn(&mut self, id: i32, plmns: Vec<String>) {
        let fh = self.ctx.fh.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = write_fplmn_file(&fh, plmns).await;
            let _ = tx.send(Msg::FplmnDone { id, result });
        });
    }

    pub(super) fn on_fplmn_done(&mut self, id: i32, result: Result<Vec<String>, UiccError>) {
        let Some((_, pending)) = self.transactions.remove(&id) else {
            warn!(phone_id = self.ctx.phone_id, id, "FPLMN completion without a transaction");
            return;
        };
        match (pending, result) {
            (pending, Err(e)) => pending.fail(e),
            (PendingFplmn::Get(reply), Ok(plmns)) => {
                self.snap.fplmns.clone_from(&plmns);
                let _ = reply.send(Ok(plmns));
            }
            (PendingFplmn::Set(reply), Ok(plmns)) => {
                info!(phone_id = self.ctx.phone_id, count = plmns.len(), "forbidden PLMNs written");
                let count = plmns.len();
                if self.snap.loaded {
                    self.snap.fplmns = plmns;
                }
                let _ = reply.send(Ok(count));
            }
        }
    }
}

/// Apply the enable bit and, when enabling with a number, the
/// forwarded-to number to an EF_CFIS record.
fn patch_cfis(mut cfis: Vec<u8>, enable: bool, number: Option<&str>) -> Result<Vec<u8>, UiccError> {
    if let Some(status) = cfis.get_mut(CFIS_STATUS) {
        if enable {
            *status |= 0x01;
        } else {
            *status &= 0xFE;
        }
    }
    let Some(number) = number.filter(|n| enable && !n.is_empty()) else {
        return Ok(cfis);
    };
    if cfis.len() < CFIS_MIN_LEN {
        return Err(UiccError::MalformedResponse {
            ef: EF_CFIS,
            reason: format!("record of {} bytes", cfis.len()),
        });
    }
    let bcd = number_to_called_party(number)?;
    if bcd.len() > CFIS_MAX_NUMBER_BYTES {
        return Err(UiccError::InvalidArgument {
            message: format!("forwarding number of {} digits", number.len()),
        });
    }
    cfis[CFIS_BCD_LENGTH] = u8::try_from(bcd.len()).unwrap_or(u8::MAX);
    cfis[CFIS_TON_NPI..CFIS_TON_NPI + CFIS_MAX_NUMBER_BYTES].fill(0xFF);
    cfis[CFIS_TON_NPI..CFIS_TON_NPI + bcd.len()].copy_from_slice(&bcd);
    cfis[CFIS_CAPABILITY_ID] = 0xFF;
    cfis[CFIS_EXTENSION_ID] = 0xFF;
    Ok(cfis)
}

/// Write as many PLMNs as EF_FPLMN holds; returns the list written.
async fn write_fplmn_file(
    fh: &IccFileHandler,
    mut plmns: Vec<String>,
) -> Result<Vec<String>, UiccError> {
    let size = fh.transparent_size(EF_FPLMN).await?;
    if size % PLMN_BYTES != 0 {
        return Err(UiccError::MalformedResponse {
            ef: EF_FPLMN,
            reason: format!("file size {size} is not a multiple of {PLMN_BYTES}"),
        });
    }
    plmns.truncate(size / PLMN_BYTES);
    let data = encode_plmn_list(&plmns, size)?;
    fh.update_transparent(EF_FPLMN, &data).await?;
    Ok(plmns)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cfis_enable_with_number() {
        let mut cfis = vec![0xFF; 16];
        cfis[0] = 0x01;
        cfis[1] = 0x00;
        let patched = patch_cfis(cfis, true, Some("+12345")).unwrap();
        assert_eq!(patched[1] & 0x01, 0x01);
        assert_eq!(patched[2], 4);
        assert_eq!(&patched[3..7], &[0x91, 0x21, 0x43, 0xF5]);
        assert_eq!(patched[7], 0xFF);
        assert_eq!(patched[15], 0xFF);
    }

    #[test]
    fn cfis_disable_keeps_number() {
        let mut cfis = vec![0x01, 0x01, 0x02, 0x81, 0x21];
        cfis.resize(16, 0xFF);
        let patched = patch_cfis(cfis, false, Some("999")).unwrap();
        assert_eq!(patched[1], 0x00);
        assert_eq!(&patched[2..5], &[0x02, 0x81, 0x21]);
    }

    #[test]
    fn cfis_short_record_rejects_number() {
        assert!(patch_cfis(vec![0x01, 0x00], true, Some("123")).is_err());
        assert_eq!(patch_cfis(vec![0x01, 0x00], true, None).unwrap(), vec![0x01, 0x01]);
    }
}
