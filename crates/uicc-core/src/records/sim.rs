// ── SIM / USIM records ──
//
// Batches and parse steps for the 3GPP file layout (TS 51.011,
// TS 31.102, CPHS 4.2).

use tracing::{debug, info, warn};
use uicc_ril::AppType;
use uicc_ril::ef::{
    EF_AD, EF_CFF_CPHS, EF_CFIS, EF_CSP_CPHS, EF_EHPLMN, EF_FDN, EF_FPLMN, EF_GID1, EF_GID2,
    EF_HPLMN_W_ACT, EF_ICCID, EF_IMSI, EF_INFO_CPHS, EF_LI, EF_MAILBOX_CPHS, EF_MBDN, EF_MBI,
    EF_MSISDN, EF_MWIS, EF_OPL, EF_OPLMN_W_ACT, EF_PL, EF_PLMN_W_ACT, EF_PNN, EF_SMS, EF_SPDI,
    EF_SPN, EF_SPN_CPHS, EF_SPN_SHORT_CPHS, EF_SST, EF_VOICE_MAIL_INDICATOR_CPHS,
};

use super::RecordsEvent;
use super::actor::{LockedReason, Payload, Read, RecordsActor, SpnSource, Step};
use super::snapshot::SpnDisplayCondition;
use crate::adn_cache::extension_ef;
use crate::codec::adn::AdnRecord;
use crate::codec::bcd::{bcd_to_hex_string, bcd_to_string, imsi_from_ef};
use crate::codec::opl::decode_opl_records;
use crate::codec::plmn::{decode_plmn_act_list, decode_plmn_list, decode_spdi};
use crate::codec::pnn::PnnRecord;
use crate::codec::text::adn_alpha_to_string;

/// EF_AD byte holding the MNC length.
const AD_MNC_OFFSET: usize = 3;
/// CSP service group carrying the PLMN-mode bit.
const CSP_VALUE_ADDED_SERVICES: u8 = 0xC0;
const CSP_PLMN_MODE: u8 = 0x80;
/// SMS status "received, unread".
const SMS_STATUS_UNREAD: u8 = 0x03;
const CPHS_INDICATOR_SET: u8 = 0x0A;
const CPHS_INDICATOR_CLEAR: u8 = 0x05;

/// EF_ICCID: the decimal ICCID and the raw nibble form.
pub(super) fn parse_iccid(actor: &mut RecordsActor, data: Option<Vec<u8>>) {
    let Some(data) = data else { return };
    let iccid = bcd_to_string(&data);
    actor.snap.full_iccid = Some(bcd_to_hex_string(&data));
    actor.snap.iccid = (!iccid.is_empty()).then_some(iccid);
}

impl RecordsActor {
    pub(super) fn fetch_sim_records(&mut self) {
        info!(phone_id = self.ctx.phone_id, app_type = %self.ctx.app_type, "fetching SIM records");
        let app_type = self.ctx.app_type;

        self.load(Step::Iccid, Read::Transparent(EF_ICCID));
        self.load(Step::Imsi, Read::Transparent(EF_IMSI));
        self.load(Step::Ad, Read::Transparent(EF_AD));
        self.load(
            Step::Msisdn,
            Read::Adn {
                ef: EF_MSISDN,
                ext: extension_ef(EF_MSISDN, app_type),
                record: 1,
            },
        );
        self.load(Step::Mbi, Read::Record(EF_MBI, 1));
        self.load(Step::Mwis, Read::Record(EF_MWIS, 1));
        self.load(Step::CphsVmi, Read::Transparent(EF_VOICE_MAIL_INDICATOR_CPHS));
        self.load(Step::Cfis, Read::Record(EF_CFIS, 1));
        self.load(Step::Cff, Read::Transparent(EF_CFF_CPHS));
        self.load(Step::Spn(SpnSource::Gsm), Read::Transparent(EF_SPN));
        self.load(Step::Spdi, Read::Transparent(EF_SPDI));
        self.load(Step::Pnn, Read::AllRecords(EF_PNN));
        self.load(Step::Opl, Read::AllRecords(EF_OPL));
        self.load(Step::CphsInfo, Read::Transparent(EF_INFO_CPHS));
        self.load(Step::Csp, Read::Transparent(EF_CSP_CPHS));
        self.load(Step::Gid1, Read::Transparent(EF_GID1));
        self.load(Step::Gid2, Read::Transparent(EF_GID2));
        self.load(Step::PlmnAct, Read::Transparent(EF_PLMN_W_ACT));
        self.load(Step::OplmnAct, Read::Transparent(EF_OPLMN_W_ACT));
        self.load(Step::HplmnAct, Read::Transparent(EF_HPLMN_W_ACT));
        self.load(Step::Ehplmn, Read::Transparent(EF_EHPLMN));
        self.load(Step::Fplmn, Read::Transparent(EF_FPLMN));
        self.load(Step::Sst, Read::Transparent(EF_SST));
        self.load_li_pl();
    }

    pub(super) fn fetch_sim_locked(&mut self, reason: LockedReason) {
        info!(phone_id = self.ctx.phone_id, ?reason, "fetching locked SIM records");
        self.load(Step::Iccid, Read::Transparent(EF_ICCID));
        self.load_li_pl();
        if reason == LockedReason::NetworkLocked {
            self.load(Step::Imsi, Read::Transparent(EF_IMSI));
            self.load(Step::Gid1, Read::Transparent(EF_GID1));
            self.load(Step::Gid2, Read::Transparent(EF_GID2));
        }
    }

    /// Language files are only read from a USIM.
    fn load_li_pl(&mut self) {
        if self.ctx.app_type != AppType::Usim {
            return;
        }
        self.raw.li_done = false;
        self.raw.pl_done = false;
        self.load(Step::Li, Read::Transparent(EF_LI));
        self.load(Step::Pl, Read::Transparent(EF_PL));
    }

    fn load_cphs_mailbox(&mut self) {
        self.load(
            Step::CphsMailbox,
            Read::Adn {
                ef: EF_MAILBOX_CPHS,
                ext: extension_ef(EF_MAILBOX_CPHS, self.ctx.app_type),
                record: 1,
            },
        );
    }

    fn load_mbdn(&mut self, index: u8) {
        self.load(
            Step::Mbdn,
            Read::Adn {
                ef: EF_MBDN,
                ext: extension_ef(EF_MBDN, self.ctx.app_type),
                record: index,
            },
        );
    }

    pub(super) fn load_sms(&mut self, record: u8) {
        self.load_uncounted(Step::Sms(record), Read::Record(EF_SMS, record));
    }

    // ── Parsing ──────────────────────────────────────────────────────

    pub(super) fn on_sim_loaded(&mut self, step: Step, payload: Option<Payload>) {
        match step {
            Step::Iccid => parse_iccid(self, Payload::bytes(payload)),
            Step::Imsi => {
                let Some(data) = Payload::bytes(payload) else { return };
                match imsi_from_ef(&data) {
                    Ok(imsi) => self.set_imsi(imsi),
                    Err(e) => warn!(phone_id = self.ctx.phone_id, error = %e, "invalid EF_IMSI"),
                }
            }
            Step::Ad => {
                let mnc = Payload::bytes(payload)
                    .and_then(|data| data.get(AD_MNC_OFFSET).map(|b| usize::from(b & 0x0F)))
                    .filter(|len| matches!(len, 2 | 3));
                self.raw.ad_mnc = mnc;
                if mnc.is_some() {
                    self.snap.mnc_length = mnc;
                }
                self.update_operator();
            }
            Step::Msisdn => {
                if let Some(adn) = Payload::adn(payload) {
                    self.snap.msisdn = non_empty(adn.number);
                    self.snap.msisdn_tag = non_empty(adn.alpha_tag);
                }
            }
            Step::Mbi => {
                let index = Payload::bytes(payload)
                    .and_then(|data| data.first().copied())
                    .filter(|&i| i != 0 && i != 0xFF);
                self.raw.mailbox_index = index;
                match index {
                    Some(index) => self.load_mbdn(index),
                    None => self.load_cphs_mailbox(),
                }
            }
            Step::Mbdn => match Payload::adn(payload) {
                Some(adn) if !adn.is_empty() => self.set_voicemail_from(adn),
                _ => self.load_cphs_mailbox(),
            },
            Step::CphsMailbox => {
                if let Some(adn) = Payload::adn(payload) {
                    self.set_voicemail_from(adn);
                }
            }
            Step::Mwis => self.parse_mwis(Payload::bytes(payload)),
            Step::CphsVmi => self.parse_cphs_vmi(Payload::bytes(payload)),
            Step::Cfis => self.parse_cfis(Payload::bytes(payload)),
            Step::Cff => self.parse_cff(Payload::bytes(payload)),
            Step::Spn(source) => self.parse_spn(source, Payload::bytes(payload)),
            Step::Spdi => {
                if let Some(data) = Payload::bytes(payload) {
                    self.snap.spdi = decode_spdi(&data);
                }
            }
            Step::Pnn => {
                if let Some(records) = Payload::records(payload) {
                    let pnn: Vec<PnnRecord> =
                        records.iter().map(|r| PnnRecord::decode(r)).collect();
                    self.snap.pnn_home_name =
                        pnn.first().and_then(PnnRecord::name).map(str::to_owned);
                    self.snap.pnn = pnn;
                }
            }
            Step::Opl => {
                if let Some(records) = Payload::records(payload) {
                    self.snap.opl = decode_opl_records(&records);
                }
            }
            Step::CphsInfo => self.raw.cphs_info = Payload::bytes(payload),
            Step::Csp => {
                if let Some(data) = Payload::bytes(payload) {
                    self.parse_csp(&data);
                }
            }
            Step::Gid1 => self.snap.gid1 = Payload::bytes(payload).map(hex::encode),
            Step::Gid2 => self.snap.gid2 = Payload::bytes(payload).map(hex::encode),
            Step::PlmnAct => {
                self.snap.plmn_act = decode_or_empty(payload, decode_plmn_act_list);
            }
            Step::OplmnAct => {
                self.snap.oplmn_act = decode_or_empty(payload, decode_plmn_act_list);
            }
            Step::HplmnAct => {
                self.snap.hplmn_act = decode_or_empty(payload, decode_plmn_act_list);
            }
            Step::Ehplmn => self.snap.ehplmns = decode_or_empty(payload, decode_plmn_list),
            Step::Fplmn => self.snap.fplmns = decode_or_empty(payload, decode_plmn_list),
            Step::Sst => self.snap.service_table = Payload::bytes(payload).map(hex::encode),
            Step::Li => {
                self.raw.li = Payload::bytes(payload);
                self.raw.li_done = true;
                self.update_language();
            }
            Step::Pl => {
                self.raw.pl = Payload::bytes(payload);
                self.raw.pl_done = true;
                self.update_language();
            }
            Step::Sms(record) => self.parse_sms(record, Payload::bytes(payload)),
            other => debug!(phone_id = self.ctx.phone_id, step = ?other, "step not used by SIM records"),
        }
    }

    fn set_voicemail_from(&mut self, adn: AdnRecord) {
        self.snap.voicemail_number = non_empty(adn.number);
        self.snap.voicemail_tag = non_empty(adn.alpha_tag);
    }

    fn parse_spn(&mut self, source: SpnSource, data: Option<Vec<u8>>) {
        let (name, condition) = match (source, data.as_deref()) {
            (SpnSource::Gsm, Some([condition, name @ ..])) => {
                (adn_alpha_to_string(name), spn_display_condition(*condition))
            }
            (SpnSource::Cphs | SpnSource::ShortCphs, Some(name)) => (
                adn_alpha_to_string(name),
                SpnDisplayCondition::NOT_ROAMING_ONLY,
            ),
            _ => (String::new(), SpnDisplayCondition::empty()),
        };
        if !name.is_empty() {
            debug!(phone_id = self.ctx.phone_id, ?source, spn = %name, "SPN read");
            self.snap.spn = Some(name.clone());
            self.snap.spn_display_condition = condition;
            self.emit(RecordsEvent::SpnUpdated { spn: name });
            return;
        }
        match source {
            SpnSource::Gsm => self.load(
                Step::Spn(SpnSource::Cphs),
                Read::Transparent(EF_SPN_CPHS),
            ),
            SpnSource::Cphs => self.load(
                Step::Spn(SpnSource::ShortCphs),
                Read::Transparent(EF_SPN_SHORT_CPHS),
            ),
            SpnSource::ShortCphs => {
                debug!(phone_id = self.ctx.phone_id, "no service provider name on card");
            }
        }
    }

    fn parse_mwis(&mut self, data: Option<Vec<u8>>) {
        let Some(data) = data.filter(|d| d.len() >= 2 && d[0] != 0xFF) else {
            return;
        };
        let waiting = data[0] & 0x01 != 0;
        let count = i32::from(data[1]);
        self.snap.voice_message_count = Some(match (waiting, count) {
            (false, _) => 0,
            (true, 0) => -1,
            (true, n) => n,
        });
        self.raw.mwis = Some(data);
    }

    /// CPHS indicator; only used while EF_MWIS is absent.
    fn parse_cphs_vmi(&mut self, data: Option<Vec<u8>>) {
        let Some(data) = data.filter(|d| !d.is_empty()) else {
            return;
        };
        if self.raw.mwis.is_none() {
            match data[0] & 0x0F {
                CPHS_INDICATOR_SET => self.snap.voice_message_count = Some(-1),
                CPHS_INDICATOR_CLEAR => self.snap.voice_message_count = Some(0),
                _ => {}
            }
        }
        self.raw.vmi = Some(data);
    }

    fn parse_cfis(&mut self, data: Option<Vec<u8>>) {
        // Byte 0 is the MSP number, 1..=4.
        let Some(data) = data.filter(|d| d.len() >= 2 && (1..=4).contains(&d[0])) else {
            return;
        };
        self.snap.call_forwarding_enabled = Some(data[1] & 0x01 != 0);
        self.raw.cfis = Some(data);
    }

    /// CPHS call-forwarding flags; only used while EF_CFIS is absent.
    fn parse_cff(&mut self, data: Option<Vec<u8>>) {
        let Some(data) = data.filter(|d| !d.is_empty()) else {
            return;
        };
        if self.raw.cfis.is_none() {
            match data[0] & 0x0F {
                CPHS_INDICATOR_SET => self.snap.call_forwarding_enabled = Some(true),
                CPHS_INDICATOR_CLEAR => self.snap.call_forwarding_enabled = Some(false),
                _ => {}
            }
        }
        self.raw.cff = Some(data);
    }

    fn parse_csp(&mut self, data: &[u8]) {
        let Some(services) = data
            .chunks_exact(2)
            .find(|group| group[0] == CSP_VALUE_ADDED_SERVICES)
            .map(|group| group[1])
        else {
            debug!(phone_id = self.ctx.phone_id, "CSP has no value-added services group");
            return;
        };
        let enabled = services & CSP_PLMN_MODE != 0;
        self.snap.csp_plmn_enabled = enabled;
        if !enabled {
            info!(phone_id = self.ctx.phone_id, "CSP forbids manual network selection");
            self.emit(RecordsEvent::NetworkSelectionModeAutomatic);
        }
    }

    fn parse_sms(&mut self, record: u8, data: Option<Vec<u8>>) {
        let Some((&status, pdu)) = data.as_deref().and_then(<[u8]>::split_first) else {
            return;
        };
        if status & 0x07 == SMS_STATUS_UNREAD {
            debug!(phone_id = self.ctx.phone_id, record, "unread SMS on card");
            self.emit(RecordsEvent::NewSms {
                record,
                pdu: pdu.to_vec(),
            });
        }
    }

    // ── Refresh ──────────────────────────────────────────────────────

    pub(super) fn on_sim_file_update(&mut self, ef: Option<u16>) {
        match ef {
            Some(EF_MBDN) => match self.raw.mailbox_index {
                Some(index) => self.load_mbdn(index),
                None => self.load_cphs_mailbox(),
            },
            Some(EF_MAILBOX_CPHS) => self.load_cphs_mailbox(),
            Some(EF_CSP_CPHS) => self.load(Step::Csp, Read::Transparent(EF_CSP_CPHS)),
            Some(EF_FDN) => {
                self.adn_cache.reset();
                self.emit(RecordsEvent::FdnChanged);
            }
            Some(EF_MSISDN) => self.load(
                Step::Msisdn,
                Read::Adn {
                    ef: EF_MSISDN,
                    ext: extension_ef(EF_MSISDN, self.ctx.app_type),
                    record: 1,
                },
            ),
            Some(EF_CFIS | EF_CFF_CPHS) => {
                self.raw.cfis = None;
                self.raw.cff = None;
                self.load(Step::Cfis, Read::Record(EF_CFIS, 1));
                self.load(Step::Cff, Read::Transparent(EF_CFF_CPHS));
            }
            _ => self.reload(),
        }
    }
}

/// EF_SPN byte 0: bit 1 set means the PLMN must be shown on the home
/// network; bit 2 clear means the SPN must be shown while roaming.
fn spn_display_condition(byte: u8) -> SpnDisplayCondition {
    let mut condition = SpnDisplayCondition::empty();
    if byte & 0x01 != 0 {
        condition |= SpnDisplayCondition::PLMN;
    }
    if byte & 0x02 == 0 {
        condition |= SpnDisplayCondition::SPN;
    }
    condition
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

fn decode_or_empty<T>(payload: Option<Payload>, decode: fn(&[u8]) -> Vec<T>) -> Vec<T> {
    Payload::bytes(payload)
        .map(|data| decode(&data))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spn_condition_bits() {
        assert_eq!(spn_display_condition(0x00), SpnDisplayCondition::SPN);
        assert_eq!(
            spn_display_condition(0x01),
            SpnDisplayCondition::PLMN | SpnDisplayCondition::SPN
        );
        assert_eq!(spn_display_condition(0x02), SpnDisplayCondition::empty());
    }
}
