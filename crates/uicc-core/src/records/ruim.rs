// ── RUIM / CSIM records ──
//
// Batches and parse steps for the 3GPP2 layout (C.S0065, C.S0023).

use tracing::{debug, info, warn};
use uicc_ril::ef::{
    EF_CSIM_CDMAHOME, EF_CSIM_EPRL, EF_CSIM_IMSIM, EF_CSIM_LI, EF_CSIM_MDN, EF_CSIM_MIPUPP,
    EF_CSIM_SPN, EF_ICCID, EF_PL,
};

use super::RecordsEvent;
use super::actor::{LockedReason, Payload, Read, RecordsActor, Step};
use super::sim::parse_iccid;
use crate::codec::cdma::{
    csim_li_to_iso, decode_cdma_home, decode_csim_spn, decode_imsi_m, decode_mdn,
    decode_mip_upp_nai, decode_prl_version,
};
use crate::pii::pii;

impl RecordsActor {
    pub(super) fn fetch_ruim_records(&mut self) {
        info!(phone_id = self.ctx.phone_id, app_type = %self.ctx.app_type, "fetching RUIM records");
        self.load(Step::Iccid, Read::Transparent(EF_ICCID));
        self.load_language_files();
        self.load(Step::CsimSpn, Read::Transparent(EF_CSIM_SPN));
        self.load(Step::CsimMdn, Read::Record(EF_CSIM_MDN, 1));
        self.load(Step::CsimImsim, Read::Transparent(EF_CSIM_IMSIM));
        self.load(Step::CdmaHome, Read::AllRecords(EF_CSIM_CDMAHOME));
        self.load(Step::Eprl, Read::Transparent(EF_CSIM_EPRL));
        self.load(Step::MipUpp, Read::Transparent(EF_CSIM_MIPUPP));
    }

    pub(super) fn fetch_ruim_locked(&mut self, reason: LockedReason) {
        info!(phone_id = self.ctx.phone_id, ?reason, "fetching locked RUIM records");
        self.load(Step::Iccid, Read::Transparent(EF_ICCID));
        self.load_language_files();
        if reason == LockedReason::NetworkLocked {
            self.load(Step::CsimImsim, Read::Transparent(EF_CSIM_IMSIM));
        }
    }

    fn load_language_files(&mut self) {
        self.raw.li_done = false;
        self.raw.pl_done = false;
        self.load(Step::Pl, Read::Transparent(EF_PL));
        self.load(Step::CsimLi, Read::Transparent(EF_CSIM_LI));
    }

    pub(super) fn on_ruim_loaded(&mut self, step: Step, payload: Option<Payload>) {
        match step {
            Step::Iccid => parse_iccid(self, Payload::bytes(payload)),
            Step::Pl => {
                self.raw.pl = Payload::bytes(payload);
                self.raw.pl_done = true;
                self.update_language();
            }
            Step::CsimLi => {
                self.raw.li = Payload::bytes(payload).map(|data| csim_li_to_iso(&data));
                self.raw.li_done = true;
                self.update_language();
            }
            Step::CsimSpn => {
                let Some(data) = Payload::bytes(payload) else { return };
                match decode_csim_spn(&data) {
                    Ok(spn) => {
                        self.snap.csim_spn_display = Some(spn.display_condition);
                        if !spn.name.is_empty() {
                            self.snap.spn = Some(spn.name.clone());
                            self.emit(RecordsEvent::SpnUpdated { spn: spn.name });
                        }
                    }
                    Err(e) => warn!(phone_id = self.ctx.phone_id, error = %e, "invalid EF_CSIM_SPN"),
                }
            }
            Step::CsimMdn => {
                self.snap.mdn = Payload::bytes(payload).and_then(|data| decode_mdn(&data));
            }
            Step::CsimImsim => {
                let Some(data) = Payload::bytes(payload) else { return };
                match decode_imsi_m(&data) {
                    Ok(Some(imsi_m)) => {
                        debug!(phone_id = self.ctx.phone_id, min = %pii(&imsi_m.min), "IMSI_M read");
                        self.snap.min = Some(imsi_m.min);
                        self.set_imsi(imsi_m.imsi);
                    }
                    Ok(None) => debug!(phone_id = self.ctx.phone_id, "IMSI_M not provisioned"),
                    Err(e) => warn!(phone_id = self.ctx.phone_id, error = %e, "invalid EF_CSIM_IMSIM"),
                }
            }
            Step::CdmaHome => {
                if let Some(records) = Payload::records(payload) {
                    self.snap.home_systems = decode_cdma_home(&records);
                }
            }
            Step::Eprl => {
                self.snap.prl_version =
                    Payload::bytes(payload).and_then(|data| decode_prl_version(&data));
            }
            Step::MipUpp => {
                self.snap.nai = Payload::bytes(payload).and_then(|data| decode_mip_upp_nai(&data));
            }
            other => debug!(phone_id = self.ctx.phone_id, step = ?other, "step not used by RUIM records"),
        }
    }
}
