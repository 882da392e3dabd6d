// ── Records snapshot ──
//
// The published view of one application's records. Rebuilt by the
// records actor and sent through a `watch` channel whenever it changes.

use bitflags::bitflags;
use serde::Serialize;
use strum::Display;
use uicc_ril::AppType;

use crate::codec::cdma::HomeSystem;
use crate::codec::opl::OplRecord;
use crate::codec::plmn::PlmnAct;
use crate::codec::pnn::PnnRecord;

/// Which file layout the records are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecordsFamily {
    /// SIM and USIM.
    Sim,
    /// RUIM and CSIM.
    Ruim,
}

impl RecordsFamily {
    pub fn for_app(app_type: AppType) -> Option<Self> {
        match app_type {
            AppType::Sim | AppType::Usim => Some(Self::Sim),
            AppType::Ruim | AppType::Csim => Some(Self::Ruim),
            AppType::Isim | AppType::Unknown => None,
        }
    }
}

bitflags! {
    /// When the SPN and the registered PLMN name should be shown.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
    pub struct SpnDisplayCondition: u8 {
        /// Show the PLMN name even on the home network.
        const PLMN = 0x01;
        /// Show the SPN while roaming.
        const SPN = 0x02;
    }
}

impl SpnDisplayCondition {
    /// CPHS operator names: the SPN is never shown while roaming, and the
    /// PLMN name still is on the home network.
    pub const NOT_ROAMING_ONLY: Self = Self::PLMN;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordsSnapshot {
    pub family: RecordsFamily,
    pub app_type: AppType,

    // ── Identity ──
    pub iccid: Option<String>,
    /// Every ICCID nibble including filler, uppercase hex.
    pub full_iccid: Option<String>,
    pub imsi: Option<String>,
    pub mnc_length: Option<usize>,
    /// MCC + MNC of the home network.
    pub operator_numeric: Option<String>,
    pub gid1: Option<String>,
    pub gid2: Option<String>,

    // ── Numbers ──
    pub msisdn: Option<String>,
    pub msisdn_tag: Option<String>,
    pub voicemail_number: Option<String>,
    pub voicemail_tag: Option<String>,
    pub voicemail_fixed: bool,

    // ── Names ──
    pub spn: Option<String>,
    pub spn_display_condition: SpnDisplayCondition,
    pub spdi: Vec<String>,
    pub pnn_home_name: Option<String>,
    pub pnn: Vec<PnnRecord>,
    pub opl: Vec<OplRecord>,

    // ── Network selection ──
    pub ehplmns: Vec<String>,
    pub fplmns: Vec<String>,
    pub plmn_act: Vec<PlmnAct>,
    pub oplmn_act: Vec<PlmnAct>,
    pub hplmn_act: Vec<PlmnAct>,
    /// CSP "PLMN mode" bit; when false the user may not pick a network.
    pub csp_plmn_enabled: bool,

    // ── Settings ──
    pub sim_language: Option<String>,
    pub call_forwarding_enabled: Option<bool>,
    /// Waiting voice messages; -1 means "some, count unknown".
    pub voice_message_count: Option<i32>,
    /// Raw service table (EF_SST / EF_UST), hex.
    pub service_table: Option<String>,

    // ── 3GPP2 ──
    pub min: Option<String>,
    pub mdn: Option<String>,
    pub home_systems: Vec<HomeSystem>,
    pub prl_version: Option<u16>,
    pub csim_spn_display: Option<bool>,
    pub nai: Option<String>,

    // ── Load state ──
    pub records_to_load: u32,
    pub records_requested: bool,
    pub loaded: bool,
    pub locked_records_loaded: bool,
    pub network_locked_records_loaded: bool,
    pub destroyed: bool,

    #[serde(skip)]
    pub(crate) loaded_generation: u64,
    #[serde(skip)]
    pub(crate) locked_generation: u64,
    #[serde(skip)]
    pub(crate) network_locked_generation: u64,
    #[serde(skip)]
    pub(crate) imsi_generation: u64,
}

impl RecordsSnapshot {
    pub fn new(family: RecordsFamily, app_type: AppType) -> Self {
        Self {
            family,
            app_type,
            iccid: None,
            full_iccid: None,
            imsi: None,
            mnc_length: None,
            operator_numeric: None,
            gid1: None,
            gid2: None,
            msisdn: None,
            msisdn_tag: None,
            voicemail_number: None,
            voicemail_tag: None,
            voicemail_fixed: false,
            spn: None,
            spn_display_condition: SpnDisplayCondition::empty(),
            spdi: Vec::new(),
            pnn_home_name: None,
            pnn: Vec::new(),
            opl: Vec::new(),
            ehplmns: Vec::new(),
            fplmns: Vec::new(),
            plmn_act: Vec::new(),
            oplmn_act: Vec::new(),
            hplmn_act: Vec::new(),
            csp_plmn_enabled: true,
            sim_language: None,
            call_forwarding_enabled: None,
            voice_message_count: None,
            service_table: None,
            min: None,
            mdn: None,
            home_systems: Vec::new(),
            prl_version: None,
            csim_spn_display: None,
            nai: None,
            records_to_load: 0,
            records_requested: false,
            loaded: false,
            locked_records_loaded: false,
            network_locked_records_loaded: false,
            destroyed: false,
            loaded_generation: 0,
            locked_generation: 0,
            network_locked_generation: 0,
            imsi_generation: 0,
        }
    }

    /// Fresh snapshot for the same application, keeping the generation
    /// counters so registrations do not replay old events.
    pub(crate) fn reset(&self) -> Self {
        Self {
            loaded_generation: self.loaded_generation,
            locked_generation: self.locked_generation,
            network_locked_generation: self.network_locked_generation,
            imsi_generation: self.imsi_generation,
            ..Self::new(self.family, self.app_type)
        }
    }

    /// Either locked batch has completed.
    pub fn any_locked_records_loaded(&self) -> bool {
        self.locked_records_loaded || self.network_locked_records_loaded
    }

    /// Network name to show for `plmn` at `lac`: the OPL entry covering it
    /// picks a PNN record; without OPL the first PNN names the home PLMN.
    pub fn network_name_for(&self, plmn: &str, lac: Option<u16>) -> Option<&str> {
        if self.opl.is_empty() {
            return if self.operator_numeric.as_deref() == Some(plmn) {
                self.pnn_home_name.as_deref()
            } else {
                None
            };
        }
        let entry = self.opl.iter().find(|o| o.matches(plmn, lac))?;
        let index = usize::from(entry.pnn_index).checked_sub(1)?;
        self.pnn.get(index).and_then(PnnRecord::name)
    }

    /// Whether `plmn` is listed in EF_SPDI (treated as home for SPN display).
    pub fn is_spdi_plmn(&self, plmn: &str) -> bool {
        self.spdi.iter().any(|p| p == plmn)
    }

    pub(crate) fn loaded_condition(s: &Self) -> Option<u64> {
        s.loaded.then_some(s.loaded_generation)
    }

    pub(crate) fn locked_condition(s: &Self) -> Option<u64> {
        s.locked_records_loaded.then_some(s.locked_generation)
    }

    pub(crate) fn network_locked_condition(s: &Self) -> Option<u64> {
        s.network_locked_records_loaded
            .then_some(s.network_locked_generation)
    }

    pub(crate) fn imsi_condition(s: &Self) -> Option<u64> {
        s.imsi.is_some().then_some(s.imsi_generation)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pnn(name: &str) -> PnnRecord {
        PnnRecord {
            full_name: Some(name.to_owned()),
            short_name: None,
        }
    }

    #[test]
    fn network_name_via_opl() {
        let mut snap = RecordsSnapshot::new(RecordsFamily::Sim, AppType::Usim);
        snap.pnn = vec![pnn("Home"), pnn("Partner")];
        snap.opl = vec![
            OplRecord {
                plmn: "310260".into(),
                lac_tac_start: 0,
                lac_tac_end: 0xFFFE,
                pnn_index: 1,
            },
            OplRecord {
                plmn: "3102D0".into(),
                lac_tac_start: 0x10,
                lac_tac_end: 0x20,
                pnn_index: 2,
            },
        ];
        assert_eq!(snap.network_name_for("310260", None), Some("Home"));
        assert_eq!(snap.network_name_for("310250", Some(0x15)), Some("Partner"));
        assert_eq!(snap.network_name_for("310250", Some(0x30)), None);
    }

    #[test]
    fn home_name_without_opl() {
        let mut snap = RecordsSnapshot::new(RecordsFamily::Sim, AppType::Sim);
        snap.operator_numeric = Some("23410".into());
        snap.pnn_home_name = Some("Home".into());
        assert_eq!(snap.network_name_for("23410", None), Some("Home"));
        assert_eq!(snap.network_name_for("23415", None), None);
    }

    #[test]
    fn cphs_condition_hides_spn_while_roaming() {
        assert!(!SpnDisplayCondition::NOT_ROAMING_ONLY.contains(SpnDisplayCondition::SPN));
        assert!(SpnDisplayCondition::NOT_ROAMING_ONLY.contains(SpnDisplayCondition::PLMN));
    }

    #[test]
    fn reset_keeps_generations() {
        let mut snap = RecordsSnapshot::new(RecordsFamily::Sim, AppType::Sim);
        snap.loaded = true;
        snap.loaded_generation = 4;
        snap.imsi = Some("001010123456789".into());
        let fresh = snap.reset();
        assert!(!fresh.loaded);
        assert!(fresh.imsi.is_none());
        assert_eq!(fresh.loaded_generation, 4);
        assert!(fresh.csp_plmn_enabled);
    }
}
