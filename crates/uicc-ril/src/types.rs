// ── Status report types ──
//
// Plain data reported by the modem for GET_SIM_STATUS and
// GET_SLOT_STATUS, plus the enumerations they carry.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ── Enumerations ─────────────────────────────────────────────────────

/// Electrical/logical state of the card in a slot.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CardState {
    #[default]
    Absent,
    Present,
    Error,
    Restricted,
}

impl CardState {
    /// A card is electrically present in the slot.
    pub fn is_card_present(self) -> bool {
        matches!(self, Self::Present | Self::Restricted)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PinState {
    #[default]
    Unknown,
    EnabledNotVerified,
    EnabledVerified,
    Disabled,
    /// PUK required.
    EnabledBlocked,
    EnabledPermBlocked,
}

impl PinState {
    pub fn is_enabled(self) -> bool {
        matches!(
            self,
            Self::EnabledNotVerified
                | Self::EnabledVerified
                | Self::EnabledBlocked
                | Self::EnabledPermBlocked
        )
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AppState {
    #[default]
    Unknown,
    Detected,
    Pin,
    Puk,
    SubscriptionPersona,
    Ready,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AppType {
    #[default]
    Unknown,
    Sim,
    Usim,
    Ruim,
    Csim,
    Isim,
}

impl AppType {
    pub fn family(self) -> Option<AppFamily> {
        match self {
            Self::Sim | Self::Usim => Some(AppFamily::ThreeGpp),
            Self::Ruim | Self::Csim => Some(AppFamily::ThreeGpp2),
            Self::Isim => Some(AppFamily::Ims),
            Self::Unknown => None,
        }
    }
}

/// Application family used to pick the "current" application of a profile.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AppFamily {
    #[serde(rename = "3gpp")]
    #[strum(serialize = "3gpp")]
    ThreeGpp,
    #[serde(rename = "3gpp2")]
    #[strum(serialize = "3gpp2")]
    ThreeGpp2,
    Ims,
}

/// Personalization (network lock) sub-state of an application.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PersoSubState {
    #[default]
    Unknown,
    InProgress,
    Ready,
    SimNetwork,
    SimNetworkSubset,
    SimCorporate,
    SimServiceProvider,
    SimSim,
    SimNetworkPuk,
    SimNetworkSubsetPuk,
    SimCorporatePuk,
    SimServiceProviderPuk,
    SimSimPuk,
    RuimNetwork1,
    RuimNetwork2,
    RuimHrpd,
    RuimCorporate,
    RuimServiceProvider,
    RuimRuim,
    RuimNetwork1Puk,
    RuimNetwork2Puk,
    RuimHrpdPuk,
    RuimCorporatePuk,
    RuimServiceProviderPuk,
    RuimRuimPuk,
    SimSpn,
    SimSpnPuk,
    SimSpEhplmn,
    SimSpEhplmnPuk,
    SimImsiPrefix,
    SimImsiPrefixPuk,
    SimCloneCarrier,
    SimCloneCarrierPuk,
}

impl PersoSubState {
    pub fn is_perso_locked(self) -> bool {
        !matches!(self, Self::Unknown | Self::InProgress | Self::Ready)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RadioState {
    On,
    Off,
    #[default]
    Unavailable,
}

/// Multiple-enabled-profiles mode a slot supports.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MepMode {
    #[default]
    None,
    MepA1,
    MepA2,
    MepB,
}

impl MepMode {
    pub fn is_mep(self) -> bool {
        self != Self::None
    }
}

/// Facility codes for lock queries (3GPP TS 27.007 +CLCK).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum Facility {
    /// SIM PIN1 lock.
    #[strum(serialize = "SC")]
    SimLock,
    /// Fixed dialling numbers.
    #[strum(serialize = "FD")]
    FixedDialing,
}

// ── Status reports ───────────────────────────────────────────────────

/// Where a card status report lives: physical slot and port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPortMapping {
    pub physical_slot_index: Option<usize>,
    pub port_index: usize,
}

/// One application entry in a card status report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStatus {
    pub app_type: AppType,
    pub app_state: AppState,
    pub perso_substate: PersoSubState,
    pub aid: Option<String>,
    pub label: Option<String>,
    pub pin1_replaced: bool,
    pub pin1: PinState,
    pub pin2: PinState,
}

/// Card status as reported per logical modem (phone).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardStatus {
    pub card_state: CardState,
    pub universal_pin_state: PinState,
    pub gsm_umts_subscription_app_index: Option<usize>,
    pub cdma_subscription_app_index: Option<usize>,
    pub ims_subscription_app_index: Option<usize>,
    pub applications: Vec<AppStatus>,
    /// Answer-to-reset, hex encoded.
    pub atr: Option<String>,
    pub iccid: Option<String>,
    pub eid: Option<String>,
    pub slot_port_mapping: SlotPortMapping,
    pub supported_mep_mode: MepMode,
}

/// Per-port entry in a slot status report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimPortInfo {
    pub iccid: Option<String>,
    /// Logical slot (phone id) the port is mapped to.
    pub logical_slot_index: Option<usize>,
    pub port_active: bool,
}

/// Physical slot status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStatus {
    pub card_state: CardState,
    pub atr: Option<String>,
    pub eid: Option<String>,
    pub ports: Vec<SimPortInfo>,
    pub supported_mep_mode: MepMode,
}

// ── Phonebook ────────────────────────────────────────────────────────

/// Storage limits reported by the modem for the SIM phonebook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhonebookCapacity {
    pub max_adn_records: u32,
    pub used_adn_records: u32,
    pub max_email_records: u32,
    pub used_email_records: u32,
    pub max_additional_number_records: u32,
    pub used_additional_number_records: u32,
    pub max_name_len: u32,
    pub max_number_len: u32,
    pub max_email_len: u32,
    pub max_additional_number_len: u32,
}

impl PhonebookCapacity {
    pub fn is_valid(&self) -> bool {
        self.max_adn_records > 0
    }
}

/// A phonebook entry as exchanged with the modem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimPhonebookRecord {
    /// 1-based record index; 0 asks the modem to allocate one.
    pub record_id: u32,
    #[serde(default)]
    pub alpha_tag: String,
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub additional_numbers: Vec<String>,
}

impl SimPhonebookRecord {
    pub fn is_empty(&self) -> bool {
        self.alpha_tag.is_empty()
            && self.number.is_empty()
            && self.emails.is_empty()
            && self.additional_numbers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perso_lock_excludes_progress_states() {
        assert!(!PersoSubState::Unknown.is_perso_locked());
        assert!(!PersoSubState::InProgress.is_perso_locked());
        assert!(!PersoSubState::Ready.is_perso_locked());
        assert!(PersoSubState::SimNetwork.is_perso_locked());
        assert!(PersoSubState::RuimRuimPuk.is_perso_locked());
    }

    #[test]
    fn app_families() {
        assert_eq!(AppType::Usim.family(), Some(AppFamily::ThreeGpp));
        assert_eq!(AppType::Csim.family(), Some(AppFamily::ThreeGpp2));
        assert_eq!(AppType::Isim.family(), Some(AppFamily::Ims));
        assert_eq!(AppType::Unknown.family(), None);
    }

    #[test]
    fn facility_codes() {
        assert_eq!(Facility::SimLock.to_string(), "SC");
        assert_eq!(Facility::FixedDialing.to_string(), "FD");
    }
}
