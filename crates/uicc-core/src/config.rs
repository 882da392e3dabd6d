// ── Runtime configuration ──
//
// Tuning knobs for the UICC stack. Built by the CLI (or any embedder)
// and handed to `UiccController::new` -- core never reads config files.

use std::time::Duration;

use uicc_ril::AppFamily;

/// Configuration shared by every slot, card and profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiccConfig {
    /// Upper bound for a SIM AKA challenge/response exchange.
    pub auth_timeout: Duration,
    /// Phonebook load attempts before waiters are failed.
    pub phonebook_max_retries: u32,
    /// Delay between phonebook load attempts.
    pub phonebook_retry_interval: Duration,
    /// Cards may be inserted and removed while running. When false, a
    /// card add/remove asks for a restart instead.
    pub hotswap_supported: bool,
    /// Whether RUIM/CSIM applications are usable on this device.
    pub cdma_supported: bool,
    /// Radio family used for voice; picks the current application.
    pub voice_radio_family: AppFamily,
    /// Two-letter language codes the device can display, in order of preference.
    pub installed_locales: Vec<String>,
    /// Operators (MCC+MNC) whose voicemail number may not be edited.
    pub fixed_voicemail_operators: Vec<String>,
    /// Physical slots whose eUICC cannot be removed.
    pub non_removable_slots: Vec<usize>,
    /// Number of logical modems.
    pub num_phones: usize,
}

impl Default for UiccConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_millis(2_500),
            phonebook_max_retries: 3,
            phonebook_retry_interval: Duration::from_secs(3),
            hotswap_supported: true,
            cdma_supported: true,
            voice_radio_family: AppFamily::ThreeGpp,
            installed_locales: vec!["en".into()],
            fixed_voicemail_operators: Vec::new(),
            non_removable_slots: Vec::new(),
            num_phones: 1,
        }
    }
}

impl UiccConfig {
    pub(crate) fn is_voicemail_fixed(&self, operator_numeric: Option<&str>) -> bool {
        operator_numeric.is_some_and(|op| self.fixed_voicemail_operators.iter().any(|f| f == op))
    }
}
