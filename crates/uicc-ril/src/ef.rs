//! Elementary file identifiers and parent-directory paths.
//!
//! Ids follow 3GPP TS 51.011 / 31.102, 3GPP2 C.S0023 / C.S0065 and CPHS 4.2.

use crate::types::AppType;

// ── Directories ──────────────────────────────────────────────────────

pub const MF_SIM: &str = "3F00";
pub const DF_TELECOM: &str = "7F10";
pub const DF_PHONEBOOK: &str = "5F3A";
pub const DF_GSM: &str = "7F20";
pub const DF_CDMA: &str = "7F25";
pub const DF_ADF: &str = "7FFF";

// ── Common ───────────────────────────────────────────────────────────

pub const EF_ICCID: u16 = 0x2FE2;
pub const EF_PL: u16 = 0x2F05;
pub const EF_DIR: u16 = 0x2F00;

// ── Telecom ──────────────────────────────────────────────────────────

pub const EF_ADN: u16 = 0x6F3A;
pub const EF_FDN: u16 = 0x6F3B;
pub const EF_SMS: u16 = 0x6F3C;
pub const EF_EXT1: u16 = 0x6F4A;
pub const EF_EXT2: u16 = 0x6F4B;
pub const EF_MSISDN: u16 = 0x6F40;
pub const EF_SDN: u16 = 0x6F49;
pub const EF_EXT5: u16 = 0x6F4E;
pub const EF_EXT6: u16 = 0x6FC8;
pub const EF_PBR: u16 = 0x4F30;

// ── GSM / USIM ───────────────────────────────────────────────────────

pub const EF_LI: u16 = 0x6F05;
pub const EF_IMSI: u16 = 0x6F07;
pub const EF_SST: u16 = 0x6F38;
pub const EF_GID1: u16 = 0x6F3E;
pub const EF_GID2: u16 = 0x6F3F;
pub const EF_SPN: u16 = 0x6F46;
pub const EF_AD: u16 = 0x6FAD;
pub const EF_PNN: u16 = 0x6FC5;
pub const EF_OPL: u16 = 0x6FC6;
pub const EF_MBDN: u16 = 0x6FC7;
pub const EF_MBI: u16 = 0x6FC9;
pub const EF_MWIS: u16 = 0x6FCA;
pub const EF_CFIS: u16 = 0x6FCB;
pub const EF_SPDI: u16 = 0x6FCD;
pub const EF_FPLMN: u16 = 0x6F7B;
pub const EF_PLMN_W_ACT: u16 = 0x6F60;
pub const EF_OPLMN_W_ACT: u16 = 0x6F61;
pub const EF_HPLMN_W_ACT: u16 = 0x6F62;
pub const EF_EHPLMN: u16 = 0x6FD9;
pub const EF_LRPLMNSI: u16 = 0x6FDC;

// ── CPHS ─────────────────────────────────────────────────────────────

pub const EF_VOICE_MAIL_INDICATOR_CPHS: u16 = 0x6F11;
pub const EF_CFF_CPHS: u16 = 0x6F13;
pub const EF_SPN_CPHS: u16 = 0x6F14;
pub const EF_CSP_CPHS: u16 = 0x6F15;
pub const EF_INFO_CPHS: u16 = 0x6F16;
pub const EF_MAILBOX_CPHS: u16 = 0x6F17;
pub const EF_SPN_SHORT_CPHS: u16 = 0x6F18;

// ── CDMA / CSIM ──────────────────────────────────────────────────────

pub const EF_CST: u16 = 0x6F32;
pub const EF_RUIM_SPN: u16 = 0x6F41;
pub const EF_CSIM_LI: u16 = 0x6F3A;
pub const EF_CSIM_SPN: u16 = 0x6F41;
pub const EF_CSIM_MDN: u16 = 0x6F44;
pub const EF_CSIM_IMSIM: u16 = 0x6F22;
pub const EF_CSIM_CDMAHOME: u16 = 0x6F28;
pub const EF_CSIM_EPRL: u16 = 0x6F5A;
pub const EF_CSIM_MIPUPP: u16 = 0x6F4D;
pub const EF_CSIM_MSPL: u16 = 0x6F9E;
pub const EF_CSIM_MLPL: u16 = 0x6F9F;
pub const EF_RUIM_ID: u16 = 0x6F31;

/// Parent path for `ef` inside an application of type `app`.
///
/// Returns `None` when the file has no fixed location and the modem
/// should resolve it from the AID.
pub fn ef_path(ef: u16, app: AppType) -> Option<String> {
    match ef {
        EF_ICCID | EF_PL | EF_DIR => Some(MF_SIM.to_owned()),
        EF_ADN | EF_FDN | EF_MSISDN | EF_SDN | EF_EXT1 | EF_EXT2 | EF_EXT5 | EF_SMS => {
            if app == AppType::Usim {
                Some(format!("{MF_SIM}{DF_ADF}"))
            } else {
                Some(format!("{MF_SIM}{DF_TELECOM}"))
            }
        }
        EF_PBR => Some(format!("{MF_SIM}{DF_TELECOM}{DF_PHONEBOOK}")),
        _ => match app {
            AppType::Usim | AppType::Csim | AppType::Isim => Some(format!("{MF_SIM}{DF_ADF}")),
            AppType::Sim => Some(format!("{MF_SIM}{DF_GSM}")),
            AppType::Ruim => Some(format!("{MF_SIM}{DF_CDMA}")),
            AppType::Unknown => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_application_type() {
        assert_eq!(ef_path(EF_ICCID, AppType::Usim).as_deref(), Some("3F00"));
        assert_eq!(ef_path(EF_SPN, AppType::Sim).as_deref(), Some("3F007F20"));
        assert_eq!(ef_path(EF_SPN, AppType::Usim).as_deref(), Some("3F007FFF"));
        assert_eq!(ef_path(EF_ADN, AppType::Sim).as_deref(), Some("3F007F10"));
        assert_eq!(ef_path(EF_CSIM_MDN, AppType::Ruim).as_deref(), Some("3F007F25"));
        assert_eq!(ef_path(EF_SPN, AppType::Unknown), None);
    }
}
