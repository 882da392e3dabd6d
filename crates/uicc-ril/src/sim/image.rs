// ── Card images ──
//
// Serializable description of a card: applications, their elementary
// files, credentials and phonebook. Loaded from TOML/JSON by the CLI and
// assembled with the builder methods in tests.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AppType, CardState, MepMode, PersoSubState, SimPhonebookRecord};

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("invalid card image TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid card image JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("file 0x{ef:04X} is not valid hex: {source}")]
    Hex {
        ef: u16,
        #[source]
        source: hex::FromHexError,
    },

    #[error("file 0x{ef:04X}: {reason}")]
    Layout { ef: u16, reason: String },
}

fn default_card_state() -> CardState {
    CardState::Present
}

/// A complete card description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardImage {
    #[serde(default = "default_card_state")]
    pub card_state: CardState,
    #[serde(default)]
    pub iccid: Option<String>,
    #[serde(default)]
    pub eid: Option<String>,
    /// Answer-to-reset, hex.
    #[serde(default)]
    pub atr: Option<String>,
    #[serde(default)]
    pub mep_mode: MepMode,
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default)]
    pub puk: Option<String>,
    #[serde(default)]
    pub pin2: Option<String>,
    #[serde(default)]
    pub puk2: Option<String>,
    #[serde(default)]
    pub pin_enabled: bool,
    #[serde(default)]
    pub perso: PersoSubState,
    #[serde(default)]
    pub fdn_enabled: bool,
    #[serde(default)]
    pub applications: Vec<AppImage>,
    #[serde(default)]
    pub phonebook: Option<PhonebookImage>,
    /// Fixed answer to AUTHENTICATE, hex. Echoes the challenge when unset.
    #[serde(default)]
    pub auth_response: Option<String>,
}

impl Default for CardImage {
    fn default() -> Self {
        Self {
            card_state: CardState::Present,
            iccid: None,
            eid: None,
            atr: None,
            mep_mode: MepMode::None,
            pin: None,
            puk: None,
            pin2: None,
            puk2: None,
            pin_enabled: false,
            perso: PersoSubState::Unknown,
            fdn_enabled: false,
            applications: Vec::new(),
            phonebook: None,
            auth_response: None,
        }
    }
}

impl CardImage {
    pub fn from_toml(text: &str) -> Result<Self, ImageError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ImageError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn new(iccid: impl Into<String>) -> Self {
        Self {
            iccid: Some(iccid.into()),
            ..Self::default()
        }
    }

    pub fn with_app(mut self, app: AppImage) -> Self {
        self.applications.push(app);
        self
    }

    pub fn with_pin(mut self, pin: &str, puk: &str) -> Self {
        self.pin = Some(pin.to_owned());
        self.puk = Some(puk.to_owned());
        self.pin_enabled = true;
        self
    }

    pub fn with_eid(mut self, eid: impl Into<String>) -> Self {
        self.eid = Some(eid.into());
        self
    }

    pub fn with_atr(mut self, atr: impl Into<String>) -> Self {
        self.atr = Some(atr.into());
        self
    }

    pub fn with_perso(mut self, perso: PersoSubState) -> Self {
        self.perso = perso;
        self
    }

    pub fn with_phonebook(mut self, phonebook: PhonebookImage) -> Self {
        self.phonebook = Some(phonebook);
        self
    }

    pub fn with_card_state(mut self, state: CardState) -> Self {
        self.card_state = state;
        self
    }
}

/// One application on the card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppImage {
    pub app_type: AppType,
    #[serde(default)]
    pub aid: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub files: Vec<FileImage>,
}

impl AppImage {
    pub fn new(app_type: AppType) -> Self {
        Self {
            app_type,
            aid: None,
            label: None,
            files: Vec::new(),
        }
    }

    pub fn aid(mut self, aid: impl Into<String>) -> Self {
        self.aid = Some(aid.into());
        self
    }

    pub fn transparent(mut self, ef: u16, data: &[u8]) -> Self {
        self.files.retain(|f| f.ef != ef);
        self.files.push(FileImage {
            ef,
            data: Some(hex::encode_upper(data)),
            records: Vec::new(),
            record_len: None,
        });
        self
    }

    pub fn linear(mut self, ef: u16, records: &[&[u8]]) -> Self {
        self.files.retain(|f| f.ef != ef);
        self.files.push(FileImage {
            ef,
            data: None,
            records: records.iter().map(hex::encode_upper).collect(),
            record_len: None,
        });
        self
    }
}

/// An elementary file. Exactly one of `data` (transparent) or `records`
/// (linear fixed) is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileImage {
    pub ef: u16,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub records: Vec<String>,
    /// Record length; defaults to the longest record.
    #[serde(default)]
    pub record_len: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhonebookImage {
    pub capacity: u32,
    #[serde(default)]
    pub entries: Vec<SimPhonebookRecord>,
}

pub(crate) fn decode_hex(ef: u16, text: &str) -> Result<Vec<u8>, ImageError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(compact).map_err(|source| ImageError::Hex { ef, source })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_toml_image() {
        let image = CardImage::from_toml(
            r#"
            iccid = "89014103211118510720"
            pin = "1234"
            pin_enabled = true

            [[applications]]
            app_type = "usim"
            aid = "A0000000871002"

            [[applications.files]]
            ef = 0x6F46
            data = "01 41 43 4D 45 FF FF"

            [[applications.files]]
            ef = 0x6FC6
            records = ["13F0100000FFFE01"]
            "#,
        )
        .unwrap();

        assert_eq!(image.card_state, CardState::Present);
        assert_eq!(image.applications.len(), 1);
        assert_eq!(image.applications[0].app_type, AppType::Usim);
        assert_eq!(image.applications[0].files[0].ef, 0x6F46);
        assert_eq!(
            decode_hex(0x6F46, image.applications[0].files[0].data.as_ref().unwrap()).unwrap(),
            vec![0x01, 0x41, 0x43, 0x4D, 0x45, 0xFF, 0xFF]
        );
    }

    #[test]
    fn bad_hex_names_the_file() {
        let err = decode_hex(0x6F07, "ZZ").unwrap_err();
        assert!(err.to_string().contains("0x6F07"));
    }
}
