// ── Card runtime ──
//
// The mutable state of an inserted simulated card: decoded file system,
// credential counters, phonebook.

use std::collections::{BTreeMap, HashMap};

use crate::ef;
use crate::error::RilError;
use crate::io::{
    COMMAND_GET_RESPONSE, COMMAND_READ_BINARY, COMMAND_READ_RECORD, COMMAND_UPDATE_BINARY,
    COMMAND_UPDATE_RECORD, EF_TYPE_LINEAR_FIXED, EF_TYPE_TRANSPARENT, GET_RESPONSE_EF_SIZE_BYTES,
    IccIoRequest, IccIoResult, RESPONSE_DATA_FILE_SIZE_1, RESPONSE_DATA_FILE_SIZE_2,
    RESPONSE_DATA_FILE_TYPE, RESPONSE_DATA_RECORD_LENGTH, RESPONSE_DATA_STRUCTURE, TYPE_EF,
};
use crate::types::{
    AppState, AppStatus, AppType, CardState, CardStatus, MepMode, PersoSubState, PinState,
    SimPhonebookRecord, SlotPortMapping,
};

use super::image::{CardImage, FileImage, ImageError, decode_hex};

const PIN_ATTEMPTS: u32 = 3;
const PUK_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone)]
pub(crate) enum EfFile {
    Transparent(Vec<u8>),
    Linear {
        record_len: usize,
        records: Vec<Vec<u8>>,
    },
}

impl EfFile {
    fn from_image(file: &FileImage) -> Result<Self, ImageError> {
        if let Some(data) = &file.data {
            return Ok(Self::Transparent(decode_hex(file.ef, data)?));
        }
        let mut records = file
            .records
            .iter()
            .map(|r| decode_hex(file.ef, r))
            .collect::<Result<Vec<_>, _>>()?;
        let longest = records.iter().map(Vec::len).max().unwrap_or(0);
        let record_len = file.record_len.unwrap_or(longest);
        if record_len == 0 || record_len > 255 {
            return Err(ImageError::Layout {
                ef: file.ef,
                reason: format!("record length {record_len} out of range"),
            });
        }
        for record in &mut records {
            record.resize(record_len, 0xFF);
        }
        Ok(Self::Linear {
            record_len,
            records,
        })
    }

    fn get_response(&self, file_id: u16) -> Vec<u8> {
        let (size, structure, record_len) = match self {
            Self::Transparent(data) => (data.len(), EF_TYPE_TRANSPARENT, 0),
            Self::Linear {
                record_len,
                records,
            } => (record_len * records.len(), EF_TYPE_LINEAR_FIXED, *record_len),
        };
        let mut header = vec![0u8; usize::from(GET_RESPONSE_EF_SIZE_BYTES)];
        let [size_hi, size_lo] = u16::try_from(size).unwrap_or(u16::MAX).to_be_bytes();
        let [id_hi, id_lo] = file_id.to_be_bytes();
        header[RESPONSE_DATA_FILE_SIZE_1] = size_hi;
        header[RESPONSE_DATA_FILE_SIZE_2] = size_lo;
        header[4] = id_hi;
        header[5] = id_lo;
        header[RESPONSE_DATA_FILE_TYPE] = TYPE_EF;
        header[RESPONSE_DATA_STRUCTURE] = structure;
        header[RESPONSE_DATA_RECORD_LENGTH] = u8::try_from(record_len).unwrap_or(u8::MAX);
        header
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AppRuntime {
    pub app_type: AppType,
    pub aid: Option<String>,
    pub label: Option<String>,
    pub files: HashMap<u16, EfFile>,
}

#[derive(Debug, Clone)]
pub(crate) struct CardRuntime {
    pub card_state: CardState,
    pub iccid: Option<String>,
    pub eid: Option<String>,
    pub atr: Option<String>,
    pub mep_mode: MepMode,
    pub apps: Vec<AppRuntime>,
    pub perso: PersoSubState,
    pub auth_response: Option<Vec<u8>>,

    pin: Option<String>,
    puk: Option<String>,
    pin2: Option<String>,
    puk2: Option<String>,
    pub pin_enabled: bool,
    pin_verified: bool,
    pin_attempts: u32,
    puk_attempts: u32,
    pub fdn_enabled: bool,

    pub phonebook_capacity: u32,
    pub phonebook: BTreeMap<u32, SimPhonebookRecord>,
}

impl CardRuntime {
    pub fn from_image(image: &CardImage) -> Result<Self, ImageError> {
        let mut apps = Vec::with_capacity(image.applications.len());
        for app in &image.applications {
            let mut files = HashMap::new();
            for file in &app.files {
                files.insert(file.ef, EfFile::from_image(file)?);
            }
            apps.push(AppRuntime {
                app_type: app.app_type,
                aid: app.aid.clone(),
                label: app.label.clone(),
                files,
            });
        }

        let auth_response = image
            .auth_response
            .as_deref()
            .map(|h| decode_hex(0, h))
            .transpose()?;

        let (phonebook_capacity, phonebook) = image.phonebook.as_ref().map_or_else(
            || (0, BTreeMap::new()),
            |pb| {
                let entries = pb
                    .entries
                    .iter()
                    .filter(|e| e.record_id > 0)
                    .map(|e| (e.record_id, e.clone()))
                    .collect();
                (pb.capacity, entries)
            },
        );

        Ok(Self {
            card_state: image.card_state,
            iccid: image.iccid.clone(),
            eid: image.eid.clone(),
            atr: image.atr.clone(),
            mep_mode: image.mep_mode,
            apps,
            perso: image.perso,
            auth_response,
            pin: image.pin.clone(),
            puk: image.puk.clone(),
            pin2: image.pin2.clone(),
            puk2: image.puk2.clone(),
            pin_enabled: image.pin_enabled,
            pin_verified: false,
            pin_attempts: PIN_ATTEMPTS,
            puk_attempts: PUK_ATTEMPTS,
            fdn_enabled: image.fdn_enabled,
            phonebook_capacity,
            phonebook,
        })
    }

    // ── Status ──────────────────────────────────────────────────────

    fn pin1_state(&self) -> PinState {
        if self.puk_attempts == 0 {
            PinState::EnabledPermBlocked
        } else if self.pin_attempts == 0 {
            PinState::EnabledBlocked
        } else if !self.pin_enabled {
            PinState::Disabled
        } else if self.pin_verified {
            PinState::EnabledVerified
        } else {
            PinState::EnabledNotVerified
        }
    }

    fn app_state(&self) -> AppState {
        match self.pin1_state() {
            PinState::EnabledBlocked | PinState::EnabledPermBlocked => AppState::Puk,
            PinState::EnabledNotVerified => AppState::Pin,
            _ if self.perso.is_perso_locked() => AppState::SubscriptionPersona,
            _ => AppState::Ready,
        }
    }

    pub fn card_status(&self, mapping: SlotPortMapping) -> CardStatus {
        let pin1 = self.pin1_state();
        let app_state = self.app_state();
        let applications: Vec<AppStatus> = self
            .apps
            .iter()
            .map(|app| AppStatus {
                app_type: app.app_type,
                app_state,
                perso_substate: if app_state == AppState::SubscriptionPersona {
                    self.perso
                } else {
                    PersoSubState::Ready
                },
                aid: app.aid.clone(),
                label: app.label.clone(),
                pin1_replaced: false,
                pin1,
                pin2: if self.pin2.is_some() {
                    PinState::EnabledNotVerified
                } else {
                    PinState::Disabled
                },
            })
            .collect();
        let first_of = |types: &[AppType]| {
            applications
                .iter()
                .position(|a| types.contains(&a.app_type))
        };

        CardStatus {
            card_state: self.card_state,
            universal_pin_state: pin1,
            gsm_umts_subscription_app_index: first_of(&[AppType::Usim, AppType::Sim]),
            cdma_subscription_app_index: first_of(&[AppType::Csim, AppType::Ruim]),
            ims_subscription_app_index: first_of(&[AppType::Isim]),
            atr: self.atr.clone(),
            iccid: self.iccid.clone(),
            eid: self.eid.clone(),
            slot_port_mapping: mapping,
            supported_mep_mode: self.mep_mode,
            applications,
        }
    }

    // ── File system ─────────────────────────────────────────────────

    fn synthesized_iccid(&self) -> Option<EfFile> {
        let iccid = self.iccid.as_deref()?;
        let mut digits: Vec<u8> = iccid
            .chars()
            .filter_map(|c| c.to_digit(16))
            .filter_map(|d| u8::try_from(d).ok())
            .collect();
        if digits.len() % 2 == 1 {
            digits.push(0xF);
        }
        let mut bytes: Vec<u8> = digits.chunks(2).map(|p| (p[1] << 4) | p[0]).collect();
        bytes.resize(10, 0xFF);
        Some(EfFile::Transparent(bytes))
    }

    fn app_index(&self, aid: Option<&str>) -> Option<usize> {
        match aid {
            Some(aid) if !aid.is_empty() => self.apps.iter().position(|a| {
                a.aid
                    .as_deref()
                    .is_some_and(|own| own.eq_ignore_ascii_case(aid))
            }),
            _ => self
                .apps
                .iter()
                .position(|a| matches!(a.app_type, AppType::Sim | AppType::Ruim))
                .or(if self.apps.is_empty() { None } else { Some(0) }),
        }
    }

    fn find_file(&mut self, aid: Option<&str>, file_id: u16) -> Option<&mut EfFile> {
        let own = self.app_index(aid);
        let holder = own
            .filter(|&i| self.apps[i].files.contains_key(&file_id))
            .or_else(|| {
                // MF-level files are reachable from every application.
                matches!(file_id, ef::EF_ICCID | ef::EF_PL | ef::EF_DIR)
                    .then(|| self.apps.iter().position(|a| a.files.contains_key(&file_id)))
                    .flatten()
            })?;
        self.apps[holder].files.get_mut(&file_id)
    }

    pub fn io(&mut self, request: &IccIoRequest) -> IccIoResult {
        const NOT_FOUND: (u8, u8) = (0x6A, 0x82);
        const WRONG_LENGTH: (u8, u8) = (0x67, 0x00);
        const RECORD_NOT_FOUND: (u8, u8) = (0x6A, 0x83);

        let mut iccid = if request.file_id == ef::EF_ICCID {
            self.synthesized_iccid()
        } else {
            None
        };
        let aid = request.aid.clone();
        let file = match self.find_file(aid.as_deref(), request.file_id) {
            Some(file) => file,
            None => match iccid {
                Some(ref mut file) => file,
                None => return IccIoResult::status(NOT_FOUND.0, NOT_FOUND.1),
            },
        };

        match (request.command, file) {
            (COMMAND_GET_RESPONSE, file) => IccIoResult::ok(file.get_response(request.file_id)),
            (COMMAND_READ_BINARY, EfFile::Transparent(data)) => {
                let offset = usize::from(u16::from_be_bytes([request.p1, request.p2]));
                let len = if request.p3 == 0 {
                    data.len().saturating_sub(offset)
                } else {
                    usize::from(request.p3)
                };
                match data.get(offset..offset + len) {
                    Some(slice) => IccIoResult::ok(slice.to_vec()),
                    None => IccIoResult::status(WRONG_LENGTH.0, WRONG_LENGTH.1),
                }
            }
            (COMMAND_READ_RECORD, EfFile::Linear { records, .. }) => {
                match usize::from(request.p1)
                    .checked_sub(1)
                    .and_then(|i| records.get(i))
                {
                    Some(record) => IccIoResult::ok(record.clone()),
                    None => IccIoResult::status(RECORD_NOT_FOUND.0, RECORD_NOT_FOUND.1),
                }
            }
            (COMMAND_UPDATE_BINARY, EfFile::Transparent(data)) => {
                let offset = usize::from(u16::from_be_bytes([request.p1, request.p2]));
                let payload = request.data.clone().unwrap_or_default();
                if offset + payload.len() > data.len() {
                    return IccIoResult::status(WRONG_LENGTH.0, WRONG_LENGTH.1);
                }
                data[offset..offset + payload.len()].copy_from_slice(&payload);
                IccIoResult::ok(Vec::new())
            }
            (
                COMMAND_UPDATE_RECORD,
                EfFile::Linear {
                    record_len,
                    records,
                },
            ) => {
                let payload = request.data.clone().unwrap_or_default();
                if payload.len() != *record_len {
                    return IccIoResult::status(WRONG_LENGTH.0, WRONG_LENGTH.1);
                }
                match usize::from(request.p1)
                    .checked_sub(1)
                    .and_then(|i| records.get_mut(i))
                {
                    Some(record) => {
                        *record = payload;
                        IccIoResult::ok(Vec::new())
                    }
                    None => IccIoResult::status(RECORD_NOT_FOUND.0, RECORD_NOT_FOUND.1),
                }
            }
            // Command incompatible with file structure.
            _ => IccIoResult::status(0x69, 0x81),
        }
    }

    pub fn write_transparent(&mut self, aid: Option<&str>, file_id: u16, data: Vec<u8>) {
        if let Some(i) = self.app_index(aid) {
            self.apps[i]
                .files
                .insert(file_id, EfFile::Transparent(data));
        }
    }

    pub fn write_records(&mut self, aid: Option<&str>, file_id: u16, records: Vec<Vec<u8>>) {
        if let Some(i) = self.app_index(aid) {
            let record_len = records.iter().map(Vec::len).max().unwrap_or(0);
            self.apps[i].files.insert(
                file_id,
                EfFile::Linear {
                    record_len,
                    records,
                },
            );
        }
    }

    pub fn read_transparent(&self, aid: Option<&str>, file_id: u16) -> Option<Vec<u8>> {
        let i = self.app_index(aid)?;
        match self.apps[i].files.get(&file_id)? {
            EfFile::Transparent(data) => Some(data.clone()),
            EfFile::Linear { .. } => None,
        }
    }

    // ── Credentials ─────────────────────────────────────────────────

    pub fn supply_pin(&mut self, pin: &str) -> Result<(), RilError> {
        if self.pin_attempts == 0 {
            return Err(RilError::PukRequired);
        }
        if self.pin.as_deref() == Some(pin) {
            self.pin_verified = true;
            self.pin_attempts = PIN_ATTEMPTS;
            Ok(())
        } else {
            self.pin_attempts -= 1;
            Err(RilError::PasswordIncorrect {
                attempts_remaining: Some(self.pin_attempts),
            })
        }
    }

    pub fn supply_puk(&mut self, puk: &str, new_pin: &str) -> Result<(), RilError> {
        if self.puk_attempts == 0 {
            return Err(RilError::PasswordIncorrect {
                attempts_remaining: Some(0),
            });
        }
        if self.puk.as_deref() == Some(puk) {
            self.pin = Some(new_pin.to_owned());
            self.pin_attempts = PIN_ATTEMPTS;
            self.puk_attempts = PUK_ATTEMPTS;
            self.pin_verified = true;
            Ok(())
        } else {
            self.puk_attempts -= 1;
            Err(RilError::PasswordIncorrect {
                attempts_remaining: Some(self.puk_attempts),
            })
        }
    }

    pub fn supply_pin2(&self, pin2: &str) -> Result<(), RilError> {
        if self.pin2.as_deref() == Some(pin2) {
            Ok(())
        } else {
            Err(RilError::PasswordIncorrect {
                attempts_remaining: None,
            })
        }
    }

    pub fn supply_puk2(&mut self, puk2: &str, new_pin2: &str) -> Result<(), RilError> {
        if self.puk2.as_deref() == Some(puk2) {
            self.pin2 = Some(new_pin2.to_owned());
            Ok(())
        } else {
            Err(RilError::PasswordIncorrect {
                attempts_remaining: None,
            })
        }
    }

    pub fn change_pin(&mut self, old: &str, new: &str) -> Result<(), RilError> {
        self.supply_pin(old)?;
        self.pin = Some(new.to_owned());
        Ok(())
    }

    pub fn check_pin(&self, pin: &str) -> Result<(), RilError> {
        if self.pin.as_deref() == Some(pin) {
            Ok(())
        } else {
            Err(RilError::PasswordIncorrect {
                attempts_remaining: Some(self.pin_attempts),
            })
        }
    }

    pub fn set_pin_enabled(&mut self, enabled: bool) {
        self.pin_enabled = enabled;
        self.pin_verified = true;
    }

    // ── Phonebook ───────────────────────────────────────────────────

    pub fn update_phonebook(&mut self, mut record: SimPhonebookRecord) -> Result<u32, RilError> {
        let index = if record.record_id == 0 {
            (1..=self.phonebook_capacity)
                .find(|i| !self.phonebook.contains_key(i))
                .ok_or_else(|| RilError::MissingResource {
                    message: "phonebook full".into(),
                })?
        } else if record.record_id > self.phonebook_capacity {
            return Err(RilError::InvalidArguments {
                message: format!("record {} beyond capacity", record.record_id),
            });
        } else {
            record.record_id
        };
        record.record_id = index;
        if record.is_empty() {
            self.phonebook.remove(&index);
        } else {
            self.phonebook.insert(index, record);
        }
        Ok(index)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sim::image::AppImage;

    fn runtime() -> CardRuntime {
        let image = CardImage::new("8901410321111851072")
            .with_pin("1234", "87654321")
            .with_app(
                AppImage::new(AppType::Usim)
                    .aid("A0000000871002")
                    .transparent(ef::EF_SPN, &[0x01, b'A', 0xFF])
                    .linear(ef::EF_OPL, &[&[1, 2, 3], &[4, 5]]),
            );
        CardRuntime::from_image(&image).unwrap()
    }

    fn req(command: u8, file_id: u16, p1: u8, p3: u8) -> IccIoRequest {
        IccIoRequest {
            command,
            file_id,
            p1,
            p3,
            aid: Some("A0000000871002".into()),
            ..IccIoRequest::default()
        }
    }

    #[test]
    fn get_response_describes_linear_file() {
        let mut card = runtime();
        let header = card.io(&req(COMMAND_GET_RESPONSE, ef::EF_OPL, 0, 15)).payload;
        assert_eq!(header[RESPONSE_DATA_STRUCTURE], EF_TYPE_LINEAR_FIXED);
        assert_eq!(header[RESPONSE_DATA_RECORD_LENGTH], 3);
        assert_eq!(header[RESPONSE_DATA_FILE_SIZE_2], 6);
    }

    #[test]
    fn short_records_are_padded() {
        let mut card = runtime();
        let rec = card.io(&req(COMMAND_READ_RECORD, ef::EF_OPL, 2, 3));
        assert_eq!(rec.payload, vec![4, 5, 0xFF]);
    }

    #[test]
    fn iccid_is_synthesized_swapped() {
        let mut card = runtime();
        let data = card.io(&req(COMMAND_READ_BINARY, ef::EF_ICCID, 0, 10)).payload;
        assert_eq!(&data[..3], &[0x98, 0x10, 0x14]);
        assert_eq!(data[9], 0xF2);
    }

    #[test]
    fn missing_file_reports_6a82() {
        let mut card = runtime();
        let res = card.io(&req(COMMAND_READ_BINARY, ef::EF_GID1, 0, 0));
        assert_eq!((res.sw1, res.sw2), (0x6A, 0x82));
    }

    #[test]
    fn pin_attempts_run_out_into_puk() {
        let mut card = runtime();
        for remaining in (0..3).rev() {
            assert_eq!(
                card.supply_pin("0000"),
                Err(RilError::PasswordIncorrect {
                    attempts_remaining: Some(remaining)
                })
            );
        }
        assert_eq!(card.supply_pin("1234"), Err(RilError::PukRequired));
        assert_eq!(card.app_state(), AppState::Puk);
        card.supply_puk("87654321", "4321").unwrap();
        assert_eq!(card.app_state(), AppState::Ready);
    }
}
