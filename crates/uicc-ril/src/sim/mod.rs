//! In-process modem emulator.
//!
//! [`SimulatedModem`] owns a set of physical slots and logical modems
//! (phones). Each phone gets a [`SimulatedRil`] implementing
//! [`CommandsInterface`] against the shared slot state, so the whole UICC
//! stack can run without hardware. Test helpers on the modem insert and
//! remove cards, push refreshes, toggle the radio and inject faults.
//!
//! ```rust,ignore
//! let modem = SimulatedModem::new(1).with_card(0, image)?;
//! let ril = modem.ril(0);
//! let status = ril.get_icc_card_status().await?;
//! ```

mod card;
pub mod image;

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use tokio::sync::broadcast;
use tracing::debug;

use crate::commands::{CommandsInterface, RilFuture};
use crate::error::RilError;
use crate::indication::{PhonebookReceivedStatus, RefreshResult, RilIndication};
use crate::io::{Apdu, ChannelResponse, IccIoRequest, IccIoResult};
use crate::types::{
    CardState, CardStatus, Facility, MepMode, PhonebookCapacity, RadioState, SimPhonebookRecord,
    SimPortInfo, SlotPortMapping, SlotStatus,
};

use self::card::CardRuntime;
pub use self::image::{AppImage, CardImage, FileImage, ImageError, PhonebookImage};

const INDICATION_CHANNEL_CAPACITY: usize = 256;
const PHONEBOOK_BATCH: usize = 2;

// ── Shared state ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct PortState {
    active: bool,
    phone: Option<usize>,
}

#[derive(Debug)]
struct SlotState {
    card: Option<CardRuntime>,
    ports: Vec<PortState>,
}

#[derive(Debug)]
struct PhoneState {
    radio: RadioState,
    tx: broadcast::Sender<RilIndication>,
}

#[derive(Debug, Default)]
struct Faults {
    failing_efs: HashSet<u16>,
    phonebook_fetch_failures: u32,
    phonebook_update_id: Option<u32>,
    silent_auth: bool,
}

#[derive(Debug)]
struct ModemState {
    slots: Vec<SlotState>,
    phones: Vec<PhoneState>,
    channels: BTreeMap<i32, usize>,
    next_channel: i32,
    faults: Faults,
}

impl ModemState {
    /// Slot and port an active phone is mapped to.
    fn locate(&self, phone: usize) -> Option<(usize, usize)> {
        self.slots.iter().enumerate().find_map(|(s, slot)| {
            slot.ports
                .iter()
                .position(|p| p.active && p.phone == Some(phone))
                .map(|p| (s, p))
        })
    }

    fn card_mut(&mut self, phone: usize) -> Result<&mut CardRuntime, RilError> {
        let (slot, _) = self.locate(phone).ok_or(RilError::SimAbsent)?;
        self.slots[slot]
            .card
            .as_mut()
            .filter(|c| c.card_state != CardState::Absent)
            .ok_or(RilError::SimAbsent)
    }

    fn slot_status(&self) -> Vec<SlotStatus> {
        self.slots
            .iter()
            .map(|slot| SlotStatus {
                card_state: slot
                    .card
                    .as_ref()
                    .map_or(CardState::Absent, |c| c.card_state),
                atr: slot.card.as_ref().and_then(|c| c.atr.clone()),
                eid: slot.card.as_ref().and_then(|c| c.eid.clone()),
                ports: slot
                    .ports
                    .iter()
                    .map(|p| SimPortInfo {
                        iccid: slot.card.as_ref().and_then(|c| c.iccid.clone()),
                        logical_slot_index: p.phone,
                        port_active: p.active,
                    })
                    .collect(),
                supported_mep_mode: slot.card.as_ref().map_or(MepMode::None, |c| c.mep_mode),
            })
            .collect()
    }

    fn phones_on_slot(&self, slot: usize) -> Vec<usize> {
        self.slots
            .get(slot)
            .map(|s| {
                s.ports
                    .iter()
                    .filter(|p| p.active)
                    .filter_map(|p| p.phone)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn emit(&self, phone: usize, indication: RilIndication) {
        if let Some(p) = self.phones.get(phone) {
            // No receivers is fine; nothing is listening yet.
            let _ = p.tx.send(indication);
        }
    }

    fn emit_slot_change(&self, slot: usize) {
        for phone in self.phones_on_slot(slot) {
            self.emit(phone, RilIndication::IccStatusChanged);
        }
        self.emit(0, RilIndication::IccSlotStatusChanged(self.slot_status()));
    }
}

// ── SimulatedModem ───────────────────────────────────────────────────

/// A simulated multi-slot modem. Cheaply cloneable.
#[derive(Clone)]
pub struct SimulatedModem {
    state: Arc<Mutex<ModemState>>,
}

impl SimulatedModem {
    /// A modem with `num_phones` phones and one single-port slot per phone.
    pub fn new(num_phones: usize) -> Self {
        let slots = (0..num_phones)
            .map(|i| SlotState {
                card: None,
                ports: vec![PortState {
                    active: true,
                    phone: Some(i),
                }],
            })
            .collect();
        let phones = (0..num_phones)
            .map(|_| PhoneState {
                radio: RadioState::On,
                tx: broadcast::channel(INDICATION_CHANNEL_CAPACITY).0,
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(ModemState {
                slots,
                phones,
                channels: BTreeMap::new(),
                next_channel: 1,
                faults: Faults::default(),
            })),
        }
    }

    /// Builder form of [`insert_card`](Self::insert_card) that emits nothing.
    pub fn with_card(self, slot: usize, image: &CardImage) -> Result<Self, ImageError> {
        let runtime = CardRuntime::from_image(image)?;
        if let Some(s) = self.lock().slots.get_mut(slot) {
            s.card = Some(runtime);
        }
        Ok(self)
    }

    fn lock(&self) -> MutexGuard<'_, ModemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ril(&self, phone: usize) -> Arc<SimulatedRil> {
        Arc::new(SimulatedRil {
            phone,
            modem: self.clone(),
        })
    }

    /// One transport per phone, in phone order.
    pub fn rils(&self) -> Vec<Arc<dyn CommandsInterface>> {
        let count = self.lock().phones.len();
        (0..count)
            .map(|p| self.ril(p) as Arc<dyn CommandsInterface>)
            .collect()
    }

    // ── Card insertion / removal ────────────────────────────────────

    pub fn insert_card(&self, slot: usize, image: &CardImage) -> Result<(), ImageError> {
        let runtime = CardRuntime::from_image(image)?;
        let mut state = self.lock();
        if let Some(s) = state.slots.get_mut(slot) {
            s.card = Some(runtime);
        }
        debug!(slot, "simulated card inserted");
        state.emit_slot_change(slot);
        Ok(())
    }

    pub fn remove_card(&self, slot: usize) {
        let mut state = self.lock();
        if let Some(s) = state.slots.get_mut(slot) {
            s.card = None;
        }
        debug!(slot, "simulated card removed");
        state.emit_slot_change(slot);
    }

    /// Add a port to `slot`, mapped to `phone`. Emits nothing.
    pub fn add_port(&self, slot: usize, phone: Option<usize>, active: bool) {
        if let Some(s) = self.lock().slots.get_mut(slot) {
            s.ports.push(PortState { active, phone });
        }
    }

    /// Activate or deactivate a port and report the new slot status.
    pub fn set_port_active(&self, slot: usize, port: usize, active: bool) {
        let mut state = self.lock();
        if let Some(p) = state.slots.get_mut(slot).and_then(|s| s.ports.get_mut(port)) {
            p.active = active;
        }
        let status = state.slot_status();
        state.emit(0, RilIndication::IccSlotStatusChanged(status));
    }

    // ── Radio ───────────────────────────────────────────────────────

    pub fn set_radio_state(&self, phone: usize, radio: RadioState) {
        let mut state = self.lock();
        if let Some(p) = state.phones.get_mut(phone) {
            p.radio = radio;
        }
        state.emit(phone, RilIndication::RadioStateChanged(radio));
    }

    // ── Card content ────────────────────────────────────────────────

    /// Overwrite a transparent file without notifying anyone.
    pub fn write_transparent(&self, slot: usize, aid: Option<&str>, ef: u16, data: Vec<u8>) {
        if let Some(card) = self.lock().slots.get_mut(slot).and_then(|s| s.card.as_mut()) {
            card.write_transparent(aid, ef, data);
        }
    }

    /// Overwrite a linear fixed file without notifying anyone.
    pub fn write_records(&self, slot: usize, aid: Option<&str>, ef: u16, records: Vec<Vec<u8>>) {
        if let Some(card) = self.lock().slots.get_mut(slot).and_then(|s| s.card.as_mut()) {
            card.write_records(aid, ef, records);
        }
    }

    pub fn read_transparent(&self, slot: usize, aid: Option<&str>, ef: u16) -> Option<Vec<u8>> {
        self.lock()
            .slots
            .get(slot)
            .and_then(|s| s.card.as_ref())
            .and_then(|c| c.read_transparent(aid, ef))
    }

    pub fn phonebook_entries(&self, slot: usize) -> Vec<SimPhonebookRecord> {
        self.lock()
            .slots
            .get(slot)
            .and_then(|s| s.card.as_ref())
            .map(|c| c.phonebook.values().cloned().collect())
            .unwrap_or_default()
    }

    // ── Indications ─────────────────────────────────────────────────

    pub fn refresh(&self, phone: usize, refresh: RefreshResult) {
        self.lock().emit(phone, RilIndication::SimRefresh(refresh));
    }

    pub fn store_sms(&self, phone: usize, record: u8) {
        self.lock().emit(phone, RilIndication::NewSmsOnSim { record });
    }

    pub fn phonebook_changed(&self, phone: usize) {
        self.lock().emit(phone, RilIndication::SimPhonebookChanged);
    }

    /// Ask phones mapped to `slot` to re-query card status.
    pub fn notify_status_changed(&self, slot: usize) {
        self.lock().emit_slot_change(slot);
    }

    // ── Fault injection ─────────────────────────────────────────────

    /// Every I/O on `ef` fails with `6A 82` until cleared.
    pub fn fail_ef(&self, ef: u16) {
        self.lock().faults.failing_efs.insert(ef);
    }

    pub fn clear_faults(&self) {
        self.lock().faults = Faults::default();
    }

    /// The next `count` phonebook fetches end in an error indication.
    pub fn fail_phonebook_fetches(&self, count: u32) {
        self.lock().faults.phonebook_fetch_failures = count;
    }

    /// Make phonebook writes report `id` regardless of what was written.
    pub fn force_phonebook_update_id(&self, id: Option<u32>) {
        self.lock().faults.phonebook_update_id = id;
    }

    /// AUTHENTICATE never answers while set.
    pub fn silence_authentication(&self, silent: bool) {
        self.lock().faults.silent_auth = silent;
    }

    pub fn open_channels(&self) -> Vec<i32> {
        self.lock().channels.keys().copied().collect()
    }
}

// ── SimulatedRil ─────────────────────────────────────────────────────

/// Transport for one phone of a [`SimulatedModem`].
pub struct SimulatedRil {
    phone: usize,
    modem: SimulatedModem,
}

impl SimulatedRil {
    pub fn phone_id(&self) -> usize {
        self.phone
    }

    pub fn modem(&self) -> &SimulatedModem {
        &self.modem
    }

    fn with_card<T: Send + 'static>(
        &self,
        f: impl FnOnce(&mut CardRuntime) -> Result<T, RilError>,
    ) -> RilFuture<T> {
        let result = {
            let mut state = self.modem.lock();
            if state.phones.get(self.phone).map(|p| p.radio) == Some(RadioState::Unavailable) {
                Err(RilError::RadioNotAvailable)
            } else {
                state.card_mut(self.phone).and_then(f)
            }
        };
        future::ready(result).boxed()
    }

    /// Run a credential operation and ask for a status re-query on success.
    fn credential(
        &self,
        f: impl FnOnce(&mut CardRuntime) -> Result<(), RilError>,
    ) -> RilFuture<()> {
        let result = {
            let mut state = self.modem.lock();
            let result = state.card_mut(self.phone).and_then(f);
            state.emit(self.phone, RilIndication::IccStatusChanged);
            result
        };
        future::ready(result).boxed()
    }
}

impl CommandsInterface for SimulatedRil {
    fn radio_state(&self) -> RadioState {
        self.modem
            .lock()
            .phones
            .get(self.phone)
            .map_or(RadioState::Unavailable, |p| p.radio)
    }

    fn indications(&self) -> broadcast::Receiver<RilIndication> {
        let state = self.modem.lock();
        state.phones.get(self.phone).map_or_else(
            || broadcast::channel(1).1,
            |p| p.tx.subscribe(),
        )
    }

    fn get_icc_card_status(&self) -> RilFuture<CardStatus> {
        let state = self.modem.lock();
        let result = match state.locate(self.phone) {
            Some((slot, port)) => {
                let mapping = SlotPortMapping {
                    physical_slot_index: Some(slot),
                    port_index: port,
                };
                Ok(state.slots[slot].card.as_ref().map_or_else(
                    || CardStatus {
                        slot_port_mapping: mapping,
                        ..CardStatus::default()
                    },
                    |card| card.card_status(mapping),
                ))
            }
            None => Ok(CardStatus::default()),
        };
        future::ready(result).boxed()
    }

    fn get_icc_slots_status(&self) -> RilFuture<Vec<SlotStatus>> {
        future::ready(Ok(self.modem.lock().slot_status())).boxed()
    }

    fn icc_io_for_app(&self, request: IccIoRequest) -> RilFuture<IccIoResult> {
        if self.modem.lock().faults.failing_efs.contains(&request.file_id) {
            return future::ready(Ok(IccIoResult::status(0x6A, 0x82))).boxed();
        }
        self.with_card(move |card| Ok(card.io(&request)))
    }

    fn supply_icc_pin(&self, pin: String, _aid: Option<String>) -> RilFuture<()> {
        self.credential(move |card| card.supply_pin(&pin))
    }

    fn supply_icc_puk(&self, puk: String, new_pin: String, _aid: Option<String>) -> RilFuture<()> {
        self.credential(move |card| card.supply_puk(&puk, &new_pin))
    }

    fn supply_icc_pin2(&self, pin2: String, _aid: Option<String>) -> RilFuture<()> {
        self.with_card(move |card| card.supply_pin2(&pin2))
    }

    fn supply_icc_puk2(
        &self,
        puk2: String,
        new_pin2: String,
        _aid: Option<String>,
    ) -> RilFuture<()> {
        self.with_card(move |card| card.supply_puk2(&puk2, &new_pin2))
    }

    fn change_icc_pin(
        &self,
        old_pin: String,
        new_pin: String,
        _aid: Option<String>,
    ) -> RilFuture<()> {
        self.with_card(move |card| card.change_pin(&old_pin, &new_pin))
    }

    fn set_facility_lock(
        &self,
        facility: Facility,
        lock: bool,
        password: String,
        _aid: Option<String>,
    ) -> RilFuture<()> {
        self.credential(move |card| match facility {
            Facility::SimLock => {
                card.check_pin(&password)?;
                card.set_pin_enabled(lock);
                Ok(())
            }
            Facility::FixedDialing => {
                card.supply_pin2(&password)?;
                card.fdn_enabled = lock;
                Ok(())
            }
        })
    }

    fn query_facility_lock(&self, facility: Facility, _aid: Option<String>) -> RilFuture<bool> {
        self.with_card(move |card| {
            Ok(match facility {
                Facility::SimLock => card.pin_enabled,
                Facility::FixedDialing => card.fdn_enabled,
            })
        })
    }

    fn open_logical_channel(&self, aid: String, _p2: u8) -> RilFuture<ChannelResponse> {
        let mut state = self.modem.lock();
        let result = if state.card_mut(self.phone).is_err() {
            Err(RilError::SimAbsent)
        } else if aid.is_empty() {
            Err(RilError::InvalidArguments {
                message: "empty AID".into(),
            })
        } else {
            let channel = state.next_channel;
            state.next_channel += 1;
            state.channels.insert(channel, self.phone);
            Ok(ChannelResponse {
                channel,
                select_response: vec![0x90, 0x00],
            })
        };
        future::ready(result).boxed()
    }

    fn close_logical_channel(&self, channel: i32) -> RilFuture<()> {
        let removed = self.modem.lock().channels.remove(&channel);
        let result = removed.map(|_| ()).ok_or_else(|| RilError::InvalidArguments {
            message: format!("channel {channel} not open"),
        });
        future::ready(result).boxed()
    }

    fn transmit_apdu_logical_channel(&self, channel: i32, apdu: Apdu) -> RilFuture<IccIoResult> {
        let open = self.modem.lock().channels.contains_key(&channel);
        let result = if open {
            Ok(IccIoResult::ok(apdu.data))
        } else {
            Err(RilError::InvalidArguments {
                message: format!("channel {channel} not open"),
            })
        };
        future::ready(result).boxed()
    }

    fn transmit_apdu_basic_channel(&self, apdu: Apdu) -> RilFuture<IccIoResult> {
        self.with_card(move |_| Ok(IccIoResult::ok(apdu.data)))
    }

    fn send_envelope(&self, contents: Vec<u8>) -> RilFuture<Vec<u8>> {
        self.with_card(move |_| {
            if contents.is_empty() {
                Err(RilError::InvalidArguments {
                    message: "empty envelope".into(),
                })
            } else {
                Ok(vec![0x90, 0x00])
            }
        })
    }

    fn request_icc_sim_authentication(
        &self,
        _auth_context: u8,
        data: Vec<u8>,
        _aid: Option<String>,
    ) -> RilFuture<IccIoResult> {
        if self.modem.lock().faults.silent_auth {
            return future::pending().boxed();
        }
        self.with_card(move |card| {
            Ok(IccIoResult::ok(
                card.auth_response.clone().unwrap_or_else(|| {
                    let mut echoed = data;
                    echoed.reverse();
                    echoed
                }),
            ))
        })
    }

    fn get_sim_phonebook_capacity(&self) -> RilFuture<PhonebookCapacity> {
        self.with_card(|card| {
            if card.phonebook_capacity == 0 {
                return Err(RilError::RequestNotSupported {
                    request: "get_sim_phonebook_capacity",
                });
            }
            Ok(PhonebookCapacity {
                max_adn_records: card.phonebook_capacity,
                used_adn_records: u32::try_from(card.phonebook.len()).unwrap_or(u32::MAX),
                max_name_len: 14,
                max_number_len: 20,
                ..PhonebookCapacity::default()
            })
        })
    }

    fn get_sim_phonebook_records(&self) -> RilFuture<()> {
        let (records, fail, tx) = {
            let mut state = self.modem.lock();
            let fail = state.faults.phonebook_fetch_failures > 0;
            if fail {
                state.faults.phonebook_fetch_failures -= 1;
            }
            let records: Vec<SimPhonebookRecord> = match state.card_mut(self.phone) {
                Ok(card) => card.phonebook.values().cloned().collect(),
                Err(e) => return future::ready(Err(e)).boxed(),
            };
            let tx = state.phones.get(self.phone).map(|p| p.tx.clone());
            (records, fail, tx)
        };
        let Some(tx) = tx else {
            return future::ready(Err(RilError::generic("unknown phone"))).boxed();
        };
        stream_phonebook(tx, records, fail)
    }

    fn update_sim_phonebook_record(&self, record: SimPhonebookRecord) -> RilFuture<u32> {
        let forced = self.modem.lock().faults.phonebook_update_id;
        self.with_card(move |card| {
            let id = card.update_phonebook(record)?;
            Ok(forced.unwrap_or(id))
        })
    }
}

/// Deliver phonebook records the way modems do: a few partial batches,
/// then a completion marker.
fn stream_phonebook(
    tx: broadcast::Sender<RilIndication>,
    records: Vec<SimPhonebookRecord>,
    fail: bool,
) -> BoxFuture<'static, Result<(), RilError>> {
    async move {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            if fail {
                let _ = tx.send(RilIndication::SimPhonebookRecords {
                    status: PhonebookReceivedStatus::Error,
                    records: Vec::new(),
                });
                return;
            }
            let mut batches: Vec<Vec<SimPhonebookRecord>> =
                records.chunks(PHONEBOOK_BATCH).map(<[_]>::to_vec).collect();
            let last = batches.pop().unwrap_or_default();
            for batch in batches {
                let _ = tx.send(RilIndication::SimPhonebookRecords {
                    status: PhonebookReceivedStatus::Ok,
                    records: batch,
                });
            }
            let _ = tx.send(RilIndication::SimPhonebookRecords {
                status: PhonebookReceivedStatus::Complete,
                records: last,
            });
        });
        Ok(())
    }
    .boxed()
}
