//! The request surface the UICC stack needs from a modem.
//!
//! Every request returns a boxed `'static` future so callers can either
//! await it in place or hand it to a spawned task that posts the
//! completion back into an actor mailbox.

use futures_util::future::BoxFuture;
use tokio::sync::broadcast;

use crate::error::RilError;
use crate::indication::RilIndication;
use crate::io::{Apdu, ChannelResponse, IccIoRequest, IccIoResult};
use crate::types::{
    CardStatus, Facility, PhonebookCapacity, RadioState, SimPhonebookRecord, SlotStatus,
};

pub type RilFuture<T> = BoxFuture<'static, Result<T, RilError>>;

/// Transport to one logical modem (one "phone").
///
/// Implementations must be cheap to share behind an `Arc`; the stack
/// holds one per phone and calls it from many tasks.
pub trait CommandsInterface: Send + Sync + 'static {
    // ── Radio / status ──────────────────────────────────────────────

    fn radio_state(&self) -> RadioState;

    /// Subscribe to unsolicited indications.
    fn indications(&self) -> broadcast::Receiver<RilIndication>;

    fn get_icc_card_status(&self) -> RilFuture<CardStatus>;

    fn get_icc_slots_status(&self) -> RilFuture<Vec<SlotStatus>>;

    // ── File I/O ────────────────────────────────────────────────────

    fn icc_io_for_app(&self, request: IccIoRequest) -> RilFuture<IccIoResult>;

    // ── PIN / PUK / facilities ──────────────────────────────────────

    fn supply_icc_pin(&self, pin: String, aid: Option<String>) -> RilFuture<()>;

    fn supply_icc_puk(&self, puk: String, new_pin: String, aid: Option<String>) -> RilFuture<()>;

    fn supply_icc_pin2(&self, pin2: String, aid: Option<String>) -> RilFuture<()>;

    fn supply_icc_puk2(&self, puk2: String, new_pin2: String, aid: Option<String>)
    -> RilFuture<()>;

    fn change_icc_pin(&self, old_pin: String, new_pin: String, aid: Option<String>)
    -> RilFuture<()>;

    fn set_facility_lock(
        &self,
        facility: Facility,
        lock: bool,
        password: String,
        aid: Option<String>,
    ) -> RilFuture<()>;

    fn query_facility_lock(&self, facility: Facility, aid: Option<String>) -> RilFuture<bool>;

    // ── Channels / APDUs ────────────────────────────────────────────

    fn open_logical_channel(&self, aid: String, p2: u8) -> RilFuture<ChannelResponse>;

    fn close_logical_channel(&self, channel: i32) -> RilFuture<()>;

    fn transmit_apdu_logical_channel(&self, channel: i32, apdu: Apdu) -> RilFuture<IccIoResult>;

    fn transmit_apdu_basic_channel(&self, apdu: Apdu) -> RilFuture<IccIoResult>;

    /// Send a (U)SAT envelope; returns the raw response.
    fn send_envelope(&self, contents: Vec<u8>) -> RilFuture<Vec<u8>>;

    fn request_icc_sim_authentication(
        &self,
        auth_context: u8,
        data: Vec<u8>,
        aid: Option<String>,
    ) -> RilFuture<IccIoResult>;

    // ── Phonebook ───────────────────────────────────────────────────

    fn get_sim_phonebook_capacity(&self) -> RilFuture<PhonebookCapacity>;

    /// Start streaming the phonebook. Records arrive as
    /// [`RilIndication::SimPhonebookRecords`].
    fn get_sim_phonebook_records(&self) -> RilFuture<()>;

    /// Write a record; resolves to the record index the modem used.
    fn update_sim_phonebook_record(&self, record: SimPhonebookRecord) -> RilFuture<u32>;
}
