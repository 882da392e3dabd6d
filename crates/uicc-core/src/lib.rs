//! UICC lifecycle and record loading on top of a [`uicc_ril`] transport.
//!
//! The tree mirrors the hardware:
//!
//! - **[`UiccController`]**: owns every slot, listens to each phone's
//!   indications and routes card and slot status reports downward.
//!   Card presence changes are broadcast as [`UiccEvent`]s.
//!
//! - **[`UiccSlot`] → [`UiccCard`] → [`UiccPort`]**: structural layers.
//!   A slot classifies ATR capabilities and decides when a card is new;
//!   a port owns one profile and the logical channels opened through it.
//!
//! - **[`UiccProfile`]**: the applications visible through one port,
//!   the current application per radio family and the public
//!   [`ProfileState`] machine (PIN, PUK, network lock, ready, loaded).
//!
//! - **[`UiccCardApplication`] / [`IccRecords`]**: one card application
//!   and the elementary files it exposes, loaded by an actor and
//!   published as a [`RecordsSnapshot`].
//!
//! - **[`SimPhonebookCache`]**: modem-side phonebook with capacity
//!   negotiation, retry and serialized updates.
//!
//! Every actor publishes state through `watch` snapshots
//! ([`SnapshotStream`]) and condition-gated [`Registration`]s.

pub mod adn_cache;
pub mod app;
pub mod atr;
pub mod card;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod file_handler;
pub mod phonebook;
pub mod pii;
pub mod pin_storage;
pub mod port;
pub mod profile;
pub mod records;
pub mod registrant;
pub mod slot;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use app::{AppSnapshot, UiccCardApplication};
pub use atr::{AnswerToReset, VoltageClass};
pub use card::UiccCard;
pub use config::UiccConfig;
pub use controller::{UiccController, UiccEvent};
pub use error::UiccError;
pub use phonebook::{PhonebookSnapshot, SimPhonebookCache};
pub use pin_storage::{MemoryPinStorage, PinStorage};
pub use port::{LogicalChannel, UiccPort};
pub use profile::{AppTable, OperatorInfo, ProfileSnapshot, ProfileState, UiccProfile};
pub use records::{IccRecords, RecordsEvent, RecordsFamily, RecordsSnapshot, SpnDisplayCondition};
pub use registrant::Registration;
pub use slot::{SlotSnapshot, UiccSlot};
pub use stream::SnapshotStream;
