// uicc-ril: transport boundary between the UICC stack and the modem

pub mod commands;
pub mod ef;
pub mod error;
pub mod indication;
pub mod io;
pub mod sim;
pub mod types;

pub use commands::{CommandsInterface, RilFuture};
pub use error::RilError;
pub use indication::{PhonebookReceivedStatus, RefreshKind, RefreshResult, RilIndication};
pub use io::{Apdu, ChannelResponse, IccIoRequest, IccIoResult};
pub use sim::{CardImage, SimulatedModem, SimulatedRil};
pub use types::{
    AppFamily, AppState, AppStatus, AppType, CardState, CardStatus, Facility, MepMode, PersoSubState,
    PhonebookCapacity, PinState, RadioState, SimPhonebookRecord, SimPortInfo, SlotPortMapping,
    SlotStatus,
};
