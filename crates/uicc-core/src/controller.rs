// ── Controller ──
//
// Top-level facade. Owns the slots, listens to every phone's transport
// indications and routes card and slot status reports down the tree.
// Card presence changes fan out on one broadcast channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uicc_ril::{AppFamily, CommandsInterface, RadioState, RilIndication, SlotStatus};

use crate::app::UiccCardApplication;
use crate::card::UiccCard;
use crate::config::UiccConfig;
use crate::error::UiccError;
use crate::phonebook::SimPhonebookCache;
use crate::pin_storage::PinStorage;
use crate::port::UiccPort;
use crate::profile::UiccProfile;
use crate::records::IccRecords;
use crate::slot::UiccSlot;

const EVENT_CHANNEL_SIZE: usize = 64;

/// Card lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UiccEvent {
    CardAdded { slot: usize, phone_id: usize },
    CardRemoved { slot: usize, phone_id: usize },
    /// A card came or went on a device without hot-swap support.
    RestartRequired { slot: usize },
    InactivePort { slot: usize, port_index: usize, phone_id: usize },
    /// A card status report for `phone_id` has been applied.
    IccChanged { phone_id: usize },
}

/// The main entry point for consumers.
///
/// Cheaply cloneable. Build it with one transport per phone, then call
/// [`start()`](Self::start) from inside a tokio runtime.
#[derive(Clone)]
pub struct UiccController {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<UiccConfig>,
    cis: Vec<Arc<dyn CommandsInterface>>,
    pin_storage: Arc<dyn PinStorage>,
    slots: Mutex<Vec<UiccSlot>>,
    phone_to_slot: DashMap<usize, usize>,
    events: broadcast::Sender<UiccEvent>,
    cancel: CancellationToken,
    started: AtomicBool,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl UiccController {
    pub fn new(
        config: UiccConfig,
        cis: Vec<Arc<dyn CommandsInterface>>,
        pin_storage: Arc<dyn PinStorage>,
    ) -> Self {
        if config.num_phones != cis.len() {
            warn!(
                configured = config.num_phones,
                transports = cis.len(),
                "phone count differs from transports; using transports"
            );
        }
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                cis,
                pin_storage,
                slots: Mutex::new(Vec::new()),
                phone_to_slot: DashMap::new(),
                events,
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &UiccConfig {
        &self.inner.config
    }

    pub fn num_phones(&self) -> usize {
        self.inner.cis.len()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn one listener per phone. Each subscribes to its indications
    /// before asking for the initial status. Calling twice is a no-op.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut handles = lock(&self.inner.task_handles);
        for phone_id in 0..self.inner.cis.len() {
            let ctrl = self.clone();
            let cancel = self.inner.cancel.child_token();
            handles.push(tokio::spawn(phone_task(ctrl, phone_id, cancel)));
        }
        info!(phones = self.inner.cis.len(), "uicc controller started");
    }

    /// Stop the listeners and dispose every card.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = lock(&self.inner.task_handles).drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        for slot in self.slots() {
            slot.dispose();
        }
        debug!("uicc controller shut down");
    }

    /// Re-query card status for `phone_id` and apply it.
    pub async fn refresh(&self, phone_id: usize) -> Result<(), UiccError> {
        let ci = self.ci(phone_id)?;
        let status = ci.get_icc_card_status().await?;
        self.on_card_status(&ci, &status, phone_id);
        Ok(())
    }

    fn ci(&self, phone_id: usize) -> Result<Arc<dyn CommandsInterface>, UiccError> {
        self.inner
            .cis
            .get(phone_id)
            .cloned()
            .ok_or_else(|| UiccError::InvalidArgument {
                message: format!("no phone {phone_id}"),
            })
    }

    fn slot_or_create(&self, index: usize) -> UiccSlot {
        let mut slots = lock(&self.inner.slots);
        while slots.len() <= index {
            let next = slots.len();
            debug!(slot = next, "slot created");
            slots.push(UiccSlot::new(
                next,
                Arc::clone(&self.inner.config),
                Arc::clone(&self.inner.pin_storage),
                self.inner.events.clone(),
                self.inner.cancel.child_token(),
            ));
        }
        slots[index].clone()
    }

    fn on_card_status(
        &self,
        ci: &Arc<dyn CommandsInterface>,
        status: &uicc_ril::CardStatus,
        phone_id: usize,
    ) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        let slot_index = status
            .slot_port_mapping
            .physical_slot_index
            .unwrap_or(phone_id);
        self.inner.phone_to_slot.insert(phone_id, slot_index);
        self.slot_or_create(slot_index)
            .update_card_status(ci, status, phone_id);
        let _ = self.inner.events.send(UiccEvent::IccChanged { phone_id });
    }

    fn on_slot_status(&self, status: &[SlotStatus]) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        for (index, slot_status) in status.iter().enumerate() {
            for port in slot_status.ports.iter().filter(|p| p.port_active) {
                if let Some(phone_id) = port.logical_slot_index {
                    self.inner.phone_to_slot.insert(phone_id, index);
                }
            }
            self.slot_or_create(index).update_slot_status(slot_status);
        }
    }

    fn on_radio_unavailable(&self, phone_id: usize) {
        if let Some(slot) = self.slot_for_phone(phone_id) {
            slot.on_radio_unavailable(phone_id);
        }
    }

    // ── Tree access ──────────────────────────────────────────────────

    pub fn slots(&self) -> Vec<UiccSlot> {
        lock(&self.inner.slots).clone()
    }

    pub fn slot(&self, index: usize) -> Option<UiccSlot> {
        lock(&self.inner.slots).get(index).cloned()
    }

    pub fn slot_for_phone(&self, phone_id: usize) -> Option<UiccSlot> {
        let index = *self.inner.phone_to_slot.get(&phone_id)?;
        self.slot(index)
    }

    pub fn card(&self, phone_id: usize) -> Option<UiccCard> {
        self.slot_for_phone(phone_id)?.card()
    }

    pub fn port(&self, phone_id: usize) -> Option<UiccPort> {
        self.card(phone_id)?.port_for_phone(phone_id)
    }

    pub fn profile(&self, phone_id: usize) -> Option<UiccProfile> {
        Some(self.port(phone_id)?.profile().clone())
    }

    pub fn application(&self, phone_id: usize, family: AppFamily) -> Option<UiccCardApplication> {
        self.profile(phone_id)?.application(family)
    }

    /// Records of the current application on `phone_id`.
    pub fn records(&self, phone_id: usize) -> Option<IccRecords> {
        self.profile(phone_id)?.records()
    }

    pub fn phonebook(&self, phone_id: usize) -> Option<SimPhonebookCache> {
        Some(self.profile(phone_id)?.phonebook().clone())
    }

    pub fn events(&self) -> broadcast::Receiver<UiccEvent> {
        self.inner.events.subscribe()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn query_card_status(ctrl: &UiccController, ci: &Arc<dyn CommandsInterface>, phone_id: usize) {
    match ci.get_icc_card_status().await {
        Ok(status) => ctrl.on_card_status(ci, &status, phone_id),
        Err(e) => warn!(phone_id, error = %e, "card status query failed"),
    }
}

async fn query_slot_status(ctrl: &UiccController, ci: &Arc<dyn CommandsInterface>) {
    match ci.get_icc_slots_status().await {
        Ok(status) => ctrl.on_slot_status(&status),
        Err(e) => debug!(error = %e, "slot status not available"),
    }
}

async fn phone_task(ctrl: UiccController, phone_id: usize, cancel: CancellationToken) {
    let Ok(ci) = ctrl.ci(phone_id) else {
        return;
    };
    let mut indications = ci.indications();
    // Slot status is global; phone 0 owns it.
    if phone_id == 0 {
        query_slot_status(&ctrl, &ci).await;
    }
    query_card_status(&ctrl, &ci, phone_id).await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = indications.recv() => match result {
                Ok(RilIndication::IccStatusChanged | RilIndication::RadioStateChanged(RadioState::On)) => {
                    query_card_status(&ctrl, &ci, phone_id).await;
                }
                Ok(RilIndication::IccSlotStatusChanged(status)) => ctrl.on_slot_status(&status),
                Ok(RilIndication::RadioStateChanged(RadioState::Unavailable)) => {
                    info!(phone_id, "radio unavailable");
                    ctrl.on_radio_unavailable(phone_id);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    warn!(phone_id, skipped = n, "indication receiver lagged; re-querying");
                    query_card_status(&ctrl, &ci, phone_id).await;
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!(phone_id, "phone listener stopped");
}
