// ── Slot ──
//
// One card receptacle. Creates and disposes the card as status reports
// come in, tracks which phone each port serves and derives capabilities
// from the ATR. Card added/removed events are raised only when the phone
// that saw the change already had its radio on, so the flurry of reports
// during power-up stays quiet.
//
// Lock order: slot, then card. Nothing below a slot holds a handle
// back up to it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uicc_ril::{CardState, CardStatus, CommandsInterface, MepMode, RadioState, SlotStatus};

use crate::atr::{AnswerToReset, VoltageClass};
use crate::card::UiccCard;
use crate::config::UiccConfig;
use crate::controller::UiccEvent;
use crate::pin_storage::PinStorage;
use crate::stream::SnapshotStream;

/// Port entry in a [`SlotSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotPort {
    pub port_index: usize,
    pub phone_id: Option<usize>,
    pub iccid: Option<String>,
}

/// Published view of a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotSnapshot {
    pub index: usize,
    pub active: bool,
    pub card_state: Option<CardState>,
    pub card_id: Option<String>,
    pub is_removable: bool,
    pub is_euicc: bool,
    pub extended_apdu: bool,
    pub min_voltage_class: Option<VoltageClass>,
    pub mep_mode: MepMode,
    pub eid: Option<String>,
    pub ports: Vec<SlotPort>,
}

struct SlotInfo {
    active: bool,
    /// `None` until the first report and again after the radio went away.
    card_state: Option<CardState>,
    card: Option<UiccCard>,
    atr: Option<String>,
    capabilities: Option<AnswerToReset>,
    eid: Option<String>,
    mep_mode: MepMode,
    port_to_phone: BTreeMap<usize, usize>,
    port_iccid: BTreeMap<usize, String>,
    last_radio_state: BTreeMap<usize, RadioState>,
}

impl SlotInfo {
    fn is_euicc(&self) -> bool {
        self.capabilities.as_ref().is_some_and(|c| c.is_euicc)
    }

    fn last_radio_on(&self, phone_id: usize) -> bool {
        self.last_radio_state.get(&phone_id) == Some(&RadioState::On)
    }

    /// Parse and cache capabilities when the ATR changes.
    fn set_atr(&mut self, index: usize, atr: Option<&str>) {
        let Some(atr) = atr.filter(|a| !a.is_empty()) else {
            return;
        };
        if self.atr.as_deref() == Some(atr) {
            return;
        }
        self.atr = Some(atr.to_owned());
        self.capabilities = match AnswerToReset::parse(atr) {
            Ok(parsed) => {
                debug!(slot = index, euicc = parsed.is_euicc, extended_apdu = parsed.extended_apdu, "ATR parsed");
                Some(parsed)
            }
            Err(e) => {
                warn!(slot = index, error = %e, "unparseable ATR");
                None
            }
        };
    }
}

/// Handle onto one physical slot. Cheap to clone.
#[derive(Clone)]
pub struct UiccSlot {
    inner: Arc<Inner>,
}

struct Inner {
    index: usize,
    is_removable: bool,
    config: Arc<UiccConfig>,
    pin_storage: Arc<dyn PinStorage>,
    events: broadcast::Sender<UiccEvent>,
    state: Mutex<SlotInfo>,
    snapshot: watch::Sender<Arc<SlotSnapshot>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for UiccSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiccSlot")
            .field("index", &self.inner.index)
            .finish_non_exhaustive()
    }
}

impl UiccSlot {
    pub(crate) fn new(
        index: usize,
        config: Arc<UiccConfig>,
        pin_storage: Arc<dyn PinStorage>,
        events: broadcast::Sender<UiccEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let is_removable = !config.non_removable_slots.contains(&index);
        let info = SlotInfo {
            active: true,
            card_state: None,
            card: None,
            atr: None,
            capabilities: None,
            eid: None,
            mep_mode: MepMode::None,
            port_to_phone: BTreeMap::new(),
            port_iccid: BTreeMap::new(),
            last_radio_state: BTreeMap::new(),
        };
        let (snapshot, _) = watch::channel(Arc::new(build_snapshot(index, is_removable, &info)));
        Self {
            inner: Arc::new(Inner {
                index,
                is_removable,
                config,
                pin_storage,
                events,
                state: Mutex::new(info),
                snapshot,
                cancel,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotInfo> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, info: &SlotInfo) {
        let next = build_snapshot(self.inner.index, self.inner.is_removable, info);
        self.inner.snapshot.send_if_modified(|current| {
            if **current == next {
                return false;
            }
            *current = Arc::new(next);
            true
        });
    }

    fn emit(&self, events: Vec<UiccEvent>) {
        for event in events {
            info!(slot = self.inner.index, ?event, "slot event");
            // Nobody listening is fine.
            let _ = self.inner.events.send(event);
        }
    }

    fn card_presence_events(&self, phone_id: usize, added: bool) -> Vec<UiccEvent> {
        let slot = self.inner.index;
        let mut events = vec![if added {
            UiccEvent::CardAdded { slot, phone_id }
        } else {
            UiccEvent::CardRemoved { slot, phone_id }
        }];
        if !self.inner.config.hotswap_supported {
            events.push(UiccEvent::RestartRequired { slot });
        }
        events
    }

    // ── Status reports ───────────────────────────────────────────────

    /// Apply the card status reported by `phone_id`.
    pub(crate) fn update_card_status(
        &self,
        ci: &Arc<dyn CommandsInterface>,
        status: &CardStatus,
        phone_id: usize,
    ) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        let radio = ci.radio_state();
        let mut events = Vec::new();
        let mut info = self.lock();

        let old_state = info.card_state;
        let new_state = status.card_state;
        info.card_state = Some(new_state);
        info.set_atr(self.inner.index, status.atr.as_deref());
        if status.eid.as_deref().is_some_and(|e| !e.is_empty()) {
            info.eid.clone_from(&status.eid);
        }
        info.mep_mode = status.supported_mep_mode;
        let port_index = status.slot_port_mapping.port_index;
        info.port_to_phone.insert(port_index, phone_id);
        match status.iccid.as_deref().filter(|s| !s.is_empty()) {
            Some(iccid) => {
                info.port_iccid.insert(port_index, iccid.to_owned());
            }
            None => {
                info.port_iccid.remove(&port_index);
            }
        }

        if new_state == CardState::Absent {
            if let Some(card) = info.card.take() {
                card.dispose();
            }
            if old_state != Some(CardState::Absent) && info.last_radio_on(phone_id) {
                events.extend(self.card_presence_events(phone_id, false));
            }
        } else {
            let stale = old_state == Some(CardState::Absent) || info.card.is_none();
            if stale {
                if let Some(card) = info.card.take() {
                    debug!(slot = self.inner.index, "disposing stale card");
                    card.dispose();
                }
                info.card = Some(UiccCard::new(
                    self.inner.index,
                    info.is_euicc(),
                    Arc::clone(&self.inner.config),
                    Arc::clone(&self.inner.pin_storage),
                    self.inner.cancel.child_token(),
                ));
            }
            if let Some(card) = &info.card {
                card.update(ci, status, phone_id);
            }
            if old_state == Some(CardState::Absent) && info.last_radio_on(phone_id) {
                events.extend(self.card_presence_events(phone_id, true));
            }
        }
        info.last_radio_state.insert(phone_id, radio);
        self.publish(&info);
        drop(info);
        self.emit(events);
    }

    /// Apply this slot's entry from a slot status report.
    pub(crate) fn update_slot_status(&self, status: &SlotStatus) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        let mut events = Vec::new();
        let mut info = self.lock();
        info.active = status.ports.iter().any(|p| p.port_active);
        info.set_atr(self.inner.index, status.atr.as_deref());
        if status.eid.as_deref().is_some_and(|e| !e.is_empty()) {
            info.eid.clone_from(&status.eid);
        }
        info.mep_mode = status.supported_mep_mode;

        for (port_index, port) in status.ports.iter().enumerate() {
            if port.port_active {
                if let Some(phone_id) = port.logical_slot_index {
                    info.port_to_phone.insert(port_index, phone_id);
                }
                match port.iccid.as_deref().filter(|s| !s.is_empty()) {
                    Some(iccid) => {
                        info.port_iccid.insert(port_index, iccid.to_owned());
                    }
                    None => {
                        info.port_iccid.remove(&port_index);
                    }
                }
                continue;
            }
            let Some(phone_id) = info.port_to_phone.remove(&port_index) else {
                continue;
            };
            if let Some(card) = &info.card {
                card.dispose_port(port_index);
            }
            info.port_iccid.remove(&port_index);
            info.last_radio_state.insert(phone_id, RadioState::Unavailable);
            events.push(UiccEvent::InactivePort {
                slot: self.inner.index,
                port_index,
                phone_id,
            });
        }

        if !info.active {
            if let Some(card) = info.card.take() {
                debug!(slot = self.inner.index, "slot inactive; card released");
                card.dispose();
            }
            info.card_state = Some(status.card_state);
        }
        self.publish(&info);
        drop(info);
        self.emit(events);
    }

    /// The radio of `phone_id` went away: drop the card; its profiles
    /// publish `UNKNOWN`.
    pub(crate) fn on_radio_unavailable(&self, phone_id: usize) {
        let mut info = self.lock();
        if let Some(card) = info.card.take() {
            debug!(slot = self.inner.index, phone_id, "radio unavailable; card released");
            card.dispose();
        }
        info.card_state = None;
        info.last_radio_state.insert(phone_id, RadioState::Unavailable);
        self.publish(&info);
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn index(&self) -> usize {
        self.inner.index
    }

    pub fn card(&self) -> Option<UiccCard> {
        self.lock().card.clone()
    }

    pub fn card_state(&self) -> Option<CardState> {
        self.lock().card_state
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn is_removable(&self) -> bool {
        self.inner.is_removable
    }

    pub fn is_euicc(&self) -> bool {
        self.lock().is_euicc()
    }

    pub fn is_extended_apdu_supported(&self) -> bool {
        self.lock()
            .capabilities
            .as_ref()
            .is_some_and(|c| c.extended_apdu)
    }

    pub fn min_voltage_class(&self) -> Option<VoltageClass> {
        self.lock()
            .capabilities
            .as_ref()
            .and_then(AnswerToReset::min_voltage_class)
    }

    pub fn is_multiple_enabled_profile_supported(&self) -> bool {
        self.lock().mep_mode.is_mep()
    }

    /// Phone served by `port_index`, if mapped.
    pub fn phone_for_port(&self, port_index: usize) -> Option<usize> {
        self.lock().port_to_phone.get(&port_index).copied()
    }

    /// Last ICCID seen on `port_index`.
    pub fn iccid(&self, port_index: usize) -> Option<String> {
        self.lock().port_iccid.get(&port_index).cloned()
    }

    pub fn snapshot(&self) -> Arc<SlotSnapshot> {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> SnapshotStream<SlotSnapshot> {
        SnapshotStream::new(self.inner.snapshot.subscribe())
    }

    /// Dispose the card. Idempotent.
    pub fn dispose(&self) {
        self.inner.cancel.cancel();
        let card = self.lock().card.take();
        if let Some(card) = card {
            card.dispose();
        }
    }
}

fn build_snapshot(index: usize, is_removable: bool, info: &SlotInfo) -> SlotSnapshot {
    let mut port_indices: Vec<usize> = info
        .port_to_phone
        .keys()
        .chain(info.port_iccid.keys())
        .copied()
        .collect();
    port_indices.sort_unstable();
    port_indices.dedup();
    SlotSnapshot {
        index,
        active: info.active,
        card_state: info.card_state,
        card_id: info.card.as_ref().and_then(UiccCard::card_id),
        is_removable,
        is_euicc: info.is_euicc(),
        extended_apdu: info.capabilities.as_ref().is_some_and(|c| c.extended_apdu),
        min_voltage_class: info
            .capabilities
            .as_ref()
            .and_then(AnswerToReset::min_voltage_class),
        mep_mode: info.mep_mode,
        eid: info.eid.clone(),
        ports: port_indices
            .into_iter()
            .map(|port_index| SlotPort {
                port_index,
                phone_id: info.port_to_phone.get(&port_index).copied(),
                iccid: info.port_iccid.get(&port_index).cloned(),
            })
            .collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pin_storage::MemoryPinStorage;
    use uicc_ril::sim::AppImage;
    use uicc_ril::{AppType, CardImage, SimulatedModem};

    fn image() -> CardImage {
        CardImage::new("8901260321111851072")
            .with_app(AppImage::new(AppType::Usim).aid("A0000000871002"))
    }

    fn slot(config: UiccConfig) -> (UiccSlot, broadcast::Receiver<UiccEvent>) {
        let (events, rx) = broadcast::channel(16);
        let slot = UiccSlot::new(
            0,
            Arc::new(config),
            Arc::new(MemoryPinStorage::new()),
            events,
            CancellationToken::new(),
        );
        (slot, rx)
    }

    async fn report(slot: &UiccSlot, modem: &SimulatedModem) {
        let ci: Arc<dyn CommandsInterface> = modem.ril(0);
        let status = ci.get_icc_card_status().await.unwrap();
        slot.update_card_status(&ci, &status, 0);
    }

    #[tokio::test]
    async fn first_report_after_power_up_is_quiet() {
        let modem = SimulatedModem::new(1).with_card(0, &image()).unwrap();
        let (slot, mut events) = slot(UiccConfig::default());
        report(&slot, &modem).await;
        assert!(slot.card().is_some());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn present_absent_present_replaces_the_card() {
        let modem = SimulatedModem::new(1).with_card(0, &image()).unwrap();
        let (slot, mut events) = slot(UiccConfig::default());
        report(&slot, &modem).await;
        let first = slot.card().unwrap();

        modem.remove_card(0);
        report(&slot, &modem).await;
        assert!(first.is_disposed());
        assert!(slot.card().is_none());
        assert_eq!(
            events.try_recv().unwrap(),
            UiccEvent::CardRemoved { slot: 0, phone_id: 0 }
        );

        modem.insert_card(0, &image()).unwrap();
        report(&slot, &modem).await;
        let second = slot.card().unwrap();
        assert!(!second.is_disposed());
        assert_eq!(
            events.try_recv().unwrap(),
            UiccEvent::CardAdded { slot: 0, phone_id: 0 }
        );
    }

    #[tokio::test]
    async fn no_hotswap_asks_for_restart() {
        let modem = SimulatedModem::new(1).with_card(0, &image()).unwrap();
        let config = UiccConfig {
            hotswap_supported: false,
            ..UiccConfig::default()
        };
        let (slot, mut events) = slot(config);
        report(&slot, &modem).await;
        modem.remove_card(0);
        report(&slot, &modem).await;
        assert!(matches!(events.try_recv().unwrap(), UiccEvent::CardRemoved { .. }));
        assert_eq!(events.try_recv().unwrap(), UiccEvent::RestartRequired { slot: 0 });
    }

    #[tokio::test]
    async fn inactive_port_is_disposed() {
        let modem = SimulatedModem::new(1).with_card(0, &image()).unwrap();
        let (slot, mut events) = slot(UiccConfig::default());
        report(&slot, &modem).await;
        let port = slot.card().unwrap().port(0).unwrap();

        modem.set_port_active(0, 0, false);
        let status = modem.ril(0).get_icc_slots_status().await.unwrap();
        slot.update_slot_status(&status[0]);
        assert!(port.is_disposed());
        assert!(slot.card().is_none());
        assert!(!slot.is_active());
        assert_eq!(
            events.try_recv().unwrap(),
            UiccEvent::InactivePort {
                slot: 0,
                port_index: 0,
                phone_id: 0
            }
        );
    }

    #[tokio::test]
    async fn atr_capabilities_are_cached() {
        // TD1 -> T=0, TD2 -> T=15 with TA (classes B|C) and TB (b8|b2).
        let mut image = image();
        image.atr = Some("3B9596803F0682807321C0406A".into());
        let modem = SimulatedModem::new(1).with_card(0, &image).unwrap();
        let (slot, _events) = slot(UiccConfig::default());
        report(&slot, &modem).await;
        assert!(slot.is_euicc());
        assert!(slot.is_extended_apdu_supported());
        assert_eq!(slot.min_voltage_class(), Some(VoltageClass::C));
        assert!(slot.card().unwrap().is_euicc());
    }

    #[tokio::test]
    async fn radio_loss_releases_the_card() {
        let modem = SimulatedModem::new(1).with_card(0, &image()).unwrap();
        let (slot, mut events) = slot(UiccConfig::default());
        report(&slot, &modem).await;
        let card = slot.card().unwrap();
        slot.on_radio_unavailable(0);
        assert!(card.is_disposed());
        assert_eq!(slot.card_state(), None);

        // Coming back from radio loss is a power-up, not an insertion.
        report(&slot, &modem).await;
        assert!(slot.card().is_some());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reports_and_card_reads_interleave() {
        let modem = SimulatedModem::new(1).with_card(0, &image()).unwrap();
        let (slot, _events) = slot(UiccConfig::default());
        let ci: Arc<dyn CommandsInterface> = modem.ril(0);
        let status = ci.get_icc_card_status().await.unwrap();
        slot.update_card_status(&ci, &status, 0);

        let writer = {
            let slot = slot.clone();
            tokio::task::spawn_blocking(move || {
                for _ in 0..200 {
                    slot.update_card_status(&ci, &status, 0);
                }
            })
        };
        let reader = {
            let slot = slot.clone();
            tokio::task::spawn_blocking(move || {
                for _ in 0..200 {
                    let card = slot.card().unwrap();
                    assert_eq!(card.card_state(), CardState::Present);
                    assert_eq!(card.ports().len(), 1);
                }
            })
        };
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            writer.await.unwrap();
            reader.await.unwrap();
        })
        .await
        .unwrap();
        assert!(!slot.card().unwrap().is_disposed());
    }

    #[test]
    fn removability_follows_config() {
        let config = UiccConfig {
            non_removable_slots: vec![0],
            ..UiccConfig::default()
        };
        let (events, _rx) = broadcast::channel(1);
        let slot = UiccSlot::new(
            0,
            Arc::new(config),
            Arc::new(MemoryPinStorage::new()),
            events,
            CancellationToken::new(),
        );
        assert!(!slot.is_removable());
    }
}
