// ── Card ──
//
// One physical or embedded chip in a slot. Owns a port per reported
// port index and remembers which phone each port serves.
//
// The owning slot's lock is held while a card updates; a card never calls
// back into its slot.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uicc_ril::{CardState, CardStatus, CommandsInterface};

use crate::config::UiccConfig;
use crate::pii::pii;
use crate::pin_storage::PinStorage;
use crate::port::{PortContext, UiccPort};

/// Handle onto one card. Cheap to clone.
#[derive(Clone)]
pub struct UiccCard {
    inner: Arc<Inner>,
}

struct Inner {
    physical_slot: usize,
    euicc: bool,
    config: Arc<UiccConfig>,
    pin_storage: Arc<dyn PinStorage>,
    state: Mutex<CardInfo>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct CardInfo {
    card_id: Option<String>,
    card_state: CardState,
    iccid: Option<String>,
    eid: Option<String>,
    ports: BTreeMap<usize, UiccPort>,
    phone_to_port: BTreeMap<usize, usize>,
}

impl std::fmt::Debug for UiccCard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiccCard")
            .field("physical_slot", &self.inner.physical_slot)
            .field("euicc", &self.inner.euicc)
            .finish_non_exhaustive()
    }
}

impl UiccCard {
    pub(crate) fn new(
        physical_slot: usize,
        euicc: bool,
        config: Arc<UiccConfig>,
        pin_storage: Arc<dyn PinStorage>,
        cancel: CancellationToken,
    ) -> Self {
        info!(slot = physical_slot, euicc, "card created");
        Self {
            inner: Arc::new(Inner {
                physical_slot,
                euicc,
                config,
                pin_storage,
                state: Mutex::new(CardInfo::default()),
                cancel,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CardInfo> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply the card status reported by `phone_id`.
    pub(crate) fn update(
        &self,
        ci: &Arc<dyn CommandsInterface>,
        status: &CardStatus,
        phone_id: usize,
    ) {
        if self.is_disposed() {
            return;
        }
        let mut info = self.lock();
        info.card_state = status.card_state;
        if status.iccid.is_some() {
            info.iccid.clone_from(&status.iccid);
        }
        if status.eid.as_deref().is_some_and(|e| !e.is_empty()) {
            info.eid.clone_from(&status.eid);
        }
        let card_id = if self.inner.euicc {
            info.eid.clone().or_else(|| info.iccid.clone())
        } else {
            info.iccid.clone()
        };
        if card_id != info.card_id {
            debug!(
                slot = self.inner.physical_slot,
                card_id = %pii(card_id.as_deref().unwrap_or("")),
                "card id changed"
            );
            info.card_id = card_id;
        }

        let port_index = status.slot_port_mapping.port_index;
        if let Some(port) = info.ports.get(&port_index) {
            port.update(status, self.inner.euicc);
        } else {
            let port = UiccPort::new(
                PortContext {
                    ci: Arc::clone(ci),
                    config: Arc::clone(&self.inner.config),
                    pin_storage: Arc::clone(&self.inner.pin_storage),
                    phone_id,
                    physical_slot: self.inner.physical_slot,
                },
                status,
                self.inner.euicc,
                self.inner.cancel.child_token(),
            );
            info.ports.insert(port_index, port);
        }
        info.phone_to_port.insert(phone_id, port_index);
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn physical_slot(&self) -> usize {
        self.inner.physical_slot
    }

    pub fn is_euicc(&self) -> bool {
        self.inner.euicc
    }

    /// EID for an eUICC when known, otherwise the ICCID.
    pub fn card_id(&self) -> Option<String> {
        self.lock().card_id.clone()
    }

    pub fn card_state(&self) -> CardState {
        self.lock().card_state
    }

    pub fn eid(&self) -> Option<String> {
        self.lock().eid.clone()
    }

    pub fn port(&self, port_index: usize) -> Option<UiccPort> {
        self.lock().ports.get(&port_index).cloned()
    }

    pub fn port_for_phone(&self, phone_id: usize) -> Option<UiccPort> {
        let info = self.lock();
        let index = info.phone_to_port.get(&phone_id)?;
        info.ports.get(index).cloned()
    }

    pub fn ports(&self) -> Vec<UiccPort> {
        self.lock().ports.values().cloned().collect()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Dispose one port, e.g. when the slot reports it inactive.
    pub(crate) fn dispose_port(&self, port_index: usize) -> Option<UiccPort> {
        let mut info = self.lock();
        let port = info.ports.remove(&port_index)?;
        info.phone_to_port.retain(|_, p| *p != port_index);
        drop(info);
        port.dispose();
        Some(port)
    }

    /// Dispose every port. Idempotent.
    pub fn dispose(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        let ports: Vec<UiccPort> = {
            let mut info = self.lock();
            info.phone_to_port.clear();
            std::mem::take(&mut info.ports).into_values().collect()
        };
        for port in ports {
            port.dispose();
        }
        self.inner.cancel.cancel();
        info!(slot = self.inner.physical_slot, "card disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pin_storage::MemoryPinStorage;
    use uicc_ril::sim::AppImage;
    use uicc_ril::{AppType, CardImage, SimulatedModem};

    fn card(euicc: bool) -> UiccCard {
        UiccCard::new(
            0,
            euicc,
            Arc::new(UiccConfig::default()),
            Arc::new(MemoryPinStorage::new()),
            CancellationToken::new(),
        )
    }

    fn modem(image: &CardImage) -> SimulatedModem {
        SimulatedModem::new(1).with_card(0, image).unwrap()
    }

    #[tokio::test]
    async fn card_id_prefers_eid_on_euicc() {
        let image = CardImage::new("8901260321111851072")
            .with_eid("89049032000000000000000000000123")
            .with_app(AppImage::new(AppType::Usim).aid("A0000000871002"));
        let modem = modem(&image);
        let ci: Arc<dyn CommandsInterface> = modem.ril(0);
        let status = ci.get_icc_card_status().await.unwrap();

        let euicc = card(true);
        euicc.update(&ci, &status, 0);
        assert_eq!(
            euicc.card_id().as_deref(),
            Some("89049032000000000000000000000123")
        );

        let plain = card(false);
        plain.update(&ci, &status, 0);
        assert_eq!(plain.card_id().as_deref(), Some("8901260321111851072"));
    }

    #[tokio::test]
    async fn ports_are_created_once_and_mapped_to_phones() {
        let image = CardImage::new("8901260321111851072")
            .with_app(AppImage::new(AppType::Usim).aid("A0000000871002"));
        let modem = modem(&image);
        let ci: Arc<dyn CommandsInterface> = modem.ril(0);
        let status = ci.get_icc_card_status().await.unwrap();

        let card = card(false);
        card.update(&ci, &status, 0);
        let first = card.port_for_phone(0).unwrap();
        card.update(&ci, &status, 0);
        assert_eq!(card.ports().len(), 1);
        assert!(!first.is_disposed());

        let disposed = card.dispose_port(0).unwrap();
        assert!(disposed.is_disposed());
        assert!(card.port_for_phone(0).is_none());
    }

    #[tokio::test]
    async fn dispose_cascades_to_ports() {
        let image = CardImage::new("8901260321111851072")
            .with_app(AppImage::new(AppType::Usim).aid("A0000000871002"));
        let modem = modem(&image);
        let ci: Arc<dyn CommandsInterface> = modem.ril(0);
        let status = ci.get_icc_card_status().await.unwrap();

        let card = card(false);
        card.update(&ci, &status, 0);
        let port = card.port(0).unwrap();
        card.dispose();
        card.dispose();
        assert!(port.is_disposed());
        assert!(port.profile().is_disposed());
        assert!(card.ports().is_empty());
    }
}
