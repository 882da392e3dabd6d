// ── Card application ──
//
// One application on a card (SIM, USIM, RUIM, CSIM or ISIM). Tracks the
// PIN/PUK and personalization state reported by the modem, runs the
// credential operations against its AID and owns the application's
// records actor.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uicc_ril::{
    AppFamily, AppState, AppStatus, AppType, CommandsInterface, Facility, PersoSubState, PinState,
};

use crate::config::UiccConfig;
use crate::error::UiccError;
use crate::file_handler::IccFileHandler;
use crate::records::{IccRecords, RecordsContext};
use crate::stream::SnapshotStream;

/// Published state of one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppSnapshot {
    pub app_type: AppType,
    pub app_state: AppState,
    pub perso: PersoSubState,
    pub aid: Option<String>,
    pub label: Option<String>,
    pub pin1: PinState,
    pub pin2: PinState,
    /// PIN1 is replaced by the card's universal PIN.
    pub pin1_replaced: bool,
    /// Last known state of the SIM lock facility.
    pub icc_lock_enabled: Option<bool>,
    /// Last known state of fixed dialling.
    pub fdn_enabled: Option<bool>,
}

impl AppSnapshot {
    fn from_status(status: &AppStatus) -> Self {
        Self {
            app_type: status.app_type,
            app_state: status.app_state,
            perso: status.perso_substate,
            aid: status.aid.clone(),
            label: status.label.clone(),
            pin1: status.pin1,
            pin2: status.pin2,
            pin1_replaced: status.pin1_replaced,
            icc_lock_enabled: None,
            fdn_enabled: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.app_state == AppState::Ready
    }
}

/// Handle onto one card application. Cheap to clone.
#[derive(Clone)]
pub struct UiccCardApplication {
    inner: Arc<Inner>,
}

struct Inner {
    phone_id: usize,
    app_type: AppType,
    aid: Option<String>,
    ci: Arc<dyn CommandsInterface>,
    fh: IccFileHandler,
    records: Option<IccRecords>,
    state: watch::Sender<Arc<AppSnapshot>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for UiccCardApplication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiccCardApplication")
            .field("phone_id", &self.inner.phone_id)
            .field("app_type", &self.inner.app_type)
            .field("aid", &self.inner.aid)
            .finish_non_exhaustive()
    }
}

impl UiccCardApplication {
    /// Create the application and start its records actor. Must be called
    /// inside a tokio runtime.
    pub(crate) fn new(
        status: &AppStatus,
        ci: Arc<dyn CommandsInterface>,
        config: Arc<UiccConfig>,
        phone_id: usize,
        cancel: CancellationToken,
    ) -> Self {
        let fh = IccFileHandler::new(Arc::clone(&ci), status.app_type, status.aid.clone());
        let records = IccRecords::spawn(
            RecordsContext {
                ci: Arc::clone(&ci),
                fh: fh.clone(),
                app_type: status.app_type,
                config,
                phone_id,
            },
            cancel.child_token(),
        );
        if let Some(records) = &records {
            records.on_app_state(status.app_state, status.perso_substate);
        }
        debug!(phone_id, app_type = %status.app_type, state = ?status.app_state, "application created");

        let (state, _) = watch::channel(Arc::new(AppSnapshot::from_status(status)));
        Self {
            inner: Arc::new(Inner {
                phone_id,
                app_type: status.app_type,
                aid: status.aid.clone(),
                ci,
                fh,
                records,
                state,
                cancel,
            }),
        }
    }

    /// Apply a new status report for this application.
    pub(crate) fn update(&self, status: &AppStatus) {
        if self.is_disposed() {
            return;
        }
        let changed = self.inner.state.send_if_modified(|snap| {
            let mut next = AppSnapshot::from_status(status);
            next.icc_lock_enabled = snap.icc_lock_enabled;
            next.fdn_enabled = snap.fdn_enabled;
            if **snap == next {
                return false;
            }
            if snap.app_state != next.app_state {
                info!(
                    phone_id = self.inner.phone_id,
                    app_type = %next.app_type,
                    from = ?snap.app_state,
                    to = ?next.app_state,
                    "application state changed"
                );
            }
            *snap = Arc::new(next);
            true
        });
        if !changed {
            return;
        }
        if let Some(records) = &self.inner.records {
            records.on_app_state(status.app_state, status.perso_substate);
        }
    }

    // ── Identity / state ─────────────────────────────────────────────

    pub fn app_type(&self) -> AppType {
        self.inner.app_type
    }

    pub fn family(&self) -> Option<AppFamily> {
        self.inner.app_type.family()
    }

    pub fn aid(&self) -> Option<&str> {
        self.inner.aid.as_deref()
    }

    pub fn phone_id(&self) -> usize {
        self.inner.phone_id
    }

    pub fn snapshot(&self) -> Arc<AppSnapshot> {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> SnapshotStream<AppSnapshot> {
        SnapshotStream::new(self.inner.state.subscribe())
    }

    pub fn state(&self) -> AppState {
        self.inner.state.borrow().app_state
    }

    pub fn records(&self) -> Option<&IccRecords> {
        self.inner.records.as_ref()
    }

    pub fn file_handler(&self) -> &IccFileHandler {
        &self.inner.fh
    }

    // ── Credentials ──────────────────────────────────────────────────

    fn ensure_live(&self) -> Result<(), UiccError> {
        if self.is_disposed() {
            Err(UiccError::actor_gone("application"))
        } else {
            Ok(())
        }
    }

    fn log_credential(&self, op: &'static str, result: &Result<(), UiccError>) {
        match result {
            Ok(()) => info!(phone_id = self.inner.phone_id, op, "credential accepted"),
            Err(e) => warn!(
                phone_id = self.inner.phone_id,
                op,
                attempts_remaining = ?e.attempts_remaining(),
                error = %e,
                "credential rejected"
            ),
        }
    }

    pub async fn supply_pin(&self, pin: &SecretString) -> Result<(), UiccError> {
        self.ensure_live()?;
        let result = self
            .inner
            .ci
            .supply_icc_pin(pin.expose_secret().to_owned(), self.inner.aid.clone())
            .await
            .map_err(UiccError::from);
        self.log_credential("supply_pin", &result);
        result
    }

    pub async fn supply_puk(&self, puk: &SecretString, new_pin: &SecretString) -> Result<(), UiccError> {
        self.ensure_live()?;
        let result = self
            .inner
            .ci
            .supply_icc_puk(
                puk.expose_secret().to_owned(),
                new_pin.expose_secret().to_owned(),
                self.inner.aid.clone(),
            )
            .await
            .map_err(UiccError::from);
        self.log_credential("supply_puk", &result);
        result
    }

    pub async fn supply_pin2(&self, pin2: &SecretString) -> Result<(), UiccError> {
        self.ensure_live()?;
        let result = self
            .inner
            .ci
            .supply_icc_pin2(pin2.expose_secret().to_owned(), self.inner.aid.clone())
            .await
            .map_err(UiccError::from);
        self.log_credential("supply_pin2", &result);
        result
    }

    pub async fn supply_puk2(
        &self,
        puk2: &SecretString,
        new_pin2: &SecretString,
    ) -> Result<(), UiccError> {
        self.ensure_live()?;
        let result = self
            .inner
            .ci
            .supply_icc_puk2(
                puk2.expose_secret().to_owned(),
                new_pin2.expose_secret().to_owned(),
                self.inner.aid.clone(),
            )
            .await
            .map_err(UiccError::from);
        self.log_credential("supply_puk2", &result);
        result
    }

    pub async fn change_pin(&self, old: &SecretString, new: &SecretString) -> Result<(), UiccError> {
        self.ensure_live()?;
        let result = self
            .inner
            .ci
            .change_icc_pin(
                old.expose_secret().to_owned(),
                new.expose_secret().to_owned(),
                self.inner.aid.clone(),
            )
            .await
            .map_err(UiccError::from);
        self.log_credential("change_pin", &result);
        result
    }

    // ── Facility locks ───────────────────────────────────────────────

    async fn set_facility(
        &self,
        facility: Facility,
        enabled: bool,
        password: &SecretString,
    ) -> Result<(), UiccError> {
        self.ensure_live()?;
        self.inner
            .ci
            .set_facility_lock(
                facility,
                enabled,
                password.expose_secret().to_owned(),
                self.inner.aid.clone(),
            )
            .await?;
        info!(phone_id = self.inner.phone_id, %facility, enabled, "facility lock set");
        self.remember_facility(facility, enabled);
        Ok(())
    }

    async fn query_facility(&self, facility: Facility) -> Result<bool, UiccError> {
        self.ensure_live()?;
        let enabled = self
            .inner
            .ci
            .query_facility_lock(facility, self.inner.aid.clone())
            .await?;
        self.remember_facility(facility, enabled);
        Ok(enabled)
    }

    fn remember_facility(&self, facility: Facility, enabled: bool) {
        self.inner.state.send_if_modified(|snap| {
            let slot = match facility {
                Facility::SimLock => snap.icc_lock_enabled,
                Facility::FixedDialing => snap.fdn_enabled,
            };
            if slot == Some(enabled) {
                return false;
            }
            let mut next = AppSnapshot::clone(snap);
            match facility {
                Facility::SimLock => next.icc_lock_enabled = Some(enabled),
                Facility::FixedDialing => next.fdn_enabled = Some(enabled),
            }
            *snap = Arc::new(next);
            true
        });
    }

    /// Enable or disable the PIN1 lock. `password` is the current PIN.
    pub async fn set_icc_lock_enabled(
        &self,
        enabled: bool,
        password: &SecretString,
    ) -> Result<(), UiccError> {
        self.set_facility(Facility::SimLock, enabled, password).await
    }

    /// Enable or disable fixed dialling. `pin2` authorizes the change.
    pub async fn set_icc_fdn_enabled(
        &self,
        enabled: bool,
        pin2: &SecretString,
    ) -> Result<(), UiccError> {
        self.set_facility(Facility::FixedDialing, enabled, pin2).await
    }

    pub async fn get_icc_lock_enabled(&self) -> Result<bool, UiccError> {
        self.query_facility(Facility::SimLock).await
    }

    pub async fn get_icc_fdn_enabled(&self) -> Result<bool, UiccError> {
        self.query_facility(Facility::FixedDialing).await
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Stop the records actor. Idempotent.
    pub fn dispose(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        debug!(phone_id = self.inner.phone_id, app_type = %self.inner.app_type, "application disposed");
        self.inner.cancel.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use uicc_ril::sim::AppImage;
    use uicc_ril::{CardImage, RilError, SimulatedModem};

    const AID: &str = "A0000000871002";

    async fn usim(image: &CardImage) -> (SimulatedModem, UiccCardApplication) {
        let modem = SimulatedModem::new(1).with_card(0, image).unwrap();
        let ci = modem.ril(0);
        let status = ci.get_icc_card_status().await.unwrap();
        let app = UiccCardApplication::new(
            &status.applications[0],
            ci,
            Arc::new(UiccConfig::default()),
            0,
            CancellationToken::new(),
        );
        (modem, app)
    }

    fn locked_image() -> CardImage {
        CardImage::new("8901410321111851072")
            .with_pin("1234", "12345678")
            .with_app(AppImage::new(AppType::Usim).aid(AID))
    }

    #[tokio::test]
    async fn wrong_pin_reports_attempts() {
        let (_modem, app) = usim(&locked_image()).await;
        assert_eq!(app.state(), AppState::Pin);
        let err = app
            .supply_pin(&SecretString::from("0000"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UiccError::Ril(RilError::PasswordIncorrect { .. })
        ));
        assert_eq!(err.attempts_remaining(), Some(2));
    }

    #[tokio::test]
    async fn status_update_moves_state_and_keeps_facilities() {
        let (modem, app) = usim(&locked_image()).await;
        app.supply_pin(&SecretString::from("1234")).await.unwrap();
        assert!(app.get_icc_lock_enabled().await.unwrap());

        let status = modem.ril(0).get_icc_card_status().await.unwrap();
        app.update(&status.applications[0]);
        let snap = app.snapshot();
        assert_eq!(snap.app_state, AppState::Ready);
        assert_eq!(snap.pin1, PinState::EnabledVerified);
        assert_eq!(snap.icc_lock_enabled, Some(true));
    }

    #[tokio::test]
    async fn disabling_lock_is_remembered() {
        let (_modem, app) = usim(&locked_image()).await;
        app.set_icc_lock_enabled(false, &SecretString::from("1234"))
            .await
            .unwrap();
        assert_eq!(app.snapshot().icc_lock_enabled, Some(false));
        assert!(!app.get_icc_lock_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn disposed_application_rejects_credentials() {
        let (_modem, app) = usim(&locked_image()).await;
        let records = app.records().unwrap().clone();
        app.dispose();
        app.dispose();
        assert!(records.is_disposed());
        let err = app.supply_pin(&SecretString::from("1234")).await.unwrap_err();
        assert!(matches!(err, UiccError::Disposed { .. }));
    }

    #[tokio::test]
    async fn isim_has_no_records() {
        let image = CardImage::new("8901410321111851072")
            .with_app(AppImage::new(AppType::Isim).aid("A0000000871004"));
        let (_modem, app) = usim(&image).await;
        assert!(app.records().is_none());
        assert_eq!(app.family(), Some(AppFamily::Ims));
    }
}
