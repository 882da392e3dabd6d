// ── Profile ──
//
// The applications reachable through one port. A profile actor keeps the
// application table in step with card status reports, picks the current
// application for the configured voice radio family and folds the
// application and records states into one externally visible
// `ProfileState`.

use std::sync::Arc;

use dashmap::DashMap;
use secrecy::SecretString;
use serde::Serialize;
use strum::Display;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uicc_ril::{
    AppFamily, AppState, AppType, CardState, CardStatus, CommandsInterface, PinState, RadioState,
};

use crate::app::{AppSnapshot, UiccCardApplication};
use crate::codec::mcc;
use crate::config::UiccConfig;
use crate::error::UiccError;
use crate::phonebook::SimPhonebookCache;
use crate::pii::pii;
use crate::pin_storage::PinStorage;
use crate::records::IccRecords;
use crate::stream::SnapshotStream;

/// A card status report carries at most this many applications.
pub const MAX_APPS: usize = 8;

/// Externally visible state of a profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileState {
    #[default]
    Unknown,
    Absent,
    NotReady,
    PinRequired,
    PukRequired,
    NetworkLocked,
    PermDisabled,
    Ready,
    Loaded,
    CardIoError,
    CardRestricted,
}

impl ProfileState {
    pub fn is_locked(self) -> bool {
        matches!(
            self,
            Self::PinRequired | Self::PukRequired | Self::NetworkLocked | Self::PermDisabled
        )
    }
}

/// Home operator published once records are loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatorInfo {
    /// MCC + MNC.
    pub numeric: String,
    pub country_iso: Option<String>,
}

/// Published view of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSnapshot {
    pub phone_id: usize,
    pub state: ProfileState,
    pub card_state: CardState,
    pub universal_pin: PinState,
    pub iccid: Option<String>,
    pub current_family: AppFamily,
    pub gsm_umts_index: Option<usize>,
    pub cdma_index: Option<usize>,
    pub ims_index: Option<usize>,
    pub applications: Vec<Arc<AppSnapshot>>,
}

impl ProfileSnapshot {
    fn new(phone_id: usize, family: AppFamily) -> Self {
        Self {
            phone_id,
            state: ProfileState::NotReady,
            card_state: CardState::Absent,
            universal_pin: PinState::Unknown,
            iccid: None,
            current_family: family,
            gsm_umts_index: None,
            cdma_index: None,
            ims_index: None,
            applications: Vec::new(),
        }
    }
}

/// The application table, published so readers never wait on the actor.
#[derive(Debug, Clone)]
pub struct AppTable {
    pub apps: Vec<UiccCardApplication>,
    pub gsm_umts_index: Option<usize>,
    pub cdma_index: Option<usize>,
    pub ims_index: Option<usize>,
    pub current_family: AppFamily,
}

impl AppTable {
    fn empty(current_family: AppFamily) -> Self {
        Self {
            apps: Vec::new(),
            gsm_umts_index: None,
            cdma_index: None,
            ims_index: None,
            current_family,
        }
    }

    fn index_for(&self, family: AppFamily) -> Option<usize> {
        match family {
            AppFamily::ThreeGpp => self.gsm_umts_index,
            AppFamily::ThreeGpp2 => self.cdma_index,
            AppFamily::Ims => self.ims_index,
        }
    }

    /// The primary application of `family`.
    pub fn application(&self, family: AppFamily) -> Option<&UiccCardApplication> {
        self.index_for(family).and_then(|i| self.apps.get(i))
    }

    /// The application for the current voice radio family.
    pub fn current(&self) -> Option<&UiccCardApplication> {
        self.application(self.current_family)
    }
}

/// Keep an index only when it is in range and names an app of `family`.
fn sanitize_index(
    index: Option<usize>,
    family: AppFamily,
    apps: &[UiccCardApplication],
) -> Option<usize> {
    let i = index?;
    let app = apps.get(i)?;
    if app.family() == Some(family) {
        Some(i)
    } else {
        warn!(index = i, expected = %family, found = %app.app_type(), "dropping app index");
        None
    }
}

fn select_family(voice: AppFamily, gsm: Option<usize>, cdma: Option<usize>) -> AppFamily {
    if voice == AppFamily::ThreeGpp2 && (cdma.is_some() || gsm.is_none()) {
        AppFamily::ThreeGpp2
    } else {
        AppFamily::ThreeGpp
    }
}

fn is_supported(app_type: AppType, cdma_supported: bool) -> bool {
    match app_type {
        AppType::Sim | AppType::Usim => true,
        AppType::Ruim | AppType::Csim => cdma_supported,
        AppType::Isim | AppType::Unknown => false,
    }
}

// ── Handle ───────────────────────────────────────────────────────────

enum Msg {
    Update { status: Box<CardStatus>, euicc: bool },
    Evaluate,
    SetVoiceRadioFamily(AppFamily),
    AttachRules(watch::Receiver<bool>),
    ResetAppWithAid {
        aid: Option<String>,
        reply: oneshot::Sender<bool>,
    },
    UnlockDone {
        iccid: String,
        result: Result<(), UiccError>,
    },
}

struct Brands {
    overrides: DashMap<String, String>,
    current: watch::Sender<Option<String>>,
}

impl Brands {
    fn refresh(&self, iccid: Option<&str>) {
        let brand = iccid.and_then(|id| self.overrides.get(id).map(|b| b.value().clone()));
        self.current.send_if_modified(|current| {
            if *current == brand {
                return false;
            }
            current.clone_from(&brand);
            true
        });
    }
}

/// Handle onto one profile. Cheap to clone.
#[derive(Clone)]
pub struct UiccProfile {
    inner: Arc<Shared>,
}

struct Shared {
    phone_id: usize,
    tx: mpsc::UnboundedSender<Msg>,
    snapshot: watch::Receiver<Arc<ProfileSnapshot>>,
    table: watch::Receiver<Arc<AppTable>>,
    operator: watch::Receiver<Option<OperatorInfo>>,
    brands: Arc<Brands>,
    pin_storage: Arc<dyn PinStorage>,
    phonebook: SimPhonebookCache,
    cancel: CancellationToken,
}

impl std::fmt::Debug for UiccProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiccProfile")
            .field("phone_id", &self.inner.phone_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl UiccProfile {
    /// Start the profile actor and its phonebook cache. Must be called
    /// inside a tokio runtime.
    pub(crate) fn spawn(
        ci: Arc<dyn CommandsInterface>,
        config: Arc<UiccConfig>,
        pin_storage: Arc<dyn PinStorage>,
        phone_id: usize,
        cancel: CancellationToken,
    ) -> Self {
        let family = config.voice_radio_family;
        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) =
            watch::channel(Arc::new(ProfileSnapshot::new(phone_id, family)));
        let (table_tx, table) = watch::channel(Arc::new(AppTable::empty(family)));
        let (operator_tx, operator) = watch::channel(None);
        let brands = Arc::new(Brands {
            overrides: DashMap::new(),
            current: watch::channel(None).0,
        });
        let phonebook =
            SimPhonebookCache::spawn(Arc::clone(&ci), &config, phone_id, cancel.child_token());

        let actor = ProfileActor {
            ci,
            config,
            phone_id,
            pin_storage: Arc::clone(&pin_storage),
            brands: Arc::clone(&brands),
            tx: tx.clone(),
            snapshot_tx,
            table_tx,
            operator_tx,
            cancel: cancel.clone(),
            voice_family: family,
            card_state: CardState::Absent,
            universal_pin: PinState::Unknown,
            iccid: None,
            euicc: false,
            eid_known: false,
            slots: Vec::new(),
            gsm_umts_index: None,
            cdma_index: None,
            ims_index: None,
            rules: None,
            rules_token: None,
            unlock_in_flight: false,
            state: ProfileState::NotReady,
        };
        tokio::spawn(actor.run(rx));

        Self {
            inner: Arc::new(Shared {
                phone_id,
                tx,
                snapshot,
                table,
                operator,
                brands,
                pin_storage,
                phonebook,
                cancel,
            }),
        }
    }

    fn send(&self, msg: Msg) -> Result<(), UiccError> {
        if self.inner.cancel.is_cancelled() {
            return Err(UiccError::actor_gone("profile"));
        }
        self.inner
            .tx
            .send(msg)
            .map_err(|_| UiccError::actor_gone("profile"))
    }

    /// Apply a card status report. `euicc` comes from the slot's ATR.
    pub(crate) fn update(&self, status: CardStatus, euicc: bool) {
        // Reports after dispose are stale.
        let _ = self.send(Msg::Update {
            status: Box::new(status),
            euicc,
        });
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn phone_id(&self) -> usize {
        self.inner.phone_id
    }

    pub fn state(&self) -> ProfileState {
        self.inner.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> Arc<ProfileSnapshot> {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> SnapshotStream<ProfileSnapshot> {
        SnapshotStream::new(self.inner.snapshot.clone())
    }

    pub fn operator_info(&self) -> watch::Receiver<Option<OperatorInfo>> {
        self.inner.operator.clone()
    }

    pub fn operator_brand_override(&self) -> watch::Receiver<Option<String>> {
        self.inner.brands.current.subscribe()
    }

    pub fn iccid(&self) -> Option<String> {
        self.inner.snapshot.borrow().iccid.clone()
    }

    pub fn applications(&self) -> Arc<AppTable> {
        self.inner.table.borrow().clone()
    }

    /// Primary application of `family`.
    pub fn application(&self, family: AppFamily) -> Option<UiccCardApplication> {
        self.inner.table.borrow().application(family).cloned()
    }

    pub fn application_by_type(&self, app_type: AppType) -> Option<UiccCardApplication> {
        self.inner
            .table
            .borrow()
            .apps
            .iter()
            .find(|a| a.app_type() == app_type)
            .cloned()
    }

    /// Application for the current voice radio family.
    pub fn current_application(&self) -> Option<UiccCardApplication> {
        self.inner.table.borrow().current().cloned()
    }

    /// Records of the current application.
    pub fn records(&self) -> Option<IccRecords> {
        self.current_application()
            .and_then(|app| app.records().cloned())
    }

    pub fn phonebook(&self) -> &SimPhonebookCache {
        &self.inner.phonebook
    }

    // ── Credentials ──────────────────────────────────────────────────

    fn require_current(&self) -> Result<UiccCardApplication, UiccError> {
        self.current_application().ok_or(UiccError::NotReady {
            what: "application",
        })
    }

    /// Verify PIN1 on the current application; a verified PIN is
    /// remembered for silent unlock.
    pub async fn supply_pin(&self, pin: &SecretString) -> Result<(), UiccError> {
        let app = self.require_current()?;
        app.supply_pin(pin).await?;
        if let Some(iccid) = self.iccid() {
            if let Err(e) = self.inner.pin_storage.store(&iccid, pin) {
                warn!(phone_id = self.inner.phone_id, iccid = %pii(&iccid), error = %e, "could not cache PIN");
            }
        }
        Ok(())
    }

    pub async fn supply_puk(&self, puk: &SecretString, new_pin: &SecretString) -> Result<(), UiccError> {
        self.require_current()?.supply_puk(puk, new_pin).await
    }

    pub async fn supply_pin2(&self, pin2: &SecretString) -> Result<(), UiccError> {
        self.require_current()?.supply_pin2(pin2).await
    }

    pub async fn supply_puk2(
        &self,
        puk2: &SecretString,
        new_pin2: &SecretString,
    ) -> Result<(), UiccError> {
        self.require_current()?.supply_puk2(puk2, new_pin2).await
    }

    pub async fn change_pin(&self, old: &SecretString, new: &SecretString) -> Result<(), UiccError> {
        self.require_current()?.change_pin(old, new).await
    }

    pub async fn set_icc_lock_enabled(
        &self,
        enabled: bool,
        password: &SecretString,
    ) -> Result<(), UiccError> {
        self.require_current()?
            .set_icc_lock_enabled(enabled, password)
            .await
    }

    // ── Settings ─────────────────────────────────────────────────────

    /// Override the operator brand shown for this card. `None` clears it.
    pub fn set_operator_brand_override(&self, brand: Option<&str>) -> Result<(), UiccError> {
        let iccid = self.iccid().ok_or(UiccError::NotReady { what: "ICCID" })?;
        match brand {
            Some(b) => {
                self.inner.brands.overrides.insert(iccid.clone(), b.to_owned());
            }
            None => {
                self.inner.brands.overrides.remove(&iccid);
            }
        }
        info!(phone_id = self.inner.phone_id, brand = ?brand, "operator brand override set");
        self.inner.brands.refresh(Some(&iccid));
        Ok(())
    }

    pub fn set_voice_radio_family(&self, family: AppFamily) -> Result<(), UiccError> {
        self.send(Msg::SetVoiceRadioFamily(family))
    }

    /// Gate `LOADED` on carrier privilege rules; `true` on the watch means
    /// the rules are loaded.
    pub fn attach_carrier_privilege_rules(
        &self,
        rules_loaded: watch::Receiver<bool>,
    ) -> Result<(), UiccError> {
        self.send(Msg::AttachRules(rules_loaded))
    }

    /// Dispose the applications whose AID matches (all of them for `None`
    /// or an empty AID). The next status report recreates them. Returns
    /// whether anything was reset.
    pub async fn reset_app_with_aid(&self, aid: Option<&str>) -> Result<bool, UiccError> {
        let (reply, rx) = oneshot::channel();
        self.send(Msg::ResetAppWithAid {
            aid: aid.filter(|a| !a.is_empty()).map(str::to_owned),
            reply,
        })?;
        rx.await.map_err(|_| UiccError::actor_gone("profile"))
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Dispose the applications, records and phonebook. Publishes
    /// `ABSENT`, or `UNKNOWN` while the radio is unavailable. Idempotent.
    pub fn dispose(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

// ── Actor ────────────────────────────────────────────────────────────

struct AppSlot {
    app: UiccCardApplication,
    token: CancellationToken,
    /// Another application of the same type became ready first.
    ignored: bool,
}

struct ProfileActor {
    ci: Arc<dyn CommandsInterface>,
    config: Arc<UiccConfig>,
    phone_id: usize,
    pin_storage: Arc<dyn PinStorage>,
    brands: Arc<Brands>,
    tx: mpsc::UnboundedSender<Msg>,
    snapshot_tx: watch::Sender<Arc<ProfileSnapshot>>,
    table_tx: watch::Sender<Arc<AppTable>>,
    operator_tx: watch::Sender<Option<OperatorInfo>>,
    cancel: CancellationToken,

    voice_family: AppFamily,
    card_state: CardState,
    universal_pin: PinState,
    iccid: Option<String>,
    euicc: bool,
    eid_known: bool,
    slots: Vec<AppSlot>,
    gsm_umts_index: Option<usize>,
    cdma_index: Option<usize>,
    ims_index: Option<usize>,
    rules: Option<watch::Receiver<bool>>,
    rules_token: Option<CancellationToken>,
    unlock_in_flight: bool,
    state: ProfileState,
}

/// Post `Evaluate` whenever `rx` changes.
fn forward_changes<T: Send + Sync + 'static>(
    mut rx: watch::Receiver<T>,
    tx: mpsc::UnboundedSender<Msg>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() || tx.send(Msg::Evaluate).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

impl ProfileActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Msg>) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    self.handle(msg);
                }
            }
        }
        self.finish();
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Update { status, euicc } => self.on_update(*status, euicc),
            Msg::Evaluate => self.evaluate(),
            Msg::SetVoiceRadioFamily(family) => {
                if self.voice_family != family {
                    info!(phone_id = self.phone_id, %family, "voice radio family changed");
                    self.voice_family = family;
                    self.publish_table();
                    self.evaluate();
                }
            }
            Msg::AttachRules(rx) => {
                if let Some(token) = self.rules_token.take() {
                    token.cancel();
                }
                let token = self.cancel.child_token();
                forward_changes(rx.clone(), self.tx.clone(), token.clone());
                self.rules = Some(rx);
                self.rules_token = Some(token);
                self.evaluate();
            }
            Msg::ResetAppWithAid { aid, reply } => {
                let reset = self.reset_apps(aid.as_deref());
                // The caller may have stopped waiting.
                let _ = reply.send(reset);
            }
            Msg::UnlockDone { iccid, result } => self.on_unlock_done(&iccid, result),
        }
    }

    // ── Status reports ───────────────────────────────────────────────

    fn on_update(&mut self, status: CardStatus, euicc: bool) {
        if self.iccid != status.iccid {
            for slot in &mut self.slots {
                slot.ignored = false;
            }
            self.brands.refresh(status.iccid.as_deref());
        }
        self.card_state = status.card_state;
        self.universal_pin = status.universal_pin_state;
        self.iccid.clone_from(&status.iccid);
        self.euicc = euicc;
        self.eid_known = status.eid.as_deref().is_some_and(|e| !e.is_empty());

        let reported = &status.applications[..status.applications.len().min(MAX_APPS)];
        if status.applications.len() > MAX_APPS {
            warn!(phone_id = self.phone_id, count = status.applications.len(), "too many applications; extra ignored");
        }
        for (i, app_status) in reported.iter().enumerate() {
            let same = self.slots.get(i).is_some_and(|s| {
                s.app.app_type() == app_status.app_type
                    && s.app.aid() == app_status.aid.as_deref()
            });
            if same {
                self.slots[i].app.update(app_status);
                continue;
            }
            let token = self.cancel.child_token();
            let app = UiccCardApplication::new(
                app_status,
                Arc::clone(&self.ci),
                Arc::clone(&self.config),
                self.phone_id,
                token.clone(),
            );
            if let Some(records) = app.records() {
                forward_changes(records.watch(), self.tx.clone(), token.clone());
            }
            let slot = AppSlot {
                app,
                token,
                ignored: false,
            };
            if let Some(old) = self.slots.get_mut(i) {
                old.token.cancel();
                *old = slot;
            } else {
                self.slots.push(slot);
            }
        }
        for stale in self.slots.drain(reported.len()..) {
            stale.token.cancel();
        }

        let apps: Vec<UiccCardApplication> = self.slots.iter().map(|s| s.app.clone()).collect();
        self.gsm_umts_index =
            sanitize_index(status.gsm_umts_subscription_app_index, AppFamily::ThreeGpp, &apps);
        self.cdma_index =
            sanitize_index(status.cdma_subscription_app_index, AppFamily::ThreeGpp2, &apps);
        self.ims_index = sanitize_index(status.ims_subscription_app_index, AppFamily::Ims, &apps);

        self.publish_table();
        self.evaluate();
    }

    fn reset_apps(&mut self, aid: Option<&str>) -> bool {
        let before = self.slots.len();
        let mut kept = Vec::with_capacity(before);
        for slot in self.slots.drain(..) {
            let matches = aid.is_none_or(|aid| {
                slot.app
                    .aid()
                    .is_some_and(|own| own.eq_ignore_ascii_case(aid))
            });
            if matches {
                slot.token.cancel();
            } else {
                kept.push(slot);
            }
        }
        let reset = kept.len() != before;
        if reset {
            // Indices point into the old layout until the next report.
            if kept.is_empty() {
                self.gsm_umts_index = None;
                self.cdma_index = None;
                self.ims_index = None;
            }
            self.slots = kept;
            let apps: Vec<UiccCardApplication> =
                self.slots.iter().map(|s| s.app.clone()).collect();
            self.gsm_umts_index = sanitize_index(self.gsm_umts_index, AppFamily::ThreeGpp, &apps);
            self.cdma_index = sanitize_index(self.cdma_index, AppFamily::ThreeGpp2, &apps);
            self.ims_index = sanitize_index(self.ims_index, AppFamily::Ims, &apps);
            info!(phone_id = self.phone_id, aid = ?aid, "applications reset");
            self.publish_table();
            self.evaluate();
        } else {
            self.slots = kept;
        }
        reset
    }

    fn current_family(&self) -> AppFamily {
        select_family(self.voice_family, self.gsm_umts_index, self.cdma_index)
    }

    fn current_index(&self) -> Option<usize> {
        match self.current_family() {
            AppFamily::ThreeGpp2 => self.cdma_index,
            _ => self.gsm_umts_index,
        }
    }

    fn current(&self) -> Option<&UiccCardApplication> {
        self.current_index()
            .and_then(|i| self.slots.get(i))
            .map(|s| &s.app)
    }

    fn publish_table(&self) {
        let table = AppTable {
            apps: self.slots.iter().map(|s| s.app.clone()).collect(),
            gsm_umts_index: self.gsm_umts_index,
            cdma_index: self.cdma_index,
            ims_index: self.ims_index,
            current_family: self.current_family(),
        };
        self.table_tx.send_replace(Arc::new(table));
    }

    // ── State policy ─────────────────────────────────────────────────

    fn supported(&self, app: &UiccCardApplication) -> bool {
        is_supported(app.app_type(), self.config.cdma_supported)
    }

    /// Mark not-yet-ready apps whose type already has a ready app.
    fn update_ignored(&mut self) {
        let ready_types: Vec<AppType> = self
            .slots
            .iter()
            .filter(|s| is_supported(s.app.app_type(), self.config.cdma_supported))
            .filter(|s| s.app.state() == AppState::Ready)
            .map(|s| s.app.app_type())
            .collect();
        for slot in &mut self.slots {
            if !slot.ignored
                && slot.app.state() != AppState::Ready
                && ready_types.contains(&slot.app.app_type())
            {
                debug!(phone_id = self.phone_id, app_type = %slot.app.app_type(), "ignoring duplicate application");
                slot.ignored = true;
            }
        }
    }

    fn all_apps_ready(&self) -> bool {
        let mut any = false;
        for slot in &self.slots {
            if !self.supported(&slot.app) || slot.ignored {
                continue;
            }
            if slot.app.state() != AppState::Ready {
                return false;
            }
            any = true;
        }
        any
    }

    fn all_records_loaded(&self) -> bool {
        self.slots
            .iter()
            .filter(|s| !s.ignored && self.supported(&s.app))
            .filter_map(|s| s.app.records())
            .all(|r| r.snapshot().loaded)
    }

    fn rules_loaded(&self) -> bool {
        self.rules.as_ref().is_none_or(|rx| *rx.borrow())
    }

    /// The state the policy asks for, or `None` to keep the current one.
    fn compute_state(&mut self) -> Option<ProfileState> {
        match self.card_state {
            CardState::Error => return Some(ProfileState::CardIoError),
            CardState::Restricted => return Some(ProfileState::CardRestricted),
            CardState::Absent => return Some(ProfileState::Absent),
            CardState::Present => {}
        }
        if self.euicc && !self.eid_known {
            debug!(phone_id = self.phone_id, "eUICC without EID; state unchanged");
            return None;
        }
        let Some(app) = self.current().cloned() else {
            return Some(ProfileState::NotReady);
        };
        let snap = app.snapshot();
        let records = app.records().map(IccRecords::snapshot);

        if snap.pin1 == PinState::EnabledPermBlocked
            || (snap.pin1_replaced && self.universal_pin == PinState::EnabledPermBlocked)
        {
            return Some(ProfileState::PermDisabled);
        }
        let locked_loaded = records.as_ref().is_none_or(|r| r.locked_records_loaded);
        let state = match snap.app_state {
            AppState::Pin if locked_loaded => ProfileState::PinRequired,
            AppState::Puk if locked_loaded => ProfileState::PukRequired,
            AppState::SubscriptionPersona if snap.perso.is_perso_locked() => {
                if records
                    .as_ref()
                    .is_none_or(|r| r.network_locked_records_loaded)
                {
                    ProfileState::NetworkLocked
                } else {
                    ProfileState::NotReady
                }
            }
            AppState::Ready => {
                self.update_ignored();
                if !self.all_apps_ready() {
                    ProfileState::NotReady
                } else if self.all_records_loaded() && self.rules_loaded() {
                    ProfileState::Loaded
                } else {
                    ProfileState::Ready
                }
            }
            _ => ProfileState::NotReady,
        };
        Some(state)
    }

    fn evaluate(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        let next = self.compute_state();
        if next == Some(ProfileState::PinRequired) && self.try_auto_unlock() {
            self.publish(None);
            return;
        }
        if self.unlock_in_flight {
            self.publish(None);
            return;
        }
        self.publish(next);
    }

    // ── Silent unlock ────────────────────────────────────────────────

    /// Submit a cached PIN instead of publishing `PIN_REQUIRED`. Returns
    /// whether an unlock is now in flight.
    fn try_auto_unlock(&mut self) -> bool {
        if self.unlock_in_flight {
            return true;
        }
        let Some(iccid) = self.iccid.clone() else {
            return false;
        };
        let pin = match self.pin_storage.get(&iccid) {
            Ok(Some(pin)) => pin,
            Ok(None) => return false,
            Err(e) => {
                warn!(phone_id = self.phone_id, error = %e, "PIN storage unavailable");
                return false;
            }
        };
        let Some(app) = self.current().cloned() else {
            return false;
        };
        info!(phone_id = self.phone_id, iccid = %pii(&iccid), "unlocking with cached PIN");
        self.unlock_in_flight = true;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = app.supply_pin(&pin).await;
            // A profile gone in the meantime does not care.
            let _ = tx.send(Msg::UnlockDone { iccid, result });
        });
        true
    }

    fn on_unlock_done(&mut self, iccid: &str, result: Result<(), UiccError>) {
        self.unlock_in_flight = false;
        match result {
            Ok(()) => {
                info!(phone_id = self.phone_id, "cached PIN accepted");
                // Hold the state until the card reports the verified PIN.
                if self.current().is_some_and(|a| a.state() == AppState::Pin) {
                    self.publish(Some(ProfileState::NotReady));
                    return;
                }
            }
            Err(e) => {
                warn!(phone_id = self.phone_id, error = %e, "cached PIN rejected; clearing");
                if let Err(e) = self.pin_storage.clear(iccid) {
                    warn!(phone_id = self.phone_id, error = %e, "could not clear cached PIN");
                }
            }
        }
        self.evaluate();
    }

    // ── Publication ──────────────────────────────────────────────────

    fn publish(&mut self, next: Option<ProfileState>) {
        if let Some(next) = next {
            if next != self.state {
                info!(phone_id = self.phone_id, from = %self.state, to = %next, "profile state changed");
                self.state = next;
            }
        }
        if self.state == ProfileState::Loaded {
            self.publish_operator();
        }

        let snapshot = ProfileSnapshot {
            phone_id: self.phone_id,
            state: self.state,
            card_state: self.card_state,
            universal_pin: self.universal_pin,
            iccid: self.iccid.clone(),
            current_family: self.current_family(),
            gsm_umts_index: self.gsm_umts_index,
            cdma_index: self.cdma_index,
            ims_index: self.ims_index,
            applications: self.slots.iter().map(|s| s.app.snapshot()).collect(),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if **current == snapshot {
                return false;
            }
            *current = Arc::new(snapshot);
            true
        });
    }

    fn publish_operator(&self) {
        let info = self
            .current()
            .and_then(UiccCardApplication::records)
            .and_then(|r| r.snapshot().operator_numeric.clone())
            .map(|numeric| OperatorInfo {
                country_iso: mcc::mcc_of(&numeric)
                    .and_then(mcc::country_iso)
                    .map(str::to_owned),
                numeric,
            });
        self.operator_tx.send_if_modified(|current| {
            if *current == info {
                return false;
            }
            current.clone_from(&info);
            true
        });
    }

    fn finish(mut self) {
        for slot in self.slots.drain(..) {
            slot.token.cancel();
        }
        self.gsm_umts_index = None;
        self.cdma_index = None;
        self.ims_index = None;
        self.publish_table();
        let last = if self.ci.radio_state() == RadioState::Unavailable {
            ProfileState::Unknown
        } else {
            ProfileState::Absent
        };
        info!(phone_id = self.phone_id, state = %last, "profile disposed");
        self.state = last;
        self.publish(None);
    }
}
