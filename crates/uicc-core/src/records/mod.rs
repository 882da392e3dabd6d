//! Elementary-file records of one card application.
//!
//! [`IccRecords`] is a handle onto a records actor: a tokio task that
//! issues the EF reads for its application, parses completions in
//! arrival order and publishes a [`RecordsSnapshot`]. Both the 3GPP
//! (SIM/USIM) and 3GPP2 (RUIM/CSIM) layouts run on the same actor; the
//! [`RecordsFamily`] picks the batch and parse steps.
//!
//! Loading is counted: every issued read bumps `records_to_load` before
//! it is spawned, every completion (success or failure) brings it back
//! down, and reaching zero marks the batch loaded. Fallback reads are
//! issued from inside a completion so the counter never touches zero
//! early.

mod actor;
mod auth;
mod ruim;
mod sim;
mod snapshot;
mod writes;

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use uicc_ril::{AppState, AppType, CommandsInterface, PersoSubState};

use crate::adn_cache::AdnCache;
use crate::codec::adn::AdnRecord;
use crate::config::UiccConfig;
use crate::error::UiccError;
use crate::file_handler::IccFileHandler;
use crate::registrant::Registration;
use crate::stream::SnapshotStream;

use self::actor::{Msg, PendingFplmn, RecordsActor};
pub use self::snapshot::{RecordsFamily, RecordsSnapshot, SpnDisplayCondition};

const EVENT_CHANNEL_SIZE: usize = 64;

/// Process-wide id source for forbidden-PLMN transactions.
static NEXT_TRANSACTION_ID: AtomicI32 = AtomicI32::new(1);

fn next_transaction_id() -> i32 {
    NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Edge events published by a records actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RecordsEvent {
    /// A service provider name was read from the card.
    SpnUpdated { spn: String },
    /// A short message stored on the card was read. `pdu` excludes the
    /// status byte.
    NewSms { record: u8, pdu: Vec<u8> },
    /// EF_FDN changed on the card.
    FdnChanged,
    /// EF_CSP forbids manual network selection.
    NetworkSelectionModeAutomatic,
}

/// Everything a records actor needs from its application.
pub(crate) struct RecordsContext {
    pub ci: Arc<dyn CommandsInterface>,
    pub fh: IccFileHandler,
    pub app_type: AppType,
    pub config: Arc<UiccConfig>,
    pub phone_id: usize,
}

/// Handle onto the records of one application. Cheap to clone.
#[derive(Clone)]
pub struct IccRecords {
    inner: Arc<Shared>,
}

struct Shared {
    family: RecordsFamily,
    app_type: AppType,
    aid: Option<String>,
    phone_id: usize,
    ci: Arc<dyn CommandsInterface>,
    config: Arc<UiccConfig>,
    tx: mpsc::UnboundedSender<Msg>,
    snapshot: watch::Receiver<Arc<RecordsSnapshot>>,
    events: broadcast::Sender<RecordsEvent>,
    transactions: Arc<DashMap<i32, PendingFplmn>>,
    adn_cache: Arc<AdnCache>,
    runtime: Handle,
    cancel: CancellationToken,
}

impl std::fmt::Debug for IccRecords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IccRecords")
            .field("family", &self.inner.family)
            .field("app_type", &self.inner.app_type)
            .field("phone_id", &self.inner.phone_id)
            .finish_non_exhaustive()
    }
}

impl IccRecords {
    /// Start the records actor for `ctx`'s application. Must be called
    /// inside a tokio runtime. Returns `None` for applications without an
    /// EF layout of their own (ISIM, unknown).
    pub(crate) fn spawn(ctx: RecordsContext, cancel: CancellationToken) -> Option<Self> {
        let family = RecordsFamily::for_app(ctx.app_type)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) =
            watch::channel(Arc::new(RecordsSnapshot::new(family, ctx.app_type)));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let transactions = Arc::new(DashMap::new());
        let adn_cache = Arc::new(AdnCache::new(ctx.fh.clone(), ctx.app_type));

        let inner = Arc::new(Shared {
            family,
            app_type: ctx.app_type,
            aid: ctx.fh.aid().map(str::to_owned),
            phone_id: ctx.phone_id,
            ci: Arc::clone(&ctx.ci),
            config: Arc::clone(&ctx.config),
            tx: tx.clone(),
            snapshot,
            events: events.clone(),
            transactions: Arc::clone(&transactions),
            adn_cache: Arc::clone(&adn_cache),
            runtime: Handle::current(),
            cancel: cancel.clone(),
        });

        let indications = ctx.ci.indications();
        let actor = RecordsActor::new(
            ctx,
            family,
            tx,
            snapshot_tx,
            events,
            transactions,
            adn_cache,
            cancel,
        );
        tokio::spawn(actor.run(rx, indications));
        Some(Self { inner })
    }

    fn send(&self, msg: Msg) -> Result<(), UiccError> {
        if self.inner.cancel.is_cancelled() {
            return Err(UiccError::actor_gone("records"));
        }
        self.inner
            .tx
            .send(msg)
            .map_err(|_| UiccError::actor_gone("records"))
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, UiccError>>) -> Msg,
    ) -> Result<T, UiccError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx))?;
        rx.await.map_err(|_| UiccError::actor_gone("records"))?
    }

    // ── Identity ─────────────────────────────────────────────────────

    pub fn family(&self) -> RecordsFamily {
        self.inner.family
    }

    pub fn app_type(&self) -> AppType {
        self.inner.app_type
    }

    pub fn aid(&self) -> Option<&str> {
        self.inner.aid.as_deref()
    }

    // ── State observation ────────────────────────────────────────────

    pub fn snapshot(&self) -> Arc<RecordsSnapshot> {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> SnapshotStream<RecordsSnapshot> {
        SnapshotStream::new(self.inner.snapshot.clone())
    }

    pub(crate) fn watch(&self) -> watch::Receiver<Arc<RecordsSnapshot>> {
        self.inner.snapshot.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<RecordsEvent> {
        self.inner.events.subscribe()
    }

    pub fn register_for_records_loaded(&self) -> Registration<RecordsSnapshot> {
        Registration::new(self.watch(), RecordsSnapshot::loaded_condition)
    }

    pub fn register_for_locked_records_loaded(&self) -> Registration<RecordsSnapshot> {
        Registration::new(self.watch(), RecordsSnapshot::locked_condition)
    }

    pub fn register_for_network_locked_records_loaded(&self) -> Registration<RecordsSnapshot> {
        Registration::new(self.watch(), RecordsSnapshot::network_locked_condition)
    }

    pub fn register_for_imsi_ready(&self) -> Registration<RecordsSnapshot> {
        Registration::new(self.watch(), RecordsSnapshot::imsi_condition)
    }

    /// Whole-file ADN/FDN cache for this application.
    pub fn adn_cache(&self) -> &Arc<AdnCache> {
        &self.inner.adn_cache
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Feed the owning application's state; drives which batch is read.
    pub(crate) fn on_app_state(&self, state: AppState, perso: PersoSubState) {
        // A disposed actor has nothing left to load.
        let _ = self.send(Msg::AppState { state, perso });
    }

    /// Stop the actor. The final snapshot is reset with `destroyed` set.
    /// Idempotent.
    pub fn dispose(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Write EF_MSISDN record 1.
    pub async fn set_msisdn_number(
        &self,
        alpha_tag: &str,
        number: &str,
    ) -> Result<(), UiccError> {
        let adn = AdnRecord::new(alpha_tag, number);
        self.request(|reply| Msg::SetMsisdn { adn, reply }).await
    }

    /// Write the voicemail number to EF_MBDN and/or the CPHS mailbox.
    pub async fn set_voicemail_number(
        &self,
        alpha_tag: &str,
        number: &str,
    ) -> Result<(), UiccError> {
        let adn = AdnRecord::new(alpha_tag, number);
        self.request(|reply| Msg::SetVoicemail { adn, reply }).await
    }

    /// Update the unconditional call-forwarding flag in EF_CFIS and the
    /// CPHS EF_CFF. Only voice line 1 is stored on the card.
    pub async fn set_voice_call_forwarding_flag(
        &self,
        line: u8,
        enable: bool,
        number: Option<&str>,
    ) -> Result<(), UiccError> {
        if line != 1 {
            return Err(UiccError::InvalidArgument {
                message: format!("call forwarding line {line} is not stored on the card"),
            });
        }
        let number = number.map(str::to_owned);
        self.request(|reply| Msg::SetCallForwarding {
            enable,
            number,
            reply,
        })
        .await
    }

    /// Update the message-waiting indicators. `count` of -1 means
    /// "messages waiting, count unknown"; 0 clears the indicator.
    pub async fn set_voice_message_waiting(&self, line: u8, count: i32) -> Result<(), UiccError> {
        if line != 1 {
            return Err(UiccError::InvalidArgument {
                message: format!("message waiting line {line} is not stored on the card"),
            });
        }
        if count < -1 {
            return Err(UiccError::InvalidArgument {
                message: format!("message count {count}"),
            });
        }
        self.request(|reply| Msg::SetMessageWaiting { count, reply })
            .await
    }

    // ── Forbidden PLMNs ──────────────────────────────────────────────

    /// Read EF_FPLMN from the card, refreshing the cached list.
    pub async fn get_forbidden_plmns(&self) -> Result<Vec<String>, UiccError> {
        let id = next_transaction_id();
        let (tx, rx) = oneshot::channel();
        self.inner
            .transactions
            .insert(id, PendingFplmn::Get(tx));
        if let Err(e) = self.send(Msg::FplmnRead { id }) {
            self.inner.transactions.remove(&id);
            return Err(e);
        }
        rx.await.map_err(|_| UiccError::actor_gone("records"))?
    }

    /// Write EF_FPLMN. Entries beyond the file's capacity are dropped;
    /// returns the number of entries written.
    pub async fn set_forbidden_plmns(&self, plmns: Vec<String>) -> Result<usize, UiccError> {
        let id = next_transaction_id();
        let (tx, rx) = oneshot::channel();
        self.inner
            .transactions
            .insert(id, PendingFplmn::Set(tx));
        if let Err(e) = self.send(Msg::FplmnWrite { id, plmns }) {
            self.inner.transactions.remove(&id);
            return Err(e);
        }
        rx.await.map_err(|_| UiccError::actor_gone("records"))?
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use uicc_ril::ef::{
        EF_AD, EF_CFF_CPHS, EF_CFIS, EF_FPLMN, EF_IMSI, EF_INFO_CPHS, EF_LI, EF_MAILBOX_CPHS,
        EF_MBDN, EF_MBI, EF_PL, EF_SMS, EF_SPN, EF_SPN_CPHS, EF_SPN_SHORT_CPHS,
    };
    use uicc_ril::sim::AppImage;
    use uicc_ril::{CardImage, RefreshResult, SimulatedModem};

    use super::*;

    // ── Helpers ──────────────────────────────────────────────────────

    const IMSI_EF: &str = "083901621032547698";

    fn imsi() -> Vec<u8> {
        hex::decode(IMSI_EF).unwrap()
    }

    fn name_field(name: &str, len: usize) -> Vec<u8> {
        let mut out = name.as_bytes().to_vec();
        out.resize(len, 0xFF);
        out
    }

    fn start(app: AppImage, config: UiccConfig) -> (SimulatedModem, IccRecords) {
        let (modem, records) = spawn_idle(app, config);
        records.on_app_state(AppState::Ready, PersoSubState::Ready);
        (modem, records)
    }

    /// Records whose application state has not been reported yet.
    fn spawn_idle(app: AppImage, config: UiccConfig) -> (SimulatedModem, IccRecords) {
        let app_type = app.app_type;
        let image = CardImage::new("8901410321111851072").with_app(app);
        let modem = SimulatedModem::new(1).with_card(0, &image).unwrap();
        let ci = modem.ril(0);
        let records = IccRecords::spawn(
            RecordsContext {
                ci: ci.clone(),
                fh: IccFileHandler::new(ci, app_type, None),
                app_type,
                config: Arc::new(config),
                phone_id: 0,
            },
            CancellationToken::new(),
        )
        .unwrap();
        (modem, records)
    }

    fn cfis(enabled: bool) -> Vec<u8> {
        let mut record = vec![0x01, u8::from(enabled)];
        record.resize(16, 0xFF);
        record
    }

    async fn loaded(records: &IccRecords) -> Arc<RecordsSnapshot> {
        tokio::time::timeout(
            Duration::from_secs(5),
            records.register_for_records_loaded().next(),
        )
        .await
        .unwrap()
        .unwrap()
    }

    // ── Loading ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn spn_falls_through_to_short_cphs_name() {
        let app = AppImage::new(AppType::Sim)
            .transparent(EF_SPN, &[0x00, 0xFF, 0xFF, 0xFF])
            .transparent(EF_SPN_CPHS, &[0xFF; 8])
            .transparent(EF_SPN_SHORT_CPHS, &name_field("ACME", 10));
        let (_modem, records) = start(app, UiccConfig::default());
        let snap = loaded(&records).await;
        assert_eq!(snap.spn.as_deref(), Some("ACME"));
        assert_eq!(snap.spn_display_condition, SpnDisplayCondition::NOT_ROAMING_ONLY);
        assert_eq!(snap.records_to_load, 0);
        assert!(snap.records_requested);
    }

    #[tokio::test]
    async fn blank_cfis_falls_back_to_cphs_flags() {
        let app = AppImage::new(AppType::Sim)
            .linear(EF_CFIS, &[&[0xFF; 16]])
            .transparent(EF_CFF_CPHS, &[0x0A]);
        let (_modem, records) = start(app, UiccConfig::default());
        let snap = loaded(&records).await;
        assert_eq!(snap.call_forwarding_enabled, Some(true));
    }

    #[tokio::test]
    async fn valid_cfis_wins_over_cphs_flags() {
        let app = AppImage::new(AppType::Sim)
            .linear(EF_CFIS, &[&cfis(false)])
            .transparent(EF_CFF_CPHS, &[0x0A]);
        let (_modem, records) = start(app, UiccConfig::default());
        let snap = loaded(&records).await;
        assert_eq!(snap.call_forwarding_enabled, Some(false));
    }

    #[tokio::test]
    async fn language_falls_back_from_li_to_pl() {
        let app = AppImage::new(AppType::Usim)
            .transparent(EF_LI, b"frit")
            .transparent(EF_PL, b"deen");
        let config = UiccConfig {
            installed_locales: vec!["en".into(), "de".into()],
            ..UiccConfig::default()
        };
        let (_modem, records) = start(app, config);
        let snap = loaded(&records).await;
        assert_eq!(snap.sim_language.as_deref(), Some("de"));
    }

    #[tokio::test]
    async fn language_prefers_li_when_installed() {
        let app = AppImage::new(AppType::Usim)
            .transparent(EF_LI, b"itEN")
            .transparent(EF_PL, b"de");
        let config = UiccConfig {
            installed_locales: vec!["en".into(), "de".into()],
            ..UiccConfig::default()
        };
        let (_modem, records) = start(app, config);
        let snap = loaded(&records).await;
        assert_eq!(snap.sim_language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn language_files_ignored_on_sim() {
        let app = AppImage::new(AppType::Sim)
            .transparent(EF_LI, b"en")
            .transparent(EF_PL, b"en");
        let (_modem, records) = start(app, UiccConfig::default());
        let snap = loaded(&records).await;
        assert!(snap.sim_language.is_none());
    }

    #[tokio::test]
    async fn voicemail_uses_cphs_mailbox_when_mbdn_is_empty() {
        let cphs = AdnRecord::new("VM", "+15551234").encode(30).unwrap();
        let app = AppImage::new(AppType::Sim)
            .linear(EF_MBI, &[&[0x01, 0x00, 0x00, 0x00]])
            .linear(EF_MBDN, &[&[0xFF; 30]])
            .linear(EF_MAILBOX_CPHS, &[&cphs]);
        let (_modem, records) = start(app, UiccConfig::default());
        let snap = loaded(&records).await;
        assert_eq!(snap.voicemail_number.as_deref(), Some("+15551234"));
        assert_eq!(snap.voicemail_tag.as_deref(), Some("VM"));
    }

    #[tokio::test]
    async fn mnc_length_from_table_without_ad() {
        let app = AppImage::new(AppType::Sim).transparent(EF_IMSI, &imsi());
        let (_modem, records) = start(app, UiccConfig::default());
        let snap = loaded(&records).await;
        assert_eq!(snap.imsi.as_deref(), Some("310260123456789"));
        assert_eq!(snap.mnc_length, Some(3));
        assert_eq!(snap.operator_numeric.as_deref(), Some("310260"));
        assert_eq!(snap.iccid.as_deref(), Some("8901410321111851072"));
    }

    #[tokio::test]
    async fn mnc_length_from_ad_wins() {
        let app = AppImage::new(AppType::Sim)
            .transparent(EF_IMSI, &imsi())
            .transparent(EF_AD, &[0x00, 0x00, 0x00, 0x02]);
        let (_modem, records) = start(app, UiccConfig::default());
        let snap = loaded(&records).await;
        assert_eq!(snap.mnc_length, Some(2));
        assert_eq!(snap.operator_numeric.as_deref(), Some("31026"));
    }

    #[tokio::test]
    async fn imsi_registration_replays_after_load() {
        let app = AppImage::new(AppType::Sim).transparent(EF_IMSI, &imsi());
        let (_modem, records) = start(app, UiccConfig::default());
        loaded(&records).await;
        let mut imsi_ready = records.register_for_imsi_ready();
        let snap = imsi_ready.try_next().unwrap();
        assert_eq!(snap.imsi.as_deref(), Some("310260123456789"));
        assert!(imsi_ready.try_next().is_none());
    }

    // ── Refresh and indications ──────────────────────────────────────

    #[tokio::test]
    async fn file_update_refresh_reloads_everything() {
        let app = AppImage::new(AppType::Sim).transparent(EF_SPN, &name_field("\u{0}Old", 8));
        let (modem, records) = start(app, UiccConfig::default());
        let mut registration = records.register_for_records_loaded();
        registration.next().await.unwrap();

        modem.write_transparent(0, None, EF_SPN, name_field("\u{0}New", 8));
        modem.refresh(0, RefreshResult::file_update(EF_SPN, None));
        let snap = tokio::time::timeout(Duration::from_secs(5), registration.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snap.spn.as_deref(), Some("New"));
        assert_eq!(snap.records_to_load, 0);
    }

    #[tokio::test]
    async fn call_forwarding_refresh_rereads_only_cfis_and_cff() {
        let app = AppImage::new(AppType::Sim)
            .linear(EF_CFIS, &[&cfis(false)])
            .transparent(EF_SPN, &name_field("\u{0}Old", 8));
        let (modem, records) = start(app, UiccConfig::default());
        assert_eq!(loaded(&records).await.call_forwarding_enabled, Some(false));

        modem.write_records(0, None, EF_CFIS, vec![cfis(true)]);
        modem.write_transparent(0, None, EF_SPN, name_field("\u{0}New", 8));
        modem.refresh(0, RefreshResult::file_update(EF_CFIS, None));

        let mut stream = records.subscribe();
        let snap = tokio::time::timeout(
            Duration::from_secs(5),
            stream.wait_for(|s| s.call_forwarding_enabled == Some(true) && s.records_to_load == 0),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(snap.loaded);
        assert_eq!(snap.spn.as_deref(), Some("Old"));
    }

    #[tokio::test]
    async fn unread_sms_is_published() {
        let mut record = vec![0x03, 0xAA, 0xBB];
        record.resize(176, 0xFF);
        let app = AppImage::new(AppType::Sim).linear(EF_SMS, &[&record]);
        let (modem, records) = start(app, UiccConfig::default());
        loaded(&records).await;
        let mut events = records.events();

        modem.store_sms(0, 1);
        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let RecordsEvent::NewSms { record, pdu } = events.recv().await.unwrap() {
                    return (record, pdu);
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event.0, 1);
        assert_eq!(&event.1[..2], &[0xAA, 0xBB]);
    }

    // ── Locked batches ───────────────────────────────────────────────

    fn locked_usim() -> AppImage {
        AppImage::new(AppType::Usim)
            .transparent(EF_IMSI, &imsi())
            .transparent(EF_LI, b"en")
    }

    #[tokio::test]
    async fn pin_locked_batch_reads_only_iccid_and_language() {
        let (_modem, records) = spawn_idle(locked_usim(), UiccConfig::default());
        records.on_app_state(AppState::Pin, PersoSubState::Unknown);

        let snap = tokio::time::timeout(
            Duration::from_secs(5),
            records.register_for_locked_records_loaded().next(),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(snap.locked_records_loaded);
        assert!(!snap.network_locked_records_loaded);
        assert!(!snap.loaded);
        assert!(!snap.records_requested);
        assert_eq!(snap.records_to_load, 0);
        assert!(snap.imsi.is_none());
        assert_eq!(snap.iccid.as_deref(), Some("8901410321111851072"));
        assert_eq!(snap.sim_language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn network_locked_batch_adds_imsi() {
        let (_modem, records) = spawn_idle(locked_usim(), UiccConfig::default());
        records.on_app_state(AppState::SubscriptionPersona, PersoSubState::SimNetwork);

        let snap = tokio::time::timeout(
            Duration::from_secs(5),
            records.register_for_network_locked_records_loaded().next(),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(snap.network_locked_records_loaded);
        assert!(!snap.locked_records_loaded);
        assert!(!snap.loaded);
        assert_eq!(snap.records_to_load, 0);
        assert_eq!(snap.imsi.as_deref(), Some("310260123456789"));
        assert_eq!(snap.operator_numeric.as_deref(), Some("310260"));
    }

    // ── Writes ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn forbidden_plmns_truncate_to_file_size() {
        let app = AppImage::new(AppType::Sim).transparent(EF_FPLMN, &[0xFF; 12]);
        let (_modem, records) = start(app, UiccConfig::default());
        loaded(&records).await;

        let plmns: Vec<String> = ["310260", "310410", "23410", "26201", "20801"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(records.set_forbidden_plmns(plmns).await.unwrap(), 4);
        let read = records.get_forbidden_plmns().await.unwrap();
        assert_eq!(read, vec!["310260", "310410", "23410", "26201"]);
        assert_eq!(records.snapshot().fplmns.len(), 4);
    }

    #[tokio::test]
    async fn voicemail_write_rejected_for_fixed_operator() {
        let app = AppImage::new(AppType::Sim).transparent(EF_IMSI, &imsi());
        let config = UiccConfig {
            fixed_voicemail_operators: vec!["310260".into()],
            ..UiccConfig::default()
        };
        let (_modem, records) = start(app, config);
        assert!(loaded(&records).await.voicemail_fixed);
        let err = records
            .set_voicemail_number("VM", "+15550000")
            .await
            .unwrap_err();
        assert!(matches!(err, UiccError::VoicemailFixed));
    }

    #[tokio::test]
    async fn voicemail_write_goes_to_cphs_mailbox() {
        let app = AppImage::new(AppType::Sim)
            .transparent(EF_INFO_CPHS, &[0x02, 0x30, 0x00])
            .linear(EF_MAILBOX_CPHS, &[&[0xFF; 30]]);
        let (_modem, records) = start(app, UiccConfig::default());
        loaded(&records).await;
        records
            .set_voicemail_number("Mailbox", "+15550000")
            .await
            .unwrap();
        let snap = records.snapshot();
        assert_eq!(snap.voicemail_number.as_deref(), Some("+15550000"));
        assert_eq!(snap.voicemail_tag.as_deref(), Some("Mailbox"));
    }

    #[tokio::test]
    async fn voicemail_write_without_target_is_unsupported() {
        let (_modem, records) = start(AppImage::new(AppType::Sim), UiccConfig::default());
        loaded(&records).await;
        let err = records.set_voicemail_number("VM", "123").await.unwrap_err();
        assert!(matches!(err, UiccError::VoicemailUnsupported));
    }

    #[tokio::test]
    async fn message_waiting_line_two_is_rejected() {
        let (_modem, records) = start(AppImage::new(AppType::Sim), UiccConfig::default());
        let err = records.set_voice_message_waiting(2, 1).await.unwrap_err();
        assert!(matches!(err, UiccError::InvalidArgument { .. }));
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    #[tokio::test]
    async fn dispose_resets_and_marks_destroyed() {
        let app = AppImage::new(AppType::Sim).transparent(EF_IMSI, &imsi());
        let (_modem, records) = start(app, UiccConfig::default());
        loaded(&records).await;
        let mut stream = records.subscribe();
        records.dispose();
        let snap = tokio::time::timeout(Duration::from_secs(5), stream.wait_for(|s| s.destroyed))
            .await
            .unwrap()
            .unwrap();
        assert!(snap.imsi.is_none());
        assert!(!snap.loaded);
        assert!(matches!(
            records.get_forbidden_plmns().await,
            Err(UiccError::Disposed { .. })
        ));
    }

    #[test]
    fn isim_has_no_records_family() {
        assert!(RecordsFamily::for_app(AppType::Isim).is_none());
    }
}
