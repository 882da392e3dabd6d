// ── Records actor ──
//
// Owns the mutable record state of one application. Reads run as
// spawned tasks that post their completion back to the actor, so
// parsing, counting and publishing stay on a single task.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uicc_ril::{AppState, PersoSubState, RefreshKind, RefreshResult, RilIndication};

use super::snapshot::{RecordsFamily, RecordsSnapshot};
use super::{RecordsContext, RecordsEvent};
use crate::adn_cache::{AdnCache, load_adn};
use crate::codec::adn::AdnRecord;
use crate::codec::mcc::mnc_length_for_imsi;
use crate::error::UiccError;
use crate::file_handler::IccFileHandler;
use crate::pii::pii;

pub(super) type Reply<T> = oneshot::Sender<Result<T, UiccError>>;

/// A forbidden-PLMN request waiting for its completion.
pub(crate) enum PendingFplmn {
    Get(Reply<Vec<String>>),
    Set(Reply<usize>),
}

impl PendingFplmn {
    pub(super) fn fail(self, err: UiccError) {
        // The caller may have stopped waiting.
        match self {
            Self::Get(reply) => {
                let _ = reply.send(Err(err));
            }
            Self::Set(reply) => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

// ── Messages ─────────────────────────────────────────────────────────

pub(super) enum Msg {
    AppState {
        state: AppState,
        perso: PersoSubState,
    },
    Loaded {
        epoch: u64,
        step: Step,
        counted: bool,
        result: Result<Payload, UiccError>,
    },
    SetMsisdn {
        adn: AdnRecord,
        reply: Reply<()>,
    },
    SetVoicemail {
        adn: AdnRecord,
        reply: Reply<()>,
    },
    SetCallForwarding {
        enable: bool,
        number: Option<String>,
        reply: Reply<()>,
    },
    SetMessageWaiting {
        count: i32,
        reply: Reply<()>,
    },
    Written {
        write: Written,
        result: Result<(), UiccError>,
        reply: Reply<()>,
    },
    FplmnRead {
        id: i32,
    },
    FplmnWrite {
        id: i32,
        plmns: Vec<String>,
    },
    FplmnDone {
        id: i32,
        result: Result<Vec<String>, UiccError>,
    },
}

/// What a completed write changed, applied to the snapshot on success.
pub(super) enum Written {
    Msisdn(AdnRecord),
    Voicemail(AdnRecord),
    CallForwarding {
        enable: bool,
        cfis: Option<Vec<u8>>,
        cff: Option<Vec<u8>>,
    },
    MessageWaiting {
        count: i32,
        mwis: Option<Vec<u8>>,
        vmi: Option<Vec<u8>>,
    },
}

// ── Reads ────────────────────────────────────────────────────────────

/// Which parse a completion feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Step {
    Iccid,
    Imsi,
    Ad,
    Msisdn,
    Mbi,
    Mbdn,
    CphsMailbox,
    Mwis,
    CphsVmi,
    Cfis,
    Cff,
    Spn(SpnSource),
    Spdi,
    Pnn,
    Opl,
    CphsInfo,
    Csp,
    Gid1,
    Gid2,
    PlmnAct,
    OplmnAct,
    HplmnAct,
    Ehplmn,
    Fplmn,
    Li,
    Pl,
    Sst,
    Sms(u8),
    CsimLi,
    CsimSpn,
    CsimMdn,
    CsimImsim,
    CdmaHome,
    Eprl,
    MipUpp,
}

/// SPN lookup order: EF_SPN, then the CPHS operator name, then its
/// short form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SpnSource {
    Gsm,
    Cphs,
    ShortCphs,
}

pub(super) enum Read {
    Transparent(u16),
    Record(u16, u8),
    AllRecords(u16),
    Adn { ef: u16, ext: u16, record: u8 },
}

impl Read {
    async fn run(self, fh: &IccFileHandler) -> Result<Payload, UiccError> {
        match self {
            Self::Transparent(ef) => fh.load_transparent(ef).await.map(Payload::Bytes),
            Self::Record(ef, record) => fh.load_linear_record(ef, record).await.map(Payload::Bytes),
            Self::AllRecords(ef) => fh.load_all_linear(ef).await.map(Payload::Records),
            Self::Adn { ef, ext, record } => load_adn(fh, ef, Some(ext), record)
                .await
                .map(Payload::Adn),
        }
    }
}

pub(super) enum Payload {
    Bytes(Vec<u8>),
    Records(Vec<Vec<u8>>),
    Adn(AdnRecord),
}

impl Payload {
    pub(super) fn bytes(payload: Option<Self>) -> Option<Vec<u8>> {
        match payload {
            Some(Self::Bytes(data)) => Some(data),
            _ => None,
        }
    }

    pub(super) fn records(payload: Option<Self>) -> Option<Vec<Vec<u8>>> {
        match payload {
            Some(Self::Records(records)) => Some(records),
            _ => None,
        }
    }

    pub(super) fn adn(payload: Option<Self>) -> Option<AdnRecord> {
        match payload {
            Some(Self::Adn(adn)) => Some(adn),
            _ => None,
        }
    }
}

/// Why a locked batch was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LockedReason {
    /// PIN or PUK required.
    Locked,
    /// Network personalisation lock.
    NetworkLocked,
}

/// Raw file contents kept for later writes and cross-file decisions.
/// Cleared on every reset.
#[derive(Debug, Default)]
pub(super) struct RawFiles {
    /// MNC length from EF_AD, only when it is 2 or 3.
    pub ad_mnc: Option<usize>,
    /// Valid EF_MBI voicemail record index.
    pub mailbox_index: Option<u8>,
    pub cphs_info: Option<Vec<u8>>,
    pub cfis: Option<Vec<u8>>,
    pub cff: Option<Vec<u8>>,
    pub mwis: Option<Vec<u8>>,
    pub vmi: Option<Vec<u8>>,
    pub li: Option<Vec<u8>>,
    pub pl: Option<Vec<u8>>,
    pub li_done: bool,
    pub pl_done: bool,
}

// ── Actor ────────────────────────────────────────────────────────────

pub(super) struct RecordsActor {
    pub(super) ctx: RecordsContext,
    pub(super) family: RecordsFamily,
    pub(super) tx: mpsc::UnboundedSender<Msg>,
    snapshot_tx: watch::Sender<Arc<RecordsSnapshot>>,
    pub(super) snap: RecordsSnapshot,
    events: broadcast::Sender<RecordsEvent>,
    pub(super) transactions: Arc<DashMap<i32, PendingFplmn>>,
    pub(super) adn_cache: Arc<AdnCache>,
    cancel: CancellationToken,
    /// Bumped on reset; completions from an older epoch are dropped.
    epoch: u64,
    /// Outstanding counted reads. Signed so an over-decrement is caught.
    pending: i32,
    locked_reason: Option<LockedReason>,
    locked_requested: Option<LockedReason>,
    app_state: AppState,
    perso: PersoSubState,
    pub(super) raw: RawFiles,
}

impl RecordsActor {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        ctx: RecordsContext,
        family: RecordsFamily,
        tx: mpsc::UnboundedSender<Msg>,
        snapshot_tx: watch::Sender<Arc<RecordsSnapshot>>,
        events: broadcast::Sender<RecordsEvent>,
        transactions: Arc<DashMap<i32, PendingFplmn>>,
        adn_cache: Arc<AdnCache>,
        cancel: CancellationToken,
    ) -> Self {
        let snap = RecordsSnapshot::new(family, ctx.app_type);
        Self {
            ctx,
            family,
            tx,
            snapshot_tx,
            snap,
            events,
            transactions,
            adn_cache,
            cancel,
            epoch: 0,
            pending: 0,
            locked_reason: None,
            locked_requested: None,
            app_state: AppState::Unknown,
            perso: PersoSubState::Unknown,
            raw: RawFiles::default(),
        }
    }

    pub(super) async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Msg>,
        mut indications: broadcast::Receiver<RilIndication>,
    ) {
        let mut indications_open = true;
        debug!(phone_id = self.ctx.phone_id, family = %self.family, "records actor started");

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle(msg),
                    None => break,
                },
                ind = indications.recv(), if indications_open => match ind {
                    Ok(ind) => self.on_indication(ind),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(phone_id = self.ctx.phone_id, missed, "records actor lagged on indications");
                    }
                    Err(RecvError::Closed) => indications_open = false,
                },
            }
            self.publish();
        }

        self.finish();
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::AppState { state, perso } => self.on_app_state(state, perso),
            Msg::Loaded {
                epoch,
                step,
                counted,
                result,
            } => self.on_loaded(epoch, step, counted, result),
            Msg::SetMsisdn { adn, reply } => self.set_msisdn(adn, reply),
            Msg::SetVoicemail { adn, reply } => self.set_voicemail(adn, reply),
            Msg::SetCallForwarding {
                enable,
                number,
                reply,
            } => self.set_call_forwarding(enable, number.as_deref(), reply),
            Msg::SetMessageWaiting { count, reply } => self.set_message_waiting(count, reply),
            Msg::Written {
                write,
                result,
                reply,
            } => self.on_written(write, result, reply),
            Msg::FplmnRead { id } => self.read_fplmn(id),
            Msg::FplmnWrite { id, plmns } => self.write_fplmn(id, plmns),
            Msg::FplmnDone { id, result } => self.on_fplmn_done(id, result),
        }
    }

    fn on_indication(&mut self, ind: RilIndication) {
        match ind {
            RilIndication::SimRefresh(refresh) => self.on_refresh(&refresh),
            RilIndication::NewSmsOnSim { record } if self.family == RecordsFamily::Sim => {
                self.load_sms(record);
            }
            _ => {}
        }
    }

    // ── Publishing ───────────────────────────────────────────────────

    fn publish(&mut self) {
        self.snap.records_to_load = u32::try_from(self.pending.max(0)).unwrap_or_default();
        let next = &self.snap;
        self.snapshot_tx.send_if_modified(|current| {
            if current.as_ref() == next {
                false
            } else {
                *current = Arc::new(next.clone());
                true
            }
        });
    }

    pub(super) fn emit(&self, event: RecordsEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ── Loading ──────────────────────────────────────────────────────

    /// Issue a counted read.
    pub(super) fn load(&mut self, step: Step, read: Read) {
        self.issue(step, read, true);
    }

    /// Issue a read that does not hold the batch open.
    pub(super) fn load_uncounted(&mut self, step: Step, read: Read) {
        self.issue(step, read, false);
    }

    fn issue(&mut self, step: Step, read: Read, counted: bool) {
        if counted {
            self.pending += 1;
        }
        let fh = self.ctx.fh.clone();
        let tx = self.tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = read.run(&fh).await;
            let _ = tx.send(Msg::Loaded {
                epoch,
                step,
                counted,
                result,
            });
        });
    }

    fn on_loaded(
        &mut self,
        epoch: u64,
        step: Step,
        counted: bool,
        result: Result<Payload, UiccError>,
    ) {
        if epoch != self.epoch {
            debug!(phone_id = self.ctx.phone_id, ?step, "dropping completion from before reset");
            return;
        }
        let payload = match result {
            Ok(payload) => Some(payload),
            Err(UiccError::Ril(ref e)) if e.is_file_not_found() => {
                debug!(phone_id = self.ctx.phone_id, ?step, "file not present on card");
                None
            }
            Err(e) => {
                warn!(phone_id = self.ctx.phone_id, ?step, error = %e, "record read failed");
                None
            }
        };
        match self.family {
            RecordsFamily::Sim => self.on_sim_loaded(step, payload),
            RecordsFamily::Ruim => self.on_ruim_loaded(step, payload),
        }
        if counted {
            self.record_loaded(step);
        }
    }

    fn record_loaded(&mut self, step: Step) {
        self.pending -= 1;
        debug!(phone_id = self.ctx.phone_id, ?step, pending = self.pending, "record loaded");
        if self.pending < 0 {
            error!(phone_id = self.ctx.phone_id, pending = self.pending, "record count went negative");
            self.pending = 0;
            return;
        }
        if self.pending > 0 {
            return;
        }
        if self.snap.records_requested {
            self.on_all_records_loaded();
        } else if let Some(reason) = self.locked_reason.take() {
            self.on_locked_records_loaded(reason);
        }
    }

    fn on_all_records_loaded(&mut self) {
        self.locked_reason = None;
        self.snap.loaded = true;
        self.snap.loaded_generation += 1;
        info!(
            phone_id = self.ctx.phone_id,
            app_type = %self.ctx.app_type,
            operator = self.snap.operator_numeric.as_deref().unwrap_or("-"),
            "all records loaded"
        );
    }

    fn on_locked_records_loaded(&mut self, reason: LockedReason) {
        match reason {
            LockedReason::Locked => {
                self.snap.locked_records_loaded = true;
                self.snap.locked_generation += 1;
            }
            LockedReason::NetworkLocked => {
                self.snap.network_locked_records_loaded = true;
                self.snap.network_locked_generation += 1;
            }
        }
        info!(phone_id = self.ctx.phone_id, ?reason, "locked records loaded");
    }

    // ── Batches ──────────────────────────────────────────────────────

    fn on_app_state(&mut self, state: AppState, perso: PersoSubState) {
        self.app_state = state;
        self.perso = perso;
        self.fetch_for_state();
    }

    fn fetch_for_state(&mut self) {
        match self.app_state {
            AppState::Ready if !self.snap.records_requested => {
                self.snap.records_requested = true;
                match self.family {
                    RecordsFamily::Sim => self.fetch_sim_records(),
                    RecordsFamily::Ruim => self.fetch_ruim_records(),
                }
            }
            AppState::Pin | AppState::Puk => self.fetch_locked(LockedReason::Locked),
            AppState::SubscriptionPersona if self.perso.is_perso_locked() => {
                self.fetch_locked(LockedReason::NetworkLocked);
            }
            _ => {}
        }
    }

    fn fetch_locked(&mut self, reason: LockedReason) {
        if self.snap.records_requested || self.locked_requested == Some(reason) {
            return;
        }
        self.locked_requested = Some(reason);
        self.locked_reason = Some(reason);
        match self.family {
            RecordsFamily::Sim => self.fetch_sim_locked(reason),
            RecordsFamily::Ruim => self.fetch_ruim_locked(reason),
        }
    }

    /// Forget everything read so far. Completions already in flight are
    /// dropped by epoch.
    pub(super) fn reset_records(&mut self) {
        self.epoch += 1;
        self.pending = 0;
        self.snap = self.snap.reset();
        self.raw = RawFiles::default();
        self.locked_reason = None;
        self.locked_requested = None;
        self.adn_cache.reset();
    }

    /// Reset and read again for the current application state.
    pub(super) fn reload(&mut self) {
        self.reset_records();
        self.fetch_for_state();
    }

    fn on_refresh(&mut self, refresh: &RefreshResult) {
        if !refresh.targets(self.ctx.fh.aid()) {
            return;
        }
        info!(
            phone_id = self.ctx.phone_id,
            kind = ?refresh.kind,
            ef = ?refresh.ef_id,
            "card refresh"
        );
        match refresh.kind {
            RefreshKind::FileUpdate => match self.family {
                RecordsFamily::Sim => self.on_sim_file_update(refresh.ef_id),
                RecordsFamily::Ruim => self.reload(),
            },
            RefreshKind::Init => self.reload(),
            RefreshKind::Reset => {
                debug!(phone_id = self.ctx.phone_id, "card reset is handled by the card owner");
            }
        }
    }

    // ── Derived fields ───────────────────────────────────────────────

    pub(super) fn set_imsi(&mut self, imsi: String) {
        debug!(phone_id = self.ctx.phone_id, imsi = %pii(&imsi), "IMSI read");
        self.snap.imsi = Some(imsi);
        self.update_operator();
        self.snap.imsi_generation += 1;
    }

    /// Recompute MNC length and operator numeric. EF_AD wins when it gave
    /// 2 or 3; otherwise the table value is used, computed once.
    pub(super) fn update_operator(&mut self) {
        let Some(imsi) = self.snap.imsi.as_deref() else {
            return;
        };
        let mnc_length = self
            .raw
            .ad_mnc
            .or(self.snap.mnc_length)
            .or_else(|| mnc_length_for_imsi(imsi));
        let operator = mnc_length
            .and_then(|mnc| imsi.get(..3 + mnc))
            .map(str::to_owned);
        self.snap.voicemail_fixed = self.ctx.config.is_voicemail_fixed(operator.as_deref());
        self.snap.mnc_length = mnc_length;
        self.snap.operator_numeric = operator;
    }

    /// Pick the first installed locale named by EF_LI, then EF_PL, once
    /// both reads have finished.
    pub(super) fn update_language(&mut self) {
        if !(self.raw.li_done && self.raw.pl_done) {
            return;
        }
        let locales = &self.ctx.config.installed_locales;
        let pick = |data: Option<&Vec<u8>>| {
            data?
                .chunks_exact(2)
                .filter_map(|code| std::str::from_utf8(code).ok())
                .map(str::to_ascii_lowercase)
                .find(|code| locales.iter().any(|l| l.eq_ignore_ascii_case(code)))
        };
        let language = pick(self.raw.li.as_ref()).or_else(|| pick(self.raw.pl.as_ref()));
        debug!(phone_id = self.ctx.phone_id, ?language, "card language resolved");
        self.snap.sim_language = language;
    }

    // ── Teardown ─────────────────────────────────────────────────────

    fn finish(&mut self) {
        self.reset_records();
        self.snap.destroyed = true;
        let ids: Vec<i32> = self.transactions.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, pending)) = self.transactions.remove(&id) {
                pending.fail(UiccError::Disposed { entity: "records" });
            }
        }
        self.publish();
        debug!(phone_id = self.ctx.phone_id, "records actor stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use uicc_ril::sim::AppImage;
    use uicc_ril::{AppType, CardImage, CommandsInterface, SimulatedModem};

    use super::*;
    use crate::config::UiccConfig;

    fn actor() -> (RecordsActor, watch::Receiver<Arc<RecordsSnapshot>>) {
        let image = CardImage::new("8901410321111851072").with_app(AppImage::new(AppType::Sim));
        let modem = SimulatedModem::new(1).with_card(0, &image).unwrap();
        let ci: Arc<dyn CommandsInterface> = modem.ril(0);
        let fh = IccFileHandler::new(Arc::clone(&ci), AppType::Sim, None);
        let adn_cache = Arc::new(AdnCache::new(fh.clone(), AppType::Sim));
        let ctx = RecordsContext {
            ci,
            fh,
            app_type: AppType::Sim,
            config: Arc::new(UiccConfig::default()),
            phone_id: 0,
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(Arc::new(RecordsSnapshot::new(
            RecordsFamily::Sim,
            AppType::Sim,
        )));
        let (events, _) = broadcast::channel(8);
        let actor = RecordsActor::new(
            ctx,
            RecordsFamily::Sim,
            tx,
            snapshot_tx,
            events,
            Arc::new(DashMap::new()),
            adn_cache,
            CancellationToken::new(),
        );
        (actor, snapshot)
    }

    #[test]
    fn stray_completion_is_clamped_at_zero() {
        let (mut actor, snapshot) = actor();
        actor.snap.records_requested = true;
        actor.locked_reason = Some(LockedReason::Locked);

        actor.record_loaded(Step::Imsi);
        actor.publish();

        assert_eq!(actor.pending, 0);
        assert_eq!(actor.locked_reason, Some(LockedReason::Locked));
        let snap = snapshot.borrow().clone();
        assert_eq!(snap.records_to_load, 0);
        assert!(!snap.loaded);
        assert!(!snap.locked_records_loaded);
        assert_eq!(snap.loaded_generation, 0);
    }

    #[test]
    fn last_counted_completion_finishes_the_locked_batch() {
        let (mut actor, snapshot) = actor();
        actor.locked_reason = Some(LockedReason::NetworkLocked);
        actor.pending = 1;

        actor.record_loaded(Step::Iccid);
        actor.publish();

        assert_eq!(actor.pending, 0);
        assert!(actor.locked_reason.is_none());
        let snap = snapshot.borrow().clone();
        assert!(snap.network_locked_records_loaded);
        assert!(!snap.locked_records_loaded);
        assert!(!snap.loaded);
    }
}
