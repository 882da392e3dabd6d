// ── SIM phonebook cache ──
//
// Modem-side phonebook: capacity is negotiated first, records stream in
// through `SimPhonebookRecords` indications, and updates are serialized
// one at a time. Loads that fail are retried on a fixed interval until
// the retries run out.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uicc_ril::{
    CommandsInterface, PhonebookCapacity, PhonebookReceivedStatus, RilError, RilIndication,
    SimPhonebookRecord,
};

use crate::config::UiccConfig;
use crate::error::UiccError;
use crate::stream::SnapshotStream;

type Reply<T> = oneshot::Sender<Result<T, UiccError>>;
type Records = Arc<Vec<SimPhonebookRecord>>;

/// Published phonebook state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhonebookSnapshot {
    pub capacity: Option<PhonebookCapacity>,
    /// Capacity could not be determined; requests fail.
    pub capacity_unknown: bool,
    pub loaded: bool,
    /// Entries 1..=capacity; empty entries are placeholders.
    pub records: Records,
    pub retry_count: u32,
    pub pending_updates: usize,
}

enum Msg {
    Get(Reply<Records>),
    Update {
        record: SimPhonebookRecord,
        reply: Reply<u32>,
    },
    Reset,
    Capacity(Result<PhonebookCapacity, RilError>),
    FetchFailed(RilError),
    Retry(u32),
    UpdateDone {
        record: SimPhonebookRecord,
        result: Result<u32, RilError>,
        reply: Reply<u32>,
    },
}

/// Handle onto the phonebook actor of one phone. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SimPhonebookCache {
    tx: mpsc::UnboundedSender<Msg>,
    snapshot: watch::Receiver<Arc<PhonebookSnapshot>>,
    cancel: CancellationToken,
}

impl SimPhonebookCache {
    /// Start the cache and ask the modem for its capacity.
    pub(crate) fn spawn(
        ci: Arc<dyn CommandsInterface>,
        config: &UiccConfig,
        phone_id: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(Arc::new(PhonebookSnapshot::default()));
        let indications = ci.indications();
        let actor = PhonebookActor {
            ci,
            phone_id,
            max_retries: config.phonebook_max_retries,
            retry_interval: config.phonebook_retry_interval,
            tx: tx.clone(),
            snapshot_tx,
            cancel: cancel.clone(),
            capacity: None,
            capacity_unknown: false,
            records: Vec::new(),
            loaded: false,
            fetching: false,
            retry_count: 0,
            waiters: Vec::new(),
            updates: VecDeque::new(),
            update_in_flight: false,
        };
        tokio::spawn(actor.run(rx, indications));
        Self {
            tx,
            snapshot,
            cancel,
        }
    }

    fn send(&self, msg: Msg) -> Result<(), UiccError> {
        if self.cancel.is_cancelled() {
            return Err(UiccError::actor_gone("phonebook"));
        }
        self.tx
            .send(msg)
            .map_err(|_| UiccError::actor_gone("phonebook"))
    }

    /// All entries, waiting for the load to finish if needed.
    pub async fn get_adn_records(&self) -> Result<Records, UiccError> {
        let (tx, rx) = oneshot::channel();
        self.send(Msg::Get(tx))?;
        rx.await.map_err(|_| UiccError::actor_gone("phonebook"))?
    }

    /// Write one entry. A `record_id` of 0 lets the modem allocate one.
    /// Returns the id the modem wrote.
    pub async fn update_record(&self, record: SimPhonebookRecord) -> Result<u32, UiccError> {
        let (tx, rx) = oneshot::channel();
        self.send(Msg::Update { record, reply: tx })?;
        rx.await.map_err(|_| UiccError::actor_gone("phonebook"))?
    }

    /// Drop everything and load again from the capacity query.
    pub fn reset(&self) {
        // A disposed cache has nothing to reload.
        let _ = self.send(Msg::Reset);
    }

    pub fn snapshot(&self) -> Arc<PhonebookSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> SnapshotStream<PhonebookSnapshot> {
        SnapshotStream::new(self.snapshot.clone())
    }

    pub fn dispose(&self) {
        self.cancel.cancel();
    }
}

// ── Actor ────────────────────────────────────────────────────────────

struct PhonebookActor {
    ci: Arc<dyn CommandsInterface>,
    phone_id: usize,
    max_retries: u32,
    retry_interval: Duration,
    tx: mpsc::UnboundedSender<Msg>,
    snapshot_tx: watch::Sender<Arc<PhonebookSnapshot>>,
    cancel: CancellationToken,
    capacity: Option<PhonebookCapacity>,
    capacity_unknown: bool,
    records: Vec<SimPhonebookRecord>,
    loaded: bool,
    fetching: bool,
    retry_count: u32,
    waiters: Vec<Reply<Records>>,
    updates: VecDeque<(SimPhonebookRecord, Reply<u32>)>,
    update_in_flight: bool,
}

impl PhonebookActor {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Msg>,
        mut indications: broadcast::Receiver<RilIndication>,
    ) {
        self.query_capacity();
        let mut indications_open = true;
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
                        warn!(phone_id = self.phone_id, missed, "phonebook lagged on indications");
                    }
                    Err(RecvError::Closed) => indications_open = false,
                },
            }
            self.publish();
        }
        self.fail_all(&UiccError::Disposed { entity: "phonebook" });
        debug!(phone_id = self.phone_id, "phonebook actor stopped");
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Get(reply) => self.get(reply),
            Msg::Update { record, reply } => self.queue_update(record, reply),
            Msg::Reset => self.reset(),
            Msg::Capacity(result) => self.on_capacity(result),
            Msg::FetchFailed(e) => {
                warn!(phone_id = self.phone_id, error = %e, "phonebook fetch request failed");
                self.on_fetch_error();
            }
            Msg::Retry(count) => self.on_retry(count),
            Msg::UpdateDone {
                record,
                result,
                reply,
            } => self.on_update_done(record, result, reply),
        }
    }

    fn on_indication(&mut self, ind: RilIndication) {
        match ind {
            RilIndication::SimPhonebookChanged => {
                if self.update_in_flight || !self.updates.is_empty() {
                    debug!(phone_id = self.phone_id, "phonebook change during update ignored");
                } else {
                    self.reset();
                }
            }
            RilIndication::SimPhonebookRecords { status, records } => {
                self.on_records(status, records);
            }
            _ => {}
        }
    }

    fn publish(&self) {
        let next = PhonebookSnapshot {
            capacity: self.capacity,
            capacity_unknown: self.capacity_unknown,
            loaded: self.loaded,
            records: Arc::new(self.records.clone()),
            retry_count: self.retry_count,
            pending_updates: self.updates.len() + usize::from(self.update_in_flight),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if **current == next {
                false
            } else {
                *current = Arc::new(next);
                true
            }
        });
    }

    // ── Loading ──────────────────────────────────────────────────────

    fn query_capacity(&self) {
        let request = self.ci.get_sim_phonebook_capacity();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(Msg::Capacity(request.await));
        });
    }

    fn on_capacity(&mut self, result: Result<PhonebookCapacity, RilError>) {
        let capacity = match result {
            Ok(capacity) if capacity.is_valid() => capacity,
            Ok(_) => {
                warn!(phone_id = self.phone_id, "modem reported an empty phonebook capacity");
                return self.capacity_failed();
            }
            Err(e) => {
                debug!(phone_id = self.phone_id, error = %e, "phonebook capacity unavailable");
                return self.capacity_failed();
            }
        };
        info!(
            phone_id = self.phone_id,
            max = capacity.max_adn_records,
            used = capacity.used_adn_records,
            "phonebook capacity"
        );
        self.capacity = Some(capacity);
        self.records = placeholders(capacity.max_adn_records);
        if capacity.used_adn_records == 0 {
            self.finish_load();
        } else {
            self.fetch();
        }
    }

    fn capacity_failed(&mut self) {
        self.capacity = None;
        self.capacity_unknown = true;
        self.fail_all(&UiccError::CapacityUnknown);
    }

    fn fetch(&mut self) {
        if self.fetching {
            return;
        }
        self.fetching = true;
        debug!(phone_id = self.phone_id, attempt = self.retry_count + 1, "fetching phonebook");
        let request = self.ci.get_sim_phonebook_records();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if let Err(e) = request.await {
                let _ = tx.send(Msg::FetchFailed(e));
            }
        });
    }

    fn on_records(&mut self, status: PhonebookReceivedStatus, records: Vec<SimPhonebookRecord>) {
        if !self.fetching {
            debug!(phone_id = self.phone_id, ?status, "phonebook records without a fetch");
            return;
        }
        match status {
            PhonebookReceivedStatus::Ok => self.merge(records),
            PhonebookReceivedStatus::Complete => {
                self.merge(records);
                self.fetching = false;
                self.finish_load();
            }
            PhonebookReceivedStatus::Error | PhonebookReceivedStatus::Abort => {
                warn!(phone_id = self.phone_id, ?status, "phonebook load failed");
                self.on_fetch_error();
            }
        }
    }

    fn merge(&mut self, records: Vec<SimPhonebookRecord>) {
        for record in records {
            match slot_of(record.record_id, self.records.len()) {
                Some(i) => self.records[i] = record,
                None => warn!(
                    phone_id = self.phone_id,
                    record_id = record.record_id,
                    "phonebook record outside capacity"
                ),
            }
        }
    }

    fn finish_load(&mut self) {
        self.loaded = true;
        self.retry_count = 0;
        let records: Records = Arc::new(self.records.clone());
        info!(
            phone_id = self.phone_id,
            used = records.iter().filter(|r| !r.is_empty()).count(),
            "phonebook loaded"
        );
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(Arc::clone(&records)));
        }
        self.pump_updates();
    }

    fn invalidate(&mut self) {
        self.loaded = false;
        self.fetching = false;
        let max = self.capacity.map_or(0, |c| c.max_adn_records);
        self.records = placeholders(max);
    }

    fn on_fetch_error(&mut self) {
        self.invalidate();
        self.retry_count += 1;
        let count = self.retry_count;
        let delay = self.retry_interval;
        let tx = self.tx.clone();
        debug!(phone_id = self.phone_id, count, ?delay, "phonebook retry scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Msg::Retry(count));
        });
    }

    fn on_retry(&mut self, count: u32) {
        if count != self.retry_count || self.loaded {
            // Superseded by a reset or a later attempt.
            return;
        }
        if count >= self.max_retries {
            warn!(phone_id = self.phone_id, attempts = count, "phonebook retries exhausted");
            self.retry_count = 0;
            let err = UiccError::RetriesExhausted { attempts: count };
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(Err(err.clone()));
            }
            for (_, reply) in self.updates.drain(..) {
                let _ = reply.send(Err(err.clone()));
            }
            return;
        }
        self.fetch();
    }

    fn reset(&mut self) {
        info!(phone_id = self.phone_id, "phonebook reset");
        self.invalidate();
        self.retry_count = 0;
        self.capacity = None;
        self.capacity_unknown = false;
        self.query_capacity();
    }

    // ── Requests ─────────────────────────────────────────────────────

    fn get(&mut self, reply: Reply<Records>) {
        if self.capacity_unknown {
            let _ = reply.send(Err(UiccError::CapacityUnknown));
            return;
        }
        if self.loaded {
            let _ = reply.send(Ok(Arc::new(self.records.clone())));
            return;
        }
        self.waiters.push(reply);
        if self.capacity.is_some() {
            self.fetch();
        }
    }

    fn queue_update(&mut self, record: SimPhonebookRecord, reply: Reply<u32>) {
        if self.capacity_unknown {
            let _ = reply.send(Err(UiccError::CapacityUnknown));
            return;
        }
        self.updates.push_back((record, reply));
        if !self.loaded && !self.fetching && self.capacity.is_some() {
            self.fetch();
        }
        self.pump_updates();
    }

    fn pump_updates(&mut self) {
        if !self.loaded || self.update_in_flight {
            return;
        }
        let Some((record, reply)) = self.updates.pop_front() else {
            return;
        };
        if record.record_id != 0 && slot_of(record.record_id, self.records.len()).is_none() {
            let _ = reply.send(Err(UiccError::InvalidArgument {
                message: format!("record {} beyond capacity", record.record_id),
            }));
            return self.pump_updates();
        }
        self.update_in_flight = true;
        let request = self.ci.update_sim_phonebook_record(record.clone());
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = request.await;
            let _ = tx.send(Msg::UpdateDone {
                record,
                result,
                reply,
            });
        });
    }

    fn on_update_done(
        &mut self,
        mut record: SimPhonebookRecord,
        result: Result<u32, RilError>,
        reply: Reply<u32>,
    ) {
        self.update_in_flight = false;
        let outcome = match result {
            Err(e) => Err(UiccError::from(e)),
            Ok(written) if record.record_id != 0 && written != record.record_id => {
                warn!(
                    phone_id = self.phone_id,
                    requested = record.record_id,
                    written,
                    "phonebook wrote a different record"
                );
                Err(UiccError::RecordIdMismatch {
                    requested: record.record_id,
                    written,
                })
            }
            Ok(written) => {
                record.record_id = written;
                if let Some(i) = slot_of(written, self.records.len()) {
                    self.records[i] = if record.is_empty() {
                        SimPhonebookRecord {
                            record_id: written,
                            ..SimPhonebookRecord::default()
                        }
                    } else {
                        record
                    };
                }
                Ok(written)
            }
        };
        let _ = reply.send(outcome);
        self.pump_updates();
    }

    fn fail_all(&mut self, err: &UiccError) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
        for (_, reply) in self.updates.drain(..) {
            let _ = reply.send(Err(err.clone()));
        }
    }
}

fn placeholders(max: u32) -> Vec<SimPhonebookRecord> {
    (1..=max)
        .map(|record_id| SimPhonebookRecord {
            record_id,
            ..SimPhonebookRecord::default()
        })
        .collect()
}

/// Index of a 1-based record id in a table of `len` entries.
fn slot_of(record_id: u32, len: usize) -> Option<usize> {
    let index = usize::try_from(record_id).ok()?.checked_sub(1)?;
    (index < len).then_some(index)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use uicc_ril::sim::{AppImage, PhonebookImage};
    use uicc_ril::{AppType, CardImage, SimulatedModem};

    use super::*;

    // ── Helpers ──────────────────────────────────────────────────────

    fn entry(id: u32, name: &str, number: &str) -> SimPhonebookRecord {
        SimPhonebookRecord {
            record_id: id,
            alpha_tag: name.into(),
            number: number.into(),
            ..SimPhonebookRecord::default()
        }
    }

    fn start(capacity: u32, entries: Vec<SimPhonebookRecord>) -> (SimulatedModem, SimPhonebookCache) {
        let image = CardImage::new("8901410321111851072")
            .with_app(AppImage::new(AppType::Usim))
            .with_phonebook(PhonebookImage { capacity, entries });
        let modem = SimulatedModem::new(1).with_card(0, &image).unwrap();
        let config = UiccConfig::default();
        let cache = SimPhonebookCache::spawn(modem.ril(0), &config, 0, CancellationToken::new());
        (modem, cache)
    }

    // ── Loading ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn empty_phonebook_reads_as_placeholders() {
        let (_modem, cache) = start(4, Vec::new());
        let records = cache.get_adn_records().await.unwrap();
        let ids: Vec<u32> = records.iter().map(|r| r.record_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(records.iter().all(SimPhonebookRecord::is_empty));
    }

    #[tokio::test]
    async fn streamed_batches_are_merged() {
        let entries = vec![
            entry(1, "Alice", "5551000"),
            entry(2, "Bob", "5552000"),
            entry(4, "Dora", "5554000"),
        ];
        let (_modem, cache) = start(5, entries);
        let records = cache.get_adn_records().await.unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].alpha_tag, "Alice");
        assert_eq!(records[3].number, "5554000");
        assert!(records[2].is_empty());
        assert!(cache.snapshot().loaded);
    }

    #[tokio::test]
    async fn unsupported_capacity_fails_requests() {
        let (_modem, cache) = start(0, Vec::new());
        let err = cache.get_adn_records().await.unwrap_err();
        assert!(matches!(err, UiccError::CapacityUnknown));
    }

    // ── Retries ──────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn three_failures_exhaust_retries() {
        let (modem, cache) = start(3, vec![entry(1, "Alice", "5551000")]);
        modem.fail_phonebook_fetches(3);
        let err = cache.get_adn_records().await.unwrap_err();
        assert!(matches!(err, UiccError::RetriesExhausted { attempts: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn two_failures_then_success() {
        let (modem, cache) = start(3, vec![entry(1, "Alice", "5551000")]);
        modem.fail_phonebook_fetches(2);
        let records = cache.get_adn_records().await.unwrap();
        assert_eq!(records[0].alpha_tag, "Alice");
        assert_eq!(cache.snapshot().retry_count, 0);
    }

    // ── Updates ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn update_patches_cached_entry() {
        let (modem, cache) = start(3, vec![entry(1, "Alice", "5551000")]);
        cache.get_adn_records().await.unwrap();
        let id = cache.update_record(entry(2, "Bob", "5552000")).await.unwrap();
        assert_eq!(id, 2);
        assert_eq!(cache.get_adn_records().await.unwrap()[1].alpha_tag, "Bob");
        assert_eq!(modem.phonebook_entries(0).len(), 2);
    }

    #[tokio::test]
    async fn new_entry_takes_allocated_id() {
        let (_modem, cache) = start(3, vec![entry(1, "Alice", "5551000")]);
        let id = cache.update_record(entry(0, "Carol", "5553000")).await.unwrap();
        assert_eq!(id, 2);
        assert_eq!(cache.get_adn_records().await.unwrap()[1].alpha_tag, "Carol");
    }

    #[tokio::test]
    async fn mismatched_record_id_is_an_error() {
        let (modem, cache) = start(5, vec![entry(1, "Alice", "5551000")]);
        modem.force_phonebook_update_id(Some(4));
        let err = cache.update_record(entry(2, "Bob", "5552000")).await.unwrap_err();
        assert!(matches!(
            err,
            UiccError::RecordIdMismatch {
                requested: 2,
                written: 4
            }
        ));
    }

    #[tokio::test]
    async fn reset_reloads_from_the_modem() {
        let (modem, cache) = start(3, vec![entry(1, "Alice", "5551000")]);
        cache.get_adn_records().await.unwrap();
        modem.phonebook_changed(0);
        let mut stream = cache.subscribe();
        stream.wait_for(|s| s.loaded && s.records[0].alpha_tag == "Alice").await.unwrap();
        cache.reset();
        assert_eq!(cache.get_adn_records().await.unwrap()[0].alpha_tag, "Alice");
    }
}
