use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::catalog::ChannelCatalog;
use crate::config::{Config, SinkConfig};
use crate::extraction::{ExtractionAdapter, Extractor};
use crate::live::{LiveOutcome, LiveSubscriber};
use crate::metrics::{METRICS, RuntimeMetrics};
use crate::replay::HistoricalReplayer;
use crate::schema::{MessageOrigin, RawMessage, ReplayWindow};
use crate::sinks::{self, SinkFanout, SinkStore};
use crate::source::MessageSource;
use crate::validator;

/// Downstream path shared by replay and live delivery.
#[async_trait::async_trait]
pub trait MessageHandler: Send {
    async fn handle(&mut self, msg: RawMessage, origin: MessageOrigin);
}

// ------------------------------------------------------------
// Pipeline state machine
// ------------------------------------------------------------
//
//   Starting → Backfilling → Live → Stopped
//   Starting → Stopped                (no sinks)
//
// Variant order is the only allowed direction of travel.
//
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    Starting,
    Backfilling,
    Live,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// No sink connected; nothing was processed
    NoSinks,

    /// Operator interrupt during backfill or live delivery
    Interrupted,

    /// Live transport went away
    Disconnected,
}

#[derive(Debug)]
struct StateLog {
    history: Vec<PipelineState>,
}

impl StateLog {
    fn new() -> Self {
        Self {
            history: vec![PipelineState::Starting],
        }
    }

    fn current(&self) -> PipelineState {
        self.history.last().copied().unwrap_or(PipelineState::Starting)
    }

    fn advance(&mut self, next: PipelineState) {
        let current = self.current();
        if next <= current {
            log::warn!("Ignoring pipeline transition {:?} -> {:?}", current, next);
            return;
        }
        log::info!("Pipeline {:?} -> {:?}", current, next);
        self.history.push(next);
    }
}

// ------------------------------------------------------------
// Boundary cursor
// ------------------------------------------------------------
//
// Highest replayed timestamp per channel, plus the texts seen at
// that instant. A live message is covered when it is older than
// the boundary, or at the boundary with a text already replayed.
//
#[derive(Debug)]
struct Boundary {
    at: DateTime<Utc>,
    texts: HashSet<String>,
}

#[derive(Debug, Default)]
struct BoundaryCursor {
    last_seen: HashMap<String, Boundary>,
}

impl BoundaryCursor {
    fn record(&mut self, msg: &RawMessage) {
        let slot = self
            .last_seen
            .entry(msg.channel_ref.clone())
            .or_insert_with(|| Boundary {
                at: msg.timestamp,
                texts: HashSet::new(),
            });

        if msg.timestamp > slot.at {
            slot.at = msg.timestamp;
            slot.texts.clear();
        }
        if msg.timestamp == slot.at {
            slot.texts.insert(msg.text.clone());
        }
    }

    fn covers(&self, msg: &RawMessage) -> bool {
        self.last_seen.get(&msg.channel_ref).is_some_and(|b| {
            msg.timestamp < b.at || (msg.timestamp == b.at && b.texts.contains(&msg.text))
        })
    }
}

/// Counters for one run of the ingest path.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub processed: usize,
    pub dropped: usize,
    pub appended: usize,
    pub duplicates: usize,
    pub rows_written: usize,
    pub row_failures: usize,
}

/// Extraction → validation → fanout, for one message at a time.
struct Ingest<'a> {
    adapter: &'a ExtractionAdapter,
    fanout: SinkFanout,
    cursor: Option<BoundaryCursor>,
    stats: IngestStats,
}

fn preview(text: &str) -> String {
    const MAX: usize = 80;
    let mut out: String = text.chars().take(MAX).collect();
    if text.chars().count() > MAX {
        out.push('…');
    }
    out.replace('\n', " ")
}

#[async_trait::async_trait]
impl<'a> MessageHandler for Ingest<'a> {
    async fn handle(&mut self, msg: RawMessage, origin: MessageOrigin) {
        if let Some(cursor) = self.cursor.as_mut() {
            match origin {
                MessageOrigin::Replay => cursor.record(&msg),
                MessageOrigin::Live if cursor.covers(&msg) => {
                    log::debug!("Skipping live message already replayed from {}", msg.channel_ref);
                    RuntimeMetrics::incr(&METRICS.live_duplicates_skipped);
                    self.stats.duplicates += 1;
                    return;
                }
                MessageOrigin::Live => {}
            }
        }

        log::info!("Processing message from {}: {}", msg.channel_ref, preview(&msg.text));
        self.stats.processed += 1;

        let record = self.adapter.extract(&msg.text).await;
        if !validator::is_present(&record) {
            log::debug!("No job details found in message.");
            RuntimeMetrics::incr(&METRICS.records_dropped);
            self.stats.dropped += 1;
            return;
        }

        log::info!("Extracted job details: {:?}", record);
        let report = self.fanout.append(&record).await;
        self.stats.appended += 1;
        self.stats.rows_written += report.written.len();
        self.stats.row_failures += report.failed.len();
    }
}

// ------------------------------------------------------------
// Pipeline coordinator
// ------------------------------------------------------------
//
// Owns the end-to-end sequencing:
//
//   resolve channels → connect sinks (abort if none)
//   → backfill every channel → live until shutdown/disconnect
//
// Shutdown is honoured from the start of backfill onwards.
//
// Single flow of control; nothing is spawned here.
//
pub struct PipelineCoordinator {
    catalog: ChannelCatalog,
    source: Arc<dyn MessageSource>,
    adapter: ExtractionAdapter,
    store: Arc<dyn SinkStore>,
    sink_configs: Vec<SinkConfig>,
    dedupe_boundary: bool,
    states: StateLog,
    stats: IngestStats,
}

impl PipelineCoordinator {
    pub fn new(
        config: &Config,
        source: Arc<dyn MessageSource>,
        extractor: Arc<dyn Extractor>,
        store: Arc<dyn SinkStore>,
    ) -> Self {
        Self {
            catalog: ChannelCatalog::new(config, source.clone()),
            source,
            adapter: ExtractionAdapter::new(&config.extraction, extractor),
            store,
            sink_configs: config.sinks.clone(),
            dedupe_boundary: config.dedupe_boundary,
            states: StateLog::new(),
            stats: IngestStats::default(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.states.current()
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[PipelineState] {
        &self.states.history
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    pub async fn run<S>(&mut self, window: ReplayWindow, shutdown: S) -> PipelineOutcome
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let channels = self.catalog.resolve().await;
        if channels.is_empty() {
            log::warn!("No channels resolved; backfill and live delivery will be idle");
        }

        let schema = self.adapter.schema().clone();
        let active = sinks::connect_all(self.store.as_ref(), &self.sink_configs, &schema).await;
        if active.is_empty() {
            log::error!("No sinks available. Exiting.");
            self.states.advance(PipelineState::Stopped);
            return PipelineOutcome::NoSinks;
        }
        let fanout = SinkFanout::new(active, schema);
        log::info!("Connected to {} sinks.", fanout.len());

        let mut ingest = Ingest {
            adapter: &self.adapter,
            fanout,
            cursor: self.dedupe_boundary.then(BoundaryCursor::default),
            stats: IngestStats::default(),
        };

        self.states.advance(PipelineState::Backfilling);
        let replayer = HistoricalReplayer::new(self.source.clone());
        let replayed = tokio::select! {
            biased;

            _ = &mut shutdown => None,
            summary = replayer.run(&channels, window, &mut ingest) => Some(summary),
        };

        let Some(summary) = replayed else {
            log::info!("Program terminated by user.");
            self.stats = ingest.stats;
            self.states.advance(PipelineState::Stopped);
            return PipelineOutcome::Interrupted;
        };
        log::info!(
            "Backfill done: {} channels completed, {} abandoned, {} messages",
            summary.channels_completed,
            summary.channels_abandoned,
            summary.messages
        );

        self.states.advance(PipelineState::Live);
        let live = LiveSubscriber::new(self.source.clone())
            .run(&channels, &mut ingest, shutdown.as_mut())
            .await;

        self.stats = ingest.stats;
        self.states.advance(PipelineState::Stopped);

        match live {
            LiveOutcome::Interrupted => PipelineOutcome::Interrupted,
            LiveOutcome::Disconnected => PipelineOutcome::Disconnected,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::testing::CannedExtractor;
    use crate::sinks::testing::ScriptedStore;
    use crate::source::testing::{Item, ScriptedSource};
    use chrono::TimeZone;
    use serde_json::{Value, json};
    use tokio::sync::{mpsc, oneshot};

    use super::PipelineState::*;

    const POSTING: &str = "Acme Corp hiring SDE, apply at acme.co/jobs";
    const GREETING: &str = "Good morning!";
    const LIVE_POSTING: &str = "Initech needs QA, 8 LPA";

    fn config(dedupe: bool) -> Config {
        let json = json!({
            "channels": ["a", "gone"],
            "source": { "api_url": "http://r/", "live_url": "ws://r/live" },
            "extraction": { "endpoint": "e", "deployment": "d", "api_version": "v" },
            "sinks": [
                { "kind": "csv", "id": "s1", "path": "unused.csv" },
                { "kind": "webhook", "id": "s2", "url": "http://h" }
            ],
            "dedupe_boundary": dedupe
        });
        Config::from_json(&json.to_string()).unwrap()
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, 0, 0).unwrap()
    }

    fn window() -> ReplayWindow {
        ReplayWindow::starting_today(at(12))
    }

    fn answer(company: &str, role: &str, ctc: &str, link: &str) -> Value {
        json!({
            "company_name": company, "job_role": role, "ctc": ctc,
            "years_of_experience": "", "passout_year": "", "application_link": link
        })
    }

    fn extractor() -> Arc<CannedExtractor> {
        Arc::new(
            CannedExtractor::default()
                .answer(POSTING, answer("Acme Corp", "SDE", "", "acme.co/jobs"))
                .answer(GREETING, answer("", "", "", ""))
                .answer(LIVE_POSTING, answer("Initech", "QA", "8 LPA", "")),
        )
    }

    fn store(reachable: &[&str]) -> Arc<ScriptedStore> {
        Arc::new(ScriptedStore {
            reachable: reachable.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    fn live_msg(ts: DateTime<Utc>, text: &str) -> RawMessage {
        RawMessage {
            channel_ref: "a".into(),
            timestamp: ts,
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn no_sinks_stops_before_backfill() {
        let source = Arc::new(
            ScriptedSource::default()
                .with_channel("a", "A")
                .with_history("a", vec![Item::Msg(at(1), POSTING)]),
        );
        let store = store(&[]);
        let mut pipeline =
            PipelineCoordinator::new(&config(false), source.clone(), extractor(), store.clone());

        let outcome = pipeline.run(window(), std::future::pending()).await;

        assert_eq!(outcome, PipelineOutcome::NoSinks);
        assert_eq!(pipeline.history(), [Starting, Stopped]);
        assert_eq!(pipeline.stats().processed, 0);
        assert!(source.subscribed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn backfill_then_live_until_disconnect() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(live_msg(at(14), LIVE_POSTING)).await.unwrap();
        drop(tx);

        let source = Arc::new(
            ScriptedSource::default()
                .with_channel("a", "A")
                .with_history(
                    "a",
                    vec![Item::Msg(at(1), POSTING), Item::Msg(at(2), GREETING)],
                )
                .with_live(rx),
        );
        let store = store(&["s1", "s2"]);
        let mut pipeline =
            PipelineCoordinator::new(&config(false), source.clone(), extractor(), store.clone());

        let outcome = pipeline.run(window(), std::future::pending()).await;

        assert_eq!(outcome, PipelineOutcome::Disconnected);
        assert_eq!(pipeline.history(), [Starting, Backfilling, Live, Stopped]);
        assert_eq!(pipeline.state(), Stopped);

        // unresolvable "gone" is not subscribed
        assert_eq!(*source.subscribed.lock().unwrap(), ["a"]);

        let rows = store.rows.lock().unwrap();
        let acme = vec!["Acme Corp", "SDE", "", "", "", "acme.co/jobs"];
        let initech = vec!["Initech", "QA", "8 LPA", "", "", ""];
        assert_eq!(*rows, vec![acme.clone(), acme, initech.clone(), initech]);

        let stats = pipeline.stats();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.appended, 2);
        assert_eq!(stats.rows_written, 4);
        assert_eq!(stats.row_failures, 0);
    }

    #[tokio::test]
    async fn one_dead_sink_does_not_stop_startup() {
        let (_tx, rx) = mpsc::channel(8);

        let source = Arc::new(
            ScriptedSource::default()
                .with_channel("a", "A")
                .with_history("a", vec![Item::Msg(at(1), POSTING)])
                .with_live(rx),
        );
        let store = store(&["s2"]);
        let mut pipeline =
            PipelineCoordinator::new(&config(false), source.clone(), extractor(), store.clone());

        // Interrupt once the live subscription is attached
        let watch = source.clone();
        let outcome = pipeline
            .run(window(), async move {
                while watch.subscribed.lock().unwrap().is_empty() {
                    tokio::task::yield_now().await;
                }
            })
            .await;

        assert_eq!(outcome, PipelineOutcome::Interrupted);
        assert_eq!(pipeline.history(), [Starting, Backfilling, Live, Stopped]);
        assert_eq!(store.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn interrupt_during_backfill_stops_cleanly() {
        let (_tx, rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        stop_tx.send(()).unwrap();

        let source = Arc::new(
            ScriptedSource::default()
                .with_channel("a", "A")
                .with_history("a", vec![Item::Msg(at(1), POSTING)])
                .with_live(rx),
        );
        let store = store(&["s1"]);
        let mut pipeline =
            PipelineCoordinator::new(&config(false), source.clone(), extractor(), store.clone());

        let outcome = pipeline
            .run(window(), async {
                let _ = stop_rx.await;
            })
            .await;

        assert_eq!(outcome, PipelineOutcome::Interrupted);
        assert_eq!(pipeline.history(), [Starting, Backfilling, Stopped]);
        assert!(store.rows.lock().unwrap().is_empty());
        assert!(source.subscribed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn boundary_duplicate_processed_twice_by_default() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(live_msg(at(1), POSTING)).await.unwrap();
        drop(tx);

        let source = Arc::new(
            ScriptedSource::default()
                .with_channel("a", "A")
                .with_history("a", vec![Item::Msg(at(1), POSTING)])
                .with_live(rx),
        );
        let mut pipeline = PipelineCoordinator::new(&config(false), source, extractor(), store(&["s1"]));

        pipeline.run(window(), std::future::pending()).await;

        assert_eq!(pipeline.stats().appended, 2);
        assert_eq!(pipeline.stats().duplicates, 0);
    }

    #[tokio::test]
    async fn boundary_cursor_skips_replayed_live_messages() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(live_msg(at(1), POSTING)).await.unwrap();
        tx.send(live_msg(at(14), LIVE_POSTING)).await.unwrap();
        drop(tx);

        let source = Arc::new(
            ScriptedSource::default()
                .with_channel("a", "A")
                .with_history("a", vec![Item::Msg(at(1), POSTING)])
                .with_live(rx),
        );
        let store = store(&["s1"]);
        let mut pipeline =
            PipelineCoordinator::new(&config(true), source, extractor(), store.clone());

        pipeline.run(window(), std::future::pending()).await;

        assert_eq!(pipeline.stats().duplicates, 1);
        assert_eq!(pipeline.stats().appended, 2);
        assert_eq!(store.rows.lock().unwrap().len(), 2);
    }

    #[test]
    fn boundary_cursor_compares_text_at_equal_timestamps() {
        let mut cursor = BoundaryCursor::default();
        cursor.record(&live_msg(at(1), "early"));
        cursor.record(&live_msg(at(3), POSTING));
        cursor.record(&live_msg(at(2), "late arrival"));

        assert!(cursor.covers(&live_msg(at(2), "anything older")));
        assert!(cursor.covers(&live_msg(at(3), POSTING)));
        assert!(!cursor.covers(&live_msg(at(3), LIVE_POSTING)));
        assert!(!cursor.covers(&live_msg(at(4), POSTING)));

        let other = RawMessage {
            channel_ref: "b".into(),
            timestamp: at(1),
            text: POSTING.into(),
        };
        assert!(!cursor.covers(&other));
    }

    #[test]
    fn state_log_refuses_backward_transitions() {
        let mut log = StateLog::new();
        log.advance(Backfilling);
        log.advance(Starting);
        log.advance(Backfilling);
        log.advance(Stopped);

        assert_eq!(log.history, [Starting, Backfilling, Stopped]);
    }

    #[test]
    fn preview_is_single_line_and_bounded() {
        let long = "x\n".repeat(100);
        let p = preview(&long);
        assert!(!p.contains('\n'));
        assert_eq!(p.chars().count(), 81);
    }
}
