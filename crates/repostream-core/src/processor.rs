//! `CommitProcessor`: turns one commit event into delivered envelopes.
//!
//! ```text
//! CommitEvent
//!   │ too_big? ───────────────► drop event (warn)
//!   ▼
//! ArchiveDecoder ─ error ─────► drop event (error)
//!   │
//!   ▼ for each op
//! parse_repo_path ─ error ────► drop rest of event (error)
//!   │
//! CollectionFilter ─ no ──────► next op
//!   │
//!   ├─ create/update: RepoArchive::get_record → CID check → RecordDecoder
//!   │                 (any failure skips just this op)
//!   ├─ delete: no payload
//!   └─ other: log, next op
//!   ▼
//! Envelope → DeliverySink ─ error ─► abort event, return Err
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::codec::{ArchiveDecoder, CarArchiveDecoder, DagCborDecoder, RecordDecoder, RepoArchive, ResolvedRecord};
use crate::envelope::Envelope;
use crate::error::{DeliveryError, RecordError};
use crate::event::{Action, CommitEvent, RepoOp};
use crate::handler::CommitHandler;
use crate::path::{parse_repo_path, Nsid, RecordKey};
use crate::sink::DeliverySink;

/// Processor configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Only emit envelopes for this collection NSID (empty = all collections).
    #[serde(default)]
    pub collection_filter: String,
    /// Log commits whose op paths contain this substring at info level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight: Option<String>,
}

/// Exact-match collection filter. An empty filter lets everything through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionFilter(Option<String>);

impl CollectionFilter {
    pub fn new(filter: &str) -> Self {
        if filter.is_empty() {
            Self(None)
        } else {
            Self(Some(filter.to_string()))
        }
    }

    pub fn matches(&self, collection: &str) -> bool {
        self.0.as_deref().map_or(true, |f| f == collection)
    }
}

/// Why an entire event produced no (further) envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    TooBig,
    Archive,
    MalformedPath,
}

/// Per-event result, mostly for tests and logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub emitted: usize,
    pub filtered: usize,
    pub skipped: usize,
    pub dropped: Option<DropReason>,
}

/// Cumulative counters.
#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    events: AtomicU64,
    events_dropped: AtomicU64,
    envelopes: AtomicU64,
    ops_skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    pub events: u64,
    pub events_dropped: u64,
    pub envelopes: u64,
    pub ops_skipped: u64,
}

impl ProcessorMetrics {
    pub fn snapshot(&self) -> ProcessorStats {
        ProcessorStats {
            events: self.events.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            envelopes: self.envelopes.load(Ordering::Relaxed),
            ops_skipped: self.ops_skipped.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &CommitOutcome) {
        self.events.fetch_add(1, Ordering::Relaxed);
        if outcome.dropped.is_some() {
            self.events_dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.envelopes.fetch_add(outcome.emitted as u64, Ordering::Relaxed);
        self.ops_skipped.fetch_add(outcome.skipped as u64, Ordering::Relaxed);
    }
}

pub struct CommitProcessor {
    archives: Arc<dyn ArchiveDecoder>,
    records: Arc<dyn RecordDecoder>,
    sink: Arc<dyn DeliverySink>,
    filter: CollectionFilter,
    highlight: Option<String>,
    metrics: ProcessorMetrics,
}

impl CommitProcessor {
    /// A processor using the CAR / DAG-CBOR codecs.
    pub fn new(config: &ProcessorConfig, sink: Arc<dyn DeliverySink>) -> Self {
        Self::with_codecs(
            config,
            Arc::new(CarArchiveDecoder),
            Arc::new(DagCborDecoder),
            sink,
        )
    }

    pub fn with_codecs(
        config: &ProcessorConfig,
        archives: Arc<dyn ArchiveDecoder>,
        records: Arc<dyn RecordDecoder>,
        sink: Arc<dyn DeliverySink>,
    ) -> Self {
        Self {
            archives,
            records,
            sink,
            filter: CollectionFilter::new(&config.collection_filter),
            highlight: config.highlight.clone().filter(|h| !h.is_empty()),
            metrics: ProcessorMetrics::default(),
        }
    }

    pub fn stats(&self) -> ProcessorStats {
        self.metrics.snapshot()
    }

    /// Process one commit event, delivering an envelope per surviving op.
    ///
    /// Returns `Err` only when the sink fails; the remaining ops of the
    /// event are not attempted in that case.
    #[instrument(skip_all, fields(repo = %evt.repo, seq = evt.seq, rev = %evt.rev))]
    pub async fn process(&self, evt: &CommitEvent) -> Result<CommitOutcome, DeliveryError> {
        let result = self.process_inner(evt).await;
        if let Ok(outcome) = &result {
            self.metrics.record(outcome);
        }
        result
    }

    async fn process_inner(&self, evt: &CommitEvent) -> Result<CommitOutcome, DeliveryError> {
        let mut outcome = CommitOutcome::default();

        if let Some(needle) = &self.highlight {
            if evt.touches(needle) {
                info!(ops = evt.ops.len(), time = %evt.time, "commit touches highlighted path");
            }
        }

        if evt.too_big {
            warn!(ops = evt.ops.len(), "skipping tooBig event");
            outcome.dropped = Some(DropReason::TooBig);
            return Ok(outcome);
        }

        let archive = match self.archives.decode_archive(&evt.blocks) {
            Ok(archive) => archive,
            Err(err) => {
                error!(error = %err, "failed to read repo from CAR");
                outcome.dropped = Some(DropReason::Archive);
                return Ok(outcome);
            }
        };
        debug!(blocks = archive.block_count(), ops = evt.ops.len(), "commit event");

        for op in &evt.ops {
            let (collection, rkey) = match parse_repo_path(&op.path) {
                Ok(parts) => parts,
                Err(err) => {
                    error!(action = %op.action, path = %op.path, error = %err, "invalid path in repo op");
                    outcome.dropped = Some(DropReason::MalformedPath);
                    return Ok(outcome);
                }
            };

            if !self.filter.matches(collection.as_str()) {
                outcome.filtered += 1;
                continue;
            }

            let mut envelope = Envelope {
                seq: evt.seq,
                rev: evt.rev.clone(),
                time: evt.time.clone(),
                collection: collection.to_string(),
                rkey: rkey.to_string(),
                action: op.action.to_string(),
                cid: None,
                record: None,
            };

            match &op.action {
                Action::Create | Action::Update => {
                    let resolved = match verify_record(archive.as_ref(), op, &collection, &rkey) {
                        Ok(resolved) => resolved,
                        Err(err) => {
                            error!(action = %op.action, %collection, %rkey, error = %err, "record failed resolution or CID check");
                            outcome.skipped += 1;
                            continue;
                        }
                    };
                    let record = match self.records.decode_record(&resolved.bytes) {
                        Ok(record) => record,
                        Err(err) => {
                            warn!(action = %op.action, %collection, %rkey, error = %err, "failed to parse record CBOR");
                            outcome.skipped += 1;
                            continue;
                        }
                    };
                    envelope.cid = Some(resolved.cid.to_string());
                    envelope.record = Some(record);
                }
                Action::Delete => {}
                Action::Other(kind) => {
                    error!(action = %kind, %collection, %rkey, "unexpected record op kind");
                    outcome.skipped += 1;
                    continue;
                }
            }

            self.sink.deliver(&envelope.to_json()?).await?;
            outcome.emitted += 1;
        }

        Ok(outcome)
    }
}

/// Resolve the op's record and check it against the declared CID.
fn verify_record(
    archive: &dyn RepoArchive,
    op: &RepoOp,
    collection: &Nsid,
    rkey: &RecordKey,
) -> Result<ResolvedRecord, RecordError> {
    let resolved = archive.get_record(collection, rkey)?;
    match &op.cid {
        None => Err(RecordError::MissingDeclaredCid {
            actual: resolved.cid.to_string(),
        }),
        Some(declared) if *declared != resolved.cid => Err(RecordError::HashMismatch {
            declared: declared.to_string(),
            actual: resolved.cid.to_string(),
        }),
        Some(_) => Ok(resolved),
    }
}

#[async_trait]
impl CommitHandler for CommitProcessor {
    async fn handle_commit(&self, event: &CommitEvent) -> Result<(), DeliveryError> {
        self.process(event).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::Cid;
    use crate::error::ArchiveError;
    use crate::sink::MemorySink;
    use bytes::Bytes;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    // ─── Fakes ────────────────────────────────────────────────────────────────

    /// Archive keyed directly by path; the "actual" CID is whatever we store.
    struct FakeArchive(HashMap<String, ResolvedRecord>);

    impl RepoArchive for FakeArchive {
        fn get_record(&self, c: &Nsid, k: &RecordKey) -> Result<ResolvedRecord, RecordError> {
            let key = format!("{c}/{k}");
            self.0.get(&key).cloned().ok_or(RecordError::NotFound { key })
        }

        fn block_count(&self) -> usize {
            self.0.len()
        }
    }

    struct FakeArchives(HashMap<String, ResolvedRecord>);

    impl ArchiveDecoder for FakeArchives {
        fn decode_archive(&self, blocks: &Bytes) -> Result<Box<dyn RepoArchive>, ArchiveError> {
            if blocks.as_ref() == b"corrupt" {
                return Err(ArchiveError::MissingRoot);
            }
            Ok(Box::new(FakeArchive(self.0.clone())))
        }
    }

    /// Records are JSON text in the fake world.
    struct JsonRecords;

    impl RecordDecoder for JsonRecords {
        fn decode_record(&self, bytes: &[u8]) -> Result<Value, RecordError> {
            serde_json::from_slice(bytes).map_err(|e| RecordError::malformed(e.to_string()))
        }
    }

    fn stored(json: &str) -> (ResolvedRecord, Cid) {
        let cid = Cid::dag_cbor(json.as_bytes());
        (
            ResolvedRecord {
                cid: cid.clone(),
                bytes: Bytes::copy_from_slice(json.as_bytes()),
            },
            cid,
        )
    }

    fn event(ops: Vec<RepoOp>) -> CommitEvent {
        CommitEvent {
            seq: 42,
            repo: "did:plc:alice".into(),
            rev: "3kabc".into(),
            time: "2024-05-01T12:00:00.000Z".into(),
            too_big: false,
            ops,
            blocks: Bytes::from_static(b"ok"),
        }
    }

    fn op(action: &str, path: &str, cid: Option<Cid>) -> RepoOp {
        RepoOp {
            action: Action::from(action),
            path: path.into(),
            cid,
        }
    }

    struct Harness {
        sink: Arc<MemorySink>,
        processor: CommitProcessor,
        cids: HashMap<String, Cid>,
    }

    fn harness(filter: &str, records: &[(&str, &str)]) -> Harness {
        let mut map = HashMap::new();
        let mut cids = HashMap::new();
        for (path, json) in records {
            let (rec, cid) = stored(json);
            map.insert(path.to_string(), rec);
            cids.insert(path.to_string(), cid);
        }
        let sink = Arc::new(MemorySink::new());
        let config = ProcessorConfig {
            collection_filter: filter.into(),
            highlight: None,
        };
        let processor = CommitProcessor::with_codecs(
            &config,
            Arc::new(FakeArchives(map)),
            Arc::new(JsonRecords),
            sink.clone(),
        );
        Harness { sink, processor, cids }
    }

    // ─── Tests ────────────────────────────────────────────────────────────────

    #[test]
    fn empty_filter_matches_everything() {
        let f = CollectionFilter::new("");
        assert!(f.matches("app.example.post"));
        assert!(f.matches("anything.at.all"));
        let f = CollectionFilter::new("app.example.post");
        assert!(f.matches("app.example.post"));
        assert!(!f.matches("app.example.postx"));
    }

    #[tokio::test]
    async fn create_emits_full_envelope() {
        let h = harness("", &[("app.example.post/abc123", r#"{"text":"hi"}"#)]);
        let cid = h.cids["app.example.post/abc123"].clone();
        let outcome = h
            .processor
            .process(&event(vec![op("create", "app.example.post/abc123", Some(cid.clone()))]))
            .await
            .unwrap();

        assert_eq!(outcome.emitted, 1);
        assert_eq!(
            h.sink.json(),
            vec![json!({
                "seq": 42, "rev": "3kabc", "time": "2024-05-01T12:00:00.000Z",
                "collection": "app.example.post", "rkey": "abc123", "action": "create",
                "cid": cid.to_string(), "record": {"text": "hi"}
            })]
        );
    }

    #[tokio::test]
    async fn mismatch_skips_only_that_op() {
        let h = harness(
            "",
            &[
                ("app.example.post/a", r#"{"n":1}"#),
                ("app.example.post/b", r#"{"n":2}"#),
            ],
        );
        let wrong = Cid::dag_cbor(b"something else");
        let good = h.cids["app.example.post/b"].clone();
        let outcome = h
            .processor
            .process(&event(vec![
                op("create", "app.example.post/a", Some(wrong)),
                op("update", "app.example.post/b", Some(good)),
            ]))
            .await
            .unwrap();

        assert_eq!(outcome.emitted, 1);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(h.sink.json()[0]["rkey"], "b");
        assert_eq!(h.sink.json()[0]["action"], "update");
    }

    #[tokio::test]
    async fn missing_declared_cid_skips_op() {
        let h = harness("", &[("app.example.post/a", r#"{"n":1}"#)]);
        let outcome = h
            .processor
            .process(&event(vec![op("create", "app.example.post/a", None)]))
            .await
            .unwrap();
        assert_eq!(outcome.emitted, 0);
        assert_eq!(outcome.skipped, 1);
    }

    #[tokio::test]
    async fn lookup_miss_and_bad_record_are_operation_local() {
        let h = harness("", &[("app.example.post/bad", "not json")]);
        let bad = h.cids["app.example.post/bad"].clone();
        let outcome = h
            .processor
            .process(&event(vec![
                op("create", "app.example.post/missing", Some(Cid::dag_cbor(b"?"))),
                op("create", "app.example.post/bad", Some(bad)),
                op("delete", "app.example.post/gone", None),
            ]))
            .await
            .unwrap();
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.emitted, 1);
        assert_eq!(h.sink.json()[0]["action"], "delete");
    }

    #[tokio::test]
    async fn filter_applies_before_resolution() {
        let h = harness("app.example.other", &[]);
        let outcome = h
            .processor
            .process(&event(vec![
                // Would be a lookup miss if it got that far.
                op("create", "app.example.post/abc123", Some(Cid::dag_cbor(b"x"))),
                op("delete", "app.example.post/xyz", None),
            ]))
            .await
            .unwrap();
        assert_eq!(outcome.filtered, 2);
        assert_eq!(outcome.skipped, 0);
        assert!(h.sink.is_empty());
    }

    #[tokio::test]
    async fn malformed_path_drops_remainder_of_event() {
        let h = harness("", &[]);
        let outcome = h
            .processor
            .process(&event(vec![
                op("delete", "app.example.post/one", None),
                op("delete", "not-a-path", None),
                op("delete", "app.example.post/two", None),
            ]))
            .await
            .unwrap();
        assert_eq!(outcome.emitted, 1);
        assert_eq!(outcome.dropped, Some(DropReason::MalformedPath));
        assert_eq!(h.sink.len(), 1);
    }

    #[tokio::test]
    async fn unknown_action_is_skipped_and_processing_continues() {
        let h = harness("", &[]);
        let outcome = h
            .processor
            .process(&event(vec![
                op("archive", "app.example.post/one", None),
                op("delete", "app.example.post/two", None),
            ]))
            .await
            .unwrap();
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.emitted, 1);
        assert_eq!(outcome.dropped, None);
    }

    /// Counts WARN events seen while installed as the thread default.
    #[derive(Clone, Default)]
    struct WarnCounter(Arc<AtomicU64>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[tokio::test]
    async fn too_big_event_logs_one_warning_and_delivers_nothing() {
        use tracing_subscriber::layer::SubscriberExt;

        let warnings = WarnCounter::default();
        let subscriber = tracing_subscriber::registry().with(warnings.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let h = harness("", &[]);
        let mut big = event(vec![
            op("create", "app.example.post/one", None),
            op("delete", "app.example.post/two", None),
        ]);
        big.too_big = true;
        let outcome = h.processor.process(&big).await.unwrap();

        assert_eq!(outcome.dropped, Some(DropReason::TooBig));
        assert_eq!(outcome.emitted, 0);
        assert!(h.sink.is_empty());
        assert_eq!(warnings.0.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn too_big_and_corrupt_archives_drop_event() {
        let h = harness("", &[]);
        let mut big = event(vec![op("delete", "app.example.post/one", None)]);
        big.too_big = true;
        let outcome = h.processor.process(&big).await.unwrap();
        assert_eq!(outcome.dropped, Some(DropReason::TooBig));

        let mut corrupt = event(vec![op("delete", "app.example.post/one", None)]);
        corrupt.blocks = Bytes::from_static(b"corrupt");
        let outcome = h.processor.process(&corrupt).await.unwrap();
        assert_eq!(outcome.dropped, Some(DropReason::Archive));

        assert!(h.sink.is_empty());
        assert_eq!(h.processor.stats().events_dropped, 2);
    }

    #[tokio::test]
    async fn delivery_failure_aborts_event() {
        let h = harness("", &[]);
        h.sink.set_failure(Some("queue unavailable"));
        let result = h
            .processor
            .process(&event(vec![
                op("delete", "app.example.post/one", None),
                op("delete", "app.example.post/two", None),
            ]))
            .await;
        assert!(matches!(result, Err(DeliveryError::Unavailable { .. })));
        assert!(h.sink.is_empty());
        assert_eq!(h.processor.stats().events, 0);
    }

    #[tokio::test]
    async fn handler_impl_delegates_to_process() {
        let h = harness("", &[]);
        h.processor
            .handle_commit(&event(vec![op("delete", "app.example.post/one", None)]))
            .await
            .unwrap();
        assert_eq!(h.sink.len(), 1);
        assert_eq!(h.processor.stats().envelopes, 1);
    }

    // ─── Real CAR archives ────────────────────────────────────────────────────

    mod car_archives {
        use super::*;
        use crate::testkit::{RecordValue, RepoBuilder};

        fn processor(filter: &str) -> (Arc<MemorySink>, CommitProcessor) {
            let sink = Arc::new(MemorySink::new());
            let config = ProcessorConfig {
                collection_filter: filter.into(),
                highlight: Some("app.example".into()),
            };
            (sink.clone(), CommitProcessor::new(&config, sink))
        }

        #[tokio::test]
        async fn create_and_delete_through_car_archive() {
            let repo = RepoBuilder::new("did:plc:alice", "3kabc")
                .record("app.example.post/abc123", RecordValue::text_post("hello"))
                .build();
            let mut evt = event(vec![
                op("create", "app.example.post/abc123", Some(repo.cid_of("app.example.post/abc123"))),
                op("delete", "app.example.post/old", None),
            ]);
            evt.blocks = repo.car.clone();

            let (sink, processor) = processor("app.example.post");
            let outcome = processor.process(&evt).await.unwrap();

            assert_eq!(outcome.emitted, 2);
            let out = sink.json();
            assert_eq!(out[0]["record"], json!({"text": "hello"}));
            assert_eq!(out[0]["cid"], repo.cid_of("app.example.post/abc123").to_string());
            assert_eq!(out[1]["action"], "delete");
            assert!(out[1].get("record").is_none());
        }

        #[tokio::test]
        async fn envelope_record_matches_decoded_block() {
            use crate::record::decode_dag_cbor;
            use minicbor::data::Tag;
            use minicbor::Encoder;

            let image = Cid::dag_cbor(b"image blob");
            let mut enc = Encoder::new(Vec::new());
            enc.map(4).unwrap();
            enc.str("$type").unwrap().str("app.example.post").unwrap();
            enc.str("text").unwrap().str("nested").unwrap();
            enc.str("embed").unwrap().map(2).unwrap();
            enc.str("image").unwrap().map(2).unwrap();
            enc.str("ref").unwrap();
            enc.tag(Tag::new(42)).unwrap().bytes(&image.to_link_bytes()).unwrap();
            enc.str("size").unwrap().u64(1024).unwrap();
            enc.str("alt").unwrap().bytes(&[0xca, 0xfe, 0xba, 0xbe]).unwrap();
            enc.str("langs").unwrap().array(2).unwrap();
            enc.str("en").unwrap();
            enc.map(1).unwrap().str("n").unwrap().i64(-3).unwrap();

            let path = "app.example.post/nested";
            let repo = RepoBuilder::new("did:plc:alice", "3kabc")
                .record(path, RecordValue::raw(enc.into_writer()))
                .build();
            let mut evt = event(vec![op("create", path, Some(repo.cid_of(path)))]);
            evt.blocks = repo.car.clone();

            let (sink, processor) = processor("");
            processor.process(&evt).await.unwrap();

            let out = sink.json();
            let record = &out[0]["record"];
            assert_eq!(*record, decode_dag_cbor(repo.bytes_of(path)).unwrap());
            assert_eq!(record["embed"]["image"]["ref"]["$link"], image.to_string());
            assert_eq!(record["embed"]["alt"]["$bytes"], "yv66vg");
            assert_eq!(record["langs"][1]["n"], -3);
        }

        #[tokio::test]
        async fn tampered_block_is_skipped() {
            let repo = RepoBuilder::new("did:plc:alice", "3kabc")
                .record("app.example.post/a", RecordValue::text_post("real"))
                .record("app.example.post/b", RecordValue::text_post("fine"))
                .tamper("app.example.post/a", RecordValue::text_post("forged"))
                .build();
            let mut evt = event(vec![
                op("create", "app.example.post/a", Some(repo.cid_of("app.example.post/a"))),
                op("create", "app.example.post/b", Some(repo.cid_of("app.example.post/b"))),
            ]);
            evt.blocks = repo.car.clone();

            let (sink, processor) = processor("");
            let outcome = processor.process(&evt).await.unwrap();
            assert_eq!(outcome.skipped, 1);
            assert_eq!(sink.json()[0]["record"]["text"], "fine");
        }

        #[tokio::test]
        async fn invalid_record_cbor_is_skipped() {
            let repo = RepoBuilder::new("did:plc:alice", "3kabc")
                .record("app.example.post/a", RecordValue::raw(vec![0xf9, 0x3c, 0x00]))
                .build();
            let mut evt = event(vec![op(
                "create",
                "app.example.post/a",
                Some(repo.cid_of("app.example.post/a")),
            )]);
            evt.blocks = repo.car.clone();

            let (sink, processor) = processor("");
            let outcome = processor.process(&evt).await.unwrap();
            assert_eq!(outcome.skipped, 1);
            assert!(sink.is_empty());
        }

        #[tokio::test]
        async fn archive_without_commit_drops_event() {
            let repo = RepoBuilder::new("did:plc:alice", "3kabc")
                .record("app.example.post/a", RecordValue::text_post("x"))
                .omit_commit()
                .build();
            let mut evt = event(vec![op("delete", "app.example.post/a", None)]);
            evt.blocks = repo.car.clone();

            let (sink, processor) = processor("");
            let outcome = processor.process(&evt).await.unwrap();
            assert_eq!(outcome.dropped, Some(DropReason::Archive));
            assert!(sink.is_empty());
        }
    }
}
