//! Engine tests against a scripted event source.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use repostream_core::event::{Action, CommitEvent, RepoOp};
use repostream_core::processor::{CommitProcessor, ProcessorConfig};
use repostream_core::sink::MemorySink;
use repostream_core::testkit::{RecordValue, RepoBuilder};
use repostream_stream::{
    DeliveryFailurePolicy, EngineState, EventSource, MemoryCursorStore, MessageStream,
    StreamConfig, StreamEngine, StreamError, StreamMessage,
};

// ─── Scripted source ──────────────────────────────────────────────────────────

enum Script {
    /// Yield these items, then keep the connection open.
    Open(Vec<Result<StreamMessage, StreamError>>),
    /// Yield these items, then end the stream.
    Close(Vec<Result<StreamMessage, StreamError>>),
    Refuse,
}

struct ScriptedSource {
    scripts: Mutex<VecDeque<Script>>,
    cursors: Mutex<Vec<Option<i64>>>,
}

impl ScriptedSource {
    fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            cursors: Mutex::new(Vec::new()),
        }
    }

    fn cursors(&self) -> Vec<Option<i64>> {
        self.cursors.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    fn endpoint(&self) -> &str {
        "scripted://relay"
    }

    async fn subscribe(&self, cursor: Option<i64>) -> Result<MessageStream, StreamError> {
        self.cursors.lock().unwrap().push(cursor);
        let refused = || StreamError::ConnectionFailed {
            url: "scripted://relay".into(),
            reason: "refused".into(),
        };
        match self.scripts.lock().unwrap().pop_front() {
            Some(Script::Open(items)) => Ok(stream::iter(items).chain(stream::pending()).boxed()),
            Some(Script::Close(items)) => Ok(stream::iter(items).boxed()),
            Some(Script::Refuse) | None => Err(refused()),
        }
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn commit(repo: &str, seq: i64, rkey: &str) -> StreamMessage {
    let path = format!("app.example.post/{rkey}");
    let built = RepoBuilder::new(repo, format!("rev{seq}"))
        .record(path.clone(), RecordValue::text_post(&format!("post {seq}")))
        .build();
    StreamMessage::Commit(CommitEvent {
        seq,
        repo: repo.into(),
        rev: format!("rev{seq}"),
        time: "2024-05-01T12:00:00.000Z".into(),
        too_big: false,
        ops: vec![RepoOp {
            action: Action::Create,
            cid: Some(built.cid_of(&path)),
            path,
        }],
        blocks: built.car,
    })
}

fn config() -> StreamConfig {
    StreamConfig {
        max_concurrency: 4,
        max_reconnects: 3,
        backoff_ms: 1,
        checkpoint_interval_secs: 3600,
        ..StreamConfig::for_relay("wss://relay.test")
    }
}

struct Rig {
    sink: Arc<MemorySink>,
    source: Arc<ScriptedSource>,
    store: Arc<MemoryCursorStore>,
    engine: Arc<StreamEngine>,
}

fn rig(config: StreamConfig, scripts: Vec<Script>) -> Rig {
    let sink = Arc::new(MemorySink::new());
    let processor = Arc::new(CommitProcessor::new(&ProcessorConfig::default(), sink.clone()));
    let source = Arc::new(ScriptedSource::new(scripts));
    let store = Arc::new(MemoryCursorStore::new());
    let engine = StreamEngine::new(config, source.clone(), processor).with_cursor_store(store.clone());
    Rig {
        sink,
        source,
        store,
        engine: Arc::new(engine),
    }
}

async fn wait_for(sink: &MemorySink, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while sink.len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for deliveries");
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn delivers_in_repo_order_and_checkpoints_on_shutdown() {
    let items = vec![
        Ok(commit("did:plc:a", 1, "a1")),
        Ok(commit("did:plc:b", 2, "b1")),
        Ok(commit("did:plc:a", 3, "a2")),
        Ok(StreamMessage::Other { kind: "#identity".into(), seq: Some(4) }),
        Ok(commit("did:plc:a", 5, "a3")),
        Ok(commit("did:plc:b", 6, "b2")),
    ];
    let r = rig(config(), vec![Script::Open(items)]);
    let shutdown = CancellationToken::new();

    let engine = r.engine.clone();
    let token = shutdown.clone();
    let run = tokio::spawn(async move { engine.run(Some(0), token).await });

    wait_for(&r.sink, 5).await;
    shutdown.cancel();
    let summary = run.await.unwrap().unwrap();

    assert_eq!(summary.last_seq, Some(6));
    assert_eq!(summary.cursor, Some(6));
    assert_eq!(r.store.cursor(), Some(6));
    assert_eq!(r.engine.state(), EngineState::Stopped);

    let out = r.sink.json();
    let rkeys_a: Vec<_> = out
        .iter()
        .filter_map(|e| e["rkey"].as_str())
        .filter(|rkey| rkey.starts_with('a'))
        .collect();
    assert_eq!(rkeys_a, vec!["a1", "a2", "a3"]);
    assert!(out.iter().all(|e| e["collection"] == "app.example.post" && e["action"] == "create"));
}

#[tokio::test]
async fn reconnects_from_last_received_seq() {
    let r = rig(
        config(),
        vec![
            Script::Close(vec![Ok(commit("did:plc:a", 10, "x")), Ok(commit("did:plc:b", 11, "y"))]),
            Script::Refuse,
            Script::Open(vec![Ok(commit("did:plc:a", 12, "z"))]),
        ],
    );
    let shutdown = CancellationToken::new();
    let engine = r.engine.clone();
    let token = shutdown.clone();
    let run = tokio::spawn(async move { engine.run(Some(9), token).await });

    wait_for(&r.sink, 3).await;
    shutdown.cancel();
    let summary = run.await.unwrap().unwrap();

    assert_eq!(r.source.cursors(), vec![Some(9), Some(11), Some(11)]);
    assert_eq!(summary.reconnections, 1);
    assert_eq!(summary.cursor, Some(12));
}

#[tokio::test]
async fn without_a_cursor_subscribes_at_live_head() {
    let r = rig(
        config(),
        vec![
            Script::Close(vec![]),
            Script::Open(vec![Ok(commit("did:plc:a", 50, "x"))]),
        ],
    );
    let shutdown = CancellationToken::new();
    let engine = r.engine.clone();
    let token = shutdown.clone();
    let run = tokio::spawn(async move { engine.run(None, token).await });

    wait_for(&r.sink, 1).await;
    shutdown.cancel();
    run.await.unwrap().unwrap();

    // The reconnect happens before any frame, so it also starts at the head.
    assert_eq!(r.source.cursors(), vec![None, None]);
}

#[tokio::test]
async fn zero_start_cursor_means_live_head() {
    let r = rig(config(), vec![Script::Refuse]);
    r.engine.run(Some(0), CancellationToken::new()).await.unwrap_err();
    assert_eq!(r.source.cursors(), vec![None]);
}

#[tokio::test]
async fn initial_connection_failure_is_fatal() {
    let r = rig(config(), vec![Script::Refuse]);
    let err = r.engine.run(Some(0), CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, StreamError::ConnectionFailed { .. }));
    assert_eq!(r.engine.state(), EngineState::Stopped);
    assert_eq!(r.source.cursors().len(), 1);
}

#[tokio::test]
async fn gives_up_after_reconnect_budget() {
    let r = rig(
        config(),
        vec![
            Script::Close(vec![Ok(commit("did:plc:a", 1, "x"))]),
            Script::Refuse,
            Script::Refuse,
            Script::Refuse,
        ],
    );
    let err = r.engine.run(None, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, StreamError::ReconnectsExhausted { attempts: 3 }));
    assert_eq!(r.sink.len(), 1);
    assert_eq!(r.store.cursor(), Some(1));
}

#[tokio::test]
async fn remote_error_frame_stops_the_stream() {
    let r = rig(
        config(),
        vec![Script::Open(vec![
            Ok(commit("did:plc:a", 1, "x")),
            Ok(StreamMessage::Error {
                error: "ConsumerTooSlow".into(),
                message: "bye".into(),
            }),
        ])],
    );
    let err = r.engine.run(Some(0), CancellationToken::new()).await.unwrap_err();
    match err {
        StreamError::Remote { error, .. } => assert_eq!(error, "ConsumerTooSlow"),
        other => panic!("unexpected {other:?}"),
    }
    // The commit before the error frame was still finished.
    assert_eq!(r.sink.len(), 1);
}

#[tokio::test]
async fn abort_policy_fails_run_and_holds_cursor() {
    let r = rig(
        config(),
        vec![Script::Open(vec![Ok(commit("did:plc:a", 20, "x"))])],
    );
    r.sink.set_failure(Some("queue unavailable"));

    let err = r.engine.run(Some(0), CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, StreamError::DeliveryFailed { seq: 20, .. }));
    assert_eq!(r.store.cursor(), Some(19));
}

#[tokio::test]
async fn skip_policy_keeps_streaming() {
    let cfg = StreamConfig {
        on_delivery_error: DeliveryFailurePolicy::Skip,
        ..config()
    };
    let r = rig(
        cfg,
        vec![Script::Open(vec![
            Ok(commit("did:plc:a", 30, "x")),
            Ok(commit("did:plc:b", 31, "y")),
        ])],
    );
    r.sink.set_failure(Some("queue unavailable"));

    let shutdown = CancellationToken::new();
    let engine = r.engine.clone();
    let token = shutdown.clone();
    let run = tokio::spawn(async move { engine.run(Some(0), token).await });

    let mut state = r.engine.subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == EngineState::Streaming))
        .await
        .unwrap()
        .unwrap();
    // Both commits are read and dispatched right after the subscription opens.
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();
    let summary = run.await.unwrap().unwrap();

    assert_eq!(summary.dispatch.delivery_failures, 2);
    assert_eq!(summary.cursor, Some(31));
    assert!(r.sink.is_empty());
}
