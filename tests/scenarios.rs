//! End-to-end scenarios exercising the runtime, voting, and session
//! layers together, the way a host application would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use caxton::agent::{Agent, AgentName};
use caxton::config::RuntimeConfig;
use caxton::error::CaxtonError;
use caxton::message::Message;
use caxton::orchestration::{ensemble, EnsembleOptions};
use caxton::runtime::Runtime;
use caxton::session::{CreateOptions, SessionManager};
use caxton::storage::file::FileStorageBackend;
use caxton::storage::StorageBackend;
use caxton::voting::{vote, Ballot, VotingStrategy};

fn name(n: &str) -> AgentName {
    AgentName::try_new(n.to_string()).unwrap()
}

struct OrderRecordingAgent {
    name: AgentName,
    order: Arc<Mutex<Vec<String>>>,
    ready: AtomicBool,
}

impl OrderRecordingAgent {
    fn new(n: &str, order: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name: name(n),
            order,
            ready: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Agent for OrderRecordingAgent {
    fn name(&self) -> &AgentName {
        &self.name
    }

    fn role(&self) -> &str {
        "recorder"
    }

    fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn start(&self) -> Result<(), CaxtonError> {
        self.order.lock().unwrap().push(self.name.to_string());
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn execute(&self, input: Message) -> Result<Message, CaxtonError> {
        Ok(input)
    }

    async fn stop(&self) -> Result<(), CaxtonError> {
        Ok(())
    }
}

/// Scenario 1: phased startup diamond. a has no deps, b and c depend on
/// a, d depends on both; every agent in a level must start before the
/// next level is attempted (levels themselves run concurrently, so we
/// only assert that a precedes b/c and b/c precede d, not a total order).
#[tokio::test]
async fn phased_startup_respects_the_diamond() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let runtime = Runtime::new(RuntimeConfig::default());
    for agent_name in ["a", "b", "c", "d"] {
        runtime
            .register(OrderRecordingAgent::new(agent_name, order.clone()))
            .unwrap();
    }

    let mut deps = HashMap::new();
    deps.insert(name("a"), vec![]);
    deps.insert(name("b"), vec![name("a")]);
    deps.insert(name("c"), vec![name("a")]);
    deps.insert(name("d"), vec![name("b"), name("c")]);

    runtime.start_agents_phased(&deps).await.unwrap();

    let order = order.lock().unwrap().clone();
    let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
    assert!(pos("a") < pos("b"));
    assert!(pos("a") < pos("c"));
    assert!(pos("b") < pos("d"));
    assert!(pos("c") < pos("d"));
}

/// Scenario 2: channel backpressure. With a buffer of 2 and nobody
/// draining, the first two sends succeed immediately and the third times
/// out; the first two are still observable, in order, once drained.
#[tokio::test]
async fn send_times_out_once_the_mailbox_is_saturated() {
    let config = RuntimeConfig {
        channel_buffer_size: 2,
        send_timeout: Duration::from_millis(100),
        ..RuntimeConfig::default()
    };
    let runtime = Runtime::new(config);
    let order = Arc::new(Mutex::new(Vec::new()));
    runtime
        .register(OrderRecordingAgent::new("slow", order))
        .unwrap();
    runtime.start().await.unwrap();

    let target = name("slow");
    runtime
        .send(&target, Message::new("req", "one"))
        .await
        .unwrap();
    runtime
        .send(&target, Message::new("req", "two"))
        .await
        .unwrap();

    let third = runtime.send(&target, Message::new("req", "three")).await;
    assert!(matches!(third, Err(CaxtonError::Timeout(_))));

    let mut receiver = runtime.recv(&target).await.unwrap();
    assert_eq!(receiver.recv().await.unwrap().payload, "one");
    assert_eq!(receiver.recv().await.unwrap().payload, "two");
}

fn ballot(voter: &str, payload: &str, confidence: f64) -> Ballot {
    Ballot::with_confidence(voter, Message::new("answer", payload), confidence)
}

/// Scenario 3: majority vote with a tie, plus weighted and confidence
/// agreeing on the same winner and unanimous failing outright.
#[test]
fn majority_weighted_and_confidence_agree_on_the_tied_winner() {
    let ballots = vec![
        ballot("a", "Option A", 0.8),
        ballot("b", "Option A", 0.9),
        ballot("c", "Option B", 0.7),
        ballot("d", "Option B", 0.6),
    ];

    let majority = vote(&ballots, &VotingStrategy::Majority).unwrap();
    assert_eq!(majority.winner.payload, "Option A");

    let mut weights = HashMap::new();
    weights.insert("a".to_string(), 0.9);
    weights.insert("b".to_string(), 0.8);
    weights.insert("c".to_string(), 0.7);
    weights.insert("d".to_string(), 0.6);
    let weighted = vote(&ballots, &VotingStrategy::Weighted(weights)).unwrap();
    assert_eq!(weighted.winner.payload, "Option A");

    let confidence = vote(&ballots, &VotingStrategy::HighestConfidence).unwrap();
    assert_eq!(confidence.winner.payload, "Option A");

    let unanimous = vote(&ballots, &VotingStrategy::Unanimous);
    assert!(unanimous.is_err());
}

/// Scenario 4: session restore yields exactly the prefix recorded at
/// checkpoint time, and is idempotent.
#[tokio::test]
async fn session_restore_truncates_the_active_view_to_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let backend: Arc<dyn StorageBackend> = Arc::new(FileStorageBackend::new(dir.path()));
    let manager = SessionManager::new(backend);
    let agent = name("scribe");
    let session = manager
        .create(&agent, CreateOptions::default())
        .await
        .unwrap();

    session
        .append_message(Message::new("m", "m1"))
        .await
        .unwrap();
    session
        .append_message(Message::new("m", "m2"))
        .await
        .unwrap();
    let checkpoint = session.checkpoint().await.unwrap();
    session
        .append_message(Message::new("m", "m3"))
        .await
        .unwrap();
    session
        .append_message(Message::new("m", "m4"))
        .await
        .unwrap();

    let before_restore = session.get_messages().await.unwrap();
    assert_eq!(before_restore.len(), 4);

    session.restore(&checkpoint.id).await.unwrap();
    let after_restore = session.get_messages().await.unwrap();
    assert_eq!(
        after_restore.iter().map(|m| m.payload.as_str()).collect::<Vec<_>>(),
        vec!["m1", "m2"]
    );

    session
        .append_message(Message::new("m", "m5"))
        .await
        .unwrap();
    let after_append = session.get_messages().await.unwrap();
    assert_eq!(
        after_append.iter().map(|m| m.payload.as_str()).collect::<Vec<_>>(),
        vec!["m1", "m2", "m5"]
    );
}

/// Scenario 5: a fresh manager over the same backend picks up sessions
/// created by an earlier (now-closed) manager.
#[tokio::test]
async fn a_new_manager_resumes_sessions_from_the_same_backend() {
    let dir = tempfile::tempdir().unwrap();
    let agent = name("scribe");

    let first_backend: Arc<dyn StorageBackend> = Arc::new(FileStorageBackend::new(dir.path()));
    let first_manager = SessionManager::new(first_backend);
    let session = first_manager
        .create(
            &agent,
            CreateOptions {
                user_id: Some("u1".to_string()),
            },
        )
        .await
        .unwrap();
    let session_id = session.id().to_string();
    session
        .append_message(Message::new("m", "m1"))
        .await
        .unwrap();
    first_manager.close().await.unwrap();

    let second_backend: Arc<dyn StorageBackend> = Arc::new(FileStorageBackend::new(dir.path()));
    let second_manager = SessionManager::new(second_backend);
    let resumed = second_manager.get(&agent, &session_id).await.unwrap();
    let messages = resumed.get_messages().await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].payload, "m1");
}

struct FixedAnswerAgent {
    name: AgentName,
    answer: &'static str,
}

impl FixedAnswerAgent {
    fn new(n: &str, answer: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name: name(n),
            answer,
        })
    }
}

#[async_trait]
impl Agent for FixedAnswerAgent {
    fn name(&self) -> &AgentName {
        &self.name
    }

    fn role(&self) -> &str {
        "voter"
    }

    fn ready(&self) -> bool {
        true
    }

    async fn start(&self) -> Result<(), CaxtonError> {
        Ok(())
    }

    async fn execute(&self, _input: Message) -> Result<Message, CaxtonError> {
        Ok(Message::new("answer", self.answer))
    }

    async fn stop(&self) -> Result<(), CaxtonError> {
        Ok(())
    }
}

/// Scenario 6: an ensemble whose participants split 2-1 fails a 0.7
/// agreement threshold, gating the workflow before any downstream step.
#[tokio::test]
async fn ensemble_below_threshold_returns_a_validation_gate() {
    let runtime = Runtime::new(RuntimeConfig::default());
    runtime.register(FixedAnswerAgent::new("p1", "A")).unwrap();
    runtime.register(FixedAnswerAgent::new("p2", "A")).unwrap();
    runtime.register(FixedAnswerAgent::new("p3", "B")).unwrap();
    runtime.start().await.unwrap();

    let targets = vec![name("p1"), name("p2"), name("p3")];
    let options = EnsembleOptions {
        voting_strategy: VotingStrategy::Majority,
        agreement_threshold: 0.7,
    };
    let err = ensemble::call(
        "gate",
        &runtime,
        &targets,
        Message::new("req", "classify this"),
        options,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CaxtonError::ValidationGate { agreement, threshold }
        if (agreement - 2.0 / 3.0).abs() < 1e-9 && threshold == 0.7));
}

/// Scenario 8: path traversal attempts in a session or checkpoint id are
/// rejected before touching the backend's storage.
#[tokio::test]
async fn path_traversal_components_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FileStorageBackend::new(dir.path());
    let agent = AgentName::try_new("scribe".to_string()).unwrap();

    let err = backend
        .load_session(&agent, "../../passwd")
        .await
        .unwrap_err();
    assert!(matches!(err, caxton::storage::StorageError::InvalidPathComponent(_)));

    let checkpoint = caxton::storage::Checkpoint {
        id: "../../passwd".to_string(),
        session_id: "s1".to_string(),
        timestamp: chrono::Utc::now(),
        entry_id: "e1".to_string(),
        checksum: "abc".to_string(),
        metadata: None,
    };
    let err = backend
        .save_checkpoint(&agent, &checkpoint)
        .await
        .unwrap_err();
    assert!(matches!(err, caxton::storage::StorageError::InvalidPathComponent(_)));
}
