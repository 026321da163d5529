// SPDX-License-Identifier: MIT

use super::*;
use peerbot_agent::FakeAgent;
use peerbot_chat::{FakeChatClient, ThreadTurn};
use peerbot_cluster::FakeCluster;
use peerbot_core::test_support::request;
use peerbot_core::{FakeClock, RoutingMetadata, SessionKey};
use peerbot_queue::{JobId, JobState, MemoryQueue};
use peerbot_store::MemoryConversationStore;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

struct FakeWorkspace {
    prepares: AtomicUsize,
    pushes: AtomicUsize,
    changed: AtomicUsize,
}

impl FakeWorkspace {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            prepares: AtomicUsize::new(0),
            pushes: AtomicUsize::new(0),
            changed: AtomicUsize::new(0),
        })
    }

    fn set_changed(&self, n: usize) {
        self.changed.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Workspace for FakeWorkspace {
    fn root(&self) -> PathBuf {
        PathBuf::from("/workspace/user-alice")
    }

    async fn prepare(&self, _branch: &str) -> Result<(), crate::workspace::WorkspaceError> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn changed_files(&self) -> Result<usize, crate::workspace::WorkspaceError> {
        Ok(self.changed.load(Ordering::SeqCst))
    }

    async fn commit_and_push(
        &self,
        _branch: &str,
        _message: &str,
    ) -> Result<bool, crate::workspace::WorkspaceError> {
        let had_changes = self.changed.swap(0, Ordering::SeqCst) > 0;
        if had_changes {
            self.pushes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(had_changes)
    }
}

struct Harness {
    consumer: Arc<WorkerConsumer<FakeClock>>,
    queue: MemoryQueue,
    chat: FakeChatClient,
    conversations: MemoryConversationStore,
    cluster: FakeCluster,
    workspace: Arc<FakeWorkspace>,
    clock: FakeClock,
}

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        session_key: SessionKey::from_raw("slack-T01-C01-U01-1727.100"),
        user_id: "U01".to_string(),
        username: "user-alice".to_string(),
        channel_id: "C01".to_string(),
        thread_ts: Some("1727.100".to_string()),
        repository_url: "https://github.com/org/alice-workspace".to_string(),
        deployment_name: "worker-slack-t01-c01-u01-1727-100".to_string(),
        database_url: "postgres://u:p@db/peerbot".to_string(),
        hosting_token: "ghs_token".to_string(),
        agent_token: "agent_token".to_string(),
        exit_on_idle: Duration::from_secs(10 * 60),
        workspace_path: PathBuf::from("/workspace"),
    }
}

async fn seed_deployment(cluster: &FakeCluster) {
    let session_key = SessionKey::from_raw("slack-T01-C01-U01-1727.100");
    let spec = peerbot_cluster::WorkerSpec {
        deployment_name: "worker-slack-t01-c01-u01-1727-100".to_string(),
        session_key,
        user_id: "U01".to_string(),
        username: "user-alice".to_string(),
        channel_id: "C01".to_string(),
        thread_ts: None,
        repository_url: "https://github.com/org/alice-workspace".to_string(),
        user_secret_name: "peerbot-user-secret-user-alice".to_string(),
        created_at: "2026-01-15T10:00:00Z".to_string(),
    };
    let manifest =
        peerbot_cluster::build_deployment(&peerbot_cluster::ManifestConfig::default(), &spec);
    cluster.create_deployment(&manifest).await.unwrap();
}

async fn harness(agent: FakeAgent) -> Harness {
    let clock = FakeClock::new();
    let queue = MemoryQueue::new();
    let chat = FakeChatClient::new();
    let conversations = MemoryConversationStore::new();
    let cluster = FakeCluster::new(clock.clone());
    seed_deployment(&cluster).await;
    let workspace = FakeWorkspace::new();

    let consumer = Arc::new(
        WorkerConsumer::new(
            worker_config(),
            Arc::new(queue.clone()),
            Arc::new(chat.clone()),
            Arc::new(conversations.clone()),
            Arc::new(cluster.clone()),
            Arc::new(agent),
            workspace.clone(),
            clock.clone(),
        )
        .with_idle_check_interval(Duration::from_millis(5)),
    );

    Harness {
        consumer,
        queue,
        chat,
        conversations,
        cluster,
        workspace,
        clock,
    }
}

fn thread_job() -> QueueJob {
    let mut req = request("U01", "1727.100");
    req.routing_metadata = Some(RoutingMetadata {
        target_thread_id: "1727.100".to_string(),
        agent_session_id: None,
        user_id: "U01".to_string(),
    });
    QueueJob {
        id: JobId::new(),
        name: "thread_message_worker-slack-t01-c01-u01-1727-100".to_string(),
        data: serde_json::to_value(&req).unwrap(),
        state: JobState::Active,
        retry_count: 0,
        retry_limit: 3,
        priority: 10,
        singleton_key: None,
        created_at_ms: 0,
        start_after_ms: 0,
    }
}

fn responses(queue: &MemoryQueue) -> Vec<peerbot_core::ThreadResponse> {
    queue
        .payloads("thread_response")
        .into_iter()
        .map(|p| serde_json::from_value(p).unwrap())
        .collect()
}

#[tokio::test]
async fn successful_message_streams_and_completes() {
    let h = harness(FakeAgent::succeeding("agent-abc", "built the widget")).await;

    h.consumer.handle(thread_job()).await.unwrap();

    let responses = responses(&h.queue);
    // setup notice, streamed output, final completion
    assert!(responses.len() >= 3);
    assert_eq!(
        responses[0].content.as_deref(),
        Some("Setting up workspace\u{2026}")
    );
    assert!(!responses[0].is_done);

    let last = responses.last().unwrap();
    assert!(last.is_done);
    assert_eq!(last.content.as_deref(), Some("built the widget"));
    assert!(last.error.is_none());
    assert_eq!(last.original_message_ts.as_deref(), Some("1727.200"));

    assert_eq!(h.workspace.prepares.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn agent_session_id_is_persisted() {
    let h = harness(FakeAgent::succeeding("agent-abc", "done")).await;
    h.consumer.handle(thread_job()).await.unwrap();

    let record = h
        .conversations
        .get(&SessionKey::from_raw("slack-T01-C01-U01-1727.100"), "T01")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.agent_session_id.as_deref(), Some("agent-abc"));
}

#[tokio::test]
async fn resume_id_reaches_the_agent() {
    let agent = FakeAgent::succeeding("agent-abc", "done");
    let h = harness(agent.clone()).await;

    let mut req = request("U01", "1727.100");
    req.agent_session_id = Some("agent-prior".to_string());
    req.routing_metadata = Some(RoutingMetadata {
        target_thread_id: "1727.100".to_string(),
        agent_session_id: Some("agent-prior".to_string()),
        user_id: "U01".to_string(),
    });
    let mut job = thread_job();
    job.data = serde_json::to_value(&req).unwrap();

    h.consumer.handle(job).await.unwrap();
    assert_eq!(agent.resume_id(0).as_deref(), Some("agent-prior"));
}

#[tokio::test]
async fn agent_failure_reports_error_and_retries() {
    let h = harness(FakeAgent::failing("model exploded")).await;
    h.workspace.set_changed(2);

    let err = h.consumer.handle(thread_job()).await.unwrap_err();
    assert!(matches!(err, JobError::Retry(_)));

    let responses = responses(&h.queue);
    let last = responses.last().unwrap();
    assert!(last.error.is_some());

    // Partial work still pushed
    assert_eq!(h.workspace.pushes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn message_without_routing_fails_permanently() {
    let h = harness(FakeAgent::succeeding("agent-abc", "done")).await;
    let mut job = thread_job();
    let mut req = request("U01", "1727.100");
    req.routing_metadata = None;
    job.data = serde_json::to_value(&req).unwrap();

    let err = h.consumer.handle(job).await.unwrap_err();
    assert!(matches!(err, JobError::Fail(_)));
}

#[tokio::test]
async fn final_changes_are_pushed_on_success() {
    let h = harness(FakeAgent::succeeding("agent-abc", "done")).await;
    h.workspace.set_changed(3);

    h.consumer.handle(thread_job()).await.unwrap();
    assert_eq!(h.workspace.pushes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn heartbeat_annotation_is_patched() {
    let h = harness(FakeAgent::succeeding("agent-abc", "done")).await;
    h.clock.set_epoch_ms(5_000_000);

    h.consumer.handle(thread_job()).await.unwrap();

    let view = h
        .cluster
        .get_deployment("worker-slack-t01-c01-u01-1727-100")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        view.annotations.get("last-activity").map(String::as_str),
        Some("5000000")
    );
}

#[tokio::test]
async fn thread_context_is_forwarded_to_agent() {
    let agent = FakeAgent::succeeding("agent-abc", "done");
    let h = harness(agent.clone()).await;
    h.chat.seed_thread(
        "1727.100",
        vec![
            ThreadTurn {
                role: "user".to_string(),
                content: "earlier question".to_string(),
                timestamp: "1727.100".to_string(),
            },
            ThreadTurn {
                role: "assistant".to_string(),
                content: String::new(), // filtered: empty
                timestamp: "1727.150".to_string(),
            },
        ],
    );

    h.consumer.handle(thread_job()).await.unwrap();

    let requests = agent.requests();
    assert_eq!(requests[0].context.len(), 1);
    assert_eq!(requests[0].context[0].content, "earlier question");
    assert_eq!(requests[0].prompt, "build me a widget");
}

#[tokio::test]
async fn idle_worker_deletes_itself() {
    let h = harness(FakeAgent::succeeding("agent-abc", "done")).await;

    let run = tokio::spawn(h.consumer.clone().run());
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.clock.advance(Duration::from_secs(11 * 60));

    let exit = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(exit, WorkerExit::Idle);
    assert!(h.cluster.deployment_names().is_empty());
}

#[tokio::test]
async fn sigterm_terminates_without_deleting_deployment() {
    let h = harness(FakeAgent::succeeding("agent-abc", "done")).await;
    let token = h.consumer.shutdown_token();

    let run = tokio::spawn(h.consumer.clone().run());
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let exit = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(exit, WorkerExit::Terminated);
    assert_eq!(h.cluster.deployment_names().len(), 1);
}

#[test]
fn task_list_rendering() {
    let tasks = vec![
        TaskItem {
            title: "clone repo".to_string(),
            status: TaskStatus::Completed,
        },
        TaskItem {
            title: "write code".to_string(),
            status: TaskStatus::InProgress,
        },
        TaskItem {
            title: "run tests".to_string(),
            status: TaskStatus::Pending,
        },
    ];
    assert_eq!(
        render_task_list(&tasks),
        "*Tasks*\n[x] clone repo\n[~] write code\n[ ] run tests"
    );
}

#[tokio::test]
async fn task_list_replaces_streamed_text() {
    let agent = FakeAgent::new();
    agent.push_run(peerbot_agent::fake::FakeRun::Succeed {
        events: vec![AgentEvent::Output {
            text: "raw text".to_string(),
            task_list: Some(vec![TaskItem {
                title: "clone repo".to_string(),
                status: TaskStatus::Completed,
            }]),
        }],
        outcome: peerbot_agent::AgentOutcome {
            session_id: None,
            final_text: "done".to_string(),
        },
    });
    let h = harness(agent).await;

    h.consumer.handle(thread_job()).await.unwrap();

    let responses = responses(&h.queue);
    let streamed = responses
        .iter()
        .find(|r| r.content.as_deref().map(|c| c.starts_with("*Tasks*")).unwrap_or(false));
    assert!(streamed.is_some());
}
