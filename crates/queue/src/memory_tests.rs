// SPDX-License-Identifier: MIT

use super::*;
use crate::queue::Queue;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};

struct Recorder {
    handled: Mutex<Vec<serde_json::Value>>,
    fail_first: AtomicU32,
    permanent: bool,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            handled: Mutex::new(Vec::new()),
            fail_first: AtomicU32::new(0),
            permanent: false,
        })
    }

    fn failing(times: u32, permanent: bool) -> Arc<Self> {
        Arc::new(Self {
            handled: Mutex::new(Vec::new()),
            fail_first: AtomicU32::new(times),
            permanent,
        })
    }
}

#[async_trait]
impl JobHandler for Recorder {
    async fn handle(&self, job: QueueJob) -> Result<(), JobError> {
        self.handled.lock().push(job.data.clone());
        if self.fail_first.load(Ordering::SeqCst) > 0 {
            self.fail_first.fetch_sub(1, Ordering::SeqCst);
            return if self.permanent {
                Err(JobError::Fail("bad payload".to_string()))
            } else {
                Err(JobError::Retry("flaky".to_string()))
            };
        }
        Ok(())
    }
}

async fn settled(queue: &MemoryQueue, name: &str) -> QueueSize {
    for _ in 0..200 {
        let size = queue.get_queue_size(name).await.unwrap();
        if size.active == 0 && size.waiting == 0 {
            return size;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    queue.get_queue_size(name).await.unwrap()
}

#[tokio::test]
async fn delivers_and_completes() {
    let queue = MemoryQueue::new();
    let handler = Recorder::new();
    let handle = queue
        .work("messages", WorkOptions::serial(), handler.clone())
        .await
        .unwrap();

    queue
        .send("messages", json!({"n": 1}), SendOptions::default())
        .await
        .unwrap();

    let size = settled(&queue, "messages").await;
    handle.stop().await;

    assert_eq!(size.completed, 1);
    assert_eq!(handler.handled.lock().len(), 1);
}

#[tokio::test]
async fn singleton_key_drops_duplicates() {
    let queue = MemoryQueue::new();
    queue.create_queue("messages").await.unwrap();

    let opts = || SendOptions::default().with_singleton_key("slack-T01-C01-1727.100:1727.200");
    let first = queue.send("messages", json!({"n": 1}), opts()).await.unwrap();
    let second = queue.send("messages", json!({"n": 2}), opts()).await.unwrap();

    assert!(first.is_some());
    assert!(second.is_none());
    assert_eq!(queue.payloads("messages").len(), 1);
}

#[tokio::test]
async fn distinct_singleton_keys_coexist() {
    let queue = MemoryQueue::new();
    queue.create_queue("messages").await.unwrap();

    let a = queue
        .send("messages", json!({}), SendOptions::default().with_singleton_key("k1"))
        .await
        .unwrap();
    let b = queue
        .send("messages", json!({}), SendOptions::default().with_singleton_key("k2"))
        .await
        .unwrap();
    assert!(a.is_some() && b.is_some());
}

#[tokio::test]
async fn retry_then_success() {
    let queue = MemoryQueue::new();
    let handler = Recorder::failing(1, false);

    let mut opts = WorkOptions::serial();
    opts.poll_interval = Duration::from_millis(2);
    let handle = queue.work("messages", opts, handler.clone()).await.unwrap();

    queue
        .send(
            "messages",
            json!({"n": 1}),
            SendOptions {
                retry_delay: Duration::from_millis(5),
                ..SendOptions::default()
            },
        )
        .await
        .unwrap();

    let size = settled(&queue, "messages").await;
    handle.stop().await;

    assert_eq!(size.completed, 1);
    assert_eq!(handler.handled.lock().len(), 2);
}

#[tokio::test]
async fn retry_exhaustion_fails_job() {
    let queue = MemoryQueue::new();
    let handler = Recorder::failing(10, false);

    let mut opts = WorkOptions::serial();
    opts.poll_interval = Duration::from_millis(2);
    let handle = queue.work("messages", opts, handler.clone()).await.unwrap();

    queue
        .send(
            "messages",
            json!({"n": 1}),
            SendOptions {
                retry_limit: 2,
                retry_delay: Duration::from_millis(2),
                ..SendOptions::default()
            },
        )
        .await
        .unwrap();

    let size = settled(&queue, "messages").await;
    handle.stop().await;

    assert_eq!(size.failed, 1);
    // initial delivery + 2 retries
    assert_eq!(handler.handled.lock().len(), 3);
}

#[tokio::test]
async fn permanent_failure_skips_retries() {
    let queue = MemoryQueue::new();
    let handler = Recorder::failing(10, true);

    let handle = queue
        .work("messages", WorkOptions::serial(), handler.clone())
        .await
        .unwrap();

    queue
        .send("messages", json!({"n": 1}), SendOptions::default())
        .await
        .unwrap();

    let size = settled(&queue, "messages").await;
    handle.stop().await;

    assert_eq!(size.failed, 1);
    assert_eq!(handler.handled.lock().len(), 1);
}

#[tokio::test]
async fn priority_orders_delivery() {
    let queue = MemoryQueue::new();
    queue.create_queue("q").await.unwrap();

    queue
        .send("q", json!({"which": "low"}), SendOptions::default())
        .await
        .unwrap();
    queue
        .send("q", json!({"which": "high"}), SendOptions::thread_message())
        .await
        .unwrap();

    let claimed = queue.claim("q", 2);
    assert_eq!(claimed[0].data["which"], "high");
    assert_eq!(claimed[1].data["which"], "low");
}

#[tokio::test]
async fn cancel_marks_waiting_job_failed() {
    let queue = MemoryQueue::new();
    queue.create_queue("q").await.unwrap();

    let id = queue
        .send("q", json!({}), SendOptions::default())
        .await
        .unwrap()
        .unwrap();
    queue.cancel(id).await.unwrap();

    let job = queue.get_job_by_id(id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
}

#[tokio::test]
async fn delete_queue_drops_jobs() {
    let queue = MemoryQueue::new();
    queue.create_queue("q").await.unwrap();
    let id = queue
        .send("q", json!({}), SendOptions::default())
        .await
        .unwrap()
        .unwrap();

    queue.delete_queue("q").await.unwrap();
    assert!(queue.get_job_by_id(id).await.unwrap().is_none());
}
