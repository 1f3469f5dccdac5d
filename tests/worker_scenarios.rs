//! End-to-end job lifecycle scenarios against in-memory collaborators.

use std::sync::Arc;
use std::time::{Duration, Instant};

use secrecy::SecretString;

use solana_reward_relayer::app::{NotifyTarget, RewardService, RewardWorker, WorkerConfig, spawn_worker};
use solana_reward_relayer::domain::{
    ChainAdapter, JobKey, JobPatch, JobState, Notifier, RetryPolicy, RewardPayload, RewardQueue,
    SendRewardRequest,
};
use solana_reward_relayer::test_utils::{InMemoryRewardQueue, MockChainAdapter, RecordingNotifier};

const CONFIRM_URL: &str = "http://backend/api/receive-hook/confirm-transfer-nft-prize";

struct Harness {
    queue: Arc<InMemoryRewardQueue>,
    chain: Arc<MockChainAdapter>,
    notifier: Arc<RecordingNotifier>,
    service: RewardService,
}

impl Harness {
    fn new(chain: MockChainAdapter) -> Self {
        let queue = Arc::new(InMemoryRewardQueue::new());
        let chain = Arc::new(chain);
        let service = RewardService::new(
            Arc::clone(&queue) as _,
            Arc::clone(&chain) as _,
            SecretString::from("custodial-key"),
            5,
        );
        Self {
            queue,
            chain,
            notifier: Arc::new(RecordingNotifier::new()),
            service,
        }
    }

    fn worker(&self, config: WorkerConfig) -> RewardWorker {
        RewardWorker::new(
            Arc::clone(&self.queue) as Arc<dyn RewardQueue>,
            Arc::clone(&self.chain) as Arc<dyn ChainAdapter>,
            Arc::clone(&self.notifier) as Arc<dyn Notifier>,
            config,
            NotifyTarget {
                url: CONFIRM_URL.to_string(),
                chain_id: 6869,
                policy: RetryPolicy::default(),
            },
        )
    }

    async fn submit(&self, correlation_id: &str) -> String {
        self.service
            .enqueue_reward(&SendRewardRequest::new(
                "MINT1",
                "WALLET1",
                1,
                correlation_id,
            ))
            .await
            .unwrap()
    }
}

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        backoff: Duration::from_millis(1),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_successful_transfer_notifies_once() {
    let h = Harness::new(MockChainAdapter::new());
    let id = h.submit("P1").await;

    let processed = h.worker(fast_config()).process_available().await.unwrap();
    assert_eq!(processed, 1);

    let job = h.queue.get_job(JobKey::Id(&id)).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.transaction_hash.as_deref(), Some("SIG1"));
    assert!(job.notified);
    assert_eq!(job.attempt_count, 0);

    let sent = h.notifier.payloads();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["success"], true);
    assert_eq!(sent[0]["transactionHash"], "SIG1");
    assert_eq!(sent[0]["correlationId"], "P1");
    assert_eq!(sent[0]["chainId"], 6869);
    assert_eq!(sent[0]["assetType"], "TOKEN_PROGRAM_ID");
    assert_eq!(sent[0]["transferType"], "TRANSFER_NFT_PRIZE_FREE_PLAY");
    assert_eq!(h.notifier.urls(), vec![CONFIRM_URL.to_string()]);

    let transfers = h.chain.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].recipient_address, "WALLET1");
}

#[tokio::test]
async fn test_exhausted_attempts_fail_with_single_notification() {
    let h = Harness::new(MockChainAdapter::failing_times(5));
    let id = h.submit("P2").await;
    let backoff = Duration::from_millis(20);

    let started = Instant::now();
    let processed = h
        .worker(WorkerConfig {
            backoff,
            ..Default::default()
        })
        .process_available()
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(processed, 5);
    assert_eq!(h.chain.transfer_attempts(), 5);
    assert!(h.chain.transfers().is_empty());
    // Four re-queues, each preceded by the backoff
    assert!(elapsed >= backoff * 4, "elapsed {:?}", elapsed);

    let job = h.queue.get_job(JobKey::Id(&id)).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempt_count, 4);
    assert!(job.transaction_hash.is_none());
    assert!(job.last_error.unwrap().contains("mock transfer failure"));

    let sent = h.notifier.payloads();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["success"], false);
    assert!(sent[0]["transactionHash"].is_null());
    assert_eq!(sent[0]["correlationId"], "P2");
}

#[tokio::test]
async fn test_recovery_after_transient_failures() {
    let h = Harness::new(MockChainAdapter::failing_times(2));
    let id = h.submit("P3").await;

    h.worker(fast_config()).process_available().await.unwrap();

    let job = h.queue.get_job(JobKey::Id(&id)).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempt_count, 2);
    assert_eq!(job.transaction_hash.as_deref(), Some("SIG1"));

    let sent = h.notifier.payloads();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["success"], true);
}

#[tokio::test]
async fn test_transaction_hash_is_write_once() {
    let h = Harness::new(MockChainAdapter::new());
    let id = h.submit("P4").await;
    h.worker(fast_config()).process_available().await.unwrap();

    h.queue
        .update_state(&id, JobPatch::default().transaction_hash("OTHER"))
        .await
        .unwrap();

    let job = h.queue.get_job(JobKey::Id(&id)).await.unwrap().unwrap();
    assert_eq!(job.transaction_hash.as_deref(), Some("SIG1"));
}

#[tokio::test]
async fn test_concurrent_loops_process_each_job_once() {
    let h = Harness::new(MockChainAdapter::new().with_delay(Duration::from_millis(5)));
    let ids = [h.submit("A").await, h.submit("B").await, h.submit("C").await];

    let worker = Arc::new(h.worker(WorkerConfig {
        concurrency: 2,
        poll_interval: Duration::from_millis(5),
        ..fast_config()
    }));
    let (handle, shutdown_tx) = spawn_worker(worker);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let done = h
            .queue
            .jobs()
            .iter()
            .all(|job| job.state == JobState::Completed);
        if done {
            break;
        }
        assert!(Instant::now() < deadline, "jobs did not complete in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    assert_eq!(h.chain.transfers().len(), 3);
    assert_eq!(h.notifier.payloads().len(), 3);
    for id in &ids {
        let job = h.queue.get_job(JobKey::Id(id)).await.unwrap().unwrap();
        assert!(job.transaction_hash.is_some());
    }
}

#[tokio::test]
async fn test_slow_notification_is_not_duplicated_by_redelivery() {
    // The transfer plus the notification outlast the visibility timeout, but
    // the notification alone does not
    let queue = Arc::new(
        InMemoryRewardQueue::new().with_visibility_timeout(Duration::from_millis(220)),
    );
    let chain = Arc::new(MockChainAdapter::failing_times(1).with_delay(Duration::from_millis(150)));
    let notifier = Arc::new(RecordingNotifier::new().with_delay(Duration::from_millis(150)));
    let payload = RewardPayload::new(
        &SendRewardRequest::new("MINT1", "WALLET1", 1, "P9"),
        SecretString::from("custodial-key"),
    );
    // Final attempt: the first failure is terminal
    let id = queue.enqueue(&payload, 1, Some("P9")).await.unwrap();

    let build = || {
        RewardWorker::new(
            Arc::clone(&queue) as Arc<dyn RewardQueue>,
            Arc::clone(&chain) as Arc<dyn ChainAdapter>,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            WorkerConfig {
                poll_interval: Duration::from_millis(10),
                ..fast_config()
            },
            NotifyTarget {
                url: CONFIRM_URL.to_string(),
                chain_id: 6869,
                policy: RetryPolicy::default(),
            },
        )
    };
    let first = build();
    let second = Arc::new(build());

    let (processed, ()) = tokio::join!(first.process_available(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (handle, shutdown_tx) = spawn_worker(Arc::clone(&second));
        tokio::time::sleep(Duration::from_millis(450)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    });

    assert_eq!(processed.unwrap(), 1);
    assert_eq!(chain.transfer_attempts(), 1);
    let sent = notifier.payloads();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["success"], false);

    let job = queue.get_job(JobKey::Id(&id)).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(job.notified);
}

#[tokio::test]
async fn test_failed_prize_can_be_resubmitted() {
    let h = Harness::new(MockChainAdapter::failing_times(5));
    let failed_id = h.submit("P5").await;
    h.worker(fast_config()).process_available().await.unwrap();
    let failed = h.queue.get_job(JobKey::Id(&failed_id)).await.unwrap().unwrap();
    assert_eq!(failed.state, JobState::Failed);

    let retried_id = h.submit("P5").await;
    assert_ne!(retried_id, failed_id);
    // While the new job is live, the key dedupes to it
    assert_eq!(h.submit("P5").await, retried_id);

    h.worker(fast_config()).process_available().await.unwrap();
    let job = h
        .queue
        .get_job(JobKey::Idempotency("P5"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.id, retried_id);
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.transaction_hash.as_deref(), Some("SIG1"));

    let sent = h.notifier.payloads();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0]["success"], false);
    assert_eq!(sent[1]["success"], true);
}
