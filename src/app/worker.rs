//! Background worker executing queued reward transfers.
//!
//! A claimed job moves Active → Completed once its transfer is confirmed and
//! the outcome notification was attempted. A failed transfer is re-queued
//! after a fixed backoff until the attempt budget is spent, then the job is
//! failed and a failure notification is sent.
//!
//! Every write is fenced by the claim token. The claim is renewed before the
//! notification goes out, so a worker that lost its job to redelivery stops
//! before notifying.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    AppError, BlockchainError, ChainAdapter, DatabaseError, JobPatch, JobState,
    NotificationPayload, Notifier, RetryPolicy, RewardJob, RewardQueue, TransferReceipt,
};

use super::config::NotifyTarget;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Whether the worker should be started at all
    pub enabled: bool,
    /// Number of consumer loops
    pub concurrency: usize,
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
    /// Fixed delay before a failed job is re-queued
    pub backoff: Duration,
    /// Executions per job, the first one included
    pub max_attempts: i32,
    /// Upper bound on one transfer, confirmation included
    pub rpc_timeout: Duration,
    /// Active jobs older than this are redelivered
    pub visibility_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: 1,
            poll_interval: Duration::from_secs(1),
            backoff: Duration::from_secs(2),
            max_attempts: 5,
            rpc_timeout: Duration::from_secs(90),
            visibility_timeout: Duration::from_secs(300),
        }
    }
}

/// Tries for each fenced job write
const WRITE_ATTEMPTS: u32 = 3;

impl WorkerConfig {
    /// Shortest visibility timeout under which a live claim cannot be
    /// redelivered: one transfer, the hash write retries, then one
    /// notification under `policy`.
    #[must_use]
    pub fn min_visibility_timeout(&self, policy: &RetryPolicy) -> Duration {
        self.rpc_timeout + self.backoff * WRITE_ATTEMPTS + policy.worst_case_duration()
    }
}

/// Executes reward jobs against the chain and reports outcomes
pub struct RewardWorker {
    queue: Arc<dyn RewardQueue>,
    chain: Arc<dyn ChainAdapter>,
    notifier: Arc<dyn Notifier>,
    config: WorkerConfig,
    target: NotifyTarget,
}

impl RewardWorker {
    #[must_use]
    pub fn new(
        queue: Arc<dyn RewardQueue>,
        chain: Arc<dyn ChainAdapter>,
        notifier: Arc<dyn Notifier>,
        config: WorkerConfig,
        target: NotifyTarget,
    ) -> Self {
        Self {
            queue,
            chain,
            notifier,
            config,
            target,
        }
    }

    /// Run one execution of a claimed job and return the state it was left in
    #[instrument(skip(self, job), fields(job_id = %job.id, attempt = job.attempt_count))]
    pub async fn process_job(&self, job: RewardJob) -> Result<JobState, AppError> {
        let Some(token) = job.claim_token.clone() else {
            return Err(AppError::Database(DatabaseError::ClaimLost(format!(
                "reward job {} was not claimed",
                job.id
            ))));
        };

        let transaction_hash = match &job.transaction_hash {
            Some(hash) => {
                info!(signature = %hash, "Transfer already confirmed, skipping submission");
                hash.clone()
            }
            None => match self.execute_transfer(&job).await {
                Ok(receipt) => {
                    info!(signature = %receipt.transaction_hash, "Transfer confirmed");
                    self.record_hash(&job.id, &token, &receipt.transaction_hash)
                        .await?;
                    receipt.transaction_hash
                }
                Err(e) => return self.handle_failure(&job, &token, e).await,
            },
        };

        if job.notified {
            debug!("Outcome already notified");
        } else {
            self.renew_claim(&job.id, &token).await?;
            let payload =
                NotificationPayload::success(self.target.chain_id, &job.payload, &transaction_hash);
            self.notify(&payload).await;
        }

        self.write_fenced(
            &job.id,
            JobPatch::default()
                .state(JobState::Completed)
                .transaction_hash(&transaction_hash)
                .notified(true)
                .claimed_by(&token),
        )
        .await
        .inspect_err(|e| {
            error!(
                signature = %transaction_hash,
                error = %e,
                "Confirmed transfer could not be marked completed"
            )
        })?;
        Ok(JobState::Completed)
    }

    /// Persist a confirmed signature. A storage outage does not abort the
    /// job: the signature is logged and carried by the completion write.
    async fn record_hash(&self, job_id: &str, token: &str, hash: &str) -> Result<(), AppError> {
        let patch = JobPatch::default().transaction_hash(hash).claimed_by(token);
        match self.write_fenced(job_id, patch).await {
            Ok(()) => Ok(()),
            Err(e @ AppError::Database(DatabaseError::ClaimLost(_))) => {
                error!(signature = %hash, error = %e, "Claim lost after a confirmed transfer");
                Err(e)
            }
            Err(e) => {
                error!(
                    signature = %hash,
                    error = %e,
                    "Confirmed signature could not be recorded, continuing"
                );
                Ok(())
            }
        }
    }

    /// Restart the visibility timeout before a long notification. Only a
    /// lost claim stops the job; a storage error is logged.
    async fn renew_claim(&self, job_id: &str, token: &str) -> Result<(), AppError> {
        match self.queue.extend_claim(job_id, token).await {
            Err(e @ AppError::Database(DatabaseError::ClaimLost(_))) => {
                warn!(error = %e, "Job was redelivered to another worker, stopping");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Failed to renew job claim");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Apply a fenced patch, retrying storage errors a bounded number of
    /// times. A lost claim is never retried.
    async fn write_fenced(&self, job_id: &str, patch: JobPatch) -> Result<(), AppError> {
        let mut attempt = 1;
        loop {
            match self.queue.update_state(job_id, patch.clone()).await {
                Ok(()) => return Ok(()),
                Err(e @ AppError::Database(DatabaseError::ClaimLost(_))) => return Err(e),
                Err(e) if attempt >= WRITE_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "Job update failed, retrying");
                    tokio::time::sleep(self.config.backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn execute_transfer(&self, job: &RewardJob) -> Result<TransferReceipt, AppError> {
        let payload = &job.payload;
        tokio::time::timeout(
            self.config.rpc_timeout,
            self.chain.transfer_asset(
                &payload.asset_address,
                &payload.signing_secret,
                &payload.recipient_address,
                payload.amount,
            ),
        )
        .await
        .map_err(|_| {
            AppError::Blockchain(BlockchainError::Timeout(format!(
                "transfer exceeded {}ms",
                self.config.rpc_timeout.as_millis()
            )))
        })?
    }

    async fn handle_failure(
        &self,
        job: &RewardJob,
        token: &str,
        err: AppError,
    ) -> Result<JobState, AppError> {
        let message = err.to_string();

        if job.can_retry() {
            warn!(error = %message, "Transfer failed, retrying after backoff");
            tokio::time::sleep(self.config.backoff).await;
            let attempts = self.queue.retry(&job.id, token, &message).await?;
            debug!(attempts, "Job re-queued");
            return Ok(JobState::Pending);
        }

        error!(
            error = %message,
            payload = %job.payload.diagnostic_snapshot(),
            "Transfer attempts exhausted"
        );
        if !job.notified {
            self.renew_claim(&job.id, token).await?;
            let payload = NotificationPayload::failure(self.target.chain_id, &job.payload);
            self.notify(&payload).await;
        }
        self.write_fenced(
            &job.id,
            JobPatch::default()
                .state(JobState::Failed)
                .last_error(message)
                .notified(true)
                .claimed_by(token),
        )
        .await?;
        Ok(JobState::Failed)
    }

    async fn notify(&self, payload: &NotificationPayload) {
        let body = match serde_json::to_value(payload) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Failed to serialize notification");
                return;
            }
        };
        let outcome = self
            .notifier
            .post_with_retry(&self.target.url, &body, &self.target.policy)
            .await;
        if !outcome.is_delivered() {
            warn!(
                correlation_id = %payload.correlation_id,
                attempts = outcome.attempts(),
                "Outcome notification was not delivered"
            );
        }
    }

    /// Claim and process jobs until the queue has nothing available.
    /// Returns the number of executions run.
    pub async fn process_available(&self) -> Result<usize, AppError> {
        let mut processed = 0;
        while let Some(job) = self.queue.claim().await? {
            let job_id = job.id.clone();
            if let Err(e) = self.process_job(job).await {
                error!(job_id = %job_id, error = %e, "Job execution failed");
            }
            processed += 1;
        }
        Ok(processed)
    }

    async fn run(self: Arc<Self>, index: usize, mut shutdown_rx: watch::Receiver<bool>) {
        info!(worker = index, "Reward worker loop started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.queue.claim().await {
                Ok(Some(job)) => {
                    let job_id = job.id.clone();
                    if let Err(e) = self.process_job(job).await {
                        error!(worker = index, job_id = %job_id, error = %e, "Job execution failed");
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!(worker = index, error = %e, "Failed to claim job"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown_rx.changed() => {}
            }
        }
        info!(worker = index, "Reward worker loop stopped");
    }
}

/// Spawn `concurrency` consumer loops. Send `true` on the returned channel to
/// stop them between jobs.
pub fn spawn_worker(worker: Arc<RewardWorker>) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let concurrency = worker.config.concurrency.max(1);

    let handle = tokio::spawn(async move {
        let mut loops = JoinSet::new();
        for index in 0..concurrency {
            loops.spawn(Arc::clone(&worker).run(index, shutdown_rx.clone()));
        }
        while let Some(result) = loops.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Reward worker loop panicked");
            }
        }
    });

    (handle, shutdown_tx)
}
