//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::Utc;
use secrecy::SecretString;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::{
    AppError, AssetSnapshot, BlockchainError, ChainAdapter, DatabaseError, DeliveryOutcome, JobKey,
    JobPatch, JobState, Notifier, RetryPolicy, RewardJob, RewardPayload, RewardQueue, ScanLock,
    TransferReceipt,
};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }
}

/// In-memory reward queue. Claims are exclusive and served oldest first.
pub struct InMemoryRewardQueue {
    jobs: Arc<Mutex<Vec<RewardJob>>>,
    config: MockConfig,
    is_healthy: AtomicBool,
    /// Active jobs claimed longer ago than this are handed out again
    visibility_timeout: Option<Duration>,
    update_failures: AtomicU32,
}

impl InMemoryRewardQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(Vec::new())),
            config,
            is_healthy: AtomicBool::new(true),
            visibility_timeout: None,
            update_failures: AtomicU32::new(0),
        }
    }

    /// Redeliver Active jobs whose claim is older than `timeout`
    #[must_use]
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    /// Fail the next `times` calls to `update_state` with a connection error
    pub fn fail_updates(&self, times: u32) {
        self.update_failures.store(times, Ordering::SeqCst);
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Snapshot of every stored job (for testing)
    pub fn jobs(&self) -> Vec<RewardJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string());
            return Err(AppError::Database(DatabaseError::Query(msg)));
        }
        Ok(())
    }

    fn with_job<T>(
        &self,
        job_id: &str,
        f: impl FnOnce(&mut RewardJob) -> T,
    ) -> Result<T, AppError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(job_id.to_string())))?;
        job.updated_at = Utc::now();
        Ok(f(job))
    }

    /// Like `with_job`, but only while `token` (when given) holds the claim
    fn with_claim<T>(
        &self,
        job_id: &str,
        token: Option<&str>,
        f: impl FnOnce(&mut RewardJob) -> T,
    ) -> Result<T, AppError> {
        let Some(token) = token else {
            return self.with_job(job_id, f);
        };
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| {
                j.id == job_id
                    && j.state == JobState::Active
                    && j.claim_token.as_deref() == Some(token)
            })
            .ok_or_else(|| AppError::Database(DatabaseError::ClaimLost(job_id.to_string())))?;
        job.updated_at = Utc::now();
        Ok(f(job))
    }
}

impl Default for InMemoryRewardQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RewardQueue for InMemoryRewardQueue {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn enqueue(
        &self,
        payload: &RewardPayload,
        max_attempts: i32,
        idempotency_key: Option<&str>,
    ) -> Result<String, AppError> {
        self.check_should_fail()?;
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(key) = idempotency_key {
            if let Some(existing) = jobs
                .iter()
                .find(|j| j.idempotency_key.as_deref() == Some(key) && j.state != JobState::Failed)
            {
                return Ok(existing.id.clone());
            }
        }

        let mut job = RewardJob::new(Uuid::new_v4().to_string(), payload.clone(), max_attempts);
        job.idempotency_key = idempotency_key.map(str::to_string);
        let id = job.id.clone();
        jobs.push(job);
        Ok(id)
    }

    async fn claim(&self) -> Result<Option<RewardJob>, AppError> {
        self.check_should_fail()?;
        let now = Utc::now();
        let stale_before = self
            .visibility_timeout
            .and_then(|t| chrono::Duration::from_std(t).ok())
            .map(|t| now - t);
        let mut jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter_mut()
            .find(|j| match j.state {
                JobState::Pending => true,
                JobState::Active => matches!(
                    (j.claimed_at, stale_before),
                    (Some(claimed), Some(limit)) if claimed < limit
                ),
                _ => false,
            })
            .map(|job| {
                job.state = JobState::Active;
                job.claimed_at = Some(now);
                job.claim_token = Some(Uuid::new_v4().to_string());
                job.clone()
            }))
    }

    async fn update_state(&self, job_id: &str, patch: JobPatch) -> Result<(), AppError> {
        self.check_should_fail()?;
        let failing = self
            .update_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::Database(DatabaseError::Connection(
                "mock update failure".to_string(),
            )));
        }
        self.with_claim(job_id, patch.claim_token.as_deref(), |job| {
            if let Some(state) = patch.state {
                job.state = state;
            }
            if job.transaction_hash.is_none() {
                job.transaction_hash = patch.transaction_hash;
            }
            if let Some(error) = patch.last_error {
                job.last_error = Some(error);
            }
            if let Some(notified) = patch.notified {
                job.notified = notified;
            }
        })
    }

    async fn retry(
        &self,
        job_id: &str,
        claim_token: &str,
        error: &str,
    ) -> Result<i32, AppError> {
        self.check_should_fail()?;
        self.with_claim(job_id, Some(claim_token), |job| {
            job.state = JobState::Pending;
            job.attempt_count += 1;
            job.last_error = Some(error.to_string());
            job.claimed_at = None;
            job.claim_token = None;
            job.attempt_count
        })
    }

    async fn extend_claim(&self, job_id: &str, claim_token: &str) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.with_claim(job_id, Some(claim_token), |job| {
            job.claimed_at = Some(Utc::now());
        })
    }

    async fn get_job(&self, key: JobKey<'_>) -> Result<Option<RewardJob>, AppError> {
        self.check_should_fail()?;
        let jobs = self.jobs.lock().unwrap();
        // Newest job wins when a key was resubmitted
        Ok(jobs
            .iter()
            .rev()
            .find(|j| match key {
                JobKey::Id(id) => j.id == id,
                JobKey::Idempotency(k) => j.idempotency_key.as_deref() == Some(k),
            })
            .cloned())
    }
}

/// In-memory lease lock
pub struct InMemoryScanLock {
    locks: Mutex<HashMap<String, (String, Instant)>>,
    acquisitions: AtomicUsize,
}

impl InMemoryScanLock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            acquisitions: AtomicUsize::new(0),
        }
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.locks
            .lock()
            .unwrap()
            .get(name)
            .is_some_and(|(_, expires)| *expires > Instant::now())
    }

    /// Number of successful acquisitions so far
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryScanLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScanLock for InMemoryScanLock {
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, AppError> {
        let mut locks = self.locks.lock().unwrap();
        let now = Instant::now();
        if locks.get(name).is_some_and(|(_, expires)| *expires > now) {
            return Ok(false);
        }
        locks.insert(name.to_string(), (holder.to_string(), now + ttl));
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn extend(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool, AppError> {
        let mut locks = self.locks.lock().unwrap();
        match locks.get_mut(name) {
            Some((owner, expires)) if owner == holder => {
                *expires = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, name: &str, holder: &str) -> Result<(), AppError> {
        let mut locks = self.locks.lock().unwrap();
        if locks.get(name).is_some_and(|(owner, _)| owner == holder) {
            locks.remove(name);
        }
        Ok(())
    }

    async fn clear_stale(&self, name: &str) -> Result<(), AppError> {
        self.locks.lock().unwrap().remove(name);
        Ok(())
    }
}

/// Transfer recorded by [`MockChainAdapter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTransfer {
    pub asset_address: String,
    pub recipient_address: String,
    pub amount: u64,
}

/// Scriptable chain adapter. Successful transfers are signed `SIG1`, `SIG2`, ...
pub struct MockChainAdapter {
    transfers: Mutex<Vec<RecordedTransfer>>,
    transfer_attempts: AtomicUsize,
    failures_remaining: AtomicU32,
    failing_addresses: HashSet<String>,
    panicking_addresses: HashSet<String>,
    delay: Option<Duration>,
    metadata_calls: AtomicUsize,
    is_healthy: AtomicBool,
}

impl MockChainAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            transfers: Mutex::new(Vec::new()),
            transfer_attempts: AtomicUsize::new(0),
            failures_remaining: AtomicU32::new(0),
            failing_addresses: HashSet::new(),
            panicking_addresses: HashSet::new(),
            delay: None,
            metadata_calls: AtomicUsize::new(0),
            is_healthy: AtomicBool::new(true),
        }
    }

    /// Fail the next `times` transfers
    #[must_use]
    pub fn failing_times(times: u32) -> Self {
        let adapter = Self::new();
        adapter.failures_remaining.store(times, Ordering::SeqCst);
        adapter
    }

    /// Every call sleeps for `delay` first
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_failing_address(mut self, address: &str) -> Self {
        self.failing_addresses.insert(address.to_string());
        self
    }

    #[must_use]
    pub fn with_panicking_address(mut self, address: &str) -> Self {
        self.panicking_addresses.insert(address.to_string());
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Confirmed transfers in submission order
    pub fn transfers(&self) -> Vec<RecordedTransfer> {
        self.transfers.lock().unwrap().clone()
    }

    /// Every transfer call, failed ones included
    pub fn transfer_attempts(&self) -> usize {
        self.transfer_attempts.load(Ordering::SeqCst)
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for MockChainAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Blockchain(BlockchainError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        Ok(())
    }

    async fn transfer_asset(
        &self,
        asset_address: &str,
        _signing_secret: &SecretString,
        recipient_address: &str,
        amount: u64,
    ) -> Result<TransferReceipt, AppError> {
        self.transfer_attempts.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::Blockchain(BlockchainError::RpcError(
                "mock transfer failure".to_string(),
            )));
        }

        let mut transfers = self.transfers.lock().unwrap();
        transfers.push(RecordedTransfer {
            asset_address: asset_address.to_string(),
            recipient_address: recipient_address.to_string(),
            amount,
        });
        Ok(TransferReceipt {
            transaction_hash: format!("SIG{}", transfers.len()),
            source_account: "mock_source_ata".to_string(),
            destination_account: format!("ata_{}", recipient_address),
        })
    }

    async fn get_balance_and_metadata(
        &self,
        asset_address: &str,
    ) -> Result<AssetSnapshot, AppError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if self.panicking_addresses.contains(asset_address) {
            panic!("mock panic for {}", asset_address);
        }
        if self.failing_addresses.contains(asset_address) {
            return Err(AppError::Blockchain(BlockchainError::AccountNotFound(
                format!("metadata for mint {}", asset_address),
            )));
        }
        Ok(AssetSnapshot {
            asset_address: asset_address.to_string(),
            balance: 10,
            minted: 100,
            decimals: 0,
            name: Some(format!("Prize {}", asset_address)),
            symbol: Some("PRZ".to_string()),
            ..Default::default()
        })
    }
}

/// Notifier that records every payload instead of sending it
pub struct RecordingNotifier {
    posts: Mutex<Vec<(String, serde_json::Value)>>,
    deliver: bool,
    delay: Option<Duration>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            posts: Mutex::new(Vec::new()),
            deliver: true,
            delay: None,
        }
    }

    /// Each post takes `delay` before it is recorded
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Records payloads but reports every delivery as exhausted
    #[must_use]
    pub fn undeliverable() -> Self {
        Self {
            deliver: false,
            ..Self::new()
        }
    }

    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn urls(&self) -> Vec<String> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn post_with_retry(
        &self,
        url: &str,
        payload: &serde_json::Value,
        policy: &RetryPolicy,
    ) -> DeliveryOutcome {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.posts
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));
        if self.deliver {
            DeliveryOutcome::Delivered {
                attempts: 1,
                status: 200,
            }
        } else {
            DeliveryOutcome::Exhausted {
                attempts: policy.max_retries + 1,
                last_error: "mock delivery failure".to_string(),
            }
        }
    }
}
