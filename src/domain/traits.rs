//! Domain traits defining contracts for external systems.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use super::error::AppError;
use super::types::{
    AssetSnapshot, DeliveryOutcome, JobKey, JobPatch, RewardJob, RewardPayload, TransferReceipt,
};

/// Durable job queue for reward transfers.
///
/// Delivery is at-least-once: a claimed job that is never finished becomes
/// claimable again once its visibility timeout elapses. Each claim carries a
/// fresh token, and a worker whose claim was taken over can no longer write
/// to the job.
#[async_trait]
pub trait RewardQueue: Send + Sync {
    /// Check storage connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Insert a pending job and return its id. A job with the same
    /// idempotency key that has not failed is returned instead of creating a
    /// new one.
    async fn enqueue(
        &self,
        payload: &RewardPayload,
        max_attempts: i32,
        idempotency_key: Option<&str>,
    ) -> Result<String, AppError>;

    /// Move the oldest available job to Active under a new claim token and
    /// hand it to the caller
    async fn claim(&self) -> Result<Option<RewardJob>, AppError>;

    /// Apply a partial update; `transaction_hash` is never overwritten.
    /// Fails with `DatabaseError::ClaimLost` when the patch is fenced by a
    /// claim that no longer holds.
    async fn update_state(&self, job_id: &str, patch: JobPatch) -> Result<(), AppError>;

    /// Re-queue a claimed job as Pending and return the new attempt count
    async fn retry(&self, job_id: &str, claim_token: &str, error: &str)
    -> Result<i32, AppError>;

    /// Restart the visibility timeout of a claim that still holds
    async fn extend_claim(&self, job_id: &str, claim_token: &str) -> Result<(), AppError>;

    async fn get_job(&self, key: JobKey<'_>) -> Result<Option<RewardJob>, AppError>;
}

/// Named exclusive-execution lock with a lease.
#[async_trait]
pub trait ScanLock: Send + Sync {
    /// Take the lock if it is free or its lease expired. Returns `false` when
    /// another holder owns it.
    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration)
    -> Result<bool, AppError>;

    /// Push the lease out by `ttl` from now. Returns `false` when `holder`
    /// no longer owns the lock.
    async fn extend(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool, AppError>;

    /// Release the lock if `holder` still owns it
    async fn release(&self, name: &str, holder: &str) -> Result<(), AppError>;

    /// Unconditionally free the lock; used at startup to drop a marker left
    /// behind by a crashed process
    async fn clear_stale(&self, name: &str) -> Result<(), AppError>;
}

/// Chain operations needed by the worker and the scanner
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Check RPC connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Transfer `amount` raw units of `asset_address` to the recipient's
    /// associated token account, creating it when missing. Resolves only after
    /// the transaction is confirmed.
    async fn transfer_asset(
        &self,
        asset_address: &str,
        signing_secret: &SecretString,
        recipient_address: &str,
        amount: u64,
    ) -> Result<TransferReceipt, AppError>;

    /// Custodial balance, supply and metadata of an asset
    async fn get_balance_and_metadata(&self, asset_address: &str)
    -> Result<AssetSnapshot, AppError>;
}

/// Retry policy for outbound notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Pause between attempts
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Longest a single delivery can take when every attempt times out
    #[must_use]
    pub fn worst_case_duration(&self) -> Duration {
        self.timeout * (self.max_retries + 1) + self.retry_delay * self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(30),
        }
    }
}

/// Best-effort HTTP notifier. Failures are reported as values, never errors.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn post_with_retry(
        &self,
        url: &str,
        payload: &serde_json::Value,
        policy: &RetryPolicy,
    ) -> DeliveryOutcome;
}
