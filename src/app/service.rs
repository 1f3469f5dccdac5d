//! Reward intake service.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::domain::{
    AppError, ChainAdapter, HealthResponse, HealthStatus, RewardPayload, RewardQueue,
    SendRewardRequest, ValidationError,
};

/// Accepts reward commands and queues them for the worker
pub struct RewardService {
    queue: Arc<dyn RewardQueue>,
    chain: Arc<dyn ChainAdapter>,
    /// Decrypted custodial key attached to every job
    signing_secret: SecretString,
    max_attempts: i32,
}

impl RewardService {
    #[must_use]
    pub fn new(
        queue: Arc<dyn RewardQueue>,
        chain: Arc<dyn ChainAdapter>,
        signing_secret: SecretString,
        max_attempts: i32,
    ) -> Self {
        Self {
            queue,
            chain,
            signing_secret,
            max_attempts,
        }
    }

    /// Validate and queue a reward. Resolves once the job is durable; the
    /// transfer outcome is only reported through the backend notification.
    ///
    /// The correlation id doubles as idempotency key, so resubmitting a prize
    /// that is still queued, running or completed returns the existing job.
    /// A prize whose job failed is queued again.
    #[instrument(skip(self, request), fields(asset = %request.asset_address, correlation_id = %request.correlation_id))]
    pub async fn enqueue_reward(&self, request: &SendRewardRequest) -> Result<String, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;
        if request.asset_address.trim().is_empty() || request.recipient_address.trim().is_empty() {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "address".to_string(),
                message: "Addresses must not be blank".to_string(),
            }));
        }

        let payload = RewardPayload::new(
            request,
            SecretString::from(self.signing_secret.expose_secret().to_owned()),
        );
        let job_id = self
            .queue
            .enqueue(&payload, self.max_attempts, Some(&request.correlation_id))
            .await?;

        info!(job_id = %job_id, amount = request.amount, "Reward queued");
        Ok(job_id)
    }

    /// Perform health check on all dependencies
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let queue = match self.queue.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = %e, "Queue health check failed");
                HealthStatus::Unhealthy
            }
        };
        let blockchain = match self.chain.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = %e, "Blockchain health check failed");
                HealthStatus::Unhealthy
            }
        };
        HealthResponse::new(queue, blockchain)
    }
}
