//! HTTP webhook notifier.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::domain::{AppError, DeliveryOutcome, ExternalServiceError, Notifier, RetryPolicy};

/// Posts JSON payloads to the backend, retrying with a fixed delay
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new() -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(concat!("solana-reward-relayer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                AppError::ExternalService(ExternalServiceError::Unavailable(e.to_string()))
            })?;
        Ok(Self { client })
    }

    async fn post_once(
        &self,
        url: &str,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> Result<u16, ExternalServiceError> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExternalServiceError::Timeout(e.to_string())
                } else {
                    ExternalServiceError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(status.as_u16());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ExternalServiceError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self, payload, policy))]
    async fn post_with_retry(
        &self,
        url: &str,
        payload: &serde_json::Value,
        policy: &RetryPolicy,
    ) -> DeliveryOutcome {
        let total_attempts = policy.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=total_attempts {
            match self.post_once(url, payload, policy.timeout).await {
                Ok(status) => {
                    info!(attempt, status, "Notification delivered");
                    return DeliveryOutcome::Delivered {
                        attempts: attempt,
                        status,
                    };
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Notification attempt failed");
                    last_error = e.to_string();
                }
            }
            if attempt < total_attempts {
                tokio::time::sleep(policy.retry_delay).await;
            }
        }

        error!(
            attempts = total_attempts,
            last_error = %last_error,
            "Notification delivery exhausted"
        );
        DeliveryOutcome::Exhausted {
            attempts: total_attempts,
            last_error,
        }
    }
}
