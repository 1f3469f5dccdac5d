//! Domain types with validation support.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Asset type reported downstream for every SPL transfer.
pub const ASSET_TYPE_TOKEN_PROGRAM: &str = "TOKEN_PROGRAM_ID";

/// Transfer category understood by the backend webhook.
pub const TRANSFER_TYPE_PRIZE: &str = "TRANSFER_NFT_PRIZE_FREE_PLAY";

/// SPL assets are single-edition from the backend's point of view.
pub const DEFAULT_TOKEN_ID: u64 = 1;

/// Lifecycle state of a reward job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be claimed by a worker
    #[default]
    Pending,
    /// Claimed by exactly one worker
    Active,
    /// Transfer confirmed and outcome notified
    Completed,
    /// Attempts exhausted, failure notified
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job state: {}", s)),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Work carried by a reward job.
///
/// `signing_secret` is the decrypted custodial key. It is redacted in `Debug`
/// output and replaced with `null` in [`RewardPayload::diagnostic_snapshot`].
#[derive(Debug)]
pub struct RewardPayload {
    pub asset_address: String,
    pub recipient_address: String,
    pub amount: u64,
    pub correlation_id: String,
    pub signing_secret: SecretString,
}

impl Clone for RewardPayload {
    fn clone(&self) -> Self {
        Self {
            asset_address: self.asset_address.clone(),
            recipient_address: self.recipient_address.clone(),
            amount: self.amount,
            correlation_id: self.correlation_id.clone(),
            signing_secret: SecretString::from(self.signing_secret.expose_secret().to_owned()),
        }
    }
}

impl RewardPayload {
    #[must_use]
    pub fn new(request: &SendRewardRequest, signing_secret: SecretString) -> Self {
        Self {
            asset_address: request.asset_address.trim().to_string(),
            recipient_address: request.recipient_address.trim().to_string(),
            amount: request.amount,
            correlation_id: request.correlation_id.clone(),
            signing_secret,
        }
    }

    /// JSON view of the payload that is safe to log.
    #[must_use]
    pub fn diagnostic_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "assetAddress": self.asset_address,
            "recipientAddress": self.recipient_address,
            "amount": self.amount,
            "correlationId": self.correlation_id,
            "signingSecret": serde_json::Value::Null,
        })
    }
}

/// Durable unit of transfer work
#[derive(Debug, Clone)]
pub struct RewardJob {
    pub id: String,
    pub idempotency_key: Option<String>,
    pub payload: RewardPayload,
    /// Failed execution attempts so far
    pub attempt_count: i32,
    pub max_attempts: i32,
    /// Set once, after on-chain confirmation
    pub transaction_hash: Option<String>,
    pub notified: bool,
    pub state: JobState,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    /// Issued fresh on every claim. Fenced writes carrying an older token
    /// are rejected.
    pub claim_token: Option<String>,
}

impl RewardJob {
    #[must_use]
    pub fn new(id: String, payload: RewardPayload, max_attempts: i32) -> Self {
        let now = Utc::now();
        Self {
            id,
            idempotency_key: None,
            payload,
            attempt_count: 0,
            max_attempts,
            transaction_hash: None,
            notified: false,
            state: JobState::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
            claimed_at: None,
            claim_token: None,
        }
    }

    /// Whether a failed execution still leaves room for another attempt.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_attempts - 1
    }
}

/// Lookup key for [`crate::domain::RewardQueue::get_job`]
#[derive(Debug, Clone, Copy)]
pub enum JobKey<'a> {
    Id(&'a str),
    Idempotency(&'a str),
}

/// Partial update applied to a job.
///
/// `transaction_hash` is only written when the stored value is still empty.
/// A patch carrying `claim_token` applies only while the job is Active under
/// that claim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobPatch {
    pub state: Option<JobState>,
    pub transaction_hash: Option<String>,
    pub last_error: Option<String>,
    pub notified: Option<bool>,
    pub claim_token: Option<String>,
}

impl JobPatch {
    #[must_use]
    pub fn claimed_by(mut self, token: impl Into<String>) -> Self {
        self.claim_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    #[must_use]
    pub fn transaction_hash(mut self, hash: impl Into<String>) -> Self {
        self.transaction_hash = Some(hash.into());
        self
    }

    #[must_use]
    pub fn last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    #[must_use]
    pub fn notified(mut self, notified: bool) -> Self {
        self.notified = Some(notified);
        self
    }
}

/// Inbound reward command
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendRewardRequest {
    /// SPL mint address of the rewarded asset
    #[validate(length(min = 1, message = "Asset address is required"))]
    #[schema(example = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU")]
    pub asset_address: String,
    /// Wallet receiving the reward
    #[validate(length(min = 1, message = "Recipient address is required"))]
    #[schema(example = "DRpbCBMxVnDK7maPM5tGv6MvB3v1sRMC86PZ8okm21hy")]
    pub recipient_address: String,
    /// Raw asset units
    #[validate(range(min = 1, message = "Amount must be a positive integer"))]
    #[schema(example = 1)]
    pub amount: u64,
    /// Caller's identifier for the prize, echoed in the notification
    #[validate(length(min = 1, max = 128, message = "Correlation id is required"))]
    #[schema(example = "prize-42")]
    pub correlation_id: String,
}

impl SendRewardRequest {
    #[must_use]
    pub fn new(
        asset_address: impl Into<String>,
        recipient_address: impl Into<String>,
        amount: u64,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            asset_address: asset_address.into(),
            recipient_address: recipient_address.into(),
            amount,
            correlation_id: correlation_id.into(),
        }
    }
}

/// Outcome record posted to the backend once per terminal job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub chain_id: u64,
    pub asset_address: String,
    pub asset_type: String,
    pub recipient_address: String,
    pub amount: u64,
    pub token_id: u64,
    pub success: bool,
    pub transaction_hash: Option<String>,
    pub correlation_id: String,
    pub transfer_type: String,
}

impl NotificationPayload {
    #[must_use]
    pub fn success(chain_id: u64, payload: &RewardPayload, transaction_hash: &str) -> Self {
        Self::build(chain_id, payload, Some(transaction_hash.to_string()))
    }

    #[must_use]
    pub fn failure(chain_id: u64, payload: &RewardPayload) -> Self {
        Self::build(chain_id, payload, None)
    }

    fn build(chain_id: u64, payload: &RewardPayload, transaction_hash: Option<String>) -> Self {
        Self {
            chain_id,
            asset_address: payload.asset_address.clone(),
            asset_type: ASSET_TYPE_TOKEN_PROGRAM.to_string(),
            recipient_address: payload.recipient_address.clone(),
            amount: payload.amount,
            token_id: DEFAULT_TOKEN_ID,
            success: transaction_hash.is_some(),
            transaction_hash,
            correlation_id: payload.correlation_id.clone(),
            transfer_type: TRANSFER_TYPE_PRIZE.to_string(),
        }
    }
}

/// Confirmed on-chain transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub transaction_hash: String,
    pub source_account: String,
    pub destination_account: String,
}

/// Balance and metadata of one asset, as seen from the custodial wallet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetSnapshot {
    pub asset_address: String,
    pub balance: u64,
    pub minted: u64,
    pub decimals: u8,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub uri: Option<String>,
    pub image: Option<String>,
    pub description: Option<String>,
    pub attributes: Option<serde_json::Value>,
    pub metadata_address: Option<String>,
}

/// Reconciled asset in the backend's sync wire format (snake_case fields)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncAssetItem {
    pub chain_id: String,
    pub contract_address: String,
    pub token_id: String,
    pub nft_type: String,
    pub value: String,
    pub minted_value: String,
    pub token_uri: Option<String>,
    pub image: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub attributes: Option<serde_json::Value>,
    pub symbol: String,
    pub decimals: u8,
    pub metadata_address: Option<String>,
}

impl SyncAssetItem {
    #[must_use]
    pub fn from_snapshot(chain_id: u64, snapshot: AssetSnapshot) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            contract_address: snapshot.asset_address,
            token_id: DEFAULT_TOKEN_ID.to_string(),
            nft_type: ASSET_TYPE_TOKEN_PROGRAM.to_string(),
            value: snapshot.balance.to_string(),
            minted_value: snapshot.minted.to_string(),
            token_uri: snapshot.uri,
            image: snapshot.image,
            name: snapshot.name,
            description: snapshot.description,
            attributes: snapshot.attributes,
            symbol: snapshot.symbol.unwrap_or_default(),
            decimals: snapshot.decimals,
            metadata_address: snapshot.metadata_address,
        }
    }
}

/// Per-address scan result
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ScanEntry {
    Synced(SyncAssetItem),
    Failed { address: String, error: String },
}

impl ScanEntry {
    #[must_use]
    pub fn address(&self) -> &str {
        match self {
            Self::Synced(item) => &item.contract_address,
            Self::Failed { address, .. } => address,
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Result of one reconciliation tick, in input order
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ScanReport {
    pub entries: Vec<ScanEntry>,
    pub batches: usize,
}

impl ScanReport {
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_error()).count()
    }
}

/// Result of a best-effort POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32, status: u16 },
    Exhausted { attempts: u32, last_error: String },
}

impl DeliveryOutcome {
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub queue: HealthStatus,
    pub blockchain: HealthStatus,
    pub timestamp: DateTime<Utc>,
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    /// The queue is critical; a chain outage only degrades the service since
    /// jobs keep accumulating and retry later.
    #[must_use]
    pub fn new(queue: HealthStatus, blockchain: HealthStatus) -> Self {
        let status = match (&queue, &blockchain) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            queue,
            blockchain,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Success envelope returned by every API route
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    #[schema(example = 200)]
    pub status_code: u16,
    #[schema(example = "SUCCESS")]
    pub message: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            status_code: 200,
            message: "SUCCESS".to_string(),
            data,
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    #[schema(example = "validation_error")]
    pub r#type: String,
    #[schema(example = "Amount must be a positive integer")]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn payload() -> RewardPayload {
        RewardPayload::new(
            &SendRewardRequest::new("MINT1", "WALLET1", 1, "P1"),
            SecretString::from("super-secret"),
        )
    }

    #[test]
    fn test_job_state_display_and_parsing() {
        let states = vec![
            (JobState::Pending, "pending"),
            (JobState::Active, "active"),
            (JobState::Completed, "completed"),
            (JobState::Failed, "failed"),
        ];

        for (state, string) in states {
            assert_eq!(state.as_str(), string);
            assert_eq!(state.to_string(), string);
            assert_eq!(JobState::from_str(string).unwrap(), state);
        }

        assert!(JobState::from_str("invalid").is_err());
        assert!(JobState::Completed.is_terminal());
        assert!(!JobState::Active.is_terminal());
    }

    #[test]
    fn test_send_reward_request_validation() {
        assert!(SendRewardRequest::new("M", "W", 1, "P").validate().is_ok());
        assert!(SendRewardRequest::new("", "W", 1, "P").validate().is_err());
        assert!(SendRewardRequest::new("M", "", 1, "P").validate().is_err());
        assert!(SendRewardRequest::new("M", "W", 0, "P").validate().is_err());
        assert!(SendRewardRequest::new("M", "W", 1, "").validate().is_err());
    }

    #[test]
    fn test_send_reward_request_camel_case() {
        let req: SendRewardRequest = serde_json::from_value(serde_json::json!({
            "assetAddress": "MINT1",
            "recipientAddress": "WALLET1",
            "amount": 3,
            "correlationId": "P1"
        }))
        .unwrap();
        assert_eq!(req.asset_address, "MINT1");
        assert_eq!(req.amount, 3);
    }

    #[test]
    fn test_negative_amount_rejected_at_deserialization() {
        let result: Result<SendRewardRequest, _> = serde_json::from_value(serde_json::json!({
            "assetAddress": "MINT1",
            "recipientAddress": "WALLET1",
            "amount": -1,
            "correlationId": "P1"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_diagnostic_snapshot_hides_secret() {
        let p = payload();
        let snapshot = p.diagnostic_snapshot();
        assert!(snapshot["signingSecret"].is_null());
        assert!(!snapshot.to_string().contains("super-secret"));
        assert!(!format!("{:?}", p).contains("super-secret"));
    }

    #[test]
    fn test_payload_clone_keeps_secret() {
        let p = payload();
        let cloned = p.clone();
        assert_eq!(cloned.signing_secret.expose_secret(), "super-secret");
    }

    #[test]
    fn test_notification_payload_wire_shape() {
        let p = payload();
        let value = serde_json::to_value(NotificationPayload::success(6869, &p, "SIG1")).unwrap();
        assert_eq!(value["chainId"], 6869);
        assert_eq!(value["assetAddress"], "MINT1");
        assert_eq!(value["assetType"], "TOKEN_PROGRAM_ID");
        assert_eq!(value["tokenId"], 1);
        assert_eq!(value["success"], true);
        assert_eq!(value["transactionHash"], "SIG1");
        assert_eq!(value["correlationId"], "P1");
        assert_eq!(value["transferType"], "TRANSFER_NFT_PRIZE_FREE_PLAY");

        let failure = serde_json::to_value(NotificationPayload::failure(6869, &p)).unwrap();
        assert_eq!(failure["success"], false);
        assert!(failure["transactionHash"].is_null());
    }

    #[test]
    fn test_can_retry_boundary() {
        let mut job = RewardJob::new("j".into(), payload(), 5);
        job.attempt_count = 3;
        assert!(job.can_retry());
        job.attempt_count = 4;
        assert!(!job.can_retry());
    }

    #[test]
    fn test_sync_item_from_snapshot() {
        let item = SyncAssetItem::from_snapshot(
            6869,
            AssetSnapshot {
                asset_address: "A".into(),
                balance: 7,
                minted: 100,
                ..Default::default()
            },
        );
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["chain_id"], "6869");
        assert_eq!(value["contract_address"], "A");
        assert_eq!(value["token_id"], "1");
        assert_eq!(value["value"], "7");
        assert_eq!(value["minted_value"], "100");
        assert_eq!(value["symbol"], "");
    }

    #[test]
    fn test_scan_entry_error_shape() {
        let entry = ScanEntry::Failed {
            address: "C".into(),
            error: "boom".into(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value, serde_json::json!({"address": "C", "error": "boom"}));
        assert_eq!(entry.address(), "C");
    }

    #[test]
    fn test_health_response_aggregation() {
        let h = HealthResponse::new(HealthStatus::Healthy, HealthStatus::Unhealthy);
        assert_eq!(h.status, HealthStatus::Degraded);
        let h = HealthResponse::new(HealthStatus::Unhealthy, HealthStatus::Healthy);
        assert_eq!(h.status, HealthStatus::Unhealthy);
    }
}
