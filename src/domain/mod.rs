//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    AppError, BlockchainError, ConfigError, DatabaseError, ExternalServiceError, ValidationError,
};
pub use traits::{ChainAdapter, Notifier, RetryPolicy, RewardQueue, ScanLock};
pub use types::{
    ApiResponse, AssetSnapshot, DeliveryOutcome, ErrorDetail, ErrorResponse, HealthResponse,
    HealthStatus, JobKey, JobPatch, JobState, NotificationPayload, RewardJob, RewardPayload,
    ScanEntry, ScanReport, SendRewardRequest, SyncAssetItem, TransferReceipt,
};
