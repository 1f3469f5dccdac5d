//! Infrastructure layer implementations.

pub mod blockchain;
pub mod database;
pub mod notifier;
pub mod vault;

pub use blockchain::{RpcClientConfig, SolanaChainAdapter};
pub use database::{PostgresClient, PostgresConfig};
pub use notifier::WebhookNotifier;
pub use vault::KeyVault;
