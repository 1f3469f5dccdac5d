//! Application layer containing business logic and shared state.

pub mod config;
pub mod scanner;
pub mod service;
pub mod state;
pub mod worker;

pub use config::{AppConfig, LogFormat, NotifyTarget};
pub use scanner::{ReconciliationScanner, SCAN_LOCK_NAME, ScannerConfig, spawn_scanner};
pub use service::RewardService;
pub use state::AppState;
pub use worker::{RewardWorker, WorkerConfig, spawn_worker};
