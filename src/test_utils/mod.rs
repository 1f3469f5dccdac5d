//! In-memory doubles for the domain traits.

pub mod mocks;

pub use mocks::{
    InMemoryRewardQueue, InMemoryScanLock, MockChainAdapter, MockConfig, RecordedTransfer,
    RecordingNotifier,
};
