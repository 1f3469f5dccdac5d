//! Durable reward-dispatch relayer for Solana SPL token payouts.
//!
//! Reward requests are queued in Postgres, executed on-chain by background
//! workers with bounded retries, and reported to a downstream backend through
//! webhook notifications. A cron-scheduled scanner reconciles custodial
//! balances under a distributed lock.

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
