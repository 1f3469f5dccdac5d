//! Cron-scheduled reconciliation of custodial asset holdings.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::domain::{
    AppError, ChainAdapter, Notifier, ScanEntry, ScanLock, ScanReport, SyncAssetItem,
};

use super::config::NotifyTarget;

/// Lock guarding the reconciliation scan across processes
pub const SCAN_LOCK_NAME: &str = "reconcile_assets";

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// `ENABLE_TASK`; the scheduler does nothing when false
    pub enabled: bool,
    /// Five-field cron expression
    pub schedule: String,
    pub addresses: Vec<String>,
    pub batch_size: usize,
    /// Pause between consecutive batches
    pub batch_pause: Duration,
    /// Lease on the scan lock, renewed before every batch after the first.
    /// A crashed holder is taken over once it lapses.
    pub lock_ttl: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: "*/5 * * * *".to_string(),
            addresses: Vec::new(),
            batch_size: 5,
            batch_pause: Duration::from_millis(500),
            lock_ttl: Duration::from_secs(15 * 60),
        }
    }
}

impl ScannerConfig {
    /// Split a comma-separated address list, trimming and dropping empties
    #[must_use]
    pub fn parse_addresses(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

pub struct ReconciliationScanner {
    chain: Arc<dyn ChainAdapter>,
    lock: Arc<dyn ScanLock>,
    notifier: Arc<dyn Notifier>,
    config: ScannerConfig,
    target: NotifyTarget,
    /// Identifies this process as lock holder
    holder: String,
}

impl ReconciliationScanner {
    #[must_use]
    pub fn new(
        chain: Arc<dyn ChainAdapter>,
        lock: Arc<dyn ScanLock>,
        notifier: Arc<dyn Notifier>,
        config: ScannerConfig,
        target: NotifyTarget,
    ) -> Self {
        Self {
            chain,
            lock,
            notifier,
            config,
            target,
            holder: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Drop a lock left behind by a process that died mid-scan
    pub async fn clear_stale_marker(&self) -> Result<(), AppError> {
        self.lock.clear_stale(SCAN_LOCK_NAME).await
    }

    /// Run one scan. Returns `None` when another scan holds the lock.
    #[instrument(skip(self), fields(holder = %self.holder))]
    pub async fn run_tick(&self) -> Result<Option<ScanReport>, AppError> {
        if !self
            .lock
            .try_acquire(SCAN_LOCK_NAME, &self.holder, self.config.lock_ttl)
            .await?
        {
            info!("Reconciliation already in progress, skipping tick");
            return Ok(None);
        }

        let report = self.scan_all().await;
        self.lock.release(SCAN_LOCK_NAME, &self.holder).await?;
        Ok(Some(report))
    }

    async fn scan_all(&self) -> ScanReport {
        let batches: Vec<&[String]> = self
            .config
            .addresses
            .chunks(self.config.batch_size.max(1))
            .collect();
        let mut report = ScanReport {
            entries: Vec::with_capacity(self.config.addresses.len()),
            batches: batches.len(),
        };

        for (index, batch) in batches.iter().enumerate() {
            if index > 0 && !self.renew_lock().await {
                warn!(
                    completed = index,
                    remaining = batches.len() - index,
                    "Scan lock lost, abandoning remaining batches"
                );
                report.batches = index;
                break;
            }
            let entries = self.scan_batch(batch).await;
            self.post_sync(&entries).await;
            report.entries.extend(entries);

            if index + 1 < batches.len() {
                tokio::time::sleep(self.config.batch_pause).await;
            }
        }

        info!(
            addresses = report.entries.len(),
            batches = report.batches,
            errors = report.error_count(),
            "Reconciliation scan finished"
        );
        report
    }

    async fn renew_lock(&self) -> bool {
        match self
            .lock
            .extend(SCAN_LOCK_NAME, &self.holder, self.config.lock_ttl)
            .await
        {
            Ok(held) => held,
            Err(e) => {
                error!(error = %e, "Failed to renew scan lock");
                false
            }
        }
    }

    /// Query every address of a batch concurrently. Results keep input order.
    async fn scan_batch(&self, batch: &[String]) -> Vec<ScanEntry> {
        let handles: Vec<(String, JoinHandle<Result<SyncAssetItem, AppError>>)> = batch
            .iter()
            .map(|address| {
                let chain = Arc::clone(&self.chain);
                let chain_id = self.target.chain_id;
                let owned = address.clone();
                let handle = tokio::spawn(async move {
                    let snapshot = chain.get_balance_and_metadata(&owned).await?;
                    Ok(SyncAssetItem::from_snapshot(chain_id, snapshot))
                });
                (address.clone(), handle)
            })
            .collect();

        let mut entries = Vec::with_capacity(handles.len());
        for (address, handle) in handles {
            let entry = match handle.await {
                Ok(Ok(item)) => ScanEntry::Synced(item),
                Ok(Err(e)) => {
                    warn!(address = %address, error = %e, "Failed to reconcile asset");
                    ScanEntry::Failed {
                        address,
                        error: e.to_string(),
                    }
                }
                Err(e) => {
                    error!(address = %address, error = %e, "Reconciliation task aborted");
                    ScanEntry::Failed {
                        address,
                        error: format!("task failed: {}", e),
                    }
                }
            };
            entries.push(entry);
        }
        entries
    }

    async fn post_sync(&self, entries: &[ScanEntry]) {
        let items: Vec<&SyncAssetItem> = entries
            .iter()
            .filter_map(|entry| match entry {
                ScanEntry::Synced(item) => Some(item),
                ScanEntry::Failed { .. } => None,
            })
            .collect();
        if items.is_empty() {
            return;
        }

        let body = match serde_json::to_value(&items) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Failed to serialize sync payload");
                return;
            }
        };
        let outcome = self
            .notifier
            .post_with_retry(&self.target.url, &body, &self.target.policy)
            .await;
        if !outcome.is_delivered() {
            warn!(items = items.len(), "Sync payload was not delivered");
        }
    }
}

/// Start the cron loop. The task clears the stale marker first and returns
/// immediately when the scanner is disabled.
pub fn spawn_scanner(
    scanner: Arc<ReconciliationScanner>,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        if !scanner.config.enabled {
            info!("Reconciliation scanner disabled");
            return;
        }
        if let Err(e) = scanner.clear_stale_marker().await {
            error!(error = %e, "Failed to clear stale scan lock");
        }
        info!(schedule = %scanner.config.schedule, "Reconciliation scanner started");

        loop {
            let now = Utc::now();
            let next = match cron_parser::parse(&scanner.config.schedule, &now) {
                Ok(next) => next,
                Err(e) => {
                    error!(error = ?e, "Invalid reconciliation schedule, scanner stopped");
                    return;
                }
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    match scanner.run_tick().await {
                        Ok(Some(report)) if report.error_count() > 0 => {
                            warn!(errors = report.error_count(), "Reconciliation finished with errors");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Reconciliation tick failed"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("Reconciliation scanner received shutdown signal");
                    return;
                }
            }
        }
    });

    (handle, shutdown_tx)
}
