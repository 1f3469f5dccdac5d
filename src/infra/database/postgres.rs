//! PostgreSQL-backed reward queue and scan lock.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::domain::{
    AppError, DatabaseError, JobKey, JobPatch, JobState, RewardJob, RewardPayload, RewardQueue,
    ScanLock, ValidationError,
};
use crate::infra::vault::KeyVault;

const JOB_COLUMNS: &str = r#"
    id, idempotency_key, asset_address, recipient_address, amount, correlation_id,
    signing_secret, attempt_count, max_attempts, transaction_hash, notified, state,
    last_error, created_at, updated_at, claimed_at, claim_token
"#;

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    /// Active jobs older than this are handed out again by `claim`
    pub visibility_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            visibility_timeout: Duration::from_secs(300),
        }
    }
}

/// PostgreSQL client implementing [`RewardQueue`] and [`ScanLock`]
pub struct PostgresClient {
    pool: PgPool,
    visibility_timeout: Duration,
    /// Seals the signing secret column when present
    vault: Option<Arc<KeyVault>>,
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self {
            pool,
            visibility_timeout: config.visibility_timeout,
            vault: None,
        })
    }

    /// Encrypt signing secrets at rest with the given vault
    #[must_use]
    pub fn with_vault(mut self, vault: Arc<KeyVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn seal(&self, secret: &SecretString) -> Result<String, AppError> {
        match &self.vault {
            Some(vault) => vault.seal(secret.expose_secret()),
            None => Ok(secret.expose_secret().to_owned()),
        }
    }

    fn unseal(&self, stored: String) -> Result<SecretString, AppError> {
        match &self.vault {
            Some(vault) => vault.unseal(&stored),
            None => Ok(SecretString::from(stored)),
        }
    }

    /// Parse a database row into a RewardJob
    fn row_to_job(&self, row: &sqlx::postgres::PgRow) -> Result<RewardJob, AppError> {
        let state: String = row.try_get("state").map_err(DatabaseError::from)?;
        let amount: i64 = row.try_get("amount").map_err(DatabaseError::from)?;
        let stored_secret: String = row.try_get("signing_secret").map_err(DatabaseError::from)?;

        let payload = RewardPayload {
            asset_address: row.try_get("asset_address").map_err(DatabaseError::from)?,
            recipient_address: row
                .try_get("recipient_address")
                .map_err(DatabaseError::from)?,
            amount: u64::try_from(amount).map_err(|_| {
                AppError::Database(DatabaseError::Query(format!(
                    "negative amount stored: {}",
                    amount
                )))
            })?,
            correlation_id: row.try_get("correlation_id").map_err(DatabaseError::from)?,
            signing_secret: self.unseal(stored_secret)?,
        };

        Ok(RewardJob {
            id: row.try_get("id").map_err(DatabaseError::from)?,
            idempotency_key: row.try_get("idempotency_key").map_err(DatabaseError::from)?,
            payload,
            attempt_count: row.try_get("attempt_count").map_err(DatabaseError::from)?,
            max_attempts: row.try_get("max_attempts").map_err(DatabaseError::from)?,
            transaction_hash: row.try_get("transaction_hash").map_err(DatabaseError::from)?,
            notified: row.try_get("notified").map_err(DatabaseError::from)?,
            state: state
                .parse()
                .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))?,
            last_error: row.try_get("last_error").map_err(DatabaseError::from)?,
            created_at: row.try_get("created_at").map_err(DatabaseError::from)?,
            updated_at: row.try_get("updated_at").map_err(DatabaseError::from)?,
            claimed_at: row.try_get("claimed_at").map_err(DatabaseError::from)?,
            claim_token: row.try_get("claim_token").map_err(DatabaseError::from)?,
        })
    }
}

#[async_trait]
impl RewardQueue for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, payload), fields(asset = %payload.asset_address, correlation_id = %payload.correlation_id))]
    async fn enqueue(
        &self,
        payload: &RewardPayload,
        max_attempts: i32,
        idempotency_key: Option<&str>,
    ) -> Result<String, AppError> {
        let amount = i64::try_from(payload.amount).map_err(|_| {
            AppError::Validation(ValidationError::InvalidField {
                field: "amount".to_string(),
                message: "Amount exceeds the storable range".to_string(),
            })
        })?;
        let sealed = self.seal(&payload.signing_secret)?;

        // A conflicting job may fail between the insert and the lookup, in
        // which case the insert is tried once more
        for _ in 0..2 {
            let id = uuid::Uuid::new_v4().to_string();
            let inserted = sqlx::query(
                r#"
                INSERT INTO reward_jobs (
                    id, idempotency_key, asset_address, recipient_address, amount,
                    correlation_id, signing_secret, max_attempts, state
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (idempotency_key) WHERE state <> 'failed' DO NOTHING
                RETURNING id
                "#,
            )
            .bind(&id)
            .bind(idempotency_key)
            .bind(&payload.asset_address)
            .bind(&payload.recipient_address)
            .bind(amount)
            .bind(&payload.correlation_id)
            .bind(&sealed)
            .bind(max_attempts)
            .bind(JobState::Pending.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

            if let Some(row) = inserted {
                return Ok(row.try_get("id").map_err(DatabaseError::from)?);
            }

            // Conflict: a live submission owns this key
            let existing = sqlx::query(
                "SELECT id FROM reward_jobs WHERE idempotency_key = $1 AND state <> 'failed'",
            )
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
            if let Some(row) = existing {
                let existing: String = row.try_get("id").map_err(DatabaseError::from)?;
                debug!(job_id = %existing, "Idempotency key already queued");
                return Ok(existing);
            }
        }

        Err(AppError::Database(DatabaseError::Duplicate(format!(
            "idempotency key {} is contended",
            idempotency_key.unwrap_or_default()
        ))))
    }

    #[instrument(skip(self))]
    async fn claim(&self) -> Result<Option<RewardJob>, AppError> {
        let query = format!(
            r#"
            UPDATE reward_jobs
            SET state = 'active', claim_token = $2, claimed_at = NOW(), updated_at = NOW()
            WHERE id = (
                SELECT id FROM reward_jobs
                WHERE state = 'pending'
                   OR (state = 'active' AND claimed_at < NOW() - make_interval(secs => $1))
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(self.visibility_timeout.as_secs_f64())
            .bind(uuid::Uuid::new_v4().to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        row.map(|row| self.row_to_job(&row)).transpose()
    }

    #[instrument(skip(self))]
    async fn update_state(&self, job_id: &str, patch: JobPatch) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE reward_jobs
            SET state = COALESCE($2, state),
                transaction_hash = COALESCE(transaction_hash, $3),
                last_error = COALESCE($4, last_error),
                notified = COALESCE($5, notified),
                updated_at = NOW()
            WHERE id = $1
              AND ($6::text IS NULL OR (claim_token = $6 AND state = 'active'))
            "#,
        )
        .bind(job_id)
        .bind(patch.state.map(|s| s.as_str()))
        .bind(patch.transaction_hash)
        .bind(patch.last_error)
        .bind(patch.notified)
        .bind(patch.claim_token.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        if result.rows_affected() == 0 {
            let message = format!("reward job {}", job_id);
            return Err(AppError::Database(match patch.claim_token {
                Some(_) => DatabaseError::ClaimLost(message),
                None => DatabaseError::NotFound(message),
            }));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn retry(
        &self,
        job_id: &str,
        claim_token: &str,
        error: &str,
    ) -> Result<i32, AppError> {
        let row = sqlx::query(
            r#"
            UPDATE reward_jobs
            SET state = 'pending',
                attempt_count = attempt_count + 1,
                last_error = $3,
                claimed_at = NULL,
                claim_token = NULL,
                updated_at = NOW()
            WHERE id = $1 AND claim_token = $2 AND state = 'active'
            RETURNING attempt_count
            "#,
        )
        .bind(job_id)
        .bind(claim_token)
        .bind(error)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?
        .ok_or_else(|| {
            AppError::Database(DatabaseError::ClaimLost(format!("reward job {}", job_id)))
        })?;

        Ok(row.try_get("attempt_count").map_err(DatabaseError::from)?)
    }

    #[instrument(skip(self))]
    async fn extend_claim(&self, job_id: &str, claim_token: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE reward_jobs
            SET claimed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND claim_token = $2 AND state = 'active'
            "#,
        )
        .bind(job_id)
        .bind(claim_token)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Database(DatabaseError::ClaimLost(format!(
                "reward job {}",
                job_id
            ))));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_job(&self, key: JobKey<'_>) -> Result<Option<RewardJob>, AppError> {
        let (column, value) = match key {
            JobKey::Id(id) => ("id", id),
            JobKey::Idempotency(k) => ("idempotency_key", k),
        };
        // A resubmitted key resolves to its newest job
        let query = format!(
            "SELECT {} FROM reward_jobs WHERE {} = $1 ORDER BY created_at DESC LIMIT 1",
            JOB_COLUMNS, column
        );

        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        row.map(|row| self.row_to_job(&row)).transpose()
    }
}

#[async_trait]
impl ScanLock for PostgresClient {
    #[instrument(skip(self))]
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, AppError> {
        let row = sqlx::query(
            r#"
            INSERT INTO scan_locks (name, in_progress, holder, acquired_at, expires_at)
            VALUES ($1, TRUE, $2, NOW(), NOW() + make_interval(secs => $3))
            ON CONFLICT (name) DO UPDATE
            SET in_progress = TRUE,
                holder = EXCLUDED.holder,
                acquired_at = EXCLUDED.acquired_at,
                expires_at = EXCLUDED.expires_at
            WHERE scan_locks.in_progress = FALSE
               OR scan_locks.expires_at < NOW()
            RETURNING name
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(row.is_some())
    }

    #[instrument(skip(self))]
    async fn extend(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE scan_locks
            SET expires_at = NOW() + make_interval(secs => $3)
            WHERE name = $1 AND holder = $2 AND in_progress = TRUE
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn release(&self, name: &str, holder: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE scan_locks
            SET in_progress = FALSE, holder = NULL, expires_at = NULL
            WHERE name = $1 AND holder = $2
            "#,
        )
        .bind(name)
        .bind(holder)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear_stale(&self, name: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE scan_locks
            SET in_progress = FALSE, holder = NULL, expires_at = NULL
            WHERE name = $1 AND in_progress = TRUE
            "#,
        )
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        if result.rows_affected() > 0 {
            info!(lock = %name, "Cleared stale scan lock");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_config_default() {
        let config = PostgresConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.acquire_timeout, Duration::from_secs(3));
        assert_eq!(config.visibility_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_job_columns_cover_every_field() {
        for column in [
            "idempotency_key",
            "signing_secret",
            "transaction_hash",
            "notified",
            "claimed_at",
            "claim_token",
        ] {
            assert!(JOB_COLUMNS.contains(column), "missing {}", column);
        }
    }
}
