//! # Broker-Backed Queue
//!
//! The persistent queue backend: one PostgreSQL jobs table, one logical
//! queue per tier, claimed atomically with `FOR UPDATE SKIP LOCKED` so at
//! most one worker in the fleet dequeues a given job. Across processes the
//! at-most-one guarantee comes from this claim, not from anything the
//! dispatcher does.
//!
//! The ordering score column is written from
//! [`crate::queue::ordering::priority_score`], the same function the
//! in-memory fallback keys on, so the two backends dequeue in identical
//! order.

use crate::constants::{Tier, PRIORITY_WEIGHT};
use crate::queue::backend::{BackendKind, QueueBackend, ReclaimAction, ReclaimedJob};
use crate::queue::errors::QueueError;
use crate::queue::job::{Job, JobState, TierQueueStats};
use crate::queue::ordering::priority_score;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, tier, priority, payload, status, created_at, ready_at, \
     max_retries, retries_remaining, stalled_count, last_error";

/// Row shape shared by every query that returns jobs.
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    tier: String,
    priority: i32,
    payload: serde_json::Value,
    status: String,
    created_at: DateTime<Utc>,
    ready_at: DateTime<Utc>,
    max_retries: i32,
    retries_remaining: i32,
    stalled_count: i32,
    last_error: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let tier: Tier = row
            .tier
            .parse()
            .map_err(|e: String| QueueError::Database(e))?;
        let status: JobState = row
            .status
            .parse()
            .map_err(|e: String| QueueError::Database(e))?;
        Ok(Job {
            id: row.id,
            tier,
            priority: row.priority,
            payload: row.payload,
            created_at: row.created_at,
            ready_at: row.ready_at,
            max_retries: row.max_retries as u32,
            retries_remaining: row.retries_remaining as u32,
            stalled_count: row.stalled_count as u32,
            status,
            backend: BackendKind::Broker,
            last_error: row.last_error,
        })
    }
}

/// PostgreSQL-backed queue over the `aegis_jobs` table.
#[derive(Debug, Clone)]
pub struct BrokerQueue {
    pool: PgPool,
    max_connections: u32,
}

impl BrokerQueue {
    /// Connect with a fresh pool and ensure the schema exists.
    pub async fn connect(
        database_url: &str,
        config: &crate::config::DatabaseConfig,
    ) -> Result<Self, QueueError> {
        info!("🚀 Connecting broker queue to PostgreSQL");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(database_url)
            .await?;

        let broker = Self::new_with_pool(pool, config.max_connections);
        broker.ensure_schema().await?;
        info!("✅ Broker queue connected and schema verified");
        Ok(broker)
    }

    /// Wrap an existing pool (BYOP - Bring Your Own Pool).
    pub fn new_with_pool(pool: PgPool, max_connections: u32) -> Self {
        Self {
            pool,
            max_connections,
        }
    }

    /// Create the jobs table and claim indexes if they don't exist.
    pub async fn ensure_schema(&self) -> Result<(), QueueError> {
        debug!("📋 Ensuring aegis_jobs schema");
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aegis_jobs (
                id UUID PRIMARY KEY,
                tier TEXT NOT NULL,
                priority INTEGER NOT NULL,
                score BIGINT NOT NULL,
                seq BIGSERIAL,
                payload JSONB NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                ready_at TIMESTAMPTZ NOT NULL,
                max_retries INTEGER NOT NULL,
                retries_remaining INTEGER NOT NULL,
                stalled_count INTEGER NOT NULL DEFAULT 0,
                active_deadline TIMESTAMPTZ,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_aegis_jobs_claim \
             ON aegis_jobs (tier, score, seq) WHERE status = 'queued'",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_aegis_jobs_stalled \
             ON aegis_jobs (tier, active_deadline) WHERE status = 'active'",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fraction of the connection pool currently checked out, for the
    /// resilience layer's pool-utilization signal.
    pub fn pool_utilization(&self) -> f64 {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        let busy = size.saturating_sub(idle);
        if self.max_connections == 0 {
            return 0.0;
        }
        f64::from(busy) / f64::from(self.max_connections)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl QueueBackend for BrokerQueue {
    fn kind(&self) -> BackendKind {
        BackendKind::Broker
    }

    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let score = priority_score(job.priority, job.ready_at);
        sqlx::query(
            r#"
            INSERT INTO aegis_jobs
                (id, tier, priority, score, payload, status, created_at, ready_at,
                 max_retries, retries_remaining, stalled_count, last_error)
            VALUES ($1, $2, $3, $4, $5, 'queued', $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(job.id)
        .bind(job.tier.to_string())
        .bind(job.priority)
        .bind(score)
        .bind(&job.payload)
        .bind(job.created_at)
        .bind(job.ready_at)
        .bind(job.max_retries as i32)
        .bind(job.retries_remaining as i32)
        .bind(job.stalled_count as i32)
        .bind(&job.last_error)
        .execute(&self.pool)
        .await?;

        debug!(tier = %job.tier, job_id = %job.id, "📤 Job enqueued to broker");
        Ok(())
    }

    async fn dequeue(
        &self,
        tier: Tier,
        active_deadline: DateTime<Utc>,
    ) -> Result<Option<Job>, QueueError> {
        // Columns qualified with the update alias: next_job.id would make
        // an unqualified RETURNING list ambiguous
        let query = r#"
            WITH next_job AS (
                SELECT id FROM aegis_jobs
                WHERE tier = $1 AND status = 'queued' AND ready_at <= $2
                ORDER BY score, seq
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE aegis_jobs j
            SET status = 'active', active_deadline = $3
            FROM next_job
            WHERE j.id = next_job.id
            RETURNING j.id, j.tier, j.priority, j.payload, j.status, j.created_at,
                      j.ready_at, j.max_retries, j.retries_remaining, j.stalled_count,
                      j.last_error
            "#;

        let row = sqlx::query_as::<_, JobRow>(query)
            .bind(tier.to_string())
            .bind(Utc::now())
            .bind(active_deadline)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn complete(&self, tier: Tier, job_id: Uuid) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE aegis_jobs SET status = 'completed', active_deadline = NULL \
             WHERE id = $1 AND status = 'active'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound {
                id: job_id,
                queue: tier.queue_name(),
            });
        }
        Ok(())
    }

    async fn schedule_retry(&self, job: &Job) -> Result<(), QueueError> {
        let score = priority_score(job.priority, job.ready_at);
        let result = sqlx::query(
            r#"
            UPDATE aegis_jobs
            SET status = 'queued', ready_at = $2, score = $3,
                retries_remaining = $4, last_error = $5, active_deadline = NULL
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(job.id)
        .bind(job.ready_at)
        .bind(score)
        .bind(job.retries_remaining as i32)
        .bind(&job.last_error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound {
                id: job.id,
                queue: job.tier.queue_name(),
            });
        }
        Ok(())
    }

    async fn fail(&self, tier: Tier, job_id: Uuid, error: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE aegis_jobs SET status = 'dead_lettered', last_error = $2, \
             active_deadline = NULL WHERE id = $1 AND status = 'active'",
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound {
                id: job_id,
                queue: tier.queue_name(),
            });
        }
        warn!(tier = %tier, job_id = %job_id, "💀 Job dead-lettered on broker");
        Ok(())
    }

    async fn reclaim_stalled(
        &self,
        tier: Tier,
        now: DateTime<Utc>,
        max_stalled_count: u32,
    ) -> Result<Vec<ReclaimedJob>, QueueError> {
        let now_millis = now.timestamp_millis();

        // Within the stall budget: back to queued, immediately ready
        let requeue_query = format!(
            r#"
            UPDATE aegis_jobs
            SET status = 'queued', stalled_count = stalled_count + 1,
                ready_at = $2, score = priority::BIGINT * $3 + $4,
                active_deadline = NULL
            WHERE tier = $1 AND status = 'active' AND active_deadline < $2
              AND stalled_count + 1 <= $5
            RETURNING {JOB_COLUMNS}
            "#
        );
        let requeued = sqlx::query_as::<_, JobRow>(&requeue_query)
            .bind(tier.to_string())
            .bind(now)
            .bind(PRIORITY_WEIGHT)
            .bind(now_millis)
            .bind(max_stalled_count as i32)
            .fetch_all(&self.pool)
            .await?;

        // Budget exhausted: straight to the dead-letter state
        let dead_query = format!(
            r#"
            UPDATE aegis_jobs
            SET status = 'dead_lettered', stalled_count = stalled_count + 1,
                active_deadline = NULL
            WHERE tier = $1 AND status = 'active' AND active_deadline < $2
              AND stalled_count + 1 > $3
            RETURNING {JOB_COLUMNS}
            "#
        );
        let dead = sqlx::query_as::<_, JobRow>(&dead_query)
            .bind(tier.to_string())
            .bind(now)
            .bind(max_stalled_count as i32)
            .fetch_all(&self.pool)
            .await?;

        let mut reclaimed = Vec::with_capacity(requeued.len() + dead.len());
        for row in requeued {
            reclaimed.push(ReclaimedJob {
                job: Job::try_from(row)?,
                action: ReclaimAction::Requeued,
            });
        }
        for row in dead {
            reclaimed.push(ReclaimedJob {
                job: Job::try_from(row)?,
                action: ReclaimAction::DeadLettered,
            });
        }
        Ok(reclaimed)
    }

    async fn stats(&self, tier: Tier, now: DateTime<Utc>) -> Result<TierQueueStats, QueueError> {
        let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'queued' AND ready_at <= $2),
                COUNT(*) FILTER (WHERE status = 'active'),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'dead_lettered'),
                COUNT(*) FILTER (WHERE status = 'queued' AND ready_at > $2)
            FROM aegis_jobs WHERE tier = $1
            "#,
        )
        .bind(tier.to_string())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(TierQueueStats {
            waiting: row.0 as u64,
            active: row.1 as u64,
            completed: row.2 as u64,
            failed: row.3 as u64,
            delayed: row.4 as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::queue::job::JobOptions;
    use serde_json::json;

    async fn test_broker() -> Option<BrokerQueue> {
        let url = std::env::var("DATABASE_URL").ok()?;
        BrokerQueue::connect(&url, &DatabaseConfig::default()).await.ok()
    }

    fn test_job(tier: Tier, priority: i32) -> Job {
        let settings = crate::config::TierSettings::default();
        let mut job = Job::new(
            tier,
            json!({"source": "broker-test"}),
            settings.for_tier(tier),
            &JobOptions::default().with_priority(priority),
            Utc::now(),
        );
        job.backend = BackendKind::Broker;
        job
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL (DATABASE_URL)
    async fn test_broker_round_trip_preserves_ordering() {
        let Some(broker) = test_broker().await else {
            eprintln!("Skipping test - PostgreSQL test database not available");
            return;
        };

        let jobs: Vec<Job> = [3, 1, 2].iter().map(|p| test_job(Tier::Analytics, *p)).collect();
        for job in &jobs {
            broker.enqueue(job).await.unwrap();
        }

        let deadline = Utc::now() + chrono::Duration::seconds(60);
        let mut priorities = Vec::new();
        while let Some(job) = broker.dequeue(Tier::Analytics, deadline).await.unwrap() {
            priorities.push(job.priority);
            broker.complete(Tier::Analytics, job.id).await.unwrap();
        }
        assert_eq!(priorities, vec![1, 2, 3]);
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL (DATABASE_URL)
    async fn test_broker_stats_shape() {
        let Some(broker) = test_broker().await else {
            eprintln!("Skipping test - PostgreSQL test database not available");
            return;
        };
        let stats = broker.stats(Tier::Device, Utc::now()).await.unwrap();
        // Counters are cumulative in a shared test database; just exercise the query
        let _ = stats.waiting + stats.active + stats.completed + stats.failed + stats.delayed;
    }
}
