//! Background maintenance loops: a DB health probe, an external-catalog
//! cache-invalidation hook, session/refresh-token garbage collection, and a
//! full ledger-chain audit. Modeled on the spawn-interval-abort shape the
//! grounding pack's rendezvous manager uses for its own cleanup task, with
//! each job guarded by a `pg_try_advisory_lock` so only one deployed
//! instance runs it at a time.

use chrono::{Duration, Utc};
use handreceipt_adapters::OcrService;
use handreceipt_core::repository::Repository;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

const LOCK_HEALTH_PROBE: i64 = 913_001;
const LOCK_CATALOG_CACHE: i64 = 913_002;
const LOCK_SESSION_GC: i64 = 913_003;
const LOCK_LEDGER_AUDIT: i64 = 913_004;

pub struct Scheduler {
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawns all maintenance loops. `ocr` is only consulted for the
    /// catalog-cache-invalidation hook, which has no domain logic of its
    /// own in this core — it exists so the job table in spec §4.8 has a
    /// call site even though NSN-catalog refresh itself is out of scope.
    pub fn start(repository: Arc<dyn Repository>, pool: PgPool, ocr: Arc<dyn OcrService>) -> Self {
        let handles = vec![
            spawn_health_probe(repository.clone(), pool.clone()),
            spawn_catalog_cache_invalidation(pool.clone(), ocr),
            spawn_session_gc(repository.clone(), pool.clone()),
            spawn_ledger_audit(repository, pool),
        ];
        Self { handles }
    }

    pub fn shutdown(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Attempts `pg_try_advisory_lock(key)`, runs `work` if acquired, then
/// releases it. Returns without running `work` if another instance holds
/// the lock.
async fn with_advisory_lock<F, Fut>(pool: &PgPool, key: i64, work: F)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let acquired: Result<bool, sqlx::Error> = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
        .bind(key)
        .fetch_one(pool)
        .await;
    match acquired {
        Ok(true) => {
            work().await;
            let _: Result<bool, sqlx::Error> = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
                .bind(key)
                .fetch_one(pool)
                .await;
        }
        Ok(false) => tracing::debug!(key, "scheduler: lock held by another instance, skipping"),
        Err(err) => tracing::error!(err = %err, key, "scheduler: failed to acquire advisory lock"),
    }
}

fn spawn_health_probe(repository: Arc<dyn Repository>, pool: PgPool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(StdDuration::from_secs(300));
        loop {
            ticker.tick().await;
            with_advisory_lock(&pool, LOCK_HEALTH_PROBE, || async {
                match repository.ledger_verify(1, 1).await {
                    Ok(_) => tracing::debug!("scheduler: database health probe ok"),
                    Err(err) => tracing::error!(err = %err, "scheduler: database health probe failed"),
                }
            })
            .await;
        }
    })
}

fn spawn_catalog_cache_invalidation(pool: PgPool, ocr: Arc<dyn OcrService>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(StdDuration::from_secs(6 * 3600));
        loop {
            ticker.tick().await;
            with_advisory_lock(&pool, LOCK_CATALOG_CACHE, || async {
                let _ = &ocr;
                tracing::debug!("scheduler: external catalog cache invalidation hook fired (no-op)");
            })
            .await;
        }
    })
}

fn spawn_session_gc(repository: Arc<dyn Repository>, pool: PgPool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + next_daily_delay(1, 0), StdDuration::from_secs(86_400));
        loop {
            ticker.tick().await;
            with_advisory_lock(&pool, LOCK_SESSION_GC, || async {
                let cutoff = Utc::now() - Duration::days(30);
                match repository.delete_sessions_older_than(cutoff).await {
                    Ok(count) => tracing::info!(count, "scheduler: expired sessions purged"),
                    Err(err) => tracing::error!(err = %err, "scheduler: session GC failed"),
                }
            })
            .await;
        }
    })
}

fn spawn_ledger_audit(repository: Arc<dyn Repository>, pool: PgPool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + next_daily_delay(2, 0), StdDuration::from_secs(86_400));
        loop {
            ticker.tick().await;
            with_advisory_lock(&pool, LOCK_LEDGER_AUDIT, || async {
                match repository.ledger_verify(1, i64::MAX).await {
                    Ok(report) if report.ok => tracing::info!("scheduler: ledger audit clean"),
                    Ok(report) => tracing::error!(
                        broken_at = ?report.first_broken_at,
                        "scheduler: ledger chain integrity broken"
                    ),
                    Err(err) => tracing::error!(err = %err, "scheduler: ledger audit failed"),
                }
            })
            .await;
        }
    })
}

/// Delay until the next occurrence of `hour:minute` UTC. The subsequent
/// period is a fixed 24h, so drift accumulates only across DST-free UTC
/// days — acceptable for a maintenance job with no hard deadline.
fn next_daily_delay(hour: u32, minute: u32) -> StdDuration {
    let now = Utc::now();
    let mut target = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .expect("valid hour/minute")
        .and_utc();
    if target <= now {
        target += Duration::days(1);
    }
    (target - now).to_std().unwrap_or(StdDuration::from_secs(86_400))
}
