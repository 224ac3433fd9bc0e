//! Cross-run de-duplication in front of another dispatcher.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use super::{ActionDispatcher, DispatchError, DispatchOutcome};
use crate::detect::Action;
use crate::storage::{ledger, Pool};

/// Reserves each action's fingerprint in the `action_ledger` table before
/// handing it to `inner`. A fingerprint that fired within the cooldown is
/// skipped; a failed inner dispatch releases its reservation.
///
/// `now` is the run's clock: reservations and pruning are measured against it.
pub struct CooldownDispatcher<D> {
    inner: D,
    pool: Pool,
    cooldown: Duration,
    now: DateTime<Utc>,
}

impl<D: ActionDispatcher> CooldownDispatcher<D> {
    pub fn new(inner: D, pool: Pool, cooldown_hours: u32, now: DateTime<Utc>) -> Self {
        Self {
            inner,
            pool,
            cooldown: Duration::hours(i64::from(cooldown_hours)),
            now,
        }
    }

    async fn reserve(&self, fingerprint: &str) -> Result<bool, DispatchError> {
        let pool = self.pool.clone();
        let fingerprint = fingerprint.to_string();
        let (cooldown, now) = (self.cooldown, self.now);
        tokio::task::spawn_blocking(move || -> anyhow::Result<bool> {
            let mut conn = pool.get()?;
            ledger::reserve(&mut conn, &fingerprint, now, cooldown)
        })
        .await
        .map_err(|e| DispatchError::Ledger(e.to_string()))?
        .map_err(|e| DispatchError::Ledger(e.to_string()))
    }

    /// Drop ledger entries that can no longer suppress anything.
    pub async fn prune_expired(&self) -> anyhow::Result<usize> {
        let pool = self.pool.clone();
        let (cooldown, now) = (self.cooldown, self.now);
        tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
            let conn = pool.get()?;
            ledger::prune(&conn, now, cooldown)
        })
        .await?
    }

    async fn release(&self, fingerprint: &str) {
        let pool = self.pool.clone();
        let key = fingerprint.to_string();
        let result = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = pool.get()?;
            ledger::release(&conn, &key)
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(fingerprint, error = %e, "failed to release action reservation"),
            Err(e) => warn!(fingerprint, error = %e, "release task failed"),
        }
    }
}

#[async_trait]
impl<D: ActionDispatcher> ActionDispatcher for CooldownDispatcher<D> {
    async fn dispatch(&self, action: &Action) -> Result<DispatchOutcome, DispatchError> {
        let fingerprint = action.fingerprint();
        if !self.reserve(&fingerprint).await? {
            info!(fingerprint = %fingerprint, "action fired within cooldown, skipping");
            return Ok(DispatchOutcome::Skipped);
        }

        match self.inner.dispatch(action).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.release(&fingerprint).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{ActionKind, Priority};
    use crate::dispatch::testing::RecordingDispatcher;
    use crate::storage::open_pool;
    use chrono::TimeZone;

    fn action() -> Action {
        Action {
            kind: ActionKind::Issue,
            target: "deploy_failure".to_string(),
            reason: "recurring deploy_failure".to_string(),
            priority: Priority::High,
            payload: serde_json::Map::new(),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
    }

    fn pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(dir.path().join("vigil.db").to_str().unwrap()).unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn test_second_dispatch_within_cooldown_is_skipped() {
        let (_dir, pool) = pool();
        let dispatcher = CooldownDispatcher::new(RecordingDispatcher::default(), pool, 24, t0());

        assert_eq!(dispatcher.dispatch(&action()).await.unwrap(), DispatchOutcome::Sent);
        assert_eq!(dispatcher.dispatch(&action()).await.unwrap(), DispatchOutcome::Skipped);
        assert_eq!(dispatcher.inner.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_dispatch_is_retried_next_time() {
        let (_dir, pool) = pool();
        let failing = CooldownDispatcher::new(RecordingDispatcher::failing(), pool.clone(), 24, t0());
        assert!(failing.dispatch(&action()).await.is_err());

        let working = CooldownDispatcher::new(RecordingDispatcher::default(), pool, 24, t0());
        assert_eq!(working.dispatch(&action()).await.unwrap(), DispatchOutcome::Sent);
    }

    #[tokio::test]
    async fn test_prune_keeps_fresh_entries() {
        let (_dir, pool) = pool();
        let dispatcher = CooldownDispatcher::new(RecordingDispatcher::default(), pool, 24, t0());
        dispatcher.dispatch(&action()).await.unwrap();
        assert_eq!(dispatcher.prune_expired().await.unwrap(), 0);
        assert_eq!(dispatcher.dispatch(&action()).await.unwrap(), DispatchOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_zero_cooldown_always_fires() {
        let (_dir, pool) = pool();
        let dispatcher = CooldownDispatcher::new(RecordingDispatcher::default(), pool, 0, t0());
        dispatcher.dispatch(&action()).await.unwrap();
        dispatcher.dispatch(&action()).await.unwrap();
        assert_eq!(dispatcher.inner.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_cooldown_is_measured_from_the_run_clock() {
        let (_dir, pool) = pool();
        let first = CooldownDispatcher::new(RecordingDispatcher::default(), pool.clone(), 24, t0());
        assert_eq!(first.dispatch(&action()).await.unwrap(), DispatchOutcome::Sent);

        let same_day = CooldownDispatcher::new(RecordingDispatcher::default(), pool.clone(), 24, t0() + Duration::hours(23));
        assert_eq!(same_day.dispatch(&action()).await.unwrap(), DispatchOutcome::Skipped);

        let next_day = CooldownDispatcher::new(RecordingDispatcher::default(), pool, 24, t0() + Duration::hours(25));
        assert_eq!(next_day.prune_expired().await.unwrap(), 1);
        assert_eq!(next_day.dispatch(&action()).await.unwrap(), DispatchOutcome::Sent);
        assert_eq!(next_day.inner.sent().len(), 1);
    }
}
