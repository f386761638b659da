//! Token revocation and delayed cleanup
//!
//! Revoking a token inserts a `{token id, expiry}` record into the
//! [`RevocationStore`]. The record must outlive the token, so the
//! [`CleanupScheduler`] deletes it only once `expiry + grace` has passed.
//!
//! The scheduler is a single background task driving a timer queue; callers
//! hand it work over a channel and never wait for deletions. Scheduled
//! deletions are not persisted: on startup, [`CleanupScheduler::run_startup_sweep`]
//! re-arms one for every record still in the store.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use taskd_store::{RevocationStore, StoreError};
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tokio_util::{
    sync::CancellationToken,
    time::{DelayQueue, delay_queue},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{AuthError, Result},
    jwt::Claims,
    metrics::AuthMetrics,
};

/// Why a token was revoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    /// Refresh token spent to mint a new pair
    Refresh,
    /// Explicit logout
    Logout,
}

impl RevocationReason {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Refresh => "refresh",
            RevocationReason::Logout => "logout",
        }
    }
}

/// Longest delay handed to the timer queue in one go
///
/// `DelayQueue` rejects deadlines beyond roughly 2.2 years. Later deadlines
/// are armed in steps of this size and re-armed until they are due.
const MAX_QUEUE_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug)]
struct ScheduleCommand {
    token_id: Uuid,
    delay: Duration,
}

/// Deletes revocation records once their grace period has elapsed
pub struct CleanupScheduler {
    tx: mpsc::UnboundedSender<ScheduleCommand>,
    store: Arc<dyn RevocationStore>,
    grace: Duration,
    cancel: CancellationToken,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CleanupScheduler {
    /// Spawn the cleanup task on the current runtime
    pub fn start(
        store: Arc<dyn RevocationStore>,
        grace: Duration,
        metrics: Option<Arc<AuthMetrics>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_cleanup_loop(rx, Arc::clone(&store), cancel.clone(), metrics));

        Self { tx, store, grace, cancel, handle: tokio::sync::Mutex::new(Some(handle)) }
    }

    /// Grace period added to each token's expiry
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Arrange for a record to be deleted at `expires_at + grace`
    ///
    /// If that moment has already passed the deletion runs right away.
    /// Scheduling the same token again replaces the earlier deadline.
    ///
    /// # Errors
    ///
    /// `SchedulerUnavailable` if the cleanup task has stopped.
    pub fn schedule(&self, token_id: Uuid, expires_at: DateTime<Utc>) -> Result<()> {
        let delay = self.delay_until_due(expires_at, Utc::now());
        self.tx
            .send(ScheduleCommand { token_id, delay })
            .map_err(|_| AuthError::SchedulerUnavailable)?;

        debug!(token_id = %token_id, delay_secs = delay.as_secs(), "Scheduled revocation cleanup");
        Ok(())
    }

    fn delay_until_due(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        let grace = chrono::Duration::from_std(self.grace).unwrap_or(chrono::Duration::MAX);
        let due = expires_at.checked_add_signed(grace).unwrap_or(DateTime::<Utc>::MAX_UTC);
        (due - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Re-arm cleanup for every record in the store
    ///
    /// Returns how many records were scheduled.
    pub async fn run_startup_sweep(&self) -> Result<usize> {
        let records =
            self.store.list_all().await.map_err(|e| AuthError::Store(e.to_string()))?;

        for record in &records {
            self.schedule(record.token_id, record.expires_at)?;
        }

        info!(records = records.len(), "Revocation cleanup sweep scheduled pending records");
        Ok(records.len())
    }

    /// Stop the cleanup task and wait for it to exit
    ///
    /// Pending deletions are dropped; the next startup sweep re-arms them.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().await.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Revocation cleanup task ended abnormally");
        }
    }
}

struct PendingCleanup {
    key: delay_queue::Key,
    /// `None` when the deadline is too far out to represent
    due: Option<Instant>,
}

impl PendingCleanup {
    fn remaining(&self, now: Instant) -> Duration {
        match self.due {
            Some(due) => due.saturating_duration_since(now),
            None => MAX_QUEUE_DELAY,
        }
    }
}

async fn run_cleanup_loop(
    mut rx: mpsc::UnboundedReceiver<ScheduleCommand>,
    store: Arc<dyn RevocationStore>,
    cancel: CancellationToken,
    metrics: Option<Arc<AuthMetrics>>,
) {
    let mut queue: DelayQueue<Uuid> = DelayQueue::new();
    let mut pending: HashMap<Uuid, PendingCleanup> = HashMap::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            command = rx.recv() => {
                let Some(ScheduleCommand { token_id, delay }) = command else { break };
                let due = Instant::now().checked_add(delay);
                let step = delay.min(MAX_QUEUE_DELAY);
                match pending.get_mut(&token_id) {
                    Some(entry) => {
                        queue.reset(&entry.key, step);
                        entry.due = due;
                    },
                    None => {
                        let key = queue.insert(token_id, step);
                        pending.insert(token_id, PendingCleanup { key, due });
                    },
                }
            },

            Some(expired) = queue.next() => {
                let token_id = expired.into_inner();
                let remaining = pending.get(&token_id).map(|e| e.remaining(Instant::now()));
                match remaining {
                    Some(rest) if !rest.is_zero() => {
                        let key = queue.insert(token_id, rest.min(MAX_QUEUE_DELAY));
                        if let Some(entry) = pending.get_mut(&token_id) {
                            entry.key = key;
                        }
                        debug!(token_id = %token_id, remaining_secs = rest.as_secs(), "Re-armed revocation cleanup");
                    },
                    _ => {
                        pending.remove(&token_id);
                        purge(store.as_ref(), token_id, metrics.as_deref()).await;
                    },
                }
            },
        }
    }

    debug!(pending = pending.len(), "Revocation cleanup task stopped");
}

async fn purge(store: &dyn RevocationStore, token_id: Uuid, metrics: Option<&AuthMetrics>) {
    match store.delete(token_id).await {
        Ok(()) => {
            debug!(token_id = %token_id, "Deleted expired revocation record");
            if let Some(m) = metrics {
                m.record_cleanup(true);
            }
        },
        Err(e) => {
            // only costs storage: the token itself is already expired
            warn!(token_id = %token_id, error = %e, "Failed to delete revocation record");
            if let Some(m) = metrics {
                m.record_cleanup(false);
            }
        },
    }
}

/// Records revocations and arranges their cleanup
pub struct Revoker {
    store: Arc<dyn RevocationStore>,
    scheduler: Arc<CleanupScheduler>,
    metrics: Option<Arc<AuthMetrics>>,
}

impl Revoker {
    /// Create a revoker writing to `store`
    pub fn new(
        store: Arc<dyn RevocationStore>,
        scheduler: Arc<CleanupScheduler>,
        metrics: Option<Arc<AuthMetrics>>,
    ) -> Self {
        Self { store, scheduler, metrics }
    }

    /// Revoke a token until its natural expiry
    ///
    /// A failure to schedule cleanup is logged and otherwise ignored.
    ///
    /// # Errors
    ///
    /// - `AlreadyRevoked` if another caller revoked the token first
    /// - `Store` if the record could not be written
    pub async fn revoke(
        &self,
        token_id: Uuid,
        expires_at: DateTime<Utc>,
        reason: RevocationReason,
    ) -> Result<()> {
        match self.store.insert(token_id, expires_at).await {
            Ok(()) => {},
            Err(StoreError::Conflict(_)) => return Err(AuthError::AlreadyRevoked),
            Err(e) => return Err(AuthError::Store(e.to_string())),
        }

        if let Some(m) = &self.metrics {
            m.record_revocation(reason.as_str());
        }
        info!(token_id = %token_id, reason = reason.as_str(), "Token revoked");

        if let Err(e) = self.scheduler.schedule(token_id, expires_at) {
            warn!(token_id = %token_id, error = %e, "Failed to schedule revocation cleanup");
        }

        Ok(())
    }

    /// Revoke the token described by validated claims
    pub async fn revoke_claims(&self, claims: &Claims, reason: RevocationReason) -> Result<()> {
        self.revoke(claims.jti, claims.expires_at(), reason).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use taskd_store::{MemoryBackend, RevokedToken, StoreResult};

    use super::*;

    const GRACE: Duration = Duration::from_secs(120);

    fn scheduler(store: Arc<MemoryBackend>) -> Arc<CleanupScheduler> {
        Arc::new(CleanupScheduler::start(store, GRACE, None))
    }

    #[tokio::test(start_paused = true)]
    async fn test_deletes_after_expiry_plus_grace() {
        let store = Arc::new(MemoryBackend::new());
        let scheduler = scheduler(store.clone());
        let token_id = Uuid::new_v4();

        store.insert(token_id, Utc::now() + ChronoDuration::seconds(60)).await.unwrap();
        scheduler.schedule(token_id, Utc::now() + ChronoDuration::seconds(60)).unwrap();

        // past expiry, still inside the grace period
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert!(store.exists(token_id).await.unwrap());

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(!store.exists(token_id).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_record_deleted_immediately() {
        let store = Arc::new(MemoryBackend::new());
        let scheduler = scheduler(store.clone());
        let token_id = Uuid::new_v4();
        let long_ago = Utc::now() - ChronoDuration::hours(3);

        store.insert(token_id, long_ago).await.unwrap();
        scheduler.schedule(token_id, long_ago).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!store.exists(token_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delay_computation() {
        let store = Arc::new(MemoryBackend::new());
        let scheduler = scheduler(store);
        let now = Utc::now();

        assert_eq!(scheduler.delay_until_due(now, now), GRACE);
        assert_eq!(
            scheduler.delay_until_due(now + ChronoDuration::seconds(30), now),
            GRACE + Duration::from_secs(30)
        );
        assert_eq!(scheduler.delay_until_due(now - ChronoDuration::hours(1), now), Duration::ZERO);
        // within grace: only the remainder is waited
        assert_eq!(
            scheduler.delay_until_due(now - ChronoDuration::seconds(100), now),
            Duration::from_secs(20)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_sweep_rearms_all_records() {
        let store = Arc::new(MemoryBackend::new());
        let expired = Uuid::new_v4();
        let pending = Uuid::new_v4();

        store.insert(expired, Utc::now() - ChronoDuration::hours(1)).await.unwrap();
        store.insert(pending, Utc::now() + ChronoDuration::hours(1)).await.unwrap();

        let scheduler = scheduler(store.clone());
        assert_eq!(scheduler.run_startup_sweep().await.unwrap(), 2);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!store.exists(expired).await.unwrap());
        assert!(store.exists(pending).await.unwrap());

        tokio::time::sleep(Duration::from_secs(3600) + GRACE + Duration::from_secs(1)).await;
        assert!(!store.exists(pending).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_beyond_queue_limit() {
        let store = Arc::new(MemoryBackend::new());
        let scheduler = scheduler(store.clone());
        let long_lived = Uuid::new_v4();
        let overdue = Uuid::new_v4();
        let three_years = Utc::now() + ChronoDuration::days(3 * 365);
        let long_ago = Utc::now() - ChronoDuration::hours(1);

        store.insert(long_lived, three_years).await.unwrap();
        scheduler.schedule(long_lived, three_years).unwrap();
        store.insert(overdue, long_ago).await.unwrap();
        scheduler.schedule(overdue, long_ago).unwrap();

        // the cleanup task is still alive and serving other records
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!store.exists(overdue).await.unwrap());
        assert!(store.exists(long_lived).await.unwrap());

        // first queue step fires after a year; the record is not due yet
        tokio::time::sleep(MAX_QUEUE_DELAY + Duration::from_secs(60)).await;
        assert!(store.exists(long_lived).await.unwrap());

        tokio::time::sleep(Duration::from_secs(2 * 365 * 24 * 60 * 60) + GRACE).await;
        assert!(!store.exists(long_lived).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_deadline() {
        let store = Arc::new(MemoryBackend::new());
        let scheduler = scheduler(store.clone());
        let token_id = Uuid::new_v4();
        let soon = Utc::now();

        store.insert(token_id, soon).await.unwrap();
        scheduler.schedule(token_id, soon).unwrap();
        scheduler.schedule(token_id, soon + ChronoDuration::hours(1)).unwrap();

        tokio::time::sleep(GRACE + Duration::from_secs(1)).await;
        assert!(store.exists(token_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_schedule_after_shutdown_fails() {
        let store = Arc::new(MemoryBackend::new());
        let scheduler = scheduler(store);
        scheduler.shutdown().await;

        let result = scheduler.schedule(Uuid::new_v4(), Utc::now());
        assert!(matches!(result, Err(AuthError::SchedulerUnavailable)));

        // shutting down twice is harmless
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_revoker_records_and_rejects_double_spend() {
        let store = Arc::new(MemoryBackend::new());
        let revoker = Revoker::new(store.clone(), scheduler(store.clone()), None);
        let token_id = Uuid::new_v4();
        let expiry = Utc::now() + ChronoDuration::hours(24);

        revoker.revoke(token_id, expiry, RevocationReason::Refresh).await.unwrap();
        assert!(store.exists(token_id).await.unwrap());

        let second = revoker.revoke(token_id, expiry, RevocationReason::Refresh).await;
        assert!(matches!(second, Err(AuthError::AlreadyRevoked)));
    }

    #[tokio::test]
    async fn test_revoker_survives_stopped_scheduler() {
        let store = Arc::new(MemoryBackend::new());
        let scheduler = scheduler(store.clone());
        scheduler.shutdown().await;
        let revoker = Revoker::new(store.clone(), scheduler, None);

        let token_id = Uuid::new_v4();
        revoker
            .revoke(token_id, Utc::now() + ChronoDuration::hours(1), RevocationReason::Logout)
            .await
            .unwrap();
        assert!(store.exists(token_id).await.unwrap());
    }

    struct FailingStore;

    #[async_trait]
    impl RevocationStore for FailingStore {
        async fn insert(&self, _: Uuid, _: DateTime<Utc>) -> StoreResult<()> {
            Err(StoreError::Backend("connection refused".into()))
        }

        async fn exists(&self, _: Uuid) -> StoreResult<bool> {
            Err(StoreError::Backend("connection refused".into()))
        }

        async fn delete(&self, _: Uuid) -> StoreResult<()> {
            Err(StoreError::Backend("connection refused".into()))
        }

        async fn list_all(&self) -> StoreResult<Vec<RevokedToken>> {
            Err(StoreError::Backend("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failures_surface_as_store_errors() {
        let store: Arc<dyn RevocationStore> = Arc::new(FailingStore);
        let scheduler = Arc::new(CleanupScheduler::start(store.clone(), GRACE, None));
        let revoker = Revoker::new(store, scheduler.clone(), None);

        let result =
            revoker.revoke(Uuid::new_v4(), Utc::now(), RevocationReason::Logout).await;
        assert!(matches!(result, Err(AuthError::Store(_))));
        assert!(matches!(scheduler.run_startup_sweep().await, Err(AuthError::Store(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cleanup_is_counted_not_fatal() {
        let registry = prometheus::Registry::new();
        let metrics = Arc::new(AuthMetrics::new(&registry).unwrap());
        let store: Arc<dyn RevocationStore> = Arc::new(FailingStore);
        let scheduler = CleanupScheduler::start(store, GRACE, Some(metrics.clone()));

        scheduler.schedule(Uuid::new_v4(), Utc::now() - ChronoDuration::hours(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(metrics.cleanup_total.with_label_values(&["failed"]).get(), 1);
        // task is still alive
        assert!(scheduler.schedule(Uuid::new_v4(), Utc::now()).is_ok());
    }
}
