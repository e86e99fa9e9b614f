use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::EngineError;

/// A held office lock: who holds it and when it lapses on its own.
#[derive(Debug, Clone, Copy)]
struct Lease {
    token: Ulid,
    expires_at: Instant,
}

/// Per-office mutual exclusion with bounded wait and bounded hold.
///
/// Each office id maps to at most one lease. A lease that outlives its hold
/// duration is treated as abandoned and may be taken over by the next caller,
/// so a stuck holder cannot wedge an office forever. Distinct offices never
/// contend: leases live in a sharded map keyed by office id.
#[derive(Default)]
pub struct LockManager {
    leases: DashMap<Ulid, Lease>,
    /// Wakes waiters when a lease on the office is released or purged.
    released: DashMap<Ulid, Arc<Notify>>,
}

/// Releases its lease on drop, on every exit path.
#[must_use = "the lease is released as soon as the guard is dropped"]
pub struct LeaseGuard<'a> {
    manager: &'a LockManager,
    office_id: Ulid,
    token: Ulid,
}

impl LeaseGuard<'_> {
    pub fn office_id(&self) -> Ulid {
        self.office_id
    }

    /// False once the hold duration has lapsed and another caller may have taken over.
    pub fn is_current(&self) -> bool {
        self.manager
            .leases
            .get(&self.office_id)
            .is_some_and(|l| l.token == self.token && l.expires_at > Instant::now())
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(self.office_id, self.token);
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lease for `office_id`, waiting at most `max_wait`.
    pub async fn acquire(
        &self,
        office_id: Ulid,
        max_hold: Duration,
        max_wait: Duration,
    ) -> Result<LeaseGuard<'_>, EngineError> {
        let started = Instant::now();
        let deadline = started + max_wait;
        let notify = self.waker(office_id);

        loop {
            // Register interest before looking, so a release between the
            // check and the wait still wakes us.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = Instant::now();
            match self.try_claim(office_id, max_hold, now) {
                Ok(token) => {
                    metrics::histogram!(crate::observability::LOCK_WAIT_SECONDS)
                        .record(started.elapsed().as_secs_f64());
                    return Ok(LeaseGuard {
                        manager: self,
                        office_id,
                        token,
                    });
                }
                Err(held_until) => {
                    if now >= deadline {
                        metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                        warn!("lock wait timeout on office {office_id} after {:?}", started.elapsed());
                        return Err(EngineError::LockWaitTimeout {
                            office_id,
                            waited: started.elapsed(),
                        });
                    }
                    let wake_at = held_until.min(deadline);
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(wake_at) => {}
                    }
                }
            }
        }
    }

    /// Run `critical` while holding the office lease. The lease is released
    /// when `critical` finishes, fails, panics or is dropped.
    pub async fn with_lock<F, T>(
        &self,
        office_id: Ulid,
        max_hold: Duration,
        max_wait: Duration,
        critical: F,
    ) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        let guard = self.acquire(office_id, max_hold, max_wait).await?;
        let result = critical.await;
        if !guard.is_current() {
            warn!("critical section on office {office_id} outlived its lease");
        }
        drop(guard);
        result
    }

    pub fn is_held(&self, office_id: &Ulid) -> bool {
        self.leases
            .get(office_id)
            .is_some_and(|l| l.expires_at > Instant::now())
    }

    /// Drop leases that lapsed without being released and wake their waiters.
    /// Returns how many were purged.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let expired: Vec<Ulid> = self
            .leases
            .iter()
            .filter(|e| e.value().expires_at <= now)
            .map(|e| *e.key())
            .collect();
        let mut purged = 0;
        for office_id in expired {
            if self
                .leases
                .remove_if(&office_id, |_, l| l.expires_at <= now)
                .is_some()
            {
                purged += 1;
                self.wake(&office_id);
            }
        }
        purged
    }

    /// Atomically take the lease if free or lapsed. On failure returns when
    /// the current lease lapses.
    fn try_claim(&self, office_id: Ulid, max_hold: Duration, now: Instant) -> Result<Ulid, Instant> {
        let lease = Lease {
            token: Ulid::new(),
            expires_at: now + max_hold,
        };
        match self.leases.entry(office_id) {
            Entry::Vacant(slot) => {
                slot.insert(lease);
                Ok(lease.token)
            }
            Entry::Occupied(mut slot) => {
                if slot.get().expires_at <= now {
                    warn!("lease on office {office_id} lapsed without release, taking over");
                    slot.insert(lease);
                    Ok(lease.token)
                } else {
                    Err(slot.get().expires_at)
                }
            }
        }
    }

    /// Release only if `token` still owns the lease; a holder whose lease
    /// lapsed and was taken over must not free the new holder's lease.
    fn release(&self, office_id: Ulid, token: Ulid) {
        if self
            .leases
            .remove_if(&office_id, |_, l| l.token == token)
            .is_some()
        {
            self.wake(&office_id);
        } else {
            debug!("stale lease release on office {office_id} ignored");
        }
    }

    fn waker(&self, office_id: Ulid) -> Arc<Notify> {
        self.released
            .entry(office_id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .value()
            .clone()
    }

    /// Wake waiters, then drop the office's `Notify` once nobody else holds it.
    fn wake(&self, office_id: &Ulid) {
        if let Some(notify) = self.released.get(office_id) {
            notify.notify_waiters();
        }
        self.released
            .remove_if(office_id, |_, notify| Arc::strong_count(notify) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HOLD: Duration = Duration::from_secs(10);
    const WAIT: Duration = Duration::from_secs(3);

    #[tokio::test]
    async fn acquire_and_release() {
        let locks = LockManager::new();
        let office = Ulid::new();
        {
            let guard = locks.acquire(office, HOLD, WAIT).await.unwrap();
            assert_eq!(guard.office_id(), office);
            assert!(guard.is_current());
            assert!(locks.is_held(&office));
        }
        assert!(!locks.is_held(&office));
    }

    #[tokio::test]
    async fn distinct_offices_do_not_contend() {
        let locks = LockManager::new();
        let _a = locks.acquire(Ulid::new(), HOLD, WAIT).await.unwrap();
        let b = locks.acquire(Ulid::new(), HOLD, Duration::ZERO).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn second_caller_times_out_while_first_completes() {
        let locks = Arc::new(LockManager::new());
        let office = Ulid::new();
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();

        let first = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .with_lock(office, HOLD, WAIT, async {
                        let _ = entered_tx.send(());
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        Ok::<_, EngineError>("first done")
                    })
                    .await
            })
        };

        entered_rx.await.unwrap();
        let second = locks
            .with_lock(office, HOLD, Duration::from_millis(50), async { Ok::<_, EngineError>("second") })
            .await;
        match second {
            Err(EngineError::LockWaitTimeout { office_id, waited }) => {
                assert_eq!(office_id, office);
                assert!(waited >= Duration::from_millis(50));
            }
            other => panic!("expected LockWaitTimeout, got {other:?}"),
        }

        assert_eq!(first.await.unwrap().unwrap(), "first done");
        assert!(!locks.is_held(&office));
        // Free again after the first holder released.
        assert!(locks.acquire(office, HOLD, Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn waiter_gets_lock_after_release() {
        let locks = Arc::new(LockManager::new());
        let office = Ulid::new();
        let guard = locks.acquire(office, HOLD, WAIT).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let _g = locks.acquire(office, HOLD, WAIT).await.unwrap();
                started.elapsed()
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);
        let waited = waiter.await.unwrap();
        assert!(waited < WAIT);
    }

    #[tokio::test]
    async fn lapsed_lease_is_taken_over() {
        let locks = LockManager::new();
        let office = Ulid::new();
        let stale = locks
            .acquire(office, Duration::from_millis(30), WAIT)
            .await
            .unwrap();

        // Never released, but the hold lapses.
        let fresh = locks.acquire(office, HOLD, WAIT).await.unwrap();
        assert!(!stale.is_current());
        assert!(fresh.is_current());

        // The stale holder releasing must not free the new lease.
        drop(stale);
        assert!(locks.is_held(&office));
        drop(fresh);
        assert!(!locks.is_held(&office));
    }

    #[tokio::test]
    async fn lease_released_on_error_path() {
        let locks = LockManager::new();
        let office = Ulid::new();
        let result: Result<(), EngineError> = locks
            .with_lock(office, HOLD, WAIT, async { Err(EngineError::Persistence("disk full".into())) })
            .await;
        assert!(matches!(result, Err(EngineError::Persistence(_))));
        assert!(!locks.is_held(&office));
    }

    #[tokio::test]
    async fn critical_sections_never_overlap() {
        let locks = Arc::new(LockManager::new());
        let office = Ulid::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                locks
                    .with_lock(office, HOLD, Duration::from_secs(10), async {
                        let n = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(n, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, EngineError>(())
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wakers_do_not_outlive_their_waiters() {
        let locks = Arc::new(LockManager::new());
        let office = Ulid::new();
        let guard = locks.acquire(office, HOLD, WAIT).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(office, HOLD, WAIT).await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        waiter.await.unwrap();
        assert!(locks.released.is_empty());

        for _ in 0..10 {
            drop(locks.acquire(Ulid::new(), HOLD, WAIT).await.unwrap());
        }
        assert!(locks.released.is_empty());
    }

    #[tokio::test]
    async fn purge_expired_leases() {
        let locks = LockManager::new();
        let office = Ulid::new();
        let guard = locks
            .acquire(office, Duration::from_millis(10), WAIT)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(locks.purge_expired(Instant::now()), 1);
        assert!(!locks.is_held(&office));
        drop(guard); // stale, no-op
        assert_eq!(locks.purge_expired(Instant::now()), 0);
    }
}
