/*!
 * Bounded worker pool with priority-aware slot acquisition.
 *
 * One slot is held per in-flight translation request. Waiters queue in two
 * classes: priority media always acquires before normal media, FIFO within
 * each class. The pool can be resized at runtime; shrinking applies to
 * future acquires while in-flight work completes normally. Cancellation is
 * cooperative through per-request tokens registered here.
 */

use log::{debug, info};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;

use crate::database::MediaKind;
use crate::errors::TranslationError;

/// Limits for the configurable pool size
pub const MIN_WORKERS: usize = 1;
/// Upper bound of the configurable pool size
pub const MAX_WORKERS: usize = 20;

struct Waiter {
    request_id: i64,
    media_kind: MediaKind,
    media_id: i64,
    priority: bool,
    grant: oneshot::Sender<()>,
}

struct PoolState {
    max_workers: usize,
    in_use: usize,
    /// Priority waiters first (FIFO), then normal waiters (FIFO)
    waiters: VecDeque<Waiter>,
}

impl PoolState {
    /// Index where a newly arriving waiter of the given class goes
    fn insert_index(&self, priority: bool) -> usize {
        if priority {
            self.waiters
                .iter()
                .position(|w| !w.priority)
                .unwrap_or(self.waiters.len())
        } else {
            self.waiters.len()
        }
    }

    /// Hand the slot to the next waiter; returns false when nobody took it
    fn grant_next(&mut self) -> bool {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.grant.send(()).is_ok() {
                debug!("Slot granted to request {}", waiter.request_id);
                return true;
            }
            // Receiver vanished (cancelled while queued); try the next one
        }
        false
    }
}

/// Slot pool shared by all translation workers
pub struct WorkerPool {
    state: Mutex<PoolState>,
    dispatch_signal: Notify,
    cancellations: Mutex<HashMap<i64, CancellationToken>>,
}

/// RAII slot handle; releasing is guaranteed on every exit path
pub struct WorkerPermit {
    pool: Arc<WorkerPool>,
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        self.pool.release();
    }
}

impl WorkerPool {
    /// Create a pool with the given size, clamped to the valid range
    pub fn new(max_workers: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PoolState {
                max_workers: max_workers.clamp(MIN_WORKERS, MAX_WORKERS),
                in_use: 0,
                waiters: VecDeque::new(),
            }),
            dispatch_signal: Notify::new(),
            cancellations: Mutex::new(HashMap::new()),
        })
    }

    /// Acquire a slot, blocking until one frees up. Priority is the value
    /// read from the media row at call time; a later flip while waiting is
    /// applied through `notify_priority_changed`.
    pub async fn acquire(
        self: &Arc<Self>,
        request_id: i64,
        media_kind: MediaKind,
        media_id: i64,
        priority: bool,
        token: &CancellationToken,
    ) -> Result<WorkerPermit, TranslationError> {
        let receiver = {
            let mut state = self.state.lock();
            if state.in_use < state.max_workers {
                state.in_use += 1;
                return Ok(WorkerPermit { pool: self.clone() });
            }

            let (grant, receiver) = oneshot::channel();
            let index = state.insert_index(priority);
            state.waiters.insert(
                index,
                Waiter {
                    request_id,
                    media_kind,
                    media_id,
                    priority,
                    grant,
                },
            );
            receiver
        };

        tokio::select! {
            granted = receiver => {
                match granted {
                    Ok(()) => Ok(WorkerPermit { pool: self.clone() }),
                    // The pool never drops a queued sender except on grant,
                    // so this only happens on shutdown
                    Err(_) => Err(TranslationError::Cancelled),
                }
            }
            _ = token.cancelled() => {
                self.remove_waiter(request_id);
                Err(TranslationError::Cancelled)
            }
        }
    }

    /// Drop a queued waiter after its request was cancelled. If the grant
    /// raced ahead the slot is handed back.
    fn remove_waiter(&self, request_id: i64) {
        let mut state = self.state.lock();
        let before = state.waiters.len();
        state.waiters.retain(|w| w.request_id != request_id);
        if state.waiters.len() == before {
            // Not queued anymore: the grant fired concurrently and the
            // receiver was dropped by select. Pass the slot on.
            if !state.grant_next() && state.in_use > 0 {
                state.in_use -= 1;
            }
        }
    }

    /// Release a slot: hand it to the next waiter, or free it
    fn release(&self) {
        let mut state = self.state.lock();
        if state.in_use > state.max_workers {
            // Pool was shrunk; retire the slot instead of passing it on
            state.in_use -= 1;
            return;
        }
        if !state.grant_next() {
            state.in_use = state.in_use.saturating_sub(1);
        }
    }

    /// Move waiters of the given media to the front of their class after a
    /// priority flip
    pub fn notify_priority_changed(&self, media_kind: MediaKind, media_id: i64, priority: bool) {
        let mut state = self.state.lock();

        let mut moved: Vec<Waiter> = Vec::new();
        let mut index = 0;
        while index < state.waiters.len() {
            if state.waiters[index].media_kind == media_kind
                && state.waiters[index].media_id == media_id
            {
                if let Some(mut waiter) = state.waiters.remove(index) {
                    waiter.priority = priority;
                    moved.push(waiter);
                    continue;
                }
            }
            index += 1;
        }

        if moved.is_empty() {
            return;
        }

        if priority {
            // Front of the priority class, keeping relative order
            for waiter in moved.into_iter().rev() {
                state.waiters.push_front(waiter);
            }
        } else {
            for waiter in moved {
                let at = state.insert_index(false);
                state.waiters.insert(at, waiter);
            }
        }
    }

    /// Resize the pool. Non-blocking: in-flight work continues, future
    /// acquires observe the new limit, and freed headroom is granted to
    /// waiters immediately.
    pub fn reconfigure(&self, max_workers: usize) {
        let clamped = max_workers.clamp(MIN_WORKERS, MAX_WORKERS);
        let mut state = self.state.lock();
        info!(
            "Worker pool resized: {} -> {} slots",
            state.max_workers, clamped
        );
        state.max_workers = clamped;
        while state.in_use < state.max_workers {
            if !state.grant_next() {
                break;
            }
            state.in_use += 1;
        }
    }

    /// Wake the dispatcher so it re-polls the queue without waiting for the
    /// next tick
    pub fn signal(&self) {
        self.dispatch_signal.notify_one();
    }

    /// Dispatcher side: wait for a signal or the poll interval
    pub async fn wait_for_signal(&self, poll_interval: Duration) {
        tokio::select! {
            _ = self.dispatch_signal.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    /// Register the cancellation token of a dispatched request
    pub fn register_cancellation(&self, request_id: i64) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancellations.lock().insert(request_id, token.clone());
        token
    }

    /// Cancel a running or queued job; true when a token existed
    pub fn cancel_job(&self, request_id: i64) -> bool {
        match self.cancellations.lock().get(&request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the cancellation registration once a request reached a terminal
    /// state
    pub fn unregister_cancellation(&self, request_id: i64) {
        self.cancellations.lock().remove(&request_id);
    }

    /// Slots currently held
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_use
    }

    /// Current pool size
    pub fn max_workers(&self) -> usize {
        self.state.lock().max_workers
    }

    /// Number of queued waiters
    pub fn queued(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn acquire_now(
        pool: &Arc<WorkerPool>,
        request_id: i64,
        priority: bool,
    ) -> WorkerPermit {
        let token = CancellationToken::new();
        pool.acquire(request_id, MediaKind::Movie, request_id, priority, &token)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_pool_never_exceeds_max_workers() {
        let pool = WorkerPool::new(2);

        let _a = acquire_now(&pool, 1, false).await;
        let _b = acquire_now(&pool, 2, false).await;
        assert_eq!(pool.in_flight(), 2);

        // Third acquire must queue
        let pool_clone = pool.clone();
        let waiter = tokio::spawn(async move {
            let token = CancellationToken::new();
            pool_clone
                .acquire(3, MediaKind::Movie, 3, false, &token)
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.queued(), 1);
        assert_eq!(pool.in_flight(), 2);

        drop(_a);
        let permit = waiter.await.unwrap().unwrap();
        assert_eq!(pool.in_flight(), 2);
        drop(permit);
    }

    #[tokio::test]
    async fn test_priority_class_wins_over_fifo() {
        let pool = WorkerPool::new(1);
        let held = acquire_now(&pool, 1, false).await;

        let normal_pool = pool.clone();
        let normal = tokio::spawn(async move {
            let token = CancellationToken::new();
            normal_pool
                .acquire(2, MediaKind::Movie, 2, false, &token)
                .await
                .map(|_| 2i64)
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let priority_pool = pool.clone();
        let priority = tokio::spawn(async move {
            let token = CancellationToken::new();
            priority_pool
                .acquire(3, MediaKind::Movie, 3, true, &token)
                .await
                .map(|_| 3i64)
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(held);
        // The priority waiter acquires first even though it arrived later
        let first = priority.await.unwrap().unwrap();
        assert_eq!(first, 3);
        normal.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_notify_priority_changed_reorders_waiters() {
        let pool = WorkerPool::new(1);
        let held = acquire_now(&pool, 1, false).await;

        let finished = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for request_id in [2i64, 3] {
            let pool = pool.clone();
            let finished = finished.clone();
            handles.push(tokio::spawn(async move {
                let token = CancellationToken::new();
                let permit = pool
                    .acquire(request_id, MediaKind::Movie, request_id, false, &token)
                    .await
                    .unwrap();
                finished.lock().push(request_id);
                // Hold briefly so the order is observable
                tokio::time::sleep(Duration::from_millis(5)).await;
                drop(permit);
            }));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Flip media 3 to priority while both wait
        pool.notify_priority_changed(MediaKind::Movie, 3, true);

        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*finished.lock(), vec![3, 2]);
    }

    #[tokio::test]
    async fn test_reconfigure_grows_and_grants_waiters() {
        let pool = WorkerPool::new(1);
        let _held = acquire_now(&pool, 1, false).await;

        let pool_clone = pool.clone();
        let waiter = tokio::spawn(async move {
            let token = CancellationToken::new();
            pool_clone
                .acquire(2, MediaKind::Movie, 2, false, &token)
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.queued(), 1);

        pool.reconfigure(2);
        let permit = waiter.await.unwrap().unwrap();
        assert_eq!(pool.in_flight(), 2);
        drop(permit);
    }

    #[tokio::test]
    async fn test_reconfigure_shrink_applies_to_future_acquires() {
        let pool = WorkerPool::new(2);
        let a = acquire_now(&pool, 1, false).await;
        let _b = acquire_now(&pool, 2, false).await;

        pool.reconfigure(1);
        // In-flight work is not interrupted
        assert_eq!(pool.in_flight(), 2);

        // Releasing one slot retires it instead of granting
        drop(a);
        assert_eq!(pool.in_flight(), 1);

        // Steady state: only one slot available now
        let pool_clone = pool.clone();
        let waiter = tokio::spawn(async move {
            let token = CancellationToken::new();
            pool_clone
                .acquire(3, MediaKind::Movie, 3, false, &token)
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.queued(), 1);
        drop(waiter);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_the_queue() {
        let pool = WorkerPool::new(1);
        let held = acquire_now(&pool, 1, false).await;

        let token = CancellationToken::new();
        let pool_clone = pool.clone();
        let cancel_token = token.clone();
        let waiter = tokio::spawn(async move {
            pool_clone
                .acquire(2, MediaKind::Movie, 2, false, &cancel_token)
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        token.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(TranslationError::Cancelled)));
        assert_eq!(pool.queued(), 0);

        drop(held);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancel_job_fires_registered_token() {
        let pool = WorkerPool::new(1);
        let token = pool.register_cancellation(7);

        assert!(pool.cancel_job(7));
        assert!(token.is_cancelled());
        assert!(!pool.cancel_job(8));

        pool.unregister_cancellation(7);
        assert!(!pool.cancel_job(7));
    }

    #[tokio::test]
    async fn test_signal_wakes_dispatcher_wait() {
        let pool = WorkerPool::new(1);
        pool.signal();
        // Returns promptly because the notification is pending
        tokio::time::timeout(
            Duration::from_millis(100),
            pool.wait_for_signal(Duration::from_secs(60)),
        )
        .await
        .unwrap();
    }
}
