//! Keyed operation dispatcher (spec §4.2).
//!
//! Protects the CSI driver from concurrent duplicate calls for the same
//! object: at most one in-flight operation per key across all workers
//! and reconcile ticks, and a per-key exponential backoff window that
//! must elapse before a failed key can run again. Keys are structured
//! as `{verb}-{objectName}[{uid}]` by callers (see `dispatch_key`).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::rate_limiter::RetryPolicy;

enum KeyState {
    Running,
    Backoff { until: Instant, attempt: u32 },
}

pub struct Dispatcher {
    inner: Mutex<HashMap<String, KeyState>>,
    policy: RetryPolicy,
}

/// Outcome of a dispatch attempt.
pub enum DispatchOutcome<T> {
    /// The operation ran; this is its result.
    Ran(T),
    /// Another caller already has this key in flight. No queuing; the
    /// caller should requeue its own work item and try again later.
    AlreadyInProgress,
    /// The key recently failed; its backoff window has not elapsed.
    Backoff(Duration),
}

pub fn dispatch_key(verb: &str, name: &str, uid: &str) -> String {
    if uid.is_empty() {
        format!("{verb}-{name}")
    } else {
        format!("{verb}-{name}[{uid}]")
    }
}

impl Dispatcher {
    pub fn new(policy: RetryPolicy) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HashMap::new()),
            policy,
        })
    }

    /// Run `op` under the key's exclusion lock. `op` is only invoked if
    /// no other call holds the key and its backoff window has elapsed.
    pub async fn run<F, Fut, T, E>(self: &Arc<Self>, key: String, op: F) -> DispatchOutcome<Result<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        {
            let mut guard = self.inner.lock().await;
            match guard.get(&key) {
                Some(KeyState::Running) => return DispatchOutcome::AlreadyInProgress,
                Some(KeyState::Backoff { until, .. }) => {
                    let now = Instant::now();
                    if *until > now {
                        return DispatchOutcome::Backoff(*until - now);
                    }
                }
                None => {}
            }
            guard.insert(key.clone(), KeyState::Running);
        }

        let result = op().await;

        {
            let mut guard = self.inner.lock().await;
            match &result {
                Ok(_) => {
                    guard.remove(&key);
                }
                Err(_) => {
                    let attempt = match guard.get(&key) {
                        Some(KeyState::Backoff { attempt, .. }) => *attempt + 1,
                        _ => 0,
                    };
                    let until = Instant::now() + self.policy.backoff_for(attempt);
                    guard.insert(key, KeyState::Backoff { until, attempt });
                }
            }
        }

        DispatchOutcome::Ran(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn second_concurrent_call_is_rejected() {
        let d = Dispatcher::new(RetryPolicy::default());
        let d2 = Arc::clone(&d);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            d2.run("create-x".to_string(), || async move {
                rx.await.ok();
                Ok::<_, ()>(())
            })
            .await
        });

        // Give the first call time to register as Running.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = d
            .run("create-x".to_string(), || async { Ok::<_, ()>(()) })
            .await;
        assert!(matches!(second, DispatchOutcome::AlreadyInProgress));

        tx.send(()).unwrap();
        let first = handle.await.unwrap();
        assert!(matches!(first, DispatchOutcome::Ran(Ok(()))));
    }

    #[tokio::test]
    async fn failure_engages_backoff() {
        let d = Dispatcher::new(RetryPolicy::new(Duration::from_millis(200), Duration::from_secs(5)));
        let attempts = Arc::new(AtomicU32::new(0));
        let a = Arc::clone(&attempts);
        let outcome = d
            .run("delete-y".to_string(), || async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(())
            })
            .await;
        assert!(matches!(outcome, DispatchOutcome::Ran(Err(()))));

        // Immediately retrying should hit the backoff window.
        let second = d.run("delete-y".to_string(), || async { Ok::<_, ()>(()) }).await;
        assert!(matches!(second, DispatchOutcome::Backoff(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
