/// Guard that runs a closure exactly once when dropped.
///
/// This is how in-flight calls unregister themselves: the guard is moved into the spawned task,
/// so the closure runs whether the task completes, fails, panics or is aborted.
pub struct DeferGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> DeferGuard<F> {
    /// Runs the deferred closure now instead of on drop.
    pub fn run(mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

impl<F: FnOnce()> Drop for DeferGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

/// Defers a closure, returning a `DeferGuard` that will
/// run it when dropped.
pub fn defer<F: FnOnce()>(f: F) -> DeferGuard<F> {
    DeferGuard(Some(f))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_runs_once() {
        let counter = AtomicUsize::new(0);

        let guard = defer(|| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        guard.run();
        assert_eq!(counter.load(Ordering::Relaxed), 1);

        {
            let _guard = defer(|| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_runs_on_abort() {
        let counter = std::sync::Arc::new(AtomicUsize::new(0));

        let guard = {
            let counter = counter.clone();
            defer(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            })
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            futures::future::pending::<()>().await;
        });
        tokio::task::yield_now().await;
        handle.abort();
        let _ = handle.await;

        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }
}
