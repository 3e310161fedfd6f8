use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;

use crate::caching::CacheKey;
use crate::transport::{CallResult, TransportError};

/// A network call that is running, or about to run, for one [`CacheKey`].
///
/// Any number of callers can [`wait`](Self::wait) on the same call.
#[derive(Clone)]
pub struct InFlightCall {
    id: u64,
    timeout: Duration,
    outcome: Shared<BoxFuture<'static, CallResult>>,
}

impl fmt::Debug for InFlightCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightCall")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl InFlightCall {
    /// Creates a call along with the sender that completes it.
    ///
    /// If the sender is dropped without sending, waiters see a failed call.
    fn new(id: u64, timeout: Duration) -> (Self, oneshot::Sender<CallResult>) {
        let (sender, receiver) = oneshot::channel();
        let outcome = receiver
            .map(|result| {
                result.unwrap_or_else(|_| {
                    Err(TransportError::Unknown("call was cancelled".into()))
                })
            })
            .boxed()
            .shared();
        let call = Self {
            id,
            timeout,
            outcome,
        };
        (call, sender)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The timeout the call was started with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Waits for the outcome of the call.
    pub async fn wait(&self) -> CallResult {
        self.outcome.clone().await
    }
}

/// The result of [`InFlightRegistry::insert_if_absent`].
#[derive(Debug)]
pub enum Registration {
    /// The call was inserted. The caller is responsible for running it and removing it again.
    Inserted(InFlightCall, oneshot::Sender<CallResult>),
    /// Another call for the same key was already in flight.
    Joined(InFlightCall),
}

/// The set of calls currently in flight, at most one per [`CacheKey`].
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    calls: Mutex<HashMap<CacheKey, InFlightCall>>,
    next_id: AtomicU64,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new call for `key` unless one is in flight already.
    pub fn insert_if_absent(&self, key: &CacheKey, timeout: Duration) -> Registration {
        let mut calls = self.calls.lock().unwrap();
        if let Some(existing) = calls.get(key) {
            return Registration::Joined(existing.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (call, sender) = InFlightCall::new(id, timeout);
        calls.insert(key.clone(), call.clone());
        Registration::Inserted(call, sender)
    }

    /// Removes the call with `call_id` for `key`.
    ///
    /// A call registered later for the same key is left alone. Returns whether anything was
    /// removed.
    pub fn remove(&self, key: &CacheKey, call_id: u64) -> bool {
        let mut calls = self.calls.lock().unwrap();
        match calls.get(key) {
            Some(call) if call.id == call_id => {
                calls.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Returns the call in flight for `key`.
    pub fn get(&self, key: &CacheKey) -> Option<InFlightCall> {
        self.calls.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
