//! Pending-request set with timeouts.
//!
//! Every outstanding request is one entry carrying its key, a deadline and
//! three one-shot callbacks. An entry leaves the set exactly once, through a
//! matching response, the sweeper, or a cancel, and whichever path removes
//! it runs the matching callback followed by the release hook. Callbacks
//! always run with the set unlocked, so they may register or cancel freely.

use std::fmt::Debug;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::error::{CorrelationError, CorrelationResult};
use crate::slab::{Slab, SlotKey};

type OnResponse<R> = Box<dyn FnOnce(R) + Send>;
type OnEvent = Box<dyn FnOnce() + Send>;

/// A request about to be tracked.
pub struct Registration<K, R> {
    key: K,
    timeout: Duration,
    on_response: Option<OnResponse<R>>,
    on_timeout: Option<OnEvent>,
    on_release: Option<OnEvent>,
}

impl<K, R> Registration<K, R> {
    pub fn new(key: K, timeout: Duration) -> Self {
        Self {
            key,
            timeout,
            on_response: None,
            on_timeout: None,
            on_release: None,
        }
    }

    pub fn on_response(mut self, f: impl FnOnce(R) + Send + 'static) -> Self {
        self.on_response = Some(Box::new(f));
        self
    }

    pub fn on_timeout(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_timeout = Some(Box::new(f));
        self
    }

    /// Runs once after the entry leaves the set, on every path.
    pub fn on_release(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_release = Some(Box::new(f));
        self
    }

    pub fn key(&self) -> &K {
        &self.key
    }
}

struct Pending<K, R> {
    key: K,
    expires_at: Instant,
    on_response: Option<OnResponse<R>>,
    on_timeout: Option<OnEvent>,
    on_release: Option<OnEvent>,
}

enum Removal<R> {
    Response(R),
    Timeout,
    Cancel,
}

impl<K, R> Pending<K, R> {
    fn finish(self, removal: Removal<R>) {
        match removal {
            Removal::Response(response) => {
                if let Some(f) = self.on_response {
                    f(response);
                }
            }
            Removal::Timeout => {
                if let Some(f) = self.on_timeout {
                    f();
                }
            }
            Removal::Cancel => {}
        }
        if let Some(f) = self.on_release {
            f();
        }
    }
}

struct Sweeper {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

struct EngineInner<K, R> {
    name: String,
    pending: Mutex<Slab<Pending<K, R>>>,
    closed: Mutex<bool>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<K, R> EngineInner<K, R> {
    fn sweep(&self, now: Instant) -> usize {
        let expired = self.pending.lock().extract_if(|p| p.expires_at <= now);
        let count = expired.len();
        for entry in expired {
            entry.finish(Removal::Timeout);
        }
        if count > 0 {
            debug!(engine = %self.name, count, "pending requests timed out");
        }
        count
    }

    fn cancel(&self, slot: SlotKey) -> bool {
        let removed = self.pending.lock().remove(slot);
        match removed {
            Some(entry) => {
                entry.finish(Removal::Cancel);
                true
            }
            None => false,
        }
    }
}

/// Tracks outstanding requests keyed by `K`; responses carry `R`.
pub struct CorrelationEngine<K, R = Vec<u8>> {
    inner: Arc<EngineInner<K, R>>,
}

impl<K, R> Clone for CorrelationEngine<K, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, R> CorrelationEngine<K, R>
where
    K: Eq + Debug + Send + 'static,
    R: Send + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                name: name.into(),
                pending: Mutex::new(Slab::default()),
                closed: Mutex::new(false),
                sweeper: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Adds a pending entry expiring `timeout` from now.
    ///
    /// Fails if an entry with an equal key is pending. On failure the
    /// registration is dropped without running any callback.
    pub fn register(
        &self,
        registration: Registration<K, R>,
    ) -> CorrelationResult<RegistrationHandle<K, R>> {
        if *self.inner.closed.lock() {
            return Err(CorrelationError::Closed);
        }
        let mut pending = self.inner.pending.lock();
        if pending.iter().any(|(_, p)| p.key == registration.key) {
            return Err(CorrelationError::DuplicateKey {
                key: format!("{:?}", registration.key),
            });
        }
        trace!(engine = %self.inner.name, key = ?registration.key, "request registered");
        let slot = pending.insert(Pending {
            key: registration.key,
            expires_at: Instant::now() + registration.timeout,
            on_response: registration.on_response,
            on_timeout: registration.on_timeout,
            on_release: registration.on_release,
        });
        Ok(RegistrationHandle {
            engine: Arc::downgrade(&self.inner),
            slot,
        })
    }

    /// Completes the entry matching `key`, if any. Returns whether one
    /// matched; unmatched responses are dropped.
    pub fn on_inbound_response(&self, key: &K, response: R) -> bool {
        let entry = {
            let mut pending = self.inner.pending.lock();
            let slot = pending
                .iter()
                .find(|(_, p)| p.key == *key)
                .map(|(slot, _)| slot);
            slot.and_then(|slot| pending.remove(slot))
        };
        match entry {
            Some(entry) => {
                entry.finish(Removal::Response(response));
                true
            }
            None => {
                debug!(engine = %self.inner.name, ?key, "response matched no pending request");
                false
            }
        }
    }

    /// Expires every entry whose deadline is at or before `now`.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        self.inner.sweep(now)
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) every `interval` on a
    /// named thread until the engine is shut down or dropped. A second call
    /// is a no-op.
    pub fn spawn_sweeper(&self, interval: Duration) -> CorrelationResult<()> {
        let mut sweeper = self.inner.sweeper.lock();
        if sweeper.is_some() {
            return Ok(());
        }
        let (stop, stopped) = crossbeam_channel::bounded::<()>(0);
        let weak: Weak<EngineInner<K, R>> = Arc::downgrade(&self.inner);
        let name = format!("{}-sweeper", self.inner.name);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                info!(sweeper = %name, "sweeper started");
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    inner.sweep(Instant::now());
                }
                info!(sweeper = %name, "sweeper stopped");
            })
            .map_err(|err| CorrelationError::SweeperSpawn(err.to_string()))?;
        *sweeper = Some(Sweeper { stop, handle });
        Ok(())
    }

    /// Stops the sweeper and cancels every pending entry (release hooks
    /// run, response and timeout callbacks do not). Later registrations
    /// fail with [`CorrelationError::Closed`].
    pub fn shutdown(&self) -> usize {
        *self.inner.closed.lock() = true;
        if let Some(Sweeper { stop, handle }) = self.inner.sweeper.lock().take() {
            drop(stop);
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        let drained = self.inner.pending.lock().extract_if(|_| true);
        let count = drained.len();
        for entry in drained {
            entry.finish(Removal::Cancel);
        }
        count
    }
}

/// Handle to one pending entry.
pub struct RegistrationHandle<K, R = Vec<u8>> {
    engine: Weak<EngineInner<K, R>>,
    slot: SlotKey,
}

impl<K, R> Clone for RegistrationHandle<K, R> {
    fn clone(&self) -> Self {
        Self {
            engine: Weak::clone(&self.engine),
            slot: self.slot,
        }
    }
}

impl<K, R> Debug for RegistrationHandle<K, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationHandle")
            .field("slot", &self.slot)
            .finish()
    }
}

impl<K, R> RegistrationHandle<K, R> {
    /// Removes the entry if it is still pending, running only its release
    /// hook. Returns `false` when a response, timeout or earlier cancel got
    /// there first.
    pub fn cancel(&self) -> bool {
        match self.engine.upgrade() {
            Some(engine) => engine.cancel(self.slot),
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.engine
            .upgrade()
            .is_some_and(|engine| engine.pending.lock().contains(self.slot))
    }
}
