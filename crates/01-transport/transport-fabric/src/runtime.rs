use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

/// Result of one worker iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    Worked,
    Idle,
    Finished,
}

/// A polled loop body driven on its own thread.
pub trait WorkerLoop: Send {
    fn poll(&mut self) -> Tick;
    fn name(&self) -> &str;

    /// Sleep applied after an idle tick. `None` when `poll` already waits.
    fn idle_backoff(&self) -> Option<Duration> {
        None
    }
}

/// Runs on a worker's own thread while it unwinds from a panic, with the
/// worker's name.
pub type PanicHook = Arc<dyn Fn(&str) + Send + Sync>;

/// The worker threads of one instance, sharing a stop flag. A worker that
/// panics raises the flag, so its siblings wind down with it.
pub struct WorkerSet {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    on_panic: Option<PanicHook>,
}

struct PanicGuard {
    worker: String,
    stop: Arc<AtomicBool>,
    hook: Option<PanicHook>,
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }
        error!(worker = %self.worker, "worker panicked");
        self.stop.store(true, Ordering::Release);
        if let Some(hook) = &self.hook {
            hook(&self.worker);
        }
    }
}

impl Default for WorkerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSet {
    pub fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
            on_panic: None,
        }
    }

    pub fn with_panic_hook(mut self, hook: PanicHook) -> Self {
        self.on_panic = Some(hook);
        self
    }

    pub fn spawn<W>(&mut self, mut worker: W) -> io::Result<()>
    where
        W: WorkerLoop + 'static,
    {
        let stop = Arc::clone(&self.stop);
        let guard = PanicGuard {
            worker: worker.name().to_owned(),
            stop: Arc::clone(&self.stop),
            hook: self.on_panic.clone(),
        };
        let handle = thread::Builder::new()
            .name(worker.name().to_owned())
            .spawn(move || {
                let _guard = guard;
                info!(worker = worker.name(), "worker started");
                while !stop.load(Ordering::Acquire) {
                    match worker.poll() {
                        Tick::Worked => {}
                        Tick::Idle => {
                            if let Some(backoff) = worker.idle_backoff() {
                                thread::sleep(backoff);
                            }
                        }
                        Tick::Finished => break,
                    }
                }
                info!(worker = worker.name(), "worker stopped");
            })?;
        self.handles.push(handle);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Whether a worker has stopped the set, by panicking or through
    /// [`shutdown`](Self::shutdown).
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Raises the stop flag and joins every worker. Returns how many of
    /// them had panicked.
    pub fn shutdown(mut self) -> usize {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> usize {
        self.stop.store(true, Ordering::Release);
        let current = thread::current().id();
        let mut panicked = 0;
        for handle in self.handles.drain(..) {
            if handle.thread().id() == current {
                warn!("worker asked to join itself; detaching");
                continue;
            }
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            error!(panicked, "workers exited by panic");
        }
        panicked
    }
}

impl Drop for WorkerSet {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
