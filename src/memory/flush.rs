//! Periodic and exit-triggered commits.
//!
//! [`AutoFlushScheduler`] commits the cache on a fixed interval from a
//! dedicated thread. [`ShutdownHook`] is a registry of finalizers run exactly
//! once at process termination.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::memory::cache::CacheStore;

pub struct AutoFlushScheduler {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl AutoFlushScheduler {
    /// Spawn the `memory-flush` thread, committing every `interval`.
    pub fn start(store: Arc<CacheStore>, interval: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("memory-flush".into())
            .spawn(move || {
                tracing::info!(interval_secs = interval.as_secs(), "auto-flush started");
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let pending = store.dirty_keys().len();
                            if store.commit() {
                                if pending > 0 {
                                    tracing::info!(count = pending, "auto-saved memory to database");
                                }
                            } else {
                                tracing::warn!(count = pending, "auto-save failed, retrying next interval");
                            }
                        }
                        // Stop requested, or the scheduler handle was dropped.
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::info!("auto-flush stopped");
            })?;

        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    /// Wake the thread and wait for it to exit. Idempotent.
    pub fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("auto-flush thread panicked");
            }
        }
    }
}

impl Drop for AutoFlushScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

type Finalizer = Box<dyn FnOnce() + Send>;

/// Cleanup callbacks run once, in registration order, on termination.
pub struct ShutdownHook {
    finalizers: Mutex<Option<Vec<(String, Finalizer)>>>,
}

impl ShutdownHook {
    pub fn new() -> Self {
        Self {
            finalizers: Mutex::new(Some(Vec::new())),
        }
    }

    /// Register a finalizer. Returns `false` if the hook has already run.
    pub fn register(&self, name: impl Into<String>, finalizer: impl FnOnce() + Send + 'static) -> bool {
        let mut guard = self.finalizers.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(list) => {
                list.push((name.into(), Box::new(finalizer)));
                true
            }
            None => false,
        }
    }

    /// Register the standard memory teardown: final commit, then close.
    pub fn register_store(&self, store: Arc<CacheStore>) -> bool {
        self.register("memory commit and close", move || {
            tracing::info!("saving memory before exit");
            store.shutdown();
        })
    }

    /// Run every finalizer. Only the first call does anything; returns whether
    /// this call ran them.
    pub fn run(&self) -> bool {
        let finalizers = {
            let mut guard = self.finalizers.lock().unwrap_or_else(PoisonError::into_inner);
            guard.take()
        };
        let Some(finalizers) = finalizers else {
            return false;
        };

        for (name, finalizer) in finalizers {
            tracing::debug!(finalizer = %name, "running shutdown finalizer");
            finalizer();
        }
        true
    }

    pub fn has_run(&self) -> bool {
        self.finalizers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl Default for ShutdownHook {
    fn default() -> Self {
        Self::new()
    }
}
