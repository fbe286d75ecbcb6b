//! The `serve` loop: migration, auto-flush, event intake, and shutdown.
//!
//! Inbound conversation events arrive as newline-delimited JSON on stdin.
//! Each event is handled on its own OS thread against the one shared
//! [`CacheStore`]. The main task waits for SIGINT, SIGTERM, or the end of the
//! event stream, then runs the [`ShutdownHook`]. The hook drains in-flight
//! handlers before the final commit.

use std::io::BufRead;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use chatvault::config::VaultConfig;
use chatvault::memory::backend::PersistenceBackend;
use chatvault::memory::flush::{AutoFlushScheduler, ShutdownHook};
use chatvault::memory::{legacy, CacheStore, ChatKind, ContextKey, Message, Role};

/// Open the database and build the shared store. A missing or malformed
/// encryption key is fatal.
pub fn open_store(config: &VaultConfig) -> Result<Arc<CacheStore>> {
    config.validate().context("refusing to start")?;

    let codec = config.cipher()?.with_policy(config.memory.decode_policy);
    let db_path = config.resolved_db_path();
    let backend = PersistenceBackend::open(&db_path, codec)?;
    tracing::info!(db = %db_path.display(), "memory store ready");

    Ok(Arc::new(CacheStore::new(
        backend,
        config.memory.retention_limit,
    )))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(id: RawId) -> Self {
        match id {
            RawId::Text(text) => text,
            RawId::Number(n) => n.to_string(),
        }
    }
}

/// One inbound conversational turn.
#[derive(Deserialize)]
pub struct ConversationEvent {
    #[serde(default)]
    subject_id: Option<RawId>,
    #[serde(default)]
    chat_id: Option<RawId>,
    #[serde(default)]
    chat_kind: ChatKind,
    #[serde(default = "default_role")]
    role: Role,
    content: String,
}

fn default_role() -> Role {
    Role::User
}

#[derive(Serialize)]
struct EventAck {
    key: String,
    messages: usize,
    committed: bool,
}

fn handle_event(store: &CacheStore, event: ConversationEvent) {
    let subject_id = event.subject_id.map(String::from);
    let chat_id = event.chat_id.map(String::from);
    let key = ContextKey::resolve(subject_id.as_deref(), chat_id.as_deref(), &event.chat_kind);

    let history = store.append(&key, [Message::new(event.role, event.content)]);
    // Commit after every turn to keep the loss window below the flush interval.
    let committed = store.commit();

    let ack = EventAck {
        key: key.to_string(),
        messages: history.len(),
        committed,
    };
    match serde_json::to_string(&ack) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!(error = %e, "failed to serialize event ack"),
    }
}

#[derive(Default)]
struct PoolState {
    closed: bool,
    handles: Vec<JoinHandle<()>>,
}

/// Tracks `memory-handler` threads so shutdown can wait for them.
#[derive(Default)]
pub struct HandlerPool {
    state: Mutex<PoolState>,
}

impl HandlerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` on a new handler thread. Returns `false` once the pool is
    /// drained; the job is dropped.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return false;
        }
        state.handles.retain(|h| !h.is_finished());

        match std::thread::Builder::new()
            .name("memory-handler".into())
            .spawn(job)
        {
            Ok(handle) => {
                state.handles.push(handle);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn event handler");
                false
            }
        }
    }

    /// Stop accepting work and join every outstanding handler.
    pub fn drain(&self) {
        let handles = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.closed = true;
            std::mem::take(&mut state.handles)
        };
        if !handles.is_empty() {
            tracing::info!(count = handles.len(), "waiting for in-flight event handlers");
        }
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("event handler panicked");
            }
        }
    }
}

/// Read events until EOF or until the pool is drained, one handler thread
/// per event.
fn intake_events(store: Arc<CacheStore>, pool: &HandlerPool) {
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to read event stream");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event: ConversationEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed event");
                continue;
            }
        };

        let store = Arc::clone(&store);
        if !pool.spawn(move || handle_event(&store, event)) {
            tracing::warn!("shutting down, event dropped");
            break;
        }
    }
}

async fn terminate_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                return;
            }
            Err(e) => tracing::warn!(error = %e, "failed to install SIGTERM handler"),
        }
    }
    std::future::pending::<()>().await
}

/// Run the memory service until the event stream ends or the process is
/// signalled.
pub async fn serve(config: VaultConfig) -> Result<()> {
    let store = open_store(&config)?;

    if let Some(outcome) =
        legacy::run_startup_migration(&store, &config.resolved_legacy_path())
    {
        tracing::debug!(?outcome, "legacy migration check finished");
    }

    let scheduler = AutoFlushScheduler::start(Arc::clone(&store), config.flush_interval())
        .context("failed to start auto-flush thread")?;

    let pool = Arc::new(HandlerPool::new());

    let hook = ShutdownHook::new();
    let drain_pool = Arc::clone(&pool);
    hook.register("drain event handlers", move || drain_pool.drain());
    hook.register("stop auto-flush", move || {
        let mut scheduler = scheduler;
        scheduler.stop();
    });
    hook.register_store(Arc::clone(&store));

    let (eof_tx, eof_rx) = oneshot::channel::<()>();
    let intake_store = Arc::clone(&store);
    std::thread::Builder::new()
        .name("event-intake".into())
        .spawn(move || {
            intake_events(intake_store, &pool);
            let _ = eof_tx.send(());
        })
        .context("failed to start event intake thread")?;

    tracing::info!("memory service running, reading events from stdin");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("interrupt received");
        }
        _ = terminate_signal() => tracing::info!("termination signal received"),
        _ = eof_rx => tracing::info!("event stream closed"),
    }

    hook.run();
    tracing::info!("memory service shut down");
    Ok(())
}
