//! Background sync manager
//!
//! Owns the live connection to the remote authority and the periodic drain.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncManager                                                    │
//! │  ├── live task                                                  │
//! │  │   ├── subscribe (events buffer while catching up)            │
//! │  │   ├── catch-up, then drain                                   │
//! │  │   ├── apply live events until the channel closes             │
//! │  │   └── on failure: Offline, backoff, reconnect                │
//! │  ├── drain task                                                 │
//! │  │   └── drain every `drain_interval` while Online              │
//! │  └── state: ConnectionState, mirrored as ConnectionChanged      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both tasks share one cancellation token; [`SyncManager::stop`] cancels it
//! and waits for the tasks to wind down.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::applier::RemoteEventApplier;
use super::catchup::CatchUpReconciler;
use super::drain::QueueDrainService;
use super::events::{ConnectionState, SyncEvent};
use super::retry::Backoff;
use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::queue::PendingQueue;
use crate::remote::{ChangeEvent, RemoteTransport};

/// State shared with the background tasks
struct Shared {
    remote: Arc<dyn RemoteTransport>,
    ctx: SyncContext,
    queue: PendingQueue,
    drain: QueueDrainService,
    reconciler: CatchUpReconciler,
    applier: RemoteEventApplier,
    config: SyncConfig,
    state: RwLock<ConnectionState>,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        {
            let mut state = self.state.write();
            if *state == next {
                return;
            }
            *state = next.clone();
        }
        debug!(state = %next, "Connection state changed");
        self.ctx.emit(SyncEvent::ConnectionChanged(next));
    }

    fn is_online(&self) -> bool {
        *self.state.read() == ConnectionState::Online
    }
}

/// Handles of the running background tasks
struct Running {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// How a live session ended
enum SessionEnd {
    Cancelled,
    Disconnected(String),
}

pub struct SyncManager {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl SyncManager {
    pub fn new(
        remote: Arc<dyn RemoteTransport>,
        ctx: SyncContext,
        queue: PendingQueue,
        drain: QueueDrainService,
        reconciler: CatchUpReconciler,
        applier: RemoteEventApplier,
        config: SyncConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                remote,
                ctx,
                queue,
                drain,
                reconciler,
                applier,
                config,
                state: RwLock::new(ConnectionState::Disabled),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.shared.state.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Spawn the background tasks. Returns `false` if they already run.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        let live = tokio::spawn(run_live(self.shared.clone(), cancel.clone()));
        let periodic = tokio::spawn(run_periodic_drain(self.shared.clone(), cancel.clone()));
        *running = Some(Running {
            cancel,
            handles: vec![live, periodic],
        });

        info!(client = %self.shared.ctx.correlation, "Sync started");
        true
    }

    /// Cancel the background tasks and wait for them to finish.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.cancel.cancel();
        for handle in running.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sync task ended abnormally");
            }
        }
        self.shared.set_state(ConnectionState::Disabled);
        info!("Sync stopped");
    }
}

async fn run_live(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut backoff = Backoff::from_config(&shared.config);

    while !cancel.is_cancelled() {
        shared.set_state(ConnectionState::Connecting);

        let reason = match shared.remote.subscribe().await {
            Ok(rx) => match session(&shared, rx, &cancel, &mut backoff).await {
                SessionEnd::Cancelled => break,
                SessionEnd::Disconnected(reason) => reason,
            },
            Err(e) => e.to_string(),
        };

        shared.set_state(ConnectionState::Offline {
            reason: reason.clone(),
        });
        let delay = backoff.next_delay();
        debug!(?delay, %reason, "Reconnecting after delay");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.set_state(ConnectionState::Disabled);
    debug!("Live sync task exited");
}

/// One connected session: catch up, drain, then follow live events.
async fn session(
    shared: &Shared,
    mut rx: mpsc::Receiver<ChangeEvent>,
    cancel: &CancellationToken,
    backoff: &mut Backoff,
) -> SessionEnd {
    match shared.reconciler.run().await {
        Ok(report) if report.is_complete() => {}
        Ok(_) => return SessionEnd::Disconnected("catch-up incomplete".into()),
        Err(e) => return SessionEnd::Disconnected(e.to_string()),
    }

    shared.set_state(ConnectionState::Online);
    backoff.reset();

    if let Err(e) = shared.drain.drain(cancel).await {
        warn!(error = %e, "Drain after reconnect failed");
    }

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            event = rx.recv() => match event {
                Some(event) => {
                    shared.applier.apply(&event);
                }
                None => return SessionEnd::Disconnected("subscription closed".into()),
            },
        }
    }
}

async fn run_periodic_drain(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(shared.config.drain_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !shared.is_online() {
            continue;
        }
        match shared.queue.is_empty() {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "Could not read queue depth");
                continue;
            }
        }
        if let Err(e) = shared.drain.drain(&cancel).await {
            warn!(error = %e, "Periodic drain failed");
        }
    }
    debug!("Periodic drain task exited");
}
