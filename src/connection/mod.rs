//! Establishment and maintenance of connections.
//!
//! The leader runs a background sweep over three address queues:
//! `pending` addresses are attempted with a fixed backoff, successful
//! ones move to `finished` and their sessions are emitted on a channel,
//! and addresses that exhaust the attempt bound land in `discarded`,
//! exactly once. In dynamic mode new addresses may keep arriving (via
//! [`ConnectionManager::add`] or an address record file re-read every
//! sweep); in static mode the sweep settles once `pending` drains, and a
//! discarded address raises the abnormal-exit flag.
//!
//! A follower does not sweep. It blocks on its single address with the
//! same bounded retry discipline, see [`connect_follower`].

pub mod builder;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};

use rand::Rng;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    address::{load_address_file, Address},
    common::Role,
    session::Session,
    settings::{ConnectionSettings, SessionSettings},
    transport::Connector,
};

use self::builder::ConnectionBuilder;

#[derive(Debug, Error)]
pub enum ConnectionManagerError {
    #[error("new addresses are not accepted in static mode")]
    StaticMode,
    #[error("address `{0}` was discarded after {1} attempts")]
    Exhausted(Address, u32),
}

/// One tracked address and its attempt history.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub address: Address,
    pub first_seen: Instant,
    pub last_attempt: Option<Instant>,
    pub attempts: u32,
}

impl ConnectionRecord {
    fn new(address: Address) -> Self {
        Self {
            address,
            first_seen: Instant::now(),
            last_attempt: None,
            attempts: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Queues {
    pending: Vec<ConnectionRecord>,
    finished: Vec<ConnectionRecord>,
    discarded: Vec<ConnectionRecord>,
}

impl Queues {
    fn knows(&self, address: &Address) -> bool {
        self.pending
            .iter()
            .chain(self.finished.iter())
            .chain(self.discarded.iter())
            .any(|r| &r.address == address)
    }
}

/// A point-in-time copy of the three queues.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub pending: Vec<ConnectionRecord>,
    pub finished: Vec<ConnectionRecord>,
    pub discarded: Vec<ConnectionRecord>,
}

struct Shared {
    queues: Mutex<Queues>,
    abnormal_exit: AtomicBool,
    shutdown: AtomicBool,
    settings: ConnectionSettings,
}

/// Handle to the background connection sweep.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Spawns the sweep task. Established sessions arrive on the
    /// returned channel; the join handle resolves when the sweep settles
    /// (static mode) or is shut down.
    pub fn spawn(
        connector: Arc<dyn Connector>,
        settings: ConnectionSettings,
        session_settings: SessionSettings,
        addresses: Vec<Address>,
    ) -> (Self, mpsc::UnboundedReceiver<Session>, JoinHandle<()>) {
        let shared = Arc::new(Shared {
            queues: Mutex::new(Queues {
                pending: addresses.into_iter().map(ConnectionRecord::new).collect(),
                ..Queues::default()
            }),
            abnormal_exit: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            settings,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Self {
            shared: Arc::clone(&shared),
        };
        let handle = tokio::spawn(sweep_loop(shared, connector, session_settings, tx));
        (manager, rx, handle)
    }

    /// Tracks a new address. An address already known in any queue is
    /// ignored; static mode refuses runtime additions.
    pub fn add(&self, address: Address) -> Result<(), ConnectionManagerError> {
        if !self.shared.settings.dynamic {
            warn!(%address, "refusing runtime address in static mode");
            return Err(ConnectionManagerError::StaticMode);
        }
        let mut queues = self.shared.queues.lock().unwrap();
        if queues.knows(&address) {
            debug!(%address, "address already tracked");
            return Ok(());
        }
        debug!(%address, "tracking new address");
        queues.pending.push(ConnectionRecord::new(address));
        Ok(())
    }

    pub fn clear_finished(&self) {
        self.shared.queues.lock().unwrap().finished.clear();
    }

    pub fn clear_discarded(&self) {
        self.shared.queues.lock().unwrap().discarded.clear();
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let queues = self.shared.queues.lock().unwrap();
        QueueSnapshot {
            pending: queues.pending.clone(),
            finished: queues.finished.clone(),
            discarded: queues.discarded.clone(),
        }
    }

    /// Whether a static-mode sweep gave up on an address.
    pub fn abnormal_exit(&self) -> bool {
        self.shared.abnormal_exit.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
    }
}

async fn sweep_loop(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    session_settings: SessionSettings,
    tx: mpsc::UnboundedSender<Session>,
) {
    let settings = &shared.settings;
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }

        if let Some(path) = &settings.address_file {
            match load_address_file(path) {
                Ok(addresses) => {
                    let mut queues = shared.queues.lock().unwrap();
                    for address in addresses {
                        if !queues.knows(&address) {
                            debug!(%address, "address from record file");
                            queues.pending.push(ConnectionRecord::new(address));
                        }
                    }
                }
                Err(e) => warn!("address file unreadable: {}", e),
            }
        }

        // take the due records out, attempt them without holding the lock
        let due: Vec<ConnectionRecord> = {
            let mut queues = shared.queues.lock().unwrap();
            let backoff = settings.backoff();
            let (due, waiting): (Vec<_>, Vec<_>) = queues.pending.drain(..).partition(|r| {
                r.last_attempt.map_or(true, |at| at.elapsed() >= backoff)
            });
            queues.pending = waiting;
            due
        };

        for mut record in due {
            record.attempts += 1;
            record.last_attempt = Some(Instant::now());
            let outcome = ConnectionBuilder::new(record.address.clone(), Role::Leader)
                .with_session_settings(session_settings.clone())
                .with_connect_timeout(settings.connect_timeout())
                .build(connector.as_ref())
                .await;
            let mut queues = shared.queues.lock().unwrap();
            match outcome {
                Ok(sessions) => {
                    info!(address = %record.address, pairs = sessions.len(), "connected");
                    for session in sessions {
                        // receiver gone means the caller stopped caring
                        let _ = tx.send(session);
                    }
                    queues.finished.push(record);
                }
                Err(e) if record.attempts > settings.max_attempts => {
                    warn!(
                        address = %record.address,
                        attempts = record.attempts,
                        "giving up: {}", e
                    );
                    if !settings.dynamic {
                        shared.abnormal_exit.store(true, Ordering::SeqCst);
                    }
                    queues.discarded.push(record);
                }
                Err(e) => {
                    debug!(address = %record.address, attempts = record.attempts, "attempt failed: {}", e);
                    queues.pending.push(record);
                }
            }
        }

        if !settings.dynamic && shared.queues.lock().unwrap().pending.is_empty() {
            info!("all configured addresses settled");
            break;
        }

        tokio::time::sleep(settings.sweep_interval()).await;
    }
}

/// The follower's blocking counterpart of the sweep: retries one address
/// with backoff until it connects or the attempt bound is exhausted.
pub async fn connect_follower(
    connector: &dyn Connector,
    address: Address,
    settings: &ConnectionSettings,
    session_settings: SessionSettings,
) -> Result<Vec<Session>, ConnectionManagerError> {
    let builder = ConnectionBuilder::new(address.clone(), Role::Follower)
        .with_session_settings(session_settings)
        .with_connect_timeout(settings.connect_timeout());
    let mut attempts = 0;
    loop {
        attempts += 1;
        match builder.build(connector).await {
            Ok(sessions) => return Ok(sessions),
            Err(e) if attempts > settings.max_attempts => {
                warn!(%address, attempts, "giving up: {}", e);
                return Err(ConnectionManagerError::Exhausted(address, attempts));
            }
            Err(e) => {
                debug!(%address, attempts, "attempt failed: {}", e);
                // jitter keeps a fleet of followers from retrying in lockstep
                let jitter = rand::thread_rng().gen_range(1.0..1.25);
                tokio::time::sleep(settings.backoff().mul_f64(jitter)).await;
            }
        }
    }
}
