//! CD-1.1 data manager: one TCP listener per acquired station.
//!
//! Each accepted connection runs a station session that answers option requests, tracks
//! received sequence numbers, sends periodic acknacks, and forwards parsed data frames to a
//! record sink. Malformed input goes to a separate sink tagged with the station name.
//!
//! An optional connection manager listener answers CONNECTION_REQUEST frames with the
//! address of the station's data listener. Received sequence numbers can be persisted per
//! station so a restart keeps acknowledging them.
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> cd11_rs_dataman::Result<()> {
//! use cd11_rs_dataman::{DataManConfig, DataManager, Sinks};
//! use tokio::sync::mpsc;
//!
//! let config = DataManConfig::from_json(r#"{"stations": [{"name": "LBTB", "port": 8100}]}"#)?;
//! let (records, mut records_rx) = mpsc::channel(1024);
//! let (malformed, _malformed_rx) = mpsc::channel(64);
//!
//! let manager = DataManager::bind(config, Sinks { records, malformed }).await?;
//! tokio::spawn(manager.run());
//!
//! while let Some(record) = records_rx.recv().await {
//!     println!("{} seq {}", record.station, record.sequence_number);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub(crate) mod connman;
pub mod error;
pub mod gap_store;
pub mod record;
pub(crate) mod sessions;
pub mod station;
pub mod storage;

pub use config::{DataManConfig, ProtocolVersion, StationConfig};
pub use error::{DataManError, Result};
pub use gap_store::GapStateStore;
pub use record::{ChannelRecord, StationRecord};
pub use sessions::{SessionInfo, SessionRegistry};
pub use station::{SessionTiming, Sinks, StationSession};
pub use storage::{BatchForwarder, ForwardStats, ForwarderConfig, RecordStore, StoreError};

use std::net::SocketAddr;
use std::sync::Arc;

use cd11_rs_connection::{Connection, ConnectionConfig};
use cd11_rs_protocol::FrameFactory;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::CONNMAN_NAME;
use crate::connman::{ConnManListener, Responder};

/// ALERT message sent to every live station on shutdown.
pub const SHUTDOWN_REASON: &str = "shutdown";

/// Handle for triggering graceful shutdown.
///
/// Obtained via [`DataManager::shutdown_handle()`]. Calling [`shutdown()`](Self::shutdown)
/// stops every accept loop and alerts every live station.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

struct StationListener {
    station: Arc<StationConfig>,
    listener: TcpListener,
}

/// Everything an accept loop needs to start sessions.
#[derive(Clone)]
struct SessionContext {
    creator: String,
    timing: SessionTiming,
    connection: ConnectionConfig,
    sinks: Sinks,
    sessions: SessionRegistry,
    gap_store: Option<GapStateStore>,
}

pub struct DataManager {
    listeners: Vec<StationListener>,
    connman: Option<ConnManListener>,
    context: SessionContext,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl DataManager {
    /// Validate `config`, bind a listener for every acquired station, and bind the
    /// connection manager if a port is configured.
    pub async fn bind(config: DataManConfig, sinks: Sinks) -> Result<Self> {
        config.validate()?;

        let mut listeners = Vec::new();
        for station in config.acquired() {
            let addr = format!("{}:{}", config.bind_address, station.port);
            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|source| DataManError::Bind {
                    station: station.name.clone(),
                    port: station.port,
                    source,
                })?;
            info!(station = %station.name, %addr, "station listener bound");
            listeners.push(StationListener {
                station: Arc::new(station.clone()),
                listener,
            });
        }
        if listeners.is_empty() {
            warn!("no acquired stations configured");
        }

        let connman = match config.connman_port {
            Some(port) => Some(bind_connman(&config, port, &listeners).await?),
            None => None,
        };
        let gap_store = config.gap_state_dir.clone().map(GapStateStore::new);
        if let Some(store) = &gap_store {
            info!(dir = %store.dir().display(), "gap state persisted per station");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            listeners,
            connman,
            context: SessionContext {
                creator: config.frame_creator.clone(),
                timing: SessionTiming {
                    heartbeat: config.heartbeat(),
                    acknack_interval: config.acknack_interval(),
                    gap_persist: config.gap_persist_interval(),
                },
                connection: ConnectionConfig::default(),
                sinks,
                sessions: SessionRegistry::new(),
                gap_store,
            },
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Replace the per-connection settings used for every accepted station.
    pub fn with_connection_config(mut self, connection: ConnectionConfig) -> Self {
        self.context.connection = connection;
        self
    }

    /// Local address of the listener for `station`, if it is acquired.
    pub fn local_addr(&self, station: &str) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|l| l.station.name == station)
            .and_then(|l| l.listener.local_addr().ok())
    }

    /// Local address of the connection manager listener, if one is configured.
    pub fn connman_addr(&self) -> Option<SocketAddr> {
        self.connman
            .as_ref()
            .and_then(|c| c.listener.local_addr().ok())
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.context.sessions
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Run every accept loop until shutdown. On shutdown each loop stops accepting, alerts
    /// its live stations, and waits for their sessions to end.
    pub async fn run(mut self) {
        let mut loops = JoinSet::new();
        if let Some(connman) = self.connman.take() {
            loops.spawn(connman::accept_loop(
                connman,
                self.context.connection.clone(),
                self.shutdown_rx.clone(),
            ));
        }
        for listener in self.listeners.drain(..) {
            loops.spawn(accept_loop(
                listener,
                self.context.clone(),
                self.shutdown_rx.clone(),
            ));
        }

        if loops.is_empty() {
            let _ = self.shutdown_rx.changed().await;
        }
        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "accept loop ended abnormally");
            }
        }
        info!("data manager stopped");
    }
}

async fn accept_loop(
    listener: StationListener,
    context: SessionContext,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let station = listener.station;
    let mut sessions = JoinSet::new();
    loop {
        let (stream, addr) = tokio::select! {
            result = listener.listener.accept() => {
                match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(station = %station.name, error = %e, "accept error");
                        continue;
                    }
                }
            }
            Some(_) = sessions.join_next(), if !sessions.is_empty() => continue,
            _ = shutdown_rx.changed() => {
                info!(station = %station.name, "stopping accept loop");
                break;
            }
        };

        info!(station = %station.name, %addr, "accepted station connection");
        let conn = Connection::from_tcp(station.name.clone(), stream, context.connection.clone());
        let factory = Arc::new(FrameFactory::new(
            context.creator.clone(),
            station.frame_destination.clone(),
        ));
        let id = context.sessions.register(conn.clone(), Arc::clone(&factory));
        let mut session = StationSession::new(
            conn,
            Arc::clone(&station),
            factory,
            context.timing,
            context.sinks.clone(),
        );
        if let Some(store) = &context.gap_store {
            session = session.with_gap_store(store.clone());
        }
        let registry = context.sessions.clone();
        sessions.spawn(async move {
            session.run().await;
            registry.unregister(id);
        });
    }

    context
        .sessions
        .alert_station(&station.name, SHUTDOWN_REASON)
        .await;
    debug!(station = %station.name, live = sessions.len(), "waiting for sessions to end");
    while sessions.join_next().await.is_some() {}
}

async fn bind_connman(
    config: &DataManConfig,
    port: u16,
    listeners: &[StationListener],
) -> Result<ConnManListener> {
    let addr = format!("{}:{}", config.bind_address, port);
    let bind_error = |source| DataManError::Bind {
        station: CONNMAN_NAME.to_owned(),
        port,
        source,
    };
    let listener = TcpListener::bind(&addr).await.map_err(bind_error)?;
    let mut bound = Vec::with_capacity(listeners.len());
    for l in listeners {
        let local = l.listener.local_addr().map_err(bind_error)?;
        bound.push((Arc::clone(&l.station), local.port()));
    }
    info!(%addr, stations = bound.len(), "connection manager bound");
    Ok(ConnManListener {
        listener,
        responder: Arc::new(Responder::new(config, bound)),
    })
}
