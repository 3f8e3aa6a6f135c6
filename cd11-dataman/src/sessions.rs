//! Live station sessions, for shutdown and inspection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cd11_rs_connection::Connection;
use cd11_rs_protocol::FrameFactory;
use tracing::info;

use crate::station::alert_and_close;

/// Snapshot of one live session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: u64,
    pub station: String,
    pub peer: Option<SocketAddr>,
}

struct Entry {
    conn: Connection,
    factory: Arc<FrameFactory>,
}

struct RegistryInner {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, Entry>>,
}

/// Thread-safe session registry. Clone is cheap (Arc).
#[derive(Clone)]
pub struct SessionRegistry(Arc<RegistryInner>);

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self(Arc::new(RegistryInner {
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        }))
    }

    pub(crate) fn register(&self, conn: Connection, factory: Arc<FrameFactory>) -> u64 {
        let id = self.0.next_id.fetch_add(1, Ordering::Relaxed);
        self.0
            .sessions
            .lock()
            .unwrap()
            .insert(id, Entry { conn, factory });
        id
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.0.sessions.lock().unwrap().remove(&id);
    }

    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut out: Vec<SessionInfo> = self
            .0
            .sessions
            .lock()
            .unwrap()
            .iter()
            .map(|(&id, entry)| SessionInfo {
                id,
                station: entry.conn.station().to_owned(),
                peer: entry.conn.peer_addr(),
            })
            .collect();
        out.sort_by_key(|s| s.id);
        out
    }

    pub fn len(&self) -> usize {
        self.0.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send every live session of `station` an ALERT carrying `reason`, then close it.
    pub(crate) async fn alert_station(&self, station: &str, reason: &str) {
        let live: Vec<(Connection, Arc<FrameFactory>)> = self
            .0
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.conn.station() == station)
            .map(|e| (e.conn.clone(), Arc::clone(&e.factory)))
            .collect();
        info!(station, sessions = live.len(), reason, "alerting live sessions");
        for (conn, factory) in live {
            alert_and_close(&conn, &factory, reason).await;
        }
    }
}
