//! Connection manager: answers CONNECTION_REQUEST frames with the address of the
//! requesting station's data listener.
//!
//! Stations on the ignore list get no answer, nor do stations that are not acquired or
//! not configured at all.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::pin::pin;
use std::sync::Arc;

use cd11_rs_connection::{
    CompositeHandler, Connection, ConnectionConfig, ConnectionError, HandlerError, serve_dispatch,
};
use cd11_rs_protocol::payload::{ConnectionExchange, Payload};
use cd11_rs_protocol::{Frame, FrameFactory, FrameOrMalformed, FrameType};
use futures_core::Stream;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::config::{DataManConfig, StationConfig};

/// Label for connection manager sockets until a station names itself.
pub const CONNMAN_PEER: &str = "CONNMAN";

struct Redirect {
    station: Arc<StationConfig>,
    /// Port the station's data listener is actually bound to.
    port: u16,
}

/// Resolves connection requests against the configured stations.
pub(crate) struct Responder {
    name: String,
    responder_type: String,
    address: Ipv4Addr,
    redirects: HashMap<String, Redirect>,
    unacquired: HashSet<String>,
    ignored: HashSet<String>,
}

impl Responder {
    /// `bound` pairs each acquired station with its data listener's port.
    pub(crate) fn new(config: &DataManConfig, bound: Vec<(Arc<StationConfig>, u16)>) -> Self {
        let redirects = bound
            .into_iter()
            .map(|(station, port)| (station.name.clone(), Redirect { station, port }))
            .collect();
        Self {
            name: config.frame_creator.clone(),
            responder_type: config.responder_type.clone(),
            address: config.data_consumer_address,
            redirects,
            unacquired: config
                .stations
                .iter()
                .filter(|s| !s.acquired)
                .map(|s| s.name.clone())
                .collect(),
            ignored: config.ignored_stations.iter().cloned().collect(),
        }
    }

    /// The response for `request`, or `None` when the station gets no answer.
    pub(crate) fn respond(&self, request: &ConnectionExchange) -> Option<ConnectionExchange> {
        let station = request.name.as_str();
        if self.ignored.contains(station) {
            debug!(station, "connection request from ignored station");
            return None;
        }
        let Some(redirect) = self.redirects.get(station) else {
            if self.unacquired.contains(station) {
                info!(station, "connection request from station not acquired");
            } else {
                warn!(station, "connection request from unknown station");
            }
            return None;
        };

        let config = &redirect.station;
        if request.station_type != config.station_type || request.service_type != config.service_type {
            warn!(
                station,
                station_type = %request.station_type,
                service_type = %request.service_type,
                expected_station_type = %config.station_type,
                expected_service_type = %config.service_type,
                "connection request does not match station configuration"
            );
        }
        if request.major_version != config.protocol.major || request.minor_version != config.protocol.minor {
            debug!(
                station,
                major = request.major_version,
                minor = request.minor_version,
                "station requested a different protocol version"
            );
        }

        Some(ConnectionExchange {
            major_version: config.protocol.major,
            minor_version: config.protocol.minor,
            name: self.name.clone(),
            station_type: self.responder_type.clone(),
            service_type: config.service_type.clone(),
            ip_address: self.address,
            port: redirect.port,
            second_ip_address: Ipv4Addr::UNSPECIFIED,
            second_port: 0,
        })
    }
}

pub(crate) struct ConnManListener {
    pub(crate) listener: TcpListener,
    pub(crate) responder: Arc<Responder>,
}

pub(crate) async fn accept_loop(
    listener: ConnManListener,
    connection: ConnectionConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();
    let mut live: Vec<Connection> = Vec::new();
    loop {
        let (stream, addr) = tokio::select! {
            result = listener.listener.accept() => {
                match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "connection manager accept error");
                        continue;
                    }
                }
            }
            Some(_) = sessions.join_next(), if !sessions.is_empty() => continue,
            _ = shutdown_rx.changed() => {
                info!("stopping connection manager");
                break;
            }
        };

        debug!(%addr, "connection manager accepted");
        let conn = Connection::from_tcp(CONNMAN_PEER, stream, connection.clone());
        live.retain(|c| !c.is_closing());
        live.push(conn.clone());
        sessions.spawn(session(conn, Arc::clone(&listener.responder)));
    }

    for conn in &live {
        conn.close();
    }
    while sessions.join_next().await.is_some() {}
}

/// Answer connection requests on one socket until the station hangs up.
async fn session(conn: Connection, responder: Arc<Responder>) {
    let frames = match conn.receive() {
        Ok(frames) => frames,
        Err(e) => {
            warn!(error = %e, "cannot receive from connection manager socket");
            return;
        }
    };

    let dispatcher = CompositeHandler::new();
    let reply_conn = conn.clone();
    dispatcher.register_frame(FrameType::ConnectionRequest, move |frame: Frame| {
        let conn = reply_conn.clone();
        let responder = Arc::clone(&responder);
        async move {
            let Payload::ConnectionRequest(request) = frame.payload() else {
                return Ok(());
            };
            let Some(response) = responder.respond(request) else {
                return Ok(());
            };
            let port = response.port;
            let reply = FrameFactory::new(responder.name.clone(), request.name.clone())
                .wrap_connection_response(response);
            match conn.send(&reply).await {
                Ok(()) => {
                    info!(station = %request.name, port, "connection response sent");
                    Ok(())
                }
                Err(ConnectionError::Closing) => Ok(()),
                Err(e) => Err(HandlerError::from(e)),
            }
        }
    });

    let handle = dispatcher.handle(drop_malformed(frames));
    serve_dispatch(&conn, handle, std::future::pending::<()>()).await;
    debug!(peer = ?conn.peer_addr(), "connection manager session ended");
}

fn drop_malformed<S>(received: S) -> impl Stream<Item = Frame> + Send + 'static
where
    S: Stream<Item = FrameOrMalformed> + Send + 'static,
{
    async_stream::stream! {
        let mut received = pin!(received);
        while let Some(item) = received.next().await {
            match item {
                FrameOrMalformed::Frame(frame) => yield frame,
                FrameOrMalformed::Malformed(m) => {
                    warn!(cause = %m.cause, len = m.bytes.len(), "malformed connection manager input dropped");
                }
            }
        }
    }
}
