//! Drives a station session to completion and releases the socket.

use std::future::Future;

use tracing::{debug, warn};

use crate::connection::Connection;
use crate::dispatch::DispatchHandle;

/// Run `session` until it finishes or close is requested, then release the socket.
///
/// When close wins, `session` is dropped, which cancels whatever it was awaiting.
/// Release waits for the writer, so a frame already being written is finished first.
pub async fn serve<F>(conn: &Connection, session: F)
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = conn.closing() => {
            debug!(station = conn.station(), "close requested, ending session");
        }
        _ = session => {
            debug!(station = conn.station(), "session finished");
        }
    }
    conn.release().await;
}

/// Like [`serve`], with a running frame dispatch that ends the session when it finishes.
///
/// Once the session is ending, close is requested, which ends the dispatch input. Handlers
/// get `drain_timeout` to finish the frames already routed to them; the dispatch is then
/// disposed and joined before the socket is released, so none of its handlers outlive the
/// session.
pub async fn serve_dispatch<F>(conn: &Connection, mut dispatch: DispatchHandle, session: F)
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = conn.closing() => {
            debug!(station = conn.station(), "close requested, ending session");
        }
        result = dispatch.join() => match result {
            Ok(()) => debug!(station = conn.station(), "frame dispatch finished"),
            Err(e) => warn!(station = conn.station(), error = %e, "frame handling failed, closing session"),
        },
        _ = session => {
            debug!(station = conn.station(), "session finished");
        }
    }
    conn.close();

    let drain = conn.drain_timeout();
    match tokio::time::timeout(drain, dispatch.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(station = conn.station(), error = %e, "frame handling failed while closing"),
        Err(_) => warn!(station = conn.station(), ?drain, "frame handlers still busy, disposing dispatch"),
    }
    dispatch.dispose();
    if let Err(e) = dispatch.join().await {
        warn!(station = conn.station(), error = %e, "frame handling failed while disposing");
    }
    conn.release().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{CompositeHandler, HandlerError};
    use crate::state::{ConnectionConfig, ConnectionState};
    use cd11_rs_protocol::{FrameFactory, FrameOrMalformed, FrameType};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn close_releases_socket() {
        let (ours, mut theirs) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(ours);
        let conn = Connection::new("LBTB", read, write, ConnectionConfig::default());

        let closer = conn.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            closer.close();
        });
        serve(&conn, std::future::pending::<()>()).await;

        assert_eq!(conn.state(), ConnectionState::Closed);
        // Writer shut down: the station sees EOF.
        let mut buf = [0u8; 1];
        assert_eq!(theirs.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn finished_session_releases_socket() {
        let (ours, _theirs) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(ours);
        let conn = Connection::new("LBTB", read, write, ConnectionConfig::default());

        serve(&conn, async {}).await;
        assert!(conn.is_closing());
        conn.closed().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_dispatch_handlers() {
        let (ours, mut theirs) = tokio::io::duplex(64 * 1024);
        let (read, write) = tokio::io::split(ours);
        let conn = Connection::new("LBTB", read, write, ConnectionConfig::default());

        // Consumer never reads past the first slot, so the handler parks on the sink.
        let (sink_tx, mut sink_rx) = mpsc::channel::<u64>(1);
        let dispatcher = CompositeHandler::new();
        dispatcher.register_frame(FrameType::Acknack, move |frame: cd11_rs_protocol::Frame| {
            let sink_tx = sink_tx.clone();
            async move {
                sink_tx
                    .send(frame.sequence_number())
                    .await
                    .map_err(|_| HandlerError::from("sink closed"))
            }
        });
        let closer = conn.clone();
        dispatcher.register_frame(FrameType::Alert, move |_frame| {
            closer.close();
            std::future::ready(Ok::<(), HandlerError>(()))
        });

        let station = FrameFactory::new("LBTB", "0");
        let mut bytes = Vec::new();
        for _ in 0..3 {
            bytes.extend(station.wrap_acknack(Default::default()).to_bytes());
        }
        bytes.extend(station.wrap_alert("bye").to_bytes());
        theirs.write_all(&bytes).await.unwrap();

        let frames = conn
            .receive()
            .unwrap()
            .filter_map(FrameOrMalformed::into_frame);
        let handle = dispatcher.handle(frames);
        drop(dispatcher);
        tokio::time::timeout(
            Duration::from_secs(30),
            serve_dispatch(&conn, handle, std::future::pending::<()>()),
        )
        .await
        .unwrap();

        assert_eq!(conn.state(), ConnectionState::Closed);
        // Every sender clone lived in a handler; once the buffered slot is drained the
        // sink reports them all gone.
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            let mut seqs = Vec::new();
            while let Some(seq) = sink_rx.recv().await {
                seqs.push(seq);
            }
            seqs
        })
        .await
        .unwrap();
        assert!(drained.is_empty() || drained == [0], "{drained:?}");
    }

    #[tokio::test]
    async fn close_lets_handlers_finish_routed_frames() {
        let (ours, mut theirs) = tokio::io::duplex(64 * 1024);
        let (read, write) = tokio::io::split(ours);
        let conn = Connection::new("LBTB", read, write, ConnectionConfig::default());

        let (sink_tx, mut sink_rx) = mpsc::channel::<u64>(16);
        let dispatcher = CompositeHandler::new();
        dispatcher.register_frame(FrameType::Acknack, move |frame: cd11_rs_protocol::Frame| {
            let sink_tx = sink_tx.clone();
            async move {
                tokio::task::yield_now().await;
                sink_tx
                    .send(frame.sequence_number())
                    .await
                    .map_err(|_| HandlerError::from("sink closed"))
            }
        });

        // The station sends three frames and hangs up straight away.
        let station = FrameFactory::new("LBTB", "0");
        let mut bytes = Vec::new();
        for _ in 0..3 {
            bytes.extend(station.wrap_acknack(Default::default()).to_bytes());
        }
        theirs.write_all(&bytes).await.unwrap();
        theirs.shutdown().await.unwrap();

        let frames = conn
            .receive()
            .unwrap()
            .filter_map(FrameOrMalformed::into_frame);
        let handle = dispatcher.handle(frames);
        drop(dispatcher);
        serve_dispatch(&conn, handle, std::future::pending::<()>()).await;

        let mut seqs = Vec::new();
        while let Some(seq) = sink_rx.recv().await {
            seqs.push(seq);
        }
        assert_eq!(seqs, [0, 1, 2]);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
