use std::net::SocketAddr;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cd11_rs_protocol::parser::parse_slice;
use cd11_rs_protocol::{Frame, FrameDecoder, FrameOrMalformed};
use futures_core::Stream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{debug, info, trace, warn};

use crate::error::{ConnectionError, Result};
use crate::state::{ConnectionConfig, ConnectionState};

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Inner {
    station: String,
    peer: Option<SocketAddr>,
    config: ConnectionConfig,
    /// Taken by the single `receive()` call.
    reader: Mutex<Option<BoxReader>>,
    writer: tokio::sync::Mutex<BufWriter<BoxWriter>>,
    closing: AtomicBool,
    state: watch::Sender<ConnectionState>,
}

/// One station session bound to one socket. Clone is cheap (Arc).
///
/// Sends are serialized through a single writer. Once [`close()`](Self::close) has been
/// called no new frame is written; a write already in progress finishes.
#[derive(Clone)]
pub struct Connection(Arc<Inner>);

impl Connection {
    pub fn new<R, W>(station: impl Into<String>, reader: R, writer: W, config: ConnectionConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::build(station.into(), None, Box::new(reader), Box::new(writer), config)
    }

    /// Wrap an accepted station socket.
    pub fn from_tcp(station: impl Into<String>, stream: TcpStream, config: ConnectionConfig) -> Self {
        stream.set_nodelay(true).ok();
        let peer = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        Self::build(
            station.into(),
            peer,
            Box::new(read_half),
            Box::new(write_half),
            config,
        )
    }

    fn build(
        station: String,
        peer: Option<SocketAddr>,
        reader: BoxReader,
        writer: BoxWriter,
        config: ConnectionConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Open);
        Self(Arc::new(Inner {
            station,
            peer,
            config,
            reader: Mutex::new(Some(reader)),
            writer: tokio::sync::Mutex::new(BufWriter::new(writer)),
            closing: AtomicBool::new(false),
            state,
        }))
    }

    pub fn station(&self) -> &str {
        &self.0.station
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.0.peer
    }

    pub fn state(&self) -> ConnectionState {
        *self.0.state.borrow()
    }

    pub(crate) fn drain_timeout(&self) -> std::time::Duration {
        self.0.config.drain_timeout
    }

    pub fn is_closing(&self) -> bool {
        self.0.closing.load(Ordering::Acquire)
    }

    /// Write one frame.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        self.send_all(std::iter::once(frame)).await
    }

    /// Write a finite batch in order, without interleaving other senders.
    pub async fn send_all<'a, I>(&self, frames: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Frame>,
    {
        let mut writer = self.0.writer.lock().await;
        for frame in frames {
            self.write_frame(&mut writer, frame).await?;
        }
        self.flush(&mut writer).await
    }

    /// Write frames as the producer yields them, until it ends or the connection closes.
    ///
    /// Each frame is flushed before the next one is pulled, so a slow socket holds the
    /// producer back. Returns the number of frames written.
    pub async fn send_continuous<S>(&self, frames: S) -> Result<usize>
    where
        S: Stream<Item = Frame>,
    {
        let mut frames = pin!(frames);
        let mut sent = 0;
        while let Some(frame) = frames.next().await {
            if self.is_closing() {
                debug!(station = %self.0.station, sent, "closing, continuous send stopped");
                break;
            }
            let mut writer = self.0.writer.lock().await;
            self.write_frame(&mut writer, &frame).await?;
            self.flush(&mut writer).await?;
            sent += 1;
        }
        Ok(sent)
    }

    async fn write_frame(&self, writer: &mut BufWriter<BoxWriter>, frame: &Frame) -> Result<()> {
        if self.is_closing() {
            return Err(ConnectionError::Closing);
        }
        trace!(
            station = %self.0.station,
            frame_type = %frame.frame_type(),
            seq = frame.sequence_number(),
            "sending"
        );
        let bytes = frame.to_bytes();
        if let Err(e) = writer.write_all(&bytes).await {
            warn!(station = %self.0.station, error = %e, "write failed");
            self.close();
            return Err(ConnectionError::Io(e));
        }
        Ok(())
    }

    async fn flush(&self, writer: &mut BufWriter<BoxWriter>) -> Result<()> {
        if let Err(e) = writer.flush().await {
            warn!(station = %self.0.station, error = %e, "flush failed");
            self.close();
            return Err(ConnectionError::Io(e));
        }
        Ok(())
    }

    /// Continuous sequence of received frames.
    ///
    /// Malformed input is logged and yielded; it never ends the stream. A frame whose
    /// verification value does not match is logged and yielded as a frame. The stream ends when
    /// the station disconnects, a read fails, or the connection starts closing. The first two
    /// also close the connection.
    pub fn receive(&self) -> Result<impl Stream<Item = FrameOrMalformed> + Send + 'static> {
        let mut reader = self
            .0
            .reader
            .lock()
            .unwrap()
            .take()
            .ok_or(ConnectionError::AlreadyReceiving)?;
        let conn = self.clone();
        let mut state_rx = self.0.state.subscribe();

        Ok(async_stream::stream! {
            let station = conn.0.station.clone();
            let mut decoder = FrameDecoder::with_max_frame_len(conn.0.config.max_frame_len);
            let mut buf = vec![0u8; conn.0.config.read_chunk_size];

            loop {
                while let Some(slice) = decoder.decode() {
                    let item = parse_slice(slice);
                    match &item {
                        FrameOrMalformed::Malformed(m) => warn!(
                            %station,
                            cause = %m.cause,
                            len = m.bytes.len(),
                            tag = ?m.type_tag(),
                            "malformed frame"
                        ),
                        FrameOrMalformed::Frame(frame) if !frame.has_valid_verification() => warn!(
                            %station,
                            creator = %frame.header().frame_creator,
                            frame_type = %frame.frame_type(),
                            seq = frame.sequence_number(),
                            "frame failed verification"
                        ),
                        FrameOrMalformed::Frame(_) => {}
                    }
                    yield item;
                }

                let read = tokio::select! {
                    result = reader.read(&mut buf) => result,
                    _ = until_closing(&mut state_rx) => {
                        debug!(%station, "receive stopped by close");
                        break;
                    }
                };
                match read {
                    Ok(0) => {
                        info!(%station, buffered = decoder.buffered(), "station disconnected");
                        conn.close();
                        break;
                    }
                    Ok(n) => decoder.extend(&buf[..n]),
                    Err(e) => {
                        warn!(%station, error = %e, "read failed");
                        conn.close();
                        break;
                    }
                }
            }
        })
    }

    /// Request close. Only the first call signals the transport and returns `true`.
    pub fn close(&self) -> bool {
        if self
            .0
            .closing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.0.state.send_replace(ConnectionState::Closing);
            info!(station = %self.0.station, "connection close signal emitted");
            true
        } else {
            debug!(station = %self.0.station, "connection already closing");
            false
        }
    }

    /// Resolves once close has been requested.
    pub async fn closing(&self) {
        until_closing(&mut self.0.state.subscribe()).await;
    }

    /// Resolves once the socket has been released.
    pub async fn closed(&self) {
        let mut rx = self.0.state.subscribe();
        let _ = rx.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Wait for any in-flight write, shut down the socket, and enter `Closed`.
    ///
    /// The wait is bounded by `release_timeout`; a writer still blocked after that is left
    /// behind and the connection enters `Closed` without a socket shutdown.
    pub(crate) async fn release(&self) {
        self.close();
        let shutdown = async {
            let mut writer = self.0.writer.lock().await;
            writer.shutdown().await
        };
        match tokio::time::timeout(self.0.config.release_timeout, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(station = %self.0.station, error = %e, "socket shutdown failed"),
            Err(_) => warn!(
                station = %self.0.station,
                timeout = ?self.0.config.release_timeout,
                "writer busy, released without socket shutdown"
            ),
        }
        self.0.state.send_replace(ConnectionState::Closed);
        info!(station = %self.0.station, "connection released");
    }
}

async fn until_closing(rx: &mut watch::Receiver<ConnectionState>) {
    let _ = rx.wait_for(|s| *s != ConnectionState::Open).await;
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("station", &self.0.station)
            .field("peer", &self.0.peer)
            .field("state", &self.state())
            .finish()
    }
}
