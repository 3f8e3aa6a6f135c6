//! Per-station session: frame handlers, periodic acknacks, gap state persistence, and the
//! heartbeat watchdog.

use std::pin::pin;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use cd11_rs_connection::dispatch::{BoxFuture, FrameGroup};
use cd11_rs_connection::{CompositeHandler, Connection, ConnectionError, HandlerError, serve_dispatch};
use cd11_rs_protocol::payload::Payload;
use cd11_rs_protocol::{Frame, FrameFactory, FrameOrMalformed, FrameType, GapList, MalformedFrame};
use futures_core::Stream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::config::StationConfig;
use crate::gap_store::GapStateStore;
use crate::record::StationRecord;

/// Frame set reported in acknacks until the station names its own.
pub const DEFAULT_FRAME_SET: &str = "0:0";

/// Longest an outbound ALERT may wait for the writer.
pub const ALERT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where parsed output goes.
#[derive(Clone, Debug)]
pub struct Sinks {
    pub records: mpsc::Sender<StationRecord>,
    pub malformed: mpsc::Sender<MalformedFrame>,
}

#[derive(Clone, Copy, Debug)]
pub struct SessionTiming {
    pub heartbeat: Duration,
    pub acknack_interval: Duration,
    /// Interval between gap state writes, when a store is configured.
    pub gap_persist: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(120),
            acknack_interval: Duration::from_secs(55),
            gap_persist: Duration::from_secs(300),
        }
    }
}

/// State shared between one station's handlers.
pub struct StationSession {
    conn: Connection,
    station: Arc<StationConfig>,
    factory: Arc<FrameFactory>,
    gaps: Arc<Mutex<GapList>>,
    frame_set: Arc<OnceLock<String>>,
    timing: SessionTiming,
    sinks: Sinks,
    gap_store: Option<GapStateStore>,
}

impl StationSession {
    pub fn new(
        conn: Connection,
        station: Arc<StationConfig>,
        factory: Arc<FrameFactory>,
        timing: SessionTiming,
        sinks: Sinks,
    ) -> Self {
        Self {
            conn,
            station,
            factory,
            gaps: Arc::new(Mutex::new(GapList::new())),
            frame_set: Arc::new(OnceLock::new()),
            timing,
            sinks,
            gap_store: None,
        }
    }

    /// Load the gap list from `store` when the session starts, write it back periodically
    /// and at the end, and clear it on CUSTOM_RESET.
    pub fn with_gap_store(mut self, store: GapStateStore) -> Self {
        self.gap_store = Some(store);
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn frame_set(&self) -> &str {
        self.frame_set
            .get()
            .map(String::as_str)
            .unwrap_or(DEFAULT_FRAME_SET)
    }

    /// Receive, dispatch, and keep the session alive until the station goes away or close
    /// is requested. The socket is released before this returns.
    pub async fn run(self) {
        let frames = match self.conn.receive() {
            Ok(frames) => frames,
            Err(e) => {
                warn!(station = %self.station.name, error = %e, "cannot receive from connection");
                return;
            }
        };
        if let Some(store) = &self.gap_store {
            let stored = store.load(&self.station.name).await;
            *self.gaps.lock().unwrap() = stored;
        }
        let (activity_tx, activity_rx) = watch::channel(());
        let input = split_malformed(
            frames,
            self.station.name.clone(),
            self.sinks.malformed.clone(),
            activity_tx,
        );
        let handle = self.dispatcher().handle(input);

        serve_dispatch(&self.conn, handle, async {
            tokio::select! {
                _ = self.heartbeat(activity_rx) => {}
                _ = self.acknack_loop() => {}
                _ = self.persist_loop() => {}
            }
        })
        .await;
        if let Some(store) = &self.gap_store {
            self.persist_gaps(store).await;
        }
        info!(station = %self.station.name, "station session ended");
    }

    fn dispatcher(&self) -> CompositeHandler {
        let dispatcher = CompositeHandler::new();
        let name = self.station.name.clone();

        let gaps = Arc::clone(&self.gaps);
        let frame_set = Arc::clone(&self.frame_set);
        let station = name.clone();
        dispatcher.register_frame(FrameType::Acknack, move |frame: Frame| {
            if let Payload::Acknack(ack) = frame.payload() {
                if frame_set.set(ack.frame_set_acked.clone()).is_ok() {
                    info!(%station, frame_set = %ack.frame_set_acked, "frame set recorded");
                }
                if gaps.lock().unwrap().check_for_reset(ack) {
                    info!(%station, highest = ack.highest_seq, "gap list reset by acknack");
                }
            }
            handled()
        });

        dispatcher.register_frame(FrameType::Data, self.data_handler());
        dispatcher.register_frame(FrameType::CdOneEncapsulation, self.data_handler());

        let gaps = Arc::clone(&self.gaps);
        dispatcher.register_frame(FrameType::CommandResponse, move |frame: Frame| {
            gaps.lock().unwrap().process(frame.sequence_number());
            handled()
        });

        let conn = self.conn.clone();
        let factory = Arc::clone(&self.factory);
        dispatcher.register_group(FrameType::OptionRequest, move |group: FrameGroup| {
            let conn = conn.clone();
            let factory = Arc::clone(&factory);
            async move {
                let responses = group.filter_map(move |frame| match frame.into_payload() {
                    Payload::OptionRequest(request) => Some(factory.wrap_response(request)),
                    _ => None,
                });
                match conn.send_continuous(responses).await {
                    Ok(sent) => {
                        debug!(station = conn.station(), sent, "option responses sent");
                        Ok(())
                    }
                    Err(ConnectionError::Closing) => Ok(()),
                    Err(e) => Err(HandlerError::from(e)),
                }
            }
        });

        let conn = self.conn.clone();
        dispatcher.register_frame(FrameType::Alert, move |frame: Frame| {
            if let Payload::Alert(alert) = frame.payload() {
                info!(station = conn.station(), message = %alert.message, "alert received, closing");
            }
            conn.close();
            handled()
        });

        let conn = self.conn.clone();
        let gaps = Arc::clone(&self.gaps);
        let store = self.gap_store.clone();
        dispatcher.register_frame(FrameType::CustomReset, move |_frame: Frame| {
            gaps.lock().unwrap().reset();
            info!(station = conn.station(), "custom reset received, gap list cleared");
            let conn = conn.clone();
            let store = store.clone();
            async move {
                // Cleared before close: closing ends this handler.
                if let Some(store) = store {
                    if let Err(e) = store.clear(conn.station()).await {
                        warn!(station = conn.station(), error = %e, "gap state not cleared");
                    }
                }
                conn.close();
                Ok::<(), HandlerError>(())
            }
        });

        debug!(station = %name, "frame handlers registered");
        dispatcher
    }

    fn data_handler(
        &self,
    ) -> impl Fn(Frame) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync + 'static {
        let gaps = Arc::clone(&self.gaps);
        let station = Arc::clone(&self.station);
        let records = self.sinks.records.clone();
        move |frame: Frame| {
            gaps.lock().unwrap().process(frame.sequence_number());
            let record = StationRecord::from_frame(&frame, &station);
            let records = records.clone();
            Box::pin(async move {
                if let Some(record) = record {
                    records
                        .send(record)
                        .await
                        .map_err(|_| HandlerError::from("station record sink closed"))?;
                }
                Ok::<(), HandlerError>(())
            })
        }
    }

    /// Alert and close if nothing arrives within the heartbeat interval.
    async fn heartbeat(&self, mut activity: watch::Receiver<()>) {
        loop {
            match tokio::time::timeout(self.timing.heartbeat, activity.changed()).await {
                Ok(Ok(())) => {}
                // Receive ended; dispatch completion ends the session.
                Ok(Err(_)) => std::future::pending::<()>().await,
                Err(_) => {
                    warn!(
                        station = %self.station.name,
                        heartbeat = ?self.timing.heartbeat,
                        "no frames within heartbeat interval, closing"
                    );
                    self.shutdown("heartbeat timeout").await;
                    return;
                }
            }
        }
    }

    async fn acknack_loop(&self) {
        let interval = self.timing.acknack_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let ack = self.gaps.lock().unwrap().acknack(self.frame_set());
            if let Err(e) = self.conn.send(&self.factory.wrap_acknack(ack)).await {
                debug!(station = %self.station.name, error = %e, "acknack not sent, stopping");
                return;
            }
        }
    }

    async fn persist_loop(&self) {
        let Some(store) = &self.gap_store else {
            return std::future::pending::<()>().await;
        };
        let every = self.timing.gap_persist;
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.persist_gaps(store).await;
        }
    }

    /// An empty list is stored as no state at all.
    async fn persist_gaps(&self, store: &GapStateStore) {
        let gaps = self.gaps.lock().unwrap().clone();
        let result = if gaps.is_empty() {
            store.clear(&self.station.name).await
        } else {
            store.persist(&self.station.name, &gaps).await
        };
        if let Err(e) = result {
            warn!(station = %self.station.name, error = %e, "gap state not persisted");
        }
    }

    /// Send an ALERT, then close.
    pub async fn shutdown(&self, reason: &str) {
        alert_and_close(&self.conn, &self.factory, reason).await;
    }
}

fn handled() -> std::future::Ready<Result<(), HandlerError>> {
    std::future::ready(Ok(()))
}

/// The ALERT write is bounded by [`ALERT_TIMEOUT`]; close is requested either way.
pub(crate) async fn alert_and_close(conn: &Connection, factory: &FrameFactory, reason: &str) {
    match tokio::time::timeout(ALERT_TIMEOUT, conn.send(&factory.wrap_alert(reason))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(station = conn.station(), error = %e, "alert not sent"),
        Err(_) => warn!(station = conn.station(), reason, "alert write timed out"),
    }
    conn.close();
}

/// Frames go on to dispatch; malformed input goes to the malformed sink tagged with the
/// station. Every received unit counts as heartbeat activity.
fn split_malformed<S>(
    received: S,
    station: String,
    malformed: mpsc::Sender<MalformedFrame>,
    activity: watch::Sender<()>,
) -> impl Stream<Item = Frame> + Send + 'static
where
    S: Stream<Item = FrameOrMalformed> + Send + 'static,
{
    async_stream::stream! {
        let mut received = pin!(received);
        while let Some(item) = received.next().await {
            activity.send_replace(());
            match item {
                FrameOrMalformed::Frame(frame) => yield frame,
                FrameOrMalformed::Malformed(m) => {
                    if malformed.send(m.with_station(&station)).await.is_err() {
                        debug!(%station, "malformed sink closed, discarding");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gap_store::tests::TempDir;
    use crate::record::tests::data_payload;
    use cd11_rs_connection::{ConnectionConfig, ConnectionState};
    use cd11_rs_protocol::parser::parse_slice;
    use cd11_rs_protocol::payload::{Acknack, CommandResponse, CommandTarget, OptionExchange};
    use cd11_rs_protocol::{FrameDecoder, JulianTime};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    struct Harness {
        session: StationSession,
        station_io: DuplexStream,
        records: mpsc::Receiver<StationRecord>,
        malformed: mpsc::Receiver<MalformedFrame>,
    }

    fn harness(timing: SessionTiming) -> Harness {
        harness_with(timing, 64 * 1024, 16)
    }

    /// `pipe` bytes of socket buffering each way, `records` slots in the record sink.
    fn harness_with(timing: SessionTiming, pipe: usize, records: usize) -> Harness {
        let (ours, station_io) = tokio::io::duplex(pipe);
        let (read, write) = tokio::io::split(ours);
        let conn = Connection::new("LBTB", read, write, ConnectionConfig::default());
        let (records_tx, records) = mpsc::channel(records);
        let (malformed_tx, malformed) = mpsc::channel(16);
        let station = Arc::new(
            StationConfig::new("LBTB", 0).with_channel("LBTB.BHZ.00", "LBTB.LBTB.BHZ"),
        );
        let session = StationSession::new(
            conn,
            station,
            Arc::new(FrameFactory::new("DATAMAN", "LBTB")),
            timing,
            Sinks {
                records: records_tx,
                malformed: malformed_tx,
            },
        );
        Harness {
            session,
            station_io,
            records,
            malformed,
        }
    }

    fn quiet() -> SessionTiming {
        SessionTiming {
            heartbeat: Duration::from_secs(3600),
            acknack_interval: Duration::from_secs(3600),
            gap_persist: Duration::from_secs(3600),
        }
    }

    fn command_response() -> Payload {
        Payload::CommandResponse(CommandResponse {
            target: CommandTarget {
                station: "LBTB".to_owned(),
                site: "LBTB".to_owned(),
                channel: "BHZ".to_owned(),
                location: "00".to_owned(),
                timestamp: JulianTime::from_unix_millis(0),
            },
            request: "status".to_owned(),
            response: "ok".to_owned(),
        })
    }

    /// Read frames written by the session until `n` have arrived.
    async fn read_frames(io: &mut DuplexStream, n: usize) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        while out.len() < n {
            let read = io.read(&mut buf).await.unwrap();
            assert!(read > 0, "session closed after {} frames", out.len());
            decoder.extend(&buf[..read]);
            while let Some(slice) = decoder.decode() {
                out.push(parse_slice(slice).into_frame().unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn option_request_answered_and_alert_closes() {
        let mut h = harness(quiet());
        let conn = h.session.connection().clone();
        let task = tokio::spawn(h.session.run());

        let station = FrameFactory::new("LBTB", "0");
        let request = station.wrap(Payload::OptionRequest(OptionExchange::new(1, "LBTB")));
        h.station_io.write_all(&request.to_bytes()).await.unwrap();

        let reply = read_frames(&mut h.station_io, 1).await.remove(0);
        assert_eq!(
            reply.payload(),
            &Payload::OptionResponse(OptionExchange::new(1, "LBTB"))
        );
        assert_eq!(reply.header().frame_creator, "DATAMAN");
        assert_eq!(reply.header().frame_destination, "LBTB");

        h.station_io
            .write_all(&station.wrap_alert("going down").to_bytes())
            .await
            .unwrap();
        task.await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn data_frames_become_records() {
        let mut h = harness(quiet());
        let task = tokio::spawn(h.session.run());

        let station = FrameFactory::new("LBTB", "0");
        let mut bytes = station.wrap(Payload::Data(data_payload(&["BHZ"]))).to_bytes();
        bytes.extend(station.wrap(Payload::CdOneEncapsulation(data_payload(&["BHE"]))).to_bytes());
        h.station_io.write_all(&bytes).await.unwrap();

        let first = h.records.recv().await.unwrap();
        assert_eq!(first.frame_type, FrameType::Data);
        assert_eq!(first.sequence_number, 0);
        assert_eq!(first.channels[0].channel_name, "LBTB.LBTB.BHZ");

        let second = h.records.recv().await.unwrap();
        assert_eq!(second.frame_type, FrameType::CdOneEncapsulation);
        assert_eq!(second.channels[0].channel_name, "LBTB.BHE.00");

        h.station_io.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_forwarded_with_station() {
        let mut h = harness(quiet());
        let task = tokio::spawn(h.session.run());

        let mut garbage = (-5i32).to_be_bytes().to_vec();
        garbage.resize(40, 0);
        h.station_io.write_all(&garbage).await.unwrap();

        let m = h.malformed.recv().await.unwrap();
        assert_eq!(m.station.as_deref(), Some("LBTB"));
        assert_eq!(m.type_tag(), Some(-5));

        h.station_io.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(h.records.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn acknack_reports_received_sequences() {
        let timing = SessionTiming {
            heartbeat: Duration::from_secs(600),
            acknack_interval: Duration::from_secs(55),
            ..quiet()
        };
        let mut h = harness(timing);
        let task = tokio::spawn(h.session.run());

        let station = FrameFactory::new("LBTB", "0");
        let mut bytes = station
            .wrap(Payload::Acknack(Acknack {
                frame_set_acked: "LBTB:0".to_owned(),
                ..Default::default()
            }))
            .to_bytes();
        // Sequences 1 and 3 arrive, 2 is lost.
        bytes.extend(station.wrap(command_response()).to_bytes());
        let _lost = station.wrap(command_response());
        bytes.extend(station.wrap(command_response()).to_bytes());
        h.station_io.write_all(&bytes).await.unwrap();

        let frames = read_frames(&mut h.station_io, 1).await;
        let Payload::Acknack(sent) = frames[0].payload() else {
            panic!("expected acknack, got {}", frames[0].frame_type());
        };
        assert_eq!(sent.frame_set_acked, "LBTB:0");
        assert_eq!((sent.lowest_seq, sent.highest_seq), (1, 3));
        assert_eq!(sent.gap_ranges, vec![(2, 3)]);

        h.station_io.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn acknack_before_station_names_frame_set() {
        let timing = SessionTiming {
            heartbeat: Duration::from_secs(600),
            acknack_interval: Duration::from_secs(55),
            ..quiet()
        };
        let mut h = harness(timing);
        let task = tokio::spawn(h.session.run());

        let frames = read_frames(&mut h.station_io, 1).await;
        let Payload::Acknack(sent) = frames[0].payload() else {
            panic!("expected acknack, got {}", frames[0].frame_type());
        };
        assert_eq!(sent.frame_set_acked, DEFAULT_FRAME_SET);
        assert_eq!((sent.lowest_seq, sent.highest_seq), (0, 0));

        h.station_io.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_timeout_alerts_and_closes() {
        let timing = SessionTiming {
            heartbeat: Duration::from_secs(120),
            acknack_interval: Duration::from_secs(3600),
            ..quiet()
        };
        let mut h = harness(timing);
        let conn = h.session.connection().clone();
        let task = tokio::spawn(h.session.run());

        let frames = read_frames(&mut h.station_io, 1).await;
        let Payload::Alert(alert) = frames[0].payload() else {
            panic!("expected alert, got {}", frames[0].frame_type());
        };
        assert_eq!(alert.message, "heartbeat timeout");

        task.await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn custom_reset_closes_session() {
        let mut h = harness(quiet());
        let conn = h.session.connection().clone();
        let task = tokio::spawn(h.session.run());

        let reset = FrameFactory::new("LBTB", "0").wrap(Payload::CustomReset(Vec::new()));
        h.station_io.write_all(&reset.to_bytes()).await.unwrap();
        task.await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn close_drops_handlers_blocked_on_sink() {
        // One record slot and nobody reading it: the data handler parks on the second send.
        let mut h = harness_with(quiet(), 64 * 1024, 1);
        let conn = h.session.connection().clone();
        let task = tokio::spawn(h.session.run());

        let station = FrameFactory::new("LBTB", "0");
        let mut bytes = Vec::new();
        for _ in 0..3 {
            bytes.extend(station.wrap(Payload::Data(data_payload(&["BHZ"]))).to_bytes());
        }
        bytes.extend(station.wrap_alert("going down").to_bytes());
        h.station_io.write_all(&bytes).await.unwrap();

        tokio::time::timeout(Duration::from_secs(30), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);

        // At most the buffered record, then the sink reports every sender gone: no
        // handler survived the session.
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            let mut seqs = Vec::new();
            while let Some(record) = h.records.recv().await {
                seqs.push(record.sequence_number);
            }
            seqs
        })
        .await
        .unwrap();
        assert!(drained.is_empty() || drained == [0], "{drained:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn close_completes_while_station_not_reading() {
        // Small pipe and a station that never reads its option responses.
        let h = harness_with(quiet(), 256, 16);
        let conn = h.session.connection().clone();
        let task = tokio::spawn(h.session.run());

        let station = FrameFactory::new("LBTB", "0");
        let requests: Vec<u8> = (0..20)
            .flat_map(|i| {
                station
                    .wrap(Payload::OptionRequest(OptionExchange::new(1, format!("LBTB{i}"))))
                    .to_bytes()
            })
            .collect();
        let (_station_read, mut station_write) = tokio::io::split(h.station_io);
        let writer = tokio::spawn(async move {
            let _ = station_write.write_all(&requests).await;
            station_write
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!task.is_finished());

        // Shutdown path: the ALERT cannot get through, close still happens.
        let factory = FrameFactory::new("DATAMAN", "LBTB");
        tokio::time::timeout(
            ALERT_TIMEOUT * 2,
            alert_and_close(&conn, &factory, "shutdown"),
        )
        .await
        .unwrap();
        tokio::time::timeout(Duration::from_secs(60), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        writer.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn stored_gap_state_resumes_and_is_written_back() {
        let dir = TempDir::new("resume");
        let store = GapStateStore::new(dir.path());
        let mut stored = GapList::new();
        for seq in [5, 6, 8] {
            stored.process(seq);
        }
        store.persist("LBTB", &stored).await.unwrap();

        let timing = SessionTiming {
            acknack_interval: Duration::from_secs(55),
            ..quiet()
        };
        let mut h = harness(timing);
        h.session = h.session.with_gap_store(store.clone());
        let task = tokio::spawn(h.session.run());

        // The first acknack reports what the previous session received.
        let frames = read_frames(&mut h.station_io, 1).await;
        let Payload::Acknack(sent) = frames[0].payload() else {
            panic!("expected acknack, got {}", frames[0].frame_type());
        };
        assert_eq!((sent.lowest_seq, sent.highest_seq), (5, 8));
        assert_eq!(sent.gap_ranges, vec![(7, 8)]);

        // Sequence 0 arrives, then the station leaves.
        let station = FrameFactory::new("LBTB", "0");
        h.station_io
            .write_all(&station.wrap(command_response()).to_bytes())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.station_io.shutdown().await.unwrap();
        task.await.unwrap();

        let reloaded = store.load("LBTB").await;
        assert_eq!((reloaded.lowest(), reloaded.highest()), (Some(0), Some(8)));
        assert_eq!(reloaded.gaps(), vec![(1, 5), (7, 8)]);
    }

    #[tokio::test(start_paused = true)]
    async fn gap_state_persisted_periodically() {
        let dir = TempDir::new("periodic");
        let store = GapStateStore::new(dir.path());
        let timing = SessionTiming {
            gap_persist: Duration::from_secs(300),
            ..quiet()
        };
        let mut h = harness(timing);
        h.session = h.session.with_gap_store(store.clone());
        let task = tokio::spawn(h.session.run());

        let station = FrameFactory::new("LBTB", "0");
        let mut bytes = station.wrap(command_response()).to_bytes();
        bytes.extend(station.wrap(command_response()).to_bytes());
        h.station_io.write_all(&bytes).await.unwrap();

        tokio::time::sleep(Duration::from_secs(301)).await;
        let mut persisted = GapList::new();
        for _ in 0..100 {
            persisted = store.load("LBTB").await;
            if !persisted.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!((persisted.lowest(), persisted.highest()), (Some(0), Some(1)));
        // Still running: the write came from the timer, not the session ending.
        assert!(!task.is_finished());

        h.station_io.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn custom_reset_clears_stored_gap_state() {
        let dir = TempDir::new("reset");
        let store = GapStateStore::new(dir.path());
        let mut stored = GapList::new();
        stored.process(40);
        store.persist("LBTB", &stored).await.unwrap();

        let mut h = harness(quiet());
        h.session = h.session.with_gap_store(store.clone());
        let task = tokio::spawn(h.session.run());

        let reset = FrameFactory::new("LBTB", "0").wrap(Payload::CustomReset(Vec::new()));
        h.station_io.write_all(&reset.to_bytes()).await.unwrap();
        task.await.unwrap();

        assert!(!store.path("LBTB").exists());
        assert!(store.load("LBTB").await.is_empty());
    }
}
