//! Routes a parsed frame sequence to per-type handlers.
//!
//! Each frame type seen on the input gets its own group: a bounded channel feeding one
//! handler task. Types without a registered handler go to a drain handler that logs and
//! discards, so no group is ever left without a consumer.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::{Pin, pin};
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use cd11_rs_protocol::{Frame, FrameType};
use futures_core::Stream;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, Result};

/// Error type handlers report.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed future returned by handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Frames per group buffered ahead of a slow handler. Default for [`CompositeHandler::new`].
pub const DEFAULT_GROUP_CAPACITY: usize = 1024;

/// The frames of one type, in arrival order.
#[derive(Debug)]
pub struct FrameGroup {
    frame_type: FrameType,
    rx: mpsc::Receiver<Frame>,
}

impl FrameGroup {
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

impl Stream for FrameGroup {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.rx.poll_recv(cx)
    }
}

/// Consumes one frame group until it ends.
///
/// The returned future completes when the handler is done with the group; an `Err` is fatal
/// to the whole dispatch.
pub trait GroupHandler: Send + Sync + 'static {
    fn handle(&self, group: FrameGroup) -> BoxFuture<'static, std::result::Result<(), HandlerError>>;
}

/// Adapts a closure over a whole group.
pub struct GroupFn<F, Fut> {
    f: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> GroupHandler for GroupFn<F, Fut>
where
    F: Fn(FrameGroup) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
{
    fn handle(&self, group: FrameGroup) -> BoxFuture<'static, std::result::Result<(), HandlerError>> {
        Box::pin((self.f)(group))
    }
}

/// Adapts a per-frame closure; frames are handled one at a time, in order.
pub struct FrameFn<F, Fut> {
    f: Arc<F>,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> GroupHandler for FrameFn<F, Fut>
where
    F: Fn(Frame) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
{
    fn handle(&self, mut group: FrameGroup) -> BoxFuture<'static, std::result::Result<(), HandlerError>> {
        let f = Arc::clone(&self.f);
        Box::pin(async move {
            while let Some(frame) = group.recv().await {
                f(frame).await?;
            }
            Ok(())
        })
    }
}

struct Drain;

impl GroupHandler for Drain {
    fn handle(&self, mut group: FrameGroup) -> BoxFuture<'static, std::result::Result<(), HandlerError>> {
        Box::pin(async move {
            let frame_type = group.frame_type();
            info!(%frame_type, "no handler registered, draining");
            let mut drained = 0u64;
            while let Some(frame) = group.recv().await {
                drained += 1;
                debug!(%frame_type, seq = frame.sequence_number(), drained, "drained frame");
            }
            Ok(())
        })
    }
}

type Registry = RwLock<HashMap<FrameType, Arc<dyn GroupHandler>>>;

/// Per-type handler registry plus the router that feeds it. Clone is cheap (Arc).
#[derive(Clone)]
pub struct CompositeHandler {
    registry: Arc<Registry>,
    group_capacity: usize,
}

impl Default for CompositeHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeHandler {
    pub fn new() -> Self {
        Self::with_group_capacity(DEFAULT_GROUP_CAPACITY)
    }

    pub fn with_group_capacity(group_capacity: usize) -> Self {
        Self {
            registry: Arc::new(RwLock::new(HashMap::new())),
            group_capacity: group_capacity.max(1),
        }
    }

    /// Register `handler` for `frame_type`, replacing any earlier one.
    ///
    /// Groups already running keep the handler they started with.
    pub fn register(&self, frame_type: FrameType, handler: impl GroupHandler) {
        let handler: Arc<dyn GroupHandler> = Arc::new(handler);
        let previous = self.registry.write().unwrap().insert(frame_type, handler);
        if previous.is_some() {
            info!(%frame_type, "replaced frame handler");
        } else {
            debug!(%frame_type, "registered frame handler");
        }
    }

    pub fn register_group<F, Fut>(&self, frame_type: FrameType, f: F)
    where
        F: Fn(FrameGroup) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        self.register(
            frame_type,
            GroupFn {
                f,
                _phantom: PhantomData,
            },
        );
    }

    pub fn register_frame<F, Fut>(&self, frame_type: FrameType, f: F)
    where
        F: Fn(Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        self.register(
            frame_type,
            FrameFn {
                f: Arc::new(f),
                _phantom: PhantomData,
            },
        );
    }

    pub fn is_registered(&self, frame_type: FrameType) -> bool {
        self.registry.read().unwrap().contains_key(&frame_type)
    }

    fn resolve(&self, frame_type: FrameType) -> Arc<dyn GroupHandler> {
        self.registry
            .read()
            .unwrap()
            .get(&frame_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(Drain))
    }

    /// Start routing `frames`. Must be called from within a tokio runtime.
    pub fn handle<S>(&self, frames: S) -> DispatchHandle
    where
        S: Stream<Item = Frame> + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let router = self.clone();
        let task = tokio::spawn(async move { router.route(frames, cancel_rx).await });
        DispatchHandle {
            cancel_tx,
            task: Some(task),
        }
    }

    async fn route<S>(self, frames: S, mut cancel_rx: watch::Receiver<bool>) -> Result<()>
    where
        S: Stream<Item = Frame> + Send,
    {
        let mut tasks: JoinSet<Joined> = JoinSet::new();
        let result = self.pump(frames, &mut cancel_rx, &mut tasks).await;
        // No handler outlives the dispatch, whichever way it ended.
        if !tasks.is_empty() {
            debug!(handlers = tasks.len(), "aborting remaining frame handlers");
        }
        tasks.shutdown().await;
        result
    }

    async fn pump<S>(
        &self,
        frames: S,
        cancel_rx: &mut watch::Receiver<bool>,
        tasks: &mut JoinSet<Joined>,
    ) -> Result<()>
    where
        S: Stream<Item = Frame> + Send,
    {
        let mut frames = pin!(frames);
        let mut groups: HashMap<FrameType, mpsc::Sender<Frame>> = HashMap::new();

        loop {
            tokio::select! {
                _ = disposed(cancel_rx) => {
                    debug!(groups = groups.len(), "dispatch disposed");
                    return Ok(());
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    check(joined)?;
                }
                next = frames.next() => {
                    let Some(frame) = next else { break };
                    let frame_type = frame.frame_type();
                    let tx = groups.entry(frame_type).or_insert_with(|| {
                        let (tx, rx) = mpsc::channel(self.group_capacity);
                        let handler = self.resolve(frame_type);
                        debug!(%frame_type, "opening frame group");
                        let group = FrameGroup { frame_type, rx };
                        tasks.spawn(async move { (frame_type, handler.handle(group).await) });
                        tx
                    });
                    // A full group waits here; other handlers finishing or failing still
                    // count while it does.
                    let permit = loop {
                        tokio::select! {
                            permit = tx.reserve() => break permit,
                            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                                check(joined)?;
                            }
                            _ = disposed(cancel_rx) => {
                                debug!(%frame_type, "dispatch disposed while a group was full");
                                return Ok(());
                            }
                        }
                    };
                    match permit {
                        Ok(permit) => permit.send(frame),
                        Err(_) => warn!(%frame_type, "handler stopped accepting frames, frame dropped"),
                    }
                }
            }
        }

        // Input ended: close every group and let the handlers finish.
        drop(groups);
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(joined) => check(joined)?,
                    None => return Ok(()),
                },
                _ = disposed(cancel_rx) => {
                    debug!(handlers = tasks.len(), "dispatch disposed while draining");
                    return Ok(());
                }
            }
        }
    }
}

type Joined = (FrameType, std::result::Result<(), HandlerError>);

fn check(joined: std::result::Result<Joined, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok((_, Ok(()))) => Ok(()),
        Ok((frame_type, Err(source))) => {
            warn!(%frame_type, error = %source, "frame handler failed, stopping dispatch");
            Err(ConnectionError::HandlerFailed { frame_type, source })
        }
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => {
            warn!(error = %e, "frame handler panicked, stopping dispatch");
            Err(ConnectionError::HandlerPanicked(e.to_string()))
        }
    }
}

/// Resolves when dispose is requested. Never resolves if the handle was dropped instead.
async fn disposed(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|d| *d).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Running dispatch. Dropping the handle leaves the dispatch running.
///
/// However the dispatch ends, its per-type handlers have stopped by the time
/// [`join()`](Self::join) returns.
#[derive(Debug)]
pub struct DispatchHandle {
    cancel_tx: watch::Sender<bool>,
    /// `None` once joined.
    task: Option<JoinHandle<Result<()>>>,
}

impl DispatchHandle {
    /// Cancel routing and every per-type handler. Idempotent.
    pub fn dispose(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_disposed(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the dispatch to end: input exhausted and all handlers done, disposed, or a
    /// handler failed.
    ///
    /// Cancel safe. Once it has returned, later calls return `Ok(())` immediately.
    pub async fn join(&mut self) -> Result<()> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(ConnectionError::HandlerPanicked(e.to_string())),
        };
        self.task = None;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cd11_rs_protocol::FrameFactory;
    use std::sync::Mutex;
    use std::time::Duration;

    fn frame(factory: &FrameFactory, frame_type: FrameType) -> Frame {
        use cd11_rs_protocol::payload::{Acknack, Alert, Payload};
        match frame_type {
            FrameType::Alert => factory.wrap(Payload::Alert(Alert::new("x"))),
            FrameType::Acknack => factory.wrap(Payload::Acknack(Acknack::default())),
            _ => factory.wrap(Payload::CustomReset(vec![frame_type.to_i32() as u8])),
        }
    }

    fn frames(types: &[FrameType]) -> Vec<Frame> {
        let factory = FrameFactory::new("LBTB", "0");
        types.iter().map(|t| frame(&factory, *t)).collect()
    }

    #[tokio::test]
    async fn unregistered_type_is_drained() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = CompositeHandler::new();
        let sink = Arc::clone(&seen);
        dispatcher.register_frame(FrameType::Alert, move |frame: Frame| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(frame.sequence_number());
                Ok(())
            }
        });

        let input = frames(&[FrameType::Alert, FrameType::Acknack, FrameType::Alert]);
        let mut handle = dispatcher.handle(tokio_stream::iter(input));
        handle.join().await.unwrap();
        assert!(handle.is_finished());
        handle.join().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 2]);
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = CompositeHandler::new();
        for tag in ["first", "second"] {
            let hits = Arc::clone(&hits);
            dispatcher.register_frame(FrameType::Alert, move |_frame| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.lock().unwrap().push(tag);
                    Ok(())
                }
            });
        }
        assert!(dispatcher.is_registered(FrameType::Alert));
        assert!(!dispatcher.is_registered(FrameType::Data));

        dispatcher
            .handle(tokio_stream::iter(frames(&[FrameType::Alert])))
            .join()
            .await
            .unwrap();
        assert_eq!(*hits.lock().unwrap(), vec!["second"]);
    }

    #[tokio::test]
    async fn handler_error_is_fatal() {
        let dispatcher = CompositeHandler::new();
        dispatcher.register_frame(FrameType::Acknack, |_frame| async {
            Err::<(), HandlerError>("storage rejected".into())
        });

        let err = dispatcher
            .handle(tokio_stream::iter(frames(&[FrameType::Acknack])))
            .join()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::HandlerFailed {
                frame_type: FrameType::Acknack,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn slow_group_does_not_block_other_types() {
        let dispatcher = CompositeHandler::new();
        let (release_tx, release_rx) = watch::channel(false);
        let (alert_tx, mut alert_rx) = mpsc::unbounded_channel();

        dispatcher.register_group(FrameType::Acknack, move |mut group| {
            let mut release_rx = release_rx.clone();
            async move {
                let _ = release_rx.wait_for(|r| *r).await;
                while group.recv().await.is_some() {}
                Ok(())
            }
        });
        dispatcher.register_frame(FrameType::Alert, move |frame| {
            let alert_tx = alert_tx.clone();
            async move {
                let _ = alert_tx.send(frame.sequence_number());
                Ok(())
            }
        });

        let input = frames(&[FrameType::Acknack, FrameType::Acknack, FrameType::Alert]);
        let mut handle = dispatcher.handle(tokio_stream::iter(input));

        let seq = tokio::time::timeout(Duration::from_secs(5), alert_rx.recv())
            .await
            .unwrap();
        assert_eq!(seq, Some(2));

        release_tx.send_replace(true);
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn dispose_cancels_handlers() {
        let dispatcher = CompositeHandler::new();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let started_tx = Mutex::new(Some(started_tx));
        dispatcher.register_frame(FrameType::Alert, move |_frame| {
            if let Some(tx) = started_tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
            std::future::pending::<std::result::Result<(), HandlerError>>()
        });

        let input = async_stream::stream! {
            for f in frames(&[FrameType::Alert]) {
                yield f;
            }
            std::future::pending::<()>().await;
        };
        let mut handle = dispatcher.handle(input);
        started_rx.await.unwrap();

        handle.dispose();
        assert!(handle.is_disposed());
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap()
            .unwrap();
    }

    /// Holds its group open until dropped; reports the drop.
    struct DropFlag(Option<tokio::sync::oneshot::Sender<()>>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            if let Some(tx) = self.0.take() {
                let _ = tx.send(());
            }
        }
    }

    #[tokio::test]
    async fn dispose_stops_handler_blocked_downstream() {
        // Capacity 1 so the router itself ends up waiting on a full group.
        let dispatcher = CompositeHandler::with_group_capacity(1);
        let (dropped_tx, dropped_rx) = tokio::sync::oneshot::channel();
        let dropped_tx = Mutex::new(Some(dropped_tx));
        dispatcher.register_group(FrameType::Alert, move |group| {
            let flag = DropFlag(dropped_tx.lock().unwrap().take());
            async move {
                let _held = (group, flag);
                std::future::pending::<std::result::Result<(), HandlerError>>().await
            }
        });

        let input = async_stream::stream! {
            for f in frames(&[FrameType::Alert, FrameType::Alert, FrameType::Alert]) {
                yield f;
            }
            std::future::pending::<()>().await;
        };
        let mut handle = dispatcher.handle(input);
        tokio::task::yield_now().await;

        handle.dispose();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap()
            .unwrap();
        // The handler task was aborted, not detached.
        tokio::time::timeout(Duration::from_secs(5), dropped_rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn failure_seen_while_another_group_is_full() {
        let dispatcher = CompositeHandler::with_group_capacity(1);
        dispatcher.register_group(FrameType::Alert, |group| async move {
            let _held = group;
            std::future::pending::<std::result::Result<(), HandlerError>>().await
        });
        dispatcher.register_frame(FrameType::Acknack, |_frame| async {
            Err::<(), HandlerError>("storage rejected".into())
        });

        // The alert group stops draining, so the third alert blocks the router until the
        // acknack handler's failure is noticed.
        let input = frames(&[
            FrameType::Acknack,
            FrameType::Alert,
            FrameType::Alert,
            FrameType::Alert,
        ]);
        let mut handle = dispatcher.handle(async_stream::stream! {
            for f in input {
                yield f;
            }
            std::future::pending::<()>().await;
        });
        let err = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::HandlerFailed {
                frame_type: FrameType::Acknack,
                ..
            }
        ));
    }
}
