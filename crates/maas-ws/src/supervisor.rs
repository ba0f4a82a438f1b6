//! Top-level supervisor: connection epochs and the public client handle.
//!
//! A connect request starts an epoch; a newer connect request replaces the
//! running one (latest wins). Within an epoch the message router and the
//! send intake run concurrently, raced against the disconnect request.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use maas_core::events::{WEBSOCKET_CONNECT, WEBSOCKET_DISCONNECT};
use maas_core::{ClientEvent, CustomAction, Dispatch, EpochId, OutboundAction, Params};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use crate::chain::NextAction;
use crate::connection::establish;
use crate::dispatcher::{Dispatcher, Intake};
use crate::file_context::{FileContextStore, InMemoryFileContextStore};
use crate::handlers::{HandlerContext, MessageHandler};
use crate::metrics::WS_EPOCHS_ACTIVE;
use crate::router::Router;
use crate::sender::RequestSender;
use crate::session::{Session, SharedSession};
use crate::transport::Transport;

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Supervisor lifecycle as seen by observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SupervisorState {
    /// No connect request yet.
    Idle,
    /// Waiting for the transport to open.
    Connecting,
    /// Epoch running on an open socket.
    Open,
    /// Disconnected, or the socket dropped and the transport is retrying.
    Closed,
    /// Setup failed; waits for a new connect request.
    Error,
}

enum Control {
    Connect,
    Disconnect,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StopReason {
    /// A newer connect request replaces this epoch; the socket stays open.
    Restart,
    /// Explicit disconnect: close the socket.
    Disconnect,
}

// ── Builder ─────────────────────────────────────────────────────────────

/// Configures and starts a client.
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    event_capacity: usize,
    file_context: Arc<dyn FileContextStore>,
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl ClientBuilder {
    /// Start from a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            file_context: Arc::new(InMemoryFileContextStore::new()),
            handlers: HashMap::new(),
        }
    }

    /// How far observers may lag before they miss dispatches.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Use `store` for file-context deliveries.
    #[must_use]
    pub fn file_context_store(mut self, store: Arc<dyn FileContextStore>) -> Self {
        self.file_context = store;
        self
    }

    /// Invoke `handler` for every custom action of `action_type`.
    #[must_use]
    pub fn handler(mut self, action_type: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        let _ = self.handlers.insert(action_type.into(), handler);
        self
    }

    /// Spawn the supervisor on the current tokio runtime.
    ///
    /// Nothing connects until [`ClientHandle::connect`].
    pub fn spawn(self) -> ClientHandle {
        let (state_tx, state) = watch::channel(SupervisorState::Idle);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(self.event_capacity);
        let shutdown = CancellationToken::new();

        let supervisor = Supervisor {
            transport: self.transport,
            dispatcher: dispatcher.clone(),
            file_context: Arc::clone(&self.file_context),
            handlers: Arc::new(self.handlers),
            state: Arc::new(state_tx),
            next_request_id: Arc::new(AtomicU64::new(1)),
        };
        let _ = tokio::spawn(supervisor.control_loop(control_rx, shutdown.clone()));

        ClientHandle {
            control: control_tx,
            dispatcher,
            state,
            file_context: self.file_context,
            shutdown,
        }
    }
}

// ── Handle ──────────────────────────────────────────────────────────────

/// Cloneable handle to a running client.
///
/// Dropping every handle disconnects and stops the supervisor.
#[derive(Clone)]
pub struct ClientHandle {
    control: mpsc::UnboundedSender<Control>,
    dispatcher: Dispatcher,
    state: watch::Receiver<SupervisorState>,
    file_context: Arc<dyn FileContextStore>,
    shutdown: CancellationToken,
}

impl ClientHandle {
    /// Request a connection. Replaces a running epoch if there is one.
    pub fn connect(&self) {
        let _ = self.control.send(Control::Connect);
    }

    /// End the running epoch and close the socket.
    pub fn disconnect(&self) {
        let _ = self.control.send(Control::Disconnect);
    }

    /// Disconnect and stop the supervisor for good.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Dispatch an outbound action. Dropped when no epoch is running.
    pub fn dispatch(&self, action: OutboundAction) {
        self.dispatcher.dispatch(action);
    }

    /// Dispatch an outbound action with follow-ups to run on success.
    pub fn dispatch_with_next(&self, action: OutboundAction, next: Vec<NextAction>) {
        self.dispatcher.dispatch_with_next(action, next);
    }

    /// Dispatch a custom action to the registered message handlers.
    ///
    /// The connect and disconnect status actions are honoured too.
    pub fn dispatch_custom(&self, action_type: impl Into<String>, payload: Value) {
        let action = CustomAction::new(action_type, payload);
        match action.action_type.as_str() {
            WEBSOCKET_CONNECT => self.connect(),
            WEBSOCKET_DISCONNECT => self.disconnect(),
            _ => self.dispatcher.dispatch(action),
        }
    }

    /// Receive every dispatch from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Dispatch> {
        self.dispatcher.subscribe()
    }

    /// Watch the supervisor state.
    pub fn state(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }

    /// The store file-context results are delivered to.
    pub fn file_context(&self) -> Arc<dyn FileContextStore> {
        Arc::clone(&self.file_context)
    }

    /// The dispatch bus.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

// ── Supervisor ──────────────────────────────────────────────────────────

#[derive(Clone)]
struct Supervisor {
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
    file_context: Arc<dyn FileContextStore>,
    handlers: Arc<HashMap<String, Arc<dyn MessageHandler>>>,
    state: Arc<watch::Sender<SupervisorState>>,
    next_request_id: Arc<AtomicU64>,
}

struct RunningEpoch {
    stop: oneshot::Sender<StopReason>,
    task: JoinHandle<()>,
}

impl RunningEpoch {
    async fn stop(self, reason: StopReason) {
        let _ = self.stop.send(reason);
        if let Err(error) = self.task.await {
            warn!(%error, "epoch task failed");
        }
    }
}

impl Supervisor {
    async fn control_loop(self, mut control: mpsc::UnboundedReceiver<Control>, shutdown: CancellationToken) {
        let mut current: Option<RunningEpoch> = None;
        loop {
            let command = tokio::select! {
                () = shutdown.cancelled() => None,
                command = control.recv() => command,
            };
            match command {
                Some(Control::Connect) => {
                    if let Some(epoch) = current.take() {
                        epoch.stop(StopReason::Restart).await;
                    }
                    current = Some(self.start_epoch());
                }
                Some(Control::Disconnect) => {
                    if let Some(epoch) = current.take() {
                        epoch.stop(StopReason::Disconnect).await;
                    }
                }
                None => break,
            }
        }
        if let Some(epoch) = current.take() {
            epoch.stop(StopReason::Disconnect).await;
        }
        debug!("supervisor stopped");
    }

    fn start_epoch(&self) -> RunningEpoch {
        let (stop, stop_rx) = oneshot::channel();
        let epoch = EpochId::new();
        let span = info_span!("epoch", epoch = %epoch);
        let task = tokio::spawn(self.clone().run_epoch(epoch, stop_rx).instrument(span));
        RunningEpoch { stop, task }
    }

    async fn run_epoch(self, epoch: EpochId, mut stop: oneshot::Receiver<StopReason>) {
        let _ = self.state.send_replace(SupervisorState::Connecting);
        let established = tokio::select! {
            reason = &mut stop => {
                self.finish(reason.unwrap_or(StopReason::Disconnect), None);
                return;
            }
            result = establish(self.transport.as_ref()) => result,
        };
        if let Err(error) = established {
            error!(%error, "websocket setup failed");
            let _ = self.state.send_replace(SupervisorState::Error);
            self.dispatcher.emit(ClientEvent::WebsocketError {
                message: error.to_string(),
            });
            return;
        }

        let session = Session::new(epoch.clone(), self.next_request_id.load(Ordering::Relaxed)).shared();
        let events = self.transport.watch_events();
        let intake = self.dispatcher.install_sink(&epoch);
        let router = Router::new(
            session.clone(),
            self.dispatcher.clone(),
            Arc::clone(&self.file_context),
            Arc::clone(&self.state),
        );
        let sender = RequestSender::new(Arc::clone(&self.transport), session.clone(), self.dispatcher.clone());

        info!("websocket connected");
        metrics::gauge!(WS_EPOCHS_ACTIVE).increment(1.0);
        let _ = self.state.send_replace(SupervisorState::Open);
        self.dispatcher.emit(ClientEvent::Connected);

        let mut tasks = JoinSet::new();
        let reason = tokio::select! {
            () = router.run(events) => {
                warn!("transport stopped delivering events");
                None
            }
            () = self.intake_loop(intake, &sender, &epoch, &mut tasks) => None,
            reason = &mut stop => Some(reason.unwrap_or(StopReason::Disconnect)),
        };

        tasks.abort_all();
        self.dispatcher.remove_sink(&epoch);
        self.next_request_id
            .store(session.lock().next_request_id(), Ordering::Relaxed);
        metrics::gauge!(WS_EPOCHS_ACTIVE).decrement(1.0);
        if let Some(reason) = reason {
            self.finish(reason, Some(&session));
        }
    }

    /// Feed queued actions into the send path.
    ///
    /// Single-request actions are sent inline so they hit the wire in
    /// dispatch order. Parameter lists wait on notifies, so they and custom
    /// handlers run as tasks of their own.
    #[instrument(name = "intake", skip_all)]
    async fn intake_loop(
        &self,
        mut intake: mpsc::UnboundedReceiver<Intake>,
        sender: &RequestSender,
        epoch: &EpochId,
        tasks: &mut JoinSet<()>,
    ) {
        loop {
            tokio::select! {
                item = intake.recv() => match item {
                    Some(Intake::Request { action, next }) => {
                        if matches!(action.params, Params::Sequence(_)) {
                            let sender = sender.clone();
                            let _ = tasks.spawn(async move { sender.send_action(action, next).await });
                        } else {
                            sender.send_action(action, next).await;
                        }
                    }
                    Some(Intake::Custom(custom)) => {
                        let Some(handler) = self.handlers.get(&custom.action_type) else {
                            continue;
                        };
                        let handler = Arc::clone(handler);
                        let ctx = HandlerContext::new(sender.clone(), self.dispatcher.clone(), epoch.clone());
                        let _ = tasks.spawn(async move { handler.handle(custom, ctx).await });
                    }
                    None => return,
                },
                Some(joined) = tasks.join_next() => match joined {
                    Err(error) if error.is_panic() => error!(%error, "send task panicked"),
                    _ => {}
                },
            }
        }
    }

    fn finish(&self, reason: StopReason, session: Option<&SharedSession>) {
        match reason {
            StopReason::Restart => debug!("epoch replaced by a newer connect request"),
            StopReason::Disconnect => {
                self.transport.close();
                let abandoned = session.map_or(0, |session| session.lock().drain());
                info!(abandoned, "websocket disconnected");
                let _ = self.state.send_replace(SupervisorState::Closed);
                self.dispatcher.emit(ClientEvent::Disconnected);
            }
        }
    }
}
