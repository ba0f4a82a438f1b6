//! `tokio-tungstenite` transport with backoff reconnects and keepalive pings.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use maas_core::retry::Backoff;
use maas_core::{RequestFrame, RequestId};
use maas_settings::{ClientSettings, ReconnectSettings, WebSocketSettings};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, interval_at};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{ReadyState, Transport, TransportEvent};
use crate::error::{ClientError, Result};
use crate::metrics::WS_RECONNECT_ATTEMPTS_TOTAL;
use crate::url::{ConnectionTarget, build_target};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A websocket that reconnects on its own until [`Transport::close`].
///
/// Cheap to clone; clones share the same socket.
#[derive(Clone)]
pub struct ReconnectingSocket {
    inner: Arc<Inner>,
}

struct Inner {
    websocket: WebSocketSettings,
    reconnect: ReconnectSettings,
    keepalive: Option<Duration>,
    state: watch::Sender<ReadyState>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    driver: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    ping_ids: AtomicU64,
}

impl ReconnectingSocket {
    /// Create an idle socket; nothing happens until [`Transport::connect`].
    pub fn new(settings: &ClientSettings) -> Self {
        let keepalive =
            (settings.keepalive.interval_ms > 0).then(|| Duration::from_millis(settings.keepalive.interval_ms));
        let (state, _) = watch::channel(ReadyState::Idle);
        Self {
            inner: Arc::new(Inner {
                websocket: settings.websocket.clone(),
                reconnect: settings.reconnect.clone(),
                keepalive,
                state,
                events: Mutex::new(None),
                outbound: Mutex::new(None),
                driver: Mutex::new(None),
                ping_ids: AtomicU64::new(1),
            }),
        }
    }
}

impl Transport for ReconnectingSocket {
    fn ready_state(&self) -> watch::Receiver<ReadyState> {
        self.inner.state.subscribe()
    }

    fn build_url(&self) -> Result<String> {
        build_target(&self.inner.websocket).map(|target| target.url)
    }

    fn connect(&self) {
        let mut driver = self.inner.driver.lock();
        if driver.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.inner).run(cancel.clone()));
        *driver = Some((cancel, handle));
    }

    fn watch_events(&self) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        *self.inner.events.lock() = Some(tx);
        rx
    }

    /// Accepted whenever a connection is being pumped.
    ///
    /// The outbound queue is installed before `Open` is announced, so a
    /// caller reacting to that event can always write.
    fn send_text(&self, text: String) -> Result<()> {
        let outbound = self.inner.outbound.lock();
        let tx = outbound.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(Message::Text(text.into()))
            .map_err(|_| ClientError::NotConnected)
    }

    fn close(&self) {
        if let Some((cancel, _handle)) = self.inner.driver.lock().take() {
            cancel.cancel();
        }
        *self.inner.outbound.lock() = None;
        let _ = self.inner.state.send_replace(ReadyState::Closed);
    }
}

impl Inner {
    #[instrument(name = "ws_driver", skip_all, fields(host = %self.websocket.host))]
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut backoff = Backoff::new(
            self.reconnect.base_delay_ms,
            self.reconnect.max_delay_ms,
            self.reconnect.jitter_factor,
            self.reconnect.max_attempts,
        );

        loop {
            self.set_state(&cancel, ReadyState::Connecting);
            let target = match build_target(&self.websocket) {
                Ok(target) => target,
                Err(error) => {
                    warn!(%error, "cannot build websocket target");
                    self.emit(&cancel, TransportEvent::Error { message: error.to_string() }).await;
                    self.set_state(&cancel, ReadyState::Closed);
                    return;
                }
            };

            let attempt = tokio::select! {
                () = cancel.cancelled() => return,
                result = open(&target) => result,
            };

            match attempt {
                Ok(stream) => {
                    info!(url = %target.url, "websocket open");
                    backoff.reset();
                    let (tx, rx) = mpsc::unbounded_channel();
                    *self.outbound.lock() = Some(tx);
                    self.emit(&cancel, TransportEvent::Open).await;
                    self.set_state(&cancel, ReadyState::Open);

                    let closed = self.drive(stream, rx, &cancel).await;
                    if cancel.is_cancelled() {
                        return;
                    }
                    *self.outbound.lock() = None;
                    self.set_state(&cancel, ReadyState::Closed);
                    info!(?closed, "websocket closed");
                    self.emit(&cancel, closed).await;
                }
                Err(message) => {
                    warn!(%message, "websocket connect failed");
                    self.set_state(&cancel, ReadyState::Closed);
                    self.emit(&cancel, TransportEvent::Error { message }).await;
                }
            }

            let Some(delay) = backoff.next_delay(rand::random::<f64>()) else {
                warn!(attempts = backoff.attempts(), "giving up on websocket reconnect");
                return;
            };
            metrics::counter!(WS_RECONNECT_ATTEMPTS_TOTAL).increment(1);
            debug!(?delay, attempt = backoff.attempts(), "reconnecting");
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Pump one open connection until it closes. Returns the close event.
    async fn drive(
        &self,
        stream: WsStream,
        mut outbound: mpsc::UnboundedReceiver<Message>,
        cancel: &CancellationToken,
    ) -> TransportEvent {
        let (mut write, mut read) = stream.split();
        let mut keepalive: Option<Interval> = self
            .keepalive
            .map(|period| interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return closed(None, "closed by client");
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.emit(cancel, TransportEvent::Message(text.to_string())).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return match frame {
                            Some(frame) => closed(Some(u16::from(frame.code)), frame.reason.as_str()),
                            None => closed(None, ""),
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        let message = error.to_string();
                        self.emit(cancel, TransportEvent::Error { message: message.clone() }).await;
                        return closed(None, &message);
                    }
                    None => return closed(None, "connection lost"),
                },
                Some(message) = outbound.recv() => {
                    if let Err(error) = write.send(message).await {
                        let message = error.to_string();
                        self.emit(cancel, TransportEvent::Error { message: message.clone() }).await;
                        return closed(None, &message);
                    }
                }
                _ = tick(keepalive.as_mut()) => {
                    let id = RequestId::new(self.ping_ids.fetch_add(1, Ordering::Relaxed));
                    match serde_json::to_string(&RequestFrame::ping(id)) {
                        Ok(ping) => {
                            if let Err(error) = write.send(Message::Text(ping.into())).await {
                                return closed(None, &error.to_string());
                            }
                        }
                        Err(error) => warn!(%error, "failed to encode keepalive ping"),
                    }
                }
            }
        }
    }

    /// Deliver an event to the current subscriber. A cancelled driver is silent.
    async fn emit(&self, cancel: &CancellationToken, event: TransportEvent) {
        if cancel.is_cancelled() {
            return;
        }
        let sink = self.events.lock().clone();
        if let Some(sink) = sink {
            let _ = sink.send(event).await;
        }
    }

    fn set_state(&self, cancel: &CancellationToken, state: ReadyState) {
        if !cancel.is_cancelled() {
            let _ = self.state.send_replace(state);
        }
    }
}

async fn open(target: &ConnectionTarget) -> std::result::Result<WsStream, String> {
    let mut request = target
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| e.to_string())?;
    if let Some(cookie) = &target.cookie {
        let value = HeaderValue::from_str(cookie).map_err(|e| e.to_string())?;
        let _ = request.headers_mut().insert(COOKIE, value);
    }
    let (stream, _response) = connect_async(request).await.map_err(|e| e.to_string())?;
    Ok(stream)
}

async fn tick(keepalive: Option<&mut Interval>) {
    match keepalive {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn closed(code: Option<u16>, reason: &str) -> TransportEvent {
    TransportEvent::Close {
        code,
        reason: reason.to_owned(),
    }
}
