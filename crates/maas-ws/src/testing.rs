//! Test support: an in-process transport and helpers for reading dispatches.
//!
//! [`MemoryTransport`] stands in for the socket. It records every frame the
//! client writes and lets tests play the server by injecting events.
//! Helpers here panic on timeout; they are meant for tests only.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use maas_core::{Dispatch, RequestId};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, watch};

use crate::error::{ClientError, Result};
use crate::transport::{ReadyState, Transport, TransportEvent};

const WAIT: Duration = Duration::from_secs(5);

/// In-memory [`Transport`].
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

struct Inner {
    state: watch::Sender<ReadyState>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    sent: watch::Sender<Vec<String>>,
    connects: watch::Sender<usize>,
    credentials: bool,
    auto_open: bool,
    fail_sends: AtomicBool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// A transport that opens as soon as it is asked to connect.
    pub fn new() -> Self {
        Self::build(true, true)
    }

    /// A transport whose URL cannot be built (no CSRF token).
    pub fn without_credentials() -> Self {
        Self::build(false, true)
    }

    /// A transport that stays `Connecting` until [`MemoryTransport::open`].
    pub fn manual() -> Self {
        Self::build(true, false)
    }

    fn build(credentials: bool, auto_open: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: watch::channel(ReadyState::Idle).0,
                events: Mutex::new(None),
                sent: watch::channel(Vec::new()).0,
                connects: watch::channel(0).0,
                credentials,
                auto_open,
                fail_sends: AtomicBool::new(false),
            }),
        }
    }

    /// Finish a pending connection attempt.
    pub fn open(&self) {
        let _ = self.inner.state.send_replace(ReadyState::Open);
    }

    /// Make every subsequent `send_text` fail.
    pub fn fail_sends(&self, fail: bool) {
        self.inner.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Number of `connect` calls so far.
    pub fn connect_calls(&self) -> usize {
        *self.inner.connects.borrow()
    }

    /// Wait until `connect` has been called at least `n` times.
    pub async fn wait_for_connect_calls(&self, n: usize) {
        let mut rx = self.inner.connects.subscribe();
        let waited = tokio::time::timeout(WAIT, rx.wait_for(|calls| *calls >= n)).await;
        assert!(matches!(waited, Ok(Ok(_))), "connect was not called {n} times");
    }

    // ── Outbound frames ─────────────────────────────────────────────────

    /// Every frame written so far, in order.
    pub fn sent_frames(&self) -> Vec<String> {
        self.inner.sent.borrow().clone()
    }

    /// Every frame written so far, parsed.
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent_frames()
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }

    /// Wait until at least `n` frames were written; returns them parsed.
    pub async fn wait_for_sent(&self, n: usize) -> Vec<Value> {
        let mut rx = self.inner.sent.subscribe();
        let waited = tokio::time::timeout(WAIT, rx.wait_for(|sent| sent.len() >= n)).await;
        assert!(
            matches!(waited, Ok(Ok(_))),
            "expected {n} frames, got {:?}",
            self.sent_frames()
        );
        self.sent_json()
    }

    /// The `request_id` of the `index`-th written frame.
    pub fn request_id(&self, index: usize) -> RequestId {
        let frames = self.sent_json();
        let id = frames
            .get(index)
            .and_then(|frame| frame.get("request_id"))
            .and_then(Value::as_u64);
        match id {
            Some(id) => RequestId::new(id),
            None => panic!("no request frame at index {index}: {frames:?}"),
        }
    }

    // ── Inbound events ──────────────────────────────────────────────────

    /// Deliver an event to the current subscriber.
    ///
    /// `Open` and `Close` update the ready state before they are delivered,
    /// so writes are accepted by the time `Open` is observed.
    pub async fn inject(&self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                let _ = self.inner.state.send_replace(ReadyState::Open);
            }
            TransportEvent::Close { .. } => {
                let _ = self.inner.state.send_replace(ReadyState::Closed);
            }
            TransportEvent::Error { .. } | TransportEvent::Message(_) => {}
        }
        let sink = self.inner.events.lock().clone();
        if let Some(sink) = sink {
            let _ = sink.send(event).await;
        }
    }

    /// Deliver a raw text frame.
    pub async fn inject_text(&self, text: impl Into<String>) {
        self.inject(TransportEvent::Message(text.into())).await;
    }

    /// Answer request `id` with `result`.
    pub async fn respond(&self, id: RequestId, result: Value) {
        let frame = json!({"type": 1, "request_id": id, "result": result});
        self.inject_text(frame.to_string()).await;
    }

    /// Answer request `id` with an error string.
    pub async fn respond_error(&self, id: RequestId, error: &str) {
        let frame = json!({"type": 1, "request_id": id, "error": error});
        self.inject_text(frame.to_string()).await;
    }

    /// Push a notification.
    pub async fn notify(&self, name: &str, action: &str, data: Value) {
        let frame = json!({"type": 2, "name": name, "action": action, "data": data});
        self.inject_text(frame.to_string()).await;
    }

    /// Simulate the socket dropping and coming back.
    pub async fn reconnect(&self) {
        self.inject(TransportEvent::Close {
            code: Some(1006),
            reason: "connection lost".into(),
        })
        .await;
        self.inject(TransportEvent::Open).await;
    }
}

impl Transport for MemoryTransport {
    fn ready_state(&self) -> watch::Receiver<ReadyState> {
        self.inner.state.subscribe()
    }

    fn build_url(&self) -> Result<String> {
        if self.inner.credentials {
            Ok("ws://memory/MAAS/ws?csrftoken=test".into())
        } else {
            Err(ClientError::MissingCredentials)
        }
    }

    fn connect(&self) {
        self.inner.connects.send_modify(|calls| *calls += 1);
        let _ = self.inner.state.send_replace(ReadyState::Connecting);
        if self.inner.auto_open {
            self.open();
        }
    }

    fn watch_events(&self) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(256);
        *self.inner.events.lock() = Some(tx);
        rx
    }

    fn send_text(&self, text: String) -> Result<()> {
        if *self.inner.state.borrow() != ReadyState::Open {
            return Err(ClientError::NotConnected);
        }
        if self.inner.fail_sends.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("send failed".into()));
        }
        self.inner.sent.send_modify(|sent| sent.push(text));
        Ok(())
    }

    fn close(&self) {
        let _ = self.inner.state.send_replace(ReadyState::Closed);
    }
}

// ── Dispatch helpers ────────────────────────────────────────────────────

/// Wait for the next dispatch whose type is `action_type`, skipping others.
pub async fn next_of_type(rx: &mut broadcast::Receiver<Dispatch>, action_type: &str) -> Dispatch {
    let found = tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(item) if item.action_type() == action_type => return Some(item),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await;
    match found {
        Ok(Some(item)) => item,
        _ => panic!("no dispatch of type {action_type}"),
    }
}

/// Everything currently buffered on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<Dispatch>) -> Vec<Dispatch> {
    let mut items = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(item) => items.push(item),
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => return items,
        }
    }
}

/// Types of everything currently buffered on `rx`.
pub fn drain_types(rx: &mut broadcast::Receiver<Dispatch>) -> Vec<String> {
    drain(rx).iter().map(Dispatch::action_type).collect()
}
