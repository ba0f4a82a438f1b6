//! The dispatch bus.
//!
//! Everything the client produces (system events, per-action events,
//! re-dispatched continuations and chained actions) goes through a
//! [`Dispatcher`]. Observers see every item on a broadcast channel; outbound
//! and custom actions are additionally routed to the running epoch's intake
//! queue, which feeds the send path.

use std::sync::Arc;

use maas_core::{ClientEvent, CustomAction, Dispatch, EpochId, OutboundAction};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::chain::NextAction;

/// Work queued for the running epoch.
#[derive(Debug)]
pub(crate) enum Intake {
    /// An outbound action to send, with its chained actions.
    Request {
        action: OutboundAction,
        next: Vec<NextAction>,
    },
    /// A custom action for the registered message handlers.
    Custom(CustomAction),
}

/// Cloneable handle to the dispatch bus.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    observers: broadcast::Sender<Dispatch>,
    sink: Mutex<Option<(EpochId, mpsc::UnboundedSender<Intake>)>>,
}

impl Dispatcher {
    /// Create a bus whose observers may lag by up to `capacity` items.
    pub fn new(capacity: usize) -> Self {
        let (observers, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                observers,
                sink: Mutex::new(None),
            }),
        }
    }

    /// Receive every dispatched item from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Dispatch> {
        self.inner.observers.subscribe()
    }

    /// Publish an event to observers.
    pub fn emit(&self, event: ClientEvent) {
        let _ = self.inner.observers.send(Dispatch::Event(event));
    }

    /// Publish an item and, for actions, queue it on the running epoch.
    ///
    /// Actions dispatched while no epoch is running are dropped.
    pub fn dispatch(&self, item: impl Into<Dispatch>) {
        match item.into() {
            Dispatch::Action(action) => self.dispatch_with_next(action, Vec::new()),
            Dispatch::Custom(custom) => {
                let _ = self.inner.observers.send(Dispatch::Custom(custom.clone()));
                self.enqueue(Intake::Custom(custom));
            }
            Dispatch::Event(event) => self.emit(event),
        }
    }

    /// Publish an outbound action and queue it with chained actions.
    pub fn dispatch_with_next(&self, action: OutboundAction, next: Vec<NextAction>) {
        let _ = self.inner.observers.send(Dispatch::Action(action.clone()));
        self.enqueue(Intake::Request { action, next });
    }

    fn enqueue(&self, intake: Intake) {
        let sink = self.inner.sink.lock();
        match sink.as_ref() {
            Some((_, tx)) => {
                if tx.send(intake).is_err() {
                    debug!("intake closed, dropping dispatch");
                }
            }
            None => debug!("no running epoch, dropping dispatch"),
        }
    }

    /// Route actions to a fresh intake queue owned by `epoch`.
    pub(crate) fn install_sink(&self, epoch: &EpochId) -> mpsc::UnboundedReceiver<Intake> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.sink.lock() = Some((epoch.clone(), tx));
        rx
    }

    /// Stop routing actions to `epoch`'s queue, if it is still installed.
    pub(crate) fn remove_sink(&self, epoch: &EpochId) {
        let mut sink = self.inner.sink.lock();
        if sink.as_ref().is_some_and(|(owner, _)| owner == epoch) {
            *sink = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::Value;

    fn action() -> OutboundAction {
        OutboundAction::new("machine/fetch", "machine", "list")
    }

    #[tokio::test]
    async fn observers_see_every_dispatch() {
        let bus = Dispatcher::new(16);
        let mut rx = bus.subscribe();
        bus.emit(ClientEvent::Connected);
        bus.dispatch(action());
        assert_matches!(rx.recv().await.unwrap(), Dispatch::Event(ClientEvent::Connected));
        assert_matches!(rx.recv().await.unwrap(), Dispatch::Action(_));
    }

    #[tokio::test]
    async fn actions_reach_installed_sink() {
        let bus = Dispatcher::new(16);
        let epoch = EpochId::new();
        let mut intake = bus.install_sink(&epoch);
        bus.dispatch(action());
        bus.dispatch(CustomAction::new("ui/thing", Value::Null));
        bus.emit(ClientEvent::Disconnected);
        assert_matches!(intake.recv().await, Some(Intake::Request { .. }));
        assert_matches!(intake.recv().await, Some(Intake::Custom(c)) if c.action_type == "ui/thing");
        assert!(intake.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_without_epoch() {
        let bus = Dispatcher::new(16);
        let epoch = EpochId::new();
        let mut intake = bus.install_sink(&epoch);
        bus.remove_sink(&epoch);
        bus.dispatch(action());
        assert!(intake.recv().await.is_none());
    }

    #[test]
    fn stale_epoch_cannot_remove_newer_sink() {
        let bus = Dispatcher::new(16);
        let old = EpochId::new();
        let new = EpochId::new();
        let _old_rx = bus.install_sink(&old);
        let mut new_rx = bus.install_sink(&new);
        bus.remove_sink(&old);
        bus.dispatch(action());
        assert!(new_rx.try_recv().is_ok());
    }
}
