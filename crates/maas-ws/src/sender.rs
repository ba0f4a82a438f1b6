//! The send path: turning an outbound action into wire requests.

use std::sync::Arc;

use maas_core::events::NOTIFY_SUFFIX;
use maas_core::{ClientEvent, Dispatch, ErrorPayload, OutboundAction, ParamMap, Params, RequestFrame, RequestId, RequestMessage};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::chain::NextAction;
use crate::dispatcher::Dispatcher;
use crate::error::{ClientError, Result};
use crate::metrics::{WS_CACHE_HITS_TOTAL, WS_REQUESTS_SENT_TOTAL};
use crate::session::SharedSession;
use crate::transport::Transport;

/// Sends actions for one epoch.
#[derive(Clone)]
pub(crate) struct RequestSender {
    transport: Arc<dyn Transport>,
    session: SharedSession,
    dispatcher: Dispatcher,
}

impl RequestSender {
    pub(crate) fn new(transport: Arc<dyn Transport>, session: SharedSession, dispatcher: Dispatcher) -> Self {
        Self {
            transport,
            session,
            dispatcher,
        }
    }

    /// Send `action`, emitting `Start` and, on failure, `Error`.
    ///
    /// Cacheable actions whose endpoint was already loaded this epoch are
    /// skipped without any event. A parameter list is sent one request at a
    /// time, each gated on the next `<type>Notify`.
    pub(crate) async fn send_action(&self, action: OutboundAction, next: Vec<NextAction>) {
        let endpoint = action.endpoint();
        if action.uses_endpoint_cache() && !self.session.lock().mark_loaded(&endpoint) {
            debug!(endpoint, action_type = %action.action_type, "endpoint already loaded, skipping");
            metrics::counter!(WS_CACHE_HITS_TOTAL).increment(1);
            return;
        }

        let item = action.item();
        self.dispatcher.emit(ClientEvent::Start {
            action_type: action.action_type.clone(),
            item: item.clone(),
        });

        if let Err(error) = self.send_all(&action, &next).await {
            warn!(endpoint, action_type = %action.action_type, %error, "send failed");
            self.dispatcher.emit(ClientEvent::Error {
                action_type: action.action_type,
                item,
                error: ErrorPayload::Opaque(error.to_string()),
            });
        }
    }

    async fn send_all(&self, action: &OutboundAction, next: &[NextAction]) -> Result<()> {
        match &action.params {
            Params::Single(params) => self.send_one(action, params.clone(), next).map(|_| ()),
            Params::Sequence(list) => {
                let notify_type = action.event_type(NOTIFY_SUFFIX);
                for params in list {
                    // Subscribe before sending so a fast notify is not missed.
                    let mut observer = self.dispatcher.subscribe();
                    let id = self.send_one(action, Some(params.clone()), next)?;
                    debug!(request_id = %id, notify_type, "waiting for notify before next request");
                    wait_for_notify(&mut observer, &notify_type).await?;
                }
                Ok(())
            }
        }
    }

    /// Register, encode and write one request.
    ///
    /// Registration and the write happen under one session lock, so the
    /// router can never see a response for an id it does not know yet.
    fn send_one(&self, action: &OutboundAction, params: Option<ParamMap>, next: &[NextAction]) -> Result<RequestId> {
        let message = RequestMessage::new(&action.meta.model, &action.meta.method, params);
        let mut session = self.session.lock();
        let id = session.register_request(action.clone());
        let written = serde_json::to_string(&RequestFrame::request(id, message))
            .map_err(ClientError::from)
            .and_then(|text| self.transport.send_text(text));
        if let Err(error) = written {
            let _ = session.take_request(id);
            return Err(error);
        }
        session.register_followups(id, action, next);
        drop(session);

        metrics::counter!(WS_REQUESTS_SENT_TOTAL).increment(1);
        debug!(request_id = %id, endpoint = %action.endpoint(), "request sent");
        Ok(id)
    }
}

/// Wait for the next notify event of type `notify_type`.
///
/// Any matching notify satisfies the gate, even one caused by another
/// client acting on the same model. A lagged observer may have skipped the
/// notify, so a lag opens the gate too.
async fn wait_for_notify(observer: &mut broadcast::Receiver<Dispatch>, notify_type: &str) -> Result<()> {
    loop {
        match observer.recv().await {
            Ok(Dispatch::Event(event @ ClientEvent::Notify(_))) if event.event_type() == notify_type => {
                return Ok(());
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, notify_type, "notify gate lagged, sending the next request");
                return Ok(());
            }
            Err(broadcast::error::RecvError::Closed) => return Err(ClientError::ChannelClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::testing::{MemoryTransport, drain, drain_types};
    use maas_core::{EpochId, NotifyFrame};
    use serde_json::{Value, json};

    async fn open_sender() -> (RequestSender, MemoryTransport, SharedSession, Dispatcher) {
        let transport = MemoryTransport::new();
        crate::connection::establish(&transport).await.unwrap();
        let session = Session::new(EpochId::new(), 1).shared();
        let dispatcher = Dispatcher::new(64);
        let sender = RequestSender::new(Arc::new(transport.clone()), session.clone(), dispatcher.clone());
        (sender, transport, session, dispatcher)
    }

    fn list() -> OutboundAction {
        OutboundAction::new("TEST_ACTION", "m", "list")
    }

    fn notify(name: &str, action: &str) -> ClientEvent {
        ClientEvent::Notify(NotifyFrame {
            name: name.into(),
            action: action.into(),
            data: Value::Null,
        })
    }

    #[tokio::test]
    async fn single_request_frame() {
        let (sender, transport, session, dispatcher) = open_sender().await;
        let mut rx = dispatcher.subscribe();
        sender
            .send_action(OutboundAction::new("config/update", "config", "update").with_param("name", "x"), vec![])
            .await;
        let frames = transport.sent_json();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], 0);
        assert_eq!(frames[0]["method"], "config.update");
        assert_eq!(frames[0]["params"], json!({"name": "x"}));
        assert_eq!(frames[0]["request_id"], 1);
        assert_eq!(session.lock().pending_count(), 1);
        assert_eq!(drain_types(&mut rx), vec!["config/updateStart"]);
    }

    #[tokio::test]
    async fn cached_list_sent_once() {
        let (sender, transport, _session, dispatcher) = open_sender().await;
        let mut rx = dispatcher.subscribe();
        sender.send_action(list(), vec![]).await;
        sender.send_action(list(), vec![]).await;
        assert_eq!(transport.sent_frames().len(), 1);
        assert_eq!(drain_types(&mut rx), vec!["TEST_ACTIONStart"]);
    }

    #[tokio::test]
    async fn reset_loaded_allows_resend() {
        let (sender, transport, session, _dispatcher) = open_sender().await;
        sender.send_action(list(), vec![]).await;
        session.lock().reset_loaded();
        sender.send_action(list(), vec![]).await;
        assert_eq!(transport.sent_frames().len(), 2);
    }

    #[tokio::test]
    async fn nocache_and_paged_lists_always_send() {
        let (sender, transport, _session, _dispatcher) = open_sender().await;
        sender.send_action(list().nocache(), vec![]).await;
        sender.send_action(list().nocache(), vec![]).await;
        sender.send_action(list().with_param("start", 5), vec![]).await;
        sender.send_action(list().with_param("start", 5), vec![]).await;
        assert_eq!(transport.sent_frames().len(), 4);
    }

    #[tokio::test]
    async fn send_failure_emits_error_and_forgets_request() {
        let (sender, transport, session, dispatcher) = open_sender().await;
        let mut rx = dispatcher.subscribe();
        transport.fail_sends(true);
        sender
            .send_action(OutboundAction::new("machine/create", "machine", "create").with_param("a", 1), vec![])
            .await;
        let items = drain(&mut rx);
        assert_eq!(items.len(), 2);
        match items[1].as_event() {
            Some(ClientEvent::Error { action_type, item, error }) => {
                assert_eq!(action_type, "machine/create");
                assert_eq!(item, &json!({"a": 1}));
                assert!(matches!(error, ErrorPayload::Opaque(msg) if msg.contains("send failed")));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(session.lock().pending_count(), 0);
    }

    #[tokio::test]
    async fn sequence_waits_for_notify_between_sends() {
        let (sender, transport, _session, dispatcher) = open_sender().await;
        let params: Vec<ParamMap> = (1..=3)
            .map(|i| {
                let mut map = ParamMap::new();
                let _ = map.insert("name".into(), json!(format!("key{i}")));
                map
            })
            .collect();
        let action = OutboundAction::new("config/update", "config", "update").with_param_list(params);
        let task = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.send_action(action, vec![]).await })
        };

        let _ = transport.wait_for_sent(1).await;
        tokio::task::yield_now().await;
        assert_eq!(transport.sent_frames().len(), 1);

        // A notify of another type does not open the gate.
        dispatcher.emit(notify("machine", "update"));
        tokio::task::yield_now().await;
        assert_eq!(transport.sent_frames().len(), 1);

        dispatcher.emit(notify("config", "update"));
        let frames = transport.wait_for_sent(2).await;
        assert_eq!(frames[1]["params"]["name"], "key2");

        dispatcher.emit(notify("config", "update"));
        let frames = transport.wait_for_sent(3).await;
        assert_eq!(frames[2]["params"]["name"], "key3");
        assert!(!task.is_finished());

        dispatcher.emit(notify("config", "update"));
        task.await.unwrap();
        let ids: Vec<u64> = frames.iter().map(|f| f["request_id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn lagged_notify_gate_opens() {
        let (tx, mut observer) = broadcast::channel(2);
        for n in 0..4 {
            let _ = tx.send(Dispatch::Custom(maas_core::CustomAction::new(format!("ui/tick{n}"), Value::Null)));
        }
        let waited =
            tokio::time::timeout(std::time::Duration::from_secs(1), wait_for_notify(&mut observer, "config/updateNotify"))
                .await;
        assert!(matches!(waited, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn followups_registered_per_request() {
        let (sender, transport, session, _dispatcher) = open_sender().await;
        let action = list().batch().with_param("limit", 5).file_context("k");
        let next = vec![NextAction::new(|_: &Value| list())];
        sender.send_action(action, next).await;
        let id = transport.request_id(0);
        let mut session = session.lock();
        assert_eq!(session.take_next_actions(id).len(), 1);
        assert!(session.take_batch(id).is_some());
        assert_eq!(session.take_file_context(id), Some(Some("k".into())));
    }
}
