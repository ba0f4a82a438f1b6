//! Message router: transport events in, dispatches out.

use std::sync::Arc;

use maas_core::errors::RESPONSE_PARSE_ERROR;
use maas_core::{ClientEvent, ErrorPayload, InboundFrame, OutboundAction, RequestId, ResponseFrame};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::batch::{self, BatchStep};
use crate::chain;
use crate::dispatcher::Dispatcher;
use crate::file_context::{self, FileContextStore};
use crate::metrics::{WS_BATCH_CONTINUATIONS_TOTAL, WS_NOTIFY_TOTAL, WS_RESPONSES_TOTAL, WS_UNMATCHED_RESPONSES_TOTAL};
use crate::session::SharedSession;
use crate::supervisor::SupervisorState;
use crate::transport::TransportEvent;

/// Routes one epoch's transport events.
pub(crate) struct Router {
    session: SharedSession,
    dispatcher: Dispatcher,
    file_context: Arc<dyn FileContextStore>,
    state: Arc<watch::Sender<SupervisorState>>,
}

impl Router {
    pub(crate) fn new(
        session: SharedSession,
        dispatcher: Dispatcher,
        file_context: Arc<dyn FileContextStore>,
        state: Arc<watch::Sender<SupervisorState>>,
    ) -> Self {
        Self {
            session,
            dispatcher,
            file_context,
            state,
        }
    }

    /// Handle events until the transport stops delivering them.
    #[instrument(name = "router", skip_all)]
    pub(crate) async fn run(&self, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        debug!("transport event stream ended");
    }

    pub(crate) fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Error { message } => {
                warn!(%message, "websocket error");
                self.dispatcher.emit(ClientEvent::WebsocketError { message });
            }
            TransportEvent::Close { code, reason } => {
                let abandoned = self.session.lock().drain();
                info!(?code, %reason, abandoned, "websocket closed");
                let _ = self.state.send_replace(SupervisorState::Closed);
                self.dispatcher.emit(ClientEvent::Disconnected);
            }
            TransportEvent::Open => {
                self.session.lock().reset_loaded();
                info!("websocket reopened");
                let _ = self.state.send_replace(SupervisorState::Open);
                self.dispatcher.emit(ClientEvent::Connected);
            }
            TransportEvent::Message(text) => self.handle_message(&text),
        }
    }

    fn handle_message(&self, text: &str) {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "dropping malformed frame");
                return;
            }
        };
        match frame {
            InboundFrame::Notify(notify) => {
                metrics::counter!(WS_NOTIFY_TOTAL, "name" => notify.name.clone()).increment(1);
                self.dispatcher.emit(ClientEvent::Notify(notify));
            }
            InboundFrame::PingReply(id) => debug!(?id, "keepalive reply"),
            InboundFrame::Response(response) => self.handle_response(response),
        }
    }

    fn handle_response(&self, response: ResponseFrame) {
        let id = response.request_id;
        let Some(action) = self.session.lock().take_request(id) else {
            debug!(request_id = %id, "dropping response for unknown request");
            metrics::counter!(WS_UNMATCHED_RESPONSES_TOTAL).increment(1);
            return;
        };
        let item = action.item();

        if let Some(error) = response.error() {
            self.session.lock().discard_followups(id);
            debug!(request_id = %id, action_type = %action.action_type, "request failed");
            metrics::counter!(WS_RESPONSES_TOTAL, "outcome" => "error").increment(1);
            self.dispatcher.emit(ClientEvent::Error {
                action_type: action.action_type,
                item,
                error: ErrorPayload::from_wire(error),
            });
            return;
        }

        let result = response.result.unwrap_or(Value::Null);
        let registration = self.session.lock().take_file_context(id);
        let delivered = file_context::deliver(self.file_context.as_ref(), registration, &result);

        let payload = if delivered {
            Value::Null
        } else {
            match decode_result(&action, &result) {
                Ok(payload) => payload,
                Err(error) => {
                    self.session.lock().discard_followups(id);
                    warn!(request_id = %id, action_type = %action.action_type, "malformed json response");
                    metrics::counter!(WS_RESPONSES_TOTAL, "outcome" => "error").increment(1);
                    self.dispatcher.emit(ClientEvent::Error {
                        action_type: action.action_type,
                        item,
                        error,
                    });
                    return;
                }
            }
        };

        metrics::counter!(WS_RESPONSES_TOTAL, "outcome" => "success").increment(1);
        self.dispatcher.emit(ClientEvent::Success {
            action_type: action.action_type.clone(),
            item,
            payload,
        });

        self.continue_batch(id, &result);

        let next = self.session.lock().take_next_actions(id);
        for followup in chain::build_all(&next, &result) {
            self.dispatcher.dispatch(followup);
        }
    }

    fn continue_batch(&self, id: RequestId, result: &Value) {
        let Some(batch) = self.session.lock().take_batch(id) else {
            return;
        };
        match batch::next_step(&batch, result) {
            Some(BatchStep::NextPage(next)) => {
                debug!(request_id = %id, action_type = %next.action_type, "requesting next page");
                metrics::counter!(WS_BATCH_CONTINUATIONS_TOTAL).increment(1);
                self.dispatcher.dispatch(next);
            }
            Some(BatchStep::Complete) => {
                self.dispatcher.emit(ClientEvent::Complete {
                    action_type: batch.action_type,
                });
            }
            None => {}
        }
    }
}

/// Resolve the success payload, decoding textual JSON when requested.
fn decode_result(action: &OutboundAction, result: &Value) -> Result<Value, ErrorPayload> {
    match result {
        Value::String(raw) if action.meta.json_response => {
            serde_json::from_str(raw).map_err(|_| ErrorPayload::Opaque(RESPONSE_PARSE_ERROR.to_owned()))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::NextAction;
    use crate::file_context::InMemoryFileContextStore;
    use crate::session::Session;
    use crate::testing::{drain, drain_types};
    use assert_matches::assert_matches;
    use maas_core::{Dispatch, EpochId, RequestId};
    use serde_json::json;
    use tokio::sync::broadcast;

    struct Harness {
        router: Router,
        session: SharedSession,
        store: Arc<InMemoryFileContextStore>,
        state: watch::Receiver<SupervisorState>,
        rx: broadcast::Receiver<Dispatch>,
    }

    fn harness() -> Harness {
        let session = Session::new(EpochId::new(), 1).shared();
        let dispatcher = Dispatcher::new(64);
        let store = Arc::new(InMemoryFileContextStore::new());
        let (state_tx, state) = watch::channel(SupervisorState::Open);
        let rx = dispatcher.subscribe();
        let router = Router::new(session.clone(), dispatcher, store.clone(), Arc::new(state_tx));
        Harness {
            router,
            session,
            store,
            state,
            rx,
        }
    }

    impl Harness {
        fn register(&self, action: OutboundAction, next: &[NextAction]) -> RequestId {
            let mut session = self.session.lock();
            let id = session.register_request(action.clone());
            session.register_followups(id, &action, next);
            id
        }

        fn respond(&self, frame: Value) {
            self.router.handle_event(TransportEvent::Message(frame.to_string()));
        }

        fn events(&mut self) -> Vec<Dispatch> {
            drain(&mut self.rx)
        }
    }

    fn action() -> OutboundAction {
        OutboundAction::new("TEST_ACTION", "m", "get").with_param("id", 1)
    }

    #[test]
    fn notify_is_dispatched() {
        let mut h = harness();
        h.respond(json!({"type": 2, "name": "config", "action": "update", "data": {"name": "x"}}));
        let events = h.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action_type(), "config/updateNotify");
    }

    #[test]
    fn success_carries_item_and_result() {
        let mut h = harness();
        let id = h.register(action(), &[]);
        h.respond(json!({"type": 1, "request_id": id, "result": {"id": 1, "name": "n"}}));
        let events = h.events();
        assert_matches!(
            events[0].as_event(),
            Some(ClientEvent::Success { action_type, item, payload }) => {
                assert_eq!(action_type, "TEST_ACTION");
                assert_eq!(item, &json!({"id": 1}));
                assert_eq!(payload["name"], "n");
            }
        );
        assert_eq!(h.session.lock().pending_count(), 0);
    }

    #[test]
    fn structured_error_is_parsed() {
        let mut h = harness();
        let id = h.register(action(), &[]);
        h.respond(json!({"type": 1, "request_id": id, "error": "{\"Message\":\"x\"}"}));
        let events = h.events();
        assert_matches!(
            events[0].as_event(),
            Some(ClientEvent::Error { error, .. }) => assert_eq!(error.to_value(), json!({"Message": "x"}))
        );
    }

    #[test]
    fn opaque_error_is_kept_verbatim() {
        let mut h = harness();
        let id = h.register(action(), &[]);
        h.respond(json!({"type": 1, "request_id": id, "error": "not json"}));
        let events = h.events();
        assert_matches!(
            events[0].as_event(),
            Some(ClientEvent::Error { error: ErrorPayload::Opaque(raw), .. }) => assert_eq!(raw, "not json")
        );
    }

    #[test]
    fn error_skips_followups() {
        let mut h = harness();
        let batch = OutboundAction::new("TEST_ACTION", "m", "list").batch().with_param("limit", 2);
        let next = vec![NextAction::new(|_: &Value| action())];
        let id = h.register(batch, &next);
        h.respond(json!({"type": 1, "request_id": id, "error": "boom"}));
        assert_eq!(drain_types(&mut h.rx), vec!["TEST_ACTIONError"]);
        let mut session = h.session.lock();
        assert!(session.take_batch(id).is_none());
        assert!(session.take_next_actions(id).is_empty());
    }

    #[test]
    fn unknown_response_is_dropped() {
        let mut h = harness();
        h.respond(json!({"type": 1, "request_id": 99, "result": []}));
        assert!(h.events().is_empty());
    }

    #[test]
    fn malformed_frame_is_dropped() {
        let mut h = harness();
        h.router.handle_event(TransportEvent::Message("{not json".into()));
        h.respond(json!({"type": 4, "request_id": 3}));
        assert!(h.events().is_empty());
    }

    #[test]
    fn chained_actions_run_once() {
        let mut h = harness();
        let next = vec![
            NextAction::new(|result: &Value| {
                OutboundAction::new("machine/get", "machine", "get").with_param("id", result["id"].clone())
            }),
            NextAction::new(|_: &Value| OutboundAction::new("machine/list", "machine", "list")),
        ];
        let id = h.register(action(), &next);
        let frame = json!({"type": 1, "request_id": id, "result": {"id": 9}});
        h.respond(frame.clone());
        h.respond(frame);
        assert_eq!(
            drain_types(&mut h.rx),
            vec!["TEST_ACTIONSuccess", "machine/get", "machine/list"]
        );
    }

    #[test]
    fn full_page_continues_and_short_page_completes() {
        let mut h = harness();
        let batch = OutboundAction::new("TEST_ACTION", "m", "list").batch().with_param("limit", 2);
        let id = h.register(batch, &[]);
        h.respond(json!({"type": 1, "request_id": id, "result": [{"id": 1}, {"id": 2}]}));
        let events = h.events();
        assert_eq!(events.len(), 2);
        assert_matches!(&events[1], Dispatch::Action(next) => {
            assert_eq!(next.params.single().unwrap()["start"], 2);
        });

        let next = OutboundAction::new("TEST_ACTION", "m", "list")
            .batch()
            .with_param("limit", 2)
            .with_param("start", 2);
        let id = h.register(next, &[]);
        h.respond(json!({"type": 1, "request_id": id, "result": [{"id": 3}]}));
        assert_eq!(
            drain_types(&mut h.rx),
            vec!["TEST_ACTIONSuccess", "TEST_ACTIONComplete"]
        );
    }

    #[test]
    fn file_context_suppresses_payload() {
        let mut h = harness();
        let id = h.register(action().file_context("k"), &[]);
        h.respond(json!({"type": 1, "request_id": id, "result": "blob"}));
        assert_eq!(h.store.get("k"), Some(json!("blob")));
        assert_matches!(
            h.events()[0].as_event(),
            Some(ClientEvent::Success { payload, .. }) => assert!(payload.is_null())
        );
    }

    #[test]
    fn json_response_is_decoded() {
        let mut h = harness();
        let id = h.register(action().json_response(), &[]);
        h.respond(json!({"type": 1, "request_id": id, "result": "{\"a\": 1}"}));
        assert_matches!(
            h.events()[0].as_event(),
            Some(ClientEvent::Success { payload, .. }) => assert_eq!(payload, &json!({"a": 1}))
        );
    }

    #[test]
    fn malformed_json_response_is_an_error() {
        let mut h = harness();
        let id = h.register(action().json_response(), &[]);
        h.respond(json!({"type": 1, "request_id": id, "result": "{oops"}));
        assert_matches!(
            h.events()[0].as_event(),
            Some(ClientEvent::Error { error: ErrorPayload::Opaque(msg), .. }) => {
                assert_eq!(msg, RESPONSE_PARSE_ERROR);
            }
        );
    }

    #[test]
    fn open_resets_loaded_and_close_drains() {
        let mut h = harness();
        let _ = h.register(action(), &[]);
        assert!(h.session.lock().mark_loaded("m.list"));

        h.router.handle_event(TransportEvent::Close { code: Some(1006), reason: String::new() });
        assert_eq!(h.session.lock().pending_count(), 0);
        assert_eq!(*h.state.borrow(), SupervisorState::Closed);

        h.router.handle_event(TransportEvent::Open);
        assert!(!h.session.lock().is_loaded("m.list"));
        assert_eq!(*h.state.borrow(), SupervisorState::Open);

        h.router.handle_event(TransportEvent::Error { message: "reset".into() });
        assert_eq!(
            drain_types(&mut h.rx),
            vec![
                "status/websocketDisconnected",
                "status/websocketConnected",
                "status/websocketError"
            ]
        );
    }
}
