//! Extra message handlers bound to custom action types.

use async_trait::async_trait;
use maas_core::{CustomAction, EpochId, OutboundAction};

use crate::chain::NextAction;
use crate::dispatcher::Dispatcher;
use crate::sender::RequestSender;

/// Reacts to a custom action while an epoch is running.
///
/// Register with [`crate::ClientBuilder::handler`]. Every custom action of
/// the registered type is handed to its handler in a task of its own.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one custom action.
    async fn handle(&self, action: CustomAction, ctx: HandlerContext);
}

/// What a handler can do: send through the normal send path or dispatch.
#[derive(Clone)]
pub struct HandlerContext {
    sender: RequestSender,
    dispatcher: Dispatcher,
    epoch: EpochId,
}

impl HandlerContext {
    pub(crate) fn new(sender: RequestSender, dispatcher: Dispatcher, epoch: EpochId) -> Self {
        Self {
            sender,
            dispatcher,
            epoch,
        }
    }

    /// Send `action` on this epoch and wait until it has been written.
    ///
    /// The result still arrives as events, like any other action.
    pub async fn send(&self, action: OutboundAction, next: Vec<NextAction>) {
        self.sender.send_action(action, next).await;
    }

    /// The client's dispatch bus.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The epoch this handler runs in.
    pub fn epoch(&self) -> &EpochId {
        &self.epoch
    }
}
