//! Follow-up actions dispatched with a successful result.

use std::fmt;
use std::sync::Arc;

use maas_core::Dispatch;
use serde_json::Value;

/// Builds a follow-up dispatch from a successful response result.
///
/// Registered per wire request at send time and invoked at most once,
/// in registration order, after the request's `Success` event.
#[derive(Clone)]
pub struct NextAction(Arc<dyn Fn(&Value) -> Dispatch + Send + Sync>);

impl NextAction {
    /// Wrap a constructor. It may return anything convertible to a
    /// [`Dispatch`]: an outbound action, a custom action or an event.
    pub fn new<F, D>(build: F) -> Self
    where
        F: Fn(&Value) -> D + Send + Sync + 'static,
        D: Into<Dispatch>,
    {
        Self(Arc::new(move |result| build(result).into()))
    }

    /// Build the follow-up for `result`.
    pub fn build(&self, result: &Value) -> Dispatch {
        (self.0)(result)
    }
}

impl fmt::Debug for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NextAction")
    }
}

/// Run every constructor against `result`, preserving order.
pub(crate) fn build_all(next: &[NextAction], result: &Value) -> Vec<Dispatch> {
    next.iter().map(|action| action.build(result)).collect()
}
