//! Outbound actions: caller intents that become one or more wire requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single JSON parameter object.
pub type ParamMap = serde_json::Map<String, Value>;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Execution metadata attached to an [`OutboundAction`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionMeta {
    /// Target model (e.g. `machine`).
    pub model: String,
    /// Method on the model (e.g. `list`).
    pub method: String,
    /// Always apply the once-per-epoch endpoint cache.
    #[serde(default, skip_serializing_if = "is_false")]
    pub cache: bool,
    /// Never apply the endpoint cache to `*list` methods.
    #[serde(default, skip_serializing_if = "is_false")]
    pub nocache: bool,
    /// Paginated list request (`limit`/`start` cursor).
    #[serde(default, skip_serializing_if = "is_false")]
    pub batch: bool,
    /// Page size to use after the first page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsequent_limit: Option<u64>,
    /// Deliver the result to the file-context store instead of the event.
    #[serde(default, skip_serializing_if = "is_false")]
    pub use_file_context: bool,
    /// Key under which the file-context result is stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_context_key: Option<String>,
    /// Decode a textual result as JSON.
    #[serde(default, skip_serializing_if = "is_false")]
    pub json_response: bool,
}

/// Parameters of an action.
///
/// A [`Params::Sequence`] action sends one request per element, in order,
/// and is never paginated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    /// One parameter object per wire request.
    Sequence(Vec<ParamMap>),
    /// Zero or one parameter object, sent as exactly one wire request.
    Single(Option<ParamMap>),
}

impl Default for Params {
    fn default() -> Self {
        Self::Single(None)
    }
}

impl Params {
    /// Whether no parameters were supplied.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Single(None))
    }

    /// The single parameter object, if this is a single-object action.
    pub fn single(&self) -> Option<&ParamMap> {
        match self {
            Self::Single(map) => map.as_ref(),
            Self::Sequence(_) => None,
        }
    }

    fn to_value(&self) -> Option<Value> {
        match self {
            Self::Single(None) => None,
            Self::Single(Some(map)) => Some(Value::Object(map.clone())),
            Self::Sequence(list) => Some(Value::Array(
                list.iter().cloned().map(Value::Object).collect(),
            )),
        }
    }
}

/// A named operation against a named model, plus execution metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundAction {
    /// Action type tag (e.g. `machine/fetch`). Events derive their type from it.
    #[serde(rename = "type")]
    pub action_type: String,
    /// Execution metadata.
    pub meta: ActionMeta,
    /// Request parameters.
    #[serde(default)]
    pub params: Params,
    /// Non-parameter payload, reported as item context when there are no params.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl OutboundAction {
    /// Create an action calling `model.method` with no parameters.
    pub fn new(
        action_type: impl Into<String>,
        model: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            action_type: action_type.into(),
            meta: ActionMeta {
                model: model.into(),
                method: method.into(),
                ..ActionMeta::default()
            },
            params: Params::default(),
            payload: None,
        }
    }

    /// Set a single parameter object.
    #[must_use]
    pub fn with_params(mut self, params: ParamMap) -> Self {
        self.params = Params::Single(Some(params));
        self
    }

    /// Set one key of the single parameter object, creating it if needed.
    ///
    /// Replaces a parameter sequence.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = match self.params {
            Params::Single(Some(map)) => map,
            _ => ParamMap::new(),
        };
        let _ = map.insert(key.into(), value.into());
        self.params = Params::Single(Some(map));
        self
    }

    /// Send one request per parameter object, sequentially.
    #[must_use]
    pub fn with_param_list(mut self, params: Vec<ParamMap>) -> Self {
        self.params = Params::Sequence(params);
        self
    }

    /// Attach a non-parameter payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Mark as a paginated list request.
    #[must_use]
    pub fn batch(mut self) -> Self {
        self.meta.batch = true;
        self
    }

    /// Use a different page size after the first page.
    #[must_use]
    pub fn subsequent_limit(mut self, limit: u64) -> Self {
        self.meta.subsequent_limit = Some(limit);
        self
    }

    /// Always apply the endpoint cache.
    #[must_use]
    pub fn cache(mut self) -> Self {
        self.meta.cache = true;
        self
    }

    /// Never apply the endpoint cache.
    #[must_use]
    pub fn nocache(mut self) -> Self {
        self.meta.nocache = true;
        self
    }

    /// Deliver the result into the file-context store under `key`.
    #[must_use]
    pub fn file_context(mut self, key: impl Into<String>) -> Self {
        self.meta.use_file_context = true;
        self.meta.file_context_key = Some(key.into());
        self
    }

    /// Decode a textual result as JSON.
    #[must_use]
    pub fn json_response(mut self) -> Self {
        self.meta.json_response = true;
        self
    }

    /// `<model>.<method>`.
    pub fn endpoint(&self) -> String {
        format!("{}.{}", self.meta.model, self.meta.method)
    }

    /// Derived event type, e.g. `machine/fetch` + `Success`.
    pub fn event_type(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.action_type)
    }

    /// Context attached to this action's events: the params, or else the payload.
    pub fn item(&self) -> Value {
        self.params
            .to_value()
            .or_else(|| self.payload.clone())
            .unwrap_or(Value::Null)
    }

    /// Whether this action is subject to the once-per-epoch endpoint cache.
    ///
    /// Explicit `cache` always applies. Otherwise `*list` methods are cached
    /// unless `nocache` is set or the request is a later page (has `start`).
    pub fn uses_endpoint_cache(&self) -> bool {
        if self.meta.cache {
            return true;
        }
        if self.meta.nocache || !self.meta.method.ends_with("list") {
            return false;
        }
        match &self.params {
            Params::Single(Some(map)) => !map.get("start").is_some_and(is_truthy),
            Params::Single(None) | Params::Sequence(_) => true,
        }
    }

    /// The page size of a single-object request, if it has a positive `limit`.
    pub fn limit(&self) -> Option<u64> {
        self.params
            .single()
            .and_then(|map| map.get("limit"))
            .and_then(Value::as_u64)
            .filter(|limit| *limit > 0)
    }

    /// Whether this is a paginated list request awaiting continuation.
    pub fn is_batch(&self) -> bool {
        self.meta.batch && self.limit().is_some()
    }

    /// Build the request for the page after `last_id`.
    ///
    /// A pending `subsequent_limit` replaces `limit` and is consumed so it
    /// applies only once.
    #[must_use]
    pub fn next_page(&self, last_id: Value) -> Self {
        let mut next = self.clone();
        let mut map = next.params.single().cloned().unwrap_or_default();
        if let Some(limit) = next.meta.subsequent_limit.take() {
            let _ = map.insert("limit".into(), Value::from(limit));
        }
        let _ = map.insert("start".into(), last_id);
        next.params = Params::Single(Some(map));
        next
    }
}

/// JavaScript-style truthiness, used for cursor fields.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
