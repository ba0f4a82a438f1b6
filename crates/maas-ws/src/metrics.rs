//! Metric names.
//!
//! Recorded through the `metrics` facade; they are no-ops until the host
//! installs a recorder.

/// Request frames written to the socket (counter).
pub const WS_REQUESTS_SENT_TOTAL: &str = "ws_requests_sent_total";
/// Responses matched to a pending request (counter, labels: outcome).
pub const WS_RESPONSES_TOTAL: &str = "ws_responses_total";
/// Responses with an unknown or already-consumed id (counter).
pub const WS_UNMATCHED_RESPONSES_TOTAL: &str = "ws_unmatched_responses_total";
/// Notify frames received (counter, labels: name).
pub const WS_NOTIFY_TOTAL: &str = "ws_notify_total";
/// Sends skipped because the endpoint was already loaded (counter).
pub const WS_CACHE_HITS_TOTAL: &str = "ws_cache_hits_total";
/// Batch continuation requests issued (counter).
pub const WS_BATCH_CONTINUATIONS_TOTAL: &str = "ws_batch_continuations_total";
/// Transport reconnect attempts (counter).
pub const WS_RECONNECT_ATTEMPTS_TOTAL: &str = "ws_reconnect_attempts_total";
/// Running connection epochs (gauge).
pub const WS_EPOCHS_ACTIVE: &str = "ws_epochs_active";
