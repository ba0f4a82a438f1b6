//! Per-epoch correlation tables.
//!
//! A [`Session`] owns every table keyed by wire request id plus the set of
//! endpoints already loaded. It is created when an epoch starts and dropped
//! when it ends, so nothing leaks between epochs.
//!
//! Shared between the send path and the router behind a
//! `parking_lot::Mutex`; every method is a short synchronous critical
//! section and the lock is never held across an `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use maas_core::{EpochId, OutboundAction, RequestId};
use parking_lot::Mutex;

use crate::chain::NextAction;

/// Session shared between tasks.
pub type SharedSession = Arc<Mutex<Session>>;

/// Correlation state for one connection epoch.
#[derive(Debug)]
pub struct Session {
    epoch: EpochId,
    next_id: u64,
    pending: HashMap<RequestId, OutboundAction>,
    next_actions: HashMap<RequestId, Vec<NextAction>>,
    batches: HashMap<RequestId, OutboundAction>,
    file_contexts: HashMap<RequestId, Option<String>>,
    loaded: HashSet<String>,
}

impl Session {
    /// Create an empty session whose first request id is `first_id`.
    ///
    /// Ids keep increasing across epochs on the same socket so a late
    /// response from a previous epoch can never match a new request.
    pub fn new(epoch: EpochId, first_id: u64) -> Self {
        Self {
            epoch,
            next_id: first_id.max(1),
            pending: HashMap::new(),
            next_actions: HashMap::new(),
            batches: HashMap::new(),
            file_contexts: HashMap::new(),
            loaded: HashSet::new(),
        }
    }

    /// Wrap in the shared form.
    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    /// Epoch this session belongs to.
    pub fn epoch(&self) -> &EpochId {
        &self.epoch
    }

    /// The id the next registered request will get.
    pub fn next_request_id(&self) -> u64 {
        self.next_id
    }

    // ── Pending requests ────────────────────────────────────────────────

    /// Assign a fresh id to `action` and record it as pending.
    pub fn register_request(&mut self, action: OutboundAction) -> RequestId {
        let id = RequestId::new(self.next_id);
        self.next_id += 1;
        let _ = self.pending.insert(id, action);
        id
    }

    /// Remove and return the action for `id`. Each id resolves once.
    pub fn take_request(&mut self, id: RequestId) -> Option<OutboundAction> {
        self.pending.remove(&id)
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ── Loaded endpoints ────────────────────────────────────────────────

    /// Mark `endpoint` loaded. Returns `false` if it already was.
    pub fn mark_loaded(&mut self, endpoint: &str) -> bool {
        self.loaded.insert(endpoint.to_owned())
    }

    /// Whether `endpoint` has been loaded this epoch.
    pub fn is_loaded(&self, endpoint: &str) -> bool {
        self.loaded.contains(endpoint)
    }

    /// Forget every loaded endpoint (on socket open).
    pub fn reset_loaded(&mut self) {
        self.loaded.clear();
    }

    // ── Follow-ups ──────────────────────────────────────────────────────

    /// Record what must happen after `id` succeeds: chained actions,
    /// batch continuation and file-context delivery, as applicable.
    pub fn register_followups(&mut self, id: RequestId, action: &OutboundAction, next: &[NextAction]) {
        if !next.is_empty() {
            let _ = self.next_actions.insert(id, next.to_vec());
        }
        if action.is_batch() {
            let _ = self.batches.insert(id, action.clone());
        }
        if action.meta.use_file_context {
            let _ = self
                .file_contexts
                .insert(id, action.meta.file_context_key.clone());
        }
    }

    /// Consume the chained actions for `id`.
    pub fn take_next_actions(&mut self, id: RequestId) -> Vec<NextAction> {
        self.next_actions.remove(&id).unwrap_or_default()
    }

    /// Consume the batch registration for `id`.
    pub fn take_batch(&mut self, id: RequestId) -> Option<OutboundAction> {
        self.batches.remove(&id)
    }

    /// Consume the file-context registration for `id`.
    ///
    /// `Some(None)` means delivery was requested without a key.
    pub fn take_file_context(&mut self, id: RequestId) -> Option<Option<String>> {
        self.file_contexts.remove(&id)
    }

    /// Drop every follow-up for `id` (after an error response).
    pub fn discard_followups(&mut self, id: RequestId) {
        let _ = self.next_actions.remove(&id);
        let _ = self.batches.remove(&id);
        let _ = self.file_contexts.remove(&id);
    }

    /// Drop every pending request and follow-up. Returns how many requests
    /// were abandoned. Loaded endpoints are kept.
    pub fn drain(&mut self) -> usize {
        let abandoned = self.pending.len();
        self.pending.clear();
        self.next_actions.clear();
        self.batches.clear();
        self.file_contexts.clear();
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn session() -> Session {
        Session::new(EpochId::new(), 1)
    }

    fn list() -> OutboundAction {
        OutboundAction::new("machine/fetch", "machine", "list")
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let mut s = session();
        let a = s.register_request(list());
        let b = s.register_request(list());
        assert_ne!(a, b);
        assert!(b.get() > a.get());
        assert_eq!(s.pending_count(), 2);
    }

    #[test]
    fn first_id_carries_over() {
        let mut s = Session::new(EpochId::new(), 42);
        assert_eq!(s.register_request(list()).get(), 42);
        assert_eq!(s.next_request_id(), 43);
        assert_eq!(Session::new(EpochId::new(), 0).next_request_id(), 1);
    }

    #[test]
    fn request_resolves_once() {
        let mut s = session();
        let id = s.register_request(list());
        assert!(s.take_request(id).is_some());
        assert!(s.take_request(id).is_none());
    }

    #[test]
    fn loaded_endpoints() {
        let mut s = session();
        assert!(s.mark_loaded("machine.list"));
        assert!(!s.mark_loaded("machine.list"));
        assert!(s.is_loaded("machine.list"));
        s.reset_loaded();
        assert!(!s.is_loaded("machine.list"));
        assert!(s.mark_loaded("machine.list"));
    }

    #[test]
    fn followups_registered_by_kind() {
        let mut s = session();
        let action = list().batch().with_param("limit", 5).file_context("k");
        let id = s.register_request(action.clone());
        let next = vec![NextAction::new(|_: &Value| list())];
        s.register_followups(id, &action, &next);

        assert_eq!(s.take_next_actions(id).len(), 1);
        assert!(s.take_next_actions(id).is_empty());
        assert!(s.take_batch(id).is_some());
        assert!(s.take_batch(id).is_none());
        assert_eq!(s.take_file_context(id), Some(Some("k".into())));
        assert_eq!(s.take_file_context(id), None);
    }

    #[test]
    fn plain_action_registers_nothing() {
        let mut s = session();
        let action = list();
        let id = s.register_request(action.clone());
        s.register_followups(id, &action, &[]);
        assert!(s.take_batch(id).is_none());
        assert!(s.take_file_context(id).is_none());
    }

    #[test]
    fn discard_and_drain() {
        let mut s = session();
        let action = list().batch().with_param("limit", 5);
        let id = s.register_request(action.clone());
        s.register_followups(id, &action, &[]);
        s.discard_followups(id);
        assert!(s.take_batch(id).is_none());

        let _ = s.register_request(list());
        assert!(s.mark_loaded("machine.list"));
        assert_eq!(s.drain(), 2);
        assert_eq!(s.pending_count(), 0);
        assert!(s.is_loaded("machine.list"));
    }
}
