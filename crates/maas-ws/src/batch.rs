//! Paginated list continuation.

use maas_core::OutboundAction;
use serde_json::Value;
use tracing::warn;

/// What a successful page of a batch request leads to.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum BatchStep {
    /// The page was full: request the next one.
    NextPage(OutboundAction),
    /// The page was short: the listing is complete.
    Complete,
}

/// Decide the follow-up for one page.
///
/// Returns `None` when the result is not an array; only list results page.
/// The next page starts at the `id` of the last element of this one. A full
/// page whose last element has no `id` leaves no cursor, which ends the
/// listing.
pub(crate) fn next_step(action: &OutboundAction, result: &Value) -> Option<BatchStep> {
    let items = result.as_array()?;
    let full = action
        .limit()
        .and_then(|limit| usize::try_from(limit).ok())
        .is_some_and(|limit| items.len() == limit);
    if !full {
        return Some(BatchStep::Complete);
    }
    match items.last().and_then(|item| item.get("id")) {
        Some(last_id) if !last_id.is_null() => Some(BatchStep::NextPage(action.next_page(last_id.clone()))),
        _ => {
            warn!(action_type = %action.action_type, "full page without a cursor id, ending batch");
            Some(BatchStep::Complete)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn batch_action(limit: u64) -> OutboundAction {
        OutboundAction::new("machine/fetch", "machine", "list")
            .batch()
            .with_param("limit", limit)
    }

    fn page(ids: std::ops::Range<u64>) -> Value {
        Value::Array(ids.map(|id| json!({"id": id})).collect())
    }

    #[test]
    fn full_page_continues_from_last_id() {
        let step = next_step(&batch_action(3), &page(1..4)).unwrap();
        assert_matches!(step, BatchStep::NextPage(next) => {
            let params = next.params.single().unwrap();
            assert_eq!(params["start"], 3);
            assert_eq!(params["limit"], 3);
        });
    }

    #[test]
    fn short_page_completes() {
        assert_eq!(next_step(&batch_action(3), &page(1..3)), Some(BatchStep::Complete));
        assert_eq!(next_step(&batch_action(3), &page(0..0)), Some(BatchStep::Complete));
    }

    #[test]
    fn non_array_result_is_ignored() {
        assert_eq!(next_step(&batch_action(3), &json!({"id": 1})), None);
        assert_eq!(next_step(&batch_action(3), &Value::Null), None);
    }

    #[test]
    fn subsequent_limit_applies_to_second_page() {
        let action = batch_action(2).subsequent_limit(10);
        let step = next_step(&action, &page(1..3)).unwrap();
        assert_matches!(step, BatchStep::NextPage(next) => {
            assert_eq!(next.limit(), Some(10));
            assert!(next.meta.subsequent_limit.is_none());
        });
    }

    #[test]
    fn full_page_sequence_terminates() {
        let mut action = batch_action(2);
        let mut continuations = 0;
        for result in [page(1..3), page(3..5), page(5..7), page(7..8)] {
            match next_step(&action, &result).unwrap() {
                BatchStep::NextPage(next) => {
                    continuations += 1;
                    action = next;
                }
                BatchStep::Complete => break,
            }
        }
        assert_eq!(continuations, 3);
    }

    #[test]
    fn full_page_without_cursor_completes() {
        let result = json!([{"id": 1}, {"id": 2}, {"name": "no-id"}]);
        assert_eq!(next_step(&batch_action(3), &result), Some(BatchStep::Complete));
        let result = json!([{"id": 1}, {"id": 2}, {"id": null}]);
        assert_eq!(next_step(&batch_action(3), &result), Some(BatchStep::Complete));
    }
}
