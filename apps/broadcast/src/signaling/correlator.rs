use std::collections::{HashMap, HashSet};

use crate::protocol::RequestId;

/// What to do when the reply to an outbound request arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    /// Apply the result as the remote answer to our initial offer.
    ApplyJoinAnswer,
    /// The server acknowledged an `answer` we sent for one of its offers.
    AcknowledgeAnswer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub method: &'static str,
    pub action: PendingAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no pending request for reply id {0}")]
pub struct NotFound(pub RequestId);

/// Issues correlation ids and remembers which action each one is waiting on.
///
/// Ids are random 64-bit values; every id ever issued is remembered so a
/// repeat is impossible for the lifetime of the correlator.
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    pending: HashMap<RequestId, PendingRequest>,
    issued: HashSet<RequestId>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self, method: &'static str, action: PendingAction) -> RequestId {
        let id = loop {
            let Some(candidate) = RequestId::new(rand::random::<u64>()) else {
                continue;
            };
            if self.issued.insert(candidate) {
                break candidate;
            }
        };
        self.pending.insert(id, PendingRequest { method, action });
        tracing::trace!(target = "signaling", %id, method, ?action, "issued request id");
        id
    }

    /// Marks an id seen on the wire as used so it is never issued locally.
    pub fn retire(&mut self, id: RequestId) {
        self.issued.insert(id);
    }

    /// Looks up a pending request without consuming it.
    pub fn pending(&self, id: RequestId) -> Option<&PendingRequest> {
        self.pending.get(&id)
    }

    pub fn resolve(&mut self, id: RequestId) -> Result<PendingRequest, NotFound> {
        self.pending.remove(&id).ok_or(NotFound(id))
    }

    pub fn was_issued(&self, id: RequestId) -> bool {
        self.issued.contains(&id)
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_ids_are_distinct_and_nonzero() {
        let mut correlator = RequestCorrelator::new();
        let ids: HashSet<_> = (0..1_000)
            .map(|_| correlator.issue("join", PendingAction::ApplyJoinAnswer))
            .collect();
        assert_eq!(ids.len(), 1_000);
        assert!(ids.iter().all(|id| id.get() != 0));
        assert_eq!(correlator.outstanding(), 1_000);
    }

    #[test]
    fn resolve_consumes_the_pending_action() {
        let mut correlator = RequestCorrelator::new();
        let id = correlator.issue("join", PendingAction::ApplyJoinAnswer);
        assert_eq!(
            correlator.pending(id).map(|pending| pending.action),
            Some(PendingAction::ApplyJoinAnswer)
        );
        let resolved = correlator.resolve(id).unwrap();
        assert_eq!(resolved.method, "join");
        assert_eq!(resolved.action, PendingAction::ApplyJoinAnswer);

        // A duplicate reply finds nothing, but the id stays retired.
        assert_eq!(correlator.resolve(id), Err(NotFound(id)));
        assert!(correlator.was_issued(id));
    }

    #[test]
    fn retired_ids_are_not_pending() {
        let mut correlator = RequestCorrelator::new();
        let server = RequestId::new(77).unwrap();
        correlator.retire(server);
        assert!(correlator.was_issued(server));
        assert!(correlator.pending(server).is_none());
        assert_ne!(correlator.issue("answer", PendingAction::AcknowledgeAnswer), server);
    }

    #[test]
    fn resolve_unknown_id_is_not_found() {
        let mut correlator = RequestCorrelator::new();
        let stray = RequestId::new(12345).unwrap();
        assert_eq!(correlator.resolve(stray), Err(NotFound(stray)));
        assert!(!correlator.was_issued(stray));
    }
}
