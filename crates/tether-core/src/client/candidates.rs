use crate::client::types::IceCandidate;
use std::collections::VecDeque;

/// Remote candidates that arrived before the remote description was accepted.
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: VecDeque<IceCandidate>,
    accepted: bool,
}

impl PendingCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    /// Buffer `candidate` if the remote description is not accepted yet.
    /// Otherwise hand it back for immediate use.
    pub fn offer(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.accepted {
            Some(candidate)
        } else {
            self.queue.push_back(candidate);
            None
        }
    }

    /// Mark the remote description accepted and take everything buffered,
    /// in receipt order.
    pub fn accept(&mut self) -> Vec<IceCandidate> {
        self.accepted = true;
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.accepted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(c: &[IceCandidate]) -> Vec<&str> {
        c.iter().map(|c| c.candidate.as_str()).collect()
    }

    #[test]
    fn buffers_until_accept_then_drains_in_order() {
        let mut pending = PendingCandidates::new();
        for name in ["a", "b", "c"] {
            assert!(pending.offer(IceCandidate::new(name)).is_none());
        }
        assert_eq!(pending.len(), 3);

        let drained = pending.accept();
        assert_eq!(names(&drained), ["a", "b", "c"]);
        assert!(pending.is_empty());
        assert!(pending.is_accepted());
    }

    #[test]
    fn passes_through_after_accept() {
        let mut pending = PendingCandidates::new();
        assert!(pending.accept().is_empty());
        let c = pending.offer(IceCandidate::new("late")).unwrap();
        assert_eq!(c.candidate, "late");
        assert!(pending.is_empty());
    }

    #[test]
    fn clear_resets() {
        let mut pending = PendingCandidates::new();
        pending.offer(IceCandidate::new("a"));
        pending.accept();
        pending.clear();
        assert!(!pending.is_accepted());
        assert!(pending.is_empty());
    }
}
