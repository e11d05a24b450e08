use std::fmt;

use tracing::{Span, debug, warn};

/// Cycle progress. `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    RulesFetched,
    FeedActive,
    Sized,
    EntrySubmitted,
    ProtectionSubmitted,
    Closed,
    Failed,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::RulesFetched => "rules_fetched",
            CycleState::FeedActive => "feed_active",
            CycleState::Sized => "sized",
            CycleState::EntrySubmitted => "entry_submitted",
            CycleState::ProtectionSubmitted => "protection_submitted",
            CycleState::Closed => "closed",
            CycleState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CycleState::Closed | CycleState::Failed)
    }

    fn successor(&self) -> Option<CycleState> {
        use CycleState::*;
        match self {
            Idle => Some(RulesFetched),
            RulesFetched => Some(FeedActive),
            FeedActive => Some(Sized),
            Sized => Some(EntrySubmitted),
            EntrySubmitted => Some(ProtectionSubmitted),
            ProtectionSubmitted => Some(Closed),
            Closed | Failed => None,
        }
    }

    pub fn can_transition_to(&self, next: CycleState) -> bool {
        if self.is_terminal() {
            return false;
        }
        // an entry without protection still closes out the cycle
        next == CycleState::Failed
            || self.successor() == Some(next)
            || (*self == CycleState::EntrySubmitted && next == CycleState::Closed)
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records the path a cycle took and mirrors it onto the current span.
#[derive(Debug, Clone)]
pub struct StateTracker {
    trail: Vec<CycleState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            trail: vec![CycleState::Idle],
        }
    }

    pub fn current(&self) -> CycleState {
        self.trail.last().copied().unwrap_or(CycleState::Idle)
    }

    /// Moves to `next`; illegal moves are logged and ignored.
    pub fn advance(&mut self, next: CycleState) -> bool {
        let from = self.current();
        if !from.can_transition_to(next) {
            warn!(%from, to = %next, "illegal cycle transition ignored");
            return false;
        }
        debug!(%from, to = %next, "cycle transition");
        Span::current().record("state", next.as_str());
        self.trail.push(next);
        true
    }

    pub fn trail(&self) -> &[CycleState] {
        &self.trail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CycleState::*;

    #[test]
    fn happy_path_is_linear() {
        let mut t = StateTracker::new();
        for s in [RulesFetched, FeedActive, Sized, EntrySubmitted, ProtectionSubmitted, Closed] {
            assert!(t.advance(s), "{s} should be reachable");
        }
        assert_eq!(t.current(), Closed);
        assert_eq!(t.trail().len(), 7);
    }

    #[test]
    fn failed_reachable_from_any_non_terminal() {
        for s in [Idle, RulesFetched, FeedActive, Sized, EntrySubmitted, ProtectionSubmitted] {
            assert!(s.can_transition_to(Failed));
        }
        assert!(!Closed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Closed));
    }

    #[test]
    fn skipping_states_is_rejected() {
        let mut t = StateTracker::new();
        assert!(!t.advance(Sized));
        assert!(!t.advance(EntrySubmitted));
        assert_eq!(t.current(), Idle);
    }
}
