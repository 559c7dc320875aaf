//! Pipeline stages and the forward-only state machine.

use serde::{Deserialize, Serialize};

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Resolving,
    Staging,
    Configuring,
    Running,
    Locating,
    Done,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Resolving => "resolving",
            Stage::Staging => "staging",
            Stage::Configuring => "configuring",
            Stage::Running => "running",
            Stage::Locating => "locating",
            Stage::Done => "done",
        }
    }

    /// Following stage, `None` once done.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Init => Some(Stage::Resolving),
            Stage::Resolving => Some(Stage::Staging),
            Stage::Staging => Some(Stage::Configuring),
            Stage::Configuring => Some(Stage::Running),
            Stage::Running => Some(Stage::Locating),
            Stage::Locating => Some(Stage::Done),
            Stage::Done => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Tracks the current stage of one run. Stages are entered once each, in
/// order; there is no way back.
#[derive(Debug)]
pub struct StageTracker {
    current: Stage,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self {
            current: Stage::Init,
        }
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    /// Move to the next stage and return it. Stays at `Done`.
    pub fn advance(&mut self) -> Stage {
        if let Some(next) = self.current.next() {
            self.current = next;
        }
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_walks_all_stages_in_order() {
        let mut tracker = StageTracker::new();
        assert_eq!(tracker.current(), Stage::Init);

        let mut seen = vec![tracker.current()];
        while tracker.current() != Stage::Done {
            seen.push(tracker.advance());
        }

        assert_eq!(
            seen,
            vec![
                Stage::Init,
                Stage::Resolving,
                Stage::Staging,
                Stage::Configuring,
                Stage::Running,
                Stage::Locating,
                Stage::Done,
            ]
        );
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(tracker.advance(), Stage::Done);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Configuring.to_string(), "configuring");
    }
}
