/// What the turn loop does after a turn's outcome is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakVerdict {
    Continue,
    /// Replace the carried story with a recovery story.
    ResetStory,
    /// Close the pause gate; a human has to look.
    AutoPause,
}

pub const RESET_AT: u32 = 2;
pub const PAUSE_AT: u32 = 4;

/// Counts consecutive failed turns. A turn fails when its output was
/// malformed and nothing was executed; any executed action clears the streak.
#[derive(Debug, Default)]
pub struct LoopController {
    failure_count: u32,
}

impl LoopController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn observe(&mut self, executed: usize, errors: usize) -> StreakVerdict {
        if executed > 0 {
            self.failure_count = 0;
        } else if errors > 0 {
            self.failure_count += 1;
        }

        match self.failure_count {
            n if n >= PAUSE_AT => {
                tracing::warn!(streak = n, "failure streak reached pause threshold");
                self.failure_count = 0;
                StreakVerdict::AutoPause
            }
            n if n >= RESET_AT => {
                tracing::warn!(streak = n, "failure streak; resetting story");
                StreakVerdict::ResetStory
            }
            _ => StreakVerdict::Continue,
        }
    }
}
