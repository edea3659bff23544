use serde::Serialize;

/// Lifecycle of one replay.
///
/// `Idle -> Running -> Draining -> Completed` is the normal path. `Aborted` is
/// terminal and only reached when the replay cannot start or the output log
/// can no longer be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Running,
    Draining,
    Completed,
    Aborted,
}

impl EngineState {
    pub fn can_transition_to(self, next: EngineState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running)
                | (Self::Idle, Self::Aborted)
                | (Self::Running, Self::Draining)
                | (Self::Draining, Self::Completed)
                | (Self::Draining, Self::Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}
