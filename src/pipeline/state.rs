//! Pipeline state management

/// Lifecycle state of a stage or a whole graph
///
/// States are totally ordered by readiness to process data. Moving between
/// two states always passes through every state in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PipelineState {
    /// No resources allocated
    #[default]
    Null,

    /// Resources allocated, no data flowing
    Ready,

    /// Data may be prerolled and formats negotiated, the clock is stopped
    Paused,

    /// Data is flowing
    Playing,
}

/// A single step between two adjacent states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: PipelineState,
    pub to: PipelineState,
}

impl StateChange {
    /// Whether this step raises readiness
    pub fn is_upward(&self) -> bool {
        self.to > self.from
    }
}

impl std::fmt::Display for StateChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} → {}", self.from, self.to)
    }
}

impl PipelineState {
    const ORDER: [PipelineState; 4] = [
        PipelineState::Null,
        PipelineState::Ready,
        PipelineState::Paused,
        PipelineState::Playing,
    ];

    fn rank(self) -> usize {
        self as usize
    }

    /// Adjacent steps needed to go from `self` to `target`, in order
    pub fn steps_to(self, target: PipelineState) -> Vec<StateChange> {
        let (from, to) = (self.rank(), target.rank());
        let path: Vec<PipelineState> = if from <= to {
            Self::ORDER[from..=to].to_vec()
        } else {
            Self::ORDER[to..=from].iter().rev().copied().collect()
        };

        path.windows(2)
            .map(|pair| StateChange {
                from: pair[0],
                to: pair[1],
            })
            .collect()
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            PipelineState::Null => "Null",
            PipelineState::Ready => "Ready",
            PipelineState::Paused => "Paused",
            PipelineState::Playing => "Playing",
        }
    }

    /// Check if data may flow (paused or playing)
    pub fn is_active(&self) -> bool {
        matches!(self, PipelineState::Paused | PipelineState::Playing)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
