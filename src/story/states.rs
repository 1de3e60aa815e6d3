// Story lifecycle states and the transition table.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoryState {
    Draft,
    Backlog,
    ReadyToWork,
    InProgress,
    ReadyForQa,
    Uat,
    Done,
    Cancelled,
}

/// Every state, in lifecycle order.
pub const STORY_STATES: [StoryState; 8] = [
    StoryState::Draft,
    StoryState::Backlog,
    StoryState::ReadyToWork,
    StoryState::InProgress,
    StoryState::ReadyForQa,
    StoryState::Uat,
    StoryState::Done,
    StoryState::Cancelled,
];

impl StoryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryState::Draft => "draft",
            StoryState::Backlog => "backlog",
            StoryState::ReadyToWork => "ready-to-work",
            StoryState::InProgress => "in-progress",
            StoryState::ReadyForQa => "ready-for-qa",
            StoryState::Uat => "uat",
            StoryState::Done => "done",
            StoryState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        is_terminal_state(*self)
    }

    pub fn is_active(&self) -> bool {
        is_active_state(*self)
    }

    pub fn is_workable(&self) -> bool {
        is_workable_state(*self)
    }

    pub fn next(&self) -> Option<StoryState> {
        get_next_state(*self)
    }

    pub fn can_transition_to(&self, to: StoryState) -> bool {
        is_valid_transition(*self, to)
    }

    /// What a person should do with a story sitting in this state.
    pub fn next_action(&self) -> &'static str {
        match self {
            StoryState::Draft => "Generate story structure",
            StoryState::Backlog => "Elaborate story",
            StoryState::ReadyToWork => "Start implementation",
            StoryState::InProgress => "Continue implementation or submit for review",
            StoryState::ReadyForQa => "Run QA verification",
            StoryState::Uat => "Complete UAT testing",
            StoryState::Done => "Story complete - no action needed",
            StoryState::Cancelled => "Story cancelled - no action needed",
        }
    }
}

impl std::fmt::Display for StoryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown story state '{0}'")]
pub struct ParseStoryStateError(pub String);

impl FromStr for StoryState {
    type Err = ParseStoryStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STORY_STATES
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ParseStoryStateError(s.to_string()))
    }
}

pub fn is_terminal_state(state: StoryState) -> bool {
    matches!(state, StoryState::Done | StoryState::Cancelled)
}

pub fn is_active_state(state: StoryState) -> bool {
    matches!(
        state,
        StoryState::InProgress | StoryState::ReadyForQa | StoryState::Uat
    )
}

pub fn is_workable_state(state: StoryState) -> bool {
    state == StoryState::ReadyToWork
}

/// Happy-path successor; `None` from a terminal state.
pub fn get_next_state(state: StoryState) -> Option<StoryState> {
    use StoryState::*;
    match state {
        Draft => Some(Backlog),
        Backlog => Some(ReadyToWork),
        ReadyToWork => Some(InProgress),
        InProgress => Some(ReadyForQa),
        ReadyForQa => Some(Uat),
        Uat => Some(Done),
        Done | Cancelled => None,
    }
}

/// Allowed edges: the forward chain, cancellation from anywhere (including
/// `done`), the two rejection loops, and an active state closing straight to
/// `done`.
pub fn is_valid_transition(from: StoryState, to: StoryState) -> bool {
    use StoryState::*;

    if to == Cancelled {
        return true;
    }
    if get_next_state(from) == Some(to) {
        return true;
    }
    match (from, to) {
        (ReadyForQa, InProgress) | (Uat, ReadyForQa) => true,
        (from, Done) => is_active_state(from),
        _ => false,
    }
}
