// Event-driven story lifecycle. Every applied event is checked against the
// transition table and written to the transition log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statig::prelude::*;
use thiserror::Error;

use super::states::{is_valid_transition, StoryState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoryEvent {
    /// Move along the happy path.
    Advance { actor: String },
    /// QA or UAT rejects the work.
    SendBack { actor: String, reason: String },
    /// Emergency close of an active story.
    Close { actor: String, reason: Option<String> },
    Cancel { actor: String, reason: Option<String> },
    /// Direct jump, still bound by the transition table.
    MoveTo {
        to: StoryState,
        actor: String,
        reason: Option<String>,
    },
}

impl StoryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StoryEvent::Advance { .. } => "advance",
            StoryEvent::SendBack { .. } => "send-back",
            StoryEvent::Close { .. } => "close",
            StoryEvent::Cancel { .. } => "cancel",
            StoryEvent::MoveTo { .. } => "move-to",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryTransition {
    pub story_id: String,
    pub from: StoryState,
    pub to: StoryState,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Invalid story transition {from} -> {to}")]
    InvalidTransition { from: StoryState, to: StoryState },
    #[error("Event '{event}' does not apply to a story in {state}")]
    EventNotApplicable {
        event: &'static str,
        state: StoryState,
    },
}

/// Context of the lifecycle machine.
#[derive(Debug)]
pub struct StoryWorkflow {
    story_id: String,
    current: StoryState,
    history: Vec<StoryTransition>,
    last_rejection: Option<TransitionError>,
    resume_to: Option<StoryState>,
}

impl StoryWorkflow {
    pub fn new(story_id: impl Into<String>) -> Self {
        Self {
            story_id: story_id.into(),
            current: StoryState::Draft,
            history: Vec::new(),
            last_rejection: None,
            resume_to: None,
        }
    }

    fn step(&mut self, to: StoryState, actor: &str, reason: Option<&str>) -> Outcome<State> {
        let from = self.current;
        if !is_valid_transition(from, to) {
            tracing::warn!(
                story_id = %self.story_id,
                from = %from,
                to = %to,
                actor = %actor,
                "Rejected invalid story transition"
            );
            self.last_rejection = Some(TransitionError::InvalidTransition { from, to });
            return Handled;
        }

        self.history.push(StoryTransition {
            story_id: self.story_id.clone(),
            from,
            to,
            actor: actor.to_string(),
            reason: reason.map(str::to_string),
            at: Utc::now(),
        });
        self.current = to;
        self.last_rejection = None;

        tracing::info!(
            story_id = %self.story_id,
            from = %from,
            to = %to,
            actor = %actor,
            reason = ?reason,
            "Story transitioned"
        );
        Transition(state_for(to))
    }

    fn reject(&mut self, event: &StoryEvent) -> Outcome<State> {
        tracing::warn!(
            story_id = %self.story_id,
            state = %self.current,
            event = event.name(),
            "Event ignored in current story state"
        );
        self.last_rejection = Some(TransitionError::EventNotApplicable {
            event: event.name(),
            state: self.current,
        });
        Handled
    }
}

fn state_for(story_state: StoryState) -> State {
    match story_state {
        StoryState::Draft => State::draft(),
        StoryState::Backlog => State::backlog(),
        StoryState::ReadyToWork => State::ready_to_work(),
        StoryState::InProgress => State::in_progress(),
        StoryState::ReadyForQa => State::ready_for_qa(),
        StoryState::Uat => State::uat(),
        StoryState::Done => State::done(),
        StoryState::Cancelled => State::cancelled(),
    }
}

#[state_machine(initial = "State::draft()")]
impl StoryWorkflow {
    #[state(superstate = "story")]
    fn draft(&mut self, event: &StoryEvent) -> Outcome<State> {
        match event {
            StoryEvent::Advance { actor } => self.step(StoryState::Backlog, actor, None),
            _ => Super,
        }
    }

    #[state(superstate = "story")]
    fn backlog(&mut self, event: &StoryEvent) -> Outcome<State> {
        match event {
            StoryEvent::Advance { actor } => self.step(StoryState::ReadyToWork, actor, None),
            _ => Super,
        }
    }

    #[state(superstate = "story")]
    fn ready_to_work(&mut self, event: &StoryEvent) -> Outcome<State> {
        match event {
            StoryEvent::Advance { actor } => self.step(StoryState::InProgress, actor, None),
            _ => Super,
        }
    }

    #[state(superstate = "story")]
    fn in_progress(&mut self, event: &StoryEvent) -> Outcome<State> {
        match event {
            StoryEvent::Advance { actor } => self.step(StoryState::ReadyForQa, actor, None),
            StoryEvent::Close { actor, reason } => {
                self.step(StoryState::Done, actor, reason.as_deref())
            }
            _ => Super,
        }
    }

    #[state(superstate = "story")]
    fn ready_for_qa(&mut self, event: &StoryEvent) -> Outcome<State> {
        match event {
            StoryEvent::Advance { actor } => self.step(StoryState::Uat, actor, None),
            StoryEvent::SendBack { actor, reason } => {
                self.step(StoryState::InProgress, actor, Some(reason.as_str()))
            }
            StoryEvent::Close { actor, reason } => {
                self.step(StoryState::Done, actor, reason.as_deref())
            }
            _ => Super,
        }
    }

    #[state(superstate = "story")]
    fn uat(&mut self, event: &StoryEvent) -> Outcome<State> {
        match event {
            StoryEvent::Advance { actor } => self.step(StoryState::Done, actor, None),
            StoryEvent::SendBack { actor, reason } => {
                self.step(StoryState::ReadyForQa, actor, Some(reason.as_str()))
            }
            StoryEvent::Close { actor, reason } => {
                self.step(StoryState::Done, actor, reason.as_deref())
            }
            _ => Super,
        }
    }

    #[state(superstate = "story")]
    fn done() -> Outcome<State> {
        Super
    }

    #[state(superstate = "story")]
    fn cancelled() -> Outcome<State> {
        Super
    }

    /// Events every state shares: cancellation and direct moves.
    #[superstate]
    fn story(&mut self, event: &StoryEvent) -> Outcome<State> {
        // A resumed lifecycle jumps to its persisted state on the first event.
        if let Some(target) = self.resume_to.take() {
            return Transition(state_for(target));
        }
        match event {
            StoryEvent::Cancel { actor, reason } => {
                self.step(StoryState::Cancelled, actor, reason.as_deref())
            }
            StoryEvent::MoveTo { to, actor, reason } => self.step(*to, actor, reason.as_deref()),
            _ => self.reject(event),
        }
    }
}

/// A story's lifecycle, starting in `draft`.
pub struct StoryLifecycle {
    machine: StateMachine<StoryWorkflow>,
}

impl std::fmt::Debug for StoryLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoryLifecycle")
            .field("story_id", &self.story_id())
            .field("current", &self.current())
            .field("transitions", &self.history().len())
            .finish()
    }
}

impl StoryLifecycle {
    pub fn new(story_id: impl Into<String>) -> Self {
        Self {
            machine: StoryWorkflow::new(story_id).state_machine(),
        }
    }

    /// Pick up a persisted story in `current`, keeping its transition log.
    pub fn resume(
        story_id: impl Into<String>,
        current: StoryState,
        history: Vec<StoryTransition>,
    ) -> Self {
        let mut workflow = StoryWorkflow::new(story_id);
        workflow.current = current;
        workflow.history = history;
        workflow.resume_to = Some(current);

        let mut machine = workflow.state_machine();
        machine.handle(&StoryEvent::MoveTo {
            to: current,
            actor: String::new(),
            reason: None,
        });

        tracing::debug!(
            story_id = %machine.inner().story_id,
            state = %current,
            transitions = machine.inner().history.len(),
            "Story lifecycle resumed"
        );
        Self { machine }
    }

    pub fn story_id(&self) -> &str {
        &self.machine.inner().story_id
    }

    pub fn current(&self) -> StoryState {
        self.machine.inner().current
    }

    /// Applied transitions, oldest first.
    pub fn history(&self) -> &[StoryTransition] {
        &self.machine.inner().history
    }

    pub fn next_action(&self) -> &'static str {
        self.current().next_action()
    }

    /// Feed one event. Returns the new state, or why nothing happened.
    pub fn handle(&mut self, event: &StoryEvent) -> Result<StoryState, TransitionError> {
        let before = self.history().len();
        self.machine.handle(event);

        if self.history().len() > before {
            return Ok(self.current());
        }
        Err(self
            .machine
            .inner()
            .last_rejection
            .clone()
            .unwrap_or(TransitionError::EventNotApplicable {
                event: event.name(),
                state: self.current(),
            }))
    }

    pub fn advance(&mut self, actor: impl Into<String>) -> Result<StoryState, TransitionError> {
        self.handle(&StoryEvent::Advance {
            actor: actor.into(),
        })
    }

    pub fn send_back(
        &mut self,
        actor: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<StoryState, TransitionError> {
        self.handle(&StoryEvent::SendBack {
            actor: actor.into(),
            reason: reason.into(),
        })
    }

    pub fn close(
        &mut self,
        actor: impl Into<String>,
        reason: Option<String>,
    ) -> Result<StoryState, TransitionError> {
        self.handle(&StoryEvent::Close {
            actor: actor.into(),
            reason,
        })
    }

    pub fn cancel(
        &mut self,
        actor: impl Into<String>,
        reason: Option<String>,
    ) -> Result<StoryState, TransitionError> {
        self.handle(&StoryEvent::Cancel {
            actor: actor.into(),
            reason,
        })
    }

    /// Jump straight to `to` if the transition table allows it.
    pub fn transition_to(
        &mut self,
        to: StoryState,
        actor: impl Into<String>,
        reason: Option<String>,
    ) -> Result<StoryState, TransitionError> {
        self.handle(&StoryEvent::MoveTo {
            to,
            actor: actor.into(),
            reason,
        })
    }
}
