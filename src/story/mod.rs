// Story lifecycle: states, transition rules and the event-driven machine.

pub mod lifecycle;
pub mod states;

pub use lifecycle::{StoryEvent, StoryLifecycle, StoryTransition, StoryWorkflow, TransitionError};
pub use states::{
    get_next_state, is_active_state, is_terminal_state, is_valid_transition, is_workable_state,
    ParseStoryStateError, StoryState, STORY_STATES,
};
