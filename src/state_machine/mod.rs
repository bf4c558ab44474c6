//! Task lifecycle state machine
//!
//! The engine is the only writer of a task's status once the task has been
//! enqueued. Every status write goes through [`TaskStateMachine::transition`]
//! so repositories agree on which moves are legal.

pub mod events;
pub mod states;
pub mod task_state_machine;

pub use events::TaskEvent;
pub use states::TaskState;
pub use task_state_machine::TaskStateMachine;
