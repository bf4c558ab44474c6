use super::{events::TaskEvent, states::TaskState};
use crate::error::{PipelineError, PipelineResult};

/// Pure transition table for the task lifecycle.
///
/// `Running` is never requested explicitly: the first progress write moves a
/// pending task into it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Determine the target state for `event` applied to `current`
    pub fn transition(current: TaskState, event: &TaskEvent) -> PipelineResult<TaskState> {
        let target = match (current, event) {
            (TaskState::Pending, TaskEvent::Progress) => TaskState::Running,
            (TaskState::Running, TaskEvent::Progress) => TaskState::Running,

            // A task with no subtasks completes without ever running
            (TaskState::Pending, TaskEvent::Complete) => TaskState::Completed,
            (TaskState::Running, TaskEvent::Complete) => TaskState::Completed,

            (TaskState::Pending, TaskEvent::Fail(_)) => TaskState::Failed,
            (TaskState::Running, TaskEvent::Fail(_)) => TaskState::Failed,

            (from_state, event) => {
                return Err(PipelineError::state_transition(
                    from_state,
                    event.event_type(),
                ))
            }
        };

        Ok(target)
    }

    /// Check whether `event` may be applied without returning the error
    pub fn can_transition(current: TaskState, event: &TaskEvent) -> bool {
        Self::transition(current, event).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert_eq!(
            TaskStateMachine::transition(TaskState::Pending, &TaskEvent::Progress).unwrap(),
            TaskState::Running
        );
        assert_eq!(
            TaskStateMachine::transition(TaskState::Running, &TaskEvent::Progress).unwrap(),
            TaskState::Running
        );
        assert_eq!(
            TaskStateMachine::transition(TaskState::Running, &TaskEvent::Complete).unwrap(),
            TaskState::Completed
        );
        assert_eq!(
            TaskStateMachine::transition(
                TaskState::Running,
                &TaskEvent::fail_with_error("boom")
            )
            .unwrap(),
            TaskState::Failed
        );
    }

    #[test]
    fn test_terminal_states_reject_events() {
        for state in [TaskState::Completed, TaskState::Failed] {
            assert!(!TaskStateMachine::can_transition(state, &TaskEvent::Progress));
            assert!(!TaskStateMachine::can_transition(state, &TaskEvent::Complete));
            assert!(matches!(
                TaskStateMachine::transition(state, &TaskEvent::Fail("x".into())),
                Err(PipelineError::StateTransition { .. })
            ));
        }
    }

    #[test]
    fn test_event_helpers() {
        let event = TaskEvent::fail_with_error("handler exploded");
        assert_eq!(event.event_type(), "fail");
        assert_eq!(event.error_message(), Some("handler exploded"));
        assert!(event.is_terminal());
        assert!(!TaskEvent::Progress.is_terminal());
    }
}
