/// Run lifecycle state machine
///
/// Every pipeline run moves through an explicit set of states. Transitions
/// consume the current state and return the next one, or an
/// `InvalidStateTransition` error when the move is not allowed.
///
/// # States
///
/// - `Pending` - Created, no stage started
/// - `Running { stage_index }` - Stage `stage_index` is executing
/// - `Completed` - Every stage recorded its output
/// - `Failed { stage_index, reason }` - Stage `stage_index` failed, later stages never ran
///
/// # Example
///
/// ```
/// use insightflow_lib::state_machine::RunState;
///
/// let state = RunState::Pending.start().unwrap();
/// let state = state.advance(2).unwrap();
/// assert_eq!(state, RunState::Running { stage_index: 1 });
/// let state = state.advance(2).unwrap();
/// assert!(state.is_terminal());
/// ```
pub mod run_state;

pub use run_state::RunState;
