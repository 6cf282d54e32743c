//! Application core: lifecycle state machine, operation coordinator and
//! shared request-handler state.

pub mod coordinator;
pub mod lifecycle;
mod state;

pub(crate) use coordinator::{ControlError, ControlOutcome};
pub(crate) use state::AppState;

pub use lifecycle::{OperationKind, Phase};
