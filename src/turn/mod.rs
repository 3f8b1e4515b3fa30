//! One request/response cycle with the CLI

mod reducer;
mod record;
mod runner;

pub use reducer::{ToolCallAccumulator, TurnPhase, TurnReducer, TurnUpdate};
pub use record::{FinalizedMessage, FinalizedToolCall, Role, ToolCallStatus};
pub use runner::{TurnHandle, TurnOutcome};

pub(crate) use runner::{spawn_turn, TurnContext};
