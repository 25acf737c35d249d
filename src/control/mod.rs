pub mod dispatcher;
pub mod hysteresis;

pub use dispatcher::{CommandDispatcher, CommandReceipt, PendingCommand, RetryPolicy};
pub use hysteresis::{desired_state, Evaluation, HysteresisController};
