pub mod commands;
pub mod controller;
mod loop_worker;
pub mod registry;

pub use controller::{FlowController, FlowStarted, StopOutcome, DEFAULT_TICK_INTERVAL};
pub use registry::{FlowRegistry, FlowState, FlowTicket};
