pub mod downstream;
pub mod orchestrator;

pub use downstream::{CallContext, DownstreamClient};
pub use orchestrator::OrderOrchestrator;
