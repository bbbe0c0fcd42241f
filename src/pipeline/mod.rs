// 12.0: the settlement pipeline. one scheduled tick drives a fixed stage
// sequence over the store: intake -> compliance -> fees -> batching ->
// securing -> payout -> completion -> notification. every stage persists
// per-item results so a crash resumes from stored state on the next tick.

mod batching;
mod compliance;
mod core;
mod intake;
mod notify;
mod payouts;
mod results;
mod securing;

pub use self::core::SettlementPipeline;
pub use results::{PipelineError, TickReport};
