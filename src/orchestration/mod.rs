//! Chain-facing components: batch resolution, transfer accumulation, the
//! build reactor and the poll scheduler.

pub mod reactor;
pub mod resolver;
pub mod scheduler;
pub mod transfers;

pub use reactor::{BuildHandler, BuildNotification, BuildReactor, ReactorSupervisor};
pub use resolver::CostValueResolver;
pub use scheduler::{
    MarketCycle, MarketFailure, OverlapPolicy, PollScheduler, PositionTotals, SchedulerOptions,
    TickOutcome, TickReport,
};
pub use transfers::{AccumulationOutcome, ScanBoundary, TransferAccumulator};
