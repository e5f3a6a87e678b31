//! Analyses used by the scheduling passes.
mod latency_tracker;
mod loop_flop;
mod op_cache;
mod order;

pub use latency_tracker::LatencyTracker;
pub use loop_flop::{
    find_conflicts, flop_removable, resolve_conflicts, FeedbackTuple,
    FixPolicy, LoopFlopConflict,
};
pub use op_cache::OpCache;
pub use order::dataflow_order;
pub(crate) use order::lift_to_sibling;
