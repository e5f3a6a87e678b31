//! The scheduling passes, in rough pipeline order.
pub mod branch_balancer;
pub mod cleanup;
pub mod entry_schedule;
pub mod memories;
pub mod normalizer;
pub mod pins;
pub mod pipeline;
pub mod resources;
pub mod schedule;
pub mod widths;

pub use entry_schedule::EntrySchedule;
