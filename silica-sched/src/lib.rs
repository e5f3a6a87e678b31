//! Scheduling backend for silica designs.
//!
//! Takes a behavioral design graph whose components carry entries (ways
//! control may arrive) and dependencies (what each port waits on), and
//! produces the fully connected, timed structural graph emission works
//! from. [`Scheduler::schedule`] runs the whole pipeline; the pieces are
//! public for tools that want a subset.
pub mod analysis;
pub mod passes;
mod scheduler;

pub use scheduler::{Scheduler, SchedulerConf};
