//! The fixed scheduling pipeline.
use std::time::Instant;

use silica_ir::Design;
use silica_utils::SilicaResult;

use crate::analysis::{
    find_conflicts, resolve_conflicts, FixPolicy, LatencyTracker,
};
use crate::passes;

/// Configuration for one scheduling run.
#[derive(Clone, Debug)]
pub struct SchedulerConf {
    /// Assume entries arrive balanced and pad controls to make it true,
    /// instead of inserting per-entry holding registers.
    pub balance: bool,
    /// How to repair loop feedback conflicts when removing iteration
    /// flops.
    pub fix_policy: FixPolicy,
    /// Collapse long simple-register chains into shift registers.
    pub compact_shift_registers: bool,
    /// Place pin-boundary registers in I/O block flops.
    pub iob_registers: bool,
    /// Pipeline depth for multipliers; zero leaves them combinational.
    pub multiplier_stages: u32,
    /// Register operator results once a combinational chain exceeds this
    /// many operators. `None` leaves chains unbroken.
    pub pipeline_gate_depth: Option<u32>,
    /// Permit block RAM implementations for large memories.
    pub allow_block_ram: bool,
}

impl Default for SchedulerConf {
    fn default() -> Self {
        SchedulerConf {
            balance: false,
            fix_policy: FixPolicy::None,
            compact_shift_registers: true,
            iob_registers: false,
            multiplier_stages: 0,
            pipeline_gate_depth: None,
            allow_block_ram: true,
        }
    }
}

/// Runs the whole scheduling pipeline over a design. The stage order is
/// fixed; configuration only switches individual stages on and off or
/// changes their parameters.
pub struct Scheduler {
    conf: SchedulerConf,
}

impl Scheduler {
    pub fn new(conf: SchedulerConf) -> Self {
        Scheduler { conf }
    }

    /// Schedule `design` in place. On success the returned tracker holds
    /// the timing of every control bus the run created or consulted.
    pub fn schedule(
        &self,
        design: &mut Design,
    ) -> SilicaResult<LatencyTracker> {
        stage("widths", || passes::widths::propagate_widths(design))?;
        if let Some(depth) = self.conf.pipeline_gate_depth {
            stage("pipeline-optimization", || {
                passes::pipeline::pipeline_operations(design, depth)
                    .map(|_| ())
            })?;
        }
        // Widths run again after pipelining so the memory stages see
        // settled bus values.
        stage("re-widths", || passes::widths::propagate_widths(design))?;
        stage("access-resolution", || {
            passes::memories::resolve_accesses(design);
            Ok(())
        })?;
        stage("memory-pruning", || {
            passes::memories::prune_dead_memories(design);
            Ok(())
        })?;
        stage("memory-implementation", || {
            passes::memories::select_implementations(
                design,
                self.conf.allow_block_ram,
            );
            Ok(())
        })?;
        stage("dual-port-allocation", || {
            passes::memories::allocate_dual_port(design);
            Ok(())
        })?;
        stage("memory-build", || {
            passes::memories::build_referees(design)
        })?;
        stage("resource-sequencing", || {
            passes::resources::sequence_resources(design).map(|_| ())
        })?;
        stage("pin-write-optimization", || {
            passes::pins::optimize_pin_writes(design);
            Ok(())
        })?;
        stage("access-count", || {
            passes::memories::count_accesses(design);
            Ok(())
        })?;
        if self.conf.multiplier_stages > 0 {
            stage("multiplier-pipelining", || {
                passes::pipeline::pipeline_multipliers(
                    design,
                    self.conf.multiplier_stages,
                );
                Ok(())
            })?;
        }
        stage("normalize", || {
            passes::normalizer::check_dependencies(design)
        })?;
        stage("loop-cycle-optimization", || {
            self.optimize_loop_cycles(design)
        })?;
        let mut tracker = stage("schedule", || {
            passes::schedule::schedule_design(design, self.conf.balance)
        })?;
        stage("task-depth", || {
            passes::pipeline::adjust_task_depth(design, &mut tracker)
        })?;
        if self.conf.compact_shift_registers {
            stage("srl-compaction", || {
                passes::pipeline::compact_shift_registers(design)
                    .map(|_| ())
            })?;
        }
        if self.conf.iob_registers {
            stage("iob-registers", || {
                passes::pipeline::insert_iob_registers(design);
                Ok(())
            })?;
        }
        stage("global-connection", || {
            passes::memories::connect_globals(design, &tracker)
        })?;
        stage("cleanup", || {
            passes::cleanup::sweep(design).map(|_| ())
        })?;
        stage("verify", || {
            passes::cleanup::verify_connections(design)
        })?;
        Ok(tracker)
    }

    /// Balance in-loop branches, then repair loop feedback conflicts.
    ///
    /// Conflict detection needs scheduled latencies, but repairs must land
    /// before scheduling commits any connections. A throwaway schedule of
    /// a clone squares that: arenas give both copies identical indices, so
    /// conflicts found in the clone name components of the original
    /// directly.
    fn optimize_loop_cycles(
        &self,
        design: &mut Design,
    ) -> SilicaResult<()> {
        passes::branch_balancer::balance_branches(design)?;
        if self.conf.fix_policy == FixPolicy::None {
            return Ok(());
        }

        let mut trial = design.clone();
        let tracker = match passes::schedule::schedule_design(
            &mut trial,
            self.conf.balance,
        ) {
            Ok(tracker) => tracker,
            Err(err) => {
                // The trial failing now means the real run will fail with
                // a better context later; skip the repair quietly.
                log::debug!("trial schedule failed: {err}");
                return Ok(());
            }
        };

        let mut conflicts = Vec::new();
        for idx in trial.components.keys().collect::<Vec<_>>() {
            if let silica_ir::ComponentKind::Loop { body, .. } =
                trial.components[idx].kind
            {
                conflicts.extend(find_conflicts(&trial, &tracker, body)?);
            }
        }
        let repaired = resolve_conflicts(
            design,
            &conflicts,
            self.conf.fix_policy,
        )?;
        if repaired > 0 {
            log::info!(
                "delayed {repaired} accesses to resolve loop feedback \
                 conflicts"
            );
        }
        Ok(())
    }
}

/// Run one pipeline stage, timing it the way the rest of the logs read.
fn stage<T>(
    name: &str,
    run: impl FnOnce() -> SilicaResult<T>,
) -> SilicaResult<T> {
    let start = Instant::now();
    let result = run();
    log::info!("{name}: {}ms", start.elapsed().as_millis());
    result
}
