//! Feedback analysis for loop iteration boundaries.
//!
//! A loop normally separates consecutive iterations with a flop, costing a
//! cycle per iteration. The flop is removable when no stateful resource can
//! be touched in both the last cycle of one iteration and the first cycle
//! of the next: without the flop those two cycles are the same physical
//! cycle, and the accesses would collide.
//!
//! The analysis walks a scheduled loop body, collecting a
//! [`FeedbackTuple`] per resource access with proofs about whether the
//! access can fall in the first or last cycle of an iteration. A resource
//! with an access on each end is a conflict. Anything the latencies cannot
//! decide stops the analysis; the caller keeps the flop and reports why.
use std::collections::{BTreeSet, HashMap};
use std::ops::ControlFlow;

use silica_ir::{
    CompIdx, ComponentKind, Dependency, Design, Latency, Resource,
};
use silica_utils::{Error, SilicaResult};

use crate::analysis::LatencyTracker;

/// How to repair first/last-cycle conflicts when removing a loop flop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixPolicy {
    /// Keep the flop; never repair.
    None,
    /// Delay whichever side of each conflict has fewer accesses.
    Fewest,
    /// Delay whichever side has more accesses.
    Most,
    /// Always delay the first-cycle accesses.
    FirstAlways,
    /// Always delay the last-cycle accesses.
    LastAlways,
}

/// One resource access observed from the loop body, with proofs about its
/// position in the iteration translated into the body's time frame.
#[derive(Clone, Debug)]
pub struct FeedbackTuple {
    pub resource: Resource,
    pub access: CompIdx,
    pub is_first: bool,
    pub is_last: bool,
}

/// A first-cycle access and a last-cycle access of the same resource.
#[derive(Clone, Debug)]
pub struct LoopFlopConflict {
    pub resource: Resource,
    /// The access that can fall in an iteration's first cycle.
    pub head: CompIdx,
    /// The access that can fall in an iteration's last cycle.
    pub tail: CompIdx,
}

/// Why an analysis run ended before visiting everything.
enum Stop {
    /// Fail-fast mode found its first conflict.
    Conflict,
    /// A latency the proof needs is unknown; the flop must stay.
    NotAnalyzable(String),
}

/// Decide whether `body`'s iteration flop is removable. Fail-fast: the
/// walk ends at the first conflict. An unanalyzable body keeps its flop
/// and logs why, it is never an error.
pub fn flop_removable(
    design: &Design,
    tracker: &LatencyTracker,
    body: CompIdx,
) -> SilicaResult<bool> {
    match body_completion(design, tracker, body) {
        None => {
            log::warn!(
                "keeping iteration flop of {}: completion was never \
                 scheduled",
                design.describe(body)
            );
            return Ok(false);
        }
        Some(latency) if latency.min_clocks() == 0 => {
            // An iteration can finish in the cycle it starts; without the
            // flop the feedback path would be combinational.
            return Ok(false);
        }
        Some(_) => {}
    }
    let mut analysis = Analysis::new(design, tracker, true);
    match analysis.run(body)? {
        ControlFlow::Continue(()) => Ok(true),
        ControlFlow::Break(Stop::Conflict) => Ok(false),
        ControlFlow::Break(Stop::NotAnalyzable(why)) => {
            log::warn!(
                "keeping iteration flop of {}: {why}",
                design.describe(body)
            );
            Ok(false)
        }
    }
}

/// Collect every first/last conflict in `body`, for conflict repair. The
/// walk never stops early; an unanalyzable body yields no conflicts.
pub fn find_conflicts(
    design: &Design,
    tracker: &LatencyTracker,
    body: CompIdx,
) -> SilicaResult<Vec<LoopFlopConflict>> {
    match body_completion(design, tracker, body) {
        None => {
            log::warn!(
                "not repairing conflicts in {}: completion was never \
                 scheduled",
                design.describe(body)
            );
            return Ok(Vec::new());
        }
        Some(latency) if latency.min_clocks() == 0 => {
            // The flop is required outright; no repair changes that.
            log::debug!(
                "{} can complete combinationally; the iteration flop \
                 stays",
                design.describe(body)
            );
            return Ok(Vec::new());
        }
        Some(_) => {}
    }
    let mut analysis = Analysis::new(design, tracker, false);
    match analysis.run(body)? {
        ControlFlow::Break(Stop::NotAnalyzable(why)) => {
            log::warn!(
                "not repairing conflicts in {}: {why}",
                design.describe(body)
            );
            Ok(Vec::new())
        }
        _ => Ok(analysis.conflicts),
    }
}

/// The scheduled completion of `body`, read off its output buffer.
fn body_completion(
    design: &Design,
    tracker: &LatencyTracker,
    body: CompIdx,
) -> Option<Latency> {
    let data = design.components[body].module_data()?;
    tracker.latency_of_comp(data.outbuf)
}

/// Repair `conflicts` by inserting sequencing dependencies that push the
/// chosen side out of the contested cycle. Returns how many accesses were
/// delayed.
pub fn resolve_conflicts(
    design: &mut Design,
    conflicts: &[LoopFlopConflict],
    policy: FixPolicy,
) -> SilicaResult<usize> {
    if conflicts.is_empty() || policy == FixPolicy::None {
        return Ok(0);
    }
    let heads: BTreeSet<CompIdx> =
        conflicts.iter().map(|c| c.head).collect();
    let tails: BTreeSet<CompIdx> =
        conflicts.iter().map(|c| c.tail).collect();
    let delay_heads = match policy {
        FixPolicy::FirstAlways => true,
        FixPolicy::LastAlways => false,
        FixPolicy::Fewest => heads.len() <= tails.len(),
        FixPolicy::Most => heads.len() > tails.len(),
        FixPolicy::None => unreachable!(),
    };
    let chosen = if delay_heads { heads } else { tails };
    let count = chosen.len();
    for access in chosen {
        if delay_heads {
            delay_first(design, access)?;
        } else {
            delay_last(design, access)?;
        }
    }
    Ok(count)
}

/// Keep `access` out of its module's first cycle: make its go wait one
/// cycle past the module's own go.
fn delay_first(design: &mut Design, access: CompIdx) -> SilicaResult<()> {
    let module = design.components[access].owner.ok_or_else(|| {
        Error::internal(format!(
            "delaying access {} outside any module",
            design.describe(access)
        ))
    })?;
    let module_go = design.inbuf_done_bus(module)?;
    let go_port = design.components[access].go_port();
    let entry = match design.components[access].entries.first() {
        Some(&e) => e,
        None => design.add_entry(access),
    };
    design.entries[entry]
        .add_dependency(go_port, Dependency::resource(module_go, 1));
    Ok(())
}

/// Keep `access` out of its module's last cycle: hold the module's done
/// until a cycle after the access completes.
fn delay_last(design: &mut Design, access: CompIdx) -> SilicaResult<()> {
    let module = design.components[access].owner.ok_or_else(|| {
        Error::internal(format!(
            "delaying access {} outside any module",
            design.describe(access)
        ))
    })?;
    let data = design.components[module].module_data().ok_or_else(|| {
        Error::internal(format!(
            "{} is not a module",
            design.describe(module)
        ))
    })?;
    let outbuf = data.outbuf;
    let access_done = design.done_bus(access).ok_or_else(|| {
        Error::internal(format!(
            "access {} has no done bus",
            design.describe(access)
        ))
    })?;
    let go_port = design.components[outbuf].go_port();
    let entry = match design.components[outbuf].entries.first() {
        Some(&e) => e,
        None => design.add_entry(outbuf),
    };
    design.entries[entry]
        .add_dependency(go_port, Dependency::resource(access_done, 1));
    Ok(())
}

struct Analysis<'a> {
    design: &'a Design,
    tracker: &'a LatencyTracker,
    fail_fast: bool,
    tuples: HashMap<Resource, Vec<FeedbackTuple>>,
    conflicts: Vec<LoopFlopConflict>,
}

impl<'a> Analysis<'a> {
    fn new(
        design: &'a Design,
        tracker: &'a LatencyTracker,
        fail_fast: bool,
    ) -> Self {
        Analysis {
            design,
            tracker,
            fail_fast,
            tuples: HashMap::new(),
            conflicts: Vec::new(),
        }
    }

    fn run(
        &mut self,
        body: CompIdx,
    ) -> SilicaResult<ControlFlow<Stop>> {
        let mut path = vec![body];
        self.visit_module(body, Latency::ZERO, &mut path)
    }

    /// Walk the children of `module`. `at` is the latency of the module's
    /// go in the body's frame; `path` is the module chain from the body
    /// down to here.
    fn visit_module(
        &mut self,
        module: CompIdx,
        at: Latency,
        path: &mut Vec<CompIdx>,
    ) -> SilicaResult<ControlFlow<Stop>> {
        let Some(data) = self.design.components[module].module_data()
        else {
            return Err(Error::internal(format!(
                "feedback walk entered non-module {}",
                self.design.describe(module)
            )));
        };
        for &comp in &data.components {
            if comp == data.inbuf
                || comp == data.outbuf
                || self.design.components[comp].retired
            {
                continue;
            }
            let flow = self.visit(comp, at, path)?;
            if flow.is_break() {
                return Ok(flow);
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    fn visit(
        &mut self,
        comp: CompIdx,
        at: Latency,
        path: &mut Vec<CompIdx>,
    ) -> SilicaResult<ControlFlow<Stop>> {
        let resource = match &self.design.components[comp].kind {
            ComponentKind::MemRead { mem }
            | ComponentKind::MemWrite { mem } => {
                Some(Resource::Memory(*mem))
            }
            ComponentKind::FifoRead { fifo }
            | ComponentKind::FifoWrite { fifo } => {
                Some(Resource::Fifo(*fifo))
            }
            ComponentKind::PinRead { pin }
            | ComponentKind::PinWrite { pin } => Some(Resource::Pin(*pin)),
            // Register reads and writes are left out of the conflict
            // math: a write commits in exactly one cycle, so a first/last
            // overlap through a register cannot happen. The one-cycle
            // assumption is verified rather than trusted.
            ComponentKind::RegRead { .. } => None,
            ComponentKind::RegWrite { .. } => {
                let exit = self.design.done_exit(comp).ok_or_else(|| {
                    Error::internal(format!(
                        "register write {} has no done exit",
                        self.design.describe(comp)
                    ))
                })?;
                if self.design.exits[exit].latency != Latency::ONE {
                    return Err(Error::internal(format!(
                        "register write {} does not commit in one cycle",
                        self.design.describe(comp)
                    )));
                }
                None
            }
            // A nested loop holds iteration state of its own, observed as
            // a unit from out here.
            ComponentKind::Loop { .. } => Some(Resource::Loop(comp)),
            _ => None,
        };

        if let Some(resource) = resource {
            let flow = self.mark(resource, comp, at, path)?;
            if flow.is_break() {
                return Ok(flow);
            }
        }

        if self.design.components[comp].is_module() {
            let Some(go) = self.tracker.latency_of_comp(comp) else {
                return Ok(ControlFlow::Break(Stop::NotAnalyzable(
                    format!(
                        "{} has no scheduled go",
                        self.design.describe(comp)
                    ),
                )));
            };
            path.push(comp);
            let flow = self.visit_module(comp, at.add(&go), path)?;
            path.pop();
            if flow.is_break() {
                return Ok(flow);
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    fn mark(
        &mut self,
        resource: Resource,
        access: CompIdx,
        at: Latency,
        path: &[CompIdx],
    ) -> SilicaResult<ControlFlow<Stop>> {
        let Some(go) = self.tracker.latency_of_comp(access) else {
            return Ok(ControlFlow::Break(Stop::NotAnalyzable(format!(
                "{} has no scheduled go",
                self.design.describe(access)
            ))));
        };
        let Some(done) = self
            .design
            .done_exit(access)
            .and_then(|e| self.tracker.exit_control(e))
            .and_then(|cb| self.tracker.latency_of_control(cb))
        else {
            return Ok(ControlFlow::Break(Stop::NotAnalyzable(format!(
                "{} has no scheduled completion",
                self.design.describe(access)
            ))));
        };

        let is_first = at.add(&go).min_clocks() == 0;
        let is_last = match self.provably_not_last(done, path)? {
            Ok(not_last) => !not_last,
            Err(stop) => return Ok(ControlFlow::Break(stop)),
        };

        let tuple = FeedbackTuple {
            resource,
            access,
            is_first,
            is_last,
        };
        if tuple.is_first && tuple.is_last {
            self.conflicts.push(LoopFlopConflict {
                resource,
                head: access,
                tail: access,
            });
        }
        if let Some(peers) = self.tuples.get(&resource) {
            for peer in peers {
                if tuple.is_first && peer.is_last {
                    self.conflicts.push(LoopFlopConflict {
                        resource,
                        head: access,
                        tail: peer.access,
                    });
                }
                if tuple.is_last && peer.is_first {
                    self.conflicts.push(LoopFlopConflict {
                        resource,
                        head: peer.access,
                        tail: access,
                    });
                }
            }
        }
        self.tuples.entry(resource).or_default().push(tuple);
        if self.fail_fast && !self.conflicts.is_empty() {
            return Ok(ControlFlow::Break(Stop::Conflict));
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Try to prove the access cannot fall in the body's last cycle: at
    /// some enclosing level, everything after it provably takes longer.
    /// The proof works level by level because each latency is only
    /// meaningful in its own module's frame.
    fn provably_not_last(
        &self,
        done: Latency,
        path: &[CompIdx],
    ) -> SilicaResult<Result<bool, Stop>> {
        let mut completion = done;
        for &owner in path.iter().rev() {
            let data = self.design.components[owner]
                .module_data()
                .ok_or_else(|| {
                    Error::internal(format!(
                        "feedback path through non-module {}",
                        self.design.describe(owner)
                    ))
                })?;
            let Some(finish) = self.tracker.latency_of_comp(data.outbuf)
            else {
                return Ok(Err(Stop::NotAnalyzable(format!(
                    "{} has no scheduled completion",
                    self.design.describe(owner)
                ))));
            };
            if finish.definitely_gt(&completion) {
                return Ok(Ok(true));
            }
            // Climb a level: the owner's own completion, in its parent's
            // frame.
            completion = match self
                .design
                .done_bus(owner)
                .and_then(|b| self.tracker.latency_of_bus(self.design, b))
            {
                Some(lat) => lat,
                None => {
                    // The body itself has no outer frame; the walk is
                    // done.
                    break;
                }
            };
        }
        Ok(Ok(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silica_ir::{Builder, Design, MemIdx, Memory, Register};

    fn memory(design: &mut Design) -> MemIdx {
        design.memories.push(Memory {
            name: "mem".into(),
            depth: 16,
            width: 8,
            accesses: Vec::new(),
            implementation: None,
            dual_port: false,
            referee: None,
            live: true,
            reads: 0,
            writes: 0,
        })
    }

    /// A one-cycle body whose only access starts at cycle zero and whose
    /// work ends with the body: the access sits in both the first and the
    /// last cycle of an iteration.
    #[test]
    fn first_and_last_cycle_access_keeps_its_flop() {
        let mut design = Design::new();
        let mem = memory(&mut design);
        let mut builder = Builder::new(&mut design);
        let body = builder.add_block("body", 0, 0);
        let access = builder.add_component(
            "rd",
            ComponentKind::MemRead { mem },
            1,
            1,
        );
        builder.design.add_to_module(access, body);

        let mut tracker = LatencyTracker::new();
        let go = design.inbuf_done_bus(body).unwrap();
        tracker.define_control(&design, go, Latency::ZERO);
        tracker.set_comp_control(access, go);
        let finish = tracker
            .delay_control(&mut design, go, body, 1)
            .unwrap();
        let exit = design.done_exit(access).unwrap();
        tracker.set_exit_control(exit, finish);
        let outbuf =
            design.components[body].module_data().unwrap().outbuf;
        tracker.set_comp_control(outbuf, finish);

        assert!(!flop_removable(&design, &tracker, body).unwrap());
        let conflicts = find_conflicts(&design, &tracker, body).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].head, access);
        assert_eq!(conflicts[0].tail, access);
    }

    /// A body that can finish in the cycle it starts must keep its flop
    /// even with no resource access anywhere: removing it would close a
    /// combinational feedback path.
    #[test]
    fn combinational_bodies_always_keep_the_flop() {
        let mut design = Design::new();
        let mut builder = Builder::new(&mut design);
        let body = builder.add_block("body", 0, 0);

        let mut tracker = LatencyTracker::new();
        let go = design.inbuf_done_bus(body).unwrap();
        tracker.define_control(&design, go, Latency::ZERO);
        let outbuf =
            design.components[body].module_data().unwrap().outbuf;
        tracker.set_comp_control(outbuf, go);

        assert!(!flop_removable(&design, &tracker, body).unwrap());
        assert!(find_conflicts(&design, &tracker, body)
            .unwrap()
            .is_empty());
    }

    /// A shared-register read in both boundary cycles does not block flop
    /// removal; only the one-cycle write invariant is enforced.
    #[test]
    fn register_accesses_never_conflict() {
        let mut design = Design::new();
        let reg = design.registers.push(Register {
            name: "acc".into(),
            width: 8,
            accesses: Vec::new(),
            referee: None,
            reads: 0,
            writes: 0,
        });
        let mut builder = Builder::new(&mut design);
        let body = builder.add_block("body", 0, 0);
        let access = builder.add_component(
            "rrd",
            ComponentKind::RegRead { reg },
            0,
            1,
        );
        builder.design.add_to_module(access, body);

        let mut tracker = LatencyTracker::new();
        let go = design.inbuf_done_bus(body).unwrap();
        tracker.define_control(&design, go, Latency::ZERO);
        tracker.set_comp_control(access, go);
        let finish = tracker
            .delay_control(&mut design, go, body, 1)
            .unwrap();
        let exit = design.done_exit(access).unwrap();
        tracker.set_exit_control(exit, finish);
        let outbuf =
            design.components[body].module_data().unwrap().outbuf;
        tracker.set_comp_control(outbuf, finish);

        assert!(flop_removable(&design, &tracker, body).unwrap());
        assert!(find_conflicts(&design, &tracker, body)
            .unwrap()
            .is_empty());
    }

    /// An access strictly in the middle of the iteration is neither first
    /// nor last, so it never blocks removal.
    #[test]
    fn middle_cycle_access_is_removable() {
        let mut design = Design::new();
        let mem = memory(&mut design);
        let mut builder = Builder::new(&mut design);
        let body = builder.add_block("body", 0, 0);
        let access = builder.add_component(
            "rd",
            ComponentKind::MemRead { mem },
            1,
            1,
        );
        builder.design.add_to_module(access, body);

        let mut tracker = LatencyTracker::new();
        let go = design.inbuf_done_bus(body).unwrap();
        tracker.define_control(&design, go, Latency::ZERO);
        let mid = tracker
            .delay_control(&mut design, go, body, 1)
            .unwrap();
        tracker.set_comp_control(access, mid);
        let exit = design.done_exit(access).unwrap();
        tracker.set_exit_control(exit, mid);
        let finish = tracker
            .delay_control(&mut design, go, body, 3)
            .unwrap();
        let outbuf =
            design.components[body].module_data().unwrap().outbuf;
        tracker.set_comp_control(outbuf, finish);

        assert!(flop_removable(&design, &tracker, body).unwrap());
        assert!(find_conflicts(&design, &tracker, body)
            .unwrap()
            .is_empty());
    }

    /// The body provably keeps working for two cycles after the access
    /// completes, so the access is first-cycle only and the flop can go.
    #[test]
    fn trailing_work_disproves_last_cycle() {
        let mut design = Design::new();
        let mem = memory(&mut design);
        let mut builder = Builder::new(&mut design);
        let body = builder.add_block("body", 0, 0);
        let access = builder.add_component(
            "rd",
            ComponentKind::MemRead { mem },
            1,
            1,
        );
        builder.design.add_to_module(access, body);

        let mut tracker = LatencyTracker::new();
        let go = design.inbuf_done_bus(body).unwrap();
        tracker.define_control(&design, go, Latency::ZERO);
        tracker.set_comp_control(access, go);
        let exit = design.done_exit(access).unwrap();
        tracker.set_exit_control(exit, go);
        let finish = tracker
            .delay_control(&mut design, go, body, 2)
            .unwrap();
        let outbuf =
            design.components[body].module_data().unwrap().outbuf;
        tracker.set_comp_control(outbuf, finish);

        assert!(flop_removable(&design, &tracker, body).unwrap());
        assert!(find_conflicts(&design, &tracker, body)
            .unwrap()
            .is_empty());
    }

    /// An unscheduled access makes the body unanalyzable, which keeps the
    /// flop rather than failing.
    #[test]
    fn unanalyzable_bodies_keep_the_flop() {
        let mut design = Design::new();
        let mem = memory(&mut design);
        let mut builder = Builder::new(&mut design);
        let body = builder.add_block("body", 0, 0);
        let access = builder.add_component(
            "rd",
            ComponentKind::MemRead { mem },
            1,
            1,
        );
        builder.design.add_to_module(access, body);

        let tracker = LatencyTracker::new();
        assert!(!flop_removable(&design, &tracker, body).unwrap());
    }
}
