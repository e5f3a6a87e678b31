//! Authoritative timing state for a scheduling run.
//!
//! The tracker records, for every control bus scheduling has reasoned
//! about, the latency from the owning module's go to the cycle that bus
//! asserts. Exits and components are mapped to the control bus that
//! represents their completion, so "when is this value valid" is always
//! answered by two lookups: find the control bus, then its latency.
use std::collections::HashMap;

use silica_ir::{
    BusIdx, CompIdx, ComponentKind, Design, ExitIdx, ExitKind, Latency,
    RegMode,
};
use silica_utils::{Error, SilicaResult};

use crate::analysis::OpCache;

#[derive(Default)]
pub struct LatencyTracker {
    pub cache: OpCache,
    /// Latency of each known control bus, in its module's time frame.
    latencies: HashMap<BusIdx, Latency>,
    /// The control bus that asserts when an exit's buses become valid.
    exit_control: HashMap<ExitIdx, BusIdx>,
    /// The control bus that fires a component: its merged go.
    comp_control: HashMap<CompIdx, BusIdx>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `bus` as a control bus asserting at `latency`, and make it
    /// the control representative of its own exit.
    pub fn define_control(
        &mut self,
        design: &Design,
        bus: BusIdx,
        latency: Latency,
    ) {
        self.latencies.insert(bus, latency);
        self.exit_control.insert(design.buses[bus].owner, bus);
    }

    pub fn set_exit_control(&mut self, exit: ExitIdx, bus: BusIdx) {
        self.exit_control.insert(exit, bus);
    }

    pub fn exit_control(&self, exit: ExitIdx) -> Option<BusIdx> {
        self.exit_control.get(&exit).copied()
    }

    /// The control bus governing when `bus` is valid: the representative
    /// of the exit that owns it.
    pub fn control_of_bus(
        &self,
        design: &Design,
        bus: BusIdx,
    ) -> Option<BusIdx> {
        self.exit_control(design.buses[bus].owner)
    }

    pub fn set_comp_control(&mut self, comp: CompIdx, bus: BusIdx) {
        self.comp_control.insert(comp, bus);
    }

    pub fn comp_control(&self, comp: CompIdx) -> Option<BusIdx> {
        self.comp_control.get(&comp).copied()
    }

    pub fn latency_of_control(&self, bus: BusIdx) -> Option<Latency> {
        self.latencies.get(&bus).copied()
    }

    /// Latency at which `bus` becomes valid, if its producer has been
    /// scheduled.
    pub fn latency_of_bus(
        &self,
        design: &Design,
        bus: BusIdx,
    ) -> Option<Latency> {
        self.control_of_bus(design, bus)
            .and_then(|cb| self.latency_of_control(cb))
    }

    /// Latency at which `comp` fires, if it has been scheduled.
    pub fn latency_of_comp(&self, comp: CompIdx) -> Option<Latency> {
        self.comp_control(comp)
            .and_then(|cb| self.latency_of_control(cb))
    }

    /// Delay `bus` by `clocks` whole cycles through a chain of registered
    /// done stages. Shared prefixes of chains come out of the cache, so
    /// delaying the same bus by 2 and by 3 costs three registers total.
    pub fn delay_control(
        &mut self,
        design: &mut Design,
        bus: BusIdx,
        module: CompIdx,
        clocks: u32,
    ) -> SilicaResult<BusIdx> {
        let mut cur = bus;
        let mut latency =
            self.latency_of_control(cur).ok_or_else(|| {
                Error::internal(format!(
                    "delaying bus {} with no known latency",
                    design.buses[cur].name
                ))
            })?;
        for _ in 0..clocks {
            let reg = self.cache.reg(
                design,
                cur,
                RegMode::Simple,
                true,
                module,
            )?;
            cur = design.result_bus(reg)?;
            latency = latency.add(&Latency::ONE);
            self.define_control(design, cur, latency);
            self.set_comp_control(reg, cur);
        }
        Ok(cur)
    }

    /// Delay a data bus by `clocks` cycles through simple registers.
    pub fn delay_data(
        &mut self,
        design: &mut Design,
        bus: BusIdx,
        module: CompIdx,
        clocks: u32,
    ) -> SilicaResult<BusIdx> {
        let mut cur = bus;
        for _ in 0..clocks {
            let reg = self.cache.reg(
                design,
                cur,
                RegMode::Simple,
                false,
                module,
            )?;
            cur = design.result_bus(reg)?;
        }
        Ok(cur)
    }

    /// Make `data` hold the value it carries at its own valid time until
    /// the consumer fires at `control`.
    ///
    /// When the consumer provably fires after the data is valid, an
    /// enabled register captures the value at its valid cycle. When the
    /// two are simultaneous the bus is returned unchanged. Anything the
    /// latencies cannot prove falls back to a transparent latch, which is
    /// correct for every ordering at the cost of a combinational path.
    pub fn sync_data_to_control(
        &mut self,
        design: &mut Design,
        data: BusIdx,
        control: BusIdx,
        module: CompIdx,
    ) -> SilicaResult<BusIdx> {
        let data_control =
            match self.control_of_bus(design, data) {
                Some(cb) => cb,
                // Data from an unscheduled producer (a constant's value,
                // a module input): always valid, nothing to hold.
                None => return Ok(data),
            };
        let data_latency =
            self.latency_of_control(data_control).ok_or_else(|| {
                Error::internal(format!(
                    "control bus {} has no latency",
                    design.buses[data_control].name
                ))
            })?;
        let go_latency =
            self.latency_of_control(control).ok_or_else(|| {
                Error::internal(format!(
                    "control bus {} has no latency",
                    design.buses[control].name
                ))
            })?;

        if go_latency == data_latency && go_latency.is_fixed() {
            return Ok(data);
        }
        if go_latency.definitely_gt(&data_latency) {
            let reg =
                self.cache.enable_reg(design, data, data_control, module)?;
            return design.result_bus(reg);
        }
        if !data_latency.definitely_ge(&go_latency) {
            // The orderings are incomparable; latching is the pessimistic
            // answer that works for all of them.
            log::warn!(
                "cannot order data valid at {data_latency} against go at \
                 {go_latency}; latching {}",
                design.buses[data].name
            );
        }
        let latch = self.cache.latch(design, data, data_control, module)?;
        design.result_bus(latch)
    }

    /// After `comp`'s entries are merged, derive the control state of its
    /// exits from its merged go and its intrinsic exit latencies.
    pub fn update_exit_states(
        &mut self,
        design: &mut Design,
        comp: CompIdx,
    ) -> SilicaResult<()> {
        let go_control = self.comp_control(comp).ok_or_else(|| {
            Error::internal(format!(
                "updating exits of unscheduled component {}",
                design.describe(comp)
            ))
        })?;
        let go_latency =
            self.latency_of_control(go_control).ok_or_else(|| {
                Error::internal(format!(
                    "control bus {} has no latency",
                    design.buses[go_control].name
                ))
            })?;

        let module = design.components[comp].owner;
        let exits: Vec<ExitIdx> = design.components[comp]
            .exits
            .iter()
            .copied()
            .filter(|&e| design.exits[e].kind == ExitKind::Done)
            .collect();
        for exit in exits {
            let intrinsic = design.exits[exit].latency;
            let total = go_latency.add(&intrinsic);
            if has_registered_done(&design.components[comp].kind) {
                // The component asserts its own done bus.
                let done = design.exits[exit].done_bus;
                self.define_control(design, done, total);
            } else if intrinsic == Latency::ZERO {
                // Combinational: completion is firing.
                self.set_exit_control(exit, go_control);
            } else if let Some(max) = intrinsic.max_clocks() {
                if max != intrinsic.min_clocks() {
                    return Err(Error::internal(format!(
                        "{} takes {intrinsic} cycles but asserts no done",
                        design.describe(comp)
                    )));
                }
                // Fixed latency, no done of its own: derive one by
                // delaying the go.
                let module = module.ok_or_else(|| {
                    Error::internal(format!(
                        "cannot delay control outside a module for {}",
                        design.describe(comp)
                    ))
                })?;
                let delayed =
                    self.delay_control(design, go_control, module, max)?;
                self.set_exit_control(exit, delayed);
            } else {
                return Err(Error::internal(format!(
                    "{} has open latency but asserts no done",
                    design.describe(comp)
                )));
            }
        }
        Ok(())
    }
}

/// True when the component drives a real done bus of its own rather than
/// completing implicitly with its inputs.
fn has_registered_done(kind: &ComponentKind) -> bool {
    match kind {
        ComponentKind::Reg { sync_done, .. } => *sync_done,
        ComponentKind::Scoreboard
        | ComponentKind::Stallboard
        | ComponentKind::MemWrite { .. }
        | ComponentKind::FifoRead { .. }
        | ComponentKind::FifoWrite { .. }
        | ComponentKind::RegWrite { .. }
        | ComponentKind::Block(_)
        | ComponentKind::Decision(_)
        | ComponentKind::Branch { .. }
        | ComponentKind::Loop { .. }
        | ComponentKind::LoopBody { .. } => true,
        // Everything else, memory reads included, completes implicitly; a
        // fixed nonzero latency gets a derived done from a control chain.
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::LatencyTracker;
    use silica_ir::{Builder, ComponentKind, Design, Latency};

    #[test]
    fn delay_chains_share_prefixes() {
        let mut design = Design::new();
        let mut builder = Builder::new(&mut design);
        let block = builder.add_block("blk", 0, 0);
        let root = builder.design.inbuf_done_bus(block).unwrap();

        let mut tracker = LatencyTracker::new();
        tracker.define_control(&design, root, Latency::ZERO);
        let before = design.components.len();
        let two = tracker
            .delay_control(&mut design, root, block, 2)
            .unwrap();
        let three = tracker
            .delay_control(&mut design, root, block, 3)
            .unwrap();
        assert_ne!(two, three);
        // Three registers total: the two-stage chain is a prefix.
        assert_eq!(design.components.len() - before, 3);
        assert_eq!(
            tracker.latency_of_control(three).unwrap(),
            Latency::fixed(3)
        );
    }

    #[test]
    fn combinational_exits_reuse_the_go_control() {
        let mut design = Design::new();
        let mut builder = Builder::new(&mut design);
        let block = builder.add_block("blk", 0, 0);
        let and = builder.add_component("and", ComponentKind::And, 2, 1);
        builder.design.add_to_module(and, block);
        let root = design.inbuf_done_bus(block).unwrap();

        let mut tracker = LatencyTracker::new();
        tracker.define_control(&design, root, Latency::ZERO);
        tracker.set_comp_control(and, root);
        tracker.update_exit_states(&mut design, and).unwrap();

        let exit = design.done_exit(and).unwrap();
        assert_eq!(tracker.exit_control(exit), Some(root));
        let result = design.result_bus(and).unwrap();
        assert_eq!(
            tracker.latency_of_bus(&design, result),
            Some(Latency::ZERO)
        );
    }

    #[test]
    fn fixed_latency_without_done_grows_a_control_chain() {
        let mut design = Design::new();
        let mut builder = Builder::new(&mut design);
        let block = builder.add_block("blk", 0, 0);
        let mul = builder.add_component(
            "mul",
            ComponentKind::Op(silica_ir::OpKind::Mul),
            2,
            1,
        );
        builder.design.add_to_module(mul, block);
        builder.set_exit_latency(mul, Latency::fixed(2));
        let root = design.inbuf_done_bus(block).unwrap();

        let mut tracker = LatencyTracker::new();
        tracker.define_control(&design, root, Latency::ZERO);
        tracker.set_comp_control(mul, root);
        tracker.update_exit_states(&mut design, mul).unwrap();

        let exit = design.done_exit(mul).unwrap();
        let control = tracker.exit_control(exit).unwrap();
        assert_eq!(
            tracker.latency_of_control(control),
            Some(Latency::fixed(2))
        );
    }

    #[test]
    fn open_latency_without_done_is_an_internal_error() {
        let mut design = Design::new();
        let mut builder = Builder::new(&mut design);
        let block = builder.add_block("blk", 0, 0);
        let op = builder.add_component(
            "op",
            ComponentKind::Op(silica_ir::OpKind::Add),
            2,
            1,
        );
        builder.design.add_to_module(op, block);
        builder.set_exit_latency(op, Latency::open(1));
        let root = design.inbuf_done_bus(block).unwrap();

        let mut tracker = LatencyTracker::new();
        tracker.define_control(&design, root, Latency::ZERO);
        tracker.set_comp_control(op, root);
        let err = tracker.update_exit_states(&mut design, op).unwrap_err();
        assert!(err.is_internal());
    }
}
