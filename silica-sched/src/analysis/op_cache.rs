//! Structural caching of the small components scheduling inserts.
//!
//! Scheduling asks for the same gate over the same buses many times: every
//! consumer of a merged control wants the same OR, every delayed control
//! re-derives the same register chain. The cache keys each component kind
//! on the identity of its input buses so structurally identical requests
//! share hardware. Insertion-ordered maps keep iteration and naming
//! deterministic across runs.
use itertools::Itertools;
use linked_hash_map::LinkedHashMap;

use silica_ir::{
    Builder, BusIdx, BusValue, CompIdx, ComponentKind, Design, RegMode,
};
use silica_utils::{Error, SilicaResult};

/// Cache of scheduling-inserted primitives, keyed on input bus identity.
#[derive(Default)]
pub struct OpCache {
    /// Gates are commutative, so their keys are sorted.
    ands: LinkedHashMap<Vec<BusIdx>, CompIdx>,
    ors: LinkedHashMap<Vec<BusIdx>, CompIdx>,
    scoreboards: LinkedHashMap<Vec<BusIdx>, CompIdx>,
    /// A mux is identified by its full ordered (select, data) pair list.
    /// Two muxes over the same buses in different pairings are different
    /// hardware.
    muxes: LinkedHashMap<Vec<(BusIdx, BusIdx)>, CompIdx>,
    /// Registers are keyed by their data bus and done flavor: a control
    /// delay and a data delay over the same bus are different hardware.
    /// The mode must agree on every request.
    regs: LinkedHashMap<(BusIdx, bool), (CompIdx, RegMode)>,
    enable_regs: LinkedHashMap<(BusIdx, BusIdx), CompIdx>,
    latches: LinkedHashMap<(BusIdx, BusIdx), CompIdx>,
}

impl OpCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// An AND over `buses`, order-insensitive.
    pub fn and(
        &mut self,
        design: &mut Design,
        buses: &[BusIdx],
        module: CompIdx,
    ) -> CompIdx {
        let key = sorted(buses);
        if let Some(&comp) = self.ands.get(&key) {
            return comp;
        }
        let comp =
            build_gate(design, "and", ComponentKind::And, &key, module);
        self.ands.insert(key, comp);
        comp
    }

    /// An OR over `buses`, order-insensitive.
    pub fn or(
        &mut self,
        design: &mut Design,
        buses: &[BusIdx],
        module: CompIdx,
    ) -> CompIdx {
        let key = sorted(buses);
        if let Some(&comp) = self.ors.get(&key) {
            return comp;
        }
        let comp = build_gate(design, "or", ComponentKind::Or, &key, module);
        self.ors.insert(key, comp);
        comp
    }

    /// A scoreboard merging the registered done signals in `buses`,
    /// order-insensitive.
    pub fn scoreboard(
        &mut self,
        design: &mut Design,
        buses: &[BusIdx],
        module: CompIdx,
    ) -> CompIdx {
        let key = sorted(buses);
        if let Some(&comp) = self.scoreboards.get(&key) {
            return comp;
        }
        let comp = build_gate(
            design,
            "scoreboard",
            ComponentKind::Scoreboard,
            &key,
            module,
        );
        self.scoreboards.insert(key, comp);
        comp
    }

    /// A stallboard over `buses`. Stallboards are never cached: each stall
    /// point owns its state, and sharing one between two waiters would let
    /// one waiter consume the other's completion.
    pub fn stallboard(
        &mut self,
        design: &mut Design,
        buses: &[BusIdx],
        module: CompIdx,
    ) -> CompIdx {
        build_gate(
            design,
            "stallboard",
            ComponentKind::Stallboard,
            buses,
            module,
        )
    }

    /// A mux selecting among `pairs` of (select, data) buses. The key is
    /// the ordered pair list, so pairings are part of the identity.
    pub fn mux(
        &mut self,
        design: &mut Design,
        pairs: &[(BusIdx, BusIdx)],
        module: CompIdx,
    ) -> SilicaResult<CompIdx> {
        if let Some(&comp) = self.muxes.get(&pairs.to_vec()) {
            return Ok(comp);
        }
        let n = pairs.len();
        let mut builder = Builder::new(design);
        let comp =
            builder.add_component("mux", ComponentKind::Mux, 2 * n, 1);
        builder.design.add_to_module(comp, module);
        for (i, &(select, data)) in pairs.iter().enumerate() {
            let sel_port = design.components[comp].data_ports()[i];
            let data_port = design.components[comp].data_ports()[n + i];
            design.connect(sel_port, select);
            design.connect(data_port, data);
        }
        let width = pairs
            .iter()
            .filter_map(|&(_, d)| design.buses[d].value)
            .map(|v| v.width)
            .max();
        let signed = pairs
            .iter()
            .filter_map(|&(_, d)| design.buses[d].value)
            .any(|v| v.signed);
        if let Some(width) = width {
            let result = design.result_bus(comp)?;
            design.buses[result].value = Some(BusValue { width, signed });
        }
        self.muxes.insert(pairs.to_vec(), comp);
        Ok(comp)
    }

    /// A register capturing `data`. Cached on the data bus and done
    /// flavor; a second request for the same key with a different mode is
    /// a contradiction in the caller, not a cache miss.
    pub fn reg(
        &mut self,
        design: &mut Design,
        data: BusIdx,
        mode: RegMode,
        sync_done: bool,
        module: CompIdx,
    ) -> SilicaResult<CompIdx> {
        if let Some(&(comp, cached_mode)) = self.regs.get(&(data, sync_done))
        {
            if cached_mode != mode {
                return Err(Error::internal(format!(
                    "register over {} requested as {:?} but cached as {:?}",
                    design.buses[data].name, mode, cached_mode
                )));
            }
            return Ok(comp);
        }
        let mut builder = Builder::new(design);
        let comp = builder.add_component(
            "reg",
            ComponentKind::Reg { mode, sync_done },
            1,
            1,
        );
        builder.design.add_to_module(comp, module);
        let data_port = design.components[comp].data_ports()[0];
        design.connect(data_port, data);
        copy_value(design, data, comp)?;
        self.regs.insert((data, sync_done), (comp, mode));
        Ok(comp)
    }

    /// A register capturing `data` while `enable` is asserted. The enable
    /// arrives on the go port.
    pub fn enable_reg(
        &mut self,
        design: &mut Design,
        data: BusIdx,
        enable: BusIdx,
        module: CompIdx,
    ) -> SilicaResult<CompIdx> {
        if let Some(&comp) = self.enable_regs.get(&(data, enable)) {
            return Ok(comp);
        }
        let mut builder = Builder::new(design);
        let comp = builder.add_component(
            "ereg",
            ComponentKind::Reg {
                mode: RegMode::Enable,
                sync_done: false,
            },
            1,
            1,
        );
        builder.design.add_to_module(comp, module);
        let data_port = design.components[comp].data_ports()[0];
        design.connect(data_port, data);
        let go = design.components[comp].go_port();
        design.connect(go, enable);
        copy_value(design, data, comp)?;
        self.enable_regs.insert((data, enable), comp);
        Ok(comp)
    }

    /// A latch transparent while `enable` is asserted, holding afterwards.
    pub fn latch(
        &mut self,
        design: &mut Design,
        data: BusIdx,
        enable: BusIdx,
        module: CompIdx,
    ) -> SilicaResult<CompIdx> {
        if let Some(&comp) = self.latches.get(&(data, enable)) {
            return Ok(comp);
        }
        let mut builder = Builder::new(design);
        let comp =
            builder.add_component("latch", ComponentKind::Latch, 1, 1);
        builder.design.add_to_module(comp, module);
        let data_port = design.components[comp].data_ports()[0];
        design.connect(data_port, data);
        let go = design.components[comp].go_port();
        design.connect(go, enable);
        copy_value(design, data, comp)?;
        self.latches.insert((data, enable), comp);
        Ok(comp)
    }
}

fn sorted(buses: &[BusIdx]) -> Vec<BusIdx> {
    buses.iter().copied().sorted_unstable().dedup().collect()
}

/// Build a control-width gate over `buses` and place it in `module`.
fn build_gate(
    design: &mut Design,
    prefix: &str,
    kind: ComponentKind,
    buses: &[BusIdx],
    module: CompIdx,
) -> CompIdx {
    let mut builder = Builder::new(design);
    let comp = builder.add_component(prefix, kind, buses.len(), 1);
    builder.design.add_to_module(comp, module);
    for (i, &bus) in buses.iter().enumerate() {
        let port = design.components[comp].data_ports()[i];
        design.connect(port, bus);
    }
    if let Ok(result) = design.result_bus(comp) {
        design.buses[result].value = Some(BusValue::control());
    }
    comp
}

/// Give a one-input component's result the value of its input bus.
fn copy_value(
    design: &mut Design,
    input: BusIdx,
    comp: CompIdx,
) -> SilicaResult<()> {
    let value = design.buses[input].value;
    let result = design.result_bus(comp)?;
    design.buses[result].value = value;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::OpCache;
    use silica_ir::{Builder, BusIdx, ComponentKind, Design, RegMode};

    fn fixture() -> (Design, silica_ir::CompIdx, Vec<BusIdx>) {
        let mut design = Design::new();
        let mut builder = Builder::new(&mut design);
        let block = builder.add_block("blk", 0, 0);
        let mut buses = Vec::new();
        for _ in 0..3 {
            let c = builder.add_component(
                "const",
                ComponentKind::Constant { value: 1 },
                0,
                1,
            );
            builder.design.add_to_module(c, block);
            buses.push(builder.design.result_bus(c).unwrap());
        }
        (design, block, buses)
    }

    #[test]
    fn gates_are_order_insensitive() {
        let (mut design, block, buses) = fixture();
        let mut cache = OpCache::new();
        let a = cache.and(&mut design, &[buses[0], buses[1]], block);
        let b = cache.and(&mut design, &[buses[1], buses[0]], block);
        assert_eq!(a, b);
        let c = cache.and(&mut design, &[buses[1], buses[2]], block);
        assert_ne!(a, c);
    }

    #[test]
    fn stallboards_are_never_shared() {
        let (mut design, block, buses) = fixture();
        let mut cache = OpCache::new();
        let a = cache.stallboard(&mut design, &buses[..2], block);
        let b = cache.stallboard(&mut design, &buses[..2], block);
        assert_ne!(a, b);
    }

    #[test]
    fn mux_identity_includes_pairing() {
        let (mut design, block, buses) = fixture();
        let mut cache = OpCache::new();
        let ab = [(buses[0], buses[1]), (buses[1], buses[2])];
        let a = cache.mux(&mut design, &ab, block).unwrap();
        let b = cache.mux(&mut design, &ab, block).unwrap();
        assert_eq!(a, b);
        // Same buses, different pairing: different hardware.
        let swapped = [(buses[0], buses[2]), (buses[1], buses[1])];
        let c = cache.mux(&mut design, &swapped, block).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn reg_mode_conflicts_are_fatal() {
        let (mut design, block, buses) = fixture();
        let mut cache = OpCache::new();
        let reg = cache
            .reg(&mut design, buses[0], RegMode::Simple, true, block)
            .unwrap();
        let again = cache
            .reg(&mut design, buses[0], RegMode::Simple, true, block)
            .unwrap();
        assert_eq!(reg, again);
        let err = cache
            .reg(&mut design, buses[0], RegMode::Reset, true, block)
            .unwrap_err();
        assert!(err.is_internal());
    }

    /// A control delay and a data delay over the same bus must not share a
    /// flop: one carries a registered done, the other a plain value.
    #[test]
    fn done_flavors_get_distinct_registers() {
        let (mut design, block, buses) = fixture();
        let mut cache = OpCache::new();
        let ctl = cache
            .reg(&mut design, buses[0], RegMode::Simple, true, block)
            .unwrap();
        let dat = cache
            .reg(&mut design, buses[0], RegMode::Simple, false, block)
            .unwrap();
        assert_ne!(ctl, dat);
        assert!(matches!(
            design.components[dat].kind,
            ComponentKind::Reg {
                sync_done: false,
                ..
            }
        ));
    }
}
