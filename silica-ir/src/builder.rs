//! Construction helpers for assembling designs. The front end and the
//! scheduler both build structure through this interface so that every
//! component carries the same port and exit skeleton.
use smallvec::{smallvec, SmallVec};

use silica_utils::Id;

use crate::idx::{BusIdx, CompIdx, EntryIdx, ExitIdx, PortIdx};
use crate::structure::{
    Bus, Dependency, Exit, ExitKind, Port, PortKind,
};
use crate::{Component, ComponentKind, Design, Latency, RegMode};

/// Builder over a design. Holds no state of its own; it exists to keep the
/// invariant-heavy construction code in one place.
pub struct Builder<'a> {
    pub design: &'a mut Design,
}

impl<'a> Builder<'a> {
    pub fn new(design: &'a mut Design) -> Self {
        Builder { design }
    }

    /// Create a component with the standard skeleton: go, clock, and reset
    /// ports, `n_data` data ports, and one main exit carrying a done bus
    /// and `n_results` data buses. The name is uniquified from `prefix`.
    ///
    /// The component starts outside any module; place it with
    /// [`Design::add_to_module`] or register it as a task.
    pub fn add_component(
        &mut self,
        prefix: impl Into<Id>,
        kind: ComponentKind,
        n_data: usize,
        n_results: usize,
    ) -> CompIdx {
        let name = self.design.namegen.gen_name(prefix);
        let comp = self.design.components.peek_next_idx();

        let mut ports: SmallVec<[PortIdx; 4]> = smallvec![];
        for (kind, pname) in [
            (PortKind::Go, "go"),
            (PortKind::Clock, "clk"),
            (PortKind::Reset, "reset"),
        ] {
            ports.push(self.design.ports.push(Port {
                name: Id::from(pname),
                kind,
                owner: comp,
                driver: None,
                used: false,
                value: None,
            }));
        }
        for i in 0..n_data {
            ports.push(self.design.ports.push(Port {
                name: Id::from(format!("in{i}")),
                kind: PortKind::Data,
                owner: comp,
                driver: None,
                used: false,
                value: None,
            }));
        }

        let exit = self.push_exit(comp, ExitKind::Done, n_results);
        self.design.exits[exit].latency = default_latency(&kind);

        let consumes_go = default_consumes_go(&kind);
        let pushed = self.design.components.push(Component {
            name,
            kind,
            owner: None,
            ports,
            exits: smallvec![exit],
            entries: Vec::new(),
            consumes_go,
            iob: false,
            retired: false,
        });
        debug_assert_eq!(pushed, comp);
        comp
    }

    /// Add a sideband exit carrying one data bus to an existing component.
    pub fn add_sideband_exit(&mut self, comp: CompIdx) -> ExitIdx {
        let exit = self.push_exit(comp, ExitKind::Sideband, 1);
        self.design.components[comp].exits.push(exit);
        exit
    }

    fn push_exit(
        &mut self,
        comp: CompIdx,
        kind: ExitKind,
        n_data: usize,
    ) -> ExitIdx {
        let exit = self.design.exits.peek_next_idx();
        let done_bus = self.design.buses.push(Bus {
            name: Id::from("done"),
            owner: exit,
            value: None,
            used: false,
        });
        let mut data_buses: SmallVec<[BusIdx; 2]> = smallvec![];
        for i in 0..n_data {
            data_buses.push(self.design.buses.push(Bus {
                name: Id::from(format!("out{i}")),
                owner: exit,
                value: None,
                used: false,
            }));
        }
        let pushed = self.design.exits.push(Exit {
            owner: comp,
            kind,
            done_bus,
            data_buses,
            latency: Latency::ZERO,
        });
        debug_assert_eq!(pushed, exit);
        exit
    }

    /// Create a module of the kind produced by `make_kind`, complete with
    /// its boundary buffers. The input buffer's data buses image the
    /// module's `n_data` ports into the interior; the output buffer's data
    /// ports receive the values for the module's `n_results` result buses.
    pub fn add_module(
        &mut self,
        prefix: impl Into<Id>,
        n_data: usize,
        n_results: usize,
        make_kind: impl FnOnce(crate::ModuleData) -> ComponentKind,
    ) -> CompIdx {
        let inbuf =
            self.add_component("inbuf", ComponentKind::InBuf, 0, n_data);
        let outbuf =
            self.add_component("outbuf", ComponentKind::OutBuf, n_results, 0);
        let data = crate::ModuleData {
            components: vec![inbuf, outbuf],
            inbuf,
            outbuf,
        };
        let module =
            self.add_component(prefix, make_kind(data), n_data, n_results);
        self.design.components[inbuf].owner = Some(module);
        self.design.components[outbuf].owner = Some(module);
        module
    }

    /// A straight-line block module.
    pub fn add_block(
        &mut self,
        prefix: impl Into<Id>,
        n_data: usize,
        n_results: usize,
    ) -> CompIdx {
        self.add_module(prefix, n_data, n_results, ComponentKind::Block)
    }

    /// A two-way conditional with freshly built decision and arm modules.
    pub fn add_branch(
        &mut self,
        prefix: impl Into<Id>,
        n_data: usize,
        n_results: usize,
    ) -> CompIdx {
        let decision =
            self.add_module("decision", n_data, 1, ComponentKind::Decision);
        let true_arm = self.add_block("true_arm", n_data, n_results);
        let false_arm = self.add_block("false_arm", n_data, n_results);
        let branch =
            self.add_module(prefix, n_data, n_results, |data| {
                ComponentKind::Branch {
                    data,
                    decision,
                    true_arm,
                    false_arm,
                }
            });
        for child in [decision, true_arm, false_arm] {
            self.design.add_to_module(child, branch);
        }
        branch
    }

    /// A loop around a freshly built body module. The body gets two
    /// entries: the initial arrival from the loop's entry and a feedback
    /// entry for subsequent iterations.
    pub fn add_loop(
        &mut self,
        prefix: impl Into<Id>,
        n_data: usize,
        n_results: usize,
    ) -> CompIdx {
        let body = self.add_module("body", n_data, n_results, |data| {
            ComponentKind::LoopBody {
                data,
                flop_needed: true,
            }
        });
        let lp = self.add_module(prefix, n_data, n_results, |data| {
            ComponentKind::Loop { data, body }
        });
        self.design.add_to_module(body, lp);

        let body_go = self.design.components[body].go_port();
        let initial = self.design.add_entry(body);
        if let Ok(go_bus) = self.design.inbuf_done_bus(lp) {
            self.design.entries[initial]
                .add_dependency(body_go, Dependency::control(go_bus));
        }
        let feedback = self.design.add_entry(body);
        self.design.entries[feedback].feedback = true;
        if let Some(done) = self.design.done_bus(body) {
            self.design.entries[feedback]
                .add_dependency(body_go, Dependency::resource(done, 1));
        }
        lp
    }

    /// Register `module` as a top-level task.
    pub fn add_task(&mut self, module: CompIdx) {
        self.design.tasks.push(module);
    }

    /// Shorthand for pushing a dependency onto an entry.
    pub fn add_dependency(
        &mut self,
        entry: EntryIdx,
        port: PortIdx,
        dep: Dependency,
    ) {
        self.design.entries[entry].add_dependency(port, dep);
    }

    /// Override the latency of the main exit, for components whose timing
    /// is configured after construction.
    pub fn set_exit_latency(&mut self, comp: CompIdx, latency: Latency) {
        if let Some(exit) = self.design.done_exit(comp) {
            self.design.exits[exit].latency = latency;
        }
    }
}

/// The intrinsic latency of a freshly built component of `kind`. Module
/// latencies are placeholders until scheduling computes them.
fn default_latency(kind: &ComponentKind) -> Latency {
    match kind {
        ComponentKind::Reg { .. }
        | ComponentKind::ShiftReg { .. }
        | ComponentKind::RegWrite { .. }
        | ComponentKind::MemWrite { .. } => Latency::ONE,
        ComponentKind::FifoRead { .. } | ComponentKind::FifoWrite { .. } => {
            Latency::open(1)
        }
        ComponentKind::Loop { .. } | ComponentKind::LoopBody { .. } => {
            Latency::open(0)
        }
        _ => Latency::ZERO,
    }
}

fn default_consumes_go(kind: &ComponentKind) -> bool {
    match kind {
        ComponentKind::InBuf
        | ComponentKind::OutBuf
        | ComponentKind::Constant { .. }
        | ComponentKind::And
        | ComponentKind::Or
        | ComponentKind::Mux
        | ComponentKind::ShiftReg { .. }
        | ComponentKind::Op(_) => false,
        ComponentKind::Reg { mode, .. } => *mode == RegMode::Enable,
        ComponentKind::Latch
        | ComponentKind::Scoreboard
        | ComponentKind::Stallboard
        | ComponentKind::MemRead { .. }
        | ComponentKind::MemWrite { .. }
        | ComponentKind::FifoRead { .. }
        | ComponentKind::FifoWrite { .. }
        | ComponentKind::PinRead { .. }
        | ComponentKind::PinWrite { .. }
        | ComponentKind::RegRead { .. }
        | ComponentKind::RegWrite { .. }
        | ComponentKind::Referee
        | ComponentKind::Block(_)
        | ComponentKind::Decision(_)
        | ComponentKind::Branch { .. }
        | ComponentKind::Loop { .. }
        | ComponentKind::LoopBody { .. } => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PortKind;

    #[test]
    fn component_skeleton() {
        let mut design = Design::new();
        let mut builder = Builder::new(&mut design);
        let and = builder.add_component("and", ComponentKind::And, 2, 1);
        let comp = &design.components[and];
        assert_eq!(comp.data_ports().len(), 2);
        assert_eq!(design.ports[comp.go_port()].kind, PortKind::Go);
        assert!(!comp.consumes_go);
        let result = design.result_bus(and).unwrap();
        assert_eq!(design.bus_owner(result), and);
        assert_eq!(
            design.exits[design.done_exit(and).unwrap()].latency,
            Latency::ZERO
        );
    }

    #[test]
    fn module_buffers_are_owned_children() {
        let mut design = Design::new();
        let mut builder = Builder::new(&mut design);
        let block = builder.add_block("blk", 1, 1);
        let reg = builder.add_component(
            "reg",
            ComponentKind::Reg {
                mode: RegMode::Enable,
                sync_done: false,
            },
            1,
            1,
        );
        let data = design.components[block].module_data().unwrap().clone();
        assert_eq!(design.components[data.inbuf].owner, Some(block));
        assert_eq!(design.components[data.outbuf].owner, Some(block));
        // New children land between the buffers.
        design.add_to_module(reg, block);
        let order =
            &design.components[block].module_data().unwrap().components;
        assert_eq!(order, &vec![data.inbuf, reg, data.outbuf]);
        assert_eq!(
            design.inbuf_done_bus(block).unwrap(),
            design.done_bus(data.inbuf).unwrap()
        );
    }
}
