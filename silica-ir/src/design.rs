//! The design: arenas for every node kind plus the global resources shared
//! between tasks.
use itertools::Itertools;
use silica_idx::IndexedMap;
use silica_utils::{Error, Id, NameGenerator, SilicaResult};

use crate::idx::{
    BusIdx, CompIdx, EntryIdx, ExitIdx, FifoIdx, MemIdx, PinIdx, PortIdx,
    RegIdx,
};
use crate::structure::{Bus, Entry, Exit, ExitKind, Port};
use crate::Component;

/// Memory implementation technologies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemImpl {
    /// Distributed RAM built from LUTs. Cheap for shallow memories,
    /// combinational read.
    LutRam,
    /// Dedicated block RAM. Registered read.
    BlockRam,
}

/// An addressable memory shared across the design.
#[derive(Clone, Debug)]
pub struct Memory {
    pub name: Id,
    pub depth: u32,
    pub width: u32,
    /// All read and write access components, rebuilt by access resolution.
    pub accesses: Vec<CompIdx>,
    pub implementation: Option<MemImpl>,
    pub dual_port: bool,
    /// The arbitration component, once built.
    pub referee: Option<CompIdx>,
    /// Cleared when pruning finds no accesses.
    pub live: bool,
    pub reads: u32,
    pub writes: u32,
}

/// A streaming interface. Reads and writes have open latency.
#[derive(Clone, Debug)]
pub struct Fifo {
    pub name: Id,
    pub accesses: Vec<CompIdx>,
    pub reads: u32,
    pub writes: u32,
}

/// A top-level pin.
#[derive(Clone, Debug)]
pub struct Pin {
    pub name: Id,
    pub width: u32,
    pub accesses: Vec<CompIdx>,
    /// When a pin has exactly one writer its output may track the writer's
    /// input combinationally instead of waiting for the writer's go.
    pub tracks_unqualified: bool,
}

/// A register shared between tasks, as opposed to the local registers
/// scheduling inserts.
#[derive(Clone, Debug)]
pub struct Register {
    pub name: Id,
    pub width: u32,
    pub accesses: Vec<CompIdx>,
    pub referee: Option<CompIdx>,
    pub reads: u32,
    pub writes: u32,
}

/// Identity of a stateful resource for sequencing and feedback analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Resource {
    Memory(MemIdx),
    Fifo(FifoIdx),
    Pin(PinIdx),
    Register(RegIdx),
    /// A loop observed as a unit from an enclosing loop's body.
    Loop(CompIdx),
}

/// The whole design under scheduling. All structure lives in the arenas;
/// every cross-reference is a typed index, so the design clones cheaply and
/// analyses can hold node identities without borrowing the graph.
#[derive(Clone, Debug, Default)]
pub struct Design {
    pub components: IndexedMap<CompIdx, Component>,
    pub ports: IndexedMap<PortIdx, Port>,
    pub buses: IndexedMap<BusIdx, Bus>,
    pub exits: IndexedMap<ExitIdx, Exit>,
    pub entries: IndexedMap<EntryIdx, Entry>,

    pub memories: IndexedMap<MemIdx, Memory>,
    pub fifos: IndexedMap<FifoIdx, Fifo>,
    pub pins: IndexedMap<PinIdx, Pin>,
    pub registers: IndexedMap<RegIdx, Register>,

    /// Top-level modules, one per task.
    pub tasks: Vec<CompIdx>,
    /// Design-level components outside any task, such as referees.
    pub globals: Vec<CompIdx>,

    pub namegen: NameGenerator,
}

impl Design {
    pub fn new() -> Self {
        Self::default()
    }

    /// The main exit of `comp`, if it has one. Sideband exits never
    /// qualify.
    pub fn done_exit(&self, comp: CompIdx) -> Option<ExitIdx> {
        self.components[comp]
            .exits
            .iter()
            .copied()
            .find(|&e| self.exits[e].kind == ExitKind::Done)
    }

    /// The done bus of `comp`'s main exit.
    pub fn done_bus(&self, comp: CompIdx) -> Option<BusIdx> {
        self.done_exit(comp).map(|e| self.exits[e].done_bus)
    }

    /// The first data bus of `comp`'s main exit: the result of a primitive.
    pub fn result_bus(&self, comp: CompIdx) -> SilicaResult<BusIdx> {
        self.done_exit(comp)
            .and_then(|e| self.exits[e].data_buses.first().copied())
            .ok_or_else(|| {
                Error::internal(format!(
                    "component {} has no result bus",
                    self.components[comp].name
                ))
            })
    }

    /// The component that produces `bus`.
    pub fn bus_owner(&self, bus: BusIdx) -> CompIdx {
        self.exits[self.buses[bus].owner].owner
    }

    /// The interior bus asserting when `module` starts: the done bus of its
    /// input buffer. Cycle zero of the module's time frame.
    pub fn inbuf_done_bus(&self, module: CompIdx) -> SilicaResult<BusIdx> {
        let data = self.components[module].module_data().ok_or_else(|| {
            Error::internal(format!(
                "{} is not a module",
                self.components[module].name
            ))
        })?;
        self.done_bus(data.inbuf).ok_or_else(|| {
            Error::internal(format!(
                "input buffer of {} has no done bus",
                self.components[module].name
            ))
        })
    }

    /// Drive `port` from `bus`, marking both sides used.
    pub fn connect(&mut self, port: PortIdx, bus: BusIdx) {
        self.ports[port].driver = Some(bus);
        self.ports[port].used = true;
        self.buses[bus].used = true;
    }

    /// Append a fresh entry to `comp`.
    pub fn add_entry(&mut self, comp: CompIdx) -> EntryIdx {
        let entry = self.entries.push(Entry::new(comp));
        self.components[comp].entries.push(entry);
        entry
    }

    /// Place `comp` inside `module`, at the end of its program order but
    /// always ahead of the output buffer.
    pub fn add_to_module(&mut self, comp: CompIdx, module: CompIdx) {
        self.components[comp].owner = Some(module);
        if let Some(data) = self.components[module].module_data_mut() {
            match data.components.iter().position(|&c| c == data.outbuf) {
                Some(pos) => data.components.insert(pos, comp),
                None => data.components.push(comp),
            }
        }
    }

    /// Walk the ownership chain from `comp` to its task.
    pub fn owner_path(&self, comp: CompIdx) -> Vec<CompIdx> {
        let mut path = Vec::new();
        let mut cur = self.components[comp].owner;
        while let Some(owner) = cur {
            path.push(owner);
            cur = self.components[owner].owner;
        }
        path.reverse();
        path
    }

    /// A stable, human-readable identity for diagnostics.
    pub fn describe(&self, comp: CompIdx) -> String {
        self.owner_path(comp)
            .into_iter()
            .chain(std::iter::once(comp))
            .map(|c| self.components[c].name)
            .join(".")
    }
}
