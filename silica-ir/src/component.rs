//! Components and their closed set of kinds.
use smallvec::SmallVec;

use silica_utils::Id;

use crate::idx::{
    CompIdx, EntryIdx, ExitIdx, FifoIdx, MemIdx, PinIdx, PortIdx, RegIdx,
};

/// How a register responds to its control inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegMode {
    /// Captures its input every cycle.
    Simple,
    /// Captures only while its enable is asserted.
    Enable,
    /// Like [`Simple`](RegMode::Simple) but cleared by reset.
    Reset,
}

/// Pure combinational operators. The scheduler only cares that these are
/// zero-latency and side-effect free; the exact operation matters to width
/// propagation and emission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    Add,
    Sub,
    Mul,
    Shift,
    Compare,
    Logic,
}

/// The contents shared by every module kind: the child components together
/// with the boundary buffers that image the module's own ports and exits
/// into its interior.
#[derive(Clone, Debug)]
pub struct ModuleData {
    /// Children in program order, including the buffers.
    pub components: Vec<CompIdx>,
    /// Interior image of the module's inputs. Its done bus is the module's
    /// go as seen from inside, defining cycle zero of the module's frame.
    pub inbuf: CompIdx,
    /// Interior collection point for the module's done exit. Its go port
    /// receives the control that becomes the module's done.
    pub outbuf: CompIdx,
}

/// Every kind of node the scheduler understands. The set is closed: each
/// analysis matches on this enum and the compiler checks exhaustiveness,
/// so adding a kind forces every analysis to take a position on it.
#[derive(Clone, Debug)]
pub enum ComponentKind {
    /// Module input boundary. Scheduling treats its done as latency zero.
    InBuf,
    /// Module output boundary.
    OutBuf,
    Constant {
        value: u64,
    },
    /// A local register inserted by scheduling or present in the input.
    Reg {
        mode: RegMode,
        /// True when this register's output is a registered done signal:
        /// asserted for exactly the completion cycle.
        sync_done: bool,
    },
    /// Transparent latch; zero latency.
    Latch,
    And,
    Or,
    /// Port layout: `n` select ports followed by `n` data ports, pairwise.
    Mux,
    /// Merges N registered done signals into one: asserts when all inputs
    /// have asserted since the last firing, then self-clears.
    Scoreboard,
    /// Like a scoreboard over open-latency dones; waits for all inputs,
    /// however long they take.
    Stallboard,
    /// A compacted chain of simple registers, `depth` stages deep.
    ShiftReg {
        depth: u32,
    },
    Op(OpKind),
    MemRead {
        mem: MemIdx,
    },
    MemWrite {
        mem: MemIdx,
    },
    FifoRead {
        fifo: FifoIdx,
    },
    FifoWrite {
        fifo: FifoIdx,
    },
    PinRead {
        pin: PinIdx,
    },
    PinWrite {
        pin: PinIdx,
    },
    RegRead {
        reg: RegIdx,
    },
    RegWrite {
        reg: RegIdx,
    },
    /// Arbitration point for a shared global resource; built once per live
    /// memory or global register.
    Referee,
    /// Straight-line module.
    Block(ModuleData),
    /// Computes a branch or loop condition.
    Decision(ModuleData),
    /// Two-way conditional. The arms and the decision are children of the
    /// module.
    Branch {
        data: ModuleData,
        decision: CompIdx,
        true_arm: CompIdx,
        false_arm: CompIdx,
    },
    Loop {
        data: ModuleData,
        body: CompIdx,
    },
    /// The iterated portion of a loop. `flop_needed` records whether the
    /// iteration boundary keeps its feedback flop.
    LoopBody {
        data: ModuleData,
        flop_needed: bool,
    },
}

impl ComponentKind {
    pub fn module_data(&self) -> Option<&ModuleData> {
        match self {
            ComponentKind::Block(data)
            | ComponentKind::Decision(data)
            | ComponentKind::Branch { data, .. }
            | ComponentKind::Loop { data, .. }
            | ComponentKind::LoopBody { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn module_data_mut(&mut self) -> Option<&mut ModuleData> {
        match self {
            ComponentKind::Block(data)
            | ComponentKind::Decision(data)
            | ComponentKind::Branch { data, .. }
            | ComponentKind::Loop { data, .. }
            | ComponentKind::LoopBody { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn is_module(&self) -> bool {
        self.module_data().is_some()
    }
}

/// A node in the design graph. Every component carries the same port
/// skeleton: go, clock, and reset first, then its data ports, so the
/// control ports can be found without consulting the kind.
#[derive(Clone, Debug)]
pub struct Component {
    pub name: Id,
    pub kind: ComponentKind,
    /// The module containing this component; `None` for tasks and
    /// design-level referees.
    pub owner: Option<CompIdx>,
    /// Layout: `[go, clock, reset, data...]`.
    pub ports: SmallVec<[PortIdx; 4]>,
    pub exits: SmallVec<[ExitIdx; 1]>,
    pub entries: Vec<EntryIdx>,
    /// True when the component's behavior is qualified by its go: it must
    /// not act on its inputs until told to. Components with `consumes_go`
    /// cleared let their outputs track their inputs continuously.
    pub consumes_go: bool,
    /// Request placement in an I/O block register during emission.
    pub iob: bool,
    /// Replaced by a later structural rewrite (shift-register compaction);
    /// skipped by traversals and emission.
    pub retired: bool,
}

impl Component {
    pub fn go_port(&self) -> PortIdx {
        self.ports[0]
    }

    pub fn clock_port(&self) -> PortIdx {
        self.ports[1]
    }

    pub fn reset_port(&self) -> PortIdx {
        self.ports[2]
    }

    pub fn data_ports(&self) -> &[PortIdx] {
        &self.ports[3..]
    }

    pub fn module_data(&self) -> Option<&ModuleData> {
        self.kind.module_data()
    }

    pub fn module_data_mut(&mut self) -> Option<&mut ModuleData> {
        self.kind.module_data_mut()
    }

    pub fn is_module(&self) -> bool {
        self.kind.is_module()
    }
}
