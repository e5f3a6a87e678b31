//! The wiring layer of the graph: ports, buses, exits, entries, and the
//! dependencies that connect them.
//!
//! A [`Bus`] is a value produced by a component; a [`Port`] is a value
//! consumed by one. Connections are directional: a port records the bus that
//! drives it. Exits group the buses that become valid together, and entries
//! record the dependencies that must be satisfied before a component may
//! fire.
use smallvec::SmallVec;

use silica_utils::Id;

use crate::idx::{BusIdx, CompIdx, ExitIdx, PortIdx};
use crate::Latency;

/// What has been learned about the value carried on a bus or port. Filled
/// in by width propagation; `None` until then.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusValue {
    /// Width in bits. Always at least one.
    pub width: u32,
    pub signed: bool,
}

impl BusValue {
    pub fn unsigned(width: u32) -> Self {
        BusValue {
            width,
            signed: false,
        }
    }

    /// A one-bit unsigned value, the shape of every control signal.
    pub fn control() -> Self {
        BusValue::unsigned(1)
    }
}

/// The role of a port in its component's port list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortKind {
    /// The control input that starts the component.
    Go,
    Clock,
    Reset,
    /// An operand.
    Data,
}

/// A value sink on a component.
#[derive(Clone, Debug)]
pub struct Port {
    pub name: Id,
    pub kind: PortKind,
    pub owner: CompIdx,
    /// The bus driving this port, once connected.
    pub driver: Option<BusIdx>,
    /// Set when some consumer of the component's behavior needs this port.
    /// Unused ports are exempt from the pre-emission dependency check.
    pub used: bool,
    /// Value information mirrored from the driver during width propagation.
    pub value: Option<BusValue>,
}

/// A value source, owned by an exit.
#[derive(Clone, Debug)]
pub struct Bus {
    pub name: Id,
    pub owner: ExitIdx,
    pub value: Option<BusValue>,
    /// Set once something consumes this bus.
    pub used: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitKind {
    /// The main exit: its done bus asserts when the component completes and
    /// its data buses carry the results.
    Done,
    /// Side-channel outputs that are not part of the done protocol.
    Sideband,
}

/// A group of buses that become valid together, with the latency from the
/// owning component's go to that point.
#[derive(Clone, Debug)]
pub struct Exit {
    pub owner: CompIdx,
    pub kind: ExitKind,
    pub done_bus: BusIdx,
    pub data_buses: SmallVec<[BusIdx; 2]>,
    /// Latency from the component's go to this exit, in the component's own
    /// time frame.
    pub latency: Latency,
}

/// Why a port must wait on a bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepKind {
    /// Control flow: the bus gates when the port's component may fire.
    Control,
    /// A data operand.
    Data,
    Clock,
    Reset,
    /// An ordering constraint on a shared resource. Carries no data; only
    /// sequencing, possibly delayed by whole clock cycles.
    Resource,
}

/// A single dependency of a port on a bus.
#[derive(Clone, Copy, Debug)]
pub struct Dependency {
    pub kind: DepKind,
    /// The logical bus the port depends on.
    pub bus: BusIdx,
    /// Clock cycles of mandatory delay between the bus asserting and the
    /// port seeing it. Non-zero only for [`DepKind::Resource`].
    pub delay_clocks: u32,
}

impl Dependency {
    pub fn control(bus: BusIdx) -> Self {
        Dependency {
            kind: DepKind::Control,
            bus,
            delay_clocks: 0,
        }
    }

    pub fn data(bus: BusIdx) -> Self {
        Dependency {
            kind: DepKind::Data,
            bus,
            delay_clocks: 0,
        }
    }

    pub fn resource(bus: BusIdx, delay_clocks: u32) -> Self {
        Dependency {
            kind: DepKind::Resource,
            bus,
            delay_clocks,
        }
    }
}

/// One way control can reach a component. Components reached from several
/// places in the program carry one entry per arrival, and scheduling merges
/// them into a single physical connection per port.
#[derive(Clone, Debug)]
pub struct Entry {
    pub owner: CompIdx,
    /// Dependencies grouped by the port they constrain. A port may appear
    /// more than once.
    pub deps: Vec<(PortIdx, Dependency)>,
    /// True for a loop's iteration edge. Feedback entries restart the time
    /// frame, so they never participate in sibling ordering.
    pub feedback: bool,
}

impl Entry {
    pub fn new(owner: CompIdx) -> Self {
        Entry {
            owner,
            deps: Vec::new(),
            feedback: false,
        }
    }

    pub fn add_dependency(&mut self, port: PortIdx, dep: Dependency) {
        self.deps.push((port, dep));
    }

    /// All dependencies constraining `port`, in insertion order.
    pub fn deps_on(
        &self,
        port: PortIdx,
    ) -> impl Iterator<Item = &Dependency> + '_ {
        self.deps
            .iter()
            .filter_map(move |(p, d)| (*p == port).then_some(d))
    }

    /// The distinct ports this entry constrains, in first-seen order.
    pub fn ports(&self) -> Vec<PortIdx> {
        let mut seen = Vec::new();
        for (p, _) in &self.deps {
            if !seen.contains(p) {
                seen.push(*p);
            }
        }
        seen
    }
}
