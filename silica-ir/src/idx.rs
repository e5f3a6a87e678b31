//! Typed indices for the arenas in [`Design`](crate::Design). All graph
//! structure is expressed through these: a component refers to its ports by
//! `PortIdx`, a port refers to its driver by `BusIdx`, and so on. Nothing in
//! the graph holds a direct reference to anything else, which keeps the whole
//! design `Clone` and lets analyses address nodes without borrowing them.
use silica_idx::impl_index;

/// A component in the design: a primitive, an access, or a module.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompIdx(u32);
impl_index!(CompIdx);

/// An input port on a component.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortIdx(u32);
impl_index!(PortIdx);

/// An output bus, owned by an exit.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BusIdx(u32);
impl_index!(BusIdx);

/// An exit of a component: a done bus plus the data buses that become valid
/// with it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExitIdx(u32);
impl_index!(ExitIdx);

/// One way control may arrive at a component. Components with several
/// entries need their entries merged during scheduling.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryIdx(u32);
impl_index!(EntryIdx);

/// A global memory.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemIdx(u32);
impl_index!(MemIdx);

/// A FIFO interface.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FifoIdx(u32);
impl_index!(FifoIdx);

/// A top-level pin.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PinIdx(u32);
impl_index!(PinIdx);

/// A global register shared between tasks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegIdx(u32);
impl_index!(RegIdx);
