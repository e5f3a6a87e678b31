//! The intermediate representation scheduled by `silica-sched`.
//!
//! A design is a forest of module components (blocks, branches, loops)
//! whose leaves are primitives and resource accesses. All nodes live in
//! arenas on [`Design`] and refer to each other through typed indices.
mod builder;
mod component;
mod design;
mod idx;
mod latency;
mod structure;

pub use builder::Builder;
pub use component::{
    Component, ComponentKind, ModuleData, OpKind, RegMode,
};
pub use design::{
    Design, Fifo, MemImpl, Memory, Pin, Register, Resource,
};
pub use idx::{
    BusIdx, CompIdx, EntryIdx, ExitIdx, FifoIdx, MemIdx, PinIdx, PortIdx,
    RegIdx,
};
pub use latency::Latency;
pub use structure::{
    Bus, BusValue, DepKind, Dependency, Entry, Exit, ExitKind, Port,
    PortKind,
};
