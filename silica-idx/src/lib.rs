//! Typed indices and dense arenas.
//!
//! Every node in the silica graph lives in an [`IndexedMap`] owned by the
//! design and is referred to by a lightweight typed index. Connections
//! between nodes are plain index fields, which keeps the graph trivially
//! cloneable and makes structural-hash keys ordinary hashable values.
mod index_trait;
mod indexed_map;
mod macros;

pub use index_trait::IndexRef;
pub use indexed_map::{IndexedMap, SecondaryMap};
