/// Trait for types that wrap a dense arena index.
///
/// Implementors are cheap to copy and totally ordered by their underlying
/// index, so they can double as deterministic map keys.
pub trait IndexRef: Copy + Eq {
    fn index(&self) -> usize;
    fn new(input: usize) -> Self;
}
