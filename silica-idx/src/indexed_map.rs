use super::index_trait::IndexRef;
use std::{marker::PhantomData, ops};

/// A dense arena keyed by a typed index. Insertion hands out the next
/// index; entries are never removed, so indices stay stable for the life
/// of the map.
#[derive(Debug, Clone)]
pub struct IndexedMap<K, D>
where
    K: IndexRef,
{
    data: Vec<D>,
    phantom: PhantomData<K>,
}

impl<K, D> IndexedMap<K, D>
where
    K: IndexRef,
{
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            phantom: PhantomData,
        }
    }

    pub fn with_capacity(size: usize) -> Self {
        Self {
            data: Vec::with_capacity(size),
            phantom: PhantomData,
        }
    }

    pub fn get(&self, index: K) -> Option<&D> {
        self.data.get(index.index())
    }

    pub fn get_mut(&mut self, index: K) -> Option<&mut D> {
        self.data.get_mut(index.index())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn push(&mut self, item: D) -> K {
        self.data.push(item);
        K::new(self.data.len() - 1)
    }

    /// The index the next [`push`](Self::push) will return.
    pub fn peek_next_idx(&self) -> K {
        K::new(self.data.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &D)> {
        self.data.iter().enumerate().map(|(i, v)| (K::new(i), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut D)> {
        self.data
            .iter_mut()
            .enumerate()
            .map(|(i, v)| (K::new(i), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &D> {
        self.data.iter()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut D> {
        self.data.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = K> {
        (0..self.data.len()).map(K::new)
    }
}

impl<K, D> ops::Index<K> for IndexedMap<K, D>
where
    K: IndexRef,
{
    type Output = D;

    fn index(&self, index: K) -> &Self::Output {
        &self.data[index.index()]
    }
}

impl<K, D> ops::IndexMut<K> for IndexedMap<K, D>
where
    K: IndexRef,
{
    fn index_mut(&mut self, index: K) -> &mut Self::Output {
        &mut self.data[index.index()]
    }
}

impl<K, D> Default for IndexedMap<K, D>
where
    K: IndexRef,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Auxiliary per-index storage with a default value for indices that were
/// never written. Useful for analysis results layered over an existing
/// arena.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, D>
where
    K: IndexRef,
    D: Clone,
{
    data: Vec<D>,
    phantom: PhantomData<K>,
    default_value: D,
}

impl<K, D> SecondaryMap<K, D>
where
    K: IndexRef,
    D: Clone,
{
    pub fn new_with_default(default_value: D) -> Self {
        Self {
            data: Vec::new(),
            phantom: PhantomData,
            default_value,
        }
    }

    pub fn get(&self, index: K) -> &D {
        self.data.get(index.index()).unwrap_or(&self.default_value)
    }

    pub fn insert(&mut self, index: K, item: D) {
        if index.index() >= self.data.len() {
            self.data
                .resize(index.index() + 1, self.default_value.clone());
        }
        self.data[index.index()] = item;
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &D)> {
        self.data.iter().enumerate().map(|(k, v)| (K::new(k), v))
    }
}

impl<K, D> ops::Index<K> for SecondaryMap<K, D>
where
    K: IndexRef,
    D: Clone,
{
    type Output = D;

    fn index(&self, index: K) -> &Self::Output {
        self.get(index)
    }
}

impl<K, D> SecondaryMap<K, D>
where
    K: IndexRef,
    D: Clone + Default,
{
    pub fn new() -> Self {
        Self::new_with_default(D::default())
    }
}

impl<K, D> Default for SecondaryMap<K, D>
where
    K: IndexRef,
    D: Clone + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::{impl_index, IndexedMap, SecondaryMap};

    #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    struct MyIdx(u32);
    impl_index!(MyIdx);

    #[test]
    fn push_and_index() {
        let mut map: IndexedMap<MyIdx, usize> = IndexedMap::new();
        let a = map.push(10);
        let b = map.push(20);
        assert_ne!(a, b);
        assert_eq!(map[a], 10);
        assert_eq!(map[b], 20);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn secondary_defaults() {
        let mut sec: SecondaryMap<MyIdx, bool> = SecondaryMap::new();
        sec.insert(MyIdx(3), true);
        assert!(!sec[MyIdx(0)]);
        assert!(sec[MyIdx(3)]);
    }
}
