//! Bounded out-of-order arrival buffer (spec §4.5 concurrency model): several
//! blocks are fetched from the node concurrently, but must be committed to
//! storage strictly in height order.

use std::collections::BTreeMap;

pub struct ReorderBuffer<T> {
    capacity: usize,
    pending: BTreeMap<u64, T>,
}

impl<T> ReorderBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, pending: BTreeMap::new() }
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.capacity
    }

    pub fn insert(&mut self, height: u64, item: T) {
        self.pending.insert(height, item);
    }

    /// Removes and returns every contiguous run starting at `next`, in order.
    pub fn drain_from(&mut self, next: u64) -> Vec<(u64, T)> {
        let mut out = Vec::new();
        let mut h = next;
        while let Some(item) = self.pending.remove(&h) {
            out.push((h, item));
            h += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_only_contiguous_prefix() {
        let mut buf = ReorderBuffer::new(8);
        buf.insert(2, "c");
        buf.insert(0, "a");
        buf.insert(1, "b");
        buf.insert(4, "e");

        let drained = buf.drain_from(0);
        assert_eq!(drained, vec![(0, "a"), (1, "b"), (2, "c")]);
        assert!(!buf.is_full());
        assert_eq!(buf.drain_from(3), Vec::<(u64, &str)>::new());
    }
}
