//! Dense slot arena keyed by small integers.
//!
//! Channels and handles index straight into a `Vec`. Freed indices go to a
//! sorted free list so the next allocation always takes the lowest number
//! available, which is what peers expect when a channel or handle is reused.

use std::collections::BTreeSet;

/// Arena of `T` indexed by `u32`, with an upper bound on allocatable indices.
#[derive(Debug, Clone)]
pub struct Slots<T> {
    entries: Vec<Option<T>>,
    free: BTreeSet<u32>,
    max_index: u32,
    len: usize,
}

impl<T> Slots<T> {
    /// An arena allowing indices `0..=max_index`.
    pub fn new(max_index: u32) -> Self {
        Self {
            entries: Vec::new(),
            free: BTreeSet::new(),
            max_index,
            len: 0,
        }
    }

    /// Place `value` at the lowest free index.
    ///
    /// Hands the value back when every index up to the maximum is taken.
    pub fn insert(&mut self, value: T) -> Result<u32, T> {
        let index = match self.free.iter().next().copied() {
            Some(index) => {
                self.free.remove(&index);
                index
            }
            None => {
                let next = self.entries.len();
                if next > self.max_index as usize {
                    return Err(value);
                }
                self.entries.push(None);
                next as u32
            }
        };
        self.entries[index as usize] = Some(value);
        self.len += 1;
        Ok(index)
    }

    /// The index [`insert`](Self::insert) would use next.
    pub fn next_free(&self) -> Option<u32> {
        match self.free.iter().next() {
            Some(index) => Some(*index),
            None if self.entries.len() <= self.max_index as usize => Some(self.entries.len() as u32),
            None => None,
        }
    }

    /// Place `value` at a specific index, failing if it is occupied or out of range.
    pub fn insert_at(&mut self, index: u32, value: T) -> Result<(), T> {
        if index > self.max_index || self.contains(index) {
            return Err(value);
        }
        let slot = index as usize;
        if slot >= self.entries.len() {
            for hole in self.entries.len()..slot {
                self.free.insert(hole as u32);
            }
            self.entries.resize_with(slot + 1, || None);
        } else {
            self.free.remove(&index);
        }
        self.entries[slot] = Some(value);
        self.len += 1;
        Ok(())
    }

    /// Remove and return the value at `index`, freeing the index.
    pub fn remove(&mut self, index: u32) -> Option<T> {
        let value = self.entries.get_mut(index as usize)?.take()?;
        self.len -= 1;
        if index as usize + 1 == self.entries.len() {
            self.entries.pop();
            // trailing holes shrink with the vector
            while matches!(self.entries.last(), Some(None)) {
                self.entries.pop();
                self.free.remove(&(self.entries.len() as u32));
            }
        } else {
            self.free.insert(index);
        }
        Some(value)
    }

    #[inline]
    pub fn get(&self, index: u32) -> Option<&T> {
        self.entries.get(index as usize)?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        self.entries.get_mut(index as usize)?.as_mut()
    }

    #[inline]
    pub fn contains(&self, index: u32) -> bool {
        self.get(index).is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn max_index(&self) -> u32 {
        self.max_index
    }

    pub fn set_max_index(&mut self, max_index: u32) {
        self.max_index = max_index;
    }

    /// Occupied indices in ascending order.
    pub fn indices(&self) -> Vec<u32> {
        self.iter().map(|(index, _)| index).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|v| (i as u32, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(i, e)| e.as_mut().map(|v| (i as u32, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowest_free_index_reused() {
        let mut slots = Slots::new(10);
        assert_eq!(slots.insert("a"), Ok(0));
        assert_eq!(slots.insert("b"), Ok(1));
        assert_eq!(slots.insert("c"), Ok(2));
        assert_eq!(slots.remove(1), Some("b"));
        assert_eq!(slots.remove(0), Some("a"));
        assert_eq!(slots.insert("d"), Ok(0));
        assert_eq!(slots.insert("e"), Ok(1));
        assert_eq!(slots.insert("f"), Ok(3));
        assert_eq!(slots.len(), 4);
    }

    #[test]
    fn test_limit() {
        let mut slots = Slots::new(1);
        assert!(slots.insert(1).is_ok());
        assert!(slots.insert(2).is_ok());
        assert_eq!(slots.insert(3), Err(3));
        assert_eq!(slots.next_free(), None);
        slots.remove(0);
        assert_eq!(slots.next_free(), Some(0));
    }

    #[test]
    fn test_insert_at_leaves_holes_free() {
        let mut slots = Slots::new(u16::MAX as u32);
        slots.insert_at(3, 'x').unwrap();
        assert_eq!(slots.insert_at(3, 'y'), Err('y'));
        assert_eq!(slots.insert('a'), Ok(0));
        assert_eq!(slots.indices(), vec![0, 3]);
        assert!(slots.insert_at(70000, 'z').is_err());
    }

    #[test]
    fn test_remove_tail_shrinks() {
        let mut slots = Slots::new(100);
        slots.insert(0).unwrap();
        slots.insert(1).unwrap();
        slots.insert(2).unwrap();
        slots.remove(1);
        slots.remove(2);
        assert_eq!(slots.insert(9), Ok(1));
        assert_eq!(slots.insert(9), Ok(2));
        assert!(slots.remove(7).is_none());
    }
}
