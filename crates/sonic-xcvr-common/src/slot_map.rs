//! Map over a fixed universe of hardware slots.
//!
//! A chassis has a fixed number of slots known at start-up. `SlotMap` keeps
//! at most one value per slot, refuses keys outside `0..capacity`, and never
//! creates entries implicitly:
//! - `get()` returns `Option<&V>`
//! - `insert()` fails if the slot is already occupied
//! - `replace()` and `evict()` hand the previous value back to the caller so
//!   it is dropped (and its resources released) before anything new is used

use std::collections::BTreeMap;
use thiserror::Error;

/// Error type for SlotMap operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotMapError {
    #[error("Slot {slot} outside of universe 0..{capacity}")]
    OutOfRange { slot: usize, capacity: usize },

    #[error("Slot {0} already occupied")]
    Occupied(usize),
}

/// A map with one optional value per slot of a fixed universe.
///
/// # Example
///
/// ```
/// use sonic_xcvr_common::SlotMap;
///
/// let mut map: SlotMap<usize, &str> = SlotMap::new(4);
///
/// assert!(map.get(&1).is_none());
/// map.insert(1, "cmis").unwrap();
/// assert_eq!(map.get(&1), Some(&"cmis"));
///
/// // Out of universe
/// assert!(map.insert(9, "sff").is_err());
///
/// // Explicit replacement returns the previous occupant
/// assert_eq!(map.replace(1, "sff").unwrap(), Some("cmis"));
/// ```
#[derive(Debug, Clone)]
pub struct SlotMap<K, V> {
    capacity: usize,
    inner: BTreeMap<K, V>,
}

impl<K, V> SlotMap<K, V>
where
    K: Ord + Copy + Into<usize>,
{
    /// Creates an empty map over slots `0..capacity`.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: BTreeMap::new(),
        }
    }

    /// Returns the size of the slot universe.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true if `key` lies inside the slot universe.
    pub fn in_universe(&self, key: &K) -> bool {
        (*key).into() < self.capacity
    }

    fn check(&self, key: &K) -> Result<(), SlotMapError> {
        if self.in_universe(key) {
            Ok(())
        } else {
            Err(SlotMapError::OutOfRange {
                slot: (*key).into(),
                capacity: self.capacity,
            })
        }
    }

    /// Returns the number of occupied slots.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns true if the slot is occupied.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Returns the occupant of a slot. **Never creates entries.**
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    /// Returns the occupant of a slot mutably. **Never creates entries.**
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    /// Places a value into an empty slot.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), SlotMapError> {
        self.check(&key)?;
        if self.inner.contains_key(&key) {
            return Err(SlotMapError::Occupied(key.into()));
        }
        self.inner.insert(key, value);
        Ok(())
    }

    /// Puts a value into a slot, returning the previous occupant.
    pub fn replace(&mut self, key: K, value: V) -> Result<Option<V>, SlotMapError> {
        self.check(&key)?;
        Ok(self.inner.insert(key, value))
    }

    /// Empties a slot, returning its occupant.
    pub fn evict(&mut self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    /// Iterates occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    /// Iterates occupied slot keys in slot order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }

    /// Iterates occupants in slot order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.inner.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_never_creates() {
        let mut map: SlotMap<usize, u32> = SlotMap::new(8);
        assert!(map.get(&3).is_none());
        assert!(map.get_mut(&3).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_insert_rejects_occupied_and_out_of_range() {
        let mut map: SlotMap<usize, u32> = SlotMap::new(2);
        map.insert(0, 10).unwrap();
        assert_eq!(map.insert(0, 11), Err(SlotMapError::Occupied(0)));
        assert_eq!(
            map.insert(2, 12),
            Err(SlotMapError::OutOfRange { slot: 2, capacity: 2 })
        );
        assert_eq!(map.get(&0), Some(&10));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_replace_returns_previous() {
        let mut map: SlotMap<usize, &str> = SlotMap::new(4);
        assert_eq!(map.replace(1, "a").unwrap(), None);
        assert_eq!(map.replace(1, "b").unwrap(), Some("a"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_evict_and_iteration_order() {
        let mut map: SlotMap<usize, u32> = SlotMap::new(4);
        map.insert(3, 30).unwrap();
        map.insert(0, 0).unwrap();
        map.insert(2, 20).unwrap();

        let keys: Vec<usize> = map.keys().copied().collect();
        assert_eq!(keys, vec![0, 2, 3]);

        assert_eq!(map.evict(&2), Some(20));
        assert_eq!(map.evict(&2), None);
        assert!(!map.contains_key(&2));
        assert!(map.in_universe(&2));
        assert!(!map.in_universe(&4));
    }
}
