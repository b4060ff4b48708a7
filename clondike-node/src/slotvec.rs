//! Bounded slot vector (spec. §3 "Node manager... bounded slot vector",
//! §4.5 "reserve a slot"). A plain `Vec<Option<T>>` with first-fit
//! allocation rather than a crate dependency — the table is small (tens of
//! entries) and the access pattern is index-by-slot-number, which the
//! control-FS surface names directly (`ccn/nodes/<n>/state`).

use clondike_wire::{ClondikeError, Result};

pub struct SlotVec<T> {
    slots: Vec<Option<T>>,
}

impl<T> SlotVec<T> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    /// First-fit allocation (spec. §4.5 "reserve a slot").
    pub fn insert(&mut self, value: T) -> Result<usize> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(value);
                return Ok(idx);
            }
        }
        Err(ClondikeError::ResourceExhausted(format!("no free slot (capacity {})", self.slots.len())))
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.slots.get(idx).and_then(|s| s.as_ref())
    }

    pub fn remove(&mut self, idx: usize) -> Option<T> {
        self.slots.get_mut(idx).and_then(|s| s.take())
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| s.as_ref().map(|v| (i, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fit_reuses_freed_slots() {
        let mut v: SlotVec<i32> = SlotVec::new(2);
        let a = v.insert(1).unwrap();
        let b = v.insert(2).unwrap();
        assert_eq!((a, b), (0, 1));
        assert!(v.insert(3).is_err());

        v.remove(a);
        let c = v.insert(3).unwrap();
        assert_eq!(c, 0);
    }
}
