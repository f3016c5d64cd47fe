// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Slot table that backs coroutine ids.
//!
//! Ids are small dense integers. When the table runs full, it doubles and the new entry lands exactly at the
//! boundary of growth. Otherwise, free slots are searched for starting at `len % capacity` instead of at zero, so
//! that released ids are not immediately handed out again.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits,
    scheduler::coroutine::CoroutineId,
};

//======================================================================================================================
// Structures
//======================================================================================================================

pub struct SlotTable<T> {
    /// Slots. The length of this vector is the capacity of the table.
    slots: Vec<Option<Box<T>>>,
    /// Generation of each slot, bumped on release.
    generations: Vec<u32>,
    /// Number of occupied slots.
    len: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T> SlotTable<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity > 0 && capacity <= limits::MAX_CAPACITY);
        let mut slots: Vec<Option<Box<T>>> = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            generations: vec![0; capacity],
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Places `value` in a free slot and returns its id.
    pub fn insert(&mut self, value: Box<T>) -> Result<CoroutineId, Fail> {
        let capacity: usize = self.capacity();
        let index: usize = if self.len >= capacity {
            self.grow()?;
            capacity
        } else {
            match (0..capacity)
                .map(|i| (i + self.len) % capacity)
                .find(|&index| self.slots[index].is_none())
            {
                Some(index) => index,
                None => {
                    let cause: String = format!("no free slot found (len={:?}, capacity={:?})", self.len, capacity);
                    error!("insert(): {}", cause);
                    return Err(Fail::new(libc::EFAULT, &cause));
                },
            }
        };

        self.slots[index] = Some(value);
        self.len += 1;
        Ok(CoroutineId::new(index, self.generations[index]))
    }

    /// Releases the slot referred to by `id`, returning its occupant.
    pub fn remove(&mut self, id: CoroutineId) -> Option<Box<T>> {
        if !self.is_current(id) {
            return None;
        }
        let index: usize = id.index();
        let value: Option<Box<T>> = self.slots[index].take();
        if value.is_some() {
            self.generations[index] = self.generations[index].wrapping_add(1);
            self.len -= 1;
        }
        value
    }

    pub fn get(&self, id: CoroutineId) -> Option<&T> {
        if !self.is_current(id) {
            return None;
        }
        self.slots[id.index()].as_deref()
    }

    pub fn get_mut(&mut self, id: CoroutineId) -> Option<&mut T> {
        if !self.is_current(id) {
            return None;
        }
        self.slots[id.index()].as_deref_mut()
    }

    /// Ids of all occupied slots, in index order.
    pub fn ids(&self) -> Vec<CoroutineId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| CoroutineId::new(index, self.generations[index]))
            .collect()
    }

    /// Checks that `id` is in range and was issued for the current generation of its slot.
    fn is_current(&self, id: CoroutineId) -> bool {
        id.index() < self.capacity() && self.generations[id.index()] == id.generation()
    }

    /// Doubles the capacity of the table. The new half starts out empty.
    fn grow(&mut self) -> Result<(), Fail> {
        let capacity: usize = self.capacity();
        let new_capacity: usize = match capacity.checked_mul(2) {
            Some(new_capacity) if new_capacity <= limits::MAX_CAPACITY => new_capacity,
            _ => {
                let cause: String = format!("slot table cannot grow any further (capacity={:?})", capacity);
                error!("grow(): {}", cause);
                return Err(Fail::new(libc::ENOMEM, &cause));
            },
        };
        trace!("grow(): capacity {:?} -> {:?}", capacity, new_capacity);
        self.slots.resize_with(new_capacity, || None);
        self.generations.resize(new_capacity, 0);
        Ok(())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
