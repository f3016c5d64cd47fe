// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    continuation::Continuation,
    scheduler::yielder::Yielder,
};
use ::std::fmt;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Entry point of a coroutine, with the user data already bound to it.
pub type CoroutineEntry = Box<dyn FnOnce(&Yielder)>;

/// Coroutine Identifier
///
/// The low 32 bits hold the index of the slot the coroutine lives in. The high 32 bits hold the generation of that
/// slot, which changes every time the slot is released, so an id never refers to a later occupant of its slot.
#[derive(Eq, PartialEq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct CoroutineId(u64);

/// Coroutine Status
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum CoroutineStatus {
    /// The coroutine has finished, was destroyed, or never existed.
    Dead,
    /// The coroutine was created but has not run yet.
    Ready,
    /// The coroutine is executing.
    Running,
    /// The coroutine yielded and is waiting to be resumed.
    Suspended,
}

/// A coroutine that lives in the slot table. Dead coroutines are not represented: their slot is simply empty.
pub struct Coroutine {
    status: CoroutineStatus,
    /// Execution context. Owned exclusively by this coroutine.
    continuation: Continuation,
    /// Entry function. Taken by the trampoline when the coroutine first runs.
    entry: Option<CoroutineEntry>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl CoroutineId {
    pub fn new(index: usize, generation: u32) -> Self {
        debug_assert!(index <= u32::MAX as usize);
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Index of the slot this coroutine lives in.
    pub fn index(&self) -> usize {
        (self.0 & u32::MAX as u64) as usize
    }

    /// Generation of the slot at the time the coroutine was created.
    pub fn generation(&self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl Coroutine {
    pub fn new(continuation: Continuation, entry: CoroutineEntry) -> Self {
        Self {
            status: CoroutineStatus::Ready,
            continuation,
            entry: Some(entry),
        }
    }

    pub fn status(&self) -> CoroutineStatus {
        self.status
    }

    pub fn set_status(&mut self, status: CoroutineStatus) {
        trace!("set_status(): {:?} -> {:?}", self.status, status);
        self.status = status;
    }

    pub fn continuation(&mut self) -> &mut Continuation {
        &mut self.continuation
    }

    pub fn take_entry(&mut self) -> Option<CoroutineEntry> {
        self.entry.take()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<u64> for CoroutineId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<CoroutineId> for u64 {
    fn from(value: CoroutineId) -> Self {
        value.0
    }
}

impl fmt::Debug for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoroutineId({}:{})", self.index(), self.generation())
    }
}

impl fmt::Display for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
