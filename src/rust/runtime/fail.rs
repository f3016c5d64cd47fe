// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::context::stack::StackError;
use ::libc::{
    c_int,
    EINVAL,
    ENOMEM,
};
use ::std::{
    error,
    fmt,
};
use ::yaml_rust::ScanError;

//==============================================================================
// Structures
//==============================================================================

/// Failure
///
/// The scheduler reports every contract violation through one of these instead of aborting. The error code tells
/// the kind of violation apart:
///
/// - `EBADF`: the coroutine id is out of range, refers to an empty slot or to a previous occupant of the slot.
/// - `EINVAL`: the coroutine is not in a state that allows the requested transition.
/// - `EBUSY`: a coroutine attempted to resume another coroutine (or itself).
/// - `EPERM`: yield was requested while no coroutine is running.
/// - `EDEADLK`: yield was requested while the running coroutine is unwinding.
/// - `ENOMEM`: the stack of a new coroutine could not be allocated or the slot table cannot grow any further.
/// - `EFAULT`: the slot table is internally inconsistent.
#[derive(Clone, PartialEq, Eq)]
pub struct Fail {
    /// Error code.
    pub errno: c_int,
    /// Cause.
    pub cause: String,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Failures
impl Fail {
    /// Creates a new Failure
    pub fn new(errno: i32, cause: &str) -> Self {
        Self {
            errno,
            cause: cause.to_string(),
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Display Trait Implementation for Failures
impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Debug trait Implementation for Failures
impl fmt::Debug for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Error Trait Implementation for Failures
impl error::Error for Fail {}

/// Conversion Trait Implementation for Fail
impl From<StackError> for Fail {
    fn from(e: StackError) -> Self {
        Self {
            errno: ENOMEM,
            cause: format!("failed to allocate coroutine stack: {:?}", e),
        }
    }
}

/// Conversion Trait Implementation for Fail
impl From<ScanError> for Fail {
    fn from(e: ScanError) -> Self {
        Self {
            errno: EINVAL,
            cause: format!("malformed configuration: {}", e),
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
