// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Execution contexts for coroutines.
//!
//! This is the only place where the scheduler touches the context switching primitive. We rely on a Boost.Context
//! style primitive (the `context` crate), which has the following contract:
//!
//! - A [Context] is one-shot. Switching into it consumes it, and the [Transfer] received on the other side carries
//!   the context of whoever switched. There is no explicit "bind the current thread" operation: the context of the
//!   caller materializes in the [Transfer] the callee receives on every switch.
//! - A context must never unmap the stack it is running on. A coroutine that finishes hands its [Continuation] over
//!   to the context it switches to, which destroys it once the switch has completed.
//! - Dropping an inactive [Continuation] unmaps its stack without running destructors for the frames on it.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::context::{
    stack::ProtectedFixedSizeStack,
    Context,
    ContextFn,
    Transfer,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// An execution context together with the fixed-size stack it runs on.
pub struct Continuation {
    /// Saved context. This is `None` while the continuation is executing.
    context: Option<Context>,
    /// Guard-page protected stack. Must outlive every switch into `context`.
    stack: ProtectedFixedSizeStack,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Continuation {
    /// Allocates a stack of `stack_size` bytes and prepares a context that starts executing `trampoline` the first
    /// time it is switched into.
    pub fn new(stack_size: usize, trampoline: ContextFn) -> Result<Self, Fail> {
        let stack: ProtectedFixedSizeStack = match ProtectedFixedSizeStack::new(stack_size) {
            Ok(stack) => stack,
            Err(e) => {
                let fail: Fail = e.into();
                error!("new(): {} (stack_size={:?})", fail.cause, stack_size);
                return Err(fail);
            },
        };
        // Safety: the stack is owned by the returned continuation, and the scheduler never switches into a context
        // after dropping the continuation that owns it.
        let context: Context = unsafe { Context::new(&stack, trampoline) };
        Ok(Self {
            context: Some(context),
            stack,
        })
    }

    /// Takes the saved context out, leaving the continuation marked as executing.
    pub fn take(&mut self) -> Option<Context> {
        self.context.take()
    }

    /// Saves the context of a continuation that just switched out.
    pub fn park(&mut self, context: Context) {
        debug_assert!(self.context.is_none());
        self.context = Some(context);
    }

    /// Returns true if the continuation has a saved context, that is, if it is not executing.
    #[cfg(test)]
    pub fn is_parked(&self) -> bool {
        self.context.is_some()
    }

    /// Usable size of the stack.
    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Switches into `context`, passing `data` along. Returns when some context switches back to the caller.
///
/// Safety: `context` must have been created over a stack that is still mapped, and must not have been switched into
/// before (contexts are one-shot).
pub unsafe fn switch_to(context: Context, data: usize) -> Transfer {
    context.resume(data)
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
