// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod coroutine;
mod scheduler;
mod slots;
mod trampoline;
mod yielder;

//==============================================================================
// Exports
//==============================================================================

pub use self::{
    coroutine::{
        CoroutineId,
        CoroutineStatus,
    },
    scheduler::SharedScheduler,
    yielder::Yielder,
};
