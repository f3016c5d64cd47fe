// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Entry point of every coroutine context.
//!
//! The trampoline runs the user entry function and, once it returns, gives the coroutine's slot back and switches to
//! the root for the last time. The stack it runs on is released by the root after that final switch.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    continuation,
    scheduler::{
        coroutine::{
            CoroutineEntry,
            CoroutineId,
        },
        scheduler::{
            PanicPayload,
            Scheduler,
            WeakScheduler,
        },
        yielder::{
            ForcedUnwind,
            Yielder,
        },
    },
};
use ::context::{
    Context,
    Transfer,
};
use ::std::{
    cell::{
        RefCell,
        RefMut,
    },
    panic::{
        self,
        AssertUnwindSafe,
    },
    rc::Rc,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Sent by a coroutine to the root: the coroutine yielded.
pub const YIELDED: usize = 0;
/// Sent by a coroutine to the root: the coroutine completed and its slot was released.
pub const COMPLETED: usize = 1;
/// Sent by the root to a suspended coroutine: continue.
pub const RESUME: usize = 0;
/// Sent by the root to a suspended coroutine: unwind, the scheduler is closing.
pub const UNWIND: usize = 1;

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Context function of every coroutine. On first entry, `transfer` carries the root context and a leaked
/// [WeakScheduler].
pub extern "C" fn coroutine_main(transfer: Transfer) -> ! {
    let root: Context = run(transfer);
    // Nothing may be left on this stack past this point: the root releases it as soon as it regains control.
    unsafe { continuation::switch_to(root, COMPLETED) };
    unreachable!("completed coroutine was resumed");
}

fn run(transfer: Transfer) -> Context {
    // Safety: the root leaks exactly one boxed reference for the first switch into a coroutine.
    let scheduler: WeakScheduler = *unsafe { Box::from_raw(transfer.data as *mut WeakScheduler) };

    let (id, entry): (CoroutineId, Option<CoroutineEntry>) = {
        let shared: Rc<RefCell<Scheduler>> = expect_scheduler(&scheduler);
        let mut state: RefMut<Scheduler> = shared.borrow_mut();
        state.park_root(transfer.context);
        match (state.running(), state.take_entry()) {
            (_, Some((id, entry))) => (id, Some(entry)),
            (Some(id), None) => (id, None),
            (None, None) => unreachable!("coroutine started with no running id"),
        }
    };
    trace!("run(): starting coroutine (id={:?})", id);

    let yielder: Yielder = Yielder::new(scheduler.clone(), id);
    let outcome: Result<(), PanicPayload> = match entry {
        Some(entry) => panic::catch_unwind(AssertUnwindSafe(|| entry(&yielder))),
        None => Ok(()),
    };
    drop(yielder);

    let panic: Option<PanicPayload> = match outcome {
        Ok(()) => None,
        Err(payload) if payload.is::<ForcedUnwind>() => {
            debug!("run(): coroutine unwound (id={:?})", id);
            None
        },
        Err(payload) => {
            warn!("run(): coroutine panicked (id={:?})", id);
            Some(payload)
        },
    };

    let state: Rc<RefCell<Scheduler>> = expect_scheduler(&scheduler);
    let root: Option<Context> = state.borrow_mut().retire(id, panic);
    match root {
        Some(root) => root,
        None => unreachable!("root context is missing at coroutine completion"),
    }
}

fn expect_scheduler(scheduler: &WeakScheduler) -> Rc<RefCell<Scheduler>> {
    match scheduler.upgrade() {
        Some(state) => state,
        None => unreachable!("scheduler dropped while a coroutine is running"),
    }
}
