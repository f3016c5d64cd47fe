// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    continuation,
    fail::Fail,
    scheduler::{
        coroutine::{
            CoroutineId,
            CoroutineStatus,
        },
        scheduler::{
            Scheduler,
            WeakScheduler,
        },
        trampoline::{
            UNWIND,
            YIELDED,
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
    panic,
    rc::Rc,
    thread,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Yielder lets a single coroutine yield to the root context and query its scheduler.
///
/// The yielder does not keep the scheduler alive. The scheduler always outlives the coroutines it runs, so every
/// operation below succeeds while the coroutine is executing.
pub struct Yielder {
    scheduler: WeakScheduler,
    id: CoroutineId,
}

/// Panic payload used to unwind a suspended coroutine when its scheduler is closed.
pub struct ForcedUnwind;

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Yielder {
    pub(crate) fn new(scheduler: WeakScheduler, id: CoroutineId) -> Self {
        Self { scheduler, id }
    }

    /// Id of the coroutine that owns this yielder.
    pub fn id(&self) -> CoroutineId {
        self.id
    }

    /// Suspends the coroutine and switches back to the root context. Returns once the coroutine is resumed.
    pub fn yield_now(&self) -> Result<(), Fail> {
        yield_current(&self.scheduler)
    }

    /// Creates a new coroutine in the same scheduler. It will not run until the root resumes it.
    pub fn create<T, F>(&self, entry: F, user_data: T) -> Result<CoroutineId, Fail>
    where
        T: 'static,
        F: FnOnce(&Yielder, T) + 'static,
    {
        let scheduler: Rc<RefCell<Scheduler>> = upgrade(&self.scheduler)?;
        let mut state: RefMut<Scheduler> = scheduler.borrow_mut();
        state.create_coroutine(Box::new(move |yielder: &Yielder| entry(yielder, user_data)))
    }

    pub fn status(&self, id: CoroutineId) -> CoroutineStatus {
        let mut status: CoroutineStatus = CoroutineStatus::Dead;
        if let Some(scheduler) = self.scheduler.upgrade() {
            status = scheduler.borrow().status(id);
        }
        status
    }

    pub fn running(&self) -> Option<CoroutineId> {
        let scheduler: Rc<RefCell<Scheduler>> = self.scheduler.upgrade()?;
        let running: Option<CoroutineId> = scheduler.borrow().running();
        running
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Suspends the running coroutine of `scheduler` and switches to the root context.
pub fn yield_current(scheduler: &WeakScheduler) -> Result<(), Fail> {
    // The panic count is thread-local: switching away mid-unwind would leak it into the root.
    if thread::panicking() {
        let cause: &str = "cannot yield while unwinding";
        error!("yield_now(): {}", cause);
        return Err(Fail::new(libc::EDEADLK, cause));
    }

    // Do not hold on to the scheduler while suspended.
    let root: Context = upgrade(scheduler)?.borrow_mut().prepare_yield()?;

    // Safety: the root context was saved when control switched into this coroutine, and the root is blocked in
    // resume() until we switch back.
    let transfer: Transfer = unsafe { continuation::switch_to(root, YIELDED) };

    match scheduler.upgrade() {
        Some(state) => state.borrow_mut().park_root(transfer.context),
        None => unreachable!("scheduler dropped while resuming a coroutine"),
    }
    if transfer.data == UNWIND {
        trace!("yield_now(): unwinding");
        panic::resume_unwind(Box::new(ForcedUnwind));
    }
    Ok(())
}

fn upgrade(scheduler: &WeakScheduler) -> Result<Rc<RefCell<Scheduler>>, Fail> {
    match scheduler.upgrade() {
        Some(scheduler) => Ok(scheduler),
        None => {
            let cause: &str = "scheduler was closed";
            error!("upgrade(): {}", cause);
            Err(Fail::new(libc::EBADF, cause))
        },
    }
}
