// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Implementation of our single-threaded cooperative coroutine scheduler.
//!
//! Every coroutine runs on its own stack. Control only ever moves between the root context (the code that calls
//! [SharedScheduler::resume]) and one coroutine: resuming switches from the root into a coroutine, and yielding or
//! completing switches from that coroutine straight back to the root. Coroutines never switch into each other.
//!
//! Scheduler state is shared between the root and the running coroutine through a [RefCell]. No borrow is ever held
//! across a context switch.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    config::Config,
    continuation::{
        self,
        Continuation,
    },
    fail::Fail,
    limits,
    scheduler::{
        coroutine::{
            Coroutine,
            CoroutineEntry,
            CoroutineId,
            CoroutineStatus,
        },
        slots::SlotTable,
        trampoline::{
            self,
            COMPLETED,
            RESUME,
            UNWIND,
            YIELDED,
        },
        yielder::{
            self,
            Yielder,
        },
    },
};
use ::context::{
    Context,
    Transfer,
};
use ::std::{
    any::Any,
    cell::RefCell,
    panic,
    rc::{
        Rc,
        Weak,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Payload of a panic that escaped a coroutine.
pub type PanicPayload = Box<dyn Any + Send>;

/// Non-owning reference to the scheduler state, held by coroutines.
pub type WeakScheduler = Weak<RefCell<Scheduler>>;

/// Scheduler state.
pub struct Scheduler {
    /// Live coroutines.
    slots: SlotTable<Coroutine>,
    /// Coroutine that is currently executing, if any. When this is none, control is in the root context.
    running: Option<CoroutineId>,
    /// Context to switch back to when the running coroutine yields or completes. Only present while a coroutine is
    /// executing.
    root: Option<Context>,
    /// Stack size for new coroutines.
    stack_size: usize,
    /// Coroutine that just completed. Its stack is still in use until the final switch back to the root, so the root
    /// releases it.
    retired: Option<Box<Coroutine>>,
    /// Panic that escaped the coroutine that just completed.
    panic: Option<PanicPayload>,
}

/// Scheduler handle.
///
/// This is the handle of the root context. Coroutines interact with the scheduler through their [Yielder] instead.
/// Dropping the handle (or calling [SharedScheduler::close]) destroys every coroutine that is still alive.
pub struct SharedScheduler(Rc<RefCell<Scheduler>>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Scheduler {
    fn new(capacity: usize, stack_size: usize) -> Self {
        Self {
            slots: SlotTable::with_capacity(capacity),
            running: None,
            root: None,
            stack_size,
            retired: None,
            panic: None,
        }
    }

    /// Allocates the continuation of a new coroutine and inserts it in the slot table in the [CoroutineStatus::Ready]
    /// state.
    pub fn create_coroutine(&mut self, entry: CoroutineEntry) -> Result<CoroutineId, Fail> {
        // Allocate the stack first so that a failure leaves the slot table untouched.
        let continuation: Continuation = Continuation::new(self.stack_size, trampoline::coroutine_main)?;
        let stack_size: usize = continuation.stack_size();
        let id: CoroutineId = self.slots.insert(Box::new(Coroutine::new(continuation, entry)))?;
        trace!(
            "create_coroutine(): id={:?}, stack_size={:?}, count={:?}",
            id,
            stack_size,
            self.slots.len()
        );
        Ok(id)
    }

    pub fn status(&self, id: CoroutineId) -> CoroutineStatus {
        match self.slots.get(id) {
            Some(coroutine) => coroutine.status(),
            None => CoroutineStatus::Dead,
        }
    }

    pub fn running(&self) -> Option<CoroutineId> {
        self.running
    }

    /// Marks coroutine `id` as running and takes out the context to switch into. Returns whether the coroutine has
    /// never run before.
    fn prepare_resume(&mut self, id: CoroutineId) -> Result<(Context, bool), Fail> {
        let running: Option<CoroutineId> = self.running;
        let coroutine: &mut Coroutine = match self.slots.get_mut(id) {
            Some(coroutine) => coroutine,
            None => {
                let cause: String = format!("no such coroutine (id={:?})", id);
                error!("resume(): {}", cause);
                return Err(Fail::new(libc::EBADF, &cause));
            },
        };

        let first_run: bool = match coroutine.status() {
            CoroutineStatus::Ready => true,
            CoroutineStatus::Suspended => false,
            status => {
                let cause: String = format!("cannot resume coroutine (id={:?}, status={:?})", id, status);
                error!("resume(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };

        if let Some(running) = running {
            let cause: String = format!("cannot resume from inside a coroutine (id={:?}, running={:?})", id, running);
            error!("resume(): {}", cause);
            return Err(Fail::new(libc::EBUSY, &cause));
        }

        let context: Context = match coroutine.continuation().take() {
            Some(context) => context,
            None => {
                let cause: String = format!("coroutine has no saved context (id={:?})", id);
                error!("resume(): {}", cause);
                return Err(Fail::new(libc::EFAULT, &cause));
            },
        };
        coroutine.set_status(CoroutineStatus::Running);
        self.running = Some(id);
        Ok((context, first_run))
    }

    /// Called by the root once control is back from coroutine `id`. Returns what the root must release.
    fn complete_switch(
        &mut self,
        id: CoroutineId,
        transfer: Transfer,
    ) -> (Option<Box<Coroutine>>, Option<PanicPayload>) {
        match transfer.data {
            YIELDED => {
                match self.slots.get_mut(id) {
                    Some(coroutine) => coroutine.continuation().park(transfer.context),
                    None => warn!("complete_switch(): yielded coroutine is gone (id={:?})", id),
                }
                (None, None)
            },
            COMPLETED => {
                trace!("complete_switch(): coroutine completed (id={:?})", id);
                (self.retired.take(), self.panic.take())
            },
            data => {
                error!("complete_switch(): unexpected transfer (id={:?}, data={:?})", id, data);
                (None, None)
            },
        }
    }

    /// Called by the running coroutine when it yields. Returns the root context to switch to.
    pub fn prepare_yield(&mut self) -> Result<Context, Fail> {
        let id: CoroutineId = match self.running {
            Some(id) => id,
            None => {
                let cause: &str = "cannot yield outside of a coroutine";
                error!("yield_now(): {}", cause);
                return Err(Fail::new(libc::EPERM, cause));
            },
        };
        let root: Context = match self.root.take() {
            Some(root) => root,
            None => {
                let cause: String = format!("root context is missing (running={:?})", id);
                error!("yield_now(): {}", cause);
                return Err(Fail::new(libc::EFAULT, &cause));
            },
        };
        if let Some(coroutine) = self.slots.get_mut(id) {
            coroutine.set_status(CoroutineStatus::Suspended);
        }
        self.running = None;
        trace!("yield_now(): id={:?}", id);
        Ok(root)
    }

    /// Saves the root context. Called inside a coroutine right after control switched into it.
    pub fn park_root(&mut self, root: Context) {
        debug_assert!(self.root.is_none());
        self.root = Some(root);
    }

    /// Takes the entry function of the coroutine that is starting.
    pub fn take_entry(&mut self) -> Option<(CoroutineId, CoroutineEntry)> {
        let id: CoroutineId = self.running?;
        let entry: CoroutineEntry = self.slots.get_mut(id)?.take_entry()?;
        Some((id, entry))
    }

    /// Releases the slot of the running coroutine once its entry function has returned (or unwound), and returns the
    /// root context to switch to. The coroutine itself is kept aside, as we are still running on its stack.
    pub fn retire(&mut self, id: CoroutineId, panic: Option<PanicPayload>) -> Option<Context> {
        self.retired = self.slots.remove(id);
        self.panic = panic;
        self.running = None;
        trace!("retire(): id={:?}, count={:?}", id, self.slots.len());
        self.root.take()
    }
}

impl SharedScheduler {
    /// Opens a scheduler with the default capacity and stack size.
    pub fn open() -> Self {
        Self(Rc::new(RefCell::new(Scheduler::new(
            limits::DEFAULT_CAPACITY,
            limits::DEFAULT_STACK_SIZE,
        ))))
    }

    /// Opens a scheduler whose capacity and stack size are read from `config`.
    pub fn open_with_config(config: &Config) -> Result<Self, Fail> {
        let capacity: usize = config.default_capacity()?;
        let stack_size: usize = config.stack_size()?;
        trace!("open_with_config(): capacity={:?}, stack_size={:?}", capacity, stack_size);
        Ok(Self(Rc::new(RefCell::new(Scheduler::new(capacity, stack_size)))))
    }

    /// Closes the scheduler, destroying all coroutines that are still alive.
    pub fn close(self) {
        trace!("close(): count={:?}", self.len());
        drop(self);
    }

    /// Creates a coroutine that runs `entry` with `user_data` once resumed. The coroutine starts out
    /// [CoroutineStatus::Ready].
    pub fn create<T, F>(&self, entry: F, user_data: T) -> Result<CoroutineId, Fail>
    where
        T: 'static,
        F: FnOnce(&Yielder, T) + 'static,
    {
        self.0
            .borrow_mut()
            .create_coroutine(Box::new(move |yielder: &Yielder| entry(yielder, user_data)))
    }

    /// Runs coroutine `id` until it yields or completes. If the coroutine panics, it is destroyed and the panic
    /// resumes here.
    pub fn resume(&self, id: CoroutineId) -> Result<(), Fail> {
        if let Some(payload) = self.switch_into(id, RESUME)? {
            panic::resume_unwind(payload);
        }
        Ok(())
    }

    /// Yields the running coroutine. Fails when called from the root context.
    pub fn yield_now(&self) -> Result<(), Fail> {
        yielder::yield_current(&Rc::downgrade(&self.0))
    }

    pub fn status(&self, id: CoroutineId) -> CoroutineStatus {
        self.0.borrow().status(id)
    }

    pub fn running(&self) -> Option<CoroutineId> {
        self.0.borrow().running()
    }

    /// Number of live coroutines.
    pub fn len(&self) -> usize {
        self.0.borrow().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().slots.is_empty()
    }

    /// Current size of the slot table.
    pub fn capacity(&self) -> usize {
        self.0.borrow().slots.capacity()
    }

    pub fn stack_size(&self) -> usize {
        self.0.borrow().stack_size
    }

    /// Switches into coroutine `id` and returns once control is back in the root. A coroutine that starts running
    /// receives a reference to the scheduler; a suspended one receives `data`.
    fn switch_into(&self, id: CoroutineId, data: usize) -> Result<Option<PanicPayload>, Fail> {
        let (context, first_run): (Context, bool) = self.0.borrow_mut().prepare_resume(id)?;
        let data: usize = if first_run {
            Box::into_raw(Box::new(Rc::downgrade(&self.0))) as usize
        } else {
            data
        };
        trace!("resume(): id={:?}, first_run={:?}", id, first_run);

        // Safety: the context was parked by the coroutine (or created with it) and its stack is owned by the slot
        // table, which keeps it alive until the coroutine has switched back.
        let transfer: Transfer = unsafe { continuation::switch_to(context, data) };

        let (retired, panic): (Option<Box<Coroutine>>, Option<PanicPayload>) =
            self.0.borrow_mut().complete_switch(id, transfer);
        // The coroutine no longer runs on its stack, so we can release it.
        drop(retired);
        Ok(panic)
    }

    /// Forcibly destroys coroutine `id`. A suspended coroutine is unwound first, so that the values living on its
    /// stack are dropped.
    fn destroy(&self, id: CoroutineId) {
        if self.status(id) == CoroutineStatus::Suspended {
            debug!("destroy(): unwinding suspended coroutine (id={:?})", id);
            match self.switch_into(id, UNWIND) {
                Ok(Some(_)) => error!("destroy(): coroutine panicked while unwinding (id={:?})", id),
                Ok(None) => (),
                Err(e) => error!("destroy(): failed to unwind coroutine (id={:?}, error={:?})", id, e),
            }
        }

        let coroutine: Option<Box<Coroutine>> = self.0.borrow_mut().slots.remove(id);
        if let Some(coroutine) = coroutine {
            if coroutine.status() == CoroutineStatus::Suspended {
                warn!("destroy(): coroutine survived unwinding, releasing its stack (id={:?})", id);
            }
            debug!("destroy(): id={:?}", id);
            drop(coroutine);
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for SharedScheduler {
    fn default() -> Self {
        Self::open()
    }
}

impl Drop for SharedScheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running() {
            error!("drop(): scheduler dropped while a coroutine is running (running={:?})", running);
            return;
        }
        loop {
            let next: Option<CoroutineId> = self.0.borrow().slots.ids().first().copied();
            match next {
                Some(id) => self.destroy(id),
                None => break,
            }
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
