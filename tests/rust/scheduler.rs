// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::cosched::{
    ensure_eq,
    ensure_neq,
    Config,
    CoroutineId,
    CoroutineStatus,
    SharedScheduler,
    Yielder,
};
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    collections::{
        BTreeMap,
        HashSet,
    },
    panic::{
        self,
        AssertUnwindSafe,
    },
    rc::Rc,
};

//==============================================================================
// Coroutines
//==============================================================================

type IterationLog = Rc<RefCell<Vec<(CoroutineId, usize)>>>;

/// Logs three iterations, yielding after each one.
fn count_to_three(yielder: &Yielder, log: IterationLog) {
    for i in 0..3 {
        assert_eq!(yielder.running(), Some(yielder.id()));
        assert_eq!(yielder.status(yielder.id()), CoroutineStatus::Running);
        log.borrow_mut().push((yielder.id(), i));
        yielder.yield_now().expect("yield should succeed inside a coroutine");
    }
}

/// Counts its own resumptions forever.
fn count_forever(yielder: &Yielder, log: IterationLog) {
    let mut count: usize = 0;
    loop {
        count += 1;
        log.borrow_mut().push((yielder.id(), count));
        yielder.yield_now().expect("yield should succeed inside a coroutine");
    }
}

/// Yields `n` times, then completes.
fn yield_n_times(yielder: &Yielder, n: usize) {
    for _ in 0..n {
        yielder.yield_now().expect("yield should succeed inside a coroutine");
    }
}

/// Produces Fibonacci numbers, one per resumption.
fn fibonacci(yielder: &Yielder, (limit, out): (usize, Rc<RefCell<Vec<u64>>>)) {
    let (mut a, mut b): (u64, u64) = (0, 1);
    let mut produced: Vec<u64> = Vec::new();
    for _ in 0..limit {
        produced.push(a);
        out.borrow_mut().push(a);
        yielder.yield_now().expect("yield should succeed inside a coroutine");
        (a, b) = (b, a + b);
    }
    assert_eq!(produced, *out.borrow());
}

/// Descends `depth` frames, yielding in each one, and checks every frame on the way back up.
fn descend(yielder: &Yielder, depth: usize, trail: &Rc<RefCell<Vec<usize>>>) -> usize {
    if depth == 0 {
        return 0;
    }
    let marker: [usize; 8] = [depth; 8];
    trail.borrow_mut().push(depth);
    yielder.yield_now().expect("yield should succeed inside a coroutine");
    let below: usize = descend(yielder, depth - 1, trail);
    assert!(marker.iter().all(|value| *value == depth));
    below + 1
}

fn noop(_: &Yielder, _: ()) {}

/// Resumes `id` until it completes and returns how many resumptions it took.
fn run_to_completion(scheduler: &SharedScheduler, id: CoroutineId) -> Result<usize> {
    let mut resumptions: usize = 0;
    while scheduler.status(id) != CoroutineStatus::Dead {
        scheduler.resume(id)?;
        resumptions += 1;
    }
    Ok(resumptions)
}

//==============================================================================
// Tests
//==============================================================================

/// Drives one of two coroutines to completion while the other one is never resumed.
#[test]
fn resume_one_of_two_coroutines() -> Result<()> {
    let scheduler: SharedScheduler = common::open_scheduler()?;
    let log: IterationLog = Rc::new(RefCell::new(Vec::new()));

    let id1: CoroutineId = scheduler.create(count_to_three, log.clone())?;
    let id2: CoroutineId = scheduler.create(count_to_three, log.clone())?;
    ensure_neq!(id1, id2);
    ensure_eq!(scheduler.status(id1), CoroutineStatus::Ready);
    ensure_eq!(scheduler.status(id2), CoroutineStatus::Ready);

    let mut observed: Vec<CoroutineStatus> = Vec::new();
    while scheduler.status(id1) != CoroutineStatus::Dead && scheduler.status(id2) != CoroutineStatus::Dead {
        scheduler.resume(id1)?;
        observed.push(scheduler.status(id1));
        ensure_eq!(scheduler.status(id2), CoroutineStatus::Ready);
        ensure_eq!(scheduler.running(), None);
    }
    ensure_eq!(
        observed,
        vec![
            CoroutineStatus::Suspended,
            CoroutineStatus::Suspended,
            CoroutineStatus::Suspended,
            CoroutineStatus::Dead
        ]
    );
    ensure_eq!(log.borrow().as_slice(), &[(id1, 0), (id1, 1), (id1, 2)]);

    // The scan for a free slot starts past the surviving coroutine.
    let id3: CoroutineId = scheduler.create(count_to_three, log.clone())?;
    ensure_eq!(id3.index(), 2);
    ensure_eq!(run_to_completion(&scheduler, id3)?, 4);
    ensure_eq!(scheduler.status(id2), CoroutineStatus::Ready);
    ensure_eq!(scheduler.len(), 1);

    scheduler.close();
    Ok(())
}

/// Locals of a coroutine survive every suspension.
#[test]
fn resume_preserves_local_state() -> Result<()> {
    let scheduler: SharedScheduler = common::open_scheduler()?;
    let out: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(Vec::new()));
    let id: CoroutineId = scheduler.create(fibonacci, (10, out.clone()))?;

    ensure_eq!(run_to_completion(&scheduler, id)?, 11);
    ensure_eq!(out.borrow().as_slice(), &[0, 1, 1, 2, 3, 5, 8, 13, 21, 34]);
    Ok(())
}

/// Frames deep in a coroutine's stack survive suspension.
#[test]
fn resume_preserves_nested_frames() -> Result<()> {
    let scheduler: SharedScheduler = common::open_scheduler()?;
    let trail: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
    let depth: Rc<Cell<usize>> = Rc::new(Cell::new(0));
    let id: CoroutineId = scheduler.create(
        |yielder: &Yielder, (trail, depth): (Rc<RefCell<Vec<usize>>>, Rc<Cell<usize>>)| {
            depth.set(descend(yielder, 32, &trail));
        },
        (trail.clone(), depth.clone()),
    )?;

    ensure_eq!(run_to_completion(&scheduler, id)?, 33);
    ensure_eq!(depth.get(), 32);
    ensure_eq!(trail.borrow().as_slice(), (1..=32).rev().collect::<Vec<usize>>().as_slice());
    Ok(())
}

/// Ids handed out without intervening completions are pairwise distinct.
#[test]
fn create_returns_distinct_ids() -> Result<()> {
    let scheduler: SharedScheduler = common::open_scheduler()?;
    let mut ids: HashSet<CoroutineId> = HashSet::new();
    for _ in 0..100 {
        let id: CoroutineId = scheduler.create(noop, ())?;
        ensure_eq!(ids.insert(id), true);
        ensure_eq!(scheduler.status(id), CoroutineStatus::Ready);
    }
    ensure_eq!(scheduler.len(), 100);
    ensure_eq!(scheduler.capacity(), 128);
    Ok(())
}

/// Growing the slot table leaves existing coroutines untouched.
#[test]
fn growth_preserves_suspended_coroutines() -> Result<()> {
    let scheduler: SharedScheduler = common::open_scheduler()?;
    let log: IterationLog = Rc::new(RefCell::new(Vec::new()));

    let mut originals: Vec<CoroutineId> = Vec::new();
    for _ in 0..16 {
        let id: CoroutineId = scheduler.create(count_forever, log.clone())?;
        scheduler.resume(id)?;
        originals.push(id);
    }
    ensure_eq!(scheduler.capacity(), 16);

    // The first coroutine past the initial capacity lands at the boundary of growth.
    let boundary: CoroutineId = scheduler.create(noop, ())?;
    ensure_eq!(boundary.index(), 16);
    ensure_eq!(scheduler.capacity(), 32);
    for _ in 0..20 {
        scheduler.create(noop, ())?;
    }
    ensure_eq!(scheduler.capacity(), 64);
    ensure_eq!(scheduler.len(), 37);

    for id in originals.iter() {
        ensure_eq!(scheduler.status(*id), CoroutineStatus::Suspended);
        scheduler.resume(*id)?;
        ensure_eq!(log.borrow().last().copied(), Some((*id, 2)));
    }
    Ok(())
}

/// A completed coroutine's id reports dead, and its slot is reused under a new id.
#[test]
fn completed_id_is_dead_and_slot_is_reused() -> Result<()> {
    let scheduler: SharedScheduler = common::open_scheduler()?;
    let old: CoroutineId = scheduler.create(noop, ())?;
    scheduler.resume(old)?;
    ensure_eq!(scheduler.status(old), CoroutineStatus::Dead);
    ensure_eq!(scheduler.is_empty(), true);

    let new: CoroutineId = scheduler.create(noop, ())?;
    ensure_eq!(new.index(), old.index());
    ensure_neq!(new, old);
    ensure_eq!(scheduler.status(old), CoroutineStatus::Dead);
    ensure_eq!(scheduler.status(new), CoroutineStatus::Ready);

    match scheduler.resume(old) {
        Err(e) => ensure_eq!(e.errno, libc::EBADF),
        Ok(()) => anyhow::bail!("resuming a stale id should fail"),
    }
    ensure_eq!(scheduler.status(new), CoroutineStatus::Ready);
    Ok(())
}

/// A coroutine can neither resume another coroutine nor itself.
#[test]
fn resume_from_coroutine_is_rejected() -> Result<()> {
    let scheduler: Rc<SharedScheduler> = Rc::new(common::open_scheduler()?);
    let errors: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
    let target: CoroutineId = scheduler.create(noop, ())?;

    let caller: CoroutineId = scheduler.create(
        |yielder: &Yielder, (scheduler, target, errors): (Rc<SharedScheduler>, CoroutineId, Rc<RefCell<Vec<i32>>>)| {
            for id in [target, yielder.id()] {
                match scheduler.resume(id) {
                    Err(e) => errors.borrow_mut().push(e.errno),
                    Ok(()) => errors.borrow_mut().push(0),
                }
            }
        },
        (scheduler.clone(), target, errors.clone()),
    )?;
    scheduler.resume(caller)?;

    ensure_eq!(errors.borrow().as_slice(), &[libc::EBUSY, libc::EINVAL]);
    ensure_eq!(scheduler.status(caller), CoroutineStatus::Dead);
    ensure_eq!(scheduler.status(target), CoroutineStatus::Ready);
    ensure_eq!(Rc::strong_count(&scheduler), 1);
    Ok(())
}

/// Yielding from the root context is rejected.
#[test]
fn yield_outside_coroutine_is_rejected() -> Result<()> {
    let scheduler: SharedScheduler = common::open_scheduler()?;
    let id: CoroutineId = scheduler.create(yield_n_times, 1)?;
    scheduler.resume(id)?;

    match scheduler.yield_now() {
        Err(e) => ensure_eq!(e.errno, libc::EPERM),
        Ok(()) => anyhow::bail!("yielding from the root should fail"),
    }
    ensure_eq!(scheduler.status(id), CoroutineStatus::Suspended);
    Ok(())
}

/// A panic inside a coroutine kills it and resumes in the root, leaving the scheduler usable.
#[test]
fn panic_in_coroutine_reaches_root() -> Result<()> {
    let scheduler: SharedScheduler = common::open_scheduler()?;
    let bystander: CoroutineId = scheduler.create(yield_n_times, 2)?;
    scheduler.resume(bystander)?;
    let id: CoroutineId = scheduler.create(|_: &Yielder, _: ()| panic!("coroutine failure"), ())?;

    match panic::catch_unwind(AssertUnwindSafe(|| scheduler.resume(id))) {
        Err(payload) => ensure_eq!(payload.downcast_ref::<&str>().copied(), Some("coroutine failure")),
        Ok(result) => anyhow::bail!("resume should have panicked (result={:?})", result),
    }
    ensure_eq!(scheduler.status(id), CoroutineStatus::Dead);
    ensure_eq!(scheduler.running(), None);
    ensure_eq!(scheduler.len(), 1);

    ensure_eq!(run_to_completion(&scheduler, bystander)?, 2);
    let next: CoroutineId = scheduler.create(noop, ())?;
    scheduler.resume(next)?;
    ensure_eq!(scheduler.is_empty(), true);
    Ok(())
}

/// Coroutines created from inside a coroutine wait for the root to resume them.
#[test]
fn coroutine_creates_coroutine() -> Result<()> {
    let scheduler: SharedScheduler = common::open_scheduler()?;
    let child_ran: Rc<Cell<bool>> = Rc::new(Cell::new(false));
    let children: Rc<RefCell<Vec<CoroutineId>>> = Rc::new(RefCell::new(Vec::new()));

    let parent: CoroutineId = scheduler.create(
        |yielder: &Yielder, (child_ran, children): (Rc<Cell<bool>>, Rc<RefCell<Vec<CoroutineId>>>)| {
            let child: CoroutineId = yielder
                .create(|_: &Yielder, ran: Rc<Cell<bool>>| ran.set(true), child_ran.clone())
                .expect("create should succeed inside a coroutine");
            assert_eq!(yielder.status(child), CoroutineStatus::Ready);
            assert_eq!(child_ran.get(), false);
            children.borrow_mut().push(child);
        },
        (child_ran.clone(), children.clone()),
    )?;
    scheduler.resume(parent)?;
    ensure_eq!(scheduler.status(parent), CoroutineStatus::Dead);

    let child: CoroutineId = children.borrow()[0];
    ensure_eq!(scheduler.status(child), CoroutineStatus::Ready);
    ensure_eq!(child_ran.get(), false);
    scheduler.resume(child)?;
    ensure_eq!(child_ran.get(), true);
    ensure_eq!(scheduler.status(child), CoroutineStatus::Dead);
    Ok(())
}

/// Stack size comes from the configuration.
#[test]
fn stack_size_follows_config() -> Result<()> {
    let scheduler: SharedScheduler = common::open_scheduler_with_capacity(2)?;
    ensure_eq!(scheduler.stack_size(), common::TEST_STACK_SIZE);
    ensure_eq!(scheduler.capacity(), 2);
    Ok(())
}

/// A stack that cannot be allocated fails creation without taking a slot.
#[test]
fn create_fails_when_stack_cannot_be_allocated() -> Result<()> {
    let config: Config = Config::from_yaml_str("scheduler:\n  stack_size: 1152921504606846976\n")?;
    let scheduler: SharedScheduler = SharedScheduler::open_with_config(&config)?;

    match scheduler.create(noop, ()) {
        Err(e) => ensure_eq!(e.errno, libc::ENOMEM),
        Ok(id) => anyhow::bail!("creation should fail (id={:?})", id),
    }
    ensure_eq!(scheduler.len(), 0);
    ensure_eq!(scheduler.capacity(), 16);
    Ok(())
}

/// Random interleavings of create and resume match a simple model of the state machine.
#[test]
fn random_schedules_follow_state_machine() -> Result<()> {
    let scheduler: SharedScheduler = common::open_scheduler_with_capacity(4)?;
    let mut rng: SmallRng = SmallRng::seed_from_u64(42);
    // Remaining yields of each live coroutine.
    let mut live: BTreeMap<CoroutineId, usize> = BTreeMap::new();

    for _ in 0..512 {
        if live.is_empty() || rng.gen_bool(0.4) {
            let yields: usize = rng.gen_range(0..4);
            let id: CoroutineId = scheduler.create(yield_n_times, yields)?;
            ensure_eq!(live.contains_key(&id), false);
            ensure_eq!(scheduler.status(id), CoroutineStatus::Ready);
            live.insert(id, yields);
        } else {
            let ids: Vec<CoroutineId> = live.keys().copied().collect();
            let id: CoroutineId = ids[rng.gen_range(0..ids.len())];
            scheduler.resume(id)?;
            match live.get(&id).copied() {
                Some(0) => {
                    ensure_eq!(scheduler.status(id), CoroutineStatus::Dead);
                    live.remove(&id);
                },
                Some(remaining) => {
                    ensure_eq!(scheduler.status(id), CoroutineStatus::Suspended);
                    live.insert(id, remaining - 1);
                },
                None => anyhow::bail!("resumed a coroutine that is not live (id={:?})", id),
            }
        }
        ensure_eq!(scheduler.len(), live.len());
        ensure_eq!(scheduler.running(), None);
    }
    Ok(())
}
