//! # Control Block Property Tests
//!
//! Random sequences of owner and observer operations run against a simple
//! model. After every step the counters, the validity flags and the
//! allocator's view of what is live must agree with the model.
//!
//! Run with: cargo test --package keystone_core --test control_block_props

#![allow(unsafe_code)]

use std::cell::Cell;

use keystone_alloc::{HeapAllocator, TrackingAllocator};
use keystone_core::{
    AtomicControlBlock, ControlBlock, DefaultDeleter, Deleter, PlainControlBlock, SharedOwner,
};
use proptest::prelude::*;
use proptest::sample::Index;

static HEAP: HeapAllocator = HeapAllocator::new();

#[derive(Clone, Copy, Debug)]
enum Op {
    CloneOwner(Index),
    DropOwner(Index),
    Downgrade(Index),
    CloneObserver(Index),
    DropObserver(Index),
    Upgrade(Index),
    TryRelease(Index),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<Index>().prop_map(Op::CloneOwner),
        any::<Index>().prop_map(Op::DropOwner),
        any::<Index>().prop_map(Op::Downgrade),
        any::<Index>().prop_map(Op::CloneObserver),
        any::<Index>().prop_map(Op::DropObserver),
        any::<Index>().prop_map(Op::Upgrade),
        any::<Index>().prop_map(Op::TryRelease),
    ]
}

struct Counted<'a>(&'a Cell<usize>);

impl Drop for Counted<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

type Owner<'a, C> = SharedOwner<Counted<'a>, DefaultDeleter<Counted<'a>>, C>;

fn run_owner_model<C: ControlBlock>(ops: &[Op]) -> Result<(), TestCaseError> {
    let tracker: &'static TrackingAllocator = Box::leak(Box::new(TrackingAllocator::new(&HEAP)));
    let drops = Cell::new(0);

    let first = Owner::<C>::create_in(tracker, Counted(&drops));
    prop_assert!(first.is_valid());
    let data = first.handle().raw();
    let control = first.control_handle().raw();

    let mut owners = vec![first];
    let mut observers = Vec::new();
    // Set once the value was handed back by `try_release`.
    let mut released = None;

    for op in ops {
        match *op {
            Op::CloneOwner(i) if !owners.is_empty() => {
                let copy = owners[i.index(owners.len())].clone();
                owners.push(copy);
            }
            Op::DropOwner(i) if !owners.is_empty() => {
                drop(owners.swap_remove(i.index(owners.len())));
            }
            Op::Downgrade(i) if !owners.is_empty() => {
                observers.push(owners[i.index(owners.len())].downgrade());
            }
            Op::CloneObserver(i) if !observers.is_empty() => {
                let copy = observers[i.index(observers.len())].clone();
                observers.push(copy);
            }
            Op::DropObserver(i) if !observers.is_empty() => {
                drop(observers.swap_remove(i.index(observers.len())));
            }
            Op::Upgrade(i) if !observers.is_empty() => {
                let promoted = observers[i.index(observers.len())].upgrade();
                prop_assert_eq!(promoted.is_some(), !owners.is_empty());
                owners.extend(promoted);
            }
            Op::TryRelease(i) if !owners.is_empty() => {
                let owner = owners.swap_remove(i.index(owners.len()));
                let sole = owners.is_empty();
                match owner.try_release() {
                    Ok(handle) => {
                        prop_assert!(sole);
                        released = Some(handle);
                    }
                    Err(owner) => {
                        prop_assert!(!sole);
                        owners.push(owner);
                    }
                }
            }
            _ => {}
        }

        let strong = owners.len();
        for owner in &owners {
            prop_assert_eq!(owner.use_count() as usize, strong);
            prop_assert_eq!(owner.weak_count() as usize, observers.len());
        }
        for observer in &observers {
            prop_assert_eq!(observer.is_valid(), strong > 0);
            prop_assert_eq!(observer.use_count() as usize, strong);
        }
        let data_live = strong > 0 || released.is_some();
        prop_assert_eq!(tracker.is_live(data), data_live);
        prop_assert_eq!(drops.get(), usize::from(!data_live));
        prop_assert_eq!(tracker.is_live(control), strong + observers.len() > 0);
        prop_assert_eq!(tracker.double_free_count(), 0);

        if strong == 0 && observers.is_empty() {
            break;
        }
    }

    drop(owners);
    drop(observers);
    if let Some(handle) = released {
        prop_assert_eq!(drops.get(), 0);
        // SAFETY: the released value is initialized and owned by nobody.
        unsafe { DefaultDeleter::<Counted<'_>>::default().delete(handle) };
    }
    prop_assert_eq!(drops.get(), 1);
    prop_assert_eq!(tracker.live_count(), 0);
    prop_assert_eq!(tracker.free_count_of(data), 1);
    prop_assert_eq!(tracker.free_count_of(control), 1);
    Ok(())
}

/// Raw counter transitions against a `(strong, weak, self)` model.
fn run_counter_model<C: ControlBlock>(ops: &[u8]) -> Result<(), TestCaseError> {
    let block = C::new();
    let (mut strong, mut weak, mut refs) = (1_u32, 0_u32, 1_u32);

    for &op in ops {
        match op % 6 {
            0 if strong > 0 => {
                block.acquire();
                block.inc_strong();
                strong += 1;
                refs += 1;
            }
            1 if strong > 0 => {
                prop_assert_eq!(block.dec_strong(), strong == 1);
                strong -= 1;
                prop_assert_eq!(block.release(), refs == 1);
                refs -= 1;
            }
            2 if refs > 0 => {
                block.acquire();
                block.inc_weak();
                weak += 1;
                refs += 1;
            }
            3 if weak > 0 => {
                block.dec_weak();
                weak -= 1;
                prop_assert_eq!(block.release(), refs == 1);
                refs -= 1;
            }
            4 if refs > 0 => {
                let promoted = block.try_inc_strong();
                prop_assert_eq!(promoted, strong > 0);
                if promoted {
                    block.acquire();
                    strong += 1;
                    refs += 1;
                }
            }
            5 if refs > 0 => {
                prop_assert_eq!(block.release_data(), strong == 1);
                if strong == 1 {
                    strong = 0;
                }
            }
            _ => {}
        }

        prop_assert_eq!(block.strong_count(), strong);
        prop_assert_eq!(block.weak_count(), weak);
        prop_assert_eq!(block.self_count(), refs);
        prop_assert_eq!(block.is_valid(), strong > 0);
        if refs == 0 {
            break;
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn plain_owner_model(ops in proptest::collection::vec(op_strategy(), 1..64)) {
        run_owner_model::<PlainControlBlock>(&ops)?;
    }

    #[test]
    fn atomic_owner_model(ops in proptest::collection::vec(op_strategy(), 1..64)) {
        run_owner_model::<AtomicControlBlock>(&ops)?;
    }

    #[test]
    fn plain_counter_model(ops in proptest::collection::vec(any::<u8>(), 1..128)) {
        run_counter_model::<PlainControlBlock>(&ops)?;
    }

    #[test]
    fn atomic_counter_model(ops in proptest::collection::vec(any::<u8>(), 1..128)) {
        run_counter_model::<AtomicControlBlock>(&ops)?;
    }
}
