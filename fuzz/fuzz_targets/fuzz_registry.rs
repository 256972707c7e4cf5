#![no_main]

//! Fuzz target for container lifecycle and the container registry
//!
//! Attaches, detaches, clears and disposes containers in arbitrary order and
//! checks cross-container lookup against a model. Resetting the registry
//! disposes whatever was attached.

use arbitrary::Arbitrary;
use interject::{Container, Containers, DiError, Reflect, TypeBuilder};
use libfuzzer_sys::fuzz_target;

struct Clock;

impl Reflect for Clock {
    fn describe(ty: &mut TypeBuilder<Self>) {
        ty.constructor(|| Clock);
    }
}

const SLOTS: usize = 4;

#[derive(Debug, Arbitrary)]
enum LifecycleOp {
    Attach(u8),
    Detach(u8),
    BindClock(u8),
    Resolve(u8),
    Clear(u8),
    Dispose(u8),
    Reset,
}

fuzz_target!(|ops: Vec<LifecycleOp>| {
    let registry = Containers::new();
    let containers: Vec<Container> = (0..SLOTS).map(|_| Container::new()).collect();
    let mut attached = [false; SLOTS];
    let mut bound = [false; SLOTS];
    let mut disposed = [false; SLOTS];

    for op in ops.into_iter().take(128) {
        match op {
            LifecycleOp::Attach(slot) => {
                let slot = slot as usize % SLOTS;
                if !disposed[slot] {
                    assert_eq!(registry.add(&containers[slot]), !attached[slot]);
                    attached[slot] = true;
                }
            }
            LifecycleOp::Detach(slot) => {
                let slot = slot as usize % SLOTS;
                assert_eq!(registry.remove(&containers[slot]), attached[slot]);
                attached[slot] = false;
            }
            LifecycleOp::BindClock(slot) => {
                let slot = slot as usize % SLOTS;
                if !disposed[slot] {
                    containers[slot].bind::<Clock>().to_self().singleton().unwrap();
                    bound[slot] = true;
                }
            }
            LifecycleOp::Resolve(slot) => {
                let slot = slot as usize % SLOTS;
                let result = containers[slot].resolve::<Clock>();
                if disposed[slot] {
                    assert!(matches!(result, Err(DiError::Disposed)));
                } else {
                    let visible = bound[slot]
                        || (attached[slot]
                            && (0..SLOTS).any(|other| attached[other] && bound[other]));
                    assert_eq!(result.unwrap().is_some(), visible);
                }
            }
            LifecycleOp::Clear(slot) => {
                let slot = slot as usize % SLOTS;
                containers[slot].clear();
                bound[slot] = false;
            }
            LifecycleOp::Dispose(slot) => {
                let slot = slot as usize % SLOTS;
                containers[slot].dispose();
                disposed[slot] = true;
                attached[slot] = false;
                bound[slot] = false;
            }
            LifecycleOp::Reset => {
                registry.reset();
                for slot in 0..SLOTS {
                    if attached[slot] {
                        disposed[slot] = true;
                        bound[slot] = false;
                    }
                }
                attached = [false; SLOTS];
            }
        }
        assert_eq!(registry.len(), attached.iter().filter(|a| **a).count());
    }
});
