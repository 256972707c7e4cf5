#![no_main]

//! Fuzz target for concurrent container operations
//!
//! Tests that singletons stay unique and first bindings stay in place under
//! concurrent resolution, injection and registration.

use arbitrary::Arbitrary;
use interject::{Container, Inject, Reflect, TypeBuilder};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::thread;

#[derive(Default)]
struct SharedConfig;

impl Reflect for SharedConfig {
    fn describe(ty: &mut TypeBuilder<Self>) {
        ty.constructor(|| SharedConfig);
    }
}

/// Service for concurrent testing
#[derive(Clone, Debug, Default, Arbitrary)]
struct ConcurrentService {
    id: u64,
    data: Vec<u8>,
}

impl Reflect for ConcurrentService {
    fn describe(ty: &mut TypeBuilder<Self>) {
        ty.constructor(ConcurrentService::default);
    }
}

#[derive(Default)]
struct Worker {
    config: Inject<SharedConfig>,
    service: Inject<ConcurrentService>,
}

impl Reflect for Worker {
    fn describe(ty: &mut TypeBuilder<Self>) {
        ty.constructor(Worker::default)
            .field("config", |w| &w.config)
            .field("service", |w| &w.service);
    }
}

/// Thread operation
#[derive(Debug, Clone, Arbitrary)]
enum ThreadOp {
    Get,
    TryGet,
    Contains,
    ResolveWorker,
    Register(ConcurrentService),
    Describe,
}

/// Concurrent test scenario
#[derive(Debug, Arbitrary)]
struct ConcurrentScenario {
    // Literal services offered before the threads start
    initial_services: Vec<ConcurrentService>,
    // Number of threads (clamped to 1-8)
    thread_count: u8,
    // Operations per thread (clamped)
    ops_per_thread: Vec<ThreadOp>,
}

fuzz_target!(|scenario: ConcurrentScenario| {
    let container = Container::new();

    for svc in scenario.initial_services.into_iter().take(10) {
        container.bind::<ConcurrentService>().to_instance(svc);
    }
    container.bind::<SharedConfig>().to_self().singleton().unwrap();
    container.bind::<Worker>().to_self().transient().unwrap();

    let thread_count = (scenario.thread_count % 8).max(1) as usize;
    let ops = scenario.ops_per_thread;

    let handles: Vec<_> = (0..thread_count)
        .map(|_| {
            let container = container.clone();
            let ops = ops.clone();
            thread::spawn(move || {
                let mut configs = Vec::new();
                for op in ops.into_iter().take(50) {
                    match op {
                        ThreadOp::Get => configs.push(container.get::<SharedConfig>().unwrap()),
                        ThreadOp::TryGet => {
                            let _ = container.try_get::<ConcurrentService>();
                        }
                        ThreadOp::Contains => {
                            assert!(container.contains::<SharedConfig>());
                        }
                        ThreadOp::ResolveWorker => {
                            let worker = container.get::<Worker>().unwrap();
                            configs.push(worker.config.get().unwrap());
                        }
                        ThreadOp::Register(svc) => {
                            // May race with other registrations; the first one stays
                            let record = container.bind::<ConcurrentService>().to_instance(svc);
                            assert!(Arc::ptr_eq(
                                &record,
                                &container.binding::<ConcurrentService>().unwrap()
                            ));
                        }
                        ThreadOp::Describe => {
                            let _ = container.describe::<Worker>();
                        }
                    }
                }
                configs
            })
        })
        .collect();

    let configs: Vec<_> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();

    // Every thread saw the same singleton
    let singleton = container.get::<SharedConfig>().unwrap();
    assert!(configs.iter().all(|config| Arc::ptr_eq(config, &singleton)));
    assert_eq!(container.describe::<Worker>().fields().len(), 2);
});
