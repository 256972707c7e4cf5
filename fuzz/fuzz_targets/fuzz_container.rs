#![no_main]

//! Fuzz target for binding and resolution
//!
//! Registers bindings in arbitrary order and lifetimes, then checks the
//! lifetime guarantees on every resolution.

use arbitrary::Arbitrary;
use interject::{BindingRecord, Container, FnFactory, Inject, Lifetime, Reflect, TypeBuilder};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

#[derive(Clone, Debug, Default, Arbitrary)]
struct Config {
    timeout_ms: u32,
    tags: Vec<String>,
}

impl Reflect for Config {
    fn describe(ty: &mut TypeBuilder<Self>) {
        ty.constructor(Config::default);
    }
}

#[derive(Default)]
struct Client {
    config: Inject<Config>,
}

impl Reflect for Client {
    fn describe(ty: &mut TypeBuilder<Self>) {
        ty.constructor(Client::default).field("config", |c| &c.config);
    }
}

#[derive(Default)]
struct Gateway {
    client: Inject<Client>,
    config: Inject<Config>,
}

impl Reflect for Gateway {
    fn describe(ty: &mut TypeBuilder<Self>) {
        ty.constructor(Gateway::default)
            .field("client", |g| &g.client)
            .field("config", |g| &g.config);
    }
}

fn client_is_transient(container: &Container) -> bool {
    container
        .binding::<Client>()
        .is_some_and(|record| record.lifetime() == Lifetime::Transient)
}

/// Operations to perform on the container
#[derive(Debug, Arbitrary)]
enum ContainerOp {
    ConfigInstance(Config),
    ConfigSingleton,
    ConfigFactory(u32),
    ClientTransient,
    ClientSingleton,
    GatewayTransient,
    ResolveConfig,
    ResolveClient,
    ResolveGateway,
    InjectGateway,
    Clear,
}

fuzz_target!(|ops: Vec<ContainerOp>| {
    let container = Container::new();

    for op in ops.into_iter().take(64) {
        match op {
            ContainerOp::ConfigInstance(config) => {
                container.bind::<Config>().to_instance(config);
            }
            ContainerOp::ConfigSingleton => {
                let _ = container.bind::<Config>().to_self().singleton();
            }
            ContainerOp::ConfigFactory(timeout_ms) => {
                container
                    .bind::<Config>()
                    .to_factory_instance(FnFactory::new(move |_: &BindingRecord| {
                        Ok(Config {
                            timeout_ms,
                            tags: Vec::new(),
                        })
                    }));
            }
            ContainerOp::ClientTransient => {
                let _ = container.bind::<Client>().to_self().transient();
            }
            ContainerOp::ClientSingleton => {
                let _ = container.bind::<Client>().to_self().singleton();
            }
            ContainerOp::GatewayTransient => {
                let _ = container.bind::<Gateway>().to_self().transient();
            }
            ContainerOp::ResolveConfig => {
                let first = container.resolve::<Config>().unwrap();
                let second = container.resolve::<Config>().unwrap();
                assert_eq!(first.is_some(), container.contains::<Config>());
                if let (Some(record), Some(a), Some(b)) =
                    (container.binding::<Config>(), first, second)
                {
                    match record.lifetime() {
                        Lifetime::Instance | Lifetime::SingletonReady => {
                            assert!(Arc::ptr_eq(&a, &b));
                        }
                        _ => {}
                    }
                }
            }
            ContainerOp::ResolveClient => {
                let fresh = client_is_transient(&container);
                if let Some(client) = container.resolve::<Client>().unwrap() {
                    if fresh {
                        assert_eq!(client.config.is_set(), container.contains::<Config>());
                    }
                }
            }
            ContainerOp::ResolveGateway => {
                let fresh = client_is_transient(&container);
                if let Some(gateway) = container.resolve::<Gateway>().unwrap().filter(|_| fresh) {
                    // One traversal shares the non-singleton instances it produces
                    if let (Some(client), Some(config)) = (gateway.client.get(), gateway.config.get()) {
                        if let Some(nested) = client.config.get() {
                            assert!(Arc::ptr_eq(&nested, &config));
                        }
                    }
                }
            }
            ContainerOp::InjectGateway => {
                let gateway = Arc::new(Gateway::default());
                container.inject(&gateway).unwrap();
                assert_eq!(gateway.client.is_set(), container.contains::<Client>());
            }
            ContainerOp::Clear => {
                container.clear();
                assert!(container.is_empty());
            }
        }
    }
});
