// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Async module graphs driven through the in-memory registry

use parking_lot::Mutex;
use spacey_bundle_runtime::{
    BundleRegistry, BundleRuntime, Deferred, DependencyWait, ModuleId, ModuleScope, Result,
    RuntimeConfig, RuntimeError, Value, getters,
};
use std::sync::Arc;

type Seen = Arc<Mutex<Vec<(String, Result<Value>)>>>;

/// Register an async module that publishes `name`, imports `deps` and
/// completes once they settled, reading the ones listed in `reads`.
fn register_async(
    registry: &BundleRegistry,
    id: &'static str,
    deps: Vec<&'static str>,
    externals: Vec<Deferred>,
    reads: Vec<usize>,
    seen: &Seen,
) {
    let seen = Arc::clone(seen);
    registry.register(id, move |scope: &ModuleScope| {
        let inner = scope.clone();
        let deps = deps.clone();
        let externals = externals.clone();
        let reads = reads.clone();
        let seen = Arc::clone(&seen);
        scope.async_module(true, move |handle| {
            let start = || -> Result<DependencyWait> {
                inner.publish_namespace(&getters! { "name" => move || id })?;
                let mut values = Vec::new();
                for dep in &deps {
                    values.push(inner.import_namespace(*dep)?);
                }
                values.extend(externals.into_iter().map(Value::Deferred));
                Ok(handle.await_dependencies(values))
            };
            match start() {
                Ok(wait) => {
                    let done = handle.clone();
                    wait.then(move |results| {
                        let mut outcome = Ok(());
                        for index in reads {
                            let read = results.get(index);
                            if let Err(err) = &read {
                                outcome = Err(err.clone());
                            }
                            seen.lock().push((id.to_string(), read));
                        }
                        done.complete(outcome);
                    });
                }
                Err(err) => {
                    handle.complete(Err(err));
                }
            }
        });
        Ok(())
    });
}

fn settlement(registry: &BundleRegistry, id: &str) -> Option<Result<Value>> {
    let module = registry.module(&ModuleId::from(id))?;
    let exports = module.read().exports();
    exports.as_deferred()?.peek()
}

fn name_seen_by(seen: &Seen, reader: &str) -> Vec<Value> {
    seen.lock()
        .iter()
        .filter(|(id, _)| id == reader)
        .map(|(_, read)| match read {
            Ok(exports) => exports.get("name"),
            Err(err) => Value::from(err.to_string()),
        })
        .collect()
}

#[test]
fn test_two_module_cycle_settles() {
    let registry = Arc::new(BundleRegistry::new());
    let seen: Seen = Arc::default();
    let gate = Deferred::pending();
    register_async(&registry, "a", vec!["b"], vec![], vec![0], &seen);
    register_async(&registry, "b", vec!["a"], vec![gate.clone()], vec![0], &seen);
    let runtime = BundleRuntime::new(registry.clone(), RuntimeConfig::default());

    runtime.require("a").unwrap();
    assert!(settlement(&registry, "a").is_none());
    assert!(settlement(&registry, "b").is_none());

    gate.resolve(Value::Null);

    assert!(matches!(settlement(&registry, "a"), Some(Ok(_))));
    assert!(matches!(settlement(&registry, "b"), Some(Ok(_))));
    assert_eq!(name_seen_by(&seen, "a"), vec![Value::from("b")]);
    assert_eq!(name_seen_by(&seen, "b"), vec![Value::from("a")]);
}

#[test]
fn test_cycle_without_external_wait_settles_synchronously() {
    let registry = Arc::new(BundleRegistry::new());
    let seen: Seen = Arc::default();
    register_async(&registry, "a", vec!["b"], vec![], vec![0], &seen);
    register_async(&registry, "b", vec!["a"], vec![], vec![0], &seen);
    let runtime = BundleRuntime::new(registry.clone(), RuntimeConfig::default());

    runtime.require("a").unwrap();
    assert!(matches!(settlement(&registry, "a"), Some(Ok(_))));
    assert!(matches!(settlement(&registry, "b"), Some(Ok(_))));
}

#[test]
fn test_three_module_cycle_settles() {
    let registry = Arc::new(BundleRegistry::new());
    let seen: Seen = Arc::default();
    let gate = Deferred::pending();
    register_async(&registry, "a", vec!["b"], vec![], vec![0], &seen);
    register_async(&registry, "b", vec!["c"], vec![], vec![0], &seen);
    register_async(&registry, "c", vec!["a"], vec![gate.clone()], vec![0], &seen);
    let runtime = BundleRuntime::new(registry.clone(), RuntimeConfig::default());

    runtime.require("a").unwrap();
    gate.resolve(Value::Null);

    for id in ["a", "b", "c"] {
        assert!(matches!(settlement(&registry, id), Some(Ok(_))), "{} settled", id);
    }
    assert_eq!(name_seen_by(&seen, "a"), vec![Value::from("b")]);
    assert_eq!(name_seen_by(&seen, "c"), vec![Value::from("a")]);
}

#[test]
fn test_self_import_does_not_wait_on_itself() {
    let registry = Arc::new(BundleRegistry::new());
    let seen: Seen = Arc::default();
    register_async(&registry, "self", vec!["self"], vec![], vec![0], &seen);
    let runtime = BundleRuntime::new(registry.clone(), RuntimeConfig::default());

    runtime.require("self").unwrap();
    assert!(matches!(settlement(&registry, "self"), Some(Ok(_))));
    assert_eq!(name_seen_by(&seen, "self"), vec![Value::from("self")]);
}

#[test]
fn test_failure_surfaces_only_when_read() {
    let registry = Arc::new(BundleRegistry::new());
    let seen: Seen = Arc::default();
    let trigger = Deferred::pending();
    register_async(&registry, "broken", vec![], vec![trigger.clone()], vec![0], &seen);
    register_async(&registry, "reader", vec!["broken"], vec![], vec![0], &seen);
    register_async(&registry, "ignorer", vec!["broken"], vec![], vec![], &seen);
    let runtime = BundleRuntime::new(registry.clone(), RuntimeConfig::default());

    runtime.require("reader").unwrap();
    runtime.require("ignorer").unwrap();
    trigger.reject(RuntimeError::thrown("broken setup"));

    let failure = RuntimeError::thrown("broken setup");
    assert_eq!(settlement(&registry, "broken"), Some(Err(failure.clone())));
    assert_eq!(settlement(&registry, "reader"), Some(Err(failure.clone())));
    assert!(matches!(settlement(&registry, "ignorer"), Some(Ok(_))));

    let broken = registry.module(&ModuleId::from("broken")).unwrap();
    assert_eq!(broken.read().error, Some(failure.clone()));
    let ignorer = registry.module(&ModuleId::from("ignorer")).unwrap();
    assert!(ignorer.read().error.is_none());

    // Later imports re-throw the captured failure.
    let err = runtime.import_namespace(&ignorer, "broken").unwrap_err();
    assert_eq!(err, failure);
}

#[test]
fn test_all_settled_dependencies_need_no_wait() {
    let registry = Arc::new(BundleRegistry::new());
    registry.register("plain", |scope| {
        scope.publish_namespace(&getters! { "name" => || "plain" })
    });
    registry.register("quick", |scope| {
        scope.async_module(false, |handle| {
            handle.complete(Ok(()));
        });
        Ok(())
    });

    let wait = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&wait);
    registry.register("consumer", move |scope| {
        let inner = scope.clone();
        let slot = Arc::clone(&slot);
        scope.async_module(true, move |handle| {
            let deps = vec![
                inner.import_namespace("plain").unwrap_or_default(),
                inner.import_namespace("quick").unwrap_or_default(),
                Value::from(3),
                Value::Deferred(Deferred::resolved(Value::from("done"))),
            ];
            *slot.lock() = Some(handle.await_dependencies(deps));
            handle.complete(Ok(()));
        });
        Ok(())
    });
    let runtime = BundleRuntime::new(registry.clone(), RuntimeConfig::default());
    runtime.require("consumer").unwrap();

    let wait = wait.lock().take().unwrap();
    assert!(matches!(wait, DependencyWait::Ready(_)));
    let results = wait.try_results().unwrap();
    assert_eq!(results.get(0).unwrap().get("name"), Value::from("plain"));
    assert_eq!(results.get(2).unwrap(), Value::from(3));
    assert_eq!(results.get(3).unwrap(), Value::from("done"));
}

#[test]
fn test_pending_marker_can_be_awaited() {
    let registry = Arc::new(BundleRegistry::new());
    let gate = Deferred::pending();
    let remote = gate.clone();
    let wait = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&wait);
    registry.register("waiting", move |scope| {
        let remote = remote.clone();
        let slot = Arc::clone(&slot);
        scope.async_module(true, move |handle| {
            *slot.lock() = Some(handle.await_dependencies(vec![Value::Deferred(remote)]));
        });
        Ok(())
    });
    let runtime = BundleRuntime::new(registry.clone(), RuntimeConfig::default());
    runtime.require("waiting").unwrap();

    let wait = wait.lock().take().unwrap();
    assert!(wait.is_pending());
    gate.resolve(Value::from("late"));
    let results = futures::executor::block_on(wait.resolved());
    assert_eq!(results.values().unwrap(), vec![Value::from("late")]);
}

#[test]
fn test_reexports_of_async_module_reach_dependents() {
    let registry = Arc::new(BundleRegistry::new());
    let seen: Seen = Arc::default();
    let gate = Deferred::pending();
    let remote = gate.clone();
    registry.register("leaf", |scope| {
        scope.publish_namespace(&getters! { "leaf_value" => || "from leaf" })
    });
    registry.register("barrel", move |scope| {
        let inner = scope.clone();
        let remote = remote.clone();
        scope.async_module(true, move |handle| {
            let leaf = match inner.import_namespace("leaf") {
                Ok(leaf) => leaf,
                Err(err) => {
                    handle.complete(Err(err));
                    return;
                }
            };
            inner.merge_reexport(leaf);
            let done = handle.clone();
            handle
                .await_dependencies(vec![Value::Deferred(remote)])
                .then(move |_| {
                    done.complete(Ok(()));
                });
        });
        Ok(())
    });
    register_async(&registry, "user", vec!["barrel"], vec![], vec![0], &seen);
    let runtime = BundleRuntime::new(registry.clone(), RuntimeConfig::default());

    runtime.require("user").unwrap();
    gate.resolve(Value::Null);

    let reads = seen.lock();
    let (_, read) = reads.iter().find(|(id, _)| id == "user").unwrap();
    let barrel = read.as_ref().unwrap();
    assert_eq!(barrel.get("leaf_value"), Value::from("from leaf"));
    assert_eq!(barrel.keys(), vec!["leaf_value"]);
}
