// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Bundle manifests
//!
//! A manifest describes packaged modules declaratively: what each one
//! exports, what it imports, and whether it initializes asynchronously. The
//! harness turns every entry into a module factory and registers it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use spacey_bundle_runtime::value::getter;
use spacey_bundle_runtime::{
    BundleRegistry, ContextEntry, ContextMap, Deferred, DependencyResults, Getters, ModuleId,
    ModuleScope, ObjectRef, Realm, Result, RuntimeError, Value,
};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Export path a manifest module uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Convention {
    /// Lazy getters on the exports object
    #[default]
    Namespace,
    /// Exports replaced by a plain object
    Value,
    /// Exports replaced by a marked, ready-made namespace
    ForeignNamespace,
}

/// One packaged module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleDecl {
    /// Export path
    pub convention: Convention,
    /// Exported names and their values
    pub exports: serde_json::Map<String, serde_json::Value>,
    /// Namespace-style imports
    pub imports: Vec<String>,
    /// Foreign-convention imports
    pub requires: Vec<String>,
    /// `export * from` sources
    pub reexports: Vec<String>,
    /// Static context map, required key by key
    pub context: IndexMap<String, String>,
    /// Wrap as an async module
    #[serde(rename = "async")]
    pub is_async: bool,
    /// Suspend on an external step before completing (async modules only)
    pub suspend: bool,
    /// Fail initialization with this message
    pub throws: Option<String>,
}

/// A whole bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Module loaded first
    pub entry: String,
    /// Modules by id
    pub modules: IndexMap<String, ModuleDecl>,
}

impl Manifest {
    /// Parse a manifest from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Ids referenced somewhere but never defined
    pub fn dangling_references(&self) -> Vec<String> {
        let mut missing = Vec::new();
        let referenced = self.modules.values().flat_map(|decl| {
            decl.imports
                .iter()
                .chain(&decl.requires)
                .chain(&decl.reexports)
                .chain(decl.context.values())
        });
        let referenced = std::iter::once(&self.entry).chain(referenced);
        for id in referenced {
            if !self.modules.contains_key(id) && !missing.contains(id) {
                missing.push(id.clone());
            }
        }
        missing
    }

    /// Register a factory for every module
    pub fn register_all(&self, registry: &BundleRegistry, rt: &Handle) {
        for (id, decl) in &self.modules {
            register_module(registry, id, Arc::new(decl.clone()), rt.clone());
        }
    }
}

/// Convert JSON into a runtime value created in `realm`
pub fn json_to_value(realm: &Realm, json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::Object(
            realm.new_array(items.iter().map(|item| json_to_value(realm, item))),
        ),
        serde_json::Value::Object(map) => Value::Object(object_from_map(realm, map)),
    }
}

fn object_from_map(realm: &Realm, map: &serde_json::Map<String, serde_json::Value>) -> ObjectRef {
    let obj = realm.new_object();
    for (key, value) in map {
        obj.set(key.clone(), json_to_value(realm, value));
    }
    obj
}

/// Dependencies a module body collected before waiting
struct Collected {
    deps: Vec<Value>,
    deferred_reexports: Vec<usize>,
}

fn publish(scope: &ModuleScope, decl: &ModuleDecl) -> Result<()> {
    let realm = scope.realm();
    match decl.convention {
        Convention::Namespace => {
            let mut table = Getters::new();
            for (name, json) in &decl.exports {
                let value = json_to_value(realm, json);
                table.insert(name.clone(), getter(move || value.clone()));
            }
            scope.publish_namespace(&table)
        }
        Convention::Value => {
            scope.set_exports_value(Value::Object(object_from_map(realm, &decl.exports)))
        }
        Convention::ForeignNamespace => {
            let namespace = object_from_map(realm, &decl.exports);
            namespace.define_hidden(spacey_bundle_runtime::exports::MODULE_MARKER, true);
            scope.set_exports_as_namespace(Value::Object(namespace))
        }
    }
}

fn collect(scope: &ModuleScope, decl: &ModuleDecl) -> Result<Collected> {
    publish(scope, decl)?;

    let mut deps = Vec::new();
    let mut deferred_reexports = Vec::new();
    for id in &decl.imports {
        deps.push(scope.import_namespace(id.as_str())?);
    }
    for id in &decl.requires {
        deps.push(scope.import_common_js(id.as_str())?);
    }
    for id in &decl.reexports {
        let source = scope.import_namespace(id.as_str())?;
        if source.is_deferred() {
            deferred_reexports.push(deps.len());
        } else {
            scope.merge_reexport(source.clone());
        }
        deps.push(source);
    }
    if !decl.context.is_empty() {
        let map: ContextMap = decl
            .context
            .iter()
            .map(|(key, id)| (key.clone(), ContextEntry::new(id.as_str())))
            .collect();
        let context = scope.build_context(map);
        for key in context.keys() {
            deps.push(context.call(&key)?);
        }
    }
    Ok(Collected {
        deps,
        deferred_reexports,
    })
}

fn thrown(decl: &ModuleDecl) -> Result<()> {
    match &decl.throws {
        Some(message) => Err(RuntimeError::thrown(message.clone())),
        None => Ok(()),
    }
}

fn finish(
    scope: &ModuleScope,
    decl: &ModuleDecl,
    reexports: &[usize],
    results: &DependencyResults,
) -> Result<()> {
    results.values()?;
    for index in reexports {
        scope.merge_reexport(results.get(*index)?);
    }
    thrown(decl)
}

fn register_module(registry: &BundleRegistry, id: &str, decl: Arc<ModuleDecl>, rt: Handle) {
    registry.register(ModuleId::from(id), move |scope: &ModuleScope| {
        if !decl.is_async {
            collect(scope, &decl)?;
            return thrown(&decl);
        }

        let inner = scope.clone();
        let decl = Arc::clone(&decl);
        let rt = rt.clone();
        scope.async_module(true, move |handle| {
            let Collected {
                mut deps,
                deferred_reexports,
            } = match collect(&inner, &decl) {
                Ok(collected) => collected,
                Err(err) => {
                    handle.complete(Err(err));
                    return;
                }
            };

            if decl.suspend {
                let step = Deferred::pending();
                let remote = step.clone();
                rt.spawn(async move {
                    tokio::task::yield_now().await;
                    remote.resolve(Value::Undefined);
                });
                deps.push(Value::Deferred(step));
            }

            let done = handle.clone();
            handle.await_dependencies(deps).then(move |results| {
                done.complete(finish(&inner, &decl, &deferred_reexports, &results));
            });
        });
        Ok(())
    });
}
