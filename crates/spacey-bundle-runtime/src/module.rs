// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module records

use crate::error::{Result, RuntimeError};
use crate::value::Value;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Module identity as assigned by the packager
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModuleId {
    /// Numeric id (production builds)
    Number(u64),
    /// Path-like id (development builds)
    Name(String),
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleId::Number(n) => write!(f, "{}", n),
            ModuleId::Name(name) => write!(f, "{}", name),
        }
    }
}

impl From<u64> for ModuleId {
    fn from(n: u64) -> Self {
        ModuleId::Number(n)
    }
}

impl From<&str> for ModuleId {
    fn from(name: &str) -> Self {
        ModuleId::Name(name.to_string())
    }
}

impl From<String> for ModuleId {
    fn from(name: String) -> Self {
        ModuleId::Name(name)
    }
}

impl From<&ModuleId> for ModuleId {
    fn from(id: &ModuleId) -> Self {
        id.clone()
    }
}

/// Which export path a module committed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportConvention {
    /// Getters installed on the exports object (`publish_namespace`)
    Namespace,
    /// Exports replaced by an arbitrary value (`set_exports_value`)
    Value,
    /// Exports replaced by a ready-made namespace (`set_exports_as_namespace`)
    ForeignNamespace,
}

/// Shared handle to a module record
pub type ModuleRef = Arc<RwLock<Module>>;

/// Runtime record of one packaged module
#[derive(Debug)]
pub struct Module {
    /// Module id
    pub id: ModuleId,
    exports: Value,
    namespace_object: Option<Value>,
    /// Failure captured while the module initialized
    pub error: Option<RuntimeError>,
    /// Whether the module body has run
    pub loaded: bool,
    /// Modules this one imported
    pub children: Vec<ModuleId>,
    /// Modules that imported this one
    pub parents: Vec<ModuleId>,
    reexport_sources: Option<Arc<RwLock<Vec<Value>>>>,
    convention: Option<ExportConvention>,
}

impl Module {
    /// Create a record with its initial exports
    pub fn new(id: ModuleId, exports: Value) -> Self {
        Self {
            id,
            exports,
            namespace_object: None,
            error: None,
            loaded: false,
            children: Vec::new(),
            parents: Vec::new(),
            reexport_sources: None,
            convention: None,
        }
    }

    /// Wrap into a shared handle
    pub fn into_ref(self) -> ModuleRef {
        Arc::new(RwLock::new(self))
    }

    /// Current exports
    pub fn exports(&self) -> Value {
        self.exports.clone()
    }

    /// Assign exports
    ///
    /// Once the module is wrapped as an async module, its exports slot keeps
    /// pointing at the async value and plain assignments update that value's
    /// exports snapshot instead, until the async module settles.
    pub fn set_exports(&mut self, value: Value) {
        if let Value::AsyncModule(current) = &self.exports {
            if !matches!(value, Value::AsyncModule(_)) {
                current.set_exports_snapshot(value);
                return;
            }
        }
        self.exports = value;
    }

    /// The cached namespace object
    ///
    /// Async modules alias their namespace to the async exports value.
    pub fn namespace_object(&self) -> Option<Value> {
        match &self.exports {
            Value::AsyncModule(_) => Some(self.exports.clone()),
            _ => self.namespace_object.clone(),
        }
    }

    /// Cache the namespace object
    pub fn set_namespace_object(&mut self, namespace: Value) {
        if let Value::AsyncModule(current) = &self.exports {
            if !matches!(namespace, Value::AsyncModule(_)) {
                current.set_exports_snapshot(namespace);
                return;
            }
        }
        self.namespace_object = Some(namespace);
    }

    /// Commit to an export path; a module uses exactly one.
    pub fn claim_convention(&mut self, convention: ExportConvention) -> Result<()> {
        match self.convention {
            Some(existing) if existing != convention => Err(RuntimeError::type_error(format!(
                "module '{}' already exports through {:?}, cannot switch to {:?}",
                self.id, existing, convention
            ))),
            _ => {
                self.convention = Some(convention);
                Ok(())
            }
        }
    }

    /// The export path the module committed to, if any
    pub fn convention(&self) -> Option<ExportConvention> {
        self.convention
    }

    /// Re-export sources, if `merge_reexport` has run for this module
    pub fn reexport_sources(&self) -> Option<&Arc<RwLock<Vec<Value>>>> {
        self.reexport_sources.as_ref()
    }

    /// Allocate the re-export source list on first use
    ///
    /// Returns the list and whether it was created by this call.
    pub fn ensure_reexport_sources(&mut self) -> (Arc<RwLock<Vec<Value>>>, bool) {
        match &self.reexport_sources {
            Some(sources) => (Arc::clone(sources), false),
            None => {
                let sources = Arc::new(RwLock::new(Vec::new()));
                self.reexport_sources = Some(Arc::clone(&sources));
                (sources, true)
            }
        }
    }

    /// Whether the module settled its initialization (sync modules once
    /// loaded, async modules once their deferred value settled)
    pub fn is_settled(&self) -> bool {
        match self.exports.as_deferred() {
            Some(deferred) => deferred.is_settled(),
            None => self.loaded,
        }
    }
}
