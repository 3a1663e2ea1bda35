// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # spacey-bundle-runtime
//!
//! The runtime support layer every Spacey bundle carries.
//!
//! ## Overview
//!
//! Packaged modules are emitted against a fixed calling contract,
//! [`ModuleScope`], which lets a module body:
//! - declare its exports as lazily evaluated getters, or assign them directly
//! - layer `export * from` sources over its own exports
//! - import other modules in either export convention, with interop
//! - require modules through a static context map (glob imports)
//! - initialize asynchronously, including inside cyclic module graphs
//!
//! Module records come from a [`ModuleRegistry`]; [`BundleRegistry`] is the
//! in-memory implementation.
//!
//! ## Quick Start
//!
//! ```rust
//! use spacey_bundle_runtime::{BundleRegistry, BundleRuntime, RuntimeConfig, Value, getters};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(BundleRegistry::new());
//! registry.register("./answer.js", |scope| {
//!     scope.publish_namespace(&getters! { "answer" => || 42 })
//! });
//!
//! let runtime = BundleRuntime::new(registry, RuntimeConfig::default());
//! let exports = runtime.require("./answer.js").unwrap();
//! assert_eq!(exports.get("answer"), Value::from(42));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod async_module;
pub mod config;
pub mod context;
pub mod deferred;
pub mod error;
pub mod exports;
pub mod interop;
mod macros;
pub mod module;
pub mod registry;
pub mod runtime;
pub mod value;

// Re-exports for convenience
pub use async_module::{
    AsyncModuleHandle, AsyncModuleValue, DependencyResults, DependencyWait, Queue, QueueStatus,
};
pub use config::{BaseLevel, InteropConfig, RuntimeConfig};
pub use context::{ContextEntry, ContextMap, ModuleContext};
pub use deferred::{Deferred, DeferredState, Settlement};
pub use error::{Result, RuntimeError};
pub use exports::{Getters, ReexportView};
pub use module::{Module, ModuleId, ModuleRef};
pub use registry::{BundleRegistry, ModuleRegistry};
pub use runtime::{BundleRuntime, ModuleScope};
pub use value::{ObjectRef, Realm, Value};
