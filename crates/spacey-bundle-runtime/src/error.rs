// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the bundle runtime

use crate::module::ModuleId;
use thiserror::Error;

/// Result type for bundle runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while wiring up bundled modules
///
/// Errors are `Clone` because a failure captured on a module record is
/// re-thrown on every later import of that module.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// Module id unknown to the registry
    #[error("Cannot find module '{0}'")]
    ModuleNotFound(ModuleId),

    /// Key missing from a context map
    #[error("Cannot find module '{0}'")]
    ContextKeyNotFound(String),

    /// Failure raised by a module body, synchronously or through its
    /// async completion
    #[error("{0}")]
    Thrown(String),

    /// The calling contract was violated
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Invalid runtime configuration
    #[error("Invalid runtime configuration: {0}")]
    Config(String),
}

impl RuntimeError {
    /// Create a module not found error
    pub fn module_not_found(id: impl Into<ModuleId>) -> Self {
        Self::ModuleNotFound(id.into())
    }

    /// Create an error as thrown by module code
    pub fn thrown(msg: impl Into<String>) -> Self {
        Self::Thrown(msg.into())
    }

    /// Create a new TypeError
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Whether this is a lookup failure (unknown module id or context key)
    pub fn is_lookup_error(&self) -> bool {
        matches!(self, Self::ModuleNotFound(_) | Self::ContextKeyNotFound(_))
    }

    /// The `code` property Node-style loaders attach to lookup failures
    pub fn code(&self) -> Option<&'static str> {
        self.is_lookup_error().then_some("MODULE_NOT_FOUND")
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
