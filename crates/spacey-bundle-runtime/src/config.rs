// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Runtime configuration

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// A base level of the object model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseLevel {
    /// The base every ordinary object inherits from
    Object,
    /// The base of arrays
    Array,
    /// The base of function objects
    Function,
}

/// Interop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteropConfig {
    /// Levels at which the property walk in `to_namespace` stops
    pub base_levels: Vec<BaseLevel>,
}

impl Default for InteropConfig {
    fn default() -> Self {
        Self {
            base_levels: vec![BaseLevel::Object, BaseLevel::Array, BaseLevel::Function],
        }
    }
}

/// Configuration for a [`BundleRuntime`](crate::BundleRuntime)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interop settings
    pub interop: InteropConfig,

    /// Log async modules that fail while nobody is observing them
    pub trace_unhandled_rejections: bool,

    /// Tracing filter directive for hosts that install a subscriber
    pub log_filter: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interop: InteropConfig::default(),
            trace_unhandled_rejections: true,
            log_filter: None,
        }
    }
}

impl RuntimeConfig {
    /// Parse configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize configuration to pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
