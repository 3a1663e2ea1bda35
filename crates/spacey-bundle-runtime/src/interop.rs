// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Interop between the two export conventions
//!
//! A namespace-style import of a module that assigned its exports directly
//! gets a namespace built by [`to_namespace`]: one lazy getter per property
//! name found on the value's user-defined levels, plus a `default` export.

use crate::async_module::map_exports;
use crate::config::BaseLevel;
use crate::exports::{Getters, install_exports};
use crate::value::{ObjectRef, Realm, Value, getter};
use std::collections::HashSet;
use std::sync::Arc;

/// Levels at which the property walk stops
#[derive(Debug, Clone, Default)]
pub struct BaseSentinels(Arc<HashSet<u64>>);

impl BaseSentinels {
    /// Sentinels for the given base levels of `realm`
    pub fn from_realm(realm: &Realm, levels: &[BaseLevel]) -> Self {
        Self(Arc::new(
            levels.iter().map(|level| realm.base(*level).id()).collect(),
        ))
    }

    /// Whether `level` is a sentinel
    pub fn contains(&self, level: &impl PropertyLevels) -> bool {
        self.0.contains(&level.level_id())
    }

    /// Number of sentinels
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the walk never stops early
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A chain of property-holding levels
pub trait PropertyLevels: Sized {
    /// Every own property name of this level, hidden ones included
    fn own_key_names(&self) -> Vec<String>;

    /// The next, less specific level
    fn parent_level(&self) -> Option<Self>;

    /// Identity used for sentinel comparison
    fn level_id(&self) -> u64;
}

impl PropertyLevels for ObjectRef {
    fn own_key_names(&self) -> Vec<String> {
        self.own_keys()
    }

    fn parent_level(&self) -> Option<Self> {
        self.prototype()
    }

    fn level_id(&self) -> u64 {
        self.id()
    }
}

fn collect_level_names<L: PropertyLevels + Clone>(start: &L, sentinels: &BaseSentinels) -> Vec<String> {
    let mut names = Vec::new();
    let mut level = Some(start.clone());
    while let Some(current) = level {
        if sentinels.contains(&current) {
            break;
        }
        names.extend(current.own_key_names());
        level = current.parent_level();
    }
    names
}

/// Build a namespace for an arbitrary exports value
///
/// Names from more specific levels win. With `allow_default` a `default`
/// getter found by the walk is kept; otherwise `default` returns `raw`
/// itself.
pub fn to_namespace(raw: &Value, allow_default: bool, sentinels: &BaseSentinels) -> ObjectRef {
    let names = match raw {
        Value::Object(obj) => collect_level_names(obj, sentinels),
        Value::View(view) => view.keys(),
        _ => Vec::new(),
    };

    let mut table = Getters::new();
    for name in names {
        if table.contains_key(&name) {
            continue;
        }
        let source = raw.clone();
        let key = name.clone();
        table.insert(name, getter(move || source.get(&key)));
    }

    if !(allow_default && table.contains_key("default")) {
        let source = raw.clone();
        table.insert("default".to_string(), getter(move || source.clone()));
    }

    tracing::trace!("Built interop namespace with {} name(s)", table.len());
    let namespace = ObjectRef::null_prototype();
    install_exports(&namespace, &table);
    namespace
}

/// Namespace for an exports value that may still be pending
///
/// Pending values yield a derived deferred value settling with the
/// namespace; async module capabilities carry over.
pub fn interop_exports(raw: &Value, sentinels: &BaseSentinels) -> Value {
    let sentinels = sentinels.clone();
    map_exports(raw, move |settled| {
        let allow_default = settled.has_module_marker();
        Value::Object(to_namespace(&settled, allow_default, &sentinels))
    })
}
