// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Table literal macros for module bodies.

/// Creates an export getter table from name/closure pairs.
///
/// # Example
///
/// ```
/// use spacey_bundle_runtime::{Value, getters};
///
/// let table = getters! {
///     "answer" => || 42,
///     "name" => || "spacey",
/// };
/// assert_eq!((table["answer"])(), Value::from(42));
/// ```
#[macro_export]
macro_rules! getters {
    () => {
        $crate::exports::Getters::new()
    };
    ($($key:expr => $getter:expr),+ $(,)?) => {{
        let mut table = $crate::exports::Getters::new();
        $(table.insert(::std::string::ToString::to_string(&$key), $crate::value::getter($getter));)+
        table
    }};
}

/// Creates a context map from key/module id pairs, keeping insertion order.
///
/// # Example
///
/// ```
/// use spacey_bundle_runtime::context_map;
///
/// let map = context_map! {
///     "./x.js" => 1u64,
///     "./y.js" => "y",
/// };
/// let keys: Vec<_> = map.keys().collect();
/// assert_eq!(keys, vec!["./x.js", "./y.js"]);
/// ```
#[macro_export]
macro_rules! context_map {
    () => {
        $crate::context::ContextMap::new()
    };
    ($($key:expr => $id:expr),+ $(,)?) => {{
        let mut map = $crate::context::ContextMap::new();
        $(map.insert(
            ::std::string::ToString::to_string(&$key),
            $crate::context::ContextEntry::new($id),
        );)+
        map
    }};
}

#[cfg(test)]
mod tests {
    use crate::Value;

    #[test]
    fn test_getters_empty() {
        let table = getters! {};
        assert!(table.is_empty());
    }

    #[test]
    fn test_getters_keep_order() {
        let table = getters! {
            "b" => || 2,
            "a" => || 1,
        };
        let keys: Vec<_> = table.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!((table["a"])(), Value::from(1));
    }

    #[test]
    fn test_context_map_entries() {
        let map = context_map! { "./a" => 3u64 };
        assert_eq!(map["./a"].id, crate::ModuleId::Number(3));
    }
}
