// SPDX-License-Identifier: Apache-2.0
//! Namespace of named triple indexes.
use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::ident::DatabaseName;
use crate::index::TripleIndex;

/// Mapping from database name to triple index.
///
/// Blocks receive the multi-index at execution time and address indexes
/// by name. Iteration order is deterministic (name order).
#[derive(Default, Debug)]
pub struct MultiIndex {
    indexes: BTreeMap<DatabaseName, TripleIndex>,
}

impl MultiIndex {
    /// Creates an empty namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `index` under `name`.
    ///
    /// # Errors
    ///
    /// [`EngineError::DuplicateDatabase`] when the name is already taken;
    /// the existing registration is untouched.
    pub fn register(&mut self, name: DatabaseName, index: TripleIndex) -> Result<(), EngineError> {
        if self.indexes.contains_key(&name) {
            return Err(EngineError::DuplicateDatabase(name));
        }
        self.indexes.insert(name, index);
        Ok(())
    }

    /// Removes and returns the index registered under `name`.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownDatabase`] when no index is registered under
    /// the name.
    pub fn unregister(&mut self, name: &DatabaseName) -> Result<TripleIndex, EngineError> {
        self.indexes
            .remove(name)
            .ok_or_else(|| EngineError::UnknownDatabase(name.clone()))
    }

    /// Returns the index registered under `name`, if any.
    #[must_use]
    pub fn index(&self, name: &DatabaseName) -> Option<&TripleIndex> {
        self.indexes.get(name)
    }

    /// Mutable access for commit application.
    pub(crate) fn index_mut(&mut self, name: &DatabaseName) -> Option<&mut TripleIndex> {
        self.indexes.get_mut(name)
    }

    /// Returns true when `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &DatabaseName) -> bool {
        self.indexes.contains_key(name)
    }

    /// Number of registered indexes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Iterates `(name, index)` pairs in deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = (&DatabaseName, &TripleIndex)> {
        self.indexes.iter()
    }
}
