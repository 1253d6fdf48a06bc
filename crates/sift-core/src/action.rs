// SPDX-License-Identifier: Apache-2.0
//! Actions: external inputs staged into a change set.
use crate::changes::ChangeSet;
use crate::error::CollaboratorError;
use crate::ident::DatabaseName;
use crate::multi_index::MultiIndex;
use crate::value::Value;

/// An external input to an evaluation.
///
/// Actions run once when their work item is seeded; their whole effect is
/// a sequence of stages into the change set. The `scratch` argument is a
/// per-action binding list used by join-producing actions; the core
/// passes it empty.
pub trait Action {
    /// Stages this action's effect.
    ///
    /// # Errors
    ///
    /// Collaborator failures propagate; the work item is abandoned.
    fn execute(
        &self,
        multi: &MultiIndex,
        scratch: &mut Vec<Value>,
        changes: &mut ChangeSet,
    ) -> Result<(), CollaboratorError>;
}

/// Stages the assertion of one quad into a named database.
#[derive(Clone, Debug)]
pub struct InsertAction {
    database: DatabaseName,
    e: Value,
    a: Value,
    v: Value,
    n: Value,
}

impl InsertAction {
    /// Creates the action.
    pub fn new(
        database: impl Into<DatabaseName>,
        e: Value,
        a: Value,
        v: Value,
        n: Value,
    ) -> Self {
        Self {
            database: database.into(),
            e,
            a,
            v,
            n,
        }
    }
}

impl Action for InsertAction {
    fn execute(
        &self,
        _multi: &MultiIndex,
        _scratch: &mut Vec<Value>,
        changes: &mut ChangeSet,
    ) -> Result<(), CollaboratorError> {
        changes.store(
            &self.database,
            self.e.clone(),
            self.a.clone(),
            self.v.clone(),
            self.n.clone(),
        );
        Ok(())
    }
}

/// Stages the retraction of one quad from a named database.
#[derive(Clone, Debug)]
pub struct RemoveAction {
    database: DatabaseName,
    e: Value,
    a: Value,
    v: Value,
    n: Value,
}

impl RemoveAction {
    /// Creates the action.
    pub fn new(
        database: impl Into<DatabaseName>,
        e: Value,
        a: Value,
        v: Value,
        n: Value,
    ) -> Self {
        Self {
            database: database.into(),
            e,
            a,
            v,
            n,
        }
    }
}

impl Action for RemoveAction {
    fn execute(
        &self,
        _multi: &MultiIndex,
        _scratch: &mut Vec<Value>,
        changes: &mut ChangeSet,
    ) -> Result<(), CollaboratorError> {
        changes.unstore(
            &self.database,
            self.e.clone(),
            self.a.clone(),
            self.v.clone(),
            self.n.clone(),
        );
        Ok(())
    }
}
