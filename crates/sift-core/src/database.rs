// SPDX-License-Identifier: Apache-2.0
//! Databases: the ownership boundary for blocks and their facts.
use core::fmt;

use crate::block::Block;
use crate::changes::DeltaEntry;
use crate::error::EngineError;
use crate::ident::{DatabaseId, DatabaseName, EvaluationId};
use crate::index::Quad;
use crate::multi_index::MultiIndex;

/// Hook invoked pairwise when a database is registered into an
/// evaluation: once for each (new, existing) ordered pair, in both
/// directions. Domain databases use it to inspect their neighbours; the
/// core treats it as a no-op when absent.
pub type AnalyzeFn = Box<dyn Fn(EvaluationId, &Database)>;

/// A named, long-lived collection of blocks over one triple index.
///
/// The index itself is registered in the owning evaluation's multi-index
/// under the database name. Two databases with the same name registered
/// in distinct evaluations are shared: each evaluation holds its own
/// index replica and commits are propagated by name on fixpoint.
pub struct Database {
    id: DatabaseId,
    name: DatabaseName,
    blocks: Vec<Block>,
    non_executing: bool,
    registered: Vec<EvaluationId>,
    analyze: Option<AnalyzeFn>,
}

impl Database {
    /// Creates an empty database with the given name.
    pub fn new(name: impl Into<DatabaseName>) -> Self {
        Self {
            id: DatabaseId::mint(),
            name: name.into(),
            blocks: Vec::new(),
            non_executing: false,
            registered: Vec::new(),
            analyze: None,
        }
    }

    /// Process-local handle of this database instance.
    #[must_use]
    pub fn id(&self) -> DatabaseId {
        self.id
    }

    /// Name the database (and its index) is registered under.
    #[must_use]
    pub fn name(&self) -> &DatabaseName {
        &self.name
    }

    /// Appends a block to the ordered block list.
    pub fn add_block(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// Adds a block, builder style.
    #[must_use]
    pub fn with_block(mut self, block: Block) -> Self {
        self.add_block(block);
        self
    }

    /// The ordered block list.
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Mutable access to the ordered block list (e.g. to toggle a
    /// block's dormant flag).
    pub fn blocks_mut(&mut self) -> &mut [Block] {
        &mut self.blocks
    }

    /// True when this database's blocks are excluded from activation.
    #[must_use]
    pub fn non_executing(&self) -> bool {
        self.non_executing
    }

    /// Sets the non-executing flag.
    pub fn set_non_executing(&mut self, non_executing: bool) {
        self.non_executing = non_executing;
    }

    /// Marks the database non-executing, builder style.
    #[must_use]
    pub fn non_executing_database(mut self) -> Self {
        self.non_executing = true;
        self
    }

    /// Installs the pairwise analyze hook.
    pub fn set_analyze(&mut self, analyze: AnalyzeFn) {
        self.analyze = Some(analyze);
    }

    /// Evaluations this database instance is registered with.
    #[must_use]
    pub fn registered(&self) -> &[EvaluationId] {
        &self.registered
    }

    /// Records a registration. Registering the same evaluation twice is a
    /// no-op.
    pub(crate) fn register(&mut self, evaluation: EvaluationId) {
        if !self.registered.contains(&evaluation) {
            self.registered.push(evaluation);
        }
    }

    /// Removes a registration.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotRegistered`] when the evaluation was never
    /// registered.
    pub(crate) fn unregister(&mut self, evaluation: EvaluationId) -> Result<(), EngineError> {
        match self.registered.iter().position(|id| *id == evaluation) {
            Some(at) => {
                self.registered.remove(at);
                Ok(())
            }
            None => Err(EngineError::NotRegistered {
                evaluation,
                database: self.name.clone(),
            }),
        }
    }

    /// Runs the analyze hook against `other`, when installed.
    pub(crate) fn run_analyze(&self, evaluation: EvaluationId, other: &Database) {
        if let Some(analyze) = &self.analyze {
            analyze(evaluation, other);
        }
    }

    /// Packages the portion of a committed delta belonging to this
    /// database, for delivery to peer evaluations on fixpoint.
    pub(crate) fn fixpoint_slice(&self, net: &[DeltaEntry]) -> Vec<DeltaEntry> {
        net.iter()
            .filter(|entry| entry.database == self.name)
            .cloned()
            .collect()
    }

    /// Dumps this database's quads from the owning evaluation's
    /// multi-index. Empty when the index is not registered.
    #[must_use]
    pub fn to_triples(&self, multi: &MultiIndex) -> Vec<Quad> {
        multi
            .index(&self.name)
            .map(|index| index.quads().collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("blocks", &self.blocks.len())
            .field("non_executing", &self.non_executing)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn unregistering_an_unknown_evaluation_is_rejected() {
        let mut db = Database::new("main");
        let eval = EvaluationId::mint();
        db.register(eval);
        db.register(eval);
        assert_eq!(db.registered().len(), 1);
        db.unregister(eval).unwrap();
        assert!(matches!(
            db.unregister(eval),
            Err(EngineError::NotRegistered { .. })
        ));
    }
}
