// SPDX-License-Identifier: Apache-2.0
//! Block descriptors: compiled rules the evaluation executes.
use core::fmt;

use crate::changes::ChangeSet;
use crate::error::CollaboratorError;
use crate::filter::Checker;
use crate::ident::BlockId;
use crate::multi_index::MultiIndex;

/// Callback that runs a block against the committed state plus the
/// pending changes of the current round, staging any derived facts into
/// the change set. Must be deterministic given identical inputs.
///
/// Failures are the collaborator's own; the core abandons the current
/// fixpoint and propagates them.
pub type ExecuteFn = Box<dyn Fn(&MultiIndex, &mut ChangeSet) -> Result<(), CollaboratorError>>;

/// Execution body of a block: local or remote.
///
/// Both variants share the execute signature. A remote body may return
/// before its derived facts exist; the evaluation marks the block awaited
/// and a later delivery through the runtime's remote-changes entry point
/// completes the round.
pub enum BlockBody {
    /// Synchronous: derived facts are staged during the call.
    Local(ExecuteFn),
    /// Asynchronous: the call starts external work; derived facts arrive
    /// later as a delivered change set.
    Remote(ExecuteFn),
}

/// Descriptor for a compiled rule registered with a database.
///
/// Each block owns a stable identifier, a `dormant` flag excluding it
/// from execution, the activation checker that gates it on committed
/// deltas, and its execution body.
pub struct Block {
    id: BlockId,
    dormant: bool,
    checker: Box<dyn Checker>,
    body: BlockBody,
}

impl Block {
    /// Creates a local (synchronous) block.
    pub fn local(
        id: impl Into<BlockId>,
        checker: impl Checker + 'static,
        execute: impl Fn(&MultiIndex, &mut ChangeSet) -> Result<(), CollaboratorError> + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            dormant: false,
            checker: Box::new(checker),
            body: BlockBody::Local(Box::new(execute)),
        }
    }

    /// Creates a remote (asynchronous) block.
    pub fn remote(
        id: impl Into<BlockId>,
        checker: impl Checker + 'static,
        execute: impl Fn(&MultiIndex, &mut ChangeSet) -> Result<(), CollaboratorError> + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            dormant: false,
            checker: Box::new(checker),
            body: BlockBody::Remote(Box::new(execute)),
        }
    }

    /// Stable identifier of this block.
    #[must_use]
    pub fn id(&self) -> &BlockId {
        &self.id
    }

    /// True when the block is excluded from activation and execution.
    #[must_use]
    pub fn dormant(&self) -> bool {
        self.dormant
    }

    /// Sets the dormant flag.
    pub fn set_dormant(&mut self, dormant: bool) {
        self.dormant = dormant;
    }

    /// The activation checker gating this block.
    #[must_use]
    pub fn checker(&self) -> &dyn Checker {
        self.checker.as_ref()
    }

    /// True for blocks whose execution completes out of band.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self.body, BlockBody::Remote(_))
    }

    /// Runs the block's body.
    pub(crate) fn execute(
        &self,
        multi: &MultiIndex,
        changes: &mut ChangeSet,
    ) -> Result<(), CollaboratorError> {
        match &self.body {
            BlockBody::Local(f) | BlockBody::Remote(f) => f(multi, changes),
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("dormant", &self.dormant)
            .field("remote", &self.is_remote())
            .finish_non_exhaustive()
    }
}
