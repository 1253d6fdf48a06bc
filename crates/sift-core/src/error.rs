// SPDX-License-Identifier: Apache-2.0
//! Engine error taxonomy.
use thiserror::Error;

use crate::ident::{BlockId, DatabaseName, EvaluationId};

/// Opaque failure raised by a collaborator (a block or an action).
///
/// The core never inspects these; it abandons the current fixpoint and
/// propagates them wrapped in [`EngineError::Collaborator`].
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors emitted by the evaluation core.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Attempted to register an index under a name that is already taken.
    #[error("duplicate database name: {0}")]
    DuplicateDatabase(DatabaseName),
    /// A database name was used that is not registered in the multi-index.
    #[error("unknown database: {0}")]
    UnknownDatabase(DatabaseName),
    /// An evaluation handle did not resolve to a live evaluation.
    #[error("unknown evaluation: {0}")]
    UnknownEvaluation(EvaluationId),
    /// Attempted to unregister an evaluation that was never registered.
    #[error("evaluation {evaluation} is not registered with database {database}")]
    NotRegistered {
        /// The evaluation that was not found in the registration list.
        evaluation: EvaluationId,
        /// The database whose registration list was consulted.
        database: DatabaseName,
    },
    /// A remote response arrived for an evaluation with no in-flight item.
    #[error("evaluation {0} has no active fixpoint")]
    NoActiveFixpoint(EvaluationId),
    /// A remote response arrived for a block that is not awaited.
    #[error("remote changes delivered for block {0}, which is not awaited")]
    UnexpectedRemoteResponse(BlockId),
    /// A block or action failed internally; the fixpoint was abandoned.
    #[error("collaborator failure in {block}")]
    Collaborator {
        /// The block or action that failed ("action" for anonymous actions).
        block: BlockId,
        /// The collaborator's own error.
        #[source]
        source: CollaboratorError,
    },
    /// The persisted dump could not be encoded or decoded.
    #[error("dump codec: {0}")]
    Codec(String),
}
