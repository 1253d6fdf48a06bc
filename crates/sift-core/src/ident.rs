// SPDX-License-Identifier: Apache-2.0
//! Identifier types and process-local minting.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_EVALUATION_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_DATABASE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-local handle for an evaluation.
///
/// Minted from a process-wide counter. Handles are ephemeral: they are
/// never serialized and carry no meaning outside the minting process.
/// Databases hold these as weak back-references to the evaluations they
/// are registered with.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EvaluationId(u64);

impl EvaluationId {
    /// Mints a fresh, process-unique evaluation handle.
    pub(crate) fn mint() -> Self {
        Self(NEXT_EVALUATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value of this handle.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EvaluationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eval|{}", self.0)
    }
}

/// Process-local handle for a database instance.
///
/// Like [`EvaluationId`], minted from a process-wide counter and never
/// serialized. Sharing between evaluations is keyed by [`DatabaseName`],
/// not by this handle.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DatabaseId(u64);

impl DatabaseId {
    /// Mints a fresh, process-unique database handle.
    pub(crate) fn mint() -> Self {
        Self(NEXT_DATABASE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value of this handle.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "db|{}", self.0)
    }
}

/// Name under which a database (and its triple index) is registered.
///
/// Two databases with the same name registered in distinct evaluations are
/// considered shared: commits to one are propagated to the others on
/// fixpoint. Names are cheap to clone and totally ordered so they can key
/// the engine's deterministic maps.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DatabaseName(Arc<str>);

impl DatabaseName {
    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DatabaseName {
    fn from(name: &str) -> Self {
        Self(Arc::from(name))
    }
}

impl From<String> for DatabaseName {
    fn from(name: String) -> Self {
        Self(Arc::from(name.as_str()))
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier for a block, supplied by the block author.
///
/// Block ids key the remote-wait map and appear in diagnostics; they must
/// be unique within an evaluation and stable across runs of the same
/// program.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockId(Arc<str>);

impl BlockId {
    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BlockId {
    fn from(id: &str) -> Self {
        Self(Arc::from(id))
    }
}

impl From<String> for BlockId {
    fn from(id: String) -> Self {
        Self(Arc::from(id.as_str()))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
