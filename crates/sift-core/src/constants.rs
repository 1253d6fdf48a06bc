// SPDX-License-Identifier: Apache-2.0
//! Canonical engine constants.

/// Divergence cap: the maximum number of fixpoint rounds one work item may
/// run before the evaluation is declared diverged and ended with its
/// partial state committed.
pub const MAX_ROUNDS: u32 = 300;

/// The distinguished attribute whose values classify an entity for the
/// block activation filter.
pub const TAG_ATTRIBUTE: &str = "tag";
