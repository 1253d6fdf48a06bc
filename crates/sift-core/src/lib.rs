// SPDX-License-Identifier: Apache-2.0
//! sift-core: deterministic EAVN fact store with fixpoint block
//! evaluation.
//!
//! The crate holds a collection of databases — each a set of
//! entity–attribute–value–node quadruples — and a set of blocks
//! (compiled rules) that read from and write to them. Driving an
//! evaluation runs staged changes through commit rounds until fixpoint:
//! every block whose preconditions are met has contributed its derived
//! facts and no further changes are possible. Evaluations sharing a
//! database by name synchronize their replicas through queued commit
//! deltas.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod action;
mod block;
mod changes;
mod constants;
mod database;
mod error;
mod evaluation;
mod filter;
mod ident;
mod index;
mod multi_index;
mod runtime;
mod save;
mod telemetry;
mod value;

// Re-exports for the stable public API.
/// Action contract and the ready-made single-quad actions.
pub use action::{Action, InsertAction, RemoveAction};
/// Block descriptors and execution bodies.
pub use block::{Block, BlockBody, ExecuteFn};
/// Change sets, committed deltas, and the per-round merge view.
pub use changes::{Change, ChangeSet, DeltaEntry, Round, RoundView};
/// Canonical engine constants.
pub use constants::{MAX_ROUNDS, TAG_ATTRIBUTE};
/// Databases and their registration hooks.
pub use database::{AnalyzeFn, Database};
/// Error taxonomy.
pub use error::{CollaboratorError, EngineError};
/// Evaluations and fixpoint callbacks.
pub use evaluation::{Evaluation, FixpointCallback};
/// Activation filter: the checker seam and its canonical implementation.
pub use filter::{Checker, Scan, ScanChecker};
/// Identifier and name types.
pub use ident::{BlockId, DatabaseId, DatabaseName, EvaluationId};
/// The triple index and its lookup types.
pub use index::{Pattern, Quad, TripleIndex};
/// The named-index namespace handed to blocks.
pub use multi_index::MultiIndex;
/// The runtime container and error reporting.
pub use runtime::{ErrorReporter, Runtime};
/// Portable save/load dumps.
pub use save::{SaveDump, SavedQuad, SavedValue};
/// Optional timing hooks.
pub use telemetry::{NullPerfSink, PerfSink};
/// Scalar values and minted identifiers.
pub use value::{Digest, MintedId, Value};
