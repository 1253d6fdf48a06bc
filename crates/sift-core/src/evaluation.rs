// SPDX-License-Identifier: Apache-2.0
//! Evaluations and the fixpoint driver.
//!
//! An evaluation owns a multi-index, an ordered list of databases, a FIFO
//! queue of work items, and the in-flight item slot. Exactly one work
//! item is active at a time; the driver runs it through commit rounds
//! until quiescence, divergence, or suspension on remote blocks.
use std::collections::VecDeque;
use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::action::Action;
use crate::changes::{Change, ChangeSet, DeltaEntry, Round, RoundView};
use crate::constants::MAX_ROUNDS;
use crate::database::Database;
use crate::error::EngineError;
use crate::filter::{blocks_from_commit, BlockRef};
use crate::ident::{BlockId, DatabaseName, EvaluationId};
use crate::multi_index::MultiIndex;
use crate::telemetry::PerfSink;
use crate::value::Value;

/// Invoked with the final change set when a work item's fixpoint
/// completes, whether quiescent or diverged.
pub type FixpointCallback = Box<dyn FnOnce(&ChangeSet)>;

/// One queued unit of external work.
pub(crate) enum WorkItem {
    /// A committed delta from a peer evaluation, replayed here.
    Commit {
        /// The peer's net delta, restricted to shared databases.
        entries: Vec<DeltaEntry>,
    },
    /// External actions to stage, then fixpoint.
    Actions {
        /// Actions whose effects seed the change set.
        actions: Vec<Box<dyn Action>>,
        /// Pre-staged change set (used by load), or a fresh one.
        changes: Option<ChangeSet>,
        /// Completion callback.
        callback: Option<FixpointCallback>,
    },
}

/// State of the in-flight work item, preserved verbatim while the
/// evaluation is parked on remote blocks.
pub(crate) struct ActiveFixpoint {
    pub(crate) changes: ChangeSet,
    pub(crate) blocks: Vec<BlockRef>,
    pub(crate) waiting_for: FxHashMap<BlockId, bool>,
    pub(crate) waiting_count: usize,
    pub(crate) callback: Option<FixpointCallback>,
    pub(crate) started: Option<Instant>,
}

/// Outcome of driving the in-flight item as far as it can go.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum FixpointProgress {
    /// At least one remote block has not responded; the evaluation stays
    /// parked with its state intact.
    Parked,
    /// The fixpoint ended; the item is ready for fan-out and teardown.
    Finished {
        /// True when the round cap was reached with changes still
        /// pending.
        diverged: bool,
    },
}

/// A single-threaded evaluation: databases, their indexes, and the work
/// queue that serializes external input.
pub struct Evaluation {
    id: EvaluationId,
    multi: MultiIndex,
    databases: Vec<Database>,
    queue: VecDeque<WorkItem>,
    current: Option<ActiveFixpoint>,
    pub(crate) scheduled: bool,
}

impl Evaluation {
    pub(crate) fn new(id: EvaluationId) -> Self {
        Self {
            id,
            multi: MultiIndex::new(),
            databases: Vec::new(),
            queue: VecDeque::new(),
            current: None,
            scheduled: false,
        }
    }

    /// Process-local handle of this evaluation.
    #[must_use]
    pub fn id(&self) -> EvaluationId {
        self.id
    }

    /// The evaluation's multi-index.
    #[must_use]
    pub fn multi_index(&self) -> &MultiIndex {
        &self.multi
    }

    /// The ordered database list.
    #[must_use]
    pub fn databases(&self) -> &[Database] {
        &self.databases
    }

    /// Looks up a database by name.
    #[must_use]
    pub fn database(&self, name: &DatabaseName) -> Option<&Database> {
        self.databases.iter().find(|db| db.name() == name)
    }

    /// Number of work items waiting in the queue (the in-flight item is
    /// not counted).
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// True when a work item is parked awaiting remote blocks.
    #[must_use]
    pub fn is_parked(&self) -> bool {
        self.current.is_some()
    }

    /// Round counter of the parked work item, if any.
    #[must_use]
    pub fn parked_round(&self) -> Option<Round> {
        self.current.as_ref().map(|cur| cur.changes.round())
    }

    /// Number of remote blocks the parked work item is awaiting (zero
    /// when idle).
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.current.as_ref().map_or(0, |cur| cur.waiting_count)
    }

    pub(crate) fn multi_mut(&mut self) -> &mut MultiIndex {
        &mut self.multi
    }

    pub(crate) fn databases_mut(&mut self) -> &mut Vec<Database> {
        &mut self.databases
    }

    pub(crate) fn enqueue(&mut self, item: WorkItem) {
        self.queue.push_back(item);
    }

    pub(crate) fn next_item(&mut self) -> Option<WorkItem> {
        self.queue.pop_front()
    }

    pub(crate) fn take_current(&mut self) -> Option<ActiveFixpoint> {
        self.current.take()
    }

    pub(crate) fn clear_current(&mut self) {
        self.current = None;
    }

    /// Seeds a work item into the in-flight slot and drives it.
    pub(crate) fn begin(
        &mut self,
        item: WorkItem,
        reporter: &mut dyn FnMut(&str, &str),
        perf: Option<&dyn PerfSink>,
    ) -> Result<FixpointProgress, EngineError> {
        debug_assert!(self.current.is_none(), "one work item active at a time");
        let (mut changes, callback) = match item {
            WorkItem::Actions {
                actions,
                changes,
                callback,
            } => {
                let mut changes = changes.unwrap_or_default();
                let mut scratch: Vec<Value> = Vec::new();
                for action in &actions {
                    action
                        .execute(&self.multi, &mut scratch, &mut changes)
                        .map_err(|source| EngineError::Collaborator {
                            block: BlockId::from("action"),
                            source,
                        })?;
                }
                (changes, callback)
            }
            WorkItem::Commit { entries } => {
                let mut changes = ChangeSet::new();
                for entry in entries {
                    let DeltaEntry {
                        database,
                        change,
                        e,
                        a,
                        v,
                        n,
                        ..
                    } = entry;
                    match change {
                        Change::Insert => changes.store(&database, e, a, v, n),
                        Change::Remove => changes.unstore(&database, e, a, v, n),
                    }
                }
                (changes, None)
            }
        };
        changes.commit(&mut self.multi)?;
        let blocks = {
            let view = RoundView::new(&self.multi, &changes);
            blocks_from_commit(&self.databases, changes.last_commit(), &view)
        };
        tracing::debug!(
            evaluation = %self.id,
            seed = changes.last_commit().len(),
            blocks = blocks.len(),
            "work item seeded"
        );
        self.current = Some(ActiveFixpoint {
            changes,
            blocks,
            waiting_for: FxHashMap::default(),
            waiting_count: 0,
            callback,
            started: perf.map(|_| Instant::now()),
        });
        self.run_rounds(reporter, perf)
    }

    /// Runs commit rounds until quiescence, divergence, or suspension.
    fn run_rounds(
        &mut self,
        reporter: &mut dyn FnMut(&str, &str),
        perf: Option<&dyn PerfSink>,
    ) -> Result<FixpointProgress, EngineError> {
        let Self {
            id,
            multi,
            databases,
            current,
            ..
        } = self;
        let Some(cur) = current.as_mut() else {
            return Err(EngineError::NoActiveFixpoint(*id));
        };
        loop {
            if !cur.changes.changed() {
                tracing::debug!(evaluation = %id, rounds = cur.changes.round(), "fixpoint reached");
                return Ok(FixpointProgress::Finished { diverged: false });
            }
            if cur.changes.round() >= MAX_ROUNDS {
                tracing::warn!(evaluation = %id, rounds = cur.changes.round(), "fixpoint diverged");
                reporter(
                    "Fixpoint Error",
                    &format!("evaluation {id} exceeded {MAX_ROUNDS} rounds without quiescing"),
                );
                return Ok(FixpointProgress::Finished { diverged: true });
            }
            let round = cur.changes.next_round();
            tracing::debug!(evaluation = %id, round, blocks = cur.blocks.len(), "round started");
            cur.waiting_for.clear();
            cur.waiting_count = 0;
            for bref in &cur.blocks {
                let block = &databases[bref.db].blocks()[bref.block];
                if block.is_remote() {
                    cur.waiting_for.insert(block.id().clone(), true);
                    cur.waiting_count += 1;
                }
                let t0 = perf.map(|_| Instant::now());
                block
                    .execute(multi, &mut cur.changes)
                    .map_err(|source| EngineError::Collaborator {
                        block: block.id().clone(),
                        source,
                    })?;
                if let (Some(sink), Some(t0)) = (perf, t0) {
                    sink.block_executed(block.id(), t0.elapsed());
                }
            }
            if cur.waiting_count > 0 {
                tracing::debug!(
                    evaluation = %id,
                    round,
                    awaiting = cur.waiting_count,
                    "parked on remote blocks"
                );
                return Ok(FixpointProgress::Parked);
            }
            cur.changes.commit(multi)?;
            let next = {
                let view = RoundView::new(multi, &cur.changes);
                blocks_from_commit(databases, cur.changes.last_commit(), &view)
            };
            cur.blocks = next;
        }
    }

    /// Merges a remote block's delivered changes into the parked item.
    /// Returns true when the last awaited response has arrived and the
    /// driver should resume.
    pub(crate) fn deliver_remote(
        &mut self,
        block: &BlockId,
        delivered: ChangeSet,
    ) -> Result<bool, EngineError> {
        let Some(cur) = self.current.as_mut() else {
            return Err(EngineError::NoActiveFixpoint(self.id));
        };
        match cur.waiting_for.get_mut(block) {
            Some(flag) if *flag => *flag = false,
            _ => return Err(EngineError::UnexpectedRemoteResponse(block.clone())),
        }
        cur.changes.merge_round(delivered);
        cur.waiting_count -= 1;
        tracing::debug!(
            evaluation = %self.id,
            block = %block,
            remaining = cur.waiting_count,
            "remote changes delivered"
        );
        Ok(cur.waiting_count == 0)
    }

    /// Commits the merged round and resumes the driver after the last
    /// awaited remote response.
    pub(crate) fn resume(
        &mut self,
        reporter: &mut dyn FnMut(&str, &str),
        perf: Option<&dyn PerfSink>,
    ) -> Result<FixpointProgress, EngineError> {
        {
            let Self {
                id,
                multi,
                databases,
                current,
                ..
            } = self;
            let Some(cur) = current.as_mut() else {
                return Err(EngineError::NoActiveFixpoint(*id));
            };
            cur.changes.commit(multi)?;
            let next = {
                let view = RoundView::new(multi, &cur.changes);
                blocks_from_commit(databases, cur.changes.last_commit(), &view)
            };
            cur.blocks = next;
        }
        self.run_rounds(reporter, perf)
    }
}

impl core::fmt::Debug for Evaluation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Evaluation")
            .field("id", &self.id)
            .field("databases", &self.databases.len())
            .field("queued", &self.queue.len())
            .field("parked", &self.current.is_some())
            .finish_non_exhaustive()
    }
}
