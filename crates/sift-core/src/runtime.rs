// SPDX-License-Identifier: Apache-2.0
//! The runtime: owner of evaluations, cross-evaluation propagation, and
//! the deferred drain.
//!
//! The runtime is single-threaded and cooperative. Work items are
//! serialized per evaluation; cross-evaluation delivery happens only via
//! queued commit items, never direct mutation. [`Runtime::run_until_idle`]
//! is the platform realization of the "run after the current turn
//! completes" deferral the evaluation queue requires.
use std::collections::{BTreeMap, VecDeque};
use std::io::Write as _;
use std::sync::Arc;

use crate::action::Action;
use crate::changes::{ChangeSet, DeltaEntry};
use crate::database::Database;
use crate::error::EngineError;
use crate::evaluation::{Evaluation, FixpointCallback, FixpointProgress, WorkItem};
use crate::ident::{BlockId, DatabaseId, DatabaseName, EvaluationId};
use crate::index::TripleIndex;
use crate::save::SaveDump;
use crate::telemetry::PerfSink;

/// Callback receiving `(kind, message)` for reportable, non-fatal engine
/// errors (today: fixpoint divergence). The default reporter writes to
/// the standard error stream.
pub type ErrorReporter = Box<dyn FnMut(&str, &str)>;

fn stderr_reporter() -> ErrorReporter {
    Box::new(|kind, message| {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{kind}: {message}");
    })
}

/// Single-threaded container for evaluations sharing databases by name.
pub struct Runtime {
    evaluations: BTreeMap<EvaluationId, Evaluation>,
    /// Shared-name registration table: database name to the evaluations
    /// holding a replica. These are the weak back-references a database
    /// resolves when delivering fixpoint notifications.
    registry: BTreeMap<DatabaseName, Vec<EvaluationId>>,
    /// Evaluations marked for a deferred drain.
    pending: VecDeque<EvaluationId>,
    reporter: ErrorReporter,
    perf: Option<Arc<dyn PerfSink>>,
}

impl Runtime {
    /// Creates an empty runtime with the standard-error reporter and no
    /// timing sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            evaluations: BTreeMap::new(),
            registry: BTreeMap::new(),
            pending: VecDeque::new(),
            reporter: stderr_reporter(),
            perf: None,
        }
    }

    /// Replaces the error reporter.
    pub fn set_error_reporter(&mut self, reporter: ErrorReporter) {
        self.reporter = reporter;
    }

    /// Installs a timing sink. Timings are captured only while a sink is
    /// installed.
    pub fn set_perf_sink(&mut self, sink: Arc<dyn PerfSink>) {
        self.perf = Some(sink);
    }

    /// Creates a fresh evaluation and returns its handle.
    pub fn create_evaluation(&mut self) -> EvaluationId {
        let id = EvaluationId::mint();
        self.evaluations.insert(id, Evaluation::new(id));
        tracing::debug!(evaluation = %id, "evaluation created");
        id
    }

    /// Looks up an evaluation by handle.
    #[must_use]
    pub fn evaluation(&self, evaluation: EvaluationId) -> Option<&Evaluation> {
        self.evaluations.get(&evaluation)
    }

    /// Registers `database` (and a fresh index under its name) with an
    /// evaluation. The analyze hook runs pairwise against every database
    /// already registered there, in both directions.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownEvaluation`] for a dead handle;
    /// [`EngineError::DuplicateDatabase`] when the evaluation already has
    /// a database under that name.
    pub fn register_database(
        &mut self,
        evaluation: EvaluationId,
        mut database: Database,
    ) -> Result<DatabaseId, EngineError> {
        let eval = self
            .evaluations
            .get_mut(&evaluation)
            .ok_or(EngineError::UnknownEvaluation(evaluation))?;
        let name = database.name().clone();
        eval.multi_mut().register(name.clone(), TripleIndex::new())?;
        database.register(evaluation);
        for existing in eval.databases() {
            existing.run_analyze(evaluation, &database);
            database.run_analyze(evaluation, existing);
        }
        let id = database.id();
        eval.databases_mut().push(database);
        self.registry.entry(name.clone()).or_default().push(evaluation);
        tracing::debug!(evaluation = %evaluation, database = %name, "database registered");
        Ok(id)
    }

    /// Unregisters the database named `name` from an evaluation and
    /// returns it (with its blocks).
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownEvaluation`] for a dead handle;
    /// [`EngineError::UnknownDatabase`] when no database is registered
    /// under the name; [`EngineError::NotRegistered`] when the database's
    /// registration list does not contain the evaluation.
    pub fn unregister_database(
        &mut self,
        evaluation: EvaluationId,
        name: &DatabaseName,
    ) -> Result<Database, EngineError> {
        let eval = self
            .evaluations
            .get_mut(&evaluation)
            .ok_or(EngineError::UnknownEvaluation(evaluation))?;
        let at = eval
            .databases()
            .iter()
            .position(|db| db.name() == name)
            .ok_or_else(|| EngineError::UnknownDatabase(name.clone()))?;
        eval.databases_mut()[at].unregister(evaluation)?;
        let database = eval.databases_mut().remove(at);
        eval.multi_mut().unregister(name)?;
        let drop_entry = self.registry.get_mut(name).is_some_and(|ids| {
            ids.retain(|id| *id != evaluation);
            ids.is_empty()
        });
        if drop_entry {
            self.registry.remove(name);
        }
        tracing::debug!(evaluation = %evaluation, database = %name, "database unregistered");
        Ok(database)
    }

    /// Enqueues external actions for an evaluation and marks it for a
    /// deferred drain. The standard entry point for external input.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownEvaluation`] for a dead handle.
    pub fn execute_actions(
        &mut self,
        evaluation: EvaluationId,
        actions: Vec<Box<dyn Action>>,
    ) -> Result<(), EngineError> {
        self.execute_actions_with(evaluation, actions, None, None)
    }

    /// [`Self::execute_actions`] with a pre-staged change set and/or a
    /// completion callback. The callback runs with the final change set
    /// when the item's fixpoint ends, quiescent or diverged.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownEvaluation`] for a dead handle.
    pub fn execute_actions_with(
        &mut self,
        evaluation: EvaluationId,
        actions: Vec<Box<dyn Action>>,
        changes: Option<ChangeSet>,
        callback: Option<FixpointCallback>,
    ) -> Result<(), EngineError> {
        let eval = self
            .evaluations
            .get_mut(&evaluation)
            .ok_or(EngineError::UnknownEvaluation(evaluation))?;
        eval.enqueue(WorkItem::Actions {
            actions,
            changes,
            callback,
        });
        tracing::trace!(evaluation = %evaluation, queued = eval.queued(), "actions queued");
        self.schedule(evaluation);
        Ok(())
    }

    /// Delivers a remote block's derived changes to its parked
    /// evaluation. When the last awaited response arrives, the merged
    /// round is committed and the fixpoint driver resumes inline.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownEvaluation`] for a dead handle;
    /// [`EngineError::NoActiveFixpoint`] when nothing is in flight;
    /// [`EngineError::UnexpectedRemoteResponse`] when the block is not
    /// awaited; collaborator failures from resumed blocks propagate after
    /// the fixpoint is abandoned.
    pub fn on_remote_changes(
        &mut self,
        evaluation: EvaluationId,
        block: &BlockId,
        changes: ChangeSet,
    ) -> Result<(), EngineError> {
        let ready = self
            .evaluations
            .get_mut(&evaluation)
            .ok_or(EngineError::UnknownEvaluation(evaluation))?
            .deliver_remote(block, changes)?;
        if !ready {
            return Ok(());
        }
        let progress = {
            let Self {
                evaluations,
                reporter,
                perf,
                ..
            } = self;
            let Some(eval) = evaluations.get_mut(&evaluation) else {
                return Err(EngineError::UnknownEvaluation(evaluation));
            };
            eval.resume(&mut **reporter, perf.as_deref())
        };
        self.settle(evaluation, progress)
    }

    /// Drains every marked evaluation: one work item at a time, each run
    /// to fixpoint (possibly parking on remote blocks), re-marking
    /// evaluations whose queues are still non-empty. Returns when no
    /// deferred work remains.
    ///
    /// # Errors
    ///
    /// The first collaborator or precondition failure aborts the drain;
    /// the failing evaluation's in-flight slot is cleared so later work
    /// items can proceed on the next drain.
    pub fn run_until_idle(&mut self) -> Result<(), EngineError> {
        while let Some(evaluation) = self.pending.pop_front() {
            let item = {
                let Some(eval) = self.evaluations.get_mut(&evaluation) else {
                    continue;
                };
                eval.scheduled = false;
                if eval.is_parked() {
                    continue;
                }
                match eval.next_item() {
                    Some(item) => item,
                    None => continue,
                }
            };
            let progress = {
                let Self {
                    evaluations,
                    reporter,
                    perf,
                    ..
                } = self;
                let Some(eval) = evaluations.get_mut(&evaluation) else {
                    continue;
                };
                eval.begin(item, &mut **reporter, perf.as_deref())
            };
            self.settle(evaluation, progress)?;
        }
        Ok(())
    }

    /// Dumps every database of an evaluation as portable quad sequences.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownEvaluation`] for a dead handle.
    pub fn save(&self, evaluation: EvaluationId) -> Result<SaveDump, EngineError> {
        let eval = self
            .evaluations
            .get(&evaluation)
            .ok_or(EngineError::UnknownEvaluation(evaluation))?;
        Ok(SaveDump::capture(eval))
    }

    /// Stages every quad of `dump` as an insertion in a fresh change set
    /// and enqueues a fixpoint over it. Identifiers are re-minted from
    /// their parts. The dump's databases must already be registered with
    /// the evaluation; unknown names surface as
    /// [`EngineError::UnknownDatabase`] from the drain.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownEvaluation`] for a dead handle.
    pub fn load(&mut self, evaluation: EvaluationId, dump: &SaveDump) -> Result<(), EngineError> {
        let changes = dump.stage();
        self.execute_actions_with(evaluation, Vec::new(), Some(changes), None)
    }

    /// Common teardown for a driven work item: clear the slot on failure,
    /// fan out and finish on completion.
    fn settle(
        &mut self,
        evaluation: EvaluationId,
        progress: Result<FixpointProgress, EngineError>,
    ) -> Result<(), EngineError> {
        match progress {
            Ok(FixpointProgress::Parked) => Ok(()),
            Ok(FixpointProgress::Finished { diverged }) => {
                self.finish(evaluation, diverged);
                Ok(())
            }
            Err(err) => {
                let queued = self.evaluations.get_mut(&evaluation).is_some_and(|eval| {
                    eval.clear_current();
                    eval.queued() > 0
                });
                if queued {
                    self.schedule(evaluation);
                }
                Err(err)
            }
        }
    }

    /// Fixpoint teardown: package each database's slice of the net delta
    /// for every peer evaluation sharing its name, enqueue the commits,
    /// invoke the callback with the final change set, and clear the
    /// in-flight slot.
    fn finish(&mut self, evaluation: EvaluationId, diverged: bool) {
        let Some(eval) = self.evaluations.get_mut(&evaluation) else {
            return;
        };
        let Some(cur) = eval.take_current() else {
            return;
        };
        let net = cur.changes.net_delta();
        let mut deliveries: Vec<(EvaluationId, Vec<DeltaEntry>)> = Vec::new();
        for database in eval.databases() {
            let slice = database.fixpoint_slice(&net);
            if slice.is_empty() {
                continue;
            }
            if let Some(peers) = self.registry.get(database.name()) {
                for peer in peers {
                    if *peer != evaluation {
                        deliveries.push((*peer, slice.clone()));
                    }
                }
            }
        }
        let queued = eval.queued() > 0;
        let rounds = cur.changes.round();
        tracing::debug!(
            evaluation = %evaluation,
            rounds,
            diverged,
            deliveries = deliveries.len(),
            "fixpoint finished"
        );
        if let (Some(sink), Some(t0)) = (&self.perf, cur.started) {
            sink.fixpoint_finished(evaluation, rounds, t0.elapsed());
        }
        for (peer, entries) in deliveries {
            if let Some(peer_eval) = self.evaluations.get_mut(&peer) {
                peer_eval.enqueue(WorkItem::Commit { entries });
            }
            self.schedule(peer);
        }
        if let Some(callback) = cur.callback {
            callback(&cur.changes);
        }
        if queued {
            self.schedule(evaluation);
        }
    }

    /// Marks an evaluation for a deferred drain, once.
    fn schedule(&mut self, evaluation: EvaluationId) {
        let needs = self.evaluations.get_mut(&evaluation).is_some_and(|eval| {
            if eval.scheduled {
                false
            } else {
                eval.scheduled = true;
                true
            }
        });
        if needs {
            self.pending.push_back(evaluation);
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime")
            .field("evaluations", &self.evaluations.len())
            .field("shared_names", &self.registry.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
