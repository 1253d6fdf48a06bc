// SPDX-License-Identifier: Apache-2.0
//! Optional timing hooks for block execution and fixpoints.
use std::time::Duration;

use crate::changes::Round;
use crate::ident::{BlockId, EvaluationId};

/// Sink for engine timings.
///
/// All hooks default to no-ops; implement the ones you need. Timing is
/// captured only when a sink is installed on the runtime, so an absent
/// sink costs nothing on the execution path.
pub trait PerfSink {
    /// A block's execute call finished.
    fn block_executed(&self, block: &BlockId, elapsed: Duration) {
        let _ = (block, elapsed);
    }

    /// A work item ran to quiescence or divergence.
    fn fixpoint_finished(&self, evaluation: EvaluationId, rounds: Round, elapsed: Duration) {
        let _ = (evaluation, rounds, elapsed);
    }
}

/// Sink that ignores every timing.
#[derive(Clone, Copy, Default, Debug)]
pub struct NullPerfSink;

impl PerfSink for NullPerfSink {}
