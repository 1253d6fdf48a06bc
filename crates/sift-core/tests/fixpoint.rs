// SPDX-License-Identifier: Apache-2.0
//! End-to-end fixpoint scenarios: seeding, derivation, divergence, and
//! provenance reference counting.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{insert, main_db, runtime_with, s, Outcome, Reports};
use sift_core::{
    Block, ChangeSet, Database, EngineError, MultiIndex, Runtime, Scan, ScanChecker, SavedValue,
    Value, MAX_ROUNDS,
};

#[test]
fn single_fact_insertion_reaches_fixpoint_in_one_round() {
    let (mut runtime, eval) = runtime_with("main");
    let outcome = Outcome::default();
    runtime
        .execute_actions_with(
            eval,
            vec![insert("main", "e1", "tag", s("person"), "n1")],
            None,
            Some(outcome.callback()),
        )
        .unwrap();
    runtime.run_until_idle().unwrap();

    let dump = runtime.save(eval).unwrap();
    let quads = dump.database("main").unwrap();
    assert_eq!(quads.len(), 1);
    assert_eq!(quads[0].e, SavedValue::Sym("e1".into()));
    assert_eq!(quads[0].a, SavedValue::Sym("tag".into()));
    assert_eq!(quads[0].v, SavedValue::Sym("person".into()));
    assert_eq!(quads[0].n, SavedValue::Sym("n1".into()));
    assert_eq!(outcome.round(), 1);
}

fn derivation_block() -> Block {
    Block::local(
        "person-is-human",
        ScanChecker::new(vec![Scan::tagged("person", "tag")]),
        |multi: &MultiIndex, changes: &mut ChangeSet| {
            let db = main_db();
            if let Some(index) = multi.index(&db) {
                let people: Vec<Value> = index
                    .entities(&s("tag"), &s("person"))
                    .cloned()
                    .collect();
                for e in people {
                    changes.store(&db, e, s("kind"), s("human"), s("n2"));
                }
            }
            Ok(())
        },
    )
}

#[test]
fn trivial_derivation_quiesces_in_two_rounds() {
    let mut runtime = Runtime::new();
    let eval = runtime.create_evaluation();
    runtime
        .register_database(eval, Database::new("main").with_block(derivation_block()))
        .unwrap();

    let outcome = Outcome::default();
    runtime
        .execute_actions_with(
            eval,
            vec![insert("main", "e1", "tag", s("person"), "n1")],
            None,
            Some(outcome.callback()),
        )
        .unwrap();
    runtime.run_until_idle().unwrap();

    let index = runtime
        .evaluation(eval)
        .unwrap()
        .multi_index()
        .index(&main_db())
        .unwrap();
    assert!(index.contains(&s("e1"), &s("tag"), &s("person")));
    assert!(index.contains(&s("e1"), &s("kind"), &s("human")));
    assert_eq!(index.len(), 2);
    assert_eq!(outcome.round(), 2);
    assert!(!outcome.changed());
}

/// A block that replaces `(e1, n, k)` with `(e1, n, k + 1)` every round.
fn counter_block() -> Block {
    Block::local(
        "counter",
        ScanChecker::new(vec![Scan::attribute("n")]),
        |multi: &MultiIndex, changes: &mut ChangeSet| {
            let db = main_db();
            let e = s("e1");
            let attr = s("n");
            if let Some(index) = multi.index(&db) {
                let values: Vec<Value> = index.values(&e, &attr).cloned().collect();
                for v in values {
                    if let Some(nodes) = index.provenance(&e, &attr, &v) {
                        for n in nodes.clone() {
                            changes.unstore(&db, e.clone(), attr.clone(), v.clone(), n);
                        }
                    }
                    if let Value::Int(k) = v {
                        changes.store(&db, e.clone(), attr.clone(), Value::Int(k + 1), s("counter"));
                    }
                }
            }
            Ok(())
        },
    )
}

#[test]
fn divergent_program_hits_the_round_cap_and_reports() {
    let mut runtime = Runtime::new();
    let eval = runtime.create_evaluation();
    runtime
        .register_database(eval, Database::new("main").with_block(counter_block()))
        .unwrap();
    let reports = Reports::default();
    reports.install(&mut runtime);

    let outcome = Outcome::default();
    runtime
        .execute_actions_with(
            eval,
            vec![insert("main", "e1", "n", Value::Int(0), "n1")],
            None,
            Some(outcome.callback()),
        )
        .unwrap();
    runtime.run_until_idle().unwrap();

    assert_eq!(reports.kinds(), vec!["Fixpoint Error".to_string()]);
    assert_eq!(outcome.round(), MAX_ROUNDS);
    assert!(outcome.changed());

    let dump = runtime.save(eval).unwrap();
    let quads = dump.database("main").unwrap();
    assert_eq!(quads.len(), 1);
    assert_eq!(quads[0].v, SavedValue::Int(i64::from(MAX_ROUNDS)));
}

fn asserting_block(id: &str, node: &str) -> Block {
    let node = s(node);
    Block::local(
        id,
        ScanChecker::new(vec![Scan::tagged("t", "tag")]),
        move |_multi: &MultiIndex, changes: &mut ChangeSet| {
            changes.store(&main_db(), s("e1"), s("a"), s("v"), node.clone());
            Ok(())
        },
    )
}

#[test]
fn provenance_reference_counting_outlives_single_retractions() {
    let mut runtime = Runtime::new();
    let eval = runtime.create_evaluation();
    runtime
        .register_database(
            eval,
            Database::new("main")
                .with_block(asserting_block("assert-n1", "n1"))
                .with_block(asserting_block("assert-n2", "n2")),
        )
        .unwrap();

    runtime
        .execute_actions(eval, vec![insert("main", "e1", "tag", s("t"), "seed")])
        .unwrap();
    runtime.run_until_idle().unwrap();

    let contains = |runtime: &Runtime| {
        runtime
            .evaluation(eval)
            .unwrap()
            .multi_index()
            .index(&main_db())
            .unwrap()
            .contains(&s("e1"), &s("a"), &s("v"))
    };
    assert!(contains(&runtime));

    runtime
        .execute_actions(
            eval,
            vec![Box::new(sift_core::RemoveAction::new(
                "main",
                s("e1"),
                s("a"),
                s("v"),
                s("n1"),
            ))],
        )
        .unwrap();
    runtime.run_until_idle().unwrap();
    assert!(contains(&runtime), "fact must survive its first retraction");

    runtime
        .execute_actions(
            eval,
            vec![Box::new(sift_core::RemoveAction::new(
                "main",
                s("e1"),
                s("a"),
                s("v"),
                s("n2"),
            ))],
        )
        .unwrap();
    runtime.run_until_idle().unwrap();
    assert!(!contains(&runtime), "last retraction removes the fact");
}

#[test]
fn failing_block_abandons_the_fixpoint_and_frees_the_slot() {
    let mut runtime = Runtime::new();
    let eval = runtime.create_evaluation();
    let failing = Block::local(
        "exploding",
        ScanChecker::new(vec![Scan::attribute("tag")]),
        |_multi: &MultiIndex, _changes: &mut ChangeSet| Err("boom".into()),
    );
    runtime
        .register_database(eval, Database::new("main").with_block(failing))
        .unwrap();

    runtime
        .execute_actions(eval, vec![insert("main", "e1", "tag", s("t"), "n1")])
        .unwrap();
    let err = runtime.run_until_idle().unwrap_err();
    assert!(matches!(err, EngineError::Collaborator { .. }));
    assert!(!runtime.evaluation(eval).unwrap().is_parked());

    // A later item that does not wake the failing block runs to fixpoint.
    runtime
        .execute_actions(eval, vec![insert("main", "e2", "name", s("ada"), "n1")])
        .unwrap();
    runtime.run_until_idle().unwrap();
    let index = runtime
        .evaluation(eval)
        .unwrap()
        .multi_index()
        .index(&main_db())
        .unwrap();
    assert!(index.contains(&s("e2"), &s("name"), &s("ada")));
}

#[test]
fn blocks_observe_pending_changes_from_round_peers() {
    use sift_core::RoundView;

    // Block A stages a fact; block B, running later in the same round,
    // observes it through the merged view before any commit.
    let stage_flag = Block::local(
        "stage-flag",
        ScanChecker::new(vec![Scan::tagged("t", "tag")]),
        |_multi: &MultiIndex, changes: &mut ChangeSet| {
            changes.store(&main_db(), s("e1"), s("flag"), s("on"), s("a"));
            Ok(())
        },
    );
    let confirm_flag = Block::local(
        "confirm-flag",
        ScanChecker::new(vec![Scan::tagged("t", "tag")]),
        |multi: &MultiIndex, changes: &mut ChangeSet| {
            let pending = RoundView::new(multi, changes).has(&s("e1"), &s("flag"), &s("on"));
            if pending {
                changes.store(&main_db(), s("e1"), s("confirmed"), s("yes"), s("b"));
            }
            Ok(())
        },
    );

    let mut runtime = Runtime::new();
    let eval = runtime.create_evaluation();
    runtime
        .register_database(
            eval,
            Database::new("main")
                .with_block(stage_flag)
                .with_block(confirm_flag),
        )
        .unwrap();
    runtime
        .execute_actions(eval, vec![insert("main", "e1", "tag", s("t"), "n1")])
        .unwrap();
    runtime.run_until_idle().unwrap();

    let index = runtime
        .evaluation(eval)
        .unwrap()
        .multi_index()
        .index(&main_db())
        .unwrap();
    assert!(index.contains(&s("e1"), &s("flag"), &s("on")));
    assert!(index.contains(&s("e1"), &s("confirmed"), &s("yes")));
}

#[test]
fn tag_merge_spans_databases_for_cross_database_blocks() {
    use sift_core::DatabaseName;

    // The activation tag lives in "people" while the scanned fact lives
    // in "facts"; the block must still wake on the fact change.
    let ranker = Block::local(
        "rank-people",
        ScanChecker::new(vec![Scan::tagged("person", "score")]),
        |multi: &MultiIndex, changes: &mut ChangeSet| {
            let people = DatabaseName::from("people");
            let facts = DatabaseName::from("facts");
            if let (Some(people_ix), Some(facts_ix)) = (multi.index(&people), multi.index(&facts))
            {
                let tagged: Vec<Value> =
                    people_ix.entities(&s("tag"), &s("person")).cloned().collect();
                for e in tagged {
                    if facts_ix.values(&e, &s("score")).next().is_some() {
                        changes.store(&facts, e, s("rank"), s("known"), s("ranker"));
                    }
                }
            }
            Ok(())
        },
    );

    let mut runtime = Runtime::new();
    let eval = runtime.create_evaluation();
    runtime.register_database(eval, Database::new("people")).unwrap();
    runtime
        .register_database(eval, Database::new("facts").with_block(ranker))
        .unwrap();

    runtime
        .execute_actions(eval, vec![insert("people", "e1", "tag", s("person"), "n1")])
        .unwrap();
    runtime.run_until_idle().unwrap();

    // The tag alone does not satisfy the scan's attribute.
    assert!(runtime
        .evaluation(eval)
        .unwrap()
        .multi_index()
        .index(&DatabaseName::from("facts"))
        .unwrap()
        .is_empty());

    runtime
        .execute_actions(eval, vec![insert("facts", "e1", "score", Value::Int(10), "n1")])
        .unwrap();
    runtime.run_until_idle().unwrap();

    let facts_index = runtime
        .evaluation(eval)
        .unwrap()
        .multi_index()
        .index(&DatabaseName::from("facts"))
        .unwrap();
    assert!(facts_index.contains(&s("e1"), &s("rank"), &s("known")));
}

#[test]
fn perf_sink_observes_block_and_fixpoint_timings() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use sift_core::{BlockId, EvaluationId, PerfSink, Round};

    #[derive(Default)]
    struct Counting {
        blocks: AtomicUsize,
        fixpoints: AtomicUsize,
    }
    impl PerfSink for Counting {
        fn block_executed(&self, _block: &BlockId, _elapsed: Duration) {
            self.blocks.fetch_add(1, Ordering::Relaxed);
        }
        fn fixpoint_finished(&self, _evaluation: EvaluationId, _rounds: Round, _elapsed: Duration) {
            self.fixpoints.fetch_add(1, Ordering::Relaxed);
        }
    }

    let mut runtime = Runtime::new();
    let eval = runtime.create_evaluation();
    runtime
        .register_database(eval, Database::new("main").with_block(derivation_block()))
        .unwrap();
    let sink = Arc::new(Counting::default());
    runtime.set_perf_sink(Arc::clone(&sink) as Arc<dyn PerfSink>);

    runtime
        .execute_actions(eval, vec![insert("main", "e1", "tag", s("person"), "n1")])
        .unwrap();
    runtime.run_until_idle().unwrap();

    assert_eq!(sink.blocks.load(Ordering::Relaxed), 1);
    assert_eq!(sink.fixpoints.load(Ordering::Relaxed), 1);
}

#[test]
fn dormant_blocks_are_never_activated() {
    let mut runtime = Runtime::new();
    let eval = runtime.create_evaluation();
    let mut database = Database::new("main").with_block(derivation_block());
    database.blocks_mut()[0].set_dormant(true);
    runtime.register_database(eval, database).unwrap();

    runtime
        .execute_actions(eval, vec![insert("main", "e1", "tag", s("person"), "n1")])
        .unwrap();
    runtime.run_until_idle().unwrap();

    let index = runtime
        .evaluation(eval)
        .unwrap()
        .multi_index()
        .index(&main_db())
        .unwrap();
    assert!(!index.contains(&s("e1"), &s("kind"), &s("human")));
    assert_eq!(index.len(), 1);
}
