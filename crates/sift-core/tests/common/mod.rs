// SPDX-License-Identifier: Apache-2.0
//! Shared fixtures for the integration suites.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::cell::RefCell;
use std::rc::Rc;

use sift_core::{
    Action, ChangeSet, Database, DatabaseName, EvaluationId, FixpointCallback, InsertAction,
    Round, Runtime, Value,
};

/// Shorthand symbol constructor.
pub fn s(x: &str) -> Value {
    Value::sym(x)
}

/// A runtime with one evaluation holding an empty database named `name`.
pub fn runtime_with(name: &str) -> (Runtime, EvaluationId) {
    let mut runtime = Runtime::new();
    let eval = runtime.create_evaluation();
    runtime
        .register_database(eval, Database::new(name))
        .unwrap();
    (runtime, eval)
}

/// Boxes an insertion of one symbolic quad into `db`.
pub fn insert(db: &str, e: &str, a: &str, v: Value, n: &str) -> Box<dyn Action> {
    Box::new(InsertAction::new(db, s(e), s(a), v, s(n)))
}

/// Snapshot of the final change set taken by a fixpoint callback.
#[derive(Clone, Default)]
pub struct Outcome {
    inner: Rc<RefCell<Option<(Round, bool)>>>,
}

impl Outcome {
    /// The callback to pass to `execute_actions_with`.
    pub fn callback(&self) -> FixpointCallback {
        let inner = Rc::clone(&self.inner);
        Box::new(move |changes: &ChangeSet| {
            *inner.borrow_mut() = Some((changes.round(), changes.changed()));
        })
    }

    /// Final round counter; panics when the callback never ran.
    pub fn round(&self) -> Round {
        self.inner.borrow().expect("fixpoint callback did not run").0
    }

    /// Final sticky `changed` flag; panics when the callback never ran.
    pub fn changed(&self) -> bool {
        self.inner.borrow().expect("fixpoint callback did not run").1
    }
}

/// Error-reporter capture: records every `(kind, message)` pair.
#[derive(Clone, Default)]
pub struct Reports {
    inner: Rc<RefCell<Vec<(String, String)>>>,
}

impl Reports {
    /// Installs the capturing reporter on `runtime`.
    pub fn install(&self, runtime: &mut Runtime) {
        let inner = Rc::clone(&self.inner);
        runtime.set_error_reporter(Box::new(move |kind, message| {
            inner.borrow_mut().push((kind.to_string(), message.to_string()));
        }));
    }

    /// Recorded report kinds, in order.
    pub fn kinds(&self) -> Vec<String> {
        self.inner.borrow().iter().map(|(k, _)| k.clone()).collect()
    }
}

/// The `main` database name most suites use.
pub fn main_db() -> DatabaseName {
    DatabaseName::from("main")
}
