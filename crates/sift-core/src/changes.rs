// SPDX-License-Identifier: Apache-2.0
//! The per-fixpoint change set: staged fact deltas with commit semantics.
//!
//! A change set is created for one queued work item, mutated only by
//! actions and executing blocks, and destroyed when the fixpoint completes
//! or is abandoned. Staged entries are an append-only multiset keyed by
//! `(database, e, a, v, n, round)` with signed multiplicity; `commit`
//! folds them into the triple indexes and records the resulting delta.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::constants::TAG_ATTRIBUTE;
use crate::error::EngineError;
use crate::ident::DatabaseName;
use crate::multi_index::MultiIndex;
use crate::value::Value;

/// Fixpoint round counter. Starts at 0 when a work item is seeded and is
/// advanced by [`ChangeSet::next_round`] at the start of each round.
pub type Round = u32;

/// Direction of a staged or committed change.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Change {
    /// The fact is asserted (`+1`).
    Insert,
    /// The fact is retracted (`-1`).
    Remove,
}

impl Change {
    /// Signed multiplicity of this change.
    #[must_use]
    pub fn sign(self) -> i64 {
        match self {
            Self::Insert => 1,
            Self::Remove => -1,
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => f.write_str("+1"),
            Self::Remove => f.write_str("-1"),
        }
    }
}

/// One staged, not-yet-committed entry.
#[derive(Clone, Debug)]
struct StagedEntry {
    database: DatabaseName,
    change: Change,
    e: Value,
    a: Value,
    v: Value,
    n: Value,
}

/// One committed change: a presence flip of a logical triple.
///
/// The committed delta is a flat sequence of these six-field entries
/// (change, e, a, v, n, round) plus the owning database name.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DeltaEntry {
    /// Database whose index the change was applied to.
    pub database: DatabaseName,
    /// Direction of the flip.
    pub change: Change,
    /// Entity slot.
    pub e: Value,
    /// Attribute slot.
    pub a: Value,
    /// Value slot.
    pub v: Value,
    /// Provenance node whose application flipped the presence.
    pub n: Value,
    /// Round the change was committed in.
    pub round: Round,
}

/// Netting key: staged entries collapse per `(db, e, a, v, n)` so that
/// opposing provenance-equal pairs cancel before touching any index.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
struct NetKey {
    database: DatabaseName,
    e: Value,
    a: Value,
    v: Value,
    n: Value,
}

/// Staged, round-tagged multiset of fact deltas with commit semantics.
#[derive(Default, Debug)]
pub struct ChangeSet {
    staged: Vec<StagedEntry>,
    round: Round,
    changed: bool,
    committed: Vec<DeltaEntry>,
    last_commit_start: usize,
}

impl ChangeSet {
    /// Creates an empty change set at round 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current round.
    #[must_use]
    pub fn round(&self) -> Round {
        self.round
    }

    /// Sticky flag: true when the current round produced a non-empty
    /// committed delta. Cleared by [`Self::next_round`].
    #[must_use]
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Stages an assertion of `(e, a, v, n)` against the named database.
    pub fn store(&mut self, database: &DatabaseName, e: Value, a: Value, v: Value, n: Value) {
        self.staged.push(StagedEntry {
            database: database.clone(),
            change: Change::Insert,
            e,
            a,
            v,
            n,
        });
    }

    /// Stages a retraction of `(e, a, v, n)` against the named database.
    pub fn unstore(&mut self, database: &DatabaseName, e: Value, a: Value, v: Value, n: Value) {
        self.staged.push(StagedEntry {
            database: database.clone(),
            change: Change::Remove,
            e,
            a,
            v,
            n,
        });
    }

    /// Returns true when entries are staged and not yet committed.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Advances to the next round and clears the sticky `changed` flag.
    /// Returns the new round.
    pub fn next_round(&mut self) -> Round {
        self.round += 1;
        self.changed = false;
        self.round
    }

    /// Atomically applies all staged entries to their target indexes.
    ///
    /// Entries are netted per `(db, e, a, v, n)` first, so opposing
    /// provenance-equal pairs cancel without touching any index. Each
    /// surviving application that flips the logical presence of a triple
    /// is recorded as a [`DeltaEntry`] at the current round; `changed` is
    /// set iff the round's delta is non-empty. Committing with nothing
    /// staged is idempotent.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownDatabase`] when a staged entry names a
    /// database absent from the multi-index; no entry is applied.
    pub fn commit(&mut self, multi: &mut MultiIndex) -> Result<&[DeltaEntry], EngineError> {
        let mut net: BTreeMap<NetKey, i64> = BTreeMap::new();
        for entry in self.staged.drain(..) {
            let key = NetKey {
                database: entry.database,
                e: entry.e,
                a: entry.a,
                v: entry.v,
                n: entry.n,
            };
            *net.entry(key).or_insert(0) += entry.change.sign();
        }
        for key in net.keys() {
            if !multi.contains(&key.database) {
                return Err(EngineError::UnknownDatabase(key.database.clone()));
            }
        }
        self.last_commit_start = self.committed.len();
        for (key, weight) in net {
            if weight == 0 {
                continue;
            }
            let index = multi
                .index_mut(&key.database)
                .ok_or_else(|| EngineError::UnknownDatabase(key.database.clone()))?;
            let flipped = if weight > 0 {
                index.insert(key.e.clone(), key.a.clone(), key.v.clone(), key.n.clone())
            } else {
                index.remove(&key.e, &key.a, &key.v, &key.n)
            };
            if flipped {
                self.committed.push(DeltaEntry {
                    database: key.database,
                    change: if weight > 0 { Change::Insert } else { Change::Remove },
                    e: key.e,
                    a: key.a,
                    v: key.v,
                    n: key.n,
                    round: self.round,
                });
            }
        }
        if self.committed.len() > self.last_commit_start {
            self.changed = true;
        }
        Ok(&self.committed[self.last_commit_start..])
    }

    /// The delta produced by the most recent [`Self::commit`].
    #[must_use]
    pub fn last_commit(&self) -> &[DeltaEntry] {
        &self.committed[self.last_commit_start..]
    }

    /// The accumulated committed delta across every round, in commit
    /// order.
    #[must_use]
    pub fn committed(&self) -> &[DeltaEntry] {
        &self.committed
    }

    /// Folds another change set's pending entries into this one at the
    /// current round, without committing. Used when a remote block
    /// delivers its derived changes.
    pub fn merge_round(&mut self, other: ChangeSet) {
        self.staged.extend(other.staged);
    }

    /// Collapses the accumulated per-round deltas into the net effect of
    /// the whole fixpoint: a triple added and later removed (or removed
    /// and re-added) inside one fixpoint cancels out. Entry order is
    /// deterministic (key order).
    ///
    /// This is what peers receive: the net effect of a completed
    /// fixpoint, never intermediate rounds.
    #[must_use]
    pub fn net_delta(&self) -> Vec<DeltaEntry> {
        // Presence flips for a fixed (db, e, a, v) strictly alternate, so
        // an even count nets to nothing and an odd count nets to the last
        // recorded flip.
        #[derive(PartialEq, Eq, PartialOrd, Ord)]
        struct TripleKey {
            database: DatabaseName,
            e: Value,
            a: Value,
            v: Value,
        }
        let mut flips: BTreeMap<TripleKey, (usize, usize)> = BTreeMap::new();
        for (at, entry) in self.committed.iter().enumerate() {
            let key = TripleKey {
                database: entry.database.clone(),
                e: entry.e.clone(),
                a: entry.a.clone(),
                v: entry.v.clone(),
            };
            let slot = flips.entry(key).or_insert((0, at));
            slot.0 += 1;
            slot.1 = at;
        }
        flips
            .into_values()
            .filter(|(count, _)| count % 2 == 1)
            .map(|(_, at)| self.committed[at].clone())
            .collect()
    }
}

/// Read view over the committed indexes merged with the pending entries
/// of the active change set.
///
/// The view is only valid during the current round: committing or staging
/// further entries invalidates its results, so it must be constructed
/// fresh per round (or per activation scan) and never cached across
/// commits.
///
/// Lookups merge across every index registered in the evaluation, not
/// one database. Blocks may join an entity's tag in one database against
/// facts in another; a narrower view would hide bindings from the
/// activation filter.
pub struct RoundView<'a> {
    multi: &'a MultiIndex,
    changes: &'a ChangeSet,
}

impl<'a> RoundView<'a> {
    /// Builds a view over `multi` merged with `changes`' pending entries.
    #[must_use]
    pub fn new(multi: &'a MultiIndex, changes: &'a ChangeSet) -> Self {
        Self { multi, changes }
    }

    /// The underlying multi-index.
    #[must_use]
    pub fn multi(&self) -> &'a MultiIndex {
        self.multi
    }

    /// The set of values consistent with `(e, a)` across every registered
    /// index, union-merged with pending additions and minus pending
    /// removals. Pending entries apply in staging order.
    #[must_use]
    pub fn values(&self, e: &Value, a: &Value) -> BTreeSet<Value> {
        let mut out = BTreeSet::new();
        for (_, index) in self.multi.iter() {
            out.extend(index.values(e, a).cloned());
        }
        for entry in &self.changes.staged {
            if entry.e == *e && entry.a == *a {
                match entry.change {
                    Change::Insert => {
                        out.insert(entry.v.clone());
                    }
                    Change::Remove => {
                        out.remove(&entry.v);
                    }
                }
            }
        }
        out
    }

    /// The merged tag set of `e`: the values of the distinguished `tag`
    /// attribute, committed state plus pending changes.
    #[must_use]
    pub fn tags(&self, e: &Value) -> BTreeSet<Value> {
        self.values(e, &Value::sym(TAG_ATTRIBUTE))
    }

    /// Point membership for `(e, a, v)` under the merged view.
    #[must_use]
    pub fn has(&self, e: &Value, a: &Value, v: &Value) -> bool {
        self.values(e, a).contains(v)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::index::TripleIndex;

    fn s(x: &str) -> Value {
        Value::sym(x)
    }

    fn multi_with(name: &DatabaseName) -> MultiIndex {
        let mut multi = MultiIndex::new();
        multi
            .register(name.clone(), TripleIndex::new())
            .unwrap_or_else(|_| unreachable!("fresh multi-index"));
        multi
    }

    #[test]
    fn commit_applies_staged_entries_and_reports_the_delta() {
        let db = DatabaseName::from("main");
        let mut multi = multi_with(&db);
        let mut changes = ChangeSet::new();
        changes.store(&db, s("e1"), s("tag"), s("person"), s("n1"));
        let delta = changes.commit(&mut multi).unwrap().to_vec();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].change, Change::Insert);
        assert_eq!(delta[0].round, 0);
        assert!(changes.changed());
        assert!(multi
            .index(&db)
            .unwrap()
            .contains(&s("e1"), &s("tag"), &s("person")));
    }

    #[test]
    fn opposing_provenance_equal_pairs_cancel_without_touching_the_index() {
        let db = DatabaseName::from("main");
        let mut multi = multi_with(&db);
        let mut changes = ChangeSet::new();
        changes.store(&db, s("e1"), s("a"), s("x"), s("n1"));
        changes.unstore(&db, s("e1"), s("a"), s("x"), s("n1"));
        let delta = changes.commit(&mut multi).unwrap();
        assert!(delta.is_empty());
        assert!(!changes.changed());
        assert!(multi.index(&db).unwrap().is_empty());
    }

    #[test]
    fn commit_with_nothing_staged_is_idempotent() {
        let db = DatabaseName::from("main");
        let mut multi = multi_with(&db);
        let mut changes = ChangeSet::new();
        changes.store(&db, s("e1"), s("a"), s("x"), s("n1"));
        changes.commit(&mut multi).unwrap();
        let len_before = multi.index(&db).unwrap().len();
        let delta = changes.commit(&mut multi).unwrap();
        assert!(delta.is_empty());
        assert_eq!(multi.index(&db).unwrap().len(), len_before);
    }

    #[test]
    fn reasserting_a_present_fact_does_not_mark_the_round_changed() {
        let db = DatabaseName::from("main");
        let mut multi = multi_with(&db);
        let mut changes = ChangeSet::new();
        changes.store(&db, s("e1"), s("a"), s("x"), s("n1"));
        changes.commit(&mut multi).unwrap();
        changes.next_round();
        changes.store(&db, s("e1"), s("a"), s("x"), s("n1"));
        let delta = changes.commit(&mut multi).unwrap();
        assert!(delta.is_empty());
        assert!(!changes.changed());
    }

    #[test]
    fn staging_into_an_unregistered_database_is_rejected() {
        let db = DatabaseName::from("main");
        let ghost = DatabaseName::from("ghost");
        let mut multi = multi_with(&db);
        let mut changes = ChangeSet::new();
        changes.store(&ghost, s("e1"), s("a"), s("x"), s("n1"));
        let err = changes.commit(&mut multi).unwrap_err();
        assert!(matches!(err, EngineError::UnknownDatabase(name) if name == ghost));
    }

    #[test]
    fn next_round_clears_the_sticky_flag_and_advances() {
        let mut changes = ChangeSet::new();
        assert_eq!(changes.round(), 0);
        assert_eq!(changes.next_round(), 1);
        assert!(!changes.changed());
        assert_eq!(changes.round(), 1);
    }

    #[test]
    fn net_delta_cancels_add_then_remove_across_rounds() {
        let db = DatabaseName::from("main");
        let mut multi = multi_with(&db);
        let mut changes = ChangeSet::new();
        changes.store(&db, s("e1"), s("a"), s("x"), s("n1"));
        changes.store(&db, s("e2"), s("a"), s("y"), s("n1"));
        changes.commit(&mut multi).unwrap();
        changes.next_round();
        changes.unstore(&db, s("e1"), s("a"), s("x"), s("n1"));
        changes.commit(&mut multi).unwrap();

        let net = changes.net_delta();
        assert_eq!(net.len(), 1);
        assert_eq!(net[0].e, s("e2"));
        assert_eq!(net[0].change, Change::Insert);
    }

    #[test]
    fn merge_round_folds_pending_entries_without_committing() {
        let db = DatabaseName::from("main");
        let mut multi = multi_with(&db);
        let mut ours = ChangeSet::new();
        ours.next_round();
        let mut theirs = ChangeSet::new();
        theirs.store(&db, s("e1"), s("a"), s("x"), s("remote"));
        ours.merge_round(theirs);
        assert!(ours.has_pending());
        assert!(multi.index(&db).unwrap().is_empty());
        let delta = ours.commit(&mut multi).unwrap();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].round, 1);
    }

    #[test]
    fn round_view_merges_pending_over_committed_state() {
        let db = DatabaseName::from("main");
        let mut multi = multi_with(&db);
        let mut changes = ChangeSet::new();
        changes.store(&db, s("e1"), s("tag"), s("person"), s("n1"));
        changes.commit(&mut multi).unwrap();
        changes.store(&db, s("e1"), s("tag"), s("employee"), s("n1"));
        changes.unstore(&db, s("e1"), s("tag"), s("person"), s("n1"));

        let view = RoundView::new(&multi, &changes);
        let tags = view.tags(&s("e1"));
        assert!(tags.contains(&s("employee")));
        assert!(!tags.contains(&s("person")));
        assert!(view.has(&s("e1"), &s("tag"), &s("employee")));
    }
}
