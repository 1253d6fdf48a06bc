// SPDX-License-Identifier: Apache-2.0
//! Block activation filter: decides which blocks must re-run for a commit.
//!
//! The filter is an over-approximation. Returning true when no binding
//! actually fires wastes a round of work and is permitted; returning
//! false when a binding would fire is forbidden.
use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::changes::{Change, DeltaEntry, RoundView};
use crate::database::Database;
use crate::value::Value;

/// Predicate gating a block on a single changed triple.
///
/// `tags` is the merged tag set of `e` (committed state plus pending
/// changes, see [`RoundView::tags`]); `change` is the direction of the
/// flip. Implementations may consult the multi-index through `view` but
/// must uphold the over-approximation obligation: a false negative for a
/// change the block would observe is forbidden.
pub trait Checker {
    /// Returns true when the block might observe a new binding as a
    /// result of the changed triple `(e, a, v)`.
    fn check(
        &self,
        view: &RoundView<'_>,
        change: Change,
        tags: &BTreeSet<Value>,
        e: &Value,
        a: &Value,
        v: &Value,
    ) -> bool;
}

/// One `(tag, attribute)` requirement of a block's patterns.
///
/// An unconstrained slot (`None`) matches anything in that position.
#[derive(Clone, Debug)]
pub struct Scan {
    /// Tag the pattern requires on the entity, if any.
    pub tag: Option<Value>,
    /// Attribute the pattern reads, if constrained.
    pub attribute: Option<Value>,
}

impl Scan {
    /// A scan requiring `tag` on the entity and reading `attribute`.
    #[must_use]
    pub fn tagged(tag: &str, attribute: &str) -> Self {
        Self {
            tag: Some(Value::sym(tag)),
            attribute: Some(Value::sym(attribute)),
        }
    }

    /// A scan reading `attribute` on any entity.
    #[must_use]
    pub fn attribute(attribute: &str) -> Self {
        Self {
            tag: None,
            attribute: Some(Value::sym(attribute)),
        }
    }
}

/// Canonical checker: indexes a block by the `(tag, attribute)` pairs its
/// patterns require. A change matches when some scan's tag is in the
/// entity's merged tag set (or the scan is untagged) and the scan's
/// attribute equals the changed attribute (or is unconstrained).
#[derive(Clone, Debug, Default)]
pub struct ScanChecker {
    scans: Vec<Scan>,
}

impl ScanChecker {
    /// Builds a checker from the block's scan requirements.
    #[must_use]
    pub fn new(scans: Vec<Scan>) -> Self {
        Self { scans }
    }
}

impl Checker for ScanChecker {
    fn check(
        &self,
        _view: &RoundView<'_>,
        _change: Change,
        tags: &BTreeSet<Value>,
        _e: &Value,
        a: &Value,
        _v: &Value,
    ) -> bool {
        self.scans.iter().any(|scan| {
            let tag_ok = scan.tag.as_ref().is_none_or(|tag| tags.contains(tag));
            let attr_ok = scan.attribute.as_ref().is_none_or(|attr| attr == a);
            tag_ok && attr_ok
        })
    }
}

/// Position of a block within an evaluation's database list.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct BlockRef {
    /// Index into the evaluation's ordered database list.
    pub db: usize,
    /// Index into that database's ordered block list.
    pub block: usize,
}

/// Selects the blocks that must run in the next round given a committed
/// delta.
///
/// Databases flagged non-executing contribute no blocks and dormant
/// blocks are skipped. Tag lookups merge across every registered index —
/// a block's tag requirement may live in a different database than the
/// changed triple — and are cached per entity for the duration of the
/// scan; scanning for a block stops at its first matching entry.
pub(crate) fn blocks_from_commit(
    databases: &[Database],
    delta: &[DeltaEntry],
    view: &RoundView<'_>,
) -> Vec<BlockRef> {
    let mut selected = Vec::new();
    let mut tag_cache: FxHashMap<Value, BTreeSet<Value>> = FxHashMap::default();
    for (db_at, database) in databases.iter().enumerate() {
        if database.non_executing() {
            continue;
        }
        for (block_at, block) in database.blocks().iter().enumerate() {
            if block.dormant() {
                continue;
            }
            for entry in delta {
                let tags = tag_cache
                    .entry(entry.e.clone())
                    .or_insert_with(|| view.tags(&entry.e));
                if block
                    .checker()
                    .check(view, entry.change, tags, &entry.e, &entry.a, &entry.v)
                {
                    selected.push(BlockRef {
                        db: db_at,
                        block: block_at,
                    });
                    break;
                }
            }
        }
    }
    selected
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::changes::ChangeSet;
    use crate::ident::DatabaseName;
    use crate::index::TripleIndex;
    use crate::multi_index::MultiIndex;

    fn s(x: &str) -> Value {
        Value::sym(x)
    }

    fn view_fixture() -> (MultiIndex, ChangeSet) {
        let name = DatabaseName::from("main");
        let mut multi = MultiIndex::new();
        multi.register(name.clone(), TripleIndex::new()).unwrap();
        let mut changes = ChangeSet::new();
        changes.store(&name, s("e1"), s("tag"), s("person"), s("n1"));
        changes.commit(&mut multi).unwrap();
        (multi, changes)
    }

    #[test]
    fn tagged_scan_requires_tag_and_attribute() {
        let (multi, changes) = view_fixture();
        let view = RoundView::new(&multi, &changes);
        let checker = ScanChecker::new(vec![Scan::tagged("person", "name")]);
        let tags = view.tags(&s("e1"));

        assert!(checker.check(&view, Change::Insert, &tags, &s("e1"), &s("name"), &s("ada")));
        assert!(!checker.check(&view, Change::Insert, &tags, &s("e1"), &s("age"), &s("x")));

        let no_tags = BTreeSet::new();
        assert!(!checker.check(&view, Change::Insert, &no_tags, &s("e2"), &s("name"), &s("x")));
    }

    #[test]
    fn untagged_scan_matches_any_entity() {
        let (multi, changes) = view_fixture();
        let view = RoundView::new(&multi, &changes);
        let checker = ScanChecker::new(vec![Scan::attribute("n")]);
        let no_tags = BTreeSet::new();
        assert!(checker.check(&view, Change::Remove, &no_tags, &s("e9"), &s("n"), &s("0")));
    }

    #[test]
    fn unconstrained_attribute_matches_any_attribute() {
        let (multi, changes) = view_fixture();
        let view = RoundView::new(&multi, &changes);
        let checker = ScanChecker::new(vec![Scan {
            tag: Some(s("person")),
            attribute: None,
        }]);
        let tags = view.tags(&s("e1"));
        assert!(checker.check(&view, Change::Insert, &tags, &s("e1"), &s("anything"), &s("x")));
    }
}
