// SPDX-License-Identifier: Apache-2.0
//! The EAVN triple index.
//!
//! Conceptually a set of `(e, a, v)` triples, each carrying the set of
//! provenance nodes that asserted it. All maps are BTree-backed so every
//! iteration is deterministic and stable across equal index states.
use std::collections::{BTreeMap, BTreeSet};

use crate::value::Value;

/// One fact with its provenance: entity, attribute, value, node.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Quad {
    /// Entity slot.
    pub e: Value,
    /// Attribute slot.
    pub a: Value,
    /// Value slot.
    pub v: Value,
    /// Provenance node: the block or input that produced the fact.
    pub n: Value,
}

/// Lookup pattern binding any subset of the `(e, a, v)` key.
///
/// An unbound slot (`None`) matches every value in that position.
#[derive(Clone, Default, Debug)]
pub struct Pattern {
    /// Entity constraint.
    pub e: Option<Value>,
    /// Attribute constraint.
    pub a: Option<Value>,
    /// Value constraint.
    pub v: Option<Value>,
}

impl Pattern {
    /// A pattern with every slot unbound.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Binds the entity slot.
    #[must_use]
    pub fn e(mut self, e: Value) -> Self {
        self.e = Some(e);
        self
    }

    /// Binds the attribute slot.
    #[must_use]
    pub fn a(mut self, a: Value) -> Self {
        self.a = Some(a);
        self
    }

    /// Binds the value slot.
    #[must_use]
    pub fn v(mut self, v: Value) -> Self {
        self.v = Some(v);
        self
    }
}

type NodeSet = BTreeSet<Value>;

/// The committed EAVN store for one database.
///
/// The store is a set at `(e, a, v)` granularity: asserting the same quad
/// twice is a no-op, and a triple asserted by several provenance nodes is
/// one logical fact that survives until its last producer retracts it.
#[derive(Clone, Default, Debug)]
pub struct TripleIndex {
    /// Primary axis: entity, attribute, value, provenance nodes.
    eav: BTreeMap<Value, BTreeMap<Value, BTreeMap<Value, NodeSet>>>,
    /// Reverse axis for `entities(a, v)` lookups.
    ave: BTreeMap<Value, BTreeMap<Value, BTreeSet<Value>>>,
    /// Count of logical triples currently present.
    triples: usize,
}

impl TripleIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of logical `(e, a, v)` triples present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.triples
    }

    /// Returns true when no triple is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triples == 0
    }

    /// Adds the quad. Returns true when the logical triple became present
    /// (it was absent before accounting for provenance).
    ///
    /// Re-asserting a quad whose provenance node is already recorded is a
    /// no-op returning false.
    pub fn insert(&mut self, e: Value, a: Value, v: Value, n: Value) -> bool {
        let nodes = self
            .eav
            .entry(e.clone())
            .or_default()
            .entry(a.clone())
            .or_default()
            .entry(v.clone())
            .or_default();
        let was_absent = nodes.is_empty();
        if !nodes.insert(n) {
            return false;
        }
        if was_absent {
            self.ave.entry(a).or_default().entry(v).or_default().insert(e);
            self.triples += 1;
        }
        was_absent
    }

    /// Removes one provenance node's support for the triple. Returns true
    /// when the last provenance is gone and the logical triple left the
    /// index. Removing a non-present quad is a no-op returning false.
    pub fn remove(&mut self, e: &Value, a: &Value, v: &Value, n: &Value) -> bool {
        let Some(by_attr) = self.eav.get_mut(e) else {
            return false;
        };
        let Some(by_value) = by_attr.get_mut(a) else {
            return false;
        };
        let Some(nodes) = by_value.get_mut(v) else {
            return false;
        };
        if !nodes.remove(n) {
            return false;
        }
        if !nodes.is_empty() {
            return false;
        }
        by_value.remove(v);
        if by_value.is_empty() {
            by_attr.remove(a);
        }
        if by_attr.is_empty() {
            self.eav.remove(e);
        }
        if let Some(by_v) = self.ave.get_mut(a) {
            if let Some(ents) = by_v.get_mut(v) {
                ents.remove(e);
                if ents.is_empty() {
                    by_v.remove(v);
                }
            }
            if by_v.is_empty() {
                self.ave.remove(a);
            }
        }
        self.triples -= 1;
        true
    }

    /// Point membership for a fully specified triple.
    #[must_use]
    pub fn contains(&self, e: &Value, a: &Value, v: &Value) -> bool {
        self.eav
            .get(e)
            .and_then(|by_attr| by_attr.get(a))
            .is_some_and(|by_value| by_value.contains_key(v))
    }

    /// Iterates the values held by `(e, a)` in deterministic order.
    pub fn values<'i>(&'i self, e: &Value, a: &Value) -> impl Iterator<Item = &'i Value> {
        self.eav
            .get(e)
            .and_then(|by_attr| by_attr.get(a))
            .into_iter()
            .flat_map(BTreeMap::keys)
    }

    /// Iterates the `(a, v)` pairs held by `e` in deterministic order.
    pub fn attributes<'i>(&'i self, e: &Value) -> impl Iterator<Item = (&'i Value, &'i Value)> {
        self.eav.get(e).into_iter().flat_map(|by_attr| {
            by_attr
                .iter()
                .flat_map(|(a, by_value)| by_value.keys().map(move |v| (a, v)))
        })
    }

    /// Iterates the entities holding `(a, v)` in deterministic order.
    pub fn entities<'i>(&'i self, a: &Value, v: &Value) -> impl Iterator<Item = &'i Value> {
        self.ave
            .get(a)
            .and_then(|by_value| by_value.get(v))
            .into_iter()
            .flatten()
    }

    /// Returns the provenance nodes supporting `(e, a, v)`, if present.
    #[must_use]
    pub fn provenance(&self, e: &Value, a: &Value, v: &Value) -> Option<&NodeSet> {
        self.eav
            .get(e)
            .and_then(|by_attr| by_attr.get(a))
            .and_then(|by_value| by_value.get(v))
    }

    /// Collects all quads matching `pattern`, one per provenance node, in
    /// deterministic order (stable across equal index states).
    #[must_use]
    pub fn iterate(&self, pattern: &Pattern) -> Vec<Quad> {
        let mut out = Vec::new();
        let entities: Vec<&Value> = match &pattern.e {
            Some(e) => self.eav.get_key_value(e).map(|(k, _)| k).into_iter().collect(),
            None => self.eav.keys().collect(),
        };
        for e in entities {
            let Some(by_attr) = self.eav.get(e) else {
                continue;
            };
            let attrs: Vec<&Value> = match &pattern.a {
                Some(a) => by_attr.get_key_value(a).map(|(k, _)| k).into_iter().collect(),
                None => by_attr.keys().collect(),
            };
            for a in attrs {
                let Some(by_value) = by_attr.get(a) else {
                    continue;
                };
                let vals: Vec<&Value> = match &pattern.v {
                    Some(v) => by_value.get_key_value(v).map(|(k, _)| k).into_iter().collect(),
                    None => by_value.keys().collect(),
                };
                for v in vals {
                    let Some(nodes) = by_value.get(v) else {
                        continue;
                    };
                    for n in nodes {
                        out.push(Quad {
                            e: e.clone(),
                            a: a.clone(),
                            v: v.clone(),
                            n: n.clone(),
                        });
                    }
                }
            }
        }
        out
    }

    /// Iterates every quad in the index, provenance included, in
    /// deterministic order. This is the full dump used by save.
    pub fn quads(&self) -> impl Iterator<Item = Quad> + '_ {
        self.eav.iter().flat_map(|(e, by_attr)| {
            by_attr.iter().flat_map(move |(a, by_value)| {
                by_value.iter().flat_map(move |(v, nodes)| {
                    nodes.iter().map(move |n| Quad {
                        e: e.clone(),
                        a: a.clone(),
                        v: v.clone(),
                        n: n.clone(),
                    })
                })
            })
        })
    }

    /// Iterates the logical `(e, a, v)` triples without provenance.
    pub fn triples(&self) -> impl Iterator<Item = (&Value, &Value, &Value)> {
        self.eav.iter().flat_map(|(e, by_attr)| {
            by_attr.iter().flat_map(move |(a, by_value)| {
                by_value.keys().map(move |v| (e, a, v))
            })
        })
    }
}
