// SPDX-License-Identifier: Apache-2.0
//! Portable save/load dumps.
//!
//! A dump maps each database name to its quad sequence. Minted
//! identifiers are decomposed into their constituent parts so the dump
//! survives process boundaries; loading re-mints them. The byte codec is
//! deterministic CBOR.
use std::collections::BTreeMap;

use ciborium::value::Value as CborValue;

use crate::changes::ChangeSet;
use crate::error::EngineError;
use crate::evaluation::Evaluation;
use crate::ident::DatabaseName;
use crate::value::Value;

/// CBOR tag wrapping the parts array of a decomposed identifier
/// (RFC 8949 tag 39, "identifier").
const ID_PARTS_TAG: u64 = 39;

/// One slot of a persisted quad: a raw scalar, or the parts of a minted
/// identifier. The two are distinguishable by construction.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SavedValue {
    /// A symbol scalar.
    Sym(String),
    /// An integer scalar.
    Int(i64),
    /// The constituent parts of a minted identifier.
    Parts(Vec<SavedValue>),
}

impl SavedValue {
    /// Decomposes a live value for persistence.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Sym(s) => Self::Sym(s.to_string()),
            Value::Int(i) => Self::Int(*i),
            Value::Id(id) => Self::Parts(id.parts().iter().map(Self::from_value).collect()),
        }
    }

    /// Reconstructs the live value, re-minting identifiers from their
    /// parts.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Sym(s) => Value::sym(s),
            Self::Int(i) => Value::Int(*i),
            Self::Parts(parts) => Value::mint(parts.iter().map(Self::to_value).collect()),
        }
    }

    fn to_cbor(&self) -> CborValue {
        match self {
            Self::Sym(s) => CborValue::Text(s.clone()),
            Self::Int(i) => CborValue::Integer((*i).into()),
            Self::Parts(parts) => CborValue::Tag(
                ID_PARTS_TAG,
                Box::new(CborValue::Array(parts.iter().map(Self::to_cbor).collect())),
            ),
        }
    }

    fn from_cbor(value: &CborValue) -> Result<Self, EngineError> {
        match value {
            CborValue::Text(s) => Ok(Self::Sym(s.clone())),
            CborValue::Integer(i) => i64::try_from(i128::from(*i))
                .map(Self::Int)
                .map_err(|_| EngineError::Codec("integer out of range".into())),
            CborValue::Tag(tag, inner) if *tag == ID_PARTS_TAG => match inner.as_ref() {
                CborValue::Array(items) => items
                    .iter()
                    .map(Self::from_cbor)
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::Parts),
                other => Err(EngineError::Codec(format!(
                    "identifier tag wraps non-array: {other:?}"
                ))),
            },
            other => Err(EngineError::Codec(format!("unexpected slot: {other:?}"))),
        }
    }
}

/// One persisted quad: `[e, a, v, n]`.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SavedQuad {
    /// Entity slot.
    pub e: SavedValue,
    /// Attribute slot.
    pub a: SavedValue,
    /// Value slot.
    pub v: SavedValue,
    /// Provenance node slot.
    pub n: SavedValue,
}

impl SavedQuad {
    fn to_cbor(&self) -> CborValue {
        CborValue::Array(vec![
            self.e.to_cbor(),
            self.a.to_cbor(),
            self.v.to_cbor(),
            self.n.to_cbor(),
        ])
    }

    fn from_cbor(value: &CborValue) -> Result<Self, EngineError> {
        let CborValue::Array(slots) = value else {
            return Err(EngineError::Codec("quad is not an array".into()));
        };
        let [e, a, v, n] = slots.as_slice() else {
            return Err(EngineError::Codec(format!(
                "quad has {} slots, expected 4",
                slots.len()
            )));
        };
        Ok(Self {
            e: SavedValue::from_cbor(e)?,
            a: SavedValue::from_cbor(a)?,
            v: SavedValue::from_cbor(v)?,
            n: SavedValue::from_cbor(n)?,
        })
    }
}

/// Persisted state of one evaluation: database name to quad sequence.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SaveDump {
    databases: BTreeMap<String, Vec<SavedQuad>>,
}

impl SaveDump {
    /// Captures every database of `evaluation`, in index order, with
    /// provenance included.
    #[must_use]
    pub(crate) fn capture(evaluation: &Evaluation) -> Self {
        let mut databases = BTreeMap::new();
        for database in evaluation.databases() {
            let quads = evaluation
                .multi_index()
                .index(database.name())
                .map(|index| {
                    index
                        .quads()
                        .map(|quad| SavedQuad {
                            e: SavedValue::from_value(&quad.e),
                            a: SavedValue::from_value(&quad.a),
                            v: SavedValue::from_value(&quad.v),
                            n: SavedValue::from_value(&quad.n),
                        })
                        .collect()
                })
                .unwrap_or_default();
            databases.insert(database.name().as_str().to_string(), quads);
        }
        Self { databases }
    }

    /// Stages every quad as an insertion in a fresh change set, re-minting
    /// identifiers from their parts.
    pub(crate) fn stage(&self) -> ChangeSet {
        let mut changes = ChangeSet::new();
        for (name, quads) in &self.databases {
            let database = DatabaseName::from(name.as_str());
            for quad in quads {
                changes.store(
                    &database,
                    quad.e.to_value(),
                    quad.a.to_value(),
                    quad.v.to_value(),
                    quad.n.to_value(),
                );
            }
        }
        changes
    }

    /// The quad sequence saved for `name`, if present.
    #[must_use]
    pub fn database(&self, name: &str) -> Option<&[SavedQuad]> {
        self.databases.get(name).map(Vec::as_slice)
    }

    /// Iterates `(name, quads)` pairs in deterministic order.
    pub fn databases(&self) -> impl Iterator<Item = (&str, &[SavedQuad])> {
        self.databases
            .iter()
            .map(|(name, quads)| (name.as_str(), quads.as_slice()))
    }

    /// Encodes the dump as deterministic CBOR.
    ///
    /// # Errors
    ///
    /// [`EngineError::Codec`] when serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EngineError> {
        let map = CborValue::Map(
            self.databases
                .iter()
                .map(|(name, quads)| {
                    (
                        CborValue::Text(name.clone()),
                        CborValue::Array(quads.iter().map(SavedQuad::to_cbor).collect()),
                    )
                })
                .collect(),
        );
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&map, &mut bytes)
            .map_err(|err| EngineError::Codec(err.to_string()))?;
        Ok(bytes)
    }

    /// Decodes a dump previously produced by [`Self::to_bytes`].
    ///
    /// # Errors
    ///
    /// [`EngineError::Codec`] on malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EngineError> {
        let value: CborValue =
            ciborium::de::from_reader(bytes).map_err(|err| EngineError::Codec(err.to_string()))?;
        let CborValue::Map(entries) = value else {
            return Err(EngineError::Codec("dump is not a map".into()));
        };
        let mut databases = BTreeMap::new();
        for (key, quads) in &entries {
            let CborValue::Text(name) = key else {
                return Err(EngineError::Codec("database name is not text".into()));
            };
            let CborValue::Array(items) = quads else {
                return Err(EngineError::Codec("database dump is not an array".into()));
            };
            let quads = items
                .iter()
                .map(SavedQuad::from_cbor)
                .collect::<Result<Vec<_>, _>>()?;
            databases.insert(name.clone(), quads);
        }
        Ok(Self { databases })
    }
}
