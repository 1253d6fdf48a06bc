// SPDX-License-Identifier: Apache-2.0
//! Scalar values and minted identifiers.
//!
//! Every slot of an EAVN quad holds a [`Value`]. Values are totally
//! ordered so the engine's maps can be BTree-backed; deterministic
//! iteration order is the core determinism contract of the store.
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use blake3::Hasher as Blake3;

/// Canonical 256-bit digest used for content-addressed identifiers.
pub type Digest = [u8; 32];

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct IdParts {
    digest: Digest,
    parts: Vec<Value>,
}

/// Content-addressed identifier minted from its constituent parts.
///
/// Minting hashes the canonical encoding of the parts with a
/// domain-separation prefix (`b"id:"`) using BLAKE3 and retains the parts
/// so the identifier can be decomposed at save time and re-minted at load
/// time. Two mints from equal parts are the same identifier in any
/// process; identity, ordering and hashing use the digest only.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MintedId(Arc<IdParts>);

impl MintedId {
    /// Mints the identifier with the given constituent parts.
    #[must_use]
    pub fn mint(parts: Vec<Value>) -> Self {
        let mut hasher = Blake3::new();
        hasher.update(b"id:");
        for part in &parts {
            encode_part(&mut hasher, part);
        }
        Self(Arc::new(IdParts {
            digest: hasher.finalize().into(),
            parts,
        }))
    }

    /// Returns the canonical digest of this identifier.
    #[must_use]
    pub fn digest(&self) -> &Digest {
        &self.0.digest
    }

    /// Returns the constituent parts the identifier was minted from.
    #[must_use]
    pub fn parts(&self) -> &[Value] {
        &self.0.parts
    }
}

fn encode_part(hasher: &mut Blake3, part: &Value) {
    match part {
        Value::Sym(s) => {
            hasher.update(&[0x01]);
            hasher.update(&(s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Int(i) => {
            hasher.update(&[0x02]);
            hasher.update(&i.to_le_bytes());
        }
        Value::Id(id) => {
            hasher.update(&[0x03]);
            hasher.update(id.digest());
        }
    }
}

impl PartialEq for MintedId {
    fn eq(&self, other: &Self) -> bool {
        self.0.digest == other.0.digest
    }
}

impl Eq for MintedId {}

impl PartialOrd for MintedId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MintedId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.digest.cmp(&other.0.digest)
    }
}

impl Hash for MintedId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.digest.hash(state);
    }
}

impl fmt::Display for MintedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id|{}", hex::encode(&self.0.digest[0..8]))
    }
}

/// Scalar occupying one slot of an EAVN quad.
///
/// Attributes are conventionally symbols; entities and values may also be
/// minted identifiers, which are distinguishable from raw scalars and
/// survive save/load by decomposition into their parts.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// A symbol or string scalar.
    Sym(Arc<str>),
    /// An integer scalar.
    Int(i64),
    /// A minted identifier.
    Id(MintedId),
}

impl Value {
    /// Constructs a symbol value.
    #[must_use]
    pub fn sym(s: &str) -> Self {
        Self::Sym(Arc::from(s))
    }

    /// Constructs an integer value.
    #[must_use]
    pub fn int(i: i64) -> Self {
        Self::Int(i)
    }

    /// Mints an identifier value from its constituent parts.
    #[must_use]
    pub fn mint(parts: Vec<Value>) -> Self {
        Self::Id(MintedId::mint(parts))
    }

    /// Returns true when this value is a minted identifier.
    #[must_use]
    pub fn is_id(&self) -> bool {
        matches!(self, Self::Id(_))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::sym(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<MintedId> for Value {
    fn from(id: MintedId) -> Self {
        Self::Id(id)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sym(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Id(id) => write!(f, "{id}"),
        }
    }
}
