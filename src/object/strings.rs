//! String entity (`spec.md` §3): immutable byte sequence plus length plus
//! hash. Short strings are interned process-wide via an external table;
//! long strings store their own bytes and defer hashing until first
//! compared. Treated here as a primitive service — the hash table's
//! internals are `ahash`, not a hand-rolled scheme.

use ahash::RandomState;
use smol_str::SmolStr;
use std::collections::HashMap;

use super::gc_header::GcHeader;
use super::ids::StringId;

/// Lua's `LUAI_MAXSHORTLEN`: strings at or under this length are interned.
pub const MAX_SHORT_LEN: usize = 40;

pub enum LuaString {
    Short(SmolStr),
    /// Hash is computed lazily on first comparison/lookup, per spec.
    Long { bytes: Box<str>, hash: std::cell::Cell<Option<u64>> },
}

impl LuaString {
    pub fn as_str(&self) -> &str {
        match self {
            LuaString::Short(s) => s.as_str(),
            LuaString::Long { bytes, .. } => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_str().len()
    }
}

pub struct GcString {
    pub header: GcHeader,
    pub data: LuaString,
    pub hash: u64,
}

fn hash_bytes(hasher: &RandomState, s: &str) -> u64 {
    use std::hash::{BuildHasher, Hasher};
    let mut h = hasher.build_hasher();
    std::hash::Hash::hash(s.as_bytes(), &mut h);
    h.finish()
}

/// Interns short strings so that equal content always yields the same
/// `StringId`; long strings are never interned. Dead (other-white)
/// entries are skipped and lazily purged during sweep (`purge_dead`).
pub struct StringInterner {
    hasher: RandomState,
    map: HashMap<u64, Vec<StringId>, RandomState>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self { hasher: RandomState::new(), map: HashMap::with_hasher(RandomState::new()) }
    }

    pub fn hash_of(&self, s: &str) -> u64 {
        hash_bytes(&self.hasher, s)
    }

    /// Look up an existing live short string with this content. The
    /// caller supplies `is_dead`/`resurrect` so the interner does not need
    /// direct access to the string arena (kept as a free function on
    /// `Heap` instead, to avoid a circular borrow).
    pub fn find(&self, hash: u64, mut matches: impl FnMut(StringId) -> Option<bool>) -> Option<StringId> {
        let bucket = self.map.get(&hash)?;
        for &id in bucket {
            match matches(id) {
                Some(true) => return Some(id),
                _ => continue,
            }
        }
        None
    }

    pub fn insert(&mut self, hash: u64, id: StringId) {
        self.map.entry(hash).or_default().push(id);
    }

    /// Drop dead ids from the bucket lists (called at sweep entry; the
    /// strings themselves are freed by the normal `allgc` sweep).
    pub fn purge(&mut self, mut is_dead: impl FnMut(StringId) -> bool) {
        for bucket in self.map.values_mut() {
            bucket.retain(|id| !is_dead(*id));
        }
        self.map.retain(|_, b| !b.is_empty());
    }

    pub fn bucket_count(&self) -> usize {
        self.map.len()
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}
