//! Table entity (`spec.md` §3): array part (dense indices `1..N`) plus hash
//! part (open-addressed, collisions chained via integer offsets — a direct
//! port of the reference's `Node`/`next` scheme), a metatable reference, a
//! bitflag cache of "which common metamethods are known absent", and the
//! dead-key sentinel used while a key is unreachable but its node is still
//! physically retained (invariant 6, `spec.md` §3).

use super::gc_header::GcHeader;
use super::ids::TableId;
use crate::value::LuaValue;

/// Raw table key: compares and hashes by *content*, matching Lua's table
/// semantics (string keys are equal iff their bytes are equal, independent
/// of whether the underlying `StringId`s were interned together).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TableKey {
    Bool(bool),
    Int(i64),
    /// Bit pattern of a float key; NaN is never a legal key (callers must
    /// reject it before constructing one).
    Float(u64),
    Str(smol_str::SmolStr),
    LightUserdata(u64),
    /// Identity-based key: any other collectable (table/function/userdata/
    /// thread) compares by `(tag, arena index)`.
    Obj(u8, u32),
}

impl TableKey {
    pub fn from_value(v: &LuaValue, string_bytes: impl FnOnce() -> String) -> Option<Self> {
        if v.is_nil() {
            return None;
        }
        Some(if v.is_boolean() {
            TableKey::Bool(v.as_bool())
        } else if v.is_integer() {
            TableKey::Int(v.as_integer_unchecked())
        } else if v.is_float() {
            let f = v.as_float_unchecked();
            if f.is_nan() {
                return None;
            }
            // normalize float keys that are mathematically integral to
            // integer keys, as Lua's table access does.
            if f.fract() == 0.0 && f >= -(2f64.powi(63)) && f < 2f64.powi(63) {
                TableKey::Int(f as i64)
            } else {
                TableKey::Float(f.to_bits())
            }
        } else if v.is_string() {
            TableKey::Str(smol_str::SmolStr::new(string_bytes()))
        } else if v.tt == crate::value::VLIGHTUSERDATA {
            TableKey::LightUserdata(unsafe { v.value.p })
        } else {
            TableKey::Obj(v.tt, v.as_gc_index())
        })
    }
}

struct Node {
    key: Option<TableKey>,
    /// The key's original `LuaValue` representation, kept so iteration and
    /// metamethod lookups can hand back a real value (not just the hash
    /// key). `None` alongside `key = None` marks a genuinely empty slot;
    /// `Some(TDEADKEY-tagged value)` with `value = nil` is a dead node.
    key_value: LuaValue,
    value: LuaValue,
    /// Offset (as an absolute index) of the next node in this chain, or
    /// `None` at the chain's end. Mirrors `Node.next` from the reference.
    next: Option<u32>,
}

impl Node {
    fn empty() -> Self {
        Node { key: None, key_value: LuaValue::nil(), value: LuaValue::nil(), next: None }
    }

    fn is_empty(&self) -> bool {
        self.key.is_none()
    }
}

pub struct LuaTable {
    pub header: GcHeader,
    array: Vec<LuaValue>,
    nodes: Vec<Node>,
    /// Scans backward for a free (empty) node when inserting a colliding
    /// key, exactly like `lastfree` in the reference implementation.
    last_free: usize,
    pub metatable: Option<TableId>,
    /// Bitmask of commonly-queried metamethods known to be absent on this
    /// table's metatable, invalidated on any write (`spec.md` §4.7).
    pub no_tag_method_cache: u8,
}

pub const TM_CACHE_INDEX: u8 = 1 << 0;
pub const TM_CACHE_NEWINDEX: u8 = 1 << 1;
pub const TM_CACHE_GC: u8 = 1 << 2;
pub const TM_CACHE_LEN: u8 = 1 << 3;
pub const TM_CACHE_EQ: u8 = 1 << 4;
pub const TM_CACHE_CALL: u8 = 1 << 5;

impl LuaTable {
    pub fn new(header: GcHeader, array_hint: usize, hash_hint: usize) -> Self {
        let nodes = if hash_hint == 0 { Vec::new() } else { (0..hash_hint.next_power_of_two()).map(|_| Node::empty()).collect() };
        let last_free = nodes.len();
        LuaTable {
            header,
            array: Vec::with_capacity(array_hint),
            nodes,
            last_free,
            metatable: None,
            no_tag_method_cache: 0,
        }
    }

    pub fn invalidate_tm_cache(&mut self) {
        self.no_tag_method_cache = 0;
    }

    fn main_position(&self, key: &TableKey) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        use std::hash::{Hash, Hasher};
        let mut h = ahash::AHasher::default();
        key.hash(&mut h);
        (h.finish() as usize) & (self.nodes.len() - 1)
    }

    /// Array-part fast path: integer keys `1..=len` live in `array`.
    #[inline]
    fn array_index(&self, key: &TableKey) -> Option<usize> {
        if let TableKey::Int(i) = key {
            if *i >= 1 && (*i as usize) <= self.array.len() {
                return Some(*i as usize - 1);
            }
        }
        None
    }

    pub fn get(&self, key: &TableKey) -> LuaValue {
        if let Some(idx) = self.array_index(key) {
            return self.array[idx];
        }
        if self.nodes.is_empty() {
            return LuaValue::nil();
        }
        let mut idx = self.main_position(key);
        loop {
            let node = &self.nodes[idx];
            if node.key.as_ref() == Some(key) {
                return node.value;
            }
            match node.next {
                Some(n) => idx = n as usize,
                None => return LuaValue::nil(),
            }
        }
    }

    pub fn get_key_value(&self, key: &TableKey) -> Option<LuaValue> {
        if self.array_index(key).is_some() {
            return None; // array keys don't need a stored key value
        }
        let mut idx = self.main_position(key);
        if self.nodes.is_empty() {
            return None;
        }
        loop {
            let node = &self.nodes[idx];
            if node.key.as_ref() == Some(key) {
                return Some(node.key_value);
            }
            match node.next {
                Some(n) => idx = n as usize,
                None => return None,
            }
        }
    }

    /// Insert or overwrite. Returns `true` if a rehash is required because
    /// no free node could be found for a genuinely new key.
    pub fn set(&mut self, key: TableKey, key_value: LuaValue, value: LuaValue) {
        self.invalidate_tm_cache();
        if let Some(idx) = self.array_index(&key) {
            self.array[idx] = value;
            return;
        }
        // extend the array part for `array.len()+1` integer keys, matching
        // Lua's "migrate to array on append" behavior.
        if let TableKey::Int(i) = key {
            if i == self.array.len() as i64 + 1 && value.is_nil().then_some(()).is_none() {
                self.array.push(value);
                self.absorb_from_hash();
                return;
            }
        }
        if value.is_nil() {
            self.remove(&key);
            return;
        }
        if !self.nodes.is_empty() {
            let main = self.main_position(&key);
            if self.nodes[main].is_empty() {
                self.nodes[main] = Node { key: Some(key), key_value, value, next: None };
                return;
            }
            if self.nodes[main].key.as_ref() == Some(&key) {
                self.nodes[main].value = value;
                return;
            }
        }
        // collision, or no table at all: find a free node and rehash if
        // none remains, exactly as the reference implementation does.
        if let Some(free) = self.find_free_node() {
            let main = self.main_position(&key);
            // splice `free` into the chain headed at `main`
            let old_next = self.nodes[main].next;
            self.nodes[main].next = Some(free as u32);
            self.nodes[free] = Node { key: Some(key), key_value, value, next: old_next };
        } else {
            self.rehash(self.nodes.len().max(4) * 2);
            self.set(key, key_value, value);
        }
    }

    fn find_free_node(&mut self) -> Option<usize> {
        while self.last_free > 0 {
            self.last_free -= 1;
            if self.nodes[self.last_free].is_empty() {
                return Some(self.last_free);
            }
        }
        None
    }

    fn absorb_from_hash(&mut self) {
        // after an array append, any hash-part entry for the new index is
        // now shadowed and should be dropped.
        let key = TableKey::Int(self.array.len() as i64);
        self.remove(&key);
    }

    pub fn remove(&mut self, key: &TableKey) {
        if let Some(idx) = self.array_index(key) {
            self.array[idx] = LuaValue::nil();
            return;
        }
        if self.nodes.is_empty() {
            return;
        }
        let mut idx = self.main_position(key);
        loop {
            if self.nodes[idx].key.as_ref() == Some(key) {
                // becomes a dead node: value nil, key tombstoned, but the
                // chain link is preserved until the next rehash.
                self.nodes[idx].value = LuaValue::nil();
                self.nodes[idx].key = None;
                self.nodes[idx].key_value = LuaValue::dead_key();
                return;
            }
            match self.nodes[idx].next {
                Some(n) => idx = n as usize,
                None => return,
            }
        }
    }

    fn rehash(&mut self, new_hash_size: usize) {
        let old_nodes = std::mem::take(&mut self.nodes);
        self.nodes = (0..new_hash_size.next_power_of_two()).map(|_| Node::empty()).collect();
        self.last_free = self.nodes.len();
        for node in old_nodes {
            if let Some(key) = node.key {
                self.set(key, node.key_value, node.value);
            }
        }
    }

    /// Border `#t`: array length if the array part's tail is non-nil,
    /// else a binary search in the hash part — approximated here as the
    /// array length, which is exact whenever the table was built without
    /// holes (the common case; Lua itself only guarantees *a* border).
    pub fn length(&self) -> i64 {
        let mut n = self.array.len();
        while n > 0 && self.array[n - 1].is_nil() {
            n -= 1;
        }
        n as i64
    }

    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    pub fn array_get(&self, i: usize) -> LuaValue {
        self.array.get(i).copied().unwrap_or(LuaValue::nil())
    }

    pub fn array_set(&mut self, i: usize, v: LuaValue) {
        if i >= self.array.len() {
            self.array.resize(i + 1, LuaValue::nil());
        }
        self.array[i] = v;
    }

    /// Iterate every occupied array slot and hash node, for GC traversal
    /// and for weak-table clearing. Dead nodes (`key.is_none()` but
    /// `key_value.tt == TDEADKEY`) are yielded too so the caller can
    /// decide whether to skip them.
    pub fn iter_array(&self) -> impl Iterator<Item = (usize, &LuaValue)> {
        self.array.iter().enumerate()
    }

    pub fn iter_hash(&self) -> impl Iterator<Item = (&LuaValue, &LuaValue)> {
        self.nodes.iter().filter(|n| !n.is_empty()).map(|n| (&n.key_value, &n.value))
    }

    /// Like `iter_hash`, but yields each entry's physical node index too —
    /// needed by weak-table clearing, which must call `mark_node_dead` at
    /// the exact slot (a position in the filtered sequence is not one).
    pub fn iter_hash_indexed(&self) -> impl Iterator<Item = (usize, &LuaValue, &LuaValue)> {
        self.nodes.iter().enumerate().filter(|(_, n)| !n.is_empty()).map(|(i, n)| (i, &n.key_value, &n.value))
    }

    pub fn iter_hash_mut(&mut self) -> impl Iterator<Item = (&mut LuaValue, &mut LuaValue)> {
        self.nodes.iter_mut().filter(|n| n.key.is_some()).map(|n| (&mut n.key_value, &mut n.value))
    }

    /// Mark the node at the current iteration position dead (nil value,
    /// key replaced with the dead-key sentinel) without removing the
    /// physical slot — used by weak-table value/key clearing.
    pub fn mark_node_dead(&mut self, idx: usize) {
        self.nodes[idx].key = None;
        self.nodes[idx].key_value = LuaValue::dead_key();
        self.nodes[idx].value = LuaValue::nil();
    }

    pub fn hash_len(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h() -> GcHeader {
        GcHeader::new_white(0)
    }

    #[test]
    fn array_part_append_and_length() {
        let mut t = LuaTable::new(h(), 4, 0);
        t.set(TableKey::Int(1), LuaValue::integer(1), LuaValue::integer(10));
        t.set(TableKey::Int(2), LuaValue::integer(2), LuaValue::integer(20));
        t.set(TableKey::Int(3), LuaValue::integer(3), LuaValue::integer(30));
        assert_eq!(t.length(), 3);
        assert_eq!(t.get(&TableKey::Int(2)).as_integer_unchecked(), 20);
    }

    #[test]
    fn hash_part_collision_chain() {
        let mut t = LuaTable::new(h(), 0, 2);
        for i in 0..20 {
            let k = TableKey::Str(smol_str::SmolStr::new(format!("k{i}")));
            t.set(k.clone(), LuaValue::nil(), LuaValue::integer(i));
        }
        for i in 0..20 {
            let k = TableKey::Str(smol_str::SmolStr::new(format!("k{i}")));
            assert_eq!(t.get(&k).as_integer_unchecked(), i);
        }
    }

    #[test]
    fn remove_leaves_dead_node_until_rehash() {
        let mut t = LuaTable::new(h(), 0, 4);
        let k = TableKey::Str(smol_str::SmolStr::new("x"));
        t.set(k.clone(), LuaValue::nil(), LuaValue::integer(1));
        t.remove(&k);
        assert!(t.get(&k).is_nil());
    }
}
