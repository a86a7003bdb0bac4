//! Heap-allocated object graph (`spec.md` §3): the seven collectable
//! entity kinds, sharing a common `GcHeader`, stored in typed arenas.

pub mod arena;
pub mod closure;
pub mod gc_header;
pub mod ids;
pub mod proto;
pub mod strings;
pub mod table;
pub mod thread;
pub mod userdata;

use arena::Arena;
use closure::{GcClosure, GcUpvalue};
use gc_header::GcHeader;
use ids::*;
use proto::Prototype;
use strings::{GcString, StringInterner};
use table::LuaTable;
use thread::LuaThread;
use userdata::LuaUserdata;

/// Every collectable lives in exactly one of these typed arenas
/// (`spec.md` §3 invariant 1, restricted to the live set — `fixedgc`
/// objects are simply never swept, tracked via `GcHeader` age-independent
/// handling in the collector rather than a separate arena).
pub struct Heap {
    pub strings: Arena<GcString>,
    pub tables: Arena<LuaTable>,
    pub closures: Arena<GcClosure>,
    pub upvalues: Arena<GcUpvalue>,
    pub userdata: Arena<LuaUserdata>,
    pub threads: Arena<LuaThread>,
    pub protos: Arena<Prototype>,
    pub string_interner: StringInterner,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            strings: Arena::new(),
            tables: Arena::new(),
            closures: Arena::new(),
            upvalues: Arena::new(),
            userdata: Arena::new(),
            threads: Arena::new(),
            protos: Arena::new(),
            string_interner: StringInterner::new(),
        }
    }

    /// Intern (or create, for a fresh long string) a string, returning its
    /// id and whether this allocated a new object (vs. reusing one).
    pub fn new_string(&mut self, s: &str, current_white: u8) -> (StringId, bool) {
        if s.len() > strings::MAX_SHORT_LEN {
            let hash = self.string_interner.hash_of(s);
            let id = StringId(self.strings.alloc(GcString {
                header: GcHeader::new_white(current_white),
                data: strings::LuaString::Long { bytes: s.into(), hash: std::cell::Cell::new(Some(hash)) },
                hash,
            }));
            return (id, true);
        }
        let hash = self.string_interner.hash_of(s);
        let strings_ref = &self.strings;
        if let Some(id) = self.string_interner.find(hash, |id| strings_ref.get(id.0).map(|gs| gs.data.as_str() == s)) {
            // resurrect if it was wearing the other white, matching the
            // string-interning table's "revive on lookup" contract.
            if let Some(gs) = self.strings.get_mut(id.0) {
                if gs.header.is_white() {
                    gs.header.make_gray();
                }
            }
            return (id, false);
        }
        let id = StringId(self.strings.alloc(GcString {
            header: GcHeader::new_white(current_white),
            data: strings::LuaString::Short(smol_str::SmolStr::new(s)),
            hash,
        }));
        self.string_interner.insert(hash, id);
        (id, true)
    }

    pub fn string_bytes(&self, id: StringId) -> &str {
        self.strings.get(id.0).expect("dangling StringId").data.as_str()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
