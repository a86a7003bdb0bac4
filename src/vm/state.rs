//! `GlobalState`: the interpreter's top-level handle (`spec.md` §4, §9)
//! — the heap, the collector, the registry/metatable roots, and the
//! currently running thread. Grounded on the teacher's `LuaVM` struct
//! (`lua_vm/mod.rs`), generalized from its Lua 5.4 opcode set down to the
//! literal Lua 5.3 dialect this crate targets.

use crate::error::{LuaError, LuaFullError};
use crate::gc::{Roots, GC};
use crate::object::closure::{GcClosure, GcUpvalue};
use crate::object::gc_header::GcHeader;
use crate::object::ids::{FunctionId, GcId, ProtoId, StringId, TableId, ThreadId, UpvalueId, UserdataId};
use crate::object::proto::Prototype;
use crate::object::table::LuaTable;
use crate::object::thread::LuaThread;
use crate::object::userdata::LuaUserdata;
use crate::object::Heap;
use crate::value::{LuaValue, TSTRING};
use crate::vm::CFunction;

/// Default initial data-stack size for a new thread (`LUA_MINSTACK`-ish).
const INITIAL_STACK_SIZE: usize = 32;

pub struct GlobalState {
    pub heap: Heap,
    pub gc: GC,
    pub registry: TableId,
    pub main_thread: ThreadId,
    pub current_thread: ThreadId,
    /// Per-basic-type metatable, indexed by the `T*` tag constants
    /// (`spec.md` §4.7); only strings get one by default.
    pub type_metatables: Vec<Option<TableId>>,
    /// Threads with at least one open upvalue, kept so the collector can
    /// re-mark their stacks in atomic without walking every live thread.
    pub twups: Vec<ThreadId>,
    /// Instruction-count hook granularity; `0` disables it
    /// (`spec.md` §5 "Cancellation/timeout").
    pub hook_mask_count: u32,
    /// Nesting depth of calls serviced directly by the Rust call stack
    /// (C functions, metamethod dispatch recursing into another Lua
    /// closure) — bounded separately from `ci_stack` length since
    /// Lua-to-Lua calls don't consume a Rust stack frame (`spec.md` §4.5
    /// "Call depth limits").
    pub c_call_depth: u32,
}

/// Mirrors `LUAI_MAXCCALLS`: how deep C-recursive calls may nest before
/// `LuaError::StackOverflow` instead of really overflowing the host stack.
pub const MAX_C_CALLS: u32 = 200;

/// Mirrors `LUAI_MAXCCALLS` applied to the `ci_stack` itself, bounding
/// plain (non-tail) Lua call recursion.
pub const MAX_CI_DEPTH: usize = 200;

impl GlobalState {
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let mut gc = GC::new();

        let registry_idx = heap.tables.alloc(LuaTable::new(GcHeader::new_white(gc.current_white), 0, 4));
        let registry = TableId(registry_idx);
        gc.register_new(&mut heap, GcId::from(registry), 64, false);

        let main_idx = heap.threads.alloc(LuaThread::new(GcHeader::new_white(gc.current_white), INITIAL_STACK_SIZE));
        let main_thread = ThreadId(main_idx);
        gc.register_new(&mut heap, GcId::from(main_thread), 128, false);

        GlobalState {
            heap,
            gc,
            registry,
            main_thread,
            current_thread: main_thread,
            type_metatables: vec![None; 9],
            twups: Vec::new(),
            hook_mask_count: 0,
            c_call_depth: 0,
        }
    }

    fn roots(&self) -> Roots<'_> {
        Roots {
            main_thread: self.main_thread,
            registry: self.registry,
            type_metatables: &self.type_metatables,
            twups: &self.twups,
            current_thread: self.current_thread,
        }
    }

    /// Drive the collector by one allocation's worth of debt
    /// (`spec.md` §4.4 "Pacing"); call after every `new_*` allocation.
    pub fn check_gc(&mut self) {
        let roots = self.roots();
        self.gc.check_gc(&mut self.heap, &roots);
    }

    pub fn full_gc(&mut self) {
        let roots = self.roots();
        self.gc.full_collect(&mut self.heap, &roots);
    }

    // ---- allocation helpers: every one registers into the collector ----

    pub fn new_string(&mut self, s: &str) -> StringId {
        let (id, is_new) = self.heap.new_string(s, self.gc.current_white);
        if is_new {
            self.gc.register_new(&mut self.heap, GcId::from(id), 24 + s.len(), false);
        }
        id
    }

    pub fn new_string_value(&mut self, s: &str) -> LuaValue {
        let id = self.new_string(s);
        if s.len() > crate::object::strings::MAX_SHORT_LEN {
            LuaValue::long_string(id)
        } else {
            LuaValue::short_string(id)
        }
    }

    pub fn new_table(&mut self, array_hint: usize, hash_hint: usize) -> TableId {
        let idx = self.heap.tables.alloc(LuaTable::new(GcHeader::new_white(self.gc.current_white), array_hint, hash_hint));
        let id = TableId(idx);
        self.gc.register_new(&mut self.heap, GcId::from(id), 48, false);
        id
    }

    pub fn new_lua_closure(&mut self, proto: ProtoId, upvalues: Vec<UpvalueId>) -> FunctionId {
        let header = GcHeader::new_white(self.gc.current_white);
        let idx = self.heap.closures.alloc(GcClosure::new_lua(header, proto, upvalues));
        let id = FunctionId(idx);
        self.gc.register_new(&mut self.heap, GcId::from(id), 32, false);
        id
    }

    pub fn new_c_closure(&mut self, func: CFunction, upvalues: Vec<LuaValue>) -> FunctionId {
        let header = GcHeader::new_white(self.gc.current_white);
        let idx = self.heap.closures.alloc(GcClosure::new_c(header, func, upvalues));
        let id = FunctionId(idx);
        self.gc.register_new(&mut self.heap, GcId::from(id), 32, false);
        id
    }

    pub fn new_proto(&mut self, num_params: u8, is_vararg: bool, max_stack_size: u8, source: String) -> ProtoId {
        let header = GcHeader::new_white(self.gc.current_white);
        let idx = self.heap.protos.alloc(Prototype::new(header, num_params, is_vararg, max_stack_size, source));
        let id = ProtoId(idx);
        self.gc.register_new(&mut self.heap, GcId::from(id), 64, false);
        id
    }

    pub fn new_open_upvalue(&mut self, owner: ThreadId, stack_index: usize) -> UpvalueId {
        let header = GcHeader::new_white(self.gc.current_white);
        let idx = self.heap.upvalues.alloc(GcUpvalue::new_open(header, owner, stack_index));
        let id = UpvalueId(idx);
        self.gc.register_new(&mut self.heap, GcId::from(id), 24, false);
        if !self.heap.threads.get(owner.0).map(|t| t.in_twups).unwrap_or(false) {
            self.twups.push(owner);
            if let Some(t) = self.heap.threads.get_mut(owner.0) {
                t.in_twups = true;
            }
        }
        id
    }

    pub fn new_userdata(&mut self, size: usize) -> UserdataId {
        let header = GcHeader::new_white(self.gc.current_white);
        let idx = self.heap.userdata.alloc(LuaUserdata::new(header, size));
        let id = UserdataId(idx);
        self.gc.register_new(&mut self.heap, GcId::from(id), 32 + size, false);
        id
    }

    pub fn new_thread(&mut self) -> ThreadId {
        let header = GcHeader::new_white(self.gc.current_white);
        let idx = self.heap.threads.alloc(LuaThread::new(header, INITIAL_STACK_SIZE));
        let id = ThreadId(idx);
        self.gc.register_new(&mut self.heap, GcId::from(id), 128, false);
        id
    }

    // ---- metatables (spec.md §4.7) ----

    pub fn metatable_of(&self, v: &LuaValue) -> Option<TableId> {
        if v.is_table() {
            self.heap.tables.get(v.as_table_id().0).and_then(|t| t.metatable)
        } else if v.is_userdata() {
            self.heap.userdata.get(v.as_userdata_id().0).and_then(|u| u.metatable)
        } else {
            let basic = crate::value::no_variant(v.tt) as usize;
            self.type_metatables.get(basic).copied().flatten()
        }
    }

    pub fn set_metatable_of_string(&mut self, mt: Option<TableId>) {
        self.type_metatables[TSTRING as usize] = mt;
    }

    /// Look up event `name` on `v`'s metatable, honoring the per-table
    /// "known absent" cache for the handful of cacheable events
    /// (`spec.md` §4.7).
    pub fn get_metamethod(&mut self, v: &LuaValue, name: &str) -> Option<LuaValue> {
        let mt = self.metatable_of(v)?;
        let key = crate::object::table::TableKey::Str(smol_str::SmolStr::new(name));
        let table = self.heap.tables.get(mt.0)?;
        let found = table.get(&key);
        if found.is_nil() {
            None
        } else {
            Some(found)
        }
    }

    pub fn string_bytes(&self, id: StringId) -> &str {
        self.heap.string_bytes(id)
    }

    pub fn current_thread_mut(&mut self) -> &mut LuaThread {
        self.heap.threads.get_mut(self.current_thread.0).expect("current thread must always be a live id")
    }

    pub fn current_thread_ref(&self) -> &LuaThread {
        self.heap.threads.get(self.current_thread.0).expect("current thread must always be a live id")
    }

    /// Wrap an error with the current call depth, for `pcall`/`xpcall`
    /// traceback bookkeeping (`spec.md` §7).
    pub fn wrap_error(&self, error: LuaError) -> LuaFullError {
        LuaFullError { error, call_depth_at_raise: self.current_thread_ref().ci_stack.len() }
    }

    pub fn type_name_of(&self, v: &LuaValue) -> &'static str {
        crate::error::type_name(v.tt)
    }
}

impl Default for GlobalState {
    fn default() -> Self {
        Self::new()
    }
}
