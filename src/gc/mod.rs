//! Incremental tri-color mark-sweep collector (`spec.md` §4.4).
//!
//! The state machine mirrors the reference `lgc.c`: `Pause` restarts a
//! cycle by marking roots into `gray`; `Propagate` pops and traverses one
//! gray object per `step()` call (bounded by `gc_debt`); once `gray` drains,
//! `atomic()` runs synchronously (never interleaved with the mutator) and
//! hands off to the three sweep phases, then finalizers, then back to
//! `Pause`. Kept out of scope entirely: generational mode, incremental
//! emergency-GC-during-alloc reentrancy beyond the `emergency` flag, and
//! any tracing/metrics crate — diagnostics are `debug_assert!` only,
//! matching the teacher's ambient style.

mod sweep;
mod trace;
mod weak;

pub use trace::{header, header_mut, weak_mode_of, WeakMode};

use crate::object::ids::{GcId, ThreadId, TableId};
use crate::object::Heap;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GcState {
    Pause,
    Propagate,
    SwpAllGc,
    SwpFinObj,
    SwpToBeFnz,
    SwpEnd,
    CallFin,
}

/// External roots the collector must mark, supplied by the owning
/// `GlobalState` (`spec.md` §4.4 "Roots").
pub struct Roots<'a> {
    pub main_thread: ThreadId,
    pub registry: TableId,
    /// Per-basic-type metatable, indexed by the tag constants in
    /// `value::T*` (only a handful are ever populated: string, and
    /// whichever the user sets via `debug.setmetatable`-equivalent).
    pub type_metatables: &'a [Option<TableId>],
    /// Threads with at least one open upvalue — these get a second,
    /// synchronous re-mark in atomic (`spec.md` §4.4, closures rule).
    pub twups: &'a [ThreadId],
    pub current_thread: ThreadId,
}

pub struct GC {
    pub state: GcState,
    pub current_white: u8,
    pub gray: Vec<GcId>,
    pub grayagain: Vec<GcId>,
    /// Weak-value (or already-resolved weak-key-and-value) tables,
    /// pending the value-clearing pass in atomic.
    pub weak: Vec<GcId>,
    /// Weak-key tables undergoing ephemeron convergence.
    pub ephemeron: Vec<GcId>,
    /// Tables whose keys must be cleared once convergence stabilizes.
    pub allweak: Vec<GcId>,

    allgc_head: Option<GcId>,
    finobj_head: Option<GcId>,
    tobefnz_head: Option<GcId>,

    sweep_cursor: Option<GcId>,
    sweep_prev: Option<GcId>,

    pub total_bytes: isize,
    pub gc_debt: isize,
    estimate: isize,
    /// Percent (`spec.md` §4.4 "Pacing"): how much bigger the heap must
    /// grow, relative to `estimate`, before the next cycle starts.
    pub gcpause: i32,
    /// Percent: how much collector work to do per unit of allocation.
    pub gcstepmul: i32,
    /// Finalizers invoked per `CallFin` step, doubled each time none were
    /// run (`spec.md` §4.4 "Finalizers").
    pub gcfinnum: u32,
    pub emergency: bool,
    in_atomic: bool,
}

const SWEEP_BATCH: usize = 40;
const GCSTEPSIZE: isize = 1024;

impl GC {
    pub fn new() -> Self {
        GC {
            state: GcState::Pause,
            current_white: 0,
            gray: Vec::new(),
            grayagain: Vec::new(),
            weak: Vec::new(),
            ephemeron: Vec::new(),
            allweak: Vec::new(),
            allgc_head: None,
            finobj_head: None,
            tobefnz_head: None,
            sweep_cursor: None,
            sweep_prev: None,
            total_bytes: 0,
            gc_debt: 0,
            estimate: 0,
            gcpause: 200,
            gcstepmul: 200,
            gcfinnum: 1,
            emergency: false,
            in_atomic: false,
        }
    }

    #[inline]
    pub fn keep_invariant(&self) -> bool {
        matches!(self.state, GcState::Pause | GcState::Propagate) || self.in_atomic
    }

    /// Link a freshly allocated object into `allgc` (or `finobj`, if
    /// `has_finalizer`) and account its size against the debt, mirroring
    /// `luaC_newobj`. Callers (the `GlobalState` allocation helpers) call
    /// this immediately after inserting into the matching `Heap` arena.
    pub fn register_new(&mut self, heap: &mut Heap, id: GcId, size: usize, has_finalizer: bool) {
        let head = if has_finalizer { &mut self.finobj_head } else { &mut self.allgc_head };
        let old = *head;
        header_mut(heap, id).next = old;
        *head = Some(id);
        self.total_bytes += size as isize;
        self.gc_debt += size as isize;
    }

    pub fn gray_count(&self) -> usize {
        self.gray.len()
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, GcState::Pause)
    }

    /// Run one incremental unit of work. `size_hint` is how many bytes of
    /// allocation pacing credit this step should consume (callers
    /// typically pass `gcstepmul`-scaled debt; tests may pass a fixed
    /// budget directly).
    pub fn step(&mut self, heap: &mut Heap, roots: &Roots, work_budget: isize) {
        let mut budget = work_budget.max(GCSTEPSIZE);
        while budget > 0 {
            match self.state {
                GcState::Pause => {
                    self.restart_collection(heap, roots);
                    budget -= GCSTEPSIZE;
                }
                GcState::Propagate => {
                    if self.gray.is_empty() {
                        self.in_atomic = true;
                        self.atomic(heap, roots);
                        self.in_atomic = false;
                        self.state = GcState::SwpAllGc;
                        self.sweep_cursor = self.allgc_head;
                        self.sweep_prev = None;
                        budget -= GCSTEPSIZE;
                        continue;
                    }
                    let work = self.propagate_one(heap);
                    budget -= (work + 1) as isize;
                }
                GcState::SwpAllGc => {
                    let done = self.sweep_batch(heap, SWEEP_BATCH);
                    budget -= (SWEEP_BATCH * 16) as isize;
                    if done {
                        self.state = GcState::SwpFinObj;
                        self.sweep_cursor = self.finobj_head;
                        self.sweep_prev = None;
                    }
                }
                GcState::SwpFinObj => {
                    let done = self.sweep_batch(heap, SWEEP_BATCH);
                    budget -= (SWEEP_BATCH * 16) as isize;
                    if done {
                        self.state = GcState::SwpToBeFnz;
                        self.sweep_cursor = self.tobefnz_head;
                        self.sweep_prev = None;
                    }
                }
                GcState::SwpToBeFnz => {
                    // objects awaiting finalization are repainted current
                    // white so they read as alive, never physically freed
                    // here — `CallFin` frees each after its finalizer runs.
                    let done = self.repaint_tobefnz_batch(heap, SWEEP_BATCH);
                    budget -= (SWEEP_BATCH * 8) as isize;
                    if done {
                        self.state = GcState::SwpEnd;
                    }
                }
                GcState::SwpEnd => {
                    let strings = &heap.strings;
                    heap.string_interner.purge(|id| !strings.is_valid(id.0));
                    self.estimate = self.total_bytes;
                    self.state = GcState::CallFin;
                    budget -= GCSTEPSIZE;
                }
                GcState::CallFin => {
                    // finalizer invocation needs the call machinery, which
                    // the collector does not own; the VM driver pops work
                    // via `next_finalizer`/`finalizer_done` and calls
                    // `finish_call_fin` once `tobefnz` drains.
                    break;
                }
            }
        }
    }

    fn restart_collection(&mut self, heap: &mut Heap, roots: &Roots) {
        self.gray.clear();
        self.grayagain.clear();
        self.weak.clear();
        self.ephemeron.clear();
        self.allweak.clear();
        self.state = GcState::Propagate;

        self.mark_object(heap, GcId::from(roots.main_thread));
        self.mark_object(heap, GcId::from(roots.registry));
        for mt in roots.type_metatables.iter().flatten() {
            self.mark_object(heap, GcId::from(*mt));
        }
    }

    /// `CallFin` driver hooks: the next finalizable object, if any, and
    /// what to do once its `__gc` has been invoked.
    pub fn next_finalizer(&self) -> Option<GcId> {
        self.tobefnz_head
    }

    pub fn finalizer_done(&mut self, heap: &mut Heap, id: GcId) {
        debug_assert_eq!(self.tobefnz_head, Some(id), "finalizers must run in list order");
        self.tobefnz_head = header(heap, id).next;
        let size = sweep::free_object(heap, id);
        self.total_bytes -= size as isize;
    }

    pub fn finish_call_fin(&mut self) {
        if self.tobefnz_head.is_none() {
            self.state = GcState::Pause;
        }
    }

    /// Pacing (`spec.md` §4.4): debt-driven, `gcpause`/`gcstepmul`
    /// controlled. Call after every allocation; returns whether a step ran.
    pub fn check_gc(&mut self, heap: &mut Heap, roots: &Roots) -> bool {
        if self.gc_debt <= 0 {
            return false;
        }
        let work = (self.gc_debt * self.gcstepmul as isize) / 100;
        self.step(heap, roots, work.max(GCSTEPSIZE));
        if self.is_idle() {
            let threshold = (self.estimate.max(GCSTEPSIZE) * self.gcpause as isize) / 100;
            self.gc_debt = self.total_bytes - threshold;
        } else {
            self.gc_debt -= work;
        }
        true
    }

    /// Run every phase to completion synchronously (`collectgarbage("collect")`).
    pub fn full_collect(&mut self, heap: &mut Heap, roots: &Roots) {
        if !matches!(self.state, GcState::Pause) {
            // finish whatever cycle is in flight first.
            while !matches!(self.state, GcState::Pause) && !matches!(self.state, GcState::CallFin) {
                self.step(heap, roots, isize::MAX / 2);
            }
            while let Some(id) = self.next_finalizer() {
                self.finalizer_done(heap, id);
            }
            self.finish_call_fin();
        }
        self.restart_collection(heap, roots);
        while !matches!(self.state, GcState::CallFin) {
            self.step(heap, roots, isize::MAX / 2);
        }
        while let Some(id) = self.next_finalizer() {
            self.finalizer_done(heap, id);
        }
        self.finish_call_fin();
    }
}

impl Default for GC {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::gc_header::GcHeader;
    use crate::object::table::LuaTable;
    use crate::value::LuaValue;

    #[test]
    fn unreachable_table_is_collected() {
        let mut heap = Heap::new();
        let mut gc = GC::new();
        let main = crate::object::ids::ThreadId(heap.threads.alloc(crate::object::thread::LuaThread::new(GcHeader::new_white(0), 8)));
        let registry_id = heap.tables.alloc(LuaTable::new(GcHeader::new_white(0), 0, 0));
        let registry = TableId(registry_id);
        gc.register_new(&mut heap, GcId::from(main), 64, false);
        gc.register_new(&mut heap, GcId::from(registry), 64, false);

        // an orphan table: allocated, registered, but never reachable.
        let orphan_idx = heap.tables.alloc(LuaTable::new(GcHeader::new_white(gc.current_white), 0, 0));
        let orphan = TableId(orphan_idx);
        gc.register_new(&mut heap, GcId::from(orphan), 64, false);

        let type_mts: Vec<Option<TableId>> = Vec::new();
        let twups: Vec<ThreadId> = Vec::new();
        let r = Roots { main_thread: main, registry, type_metatables: &type_mts, twups: &twups, current_thread: main };

        gc.full_collect(&mut heap, &r);
        assert!(!heap.tables.is_valid(orphan_idx), "unreachable table must be swept");
        assert!(heap.tables.is_valid(registry_id), "reachable table must survive");
    }

    #[test]
    fn reachable_string_survives_two_cycles() {
        let mut heap = Heap::new();
        let mut gc = GC::new();
        let main = crate::object::ids::ThreadId(heap.threads.alloc(crate::object::thread::LuaThread::new(GcHeader::new_white(0), 8)));
        let registry_id = heap.tables.alloc(LuaTable::new(GcHeader::new_white(0), 1, 0));
        let registry = TableId(registry_id);
        gc.register_new(&mut heap, GcId::from(main), 64, false);
        gc.register_new(&mut heap, GcId::from(registry), 64, false);

        let (sid, _new) = heap.new_string("kept", gc.current_white);
        gc.register_new(&mut heap, GcId::from(sid), 16, false);
        heap.tables.get_mut(registry_id).unwrap().set(
            crate::object::table::TableKey::Int(1),
            LuaValue::integer(1),
            LuaValue::short_string(sid),
        );

        let type_mts: Vec<Option<TableId>> = Vec::new();
        let twups: Vec<ThreadId> = Vec::new();
        let r = Roots { main_thread: main, registry, type_metatables: &type_mts, twups: &twups, current_thread: main };

        gc.full_collect(&mut heap, &r);
        gc.full_collect(&mut heap, &r);
        assert!(heap.strings.is_valid(sid.0), "string reachable through the registry must survive repeated cycles");
    }

    fn fresh_state() -> (Heap, GC, ThreadId, TableId) {
        let mut heap = Heap::new();
        let mut gc = GC::new();
        let main = ThreadId(heap.threads.alloc(crate::object::thread::LuaThread::new(GcHeader::new_white(0), 8)));
        let registry = TableId(heap.tables.alloc(LuaTable::new(GcHeader::new_white(0), 0, 0)));
        gc.register_new(&mut heap, GcId::from(main), 64, false);
        gc.register_new(&mut heap, GcId::from(registry), 64, false);
        (heap, gc, main, registry)
    }

    fn set_mode(heap: &mut Heap, gc: &mut GC, table: TableId, mode: &str) {
        let mt = TableId(heap.tables.alloc(LuaTable::new(GcHeader::new_white(gc.current_white), 0, 1)));
        gc.register_new(heap, GcId::from(mt), 48, false);
        let (mode_id, _) = heap.new_string(mode, gc.current_white);
        gc.register_new(heap, GcId::from(mode_id), 16, false);
        heap.tables.get_mut(mt.0).unwrap().set(
            crate::object::table::TableKey::Str(smol_str::SmolStr::new("__mode")),
            LuaValue::short_string(mode_id),
            LuaValue::short_string(mode_id),
        );
        heap.tables.get_mut(table.0).unwrap().metatable = Some(mt);
    }

    /// *Weak-value table* (`spec.md` §8 end-to-end scenario 3): a
    /// `__mode="v"` table holding the only reference to a value table must
    /// give it up once no other reference remains.
    #[test]
    fn weak_value_table_clears_unreferenced_value() {
        let (mut heap, mut gc, main, registry) = fresh_state();
        let t = TableId(heap.tables.alloc(LuaTable::new(GcHeader::new_white(gc.current_white), 1, 0)));
        gc.register_new(&mut heap, GcId::from(t), 48, false);
        set_mode(&mut heap, &mut gc, t, "v");

        let inner = TableId(heap.tables.alloc(LuaTable::new(GcHeader::new_white(gc.current_white), 0, 1)));
        gc.register_new(&mut heap, GcId::from(inner), 48, false);
        heap.tables.get_mut(inner.0).unwrap().set(
            crate::object::table::TableKey::Str(smol_str::SmolStr::new("x")),
            LuaValue::short_string(heap.new_string("x", gc.current_white).0),
            LuaValue::integer(1),
        );
        heap.tables.get_mut(t.0).unwrap().array_set(0, LuaValue::table(inner));

        // root `t` through the registry; `inner` is reachable only through `t`.
        heap.tables.get_mut(registry.0).unwrap().set(
            crate::object::table::TableKey::Int(1),
            LuaValue::integer(1),
            LuaValue::table(t),
        );

        let type_mts: Vec<Option<TableId>> = Vec::new();
        let twups: Vec<ThreadId> = Vec::new();
        let r = Roots { main_thread: main, registry, type_metatables: &type_mts, twups: &twups, current_thread: main };
        gc.full_collect(&mut heap, &r);

        assert!(!heap.tables.is_valid(inner.0), "value kept alive only by a weak-value table must be collected");
        assert!(heap.tables.get(t.0).unwrap().array_get(0).is_nil(), "cleared slot reads back as nil");
    }

    /// *Ephemeron convergence* (`spec.md` §8 end-to-end scenario 4): a
    /// `__mode="k"` table whose only path to its key is through the table
    /// itself must drop both key and value once nothing else reaches the
    /// key.
    #[test]
    fn ephemeron_drops_entry_when_key_unreferenced() {
        let (mut heap, mut gc, main, registry) = fresh_state();
        let t = TableId(heap.tables.alloc(LuaTable::new(GcHeader::new_white(gc.current_white), 0, 1)));
        gc.register_new(&mut heap, GcId::from(t), 48, false);
        set_mode(&mut heap, &mut gc, t, "k");

        let k = TableId(heap.tables.alloc(LuaTable::new(GcHeader::new_white(gc.current_white), 0, 0)));
        gc.register_new(&mut heap, GcId::from(k), 48, false);
        heap.tables.get_mut(t.0).unwrap().set(
            crate::object::table::TableKey::Obj(crate::value::VTABLE, k.0),
            LuaValue::table(k),
            LuaValue::table(k), // value re-references the key, per the scenario's k -> v -> k shape
        );

        heap.tables.get_mut(registry.0).unwrap().set(
            crate::object::table::TableKey::Int(1),
            LuaValue::integer(1),
            LuaValue::table(t),
        );

        let type_mts: Vec<Option<TableId>> = Vec::new();
        let twups: Vec<ThreadId> = Vec::new();
        let r = Roots { main_thread: main, registry, type_metatables: &type_mts, twups: &twups, current_thread: main };
        gc.full_collect(&mut heap, &r);

        assert!(!heap.tables.is_valid(k.0), "key reachable only through its own weak-key table must be collected");
    }

    /// *Incremental sweep* (`spec.md` §8 end-to-end scenario 2): after
    /// unrooting a large table, stepping the collector must monotonically
    /// shrink `total_bytes` and never exceed a bounded per-step budget.
    #[test]
    fn incremental_step_shrinks_heap_monotonically() {
        let (mut heap, mut gc, main, registry) = fresh_state();
        let t = TableId(heap.tables.alloc(LuaTable::new(GcHeader::new_white(gc.current_white), 0, 10_000)));
        gc.register_new(&mut heap, GcId::from(t), 48, false);
        for i in 0..10_000i64 {
            let s = format!("s{i}");
            let (sid, _) = heap.new_string(&s, gc.current_white);
            gc.register_new(&mut heap, GcId::from(sid), 24 + s.len(), false);
            heap.tables.get_mut(t.0).unwrap().set(crate::object::table::TableKey::Int(i), LuaValue::integer(i), LuaValue::short_string(sid));
        }
        heap.tables.get_mut(registry.0).unwrap().set(
            crate::object::table::TableKey::Int(1),
            LuaValue::integer(1),
            LuaValue::table(t),
        );

        let type_mts: Vec<Option<TableId>> = Vec::new();
        let twups: Vec<ThreadId> = Vec::new();
        let r = Roots { main_thread: main, registry, type_metatables: &type_mts, twups: &twups, current_thread: main };

        // fully collect once so the table above is actually marked live,
        // then unroot it and drive the collector incrementally.
        gc.full_collect(&mut heap, &r);
        heap.tables.get_mut(registry.0).unwrap().remove(&crate::object::table::TableKey::Int(1));

        let mut last_total = gc.total_bytes;
        let mut steps = 0;
        loop {
            gc.step(&mut heap, &r, 4096);
            assert!(gc.total_bytes <= last_total, "total_bytes must never grow mid-collection");
            last_total = gc.total_bytes;
            steps += 1;
            assert!(steps < 100_000, "collector did not converge");
            if matches!(gc.state, GcState::CallFin) {
                while let Some(id) = gc.next_finalizer() {
                    gc.finalizer_done(&mut heap, id);
                }
                gc.finish_call_fin();
            }
            if gc.is_idle() {
                break;
            }
        }
        assert!(!heap.tables.is_valid(t.0), "unrooted table must eventually be swept");
    }
}
