//! Per-type traversal, write barriers, and weak-table mode lookup
//! (`spec.md` §4.3, §4.4 "Traversal rules per type" and "Weak tables").

use crate::object::closure::{ClosureKind, UpvalueState};
use crate::object::gc_header::GcHeader;
use crate::object::ids::{GcId, GcObjectKind};
use crate::object::Heap;
use crate::value::LuaValue;

use super::GC;

#[inline]
pub fn header<'a>(heap: &'a Heap, id: GcId) -> &'a GcHeader {
    match id.kind {
        GcObjectKind::String => &heap.strings.get(id.index).expect("dangling id").header,
        GcObjectKind::Table => &heap.tables.get(id.index).expect("dangling id").header,
        GcObjectKind::Function => &heap.closures.get(id.index).expect("dangling id").header,
        GcObjectKind::Upvalue => &heap.upvalues.get(id.index).expect("dangling id").header,
        GcObjectKind::Userdata => &heap.userdata.get(id.index).expect("dangling id").header,
        GcObjectKind::Thread => &heap.threads.get(id.index).expect("dangling id").header,
        GcObjectKind::Proto => &heap.protos.get(id.index).expect("dangling id").header,
    }
}

#[inline]
pub fn header_mut<'a>(heap: &'a mut Heap, id: GcId) -> &'a mut GcHeader {
    match id.kind {
        GcObjectKind::String => &mut heap.strings.get_mut(id.index).expect("dangling id").header,
        GcObjectKind::Table => &mut heap.tables.get_mut(id.index).expect("dangling id").header,
        GcObjectKind::Function => &mut heap.closures.get_mut(id.index).expect("dangling id").header,
        GcObjectKind::Upvalue => &mut heap.upvalues.get_mut(id.index).expect("dangling id").header,
        GcObjectKind::Userdata => &mut heap.userdata.get_mut(id.index).expect("dangling id").header,
        GcObjectKind::Thread => &mut heap.threads.get_mut(id.index).expect("dangling id").header,
        GcObjectKind::Proto => &mut heap.protos.get_mut(id.index).expect("dangling id").header,
    }
}

pub fn gc_kind_of(v: &LuaValue) -> GcObjectKind {
    use crate::value::*;
    match v.tt {
        VSHRSTR | VLNGSTR => GcObjectKind::String,
        VTABLE => GcObjectKind::Table,
        VLCLCLOSURE | VCCLOSURE => GcObjectKind::Function,
        VUSERDATA => GcObjectKind::Userdata,
        VTHREAD => GcObjectKind::Thread,
        _ => unreachable!("not a collectable value: tt={:#x}", v.tt),
    }
}

impl GC {
    /// Mark a value reachable: if it is collectable and white, turn it
    /// gray and enqueue it on `gray` — except trivial (childless) kinds,
    /// which go straight to black.
    pub fn mark_value(&mut self, heap: &mut Heap, v: &LuaValue) {
        if !v.is_collectable() {
            return;
        }
        let id = GcId::new(gc_kind_of(v), v.as_gc_index());
        self.mark_object(heap, id);
    }

    pub fn mark_object(&mut self, heap: &mut Heap, id: GcId) {
        let h = header_mut(heap, id);
        if !h.is_white() {
            return;
        }
        if id.kind == GcObjectKind::String {
            h.make_black();
            return;
        }
        h.make_gray();
        self.gray.push(id);
    }

    /// Pop and fully traverse one gray object, per the per-type rules in
    /// `spec.md` §4.4. Returns an approximate work size for debt pacing.
    pub fn propagate_one(&mut self, heap: &mut Heap) -> usize {
        let Some(id) = self.gray.pop() else { return 0 };
        match id.kind {
            GcObjectKind::Table => self.traverse_table(heap, id),
            GcObjectKind::Function => self.traverse_closure(heap, id),
            GcObjectKind::Userdata => self.traverse_userdata(heap, id),
            GcObjectKind::Upvalue => self.traverse_upvalue(heap, id),
            GcObjectKind::Thread => self.traverse_thread(heap, id, false),
            GcObjectKind::Proto => self.traverse_proto(heap, id),
            GcObjectKind::String => 0,
        }
    }

    fn traverse_table(&mut self, heap: &mut Heap, id: GcId) -> usize {
        if let Some(mt) = heap.tables.get(id.index).and_then(|t| t.metatable) {
            self.mark_object(heap, GcId::new(GcObjectKind::Table, mt.0));
        }
        match weak_mode_of(heap, id.index) {
            WeakMode::None => {
                let t = heap.tables.get(id.index).expect("dangling table");
                let arr_vals: Vec<LuaValue> = t.iter_array().map(|(_, v)| *v).collect();
                let hash_pairs: Vec<(LuaValue, LuaValue)> = t.iter_hash().map(|(k, v)| (*k, *v)).collect();
                for v in &arr_vals {
                    self.mark_value(heap, v);
                }
                for (k, v) in &hash_pairs {
                    self.mark_value(heap, k);
                    self.mark_value(heap, v);
                }
                header_mut(heap, id).make_black();
                arr_vals.len() + hash_pairs.len() * 2
            }
            WeakMode::Value => {
                // keys are strongly held; mark them now. Values are
                // cleared (if still white) once marking settles, in
                // atomic's weak-value pass.
                let t = heap.tables.get(id.index).expect("dangling table");
                let keys: Vec<LuaValue> = t.iter_hash().map(|(k, _)| *k).collect();
                for k in &keys {
                    self.mark_value(heap, k);
                }
                self.weak.push(id);
                keys.len()
            }
            WeakMode::Key => {
                // neither keys nor values are marked here; convergence in
                // atomic marks a value only once its key is independently
                // reachable.
                self.ephemeron.push(id);
                0
            }
            WeakMode::KeyAndValue => {
                // fully weak: nothing marked from this table at all.
                self.allweak.push(id);
                0
            }
        }
    }

    fn traverse_closure(&mut self, heap: &mut Heap, id: GcId) -> usize {
        let c = heap.closures.get(id.index).expect("dangling closure");
        let mut work = 0;
        match &c.kind {
            ClosureKind::Lua { proto, upvalues } => {
                let proto_id = GcId::new(GcObjectKind::Proto, proto.0);
                let upvalue_ids: Vec<_> = upvalues.iter().map(|u| GcId::new(GcObjectKind::Upvalue, u.0)).collect();
                self.mark_object(heap, proto_id);
                for uv in upvalue_ids {
                    self.mark_object(heap, uv);
                    work += 1;
                }
            }
            ClosureKind::C { upvalues, .. } => {
                let values: Vec<LuaValue> = upvalues.clone();
                for v in &values {
                    self.mark_value(heap, v);
                }
                work += values.len();
            }
        }
        header_mut(heap, id).make_black();
        work
    }

    fn traverse_upvalue(&mut self, heap: &mut Heap, id: GcId) -> usize {
        let uv = heap.upvalues.get(id.index).expect("dangling upvalue");
        if let UpvalueState::Closed(v) = uv.state {
            self.mark_value(heap, &v);
        }
        header_mut(heap, id).make_black();
        1
    }

    fn traverse_userdata(&mut self, heap: &mut Heap, id: GcId) -> usize {
        let ud = heap.userdata.get(id.index).expect("dangling userdata");
        let uv = ud.user_value;
        let mt = ud.metatable;
        self.mark_value(heap, &uv);
        if let Some(mt) = mt {
            self.mark_object(heap, GcId::new(GcObjectKind::Table, mt.0));
        }
        header_mut(heap, id).make_black();
        2
    }

    fn traverse_proto(&mut self, heap: &mut Heap, id: GcId) -> usize {
        // a white cached closure is dropped from the cache slot instead of
        // kept alive by it alone (`spec.md` §9, Open Question decision).
        if let Some(cache_fn) = heap.protos.get(id.index).and_then(|p| p.cache) {
            let cid = GcId::new(GcObjectKind::Function, cache_fn.0);
            if header(heap, cid).is_white() {
                heap.protos.get_mut(id.index).unwrap().cache = None;
            }
        }
        let p = heap.protos.get(id.index).expect("dangling proto");
        let consts: Vec<LuaValue> = p.constants.clone();
        let nested: Vec<_> = p.protos.iter().map(|pr| GcId::new(GcObjectKind::Proto, pr.0)).collect();
        for c in &consts {
            self.mark_value(heap, c);
        }
        for n in &nested {
            self.mark_object(heap, *n);
        }
        header_mut(heap, id).make_black();
        consts.len() + nested.len()
    }

    /// Mark a thread's live stack slots `[0, top)`. In the atomic phase,
    /// additionally nil out `[top, len)` (stale slots past the current
    /// top must not pin dead values) and clear the `touched` flag.
    pub fn traverse_thread(&mut self, heap: &mut Heap, id: GcId, atomic: bool) -> usize {
        let top = heap.threads.get(id.index).and_then(|t| t.ci_stack.last()).map(|ci| ci.top).unwrap_or(0);
        let values: Vec<LuaValue> =
            heap.threads.get(id.index).map(|t| t.stack[..top.min(t.stack.len())].to_vec()).unwrap_or_default();
        for v in &values {
            self.mark_value(heap, v);
        }
        if atomic {
            if let Some(t) = heap.threads.get_mut(id.index) {
                let len = t.stack.len();
                let from = top.min(len);
                for slot in &mut t.stack[from..len] {
                    *slot = LuaValue::nil();
                }
                t.touched = false;
            }
        }
        header_mut(heap, id).make_black();
        values.len()
    }

    // ---- write barriers (spec.md §4.3) ----

    /// Forward barrier: strings, prototypes, closed upvalues, userdata
    /// user-value. Used when a black container acquires a white child.
    pub fn barrier_forward(&mut self, heap: &mut Heap, container: GcId, child: &LuaValue) {
        if !self.keep_invariant() {
            // sweep-phase fast path: repaint the container white instead
            // of re-entering the mark barrier for it.
            header_mut(heap, container).make_white(self.current_white);
            return;
        }
        if !child.is_collectable() {
            return;
        }
        let child_id = GcId::new(gc_kind_of(child), child.as_gc_index());
        if header(heap, container).is_black() && header(heap, child_id).is_white() {
            self.mark_object(heap, child_id);
        }
    }

    /// Backward barrier: tables. Demotes the table to gray and relinks it
    /// into `grayagain` instead of marking the child directly, so it is
    /// re-traversed (and all its current children marked) in atomic.
    pub fn barrier_back(&mut self, heap: &mut Heap, table: crate::object::ids::TableId) {
        let id = GcId::new(GcObjectKind::Table, table.0);
        let h = header_mut(heap, id);
        if h.is_black() {
            h.make_gray();
            self.grayagain.push(id);
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WeakMode {
    None,
    Key,
    Value,
    KeyAndValue,
}

pub fn weak_mode_of(heap: &Heap, table_idx: u32) -> WeakMode {
    let Some(t) = heap.tables.get(table_idx) else { return WeakMode::None };
    let Some(mt_id) = t.metatable else { return WeakMode::None };
    let Some(mt) = heap.tables.get(mt_id.0) else { return WeakMode::None };
    let key = crate::object::table::TableKey::Str(smol_str::SmolStr::new("__mode"));
    let v = mt.get(&key);
    if !v.is_string() {
        return WeakMode::None;
    }
    let s = heap.string_bytes(v.as_string_id());
    let (has_k, has_v) = (s.contains('k'), s.contains('v'));
    match (has_k, has_v) {
        (true, true) => WeakMode::KeyAndValue,
        (true, false) => WeakMode::Key,
        (false, true) => WeakMode::Value,
        (false, false) => WeakMode::None,
    }
}
