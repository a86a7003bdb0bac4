//! Atomic-phase orchestration: the synchronous, non-interleaved step that
//! finishes one mark cycle — re-marking stacks, ephemeron convergence,
//! finalizer resurrection, and weak-table clearing (`spec.md` §4.4
//! "Atomic phase" and "Weak tables").

use crate::object::ids::GcId;
use crate::object::Heap;
use crate::value::LuaValue;

use super::trace::{gc_kind_of, header, header_mut};
use super::{Roots, GC};

impl GC {
    pub(super) fn atomic(&mut self, heap: &mut Heap, roots: &Roots) {
        // re-mark the running thread's current stack top (it may have
        // grown or shrunk since `Propagate` last saw it) and every thread
        // that was `touched` while holding open upvalues.
        self.remark_thread(heap, roots.current_thread);
        for &t in roots.twups {
            self.remark_thread(heap, t);
        }
        self.drain_gray(heap);

        // everything deferred by a backward-barrier write during the
        // incremental phase gets a full re-traversal now.
        self.gray.append(&mut self.grayagain);
        self.drain_gray(heap);

        self.converge_ephemerons(heap);

        // finalizer resurrection must happen before weak-key clearing, so
        // a table keyed on a soon-to-be-finalized object does not have
        // that key cleared out from under the finalizer.
        self.separate_tobefnz(heap);
        self.drain_gray(heap);

        self.clear_weak_values(heap);
        self.clear_weak_keys(heap);

        self.current_white = crate::object::gc_header::other_white(self.current_white);
    }

    fn remark_thread(&mut self, heap: &mut Heap, id: crate::object::ids::ThreadId) {
        let gid = GcId::from(id);
        header_mut(heap, gid).make_gray();
        self.traverse_thread(heap, gid, true);
    }

    fn drain_gray(&mut self, heap: &mut Heap) {
        while !self.gray.is_empty() {
            self.propagate_one(heap);
        }
    }

    /// Repeatedly scan every ephemeron (weak-key) table: whenever a key is
    /// already reachable, mark its value. Stops once a full pass makes no
    /// progress, then hands every remaining ephemeron table to `allweak`
    /// so the shared key-clearing pass below disposes of dead entries.
    fn converge_ephemerons(&mut self, heap: &mut Heap) {
        loop {
            let mut progress = false;
            for i in 0..self.ephemeron.len() {
                let id = self.ephemeron[i];
                let Some(t) = heap.tables.get(id.index) else { continue };
                let pairs: Vec<(LuaValue, LuaValue)> = t.iter_hash().map(|(k, v)| (*k, *v)).collect();
                for (k, v) in pairs {
                    if !k.is_collectable() || !v.is_collectable() {
                        continue;
                    }
                    let kid = GcId::new(gc_kind_of(&k), k.as_gc_index());
                    if header(heap, kid).is_white() {
                        continue;
                    }
                    let vid = GcId::new(gc_kind_of(&v), v.as_gc_index());
                    if header(heap, vid).is_white() {
                        self.mark_object(heap, vid);
                        progress = true;
                    }
                }
            }
            self.drain_gray(heap);
            if !progress {
                break;
            }
        }
        self.allweak.append(&mut self.ephemeron);
    }

    /// Move every still-unreachable, not-yet-finalized object off
    /// `finobj` onto `tobefnz`, resurrecting it (and everything it in
    /// turn references) so its `__gc` metamethod sees a consistent graph.
    fn separate_tobefnz(&mut self, heap: &mut Heap) {
        let mut cursor = self.finobj_head;
        let mut prev: Option<GcId> = None;
        while let Some(id) = cursor {
            let next = header(heap, id).next;
            let h = header(heap, id);
            if h.is_white() && !h.is_finalized() {
                match prev {
                    Some(p) => header_mut(heap, p).next = next,
                    None => self.finobj_head = next,
                }
                header_mut(heap, id).next = self.tobefnz_head;
                self.tobefnz_head = Some(id);
                header_mut(heap, id).set_finalized(true);
                self.mark_object(heap, id);
            } else {
                prev = Some(id);
            }
            cursor = next;
        }
    }

    fn clear_weak_values(&mut self, heap: &mut Heap) {
        let ids: Vec<GcId> = std::mem::take(&mut self.weak);
        for id in ids {
            clear_dead_values(heap, id);
        }
    }

    fn clear_weak_keys(&mut self, heap: &mut Heap) {
        let ids: Vec<GcId> = std::mem::take(&mut self.allweak);
        for id in ids {
            clear_dead_keys(heap, id);
        }
    }
}

fn clear_dead_values(heap: &mut Heap, id: GcId) {
    let Some(t) = heap.tables.get(id.index) else { return };
    let mut to_clear_array = Vec::new();
    for (i, v) in t.iter_array() {
        if v.is_collectable() {
            let vid = GcId::new(gc_kind_of(v), v.as_gc_index());
            if header(heap, vid).is_white() {
                to_clear_array.push(i);
            }
        }
    }
    let mut to_clear_hash = Vec::new();
    for (idx, _k, v) in t.iter_hash_indexed() {
        if v.is_collectable() {
            let vid = GcId::new(gc_kind_of(v), v.as_gc_index());
            if header(heap, vid).is_white() {
                to_clear_hash.push(idx);
            }
        }
    }
    let t = heap.tables.get_mut(id.index).expect("checked above");
    for i in to_clear_array {
        t.array_set(i, LuaValue::nil());
    }
    for idx in to_clear_hash {
        t.mark_node_dead(idx);
    }
}

fn clear_dead_keys(heap: &mut Heap, id: GcId) {
    let Some(t) = heap.tables.get(id.index) else { return };
    let mut to_clear = Vec::new();
    for (idx, k, _v) in t.iter_hash_indexed() {
        if k.is_collectable() {
            let kid = GcId::new(gc_kind_of(k), k.as_gc_index());
            if header(heap, kid).is_white() {
                to_clear.push(idx);
            }
        }
    }
    let t = heap.tables.get_mut(id.index).expect("checked above");
    for idx in to_clear {
        t.mark_node_dead(idx);
    }
}
