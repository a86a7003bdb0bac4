//! Sweep-phase mechanics: free dead (other-white) objects, repaint
//! survivors current white, and drive the intrusive list links forward
//! (`spec.md` §4.4 "Sweep phases"). Batched so a single `step()` call
//! only touches a bounded number of objects.

use crate::object::closure::ClosureKind;
use crate::object::gc_header::other_white;
use crate::object::ids::{GcId, GcObjectKind};
use crate::object::Heap;

use super::trace::{header, header_mut};
use super::{GcState, GC};

impl GC {
    /// Sweep up to `max` objects from whichever list the current state
    /// points at (`allgc` for `SwpAllGc`, `finobj` for `SwpFinObj`).
    /// Returns `true` once that list is fully swept.
    pub(super) fn sweep_batch(&mut self, heap: &mut Heap, max: usize) -> bool {
        let dead_white = other_white(self.current_white);
        for _ in 0..max {
            let Some(id) = self.sweep_cursor else { return true };
            let next = header(heap, id).next;
            if header(heap, id).is_dead(dead_white) {
                match self.sweep_prev {
                    Some(prev) => header_mut(heap, prev).next = next,
                    None => match self.state {
                        GcState::SwpAllGc => self.allgc_head = next,
                        GcState::SwpFinObj => self.finobj_head = next,
                        _ => unreachable!("unlink only runs during allgc/finobj sweep"),
                    },
                }
                let size = free_object(heap, id);
                self.total_bytes -= size as isize;
                self.sweep_cursor = next;
            } else {
                header_mut(heap, id).make_white(self.current_white);
                self.sweep_prev = Some(id);
                self.sweep_cursor = next;
            }
        }
        self.sweep_cursor.is_none()
    }

    /// Repaint every object still waiting for its finalizer current white
    /// so it is not mistaken for dead while pending (`spec.md` §4.4,
    /// `SwpToBeFnz`: no object is freed here, only `CallFin` frees them,
    /// after their `__gc` has actually run).
    pub(super) fn repaint_tobefnz_batch(&mut self, heap: &mut Heap, max: usize) -> bool {
        for _ in 0..max {
            let Some(id) = self.sweep_cursor else { return true };
            header_mut(heap, id).make_white(self.current_white);
            self.sweep_cursor = header(heap, id).next;
        }
        self.sweep_cursor.is_none()
    }
}

/// Physically reclaim one object's arena slot. Returns an approximate
/// byte size for debt accounting (`spec.md` §4.4 "Pacing" only needs a
/// rough figure, not an exact allocator size).
pub fn free_object(heap: &mut Heap, id: GcId) -> usize {
    match id.kind {
        GcObjectKind::String => heap.strings.free(id.index).map(|s| s.data.len() + 24).unwrap_or(0),
        GcObjectKind::Table => {
            heap.tables.free(id.index).map(|t| 48 + t.array_len() * 16 + t.hash_len() * 40).unwrap_or(0)
        }
        GcObjectKind::Function => {
            let freed = heap.closures.free(id.index);
            let reclaimed = freed.is_some() as usize * 32;
            if let Some(c) = freed {
                if let ClosureKind::Lua { upvalues, .. } = c.kind {
                    for uv_id in upvalues {
                        release_upvalue_ref(heap, uv_id);
                    }
                }
            }
            reclaimed
        }
        GcObjectKind::Upvalue => heap.upvalues.free(id.index).map(|_| 24).unwrap_or(0),
        GcObjectKind::Userdata => heap.userdata.free(id.index).map(|u| 32 + u.data.len()).unwrap_or(0),
        GcObjectKind::Thread => heap.threads.free(id.index).map(|t| 64 + t.stack.len() * 16).unwrap_or(0),
        GcObjectKind::Proto => heap.protos.free(id.index).map(|p| 48 + p.code.len() * 4).unwrap_or(0),
    }
}

/// Drop one closure's reference to a closed upvalue (`spec.md` §9 "Upvalue
/// refcount"). Once this reaches zero no closure holds the upvalue and it
/// is not on any thread's open list, so it is already unreachable — the
/// next mark phase simply fails to mark it and the ordinary sweep list
/// walk reclaims it. Physically freeing it here instead would dangle the
/// `allgc` intrusive link the sweeper still has queued to it.
fn release_upvalue_ref(heap: &mut Heap, uv_id: crate::object::ids::UpvalueId) {
    let Some(uv) = heap.upvalues.get_mut(uv_id.0) else { return };
    if uv.is_open() {
        return;
    }
    uv.refcount = uv.refcount.saturating_sub(1);
}
