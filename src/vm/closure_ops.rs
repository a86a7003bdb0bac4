//! Closure instantiation and upvalue lifecycle (`spec.md` §4.2): resolving
//! a prototype's `UpvalDesc` list against either the enclosing activation's
//! registers (open upvalues, found-or-created and kept in descending
//! stack-address order per invariant 4) or the enclosing closure's own
//! upvalues, closing upvalues on scope exit, and the single-slot
//! same-bindings closure cache (invariant 5). Grounded on the teacher's
//! `lua_vm::closure` module.

use crate::object::closure::ClosureKind;
use crate::object::ids::{FunctionId, GcId, ProtoId, ThreadId, UpvalueId};
use crate::value::LuaValue;
use crate::vm::state::GlobalState;

/// Find an already-open upvalue pointing at `stack_index` on `thread_id`,
/// or create and link in a new one. The open-upvalue list is kept sorted
/// by descending `stack_index` (invariant 4), so a new entry is spliced in
/// at the point the list's addresses drop below it.
pub fn find_or_create_upvalue(state: &mut GlobalState, thread_id: ThreadId, stack_index: usize) -> UpvalueId {
    let mut prev: Option<UpvalueId> = None;
    let mut cur = state.heap.threads.get(thread_id.0).expect("live thread").open_upvalues;
    while let Some(uv_id) = cur {
        let uv = state.heap.upvalues.get(uv_id.0).expect("live upvalue");
        let idx = uv.stack_index().expect("list holds only open upvalues");
        if idx == stack_index {
            return uv_id;
        }
        if idx < stack_index {
            break;
        }
        prev = Some(uv_id);
        cur = uv.next_open;
    }
    let new_id = state.new_open_upvalue(thread_id, stack_index);
    state.heap.upvalues.get_mut(new_id.0).expect("just allocated").next_open = cur;
    match prev {
        Some(p) => state.heap.upvalues.get_mut(p.0).expect("live upvalue").next_open = Some(new_id),
        None => state.heap.threads.get_mut(thread_id.0).expect("live thread").open_upvalues = Some(new_id),
    }
    new_id
}

/// Close every open upvalue at or above `from_index` (called on `RETURN`,
/// a block exit, or a `break` — `spec.md` §4.2 "Lifetime"). The list's
/// descending order means this is just "pop the head while it still
/// qualifies".
pub fn close_upvalues_from(state: &mut GlobalState, thread_id: ThreadId, from_index: usize) {
    loop {
        let head = state.heap.threads.get(thread_id.0).expect("live thread").open_upvalues;
        let Some(uv_id) = head else { break };
        let idx = state.heap.upvalues.get(uv_id.0).expect("live upvalue").stack_index().expect("open");
        if idx < from_index {
            break;
        }
        let value = state.heap.threads.get(thread_id.0).expect("live thread").stack[idx];
        let next = state.heap.upvalues.get(uv_id.0).expect("live upvalue").next_open;
        state.heap.upvalues.get_mut(uv_id.0).expect("live upvalue").close(value);
        state.heap.threads.get_mut(thread_id.0).expect("live thread").open_upvalues = next;
        state.gc.barrier_forward(&mut state.heap, GcId::from(uv_id), &value);
    }
    prune_twups(state, thread_id);
}

/// Once a thread's open-upvalue list empties, it no longer needs to be
/// re-marked every atomic phase (`spec.md` §4.4 "Roots"; reference `lgc.c`'s
/// `remarkupvals`). Leaving it linked in `twups` forever would make any
/// thread that ever captured one open upvalue a permanent GC root.
fn prune_twups(state: &mut GlobalState, thread_id: ThreadId) {
    let still_open = state.heap.threads.get(thread_id.0).expect("live thread").open_upvalues.is_some();
    if still_open {
        return;
    }
    let was_linked = state.heap.threads.get(thread_id.0).expect("live thread").in_twups;
    if !was_linked {
        return;
    }
    state.heap.threads.get_mut(thread_id.0).expect("live thread").in_twups = false;
    state.twups.retain(|&t| t != thread_id);
}

/// `CLOSURE` (`spec.md` §4.6 closure group): instantiate a Lua closure for
/// `proto_id`, resolving each upvalue descriptor against `enclosing`'s own
/// upvalues or the stack at `ci_base`. Reuses `proto_id`'s cached closure
/// when its bindings are bit-for-bit identical (invariant 5).
pub fn instantiate_closure(state: &mut GlobalState, thread_id: ThreadId, ci_base: usize, enclosing: FunctionId, proto_id: ProtoId) -> FunctionId {
    let descs = state.heap.protos.get(proto_id.0).expect("live proto").upvalues.clone();
    let mut upvalues = Vec::with_capacity(descs.len());
    for d in &descs {
        let uv_id = if d.in_stack {
            find_or_create_upvalue(state, thread_id, ci_base + d.index as usize)
        } else {
            match &state.heap.closures.get(enclosing.0).expect("live closure").kind {
                ClosureKind::Lua { upvalues, .. } => upvalues[d.index as usize],
                ClosureKind::C { .. } => unreachable!("a Lua prototype's enclosing closure is always Lua"),
            }
        };
        upvalues.push(uv_id);
    }

    if let Some(cached) = state.heap.protos.get(proto_id.0).and_then(|p| p.cache) {
        if let ClosureKind::Lua { upvalues: cached_uv, .. } = &state.heap.closures.get(cached.0).expect("live closure").kind {
            if cached_uv.as_slice() == upvalues.as_slice() {
                return cached;
            }
        }
    }

    for uv in &upvalues {
        if let Some(u) = state.heap.upvalues.get_mut(uv.0) {
            u.refcount += 1;
        }
    }
    let new_fn = state.new_lua_closure(proto_id, upvalues);
    state.heap.protos.get_mut(proto_id.0).expect("live proto").cache = Some(new_fn);
    new_fn
}

pub fn get_upvalue(state: &GlobalState, closure: FunctionId, index: usize) -> LuaValue {
    let uv_id = match &state.heap.closures.get(closure.0).expect("live closure").kind {
        ClosureKind::Lua { upvalues, .. } => upvalues[index],
        ClosureKind::C { .. } => unreachable!("GETUPVAL only targets Lua closures"),
    };
    match state.heap.upvalues.get(uv_id.0).expect("live upvalue").state {
        crate::object::closure::UpvalueState::Open { owner, stack_index } => {
            state.heap.threads.get(owner.0).expect("live thread").stack[stack_index]
        }
        crate::object::closure::UpvalueState::Closed(v) => v,
    }
}

pub fn set_upvalue(state: &mut GlobalState, closure: FunctionId, index: usize, value: LuaValue) {
    let uv_id = match &state.heap.closures.get(closure.0).expect("live closure").kind {
        ClosureKind::Lua { upvalues, .. } => upvalues[index],
        ClosureKind::C { .. } => unreachable!("SETUPVAL only targets Lua closures"),
    };
    match state.heap.upvalues.get(uv_id.0).expect("live upvalue").state {
        crate::object::closure::UpvalueState::Open { owner, stack_index } => {
            state.heap.threads.get_mut(owner.0).expect("live thread").stack[stack_index] = value;
        }
        crate::object::closure::UpvalueState::Closed(_) => {
            state.heap.upvalues.get_mut(uv_id.0).expect("live upvalue").state = crate::object::closure::UpvalueState::Closed(value);
        }
    }
    state.gc.barrier_forward(&mut state.heap, GcId::from(uv_id), &value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::closure::ClosureKind;
    use crate::object::table::TableKey;
    use crate::vm::state::GlobalState;

    fn upvalue_of(state: &GlobalState, f: FunctionId) -> UpvalueId {
        match &state.heap.closures.get(f.0).unwrap().kind {
            ClosureKind::Lua { upvalues, .. } => upvalues[0],
            ClosureKind::C { .. } => unreachable!(),
        }
    }

    /// *Closure & upvalue sharing* (`spec.md` §8 end-to-end scenario 1):
    /// two closures built over the same captured stack slot share one
    /// upvalue; closing it preserves that sharing; freeing each closure in
    /// turn drives the shared upvalue's refcount down, and it disappears
    /// once nothing holds it.
    #[test]
    fn two_closures_share_and_free_one_upvalue() {
        let mut state = GlobalState::new();
        let tid = state.main_thread;
        state.heap.threads.get_mut(tid.0).unwrap().stack[0] = LuaValue::integer(10);

        let proto_get = state.new_proto(0, false, 1, "get".into());
        state.heap.protos.get_mut(proto_get.0).unwrap().upvalues.push(crate::object::proto::UpvalDesc { name: None, in_stack: true, index: 0 });
        let proto_set = state.new_proto(1, false, 1, "set".into());
        state.heap.protos.get_mut(proto_set.0).unwrap().upvalues.push(crate::object::proto::UpvalDesc { name: None, in_stack: true, index: 0 });

        let dummy_enclosing = FunctionId(u32::MAX);
        let get_closure = instantiate_closure(&mut state, tid, 0, dummy_enclosing, proto_get);
        let set_closure = instantiate_closure(&mut state, tid, 0, dummy_enclosing, proto_set);

        let uv_get = upvalue_of(&state, get_closure);
        let uv_set = upvalue_of(&state, set_closure);
        assert_eq!(uv_get, uv_set, "both closures must share the same open upvalue");
        assert_eq!(state.heap.upvalues.get(uv_get.0).unwrap().refcount, 2);

        close_upvalues_from(&mut state, tid, 0);
        assert!(!state.heap.upvalues.get(uv_get.0).unwrap().is_open());
        assert_eq!(get_upvalue(&state, get_closure, 0).as_integer_unchecked(), 10);

        set_upvalue(&mut state, set_closure, 0, LuaValue::integer(99));
        assert_eq!(get_upvalue(&state, get_closure, 0).as_integer_unchecked(), 99, "writes through one closure are visible through the other");

        // root only `get_closure`; collecting now frees `set_closure` and
        // drops the shared upvalue's refcount to 1.
        state.heap.tables.get_mut(state.registry.0).unwrap().set(TableKey::Int(1), LuaValue::integer(1), LuaValue::lua_closure(get_closure));
        state.full_gc();
        assert!(!state.heap.closures.is_valid(set_closure.0), "unrooted closure must be collected");
        assert_eq!(state.heap.upvalues.get(uv_get.0).unwrap().refcount, 1, "refcount drops to 1 once one referring closure is freed");
        assert!(state.heap.upvalues.is_valid(uv_get.0), "still referenced by get_closure");

        // unroot the last closure too; the upvalue becomes unreachable and
        // is collected in the same pass.
        state.heap.tables.get_mut(state.registry.0).unwrap().remove(&TableKey::Int(1));
        state.full_gc();
        assert!(!state.heap.closures.is_valid(get_closure.0));
        assert!(!state.heap.upvalues.is_valid(uv_get.0), "dropping the last referrer frees the shared upvalue");
    }
}
