//! Call machinery (`spec.md` §4.5): precall setup (fixed/vararg argument
//! adjustment per invariant 5), the `__call` metamethod chain, and the
//! boundary between "stays on this Rust stack frame" (Lua-to-Lua, handled
//! inline by `interpreter::execute`'s own loop, including true tail-call
//! reuse of the caller's activation) and "recurses into Rust" (any call
//! serviced by `call_value`). Grounded on the teacher's `lua_vm::call`
//! module's `precall`/`docall` split.

use crate::error::{LuaError, LuaResult};
use crate::object::closure::ClosureKind;
use crate::object::ids::ThreadId;
use crate::value::LuaValue;
use crate::vm::call_info::CallInfo;
use crate::vm::interpreter;
use crate::vm::state::{GlobalState, MAX_CI_DEPTH, MAX_C_CALLS};
use crate::vm::CFunction;

/// Call any callable value (Lua closure, C closure, light C function, or a
/// value with a `__call` metamethod) and run it to completion, returning
/// its results. This is the only entry point that *recurses into Rust* —
/// Lua calling Lua stays inside a single `interpreter::execute` loop.
pub fn call_value(state: &mut GlobalState, func: LuaValue, args: &[LuaValue]) -> LuaResult<Vec<LuaValue>> {
    if func.is_lua_closure() {
        return call_lua_closure(state, func, args);
    }
    if func.is_c_closure() {
        let closure_id = func.as_function_id();
        let cfunc = match &state.heap.closures.get(closure_id.0).expect("live closure").kind {
            ClosureKind::C { func, .. } => *func,
            ClosureKind::Lua { .. } => unreachable!("checked is_c_closure above"),
        };
        return call_c(state, cfunc, args);
    }
    if func.is_light_cfunction() {
        let cfunc = func.as_light_cfunction();
        return call_c(state, cfunc, args);
    }
    match state.get_metamethod(&func, "__call") {
        Some(h) => {
            let mut new_args = Vec::with_capacity(args.len() + 1);
            new_args.push(func);
            new_args.extend_from_slice(args);
            call_value(state, h, &new_args)
        }
        None => Err(LuaError::type_error("call", "function", state.type_name_of(&func))),
    }
}

fn call_c(state: &mut GlobalState, f: CFunction, args: &[LuaValue]) -> LuaResult<Vec<LuaValue>> {
    if state.c_call_depth >= MAX_C_CALLS {
        return Err(LuaError::StackOverflow);
    }
    state.c_call_depth += 1;
    let result = f(state, args);
    state.c_call_depth -= 1;
    result
}

fn call_lua_closure(state: &mut GlobalState, func: LuaValue, args: &[LuaValue]) -> LuaResult<Vec<LuaValue>> {
    if state.c_call_depth >= MAX_C_CALLS {
        return Err(LuaError::StackOverflow);
    }
    let thread_id = state.current_thread;
    let func_slot = current_top(state, thread_id);
    push_lua_frame(state, thread_id, func_slot, func, args, -1)?;
    state.c_call_depth += 1;
    let result = interpreter::execute(state);
    state.c_call_depth -= 1;
    result
}

/// The thread's dynamic top: one past the highest register anything has
/// written, used to place a brand-new activation record when there is no
/// bytecode instruction (hence no static register operand) driving the
/// call — `pcall`, metamethod dispatch, and the initial script entry.
pub fn current_top(state: &GlobalState, thread_id: ThreadId) -> usize {
    let t = state.heap.threads.get(thread_id.0).expect("live thread");
    t.ci_stack.last().map(|ci| ci.top).unwrap_or(t.stack_top)
}

/// Push a new Lua activation at `func_slot`, performing fixed/vararg
/// argument adjustment (`spec.md` §3 invariant 5), and leave it as the
/// thread's topmost `CallInfo` — the caller decides whether to run it
/// inline (tail call / in-VM `CALL`) or via `interpreter::execute`
/// (`call_value`'s entry point).
pub fn push_lua_frame(state: &mut GlobalState, thread_id: ThreadId, func_slot: usize, func: LuaValue, args: &[LuaValue], nresults: i32) -> LuaResult<()> {
    if state.heap.threads.get(thread_id.0).expect("live thread").ci_stack.len() >= MAX_CI_DEPTH {
        return Err(LuaError::StackOverflow);
    }
    let closure_id = func.as_function_id();
    let proto_id = match &state.heap.closures.get(closure_id.0).expect("live closure").kind {
        ClosureKind::Lua { proto, .. } => *proto,
        ClosureKind::C { .. } => unreachable!("caller guarantees a Lua closure"),
    };
    let (num_params, is_vararg, max_stack_size) = {
        let p = state.heap.protos.get(proto_id.0).expect("live prototype");
        (p.num_params as usize, p.is_vararg, p.max_stack_size as usize)
    };

    let nargs = args.len();
    {
        let t = state.heap.threads.get_mut(thread_id.0).expect("live thread");
        t.grow_stack_to(func_slot + 1 + nargs.max(num_params) + max_stack_size + 8);
        t.stack[func_slot] = func;
        for (i, a) in args.iter().enumerate() {
            t.stack[func_slot + 1 + i] = *a;
        }
        for i in nargs..num_params {
            t.stack[func_slot + 1 + i] = LuaValue::nil();
        }
    }

    let (base, nextraargs) = if is_vararg && nargs > num_params {
        let extra = nargs - num_params;
        let new_base = func_slot + 1 + nargs;
        let t = state.heap.threads.get_mut(thread_id.0).expect("live thread");
        t.grow_stack_to(new_base + max_stack_size + 8);
        for i in 0..num_params {
            t.stack[new_base + i] = t.stack[func_slot + 1 + i];
            t.stack[func_slot + 1 + i] = LuaValue::nil();
        }
        (new_base, extra as i32)
    } else {
        (func_slot + 1, 0)
    };

    let top = base + max_stack_size;
    let t = state.heap.threads.get_mut(thread_id.0).expect("live thread");
    t.grow_stack_to(top);
    for slot in &mut t.stack[base + num_params.min(max_stack_size)..top] {
        *slot = LuaValue::nil();
    }
    let mut ci = CallInfo::new_lua(func_slot, base, nresults);
    ci.top = top;
    ci.nextraargs = nextraargs;
    t.ci_stack.push(ci);
    t.stack_top = top;
    Ok(())
}
