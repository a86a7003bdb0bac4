//! The bytecode dispatch loop (`spec.md` §4.6). A single flat loop drives
//! every Lua activation on the current thread: `CALL`/`TAILCALL` to another
//! Lua closure push (or, for a tail call, replace) a `CallInfo` and the
//! loop simply continues on the new top frame — no Rust recursion. A call
//! to anything else (a C closure, a metamethod) goes through
//! `call_ops::call_value`, which *does* recurse into Rust, exactly as the
//! reference VM's `luaV_execute`/`luaD_call` split does. Grounded on the
//! teacher's `lua_vm::interpreter` main loop.

use crate::error::LuaResult;
use crate::object::closure::ClosureKind;
use crate::object::ids::{FunctionId, ProtoId, ThreadId};
use crate::value::LuaValue;
use crate::vm::call_ops;
use crate::vm::closure_ops;
use crate::vm::opcode::{Instruction, OpCode};
use crate::vm::state::GlobalState;
use crate::vm::{arithmetic, comparison, concat, control, table_ops};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProtoBuilder;
    use crate::vm::opcode::OpCode;
    use crate::vm::state::GlobalState;

    /// A straight-line function with no control flow: registers, `ADD`,
    /// and `RETURN` wired together correctly end to end.
    #[test]
    fn add_two_params_and_return() {
        let mut state = GlobalState::new();
        let proto_id = ProtoBuilder::new(2, false, 3)
            .instr(Instruction::encode_abc(OpCode::Add, 2, 0, 1))
            .instr(Instruction::encode_abc(OpCode::Return, 2, 2, 0))
            .build(&mut state);
        let closure_id = state.new_lua_closure(proto_id, vec![]);

        let results = call_ops::call_value(&mut state, LuaValue::lua_closure(closure_id), &[LuaValue::integer(3), LuaValue::integer(4)]).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_integer_unchecked(), 7);
    }

    /// Builds `function f(n) if n == 0 then return 0 else return f(n - 1)
    /// end end`, self-referencing through a closed upvalue so the
    /// recursive call needs no global table. `f` is captured by placing
    /// its own value in a scratch stack slot, opening an upvalue over it,
    /// then closing that upvalue — the same close path `RETURN` drives.
    fn build_self_recursive_tail_call(state: &mut GlobalState) -> FunctionId {
        let mut pb = ProtoBuilder::new(1, false, 3);
        let k0 = pb.constant(LuaValue::integer(0));
        let k1 = pb.constant(LuaValue::integer(1));
        let proto_id = pb
            .instr(Instruction::encode_abc(OpCode::Eq, 0, 0, Instruction::encode_rk_const(k0)))
            .instr(Instruction::encode_asbx(OpCode::Jmp, 0, 2))
            .instr(Instruction::encode_abx(OpCode::LoadK, 1, k0))
            .instr(Instruction::encode_abc(OpCode::Return, 1, 2, 0))
            .instr(Instruction::encode_abc(OpCode::GetUpval, 1, 0, 0))
            .instr(Instruction::encode_abc(OpCode::Sub, 2, 0, Instruction::encode_rk_const(k1)))
            .instr(Instruction::encode_abc(OpCode::TailCall, 1, 2, 0))
            .build(state);

        let tid = state.main_thread;
        let scratch = 10usize;
        let uv_id = state.new_open_upvalue(tid, scratch);
        let closure_id = state.new_lua_closure(proto_id, vec![uv_id]);
        state.heap.threads.get_mut(tid.0).unwrap().stack[scratch] = LuaValue::lua_closure(closure_id);
        closure_ops::close_upvalues_from(state, tid, scratch);
        closure_id
    }

    /// *Tail-call depth* (`spec.md` §8 end-to-end scenario 5): a million
    /// levels of self-tail-recursion must not grow the call-info stack,
    /// since every `TAILCALL` reuses the current activation's slot.
    #[test]
    fn tail_call_runs_a_million_deep_without_growing_ci_stack() {
        let mut state = GlobalState::new();
        let f = build_self_recursive_tail_call(&mut state);

        let results = call_ops::call_value(&mut state, LuaValue::lua_closure(f), &[LuaValue::integer(1_000_000)]).expect("deep tail recursion must not overflow");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_integer_unchecked(), 0);
        assert_eq!(state.heap.threads.get(state.main_thread.0).unwrap().ci_stack.len(), 0, "every frame must have unwound by the time the call returns");
    }
}

#[inline]
fn reg(state: &GlobalState, thread_id: ThreadId, base: usize, i: u32) -> LuaValue {
    state.heap.threads.get(thread_id.0).expect("live thread").stack[base + i as usize]
}

#[inline]
fn set_reg(state: &mut GlobalState, thread_id: ThreadId, base: usize, i: u32, v: LuaValue) {
    state.heap.threads.get_mut(thread_id.0).expect("live thread").stack[base + i as usize] = v;
}

#[inline]
fn konst(state: &GlobalState, proto_id: ProtoId, i: u32) -> LuaValue {
    state.heap.protos.get(proto_id.0).expect("live proto").constants[i as usize]
}

#[inline]
fn rk(state: &GlobalState, thread_id: ThreadId, base: usize, proto_id: ProtoId, field: u32) -> LuaValue {
    if Instruction::is_k(field) {
        konst(state, proto_id, Instruction::indexk(field))
    } else {
        reg(state, thread_id, base, field)
    }
}

fn current_closure(state: &GlobalState, thread_id: ThreadId, func_slot: usize) -> FunctionId {
    state.heap.threads.get(thread_id.0).expect("live thread").stack[func_slot].as_function_id()
}

fn current_proto(state: &GlobalState, closure: FunctionId) -> ProtoId {
    match &state.heap.closures.get(closure.0).expect("live closure").kind {
        ClosureKind::Lua { proto, .. } => *proto,
        ClosureKind::C { .. } => unreachable!("a LUA call-info always holds a Lua closure"),
    }
}

/// Write `values` into registers `[a, a+want)`, nil-padding short results
/// (`spec.md` §4.6 "fixed result count"), or — when `want` is `None`
/// (`C == 0` / `B == 0`, "multiple results") — write all of them and leave
/// the thread's dynamic top pointing just past the last one.
fn place_results(state: &mut GlobalState, thread_id: ThreadId, base: usize, a: u32, values: &[LuaValue], want: Option<usize>) {
    match want {
        Some(n) => {
            for i in 0..n {
                set_reg(state, thread_id, base, a + i as u32, values.get(i).copied().unwrap_or(LuaValue::nil()));
            }
        }
        None => {
            for (i, v) in values.iter().enumerate() {
                set_reg(state, thread_id, base, a + i as u32, *v);
            }
            let t = state.heap.threads.get_mut(thread_id.0).expect("live thread");
            t.stack_top = base + a as usize + values.len();
        }
    }
}

/// `B`/`C` operand decode for the "fixed count, or multiret" convention:
/// `0` means "use everything up to the thread's dynamic top".
fn arg_count(state: &GlobalState, thread_id: ThreadId, base: usize, start: u32, raw: u32) -> usize {
    if raw == 0 {
        let top = state.heap.threads.get(thread_id.0).expect("live thread").stack_top;
        top.saturating_sub(base + start as usize)
    } else {
        raw as usize - 1
    }
}

/// Run the current thread starting from its topmost `CallInfo` until that
/// *specific* activation (and everything it called without recursing into
/// Rust) returns, yielding that activation's results.
pub fn execute(state: &mut GlobalState) -> LuaResult<Vec<LuaValue>> {
    let thread_id = state.current_thread;
    let entry_depth = state.heap.threads.get(thread_id.0).expect("live thread").ci_stack.len();

    loop {
        let (func_slot, base, pc) = {
            let t = state.heap.threads.get(thread_id.0).expect("live thread");
            let ci = t.current_ci();
            (ci.func_slot, ci.base, ci.saved_pc as usize)
        };
        let closure_id = current_closure(state, thread_id, func_slot);
        let proto_id = current_proto(state, closure_id);
        let instr = Instruction(state.heap.protos.get(proto_id.0).expect("live proto").code[pc]);
        state.heap.threads.get_mut(thread_id.0).expect("live thread").current_ci_mut().saved_pc = (pc + 1) as u32;

        macro_rules! rkv {
            ($field:expr) => {
                rk(state, thread_id, base, proto_id, $field)
            };
        }

        match instr.opcode() {
            OpCode::Move => {
                let v = reg(state, thread_id, base, instr.b());
                set_reg(state, thread_id, base, instr.a(), v);
            }
            OpCode::LoadK => {
                let v = konst(state, proto_id, instr.bx());
                set_reg(state, thread_id, base, instr.a(), v);
            }
            OpCode::LoadKx => {
                let extra = state.heap.protos.get(proto_id.0).expect("live proto").code[pc + 1];
                let idx = Instruction(extra).ax();
                let v = konst(state, proto_id, idx);
                set_reg(state, thread_id, base, instr.a(), v);
                state.heap.threads.get_mut(thread_id.0).expect("live thread").current_ci_mut().saved_pc += 1;
            }
            OpCode::LoadBool => {
                set_reg(state, thread_id, base, instr.a(), LuaValue::boolean(instr.b() != 0));
                if instr.c() != 0 {
                    state.heap.threads.get_mut(thread_id.0).expect("live thread").current_ci_mut().saved_pc += 1;
                }
            }
            OpCode::LoadNil => {
                for i in instr.a()..=instr.a() + instr.b() {
                    set_reg(state, thread_id, base, i, LuaValue::nil());
                }
            }
            OpCode::GetUpval => {
                let v = closure_ops::get_upvalue(state, closure_id, instr.b() as usize);
                set_reg(state, thread_id, base, instr.a(), v);
            }
            OpCode::SetUpval => {
                let v = reg(state, thread_id, base, instr.a());
                closure_ops::set_upvalue(state, closure_id, instr.b() as usize, v);
            }
            OpCode::GetTabUp => {
                let t = closure_ops::get_upvalue(state, closure_id, instr.b() as usize);
                let key = rkv!(instr.c());
                let v = table_ops::get_table(state, t, key)?;
                set_reg(state, thread_id, base, instr.a(), v);
            }
            OpCode::SetTabUp => {
                let t = closure_ops::get_upvalue(state, closure_id, instr.a() as usize);
                let key = rkv!(instr.b());
                let val = rkv!(instr.c());
                table_ops::set_table(state, t, key, val)?;
            }
            OpCode::GetTable => {
                let t = reg(state, thread_id, base, instr.b());
                let key = rkv!(instr.c());
                let v = table_ops::get_table(state, t, key)?;
                set_reg(state, thread_id, base, instr.a(), v);
            }
            OpCode::SetTable => {
                let t = reg(state, thread_id, base, instr.a());
                let key = rkv!(instr.b());
                let val = rkv!(instr.c());
                table_ops::set_table(state, t, key, val)?;
            }
            OpCode::NewTable => {
                let id = state.new_table(instr.b() as usize, instr.c() as usize);
                set_reg(state, thread_id, base, instr.a(), LuaValue::table(id));
                state.check_gc();
            }
            OpCode::Self_ => {
                let obj = reg(state, thread_id, base, instr.b());
                let key = rkv!(instr.c());
                let (self_val, method) = table_ops::self_get(state, obj, key)?;
                set_reg(state, thread_id, base, instr.a() + 1, self_val);
                set_reg(state, thread_id, base, instr.a(), method);
            }
            op @ (OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::Div
            | OpCode::IDiv
            | OpCode::BAnd
            | OpCode::BOr
            | OpCode::BXor
            | OpCode::Shl
            | OpCode::Shr) => {
                let a = rkv!(instr.b());
                let b = rkv!(instr.c());
                let v = arithmetic::binop(state, op, a, b)?;
                set_reg(state, thread_id, base, instr.a(), v);
            }
            OpCode::Unm => {
                let a = reg(state, thread_id, base, instr.b());
                let v = arithmetic::unm(state, a)?;
                set_reg(state, thread_id, base, instr.a(), v);
            }
            OpCode::BNot => {
                let a = reg(state, thread_id, base, instr.b());
                let v = arithmetic::bnot(state, a)?;
                set_reg(state, thread_id, base, instr.a(), v);
            }
            OpCode::Not => {
                let a = reg(state, thread_id, base, instr.b());
                set_reg(state, thread_id, base, instr.a(), LuaValue::boolean(a.is_falsy()));
            }
            OpCode::Len => {
                let a = reg(state, thread_id, base, instr.b());
                let v = table_ops::length(state, a)?;
                set_reg(state, thread_id, base, instr.a(), v);
            }
            OpCode::Concat => {
                let b = instr.b();
                let c = instr.c();
                let values: Vec<LuaValue> = (b..=c).map(|i| reg(state, thread_id, base, i)).collect();
                let v = concat::concat_range(state, &values)?;
                set_reg(state, thread_id, base, instr.a(), v);
                state.check_gc();
            }
            OpCode::Jmp => {
                if instr.a() > 0 {
                    closure_ops::close_upvalues_from(state, thread_id, base + instr.a() as usize - 1);
                }
                let pc_now = state.heap.threads.get(thread_id.0).expect("live thread").current_ci().saved_pc as i64;
                state.heap.threads.get_mut(thread_id.0).expect("live thread").current_ci_mut().saved_pc = (pc_now + instr.sbx() as i64) as u32;
            }
            OpCode::Eq => {
                let a = rkv!(instr.b());
                let b = rkv!(instr.c());
                let is_eq = comparison::eq(state, a, b)?;
                if is_eq != (instr.a() != 0) {
                    state.heap.threads.get_mut(thread_id.0).expect("live thread").current_ci_mut().saved_pc += 1;
                }
            }
            OpCode::Lt => {
                let a = rkv!(instr.b());
                let b = rkv!(instr.c());
                let is_lt = comparison::lt(state, a, b)?;
                if is_lt != (instr.a() != 0) {
                    state.heap.threads.get_mut(thread_id.0).expect("live thread").current_ci_mut().saved_pc += 1;
                }
            }
            OpCode::Le => {
                let a = rkv!(instr.b());
                let b = rkv!(instr.c());
                let is_le = comparison::le(state, a, b)?;
                if is_le != (instr.a() != 0) {
                    state.heap.threads.get_mut(thread_id.0).expect("live thread").current_ci_mut().saved_pc += 1;
                }
            }
            OpCode::Test => {
                let v = reg(state, thread_id, base, instr.a());
                if !control::test(v, instr.c() != 0) {
                    state.heap.threads.get_mut(thread_id.0).expect("live thread").current_ci_mut().saved_pc += 1;
                }
            }
            OpCode::TestSet => {
                let v = reg(state, thread_id, base, instr.b());
                if control::test(v, instr.c() != 0) {
                    set_reg(state, thread_id, base, instr.a(), v);
                } else {
                    state.heap.threads.get_mut(thread_id.0).expect("live thread").current_ci_mut().saved_pc += 1;
                }
            }
            OpCode::Call => {
                let a = instr.a();
                let func_val = reg(state, thread_id, base, a);
                let nargs = arg_count(state, thread_id, base, a + 1, instr.b());
                let args: Vec<LuaValue> = (0..nargs).map(|i| reg(state, thread_id, base, a + 1 + i as u32)).collect();
                let call_site = base + a as usize;
                if func_val.is_lua_closure() {
                    let nresults = if instr.c() == 0 { -1 } else { instr.c() as i32 - 1 };
                    call_ops::push_lua_frame(state, thread_id, call_site, func_val, &args, nresults)?;
                } else {
                    let results = call_ops::call_value(state, func_val, &args)?;
                    let want = if instr.c() == 0 { None } else { Some(instr.c() as usize - 1) };
                    place_results(state, thread_id, base, a, &results, want);
                }
            }
            OpCode::TailCall => {
                let a = instr.a();
                let func_val = reg(state, thread_id, base, a);
                let nargs = arg_count(state, thread_id, base, a + 1, instr.b());
                let args: Vec<LuaValue> = (0..nargs).map(|i| reg(state, thread_id, base, a + 1 + i as u32)).collect();
                closure_ops::close_upvalues_from(state, thread_id, base);

                if func_val.is_lua_closure() {
                    let (old_func_slot, caller_nresults) = {
                        let t = state.heap.threads.get(thread_id.0).expect("live thread");
                        let ci = t.current_ci();
                        (ci.func_slot, ci.nresults)
                    };
                    state.heap.threads.get_mut(thread_id.0).expect("live thread").ci_stack.pop();
                    call_ops::push_lua_frame(state, thread_id, old_func_slot, func_val, &args, caller_nresults)?;
                    state.heap.threads.get_mut(thread_id.0).expect("live thread").current_ci_mut().set_tail();
                } else {
                    let results = call_ops::call_value(state, func_val, &args)?;
                    if let Some(final_results) = return_from_frame(state, thread_id, entry_depth, results) {
                        return Ok(final_results);
                    }
                }
            }
            OpCode::Return => {
                let a = instr.a();
                let n = arg_count(state, thread_id, base, a, instr.b());
                let results: Vec<LuaValue> = (0..n).map(|i| reg(state, thread_id, base, a + i as u32)).collect();
                closure_ops::close_upvalues_from(state, thread_id, base);
                if let Some(final_results) = return_from_frame(state, thread_id, entry_depth, results) {
                    return Ok(final_results);
                }
            }
            OpCode::ForPrep => {
                let init = reg(state, thread_id, base, instr.a());
                let limit = reg(state, thread_id, base, instr.a() + 1);
                let step = reg(state, thread_id, base, instr.a() + 2);
                let (init, limit, step) = control::for_prep(init, limit, step)?;
                set_reg(state, thread_id, base, instr.a(), init);
                set_reg(state, thread_id, base, instr.a() + 1, limit);
                set_reg(state, thread_id, base, instr.a() + 2, step);
                let pc_now = state.heap.threads.get(thread_id.0).expect("live thread").current_ci().saved_pc as i64;
                state.heap.threads.get_mut(thread_id.0).expect("live thread").current_ci_mut().saved_pc = (pc_now + instr.sbx() as i64) as u32;
            }
            OpCode::ForLoop => {
                let index = reg(state, thread_id, base, instr.a());
                let limit = reg(state, thread_id, base, instr.a() + 1);
                let step = reg(state, thread_id, base, instr.a() + 2);
                if let Some(next) = control::for_loop(index, limit, step) {
                    set_reg(state, thread_id, base, instr.a(), next);
                    set_reg(state, thread_id, base, instr.a() + 3, next);
                    let pc_now = state.heap.threads.get(thread_id.0).expect("live thread").current_ci().saved_pc as i64;
                    state.heap.threads.get_mut(thread_id.0).expect("live thread").current_ci_mut().saved_pc = (pc_now + instr.sbx() as i64) as u32;
                }
            }
            OpCode::TForCall => {
                let a = instr.a();
                let f = reg(state, thread_id, base, a);
                let s = reg(state, thread_id, base, a + 1);
                let ctrl = reg(state, thread_id, base, a + 2);
                let results = call_ops::call_value(state, f, &[s, ctrl])?;
                for i in 0..instr.c() {
                    set_reg(state, thread_id, base, a + 3 + i, results.get(i as usize).copied().unwrap_or(LuaValue::nil()));
                }
            }
            OpCode::TForLoop => {
                let a = instr.a();
                let first = reg(state, thread_id, base, a + 1);
                if !first.is_nil() {
                    set_reg(state, thread_id, base, a, first);
                    let pc_now = state.heap.threads.get(thread_id.0).expect("live thread").current_ci().saved_pc as i64;
                    state.heap.threads.get_mut(thread_id.0).expect("live thread").current_ci_mut().saved_pc = (pc_now + instr.sbx() as i64) as u32;
                }
            }
            OpCode::SetList => {
                let a = instr.a();
                let table_id = reg(state, thread_id, base, a).as_table_id();
                let n = arg_count(state, thread_id, base, a + 1, instr.b());
                let start = if instr.c() == 0 {
                    let extra = state.heap.protos.get(proto_id.0).expect("live proto").code[pc + 1];
                    state.heap.threads.get_mut(thread_id.0).expect("live thread").current_ci_mut().saved_pc += 1;
                    Instruction(extra).ax() as i64
                } else {
                    instr.c() as i64
                };
                let values: Vec<LuaValue> = (0..n).map(|i| reg(state, thread_id, base, a + 1 + i as u32)).collect();
                table_ops::set_list(state, table_id, (start - 1) * 50 + 1, &values);
                state.check_gc();
            }
            OpCode::Closure => {
                let nested_proto = state.heap.protos.get(proto_id.0).expect("live proto").protos[instr.bx() as usize];
                let id = closure_ops::instantiate_closure(state, thread_id, base, closure_id, nested_proto);
                set_reg(state, thread_id, base, instr.a(), LuaValue::lua_closure(id));
                state.check_gc();
            }
            OpCode::Vararg => {
                let ci_nextra = state.heap.threads.get(thread_id.0).expect("live thread").current_ci().nextraargs as usize;
                let start = base - ci_nextra;
                let varargs: Vec<LuaValue> = (0..ci_nextra).map(|i| state.heap.threads.get(thread_id.0).unwrap().stack[start + i]).collect();
                let want = if instr.b() == 0 { None } else { Some(instr.b() as usize - 1) };
                place_results(state, thread_id, base, instr.a(), &varargs, want);
            }
            OpCode::ExtraArg => unreachable!("consumed inline by LOADKX/SETLIST, never dispatched directly"),
        }
    }
}

/// Shared `RETURN`/non-Lua-`TAILCALL` tail: pop the current activation.
/// If frames belonging to this `execute` call remain above `entry_depth`,
/// hand `results` back to the caller's registers and return `None` (keep
/// looping); otherwise this activation is the one `execute` was entered
/// for, so return `Some(results)` for `execute` itself to hand back to
/// its Rust caller.
fn return_from_frame(state: &mut GlobalState, thread_id: ThreadId, entry_depth: usize, results: Vec<LuaValue>) -> Option<Vec<LuaValue>> {
    let popped = state.heap.threads.get_mut(thread_id.0).expect("live thread").ci_stack.pop().expect("a frame to return from");
    if state.heap.threads.get(thread_id.0).expect("live thread").ci_stack.len() < entry_depth {
        return Some(results);
    }
    let want = if popped.nresults < 0 { None } else { Some(popped.nresults as usize) };
    place_results(state, thread_id, 0, popped.func_slot as u32, &results, want);
    None
}
