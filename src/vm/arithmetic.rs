//! Arithmetic and bitwise opcode group (`spec.md` §4.1 "Arithmetic",
//! §4.6 `ADD..BNOT`/`UNM`/`BNOT`): integer/float coercion rules, wrapping
//! integer overflow, floor semantics for `%`/`//`, and metamethod fallback
//! when an operand isn't numeric. Grounded on the teacher's
//! `lua_vm::arith` module, trimmed to the Lua 5.3 operator set (no `//`-
//! adjacent additions the 5.4 teacher carries that this dialect lacks).

use crate::error::{LuaError, LuaResult};
use crate::value::{to_integer, IntMode, LuaValue};
use crate::vm::metamethod;
use crate::vm::opcode::OpCode;
use crate::vm::state::GlobalState;

/// Try to read `v` as a number, including Lua's automatic string-to-number
/// coercion for arithmetic (`spec.md` §4.1) — distinct from the table-key
/// normalization in `object::table`, this never mutates `v` itself.
fn coerce_number(state: &GlobalState, v: &LuaValue) -> Option<LuaValue> {
    if v.is_number() {
        return Some(*v);
    }
    if v.is_string() {
        let s = state.string_bytes(v.as_string_id()).trim();
        if let Ok(i) = s.parse::<i64>() {
            return Some(LuaValue::integer(i));
        }
        if let Ok(f) = s.parse::<f64>() {
            return Some(LuaValue::float(f));
        }
    }
    None
}

fn event_name(op: OpCode) -> &'static str {
    match op {
        OpCode::Add => "__add",
        OpCode::Sub => "__sub",
        OpCode::Mul => "__mul",
        OpCode::Mod => "__mod",
        OpCode::Pow => "__pow",
        OpCode::Div => "__div",
        OpCode::IDiv => "__idiv",
        OpCode::BAnd => "__band",
        OpCode::BOr => "__bor",
        OpCode::BXor => "__bxor",
        OpCode::Shl => "__shl",
        OpCode::Shr => "__shr",
        OpCode::Unm => "__unm",
        OpCode::BNot => "__bnot",
        _ => unreachable!("not an arithmetic opcode"),
    }
}

fn is_bitwise(op: OpCode) -> bool {
    matches!(op, OpCode::BAnd | OpCode::BOr | OpCode::BXor | OpCode::Shl | OpCode::Shr | OpCode::BNot)
}

fn apply_int(op: OpCode, a: i64, b: i64) -> LuaResult<LuaValue> {
    Ok(match op {
        OpCode::Add => LuaValue::integer(a.wrapping_add(b)),
        OpCode::Sub => LuaValue::integer(a.wrapping_sub(b)),
        OpCode::Mul => LuaValue::integer(a.wrapping_mul(b)),
        OpCode::Mod => {
            if b == 0 {
                return Err(LuaError::message("attempt to perform 'n%%0'"));
            }
            LuaValue::integer(int_mod(a, b))
        }
        OpCode::IDiv => {
            if b == 0 {
                return Err(LuaError::message("attempt to perform 'n//0'"));
            }
            LuaValue::integer(int_floordiv(a, b))
        }
        OpCode::BAnd => LuaValue::integer(a & b),
        OpCode::BOr => LuaValue::integer(a | b),
        OpCode::BXor => LuaValue::integer(a ^ b),
        OpCode::Shl => LuaValue::integer(shift_left(a, b)),
        OpCode::Shr => LuaValue::integer(shift_left(a, -b)),
        _ => unreachable!("handled by caller"),
    })
}

/// Floor-division remainder: same sign as the divisor, unlike Rust's `%`.
fn int_mod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && (r ^ b) < 0 {
        r + b
    } else {
        r
    }
}

/// Floor division, matching Lua's `//` (Rust's `/` truncates toward zero).
fn int_floordiv(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    if (a.wrapping_rem(b) != 0) && ((a ^ b) < 0) {
        q - 1
    } else {
        q
    }
}

/// Lua's `<<`: a shift amount with absolute value >= 64 always yields 0;
/// a negative amount shifts the other way.
fn shift_left(a: i64, b: i64) -> i64 {
    if b <= -64 || b >= 64 {
        0
    } else if b >= 0 {
        ((a as u64) << b) as i64
    } else {
        ((a as u64) >> (-b)) as i64
    }
}

fn apply_float(op: OpCode, a: f64, b: f64) -> LuaValue {
    match op {
        OpCode::Add => LuaValue::float(a + b),
        OpCode::Sub => LuaValue::float(a - b),
        OpCode::Mul => LuaValue::float(a * b),
        OpCode::Div => LuaValue::float(a / b),
        OpCode::Pow => LuaValue::float(a.powf(b)),
        OpCode::Mod => {
            let r = a - (a / b).floor() * b;
            LuaValue::float(r)
        }
        OpCode::IDiv => LuaValue::float((a / b).floor()),
        _ => unreachable!("handled by caller"),
    }
}

/// Binary arithmetic/bitwise op with full metamethod fallback.
pub fn binop(state: &mut GlobalState, op: OpCode, a: LuaValue, b: LuaValue) -> LuaResult<LuaValue> {
    if is_bitwise(op) {
        if let (Some(ia), Some(ib)) = (to_integer(&a, IntMode::Exact), to_integer(&b, IntMode::Exact)) {
            if a.is_number() && b.is_number() {
                return apply_int(op, ia, ib);
            }
        }
        if a.is_number() && b.is_number() {
            return Err(LuaError::message("number has no integer representation"));
        }
    } else if op == OpCode::Div || op == OpCode::Pow {
        if let (Some(na), Some(nb)) = (coerce_number(state, &a), coerce_number(state, &b)) {
            return Ok(apply_float(op, na.to_f64(), nb.to_f64()));
        }
    } else if let (Some(na), Some(nb)) = (coerce_number(state, &a), coerce_number(state, &b)) {
        if na.is_integer() && nb.is_integer() {
            return apply_int(op, na.as_integer_unchecked(), nb.as_integer_unchecked());
        }
        return Ok(apply_float(op, na.to_f64(), nb.to_f64()));
    }

    match metamethod::binop_handler(state, &a, &b, event_name(op)) {
        Some(h) => metamethod::call_binop_handler(state, h, a, b),
        None => {
            let bad = if coerce_number(state, &a).is_none() { &a } else { &b };
            Err(LuaError::type_error("perform arithmetic on", "number", state.type_name_of(bad)))
        }
    }
}

/// Unary `-` (`UNM`): negation, with metamethod fallback.
pub fn unm(state: &mut GlobalState, a: LuaValue) -> LuaResult<LuaValue> {
    if let Some(n) = coerce_number(state, &a) {
        return Ok(if n.is_integer() { LuaValue::integer(n.as_integer_unchecked().wrapping_neg()) } else { LuaValue::float(-n.as_float_unchecked()) });
    }
    match metamethod::unop_handler(state, &a, "__unm") {
        Some(h) => metamethod::call_unop_handler(state, h, a),
        None => Err(LuaError::type_error("perform arithmetic on", "number", state.type_name_of(&a))),
    }
}

/// Unary `~` (`BNOT`): bitwise complement, with metamethod fallback.
pub fn bnot(state: &mut GlobalState, a: LuaValue) -> LuaResult<LuaValue> {
    if let Some(i) = to_integer(&a, IntMode::Exact) {
        if a.is_number() {
            return Ok(LuaValue::integer(!i));
        }
    }
    if a.is_number() {
        return Err(LuaError::message("number has no integer representation"));
    }
    match metamethod::unop_handler(state, &a, "__bnot") {
        Some(h) => metamethod::call_unop_handler(state, h, a),
        None => Err(LuaError::type_error("perform bitwise operation on", "number", state.type_name_of(&a))),
    }
}
