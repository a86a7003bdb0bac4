//! Comparison opcode group (`spec.md` §4.6 `EQ`/`LT`/`LE`): raw equality
//! with `__eq` fallback (only when both operands are tables or both are
//! userdata and raw-unequal), and ordering with `__lt`/`__le` fallback.
//! Grounded on the teacher's `lua_vm::compare` module.

use crate::error::{LuaError, LuaResult};
use crate::value::{raw_equal, LuaValue};
use crate::vm::call_ops;
use crate::vm::state::GlobalState;

fn strings_eq(state: &GlobalState, a: crate::object::ids::StringId, b: crate::object::ids::StringId) -> bool {
    a == b || state.string_bytes(a) == state.string_bytes(b)
}

/// `a == b`, including the `__eq` fallback (`spec.md` §4.7: only consulted
/// when both operands are raw-unequal tables, or raw-unequal userdata).
pub fn eq(state: &mut GlobalState, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
    if raw_equal(&a, &b, |x, y| strings_eq(state, x, y)) {
        return Ok(true);
    }
    let both_tables = a.is_table() && b.is_table();
    let both_userdata = a.is_userdata() && b.is_userdata();
    if !both_tables && !both_userdata {
        return Ok(false);
    }
    match state.get_metamethod(&a, "__eq").or_else(|| state.get_metamethod(&b, "__eq")) {
        Some(h) => {
            let results = call_ops::call_value(state, h, &[a, b])?;
            Ok(results.first().map(|v| v.is_truthy()).unwrap_or(false))
        }
        None => Ok(false),
    }
}

/// `a < b`.
pub fn lt(state: &mut GlobalState, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
    if a.is_number() && b.is_number() {
        return Ok(numeric_lt(a, b));
    }
    if a.is_string() && b.is_string() {
        return Ok(state.string_bytes(a.as_string_id()) < state.string_bytes(b.as_string_id()));
    }
    match state.get_metamethod(&a, "__lt").or_else(|| state.get_metamethod(&b, "__lt")) {
        Some(h) => {
            let results = call_ops::call_value(state, h, &[a, b])?;
            Ok(results.first().map(|v| v.is_truthy()).unwrap_or(false))
        }
        None => Err(order_error(state, &a, &b)),
    }
}

/// `a <= b`.
pub fn le(state: &mut GlobalState, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
    if a.is_number() && b.is_number() {
        return Ok(!numeric_lt(b, a));
    }
    if a.is_string() && b.is_string() {
        return Ok(state.string_bytes(a.as_string_id()) <= state.string_bytes(b.as_string_id()));
    }
    match state.get_metamethod(&a, "__le").or_else(|| state.get_metamethod(&b, "__le")) {
        Some(h) => {
            let results = call_ops::call_value(state, h, &[a, b])?;
            Ok(results.first().map(|v| v.is_truthy()).unwrap_or(false))
        }
        None => {
            // spec.md §4.6: no __le falls back to `not (b < a)` via __lt,
            // tracked by the LEQ call-status bit so a yield mid-metamethod
            // can restore the negation.
            match state.get_metamethod(&a, "__lt").or_else(|| state.get_metamethod(&b, "__lt")) {
                Some(h) => {
                    let results = call_ops::call_value(state, h, &[b, a])?;
                    Ok(!results.first().map(|v| v.is_truthy()).unwrap_or(false))
                }
                None => Err(order_error(state, &a, &b)),
            }
        }
    }
}

fn numeric_lt(a: LuaValue, b: LuaValue) -> bool {
    if a.is_integer() && b.is_integer() {
        a.as_integer_unchecked() < b.as_integer_unchecked()
    } else {
        a.to_f64() < b.to_f64()
    }
}

fn order_error(state: &GlobalState, a: &LuaValue, b: &LuaValue) -> LuaError {
    let (ta, tb) = (state.type_name_of(a), state.type_name_of(b));
    if ta == tb {
        LuaError::message(format!("attempt to compare two {ta} values"))
    } else {
        LuaError::message(format!("attempt to compare {ta} with {tb}"))
    }
}
