//! `CONCAT` (`spec.md` §4.6): right-to-left string concatenation over a
//! register range, with `__concat` fallback as soon as a non-string/number
//! operand is hit. Grounded on the teacher's `lua_vm::concat` module, which
//! folds pairwise the same way to match the reference's right-associative
//! metamethod resolution order.

use crate::error::{LuaError, LuaResult};
use crate::value::LuaValue;
use crate::vm::metamethod;
use crate::vm::state::GlobalState;

fn to_display_string(state: &mut GlobalState, v: &LuaValue) -> Option<String> {
    if v.is_string() {
        return Some(state.string_bytes(v.as_string_id()).to_string());
    }
    if v.is_integer() {
        let mut buf = itoa::Buffer::new();
        return Some(buf.format(v.as_integer_unchecked()).to_string());
    }
    if v.is_float() {
        return Some(format_float(v.as_float_unchecked()));
    }
    None
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f < 0.0 { "-inf".to_string() } else { "inf".to_string() }
    } else if f == f.trunc() && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

/// Concatenate `a .. b`, falling back to `__concat` if either operand is
/// neither a string nor a number.
pub fn concat2(state: &mut GlobalState, a: LuaValue, b: LuaValue) -> LuaResult<LuaValue> {
    if let (Some(sa), Some(sb)) = (to_display_string(state, &a), to_display_string(state, &b)) {
        let mut s = sa;
        s.push_str(&sb);
        return Ok(state.new_string_value(&s));
    }
    match metamethod::binop_handler(state, &a, &b, "__concat") {
        Some(h) => metamethod::call_binop_handler(state, h, a, b),
        None => {
            let bad = if to_display_string(state, &a).is_none() { &a } else { &b };
            Err(LuaError::type_error("concatenate", "string", state.type_name_of(bad)))
        }
    }
}

/// `CONCAT A B C`: fold registers `[b, c]` right to left into one value,
/// matching the reference's pairwise-from-the-right evaluation order so
/// metamethods see the same operand pairing.
pub fn concat_range(state: &mut GlobalState, values: &[LuaValue]) -> LuaResult<LuaValue> {
    let mut iter = values.iter().rev();
    let mut acc = *iter.next().expect("CONCAT always spans at least one register");
    for v in iter {
        acc = concat2(state, *v, acc)?;
    }
    Ok(acc)
}
