//! Control-flow opcode group (`spec.md` §4.6 `JMP`/`TEST`/`TESTSET`/
//! `FORPREP`/`FORLOOP`/`TFORCALL`/`TFORLOOP`). Numeric `for` uses an
//! all-integer loop when init/limit/step are all integers, else promotes
//! all three to float, matching the reference's `forprep`/`forloop`.
//! Grounded on the teacher's `lua_vm::control` module.

use crate::error::{LuaError, LuaResult};
use crate::value::LuaValue;

/// `TEST`/`TESTSET` share this: does `v`'s truthiness match the opcode's
/// expected polarity `c`?
#[inline]
pub fn test(v: LuaValue, c: bool) -> bool {
    v.is_truthy() == c
}

/// `FORPREP`: validate and normalize the three control values, pre-
/// subtracting `step` once since `FORLOOP` re-adds it before the first
/// iteration's body runs.
pub fn for_prep(init: LuaValue, limit: LuaValue, step: LuaValue) -> LuaResult<(LuaValue, LuaValue, LuaValue)> {
    let to_num = |v: LuaValue, which: &'static str| -> LuaResult<LuaValue> {
        if v.is_number() {
            Ok(v)
        } else {
            Err(LuaError::message(format!("'for' {which} value must be a number")))
        }
    };
    let init = to_num(init, "initial")?;
    let limit = to_num(limit, "limit")?;
    let step = to_num(step, "step")?;
    let step_is_zero = if step.is_integer() { step.as_integer_unchecked() == 0 } else { step.as_float_unchecked() == 0.0 };
    if step_is_zero {
        return Err(LuaError::message("'for' step is zero"));
    }
    if init.is_integer() && limit.is_integer() && step.is_integer() {
        let i = init.as_integer_unchecked().wrapping_sub(step.as_integer_unchecked());
        Ok((LuaValue::integer(i), limit, step))
    } else {
        Ok((LuaValue::float(init.to_f64() - step.to_f64()), LuaValue::float(limit.to_f64()), LuaValue::float(step.to_f64())))
    }
}

/// `FORLOOP`: advance by `step`; returns the new index if the loop should
/// continue, `None` once it has run past `limit`.
pub fn for_loop(index: LuaValue, limit: LuaValue, step: LuaValue) -> Option<LuaValue> {
    if index.is_integer() {
        let (i, l, s) = (index.as_integer_unchecked(), limit.as_integer_unchecked(), step.as_integer_unchecked());
        let next = i.wrapping_add(s);
        let continues = if s > 0 { next <= l } else { next >= l };
        continues.then_some(LuaValue::integer(next))
    } else {
        let (i, l, s) = (index.as_float_unchecked(), limit.as_float_unchecked(), step.as_float_unchecked());
        let next = i + s;
        let continues = if s > 0.0 { next <= l } else { next >= l };
        continues.then_some(LuaValue::float(next))
    }
}
