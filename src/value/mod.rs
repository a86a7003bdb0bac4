//! Tagged value representation (`TValue` in the reference implementation).
//!
//! A value is a pair `(tag, payload)`. The tag encodes a basic type, an
//! optional variant and a "collectable" bit (bit 6); see `spec.md` §3 and
//! §6 ("Value tag byte layout"). Payload is one of: integer, float, boolean,
//! opaque pointer, C function pointer, or a reference (arena id) to a heap
//! object. Values are freely copied by value — collectable payloads are
//! shared ids that the collector, not the value, owns.

use crate::object::ids::{FunctionId, StringId, TableId, ThreadId, UserdataId};
use crate::vm::CFunction;

// ---- basic type tags (bits 0-3) ----
pub const TNIL: u8 = 0;
pub const TBOOLEAN: u8 = 1;
pub const TLIGHTUSERDATA: u8 = 2;
pub const TNUMBER: u8 = 3;
pub const TSTRING: u8 = 4;
pub const TTABLE: u8 = 5;
pub const TFUNCTION: u8 = 6;
pub const TUSERDATA: u8 = 7;
pub const TTHREAD: u8 = 8;
pub const NUMTYPES: u8 = 9;
/// Reserved, not user-visible: prototypes are collectable but never appear
/// as a Lua-level value.
pub const TPROTO: u8 = NUMTYPES + 1;
/// Sentinel tag for table keys whose value went nil while unreachable.
pub const TDEADKEY: u8 = NUMTYPES + 2;

pub const BIT_ISCOLLECTABLE: u8 = 1 << 6;

#[inline(always)]
pub const fn make_variant(t: u8, v: u8) -> u8 {
    t | (v << 4)
}

#[inline(always)]
pub const fn no_variant(tt: u8) -> u8 {
    tt & 0x0F
}

#[inline(always)]
pub const fn ctb(t: u8) -> u8 {
    t | BIT_ISCOLLECTABLE
}

// ---- variants ----
pub const VNIL: u8 = TNIL;
pub const VFALSE: u8 = make_variant(TBOOLEAN, 0);
pub const VTRUE: u8 = make_variant(TBOOLEAN, 1);
pub const VNUMINT: u8 = make_variant(TNUMBER, 0);
pub const VNUMFLT: u8 = make_variant(TNUMBER, 1);
pub const VSHRSTR: u8 = ctb(make_variant(TSTRING, 0));
pub const VLNGSTR: u8 = ctb(make_variant(TSTRING, 1));
pub const VLIGHTUSERDATA: u8 = make_variant(TLIGHTUSERDATA, 0);
pub const VTABLE: u8 = ctb(TTABLE);
pub const VLCF: u8 = make_variant(TFUNCTION, 0); // light C function
pub const VLCLCLOSURE: u8 = ctb(make_variant(TFUNCTION, 1)); // Lua closure
pub const VCCLOSURE: u8 = ctb(make_variant(TFUNCTION, 2)); // C closure
pub const VUSERDATA: u8 = ctb(TUSERDATA);
pub const VTHREAD: u8 = ctb(TTHREAD);
pub const VDEADKEY: u8 = TDEADKEY;

/// 8-byte payload union. Only one field is ever read, selected by `tt_`.
#[derive(Clone, Copy)]
pub union Payload {
    pub i: i64,
    pub n: f64,
    pub b: bool,
    pub p: u64,
    pub f: usize, // CFunction as a thin pointer-sized value
    pub gc: u32,  // arena index, meaning depends on tt_
}

/// A tagged value. Copy type; collectable variants carry an arena id that
/// the GC, not this struct, owns the lifetime of.
#[derive(Clone, Copy)]
pub struct LuaValue {
    pub value: Payload,
    pub tt: u8,
}

impl LuaValue {
    #[inline(always)]
    pub const fn nil() -> Self {
        Self { value: Payload { i: 0 }, tt: VNIL }
    }

    #[inline(always)]
    pub const fn boolean(b: bool) -> Self {
        Self { value: Payload { b }, tt: if b { VTRUE } else { VFALSE } }
    }

    #[inline(always)]
    pub const fn integer(i: i64) -> Self {
        Self { value: Payload { i }, tt: VNUMINT }
    }

    #[inline(always)]
    pub fn float(n: f64) -> Self {
        Self { value: Payload { n }, tt: VNUMFLT }
    }

    #[inline(always)]
    pub fn light_userdata(p: u64) -> Self {
        Self { value: Payload { p }, tt: VLIGHTUSERDATA }
    }

    #[inline(always)]
    pub fn light_cfunction(f: CFunction) -> Self {
        Self { value: Payload { f: f as usize }, tt: VLCF }
    }

    #[inline(always)]
    pub fn short_string(id: StringId) -> Self {
        Self { value: Payload { gc: id.0 }, tt: VSHRSTR }
    }

    #[inline(always)]
    pub fn long_string(id: StringId) -> Self {
        Self { value: Payload { gc: id.0 }, tt: VLNGSTR }
    }

    #[inline(always)]
    pub fn table(id: TableId) -> Self {
        Self { value: Payload { gc: id.0 }, tt: VTABLE }
    }

    #[inline(always)]
    pub fn lua_closure(id: FunctionId) -> Self {
        Self { value: Payload { gc: id.0 }, tt: VLCLCLOSURE }
    }

    #[inline(always)]
    pub fn c_closure(id: FunctionId) -> Self {
        Self { value: Payload { gc: id.0 }, tt: VCCLOSURE }
    }

    #[inline(always)]
    pub fn userdata(id: UserdataId) -> Self {
        Self { value: Payload { gc: id.0 }, tt: VUSERDATA }
    }

    #[inline(always)]
    pub fn thread(id: ThreadId) -> Self {
        Self { value: Payload { gc: id.0 }, tt: VTHREAD }
    }

    #[inline(always)]
    pub const fn dead_key() -> Self {
        Self { value: Payload { i: 0 }, tt: VDEADKEY }
    }

    // ---- type predicates ----
    #[inline(always)]
    pub fn is_nil(&self) -> bool {
        no_variant(self.tt) == TNIL
    }
    #[inline(always)]
    pub fn is_boolean(&self) -> bool {
        no_variant(self.tt) == TBOOLEAN
    }
    #[inline(always)]
    pub fn is_number(&self) -> bool {
        no_variant(self.tt) == TNUMBER
    }
    #[inline(always)]
    pub fn is_integer(&self) -> bool {
        self.tt == VNUMINT
    }
    #[inline(always)]
    pub fn is_float(&self) -> bool {
        self.tt == VNUMFLT
    }
    #[inline(always)]
    pub fn is_string(&self) -> bool {
        no_variant(self.tt) == TSTRING
    }
    #[inline(always)]
    pub fn is_table(&self) -> bool {
        self.tt == VTABLE
    }
    #[inline(always)]
    pub fn is_function(&self) -> bool {
        no_variant(self.tt) == TFUNCTION
    }
    #[inline(always)]
    pub fn is_lua_closure(&self) -> bool {
        self.tt == VLCLCLOSURE
    }
    #[inline(always)]
    pub fn is_c_closure(&self) -> bool {
        self.tt == VCCLOSURE
    }
    #[inline(always)]
    pub fn is_light_cfunction(&self) -> bool {
        self.tt == VLCF
    }
    #[inline(always)]
    pub fn is_userdata(&self) -> bool {
        self.tt == VUSERDATA
    }
    #[inline(always)]
    pub fn is_thread(&self) -> bool {
        self.tt == VTHREAD
    }
    #[inline(always)]
    pub fn is_collectable(&self) -> bool {
        self.tt & BIT_ISCOLLECTABLE != 0
    }
    #[inline(always)]
    pub fn is_falsy(&self) -> bool {
        matches!(self.tt, VNIL | VFALSE)
    }
    #[inline(always)]
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    // ---- raw accessors (preconditioned on the matching predicate) ----
    #[inline(always)]
    pub fn as_bool(&self) -> bool {
        debug_assert!(self.is_boolean());
        self.tt == VTRUE
    }
    #[inline(always)]
    pub fn as_integer_unchecked(&self) -> i64 {
        debug_assert!(self.is_integer());
        unsafe { self.value.i }
    }
    #[inline(always)]
    pub fn as_float_unchecked(&self) -> f64 {
        debug_assert!(self.is_float());
        unsafe { self.value.n }
    }
    #[inline(always)]
    pub fn as_gc_index(&self) -> u32 {
        debug_assert!(self.is_collectable());
        unsafe { self.value.gc }
    }
    #[inline(always)]
    pub fn as_string_id(&self) -> StringId {
        debug_assert!(self.is_string());
        StringId(unsafe { self.value.gc })
    }
    #[inline(always)]
    pub fn as_table_id(&self) -> TableId {
        debug_assert!(self.is_table());
        TableId(unsafe { self.value.gc })
    }
    #[inline(always)]
    pub fn as_function_id(&self) -> FunctionId {
        debug_assert!(self.is_lua_closure() || self.is_c_closure());
        FunctionId(unsafe { self.value.gc })
    }
    #[inline(always)]
    pub fn as_userdata_id(&self) -> UserdataId {
        debug_assert!(self.is_userdata());
        UserdataId(unsafe { self.value.gc })
    }
    #[inline(always)]
    pub fn as_thread_id(&self) -> ThreadId {
        debug_assert!(self.is_thread());
        ThreadId(unsafe { self.value.gc })
    }
    #[inline(always)]
    pub fn as_light_cfunction(&self) -> CFunction {
        debug_assert!(self.is_light_cfunction());
        unsafe { std::mem::transmute::<usize, CFunction>(self.value.f) }
    }

    /// Numeric value as f64, for arithmetic that always produces a float
    /// (division) or for mixed-type comparisons. Panics on non-numbers;
    /// callers must check `is_number()` first.
    #[inline]
    pub fn to_f64(&self) -> f64 {
        if self.is_integer() {
            self.as_integer_unchecked() as f64
        } else {
            self.as_float_unchecked()
        }
    }
}

/// Mode for `to_integer` conversion (spec.md §4.1).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IntMode {
    Exact,
    Floor,
    Ceil,
}

/// `to-integer(x, mode)`. Fails (returns `None`) for non-numbers, for NaN/
/// infinite floats, for floats outside i64 range, and in `Exact` mode for
/// floats with a nonzero fractional part.
pub fn to_integer(v: &LuaValue, mode: IntMode) -> Option<i64> {
    if v.is_integer() {
        return Some(v.as_integer_unchecked());
    }
    if !v.is_float() {
        return None;
    }
    let f = v.as_float_unchecked();
    if !f.is_finite() {
        return None;
    }
    let f = match mode {
        IntMode::Exact => {
            if f.fract() != 0.0 {
                return None;
            }
            f
        }
        IntMode::Floor => f.floor(),
        IntMode::Ceil => f.ceil(),
    };
    if f < -(2f64.powi(63)) || f >= 2f64.powi(63) {
        return None;
    }
    Some(f as i64)
}

/// Raw equality: tags then payloads. Number comparison follows spec.md
/// §4.1: int-int uses integer equality, float-float uses IEEE equality,
/// mixed requires a lossless integer<->float round trip.
pub fn raw_equal(a: &LuaValue, b: &LuaValue, strings_eq: impl FnOnce(StringId, StringId) -> bool) -> bool {
    if a.is_number() && b.is_number() {
        return match (a.is_integer(), b.is_integer()) {
            (true, true) => a.as_integer_unchecked() == b.as_integer_unchecked(),
            (false, false) => a.as_float_unchecked() == b.as_float_unchecked(),
            (true, false) => {
                let f = b.as_float_unchecked();
                f.fract() == 0.0 && f >= -(2f64.powi(63)) && f < 2f64.powi(63) && (f as i64) == a.as_integer_unchecked()
            }
            (false, true) => {
                let f = a.as_float_unchecked();
                f.fract() == 0.0 && f >= -(2f64.powi(63)) && f < 2f64.powi(63) && (f as i64) == b.as_integer_unchecked()
            }
        };
    }
    if a.tt != b.tt {
        // short/long string variants can still compare equal by content,
        // but that requires the caller to resolve bytes; basic types with
        // differing tags are never equal.
        if no_variant(a.tt) != TSTRING || no_variant(b.tt) != TSTRING {
            return false;
        }
    }
    match no_variant(a.tt) {
        TNIL => true,
        TBOOLEAN => a.as_bool() == b.as_bool(),
        TNUMBER => unreachable!("handled above"),
        TSTRING => strings_eq(a.as_string_id(), b.as_string_id()),
        TLIGHTUSERDATA => unsafe { a.value.p == b.value.p },
        TFUNCTION if a.tt == VLCF || b.tt == VLCF => unsafe { a.value.f == b.value.f && a.tt == b.tt },
        _ => a.tt == b.tt && unsafe { a.value.gc == b.value.gc },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_equality_mixed() {
        let i = LuaValue::integer(3);
        let f = LuaValue::float(3.0);
        assert!(raw_equal(&i, &f, |_, _| false));
        let f2 = LuaValue::float(3.5);
        assert!(!raw_equal(&i, &f2, |_, _| false));
    }

    #[test]
    fn to_integer_modes() {
        let f = LuaValue::float(3.7);
        assert_eq!(to_integer(&f, IntMode::Exact), None);
        assert_eq!(to_integer(&f, IntMode::Floor), Some(3));
        assert_eq!(to_integer(&f, IntMode::Ceil), Some(4));
    }

    #[test]
    fn truthiness() {
        assert!(LuaValue::nil().is_falsy());
        assert!(LuaValue::boolean(false).is_falsy());
        assert!(LuaValue::boolean(true).is_truthy());
        assert!(LuaValue::integer(0).is_truthy()); // Lua: 0 is truthy
    }
}
