//! Table opcode group (`spec.md` §4.6 `GETTAB*`/`SETTAB*`/`NEWTABLE`/
//! `SELF`/`SETLIST`) and `#` (`LEN`, `spec.md` §4.1 "Length"). Indexing
//! itself lives in `metamethod` (`__index`/`__newindex` chains); this
//! module is the thin per-opcode layer over it, grounded on the teacher's
//! `lua_vm::table` opcode handlers.

use crate::error::{LuaError, LuaResult};
use crate::object::ids::TableId;
use crate::object::table::TM_CACHE_LEN;
use crate::value::LuaValue;
use crate::vm::call_ops;
use crate::vm::metamethod;
use crate::vm::state::GlobalState;

pub fn get_table(state: &mut GlobalState, t: LuaValue, key: LuaValue) -> LuaResult<LuaValue> {
    metamethod::index(state, t, key)
}

pub fn set_table(state: &mut GlobalState, t: LuaValue, key: LuaValue, value: LuaValue) -> LuaResult<()> {
    metamethod::newindex(state, t, key, value)
}

/// `R(A+1) := R(B); R(A) := R(B)[RK(C)]` — method-call sugar (`spec.md`
/// §4.6 `SELF`). Returns `(self_value, method)`.
pub fn self_get(state: &mut GlobalState, obj: LuaValue, key: LuaValue) -> LuaResult<(LuaValue, LuaValue)> {
    let method = metamethod::index(state, obj, key)?;
    Ok((obj, method))
}

/// `#v` (`spec.md` §4.1): strings use byte length directly; tables consult
/// `__len` first (cached absent via `TM_CACHE_LEN`) and otherwise use the
/// table's border; anything else requires `__len`.
pub fn length(state: &mut GlobalState, v: LuaValue) -> LuaResult<LuaValue> {
    if v.is_string() {
        return Ok(LuaValue::integer(state.string_bytes(v.as_string_id()).len() as i64));
    }
    if v.is_table() {
        let table_id = v.as_table_id();
        let cached_absent = state.heap.tables.get(table_id.0).expect("live table").no_tag_method_cache & TM_CACHE_LEN != 0;
        if !cached_absent {
            if let Some(h) = state.get_metamethod(&v, "__len") {
                let results = call_ops::call_value(state, h, &[v])?;
                return Ok(results.into_iter().next().unwrap_or(LuaValue::nil()));
            }
            if let Some(table) = state.heap.tables.get_mut(table_id.0) {
                table.no_tag_method_cache |= TM_CACHE_LEN;
            }
        }
        return Ok(LuaValue::integer(state.heap.tables.get(table_id.0).expect("live table").length()));
    }
    match state.get_metamethod(&v, "__len") {
        Some(h) => {
            let results = call_ops::call_value(state, h, &[v])?;
            Ok(results.into_iter().next().unwrap_or(LuaValue::nil()))
        }
        None => Err(LuaError::type_error("get length of", "string or table", state.type_name_of(&v))),
    }
}

/// `SETLIST A B C`: bulk-store `values` into `table`'s array part starting
/// at 1-based index `start`.
pub fn set_list(state: &mut GlobalState, table: TableId, start: i64, values: &[LuaValue]) {
    for (i, v) in values.iter().enumerate() {
        state.heap.tables.get_mut(table.0).expect("live table").array_set((start as usize) - 1 + i, *v);
    }
    state.heap.tables.get_mut(table.0).expect("live table").invalidate_tm_cache();
    for v in values {
        if v.is_collectable() {
            state.gc.barrier_back(&mut state.heap, table);
            break;
        }
    }
}
