//! Tag-method (metamethod) dispatch (`spec.md` §4.7): `__index`/`__newindex`
//! chains bounded at 2000 hops, and the shared "look up an event, call it if
//! it's a function" helper arithmetic/comparison/concat/length build on.
//! Grounded on the teacher's `lua_vm::meta` module, generalized from its
//! event set down to the Lua 5.3 events this crate implements.

use crate::error::{LuaError, LuaResult};
use crate::object::ids::TableId;
use crate::object::table::{TableKey, TM_CACHE_INDEX, TM_CACHE_NEWINDEX};
use crate::value::LuaValue;
use crate::vm::call_ops;
use crate::vm::state::GlobalState;

/// `spec.md` §4.7: an event chain (`__index`/`__newindex` following a
/// metatable whose own `__index` is itself a table, and so on) longer than
/// this is treated as a loop.
pub const MAXTAGLOOP: u32 = 2000;

fn table_key_from_value(state: &GlobalState, v: &LuaValue) -> Option<TableKey> {
    TableKey::from_value(v, || state.string_bytes(v.as_string_id()).to_string())
}

fn barrier_for_table(state: &mut GlobalState, table_id: TableId, value: &LuaValue) {
    if value.is_collectable() {
        state.gc.barrier_back(&mut state.heap, table_id);
    }
}

/// `t[key]`, following `__index` as needed.
pub fn index(state: &mut GlobalState, mut t: LuaValue, key: LuaValue) -> LuaResult<LuaValue> {
    for _ in 0..MAXTAGLOOP {
        if t.is_table() {
            let table_id = t.as_table_id();
            let raw = match table_key_from_value(state, &key) {
                Some(k) => state.heap.tables.get(table_id.0).expect("live table").get(&k),
                None => LuaValue::nil(),
            };
            if !raw.is_nil() {
                return Ok(raw);
            }
            let cached_absent = state.heap.tables.get(table_id.0).expect("live table").no_tag_method_cache & TM_CACHE_INDEX != 0;
            if cached_absent {
                return Ok(LuaValue::nil());
            }
            match state.get_metamethod(&t, "__index") {
                None => {
                    if let Some(table) = state.heap.tables.get_mut(table_id.0) {
                        table.no_tag_method_cache |= TM_CACHE_INDEX;
                    }
                    return Ok(LuaValue::nil());
                }
                Some(h) if h.is_function() => {
                    let results = call_ops::call_value(state, h, &[t, key])?;
                    return Ok(results.into_iter().next().unwrap_or(LuaValue::nil()));
                }
                Some(h) => {
                    t = h;
                }
            }
        } else {
            match state.get_metamethod(&t, "__index") {
                None => return Err(LuaError::type_error("index", "table", state.type_name_of(&t))),
                Some(h) if h.is_function() => {
                    let results = call_ops::call_value(state, h, &[t, key])?;
                    return Ok(results.into_iter().next().unwrap_or(LuaValue::nil()));
                }
                Some(h) => {
                    t = h;
                }
            }
        }
    }
    Err(LuaError::MetamethodChainTooLong)
}

/// `t[key] = value`, following `__newindex` as needed.
pub fn newindex(state: &mut GlobalState, mut t: LuaValue, key: LuaValue, value: LuaValue) -> LuaResult<()> {
    for _ in 0..MAXTAGLOOP {
        if t.is_table() {
            let table_id = t.as_table_id();
            let key_k = table_key_from_value(state, &key);
            let existing = match &key_k {
                Some(k) => state.heap.tables.get(table_id.0).expect("live table").get(k),
                None => LuaValue::nil(),
            };
            if !existing.is_nil() {
                let k = key_k.expect("a found entry implies a valid key");
                state.heap.tables.get_mut(table_id.0).expect("live table").set(k, key, value);
                barrier_for_table(state, table_id, &value);
                return Ok(());
            }
            let cached_absent = state.heap.tables.get(table_id.0).expect("live table").no_tag_method_cache & TM_CACHE_NEWINDEX != 0;
            if !cached_absent {
                match state.get_metamethod(&t, "__newindex") {
                    None => {
                        if let Some(table) = state.heap.tables.get_mut(table_id.0) {
                            table.no_tag_method_cache |= TM_CACHE_NEWINDEX;
                        }
                    }
                    Some(h) if h.is_function() => {
                        call_ops::call_value(state, h, &[t, key, value])?;
                        return Ok(());
                    }
                    Some(h) => {
                        t = h;
                        continue;
                    }
                }
            }
            if key.is_nil() {
                return Err(LuaError::message("table index is nil"));
            }
            if key.is_float() && key.as_float_unchecked().is_nan() {
                return Err(LuaError::message("table index is NaN"));
            }
            let k = table_key_from_value(state, &key).expect("nil/NaN rejected above");
            state.heap.tables.get_mut(table_id.0).expect("live table").set(k, key, value);
            barrier_for_table(state, table_id, &value);
            return Ok(());
        } else {
            match state.get_metamethod(&t, "__newindex") {
                None => return Err(LuaError::type_error("index", "table", state.type_name_of(&t))),
                Some(h) if h.is_function() => {
                    call_ops::call_value(state, h, &[t, key, value])?;
                    return Ok(());
                }
                Some(h) => {
                    t = h;
                }
            }
        }
    }
    Err(LuaError::MetamethodChainTooLong)
}

/// Look up a binary-operator event on either operand, left first (per
/// `spec.md` §4.7 "Binary metamethod resolution order").
pub fn binop_handler(state: &mut GlobalState, a: &LuaValue, b: &LuaValue, event: &str) -> Option<LuaValue> {
    state.get_metamethod(a, event).or_else(|| state.get_metamethod(b, event))
}

pub fn call_binop_handler(state: &mut GlobalState, handler: LuaValue, a: LuaValue, b: LuaValue) -> LuaResult<LuaValue> {
    let results = call_ops::call_value(state, handler, &[a, b])?;
    Ok(results.into_iter().next().unwrap_or(LuaValue::nil()))
}

pub fn unop_handler(state: &mut GlobalState, a: &LuaValue, event: &str) -> Option<LuaValue> {
    state.get_metamethod(a, event)
}

pub fn call_unop_handler(state: &mut GlobalState, handler: LuaValue, a: LuaValue) -> LuaResult<LuaValue> {
    let results = call_ops::call_value(state, handler, &[a, a])?;
    Ok(results.into_iter().next().unwrap_or(LuaValue::nil()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::table::TableKey;
    use crate::vm::state::GlobalState;

    /// *Metamethod chain limit* (`spec.md` §8 end-to-end scenario 6): two
    /// tables whose `__index` metamethods point at each other form an
    /// infinite chain, which must be rejected rather than looped forever.
    #[test]
    fn mutually_recursive_index_chain_is_rejected() {
        let mut state = GlobalState::new();
        let a = state.new_table(0, 0);
        let b = state.new_table(0, 0);
        let mt_a = state.new_table(0, 1);
        let mt_b = state.new_table(0, 1);

        let idx_key_a = state.new_string_value("__index");
        state.heap.tables.get_mut(mt_a.0).unwrap().set(TableKey::Str("__index".into()), idx_key_a, LuaValue::table(b));
        let idx_key_b = state.new_string_value("__index");
        state.heap.tables.get_mut(mt_b.0).unwrap().set(TableKey::Str("__index".into()), idx_key_b, LuaValue::table(a));

        state.heap.tables.get_mut(a.0).unwrap().metatable = Some(mt_a);
        state.heap.tables.get_mut(b.0).unwrap().metatable = Some(mt_b);

        let missing_key = state.new_string_value("missing");
        let err = index(&mut state, LuaValue::table(a), missing_key).unwrap_err();
        assert!(matches!(err, LuaError::MetamethodChainTooLong));
    }
}
