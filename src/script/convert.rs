//! Copies between interpreter heap values and host [`Value`]s

use super::value::Value;
use starlark::values::dict::{AllocDict, DictRef};
use starlark::values::list::{AllocList, ListRef};
use starlark::values::structs::AllocStruct;
use starlark::values::tuple::{AllocTuple, TupleRef};
use starlark::values::{Heap, Value as HeapValue};
use std::collections::BTreeMap;

/// Deepest container nesting copied out of a script. Self-referencing
/// lists and dicts hit this limit instead of recursing forever.
pub const MAX_VALUE_DEPTH: usize = 64;

pub fn to_host<'v>(value: HeapValue<'v>, heap: &'v Heap) -> Result<Value, String> {
    to_host_at(value, heap, 0)
}

fn to_host_at<'v>(value: HeapValue<'v>, heap: &'v Heap, depth: usize) -> Result<Value, String> {
    if depth > MAX_VALUE_DEPTH {
        return Err(format!(
            "value is nested more than {MAX_VALUE_DEPTH} levels deep (cyclic values are not supported)"
        ));
    }
    let nested = |item: HeapValue<'v>| to_host_at(item, heap, depth + 1);

    if value.is_none() {
        return Ok(Value::None);
    }
    if let Some(b) = value.unpack_bool() {
        return Ok(Value::Bool(b));
    }
    if let Some(s) = value.unpack_str() {
        return Ok(Value::Str(s.to_string()));
    }
    if value.get_type() == "int" {
        return value
            .to_str()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| format!("integer {} does not fit in 64 bits", value.to_str()));
    }
    if let Some(list) = ListRef::from_value(value) {
        return Ok(Value::List(
            list.content().iter().map(|item| nested(*item)).collect::<Result<_, _>>()?,
        ));
    }
    if let Some(tuple) = TupleRef::from_value(value) {
        return Ok(Value::Tuple(
            tuple.content().iter().map(|item| nested(*item)).collect::<Result<_, _>>()?,
        ));
    }
    if let Some(dict) = DictRef::from_value(value) {
        return Ok(Value::Dict(
            dict.iter()
                .map(|(k, v)| Ok((nested(k)?, nested(v)?)))
                .collect::<Result<_, String>>()?,
        ));
    }
    if value.get_type() == "struct" {
        let mut fields = BTreeMap::new();
        for name in value.dir_attr() {
            let field = value
                .get_attr(&name, heap)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("struct has no field '{name}'"))?;
            fields.insert(name, nested(field)?);
        }
        return Ok(Value::Struct(fields));
    }
    Err(format!(
        "value of type {} cannot be passed to a built-in",
        value.get_type()
    ))
}

pub fn to_heap<'v>(value: &Value, heap: &'v Heap) -> HeapValue<'v> {
    match value {
        Value::None => HeapValue::new_none(),
        Value::Bool(b) => HeapValue::new_bool(*b),
        Value::Int(i) => heap.alloc(*i),
        Value::Str(s) => heap.alloc(s.as_str()),
        Value::List(items) => heap.alloc(AllocList(items.iter().map(|item| to_heap(item, heap)))),
        Value::Tuple(items) => {
            let items: Vec<HeapValue<'v>> = items.iter().map(|item| to_heap(item, heap)).collect();
            heap.alloc(AllocTuple(items))
        }
        Value::Dict(entries) => heap.alloc(AllocDict(
            entries
                .iter()
                .map(|(k, v)| (to_heap(k, heap), to_heap(v, heap))),
        )),
        Value::Struct(fields) => heap.alloc(AllocStruct(
            fields
                .iter()
                .map(|(name, field)| (name.as_str(), to_heap(field, heap))),
        )),
    }
}
