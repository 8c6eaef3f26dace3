//! Host-side copies of script values
//!
//! Instruction built-ins never see interpreter heap values. Arguments are
//! copied into this owned tree at the call boundary, which also means a
//! value reaching an instruction can never be cyclic.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Insertion-ordered entries
    Dict(Vec<(Value, Value)>),
    Struct(BTreeMap<String, Value>),
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Value::Str(value.into())
    }

    pub fn structure(fields: BTreeMap<String, Value>) -> Self {
        Value::Struct(fields)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Struct(_) => "struct",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Quoted form, as `repr` renders it in scripts
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Str(s) => quote(s),
            Value::List(items) => format!("[{}]", join_repr(items)),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => format!("({})", join_repr(items)),
            Value::Dict(entries) => {
                let entries: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", entries.join(", "))
            }
            Value::Struct(fields) => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{k} = {}", v.repr()))
                    .collect();
                format!("struct({})", fields.join(", "))
            }
        }
    }

    /// Converts a JSON document. Objects become structs.
    pub fn from_json(json: &serde_json::Value) -> Result<Value, String> {
        Ok(match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => return Err(format!("number {n} is not a supported integer")),
            },
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => Value::List(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(fields) => {
                let mut converted = BTreeMap::new();
                for (key, value) in fields {
                    converted.insert(key.clone(), Value::from_json(value)?);
                }
                Value::Struct(converted)
            }
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::None => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) | Value::Tuple(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Dict(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| {
                        let key = match key {
                            Value::Str(s) => s.clone(),
                            other => other.repr(),
                        };
                        (key, value.to_json())
                    })
                    .collect(),
            ),
            Value::Struct(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

fn join_repr(items: &[Value]) -> String {
    items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

/// `str()` form: strings render bare, everything else as `repr`
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            other => f.write_str(&other.repr()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

/// Arguments of a built-in call, split into positional and keyword parts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub named: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            named: Vec::new(),
        }
    }

    pub fn named(values: Vec<(String, Value)>) -> Self {
        Self {
            positional: Vec::new(),
            named: values,
        }
    }

    /// Binds the arguments to `params`. A trailing `?` marks a parameter
    /// optional; absent optional parameters come back as `None`.
    pub fn unpack(self, function: &str, params: &[&str]) -> Result<Vec<Option<Value>>, String> {
        let names: Vec<&str> = params.iter().map(|p| p.trim_end_matches('?')).collect();
        if self.positional.len() > params.len() {
            return Err(format!(
                "{function}: got {} arguments, want at most {}",
                self.positional.len(),
                params.len()
            ));
        }

        let mut bound: Vec<Option<Value>> = vec![None; params.len()];
        for (slot, value) in bound.iter_mut().zip(self.positional) {
            *slot = Some(value);
        }
        for (name, value) in self.named {
            let Some(index) = names.iter().position(|n| *n == name) else {
                return Err(format!("{function}: unexpected keyword argument \"{name}\""));
            };
            if bound[index].is_some() {
                return Err(format!(
                    "{function}: got multiple values for parameter \"{name}\""
                ));
            }
            bound[index] = Some(value);
        }

        for (param, value) in params.iter().zip(&bound) {
            if value.is_none() && !param.ends_with('?') {
                return Err(format!("{function}: missing argument for {param}"));
            }
        }
        Ok(bound)
    }
}
