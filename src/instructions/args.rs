//! Instruction arguments: rendering and conversion from script values

use crate::script::Value;
use crate::types::ScriptPosition;
use std::collections::BTreeMap;

/// One serialized argument of an instruction
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionArg {
    pub name: String,
    pub value: serde_json::Value,
    /// Non-representative arguments are kept for execution but left out of
    /// the rendered forms
    pub representative: bool,
}

/// Arguments kept sorted by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstructionArgs {
    args: BTreeMap<String, InstructionArg>,
}

impl InstructionArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.insert(name, value.into(), true);
        self
    }

    /// Adds the argument unless it equals its implicit default
    pub fn add_unless_default(
        mut self,
        name: &str,
        value: impl Into<serde_json::Value>,
        default: impl Into<serde_json::Value>,
    ) -> Self {
        let value = value.into();
        if value != default.into() {
            self.insert(name, value, true);
        }
        self
    }

    pub fn add_hidden(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.insert(name, value.into(), false);
        self
    }

    fn insert(&mut self, name: &str, value: serde_json::Value, representative: bool) {
        self.args.insert(
            name.to_string(),
            InstructionArg {
                name: name.to_string(),
                value,
                representative,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.args.get(name).map(|arg| &arg.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstructionArg> {
        self.args.values()
    }

    fn representative(&self) -> impl Iterator<Item = &InstructionArg> {
        self.args.values().filter(|arg| arg.representative)
    }

    pub fn canonical(&self, name: &str, position: &ScriptPosition) -> String {
        let rendered: Vec<String> = self
            .representative()
            .map(|arg| format!("\t{}={}", arg.name, render_value(&arg.value)))
            .collect();
        if rendered.is_empty() {
            return format!("# from: {position}\n{name}()");
        }
        format!("# from: {position}\n{name}(\n{}\n)", rendered.join(",\n"))
    }

    pub fn single_line(&self, name: &str) -> String {
        let rendered: Vec<String> = self
            .representative()
            .map(|arg| format!("{}={}", arg.name, render_value(&arg.value)))
            .collect();
        format!("{name}({})", rendered.join(", "))
    }
}

/// Renders a JSON value with script literal syntax
pub fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "None".to_string(),
        serde_json::Value::Bool(true) => "True".to_string(),
        serde_json::Value::Bool(false) => "False".to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => serde_json::Value::String(s.clone()).to_string(),
        serde_json::Value::Array(items) => format!(
            "[{}]",
            items.iter().map(render_value).collect::<Vec<_>>().join(", ")
        ),
        serde_json::Value::Object(fields) => format!(
            "{{{}}}",
            fields
                .iter()
                .map(|(k, v)| format!("{}: {}", serde_json::Value::String(k.clone()), render_value(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn expected(name: &str, what: &str, got: &Value) -> String {
    format!(
        "Argument '{name}' is expected to be {what}. Got {}",
        got.type_name()
    )
}

pub fn string_arg(name: &str, value: &Value) -> Result<String, String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| expected(name, "a string", value))
}

pub fn int_arg(name: &str, value: &Value) -> Result<i64, String> {
    value
        .as_int()
        .ok_or_else(|| expected(name, "an integer", value))
}

pub fn string_list_arg(name: &str, value: &Value) -> Result<Vec<String>, String> {
    let items = match value {
        Value::List(items) | Value::Tuple(items) => items,
        other => return Err(expected(name, "a list of strings", other)),
    };
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| expected(&format!("{name} element"), "a string", item))
        })
        .collect()
}

/// Entries of a dict argument, in insertion order
pub fn dict_arg(name: &str, value: &Value) -> Result<Vec<(Value, Value)>, String> {
    match value {
        Value::Dict(entries) => Ok(entries.clone()),
        other => Err(expected(name, "a dict", other)),
    }
}

pub fn string_dict_arg(name: &str, value: &Value) -> Result<BTreeMap<String, String>, String> {
    dict_arg(name, value)?
        .into_iter()
        .map(|(k, v)| Ok((string_arg(&format!("{name} key"), &k)?, string_arg(name, &v)?)))
        .collect()
}

/// Fields of a struct argument
pub fn struct_arg<'a>(name: &str, value: &'a Value) -> Result<&'a BTreeMap<String, Value>, String> {
    match value {
        Value::Struct(fields) => Ok(fields),
        other => Err(expected(name, "a struct", other)),
    }
}

pub fn required_field<'a>(
    fields: &'a BTreeMap<String, Value>,
    field: &str,
    struct_name: &str,
) -> Result<&'a Value, String> {
    fields.get(field).ok_or_else(|| {
        format!("Missing value '{field}' as element of the struct object '{struct_name}'")
    })
}

/// Unwraps a parameter `CallArgs::unpack` already guarantees is present
pub fn present(bound: Option<Value>, function: &str, param: &str) -> Result<Value, String> {
    bound.ok_or_else(|| format!("{function}: missing argument for {param}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_form_sorts_and_filters_arguments() {
        let args = InstructionArgs::new()
            .add("service_id", "example-service-id")
            .add("fact_name", "example-fact-name")
            .add_hidden("internal", 42);
        let position = ScriptPosition::new("dummyFile", 1, 1);
        assert_eq!(
            args.canonical("wait", &position),
            "# from: dummyFile[1:1]\nwait(\n\tfact_name=\"example-fact-name\",\n\tservice_id=\"example-service-id\"\n)"
        );
        assert_eq!(
            args.single_line("wait"),
            "wait(fact_name=\"example-fact-name\", service_id=\"example-service-id\")"
        );
    }

    #[test]
    fn test_default_valued_arguments_are_omitted() {
        let args = InstructionArgs::new()
            .add_unless_default("expected_exit_code", 0, 0)
            .add_unless_default("default_connection", "BLOCKED", "ALLOWED");
        assert!(args.get("expected_exit_code").is_none());
        assert_eq!(args.single_line("x"), "x(default_connection=\"BLOCKED\")");
        assert_eq!(
            InstructionArgs::new().canonical("noop", &ScriptPosition::new("f", 2, 3)),
            "# from: f[2:3]\nnoop()"
        );
    }

    #[test]
    fn test_render_nested_values() {
        let value = json!({"grpc": {"number": 1323, "protocol": "TCP"}, "flags": [true, null]});
        assert_eq!(
            render_value(&value),
            "{\"flags\": [True, None], \"grpc\": {\"number\": 1323, \"protocol\": \"TCP\"}}"
        );
    }

    #[test]
    fn test_type_mismatch_messages() {
        assert_eq!(
            int_arg("number", &Value::string("1234")).unwrap_err(),
            "Argument 'number' is expected to be an integer. Got string"
        );
        let dict = Value::Dict(vec![(Value::string("A"), Value::Int(1))]);
        assert!(string_dict_arg("env_vars", &dict).is_err());
    }
}
