//! Global environment every script module is evaluated in

use super::convert;
use super::eval::call_position;
use super::value::CallArgs;
use super::ScriptHost;
use once_cell::sync::Lazy;
use starlark::any::ProvidesStaticType;
use starlark::environment::{Globals, GlobalsBuilder, LibraryExtension};
use starlark::eval::Evaluator;
use starlark::starlark_module;
use starlark::values::Value;
use starlark::PrintHandler;
use std::cell::RefCell;
use std::collections::HashSet;

/// Standard library plus `struct`, `print` and the instruction built-ins
pub static GLOBALS: Lazy<Globals> = Lazy::new(|| {
    GlobalsBuilder::extended_by(&[LibraryExtension::StructType, LibraryExtension::Print])
        .with(instruction_builtins)
        .build()
});

pub static GLOBAL_NAMES: Lazy<HashSet<String>> = Lazy::new(|| {
    GLOBALS
        .names()
        .map(|name| name.as_str().to_string())
        .collect()
});

/// Host handle stored in the evaluator while a module runs
#[derive(ProvidesStaticType)]
pub(crate) struct HostBridge<'h> {
    host: RefCell<&'h mut dyn ScriptHost>,
    /// Message of the last failed built-in call, kept verbatim
    failure: RefCell<Option<String>>,
}

impl<'h> HostBridge<'h> {
    pub(crate) fn new(host: &'h mut dyn ScriptHost) -> Self {
        Self {
            host: RefCell::new(host),
            failure: RefCell::new(None),
        }
    }

    pub(crate) fn take_failure(&self) -> Option<String> {
        self.failure.borrow_mut().take()
    }

    fn fail(&self, message: String) -> anyhow::Error {
        let err = anyhow::anyhow!("{message}");
        *self.failure.borrow_mut() = Some(message);
        err
    }
}

impl PrintHandler for HostBridge<'_> {
    fn println(&self, text: &str) -> starlark::Result<()> {
        self.host.borrow_mut().print(text);
        Ok(())
    }
}

/// Copies the arguments out of the heap and hands the call to the host
fn dispatch<'v>(
    name: &str,
    args: &[(&str, Option<Value<'v>>)],
    eval: &mut Evaluator<'v, '_, '_>,
) -> anyhow::Result<Value<'v>> {
    let bridge = eval
        .extra
        .and_then(|extra| extra.downcast_ref::<HostBridge>())
        .ok_or_else(|| anyhow::anyhow!("{name} is only available while interpreting a script"))?;
    let position = match eval.call_stack_top_location() {
        Some(span) => call_position(&span),
        None => return Err(bridge.fail(format!("{name}: call site is unknown"))),
    };

    let heap = eval.heap();
    let mut named = Vec::with_capacity(args.len());
    for (param, value) in args {
        if let Some(value) = value {
            let value = convert::to_host(*value, heap)
                .map_err(|e| bridge.fail(format!("Argument '{param}' of {name}: {e}")))?;
            named.push((param.to_string(), value));
        }
    }

    let result = bridge
        .host
        .borrow_mut()
        .call_builtin(name, CallArgs::named(named), &position)
        .map_err(|e| bridge.fail(e))?;
    Ok(convert::to_heap(&result, heap))
}

#[starlark_module]
fn instruction_builtins(builder: &mut GlobalsBuilder) {
    fn add_service<'v>(
        service_id: Value<'v>,
        service_config: Value<'v>,
        eval: &mut Evaluator<'v, '_, '_>,
    ) -> anyhow::Result<Value<'v>> {
        dispatch(
            "add_service",
            &[
                ("service_id", Some(service_id)),
                ("service_config", Some(service_config)),
            ],
            eval,
        )
    }

    fn remove_service<'v>(
        service_id: Value<'v>,
        eval: &mut Evaluator<'v, '_, '_>,
    ) -> anyhow::Result<Value<'v>> {
        dispatch("remove_service", &[("service_id", Some(service_id))], eval)
    }

    fn start_service<'v>(
        service_id: Value<'v>,
        eval: &mut Evaluator<'v, '_, '_>,
    ) -> anyhow::Result<Value<'v>> {
        dispatch("start_service", &[("service_id", Some(service_id))], eval)
    }

    fn stop_service<'v>(
        service_id: Value<'v>,
        eval: &mut Evaluator<'v, '_, '_>,
    ) -> anyhow::Result<Value<'v>> {
        dispatch("stop_service", &[("service_id", Some(service_id))], eval)
    }

    fn exec<'v>(
        service_id: Value<'v>,
        command: Value<'v>,
        expected_exit_code: Option<Value<'v>>,
        eval: &mut Evaluator<'v, '_, '_>,
    ) -> anyhow::Result<Value<'v>> {
        dispatch(
            "exec",
            &[
                ("service_id", Some(service_id)),
                ("command", Some(command)),
                ("expected_exit_code", expected_exit_code),
            ],
            eval,
        )
    }

    fn wait<'v>(
        service_id: Value<'v>,
        fact_name: Value<'v>,
        eval: &mut Evaluator<'v, '_, '_>,
    ) -> anyhow::Result<Value<'v>> {
        dispatch(
            "wait",
            &[
                ("service_id", Some(service_id)),
                ("fact_name", Some(fact_name)),
            ],
            eval,
        )
    }

    fn repartition<'v>(
        partitions: Value<'v>,
        connections: Option<Value<'v>>,
        default_connection: Option<Value<'v>>,
        eval: &mut Evaluator<'v, '_, '_>,
    ) -> anyhow::Result<Value<'v>> {
        dispatch(
            "repartition",
            &[
                ("partitions", Some(partitions)),
                ("connections", connections),
                ("default_connection", default_connection),
            ],
            eval,
        )
    }
}
