//! Module evaluation on top of the `starlark` interpreter

use super::convert;
use super::globals::{HostBridge, GLOBALS, GLOBAL_NAMES};
use super::value::Value;
use super::{Frame, ScriptError, ScriptHost};
use crate::types::ScriptPosition;
use once_cell::sync::Lazy;
use regex::Regex;
use starlark::analysis::AstModuleLint;
use starlark::codemap::FileSpan;
use starlark::environment::{FrozenModule, Module};
use starlark::eval::{Evaluator, ReturnFileLoader};
use starlark::syntax::{AstModule, Dialect};
use std::collections::HashMap;

/// Name of the outermost frame of every module
pub const TOPLEVEL: &str = "<toplevel>";

/// Deepest bracket nesting accepted in a source file
pub const MAX_NESTING: usize = 100;

const UNDEFINED_NAME_LINT: &str = "undefined-variable";

static VARIABLE_NOT_FOUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Variable `([^`]+)` not found").expect("variable-not-found pattern is valid")
});

/// Function called once the module body has run
pub struct EntryPoint<'a> {
    pub name: &'a str,
    /// Single positional argument, `None` for a parameterless function
    pub argument: Option<&'a Value>,
}

/// Parses, checks and runs `source` as the module `file`, then calls
/// `entry` if given
pub fn exec_module(
    file: &str,
    source: &str,
    host: &mut dyn ScriptHost,
    entry: Option<EntryPoint<'_>>,
) -> Result<FrozenModule, ScriptError> {
    check_nesting(file, source)?;

    let mut dialect = Dialect::Extended;
    dialect.enable_top_level_stmt = true;
    let ast = AstModule::parse(file, source.to_string(), &dialect)
        .map_err(|e| ScriptError::Static(vec![static_frame(file, &e)]))?;

    let mut undefined: Vec<Frame> = ast
        .lint(Some(&*GLOBAL_NAMES))
        .into_iter()
        .filter(|lint| lint.short_name == UNDEFINED_NAME_LINT)
        .map(|lint| Frame::new(format!("undefined: {}", lint.original), span_start(&lint.location)))
        .collect();
    if !undefined.is_empty() {
        undefined.sort_by_key(|frame| (frame.position.line, frame.position.column));
        return Err(ScriptError::Static(undefined));
    }

    let mut loaded: Vec<(String, FrozenModule)> = Vec::new();
    for load in ast.loads() {
        let dependency = host.load(load.module_id).map_err(|cause| ScriptError::Eval {
            message: format!("cannot load {}: {cause}", load.module_id),
            backtrace: vec![Frame::new(TOPLEVEL, span_start(&load.span))],
        })?;
        loaded.push((load.module_id.to_string(), dependency));
    }
    let modules: HashMap<&str, &FrozenModule> = loaded
        .iter()
        .map(|(locator, module)| (locator.as_str(), module))
        .collect();
    let loader = ReturnFileLoader { modules: &modules };

    let module = Module::new();
    {
        let bridge = HostBridge::new(host);
        let mut eval = Evaluator::new(&module);
        eval.set_loader(&loader);
        eval.set_print_handler(&bridge);
        eval.extra = Some(&bridge);

        eval.eval_module(ast, &GLOBALS)
            .map_err(|e| runtime_error(file, &e, bridge.take_failure()))?;

        if let Some(entry) = entry {
            let function = match module.get(entry.name) {
                Some(function) if function.get_type() == "function" => function,
                Some(other) => {
                    return Err(ScriptError::eval(format!(
                        "{} must be a function, got {}",
                        entry.name,
                        other.get_type()
                    )))
                }
                None => {
                    return Err(ScriptError::eval(format!(
                        "module has no .{} field or method",
                        entry.name
                    )))
                }
            };
            let positional: Vec<_> = entry
                .argument
                .map(|argument| convert::to_heap(argument, module.heap()))
                .into_iter()
                .collect();
            eval.eval_function(function, &positional, &[])
                .map_err(|e| runtime_error(file, &e, bridge.take_failure()))?;
        }
    }

    module
        .freeze()
        .map_err(|e| ScriptError::eval(format!("cannot freeze module {file}: {:#}", anyhow::Error::from(e))))
}

/// Rejects sources whose brackets nest deeper than [`MAX_NESTING`]
fn check_nesting(file: &str, source: &str) -> Result<(), ScriptError> {
    let mut depth = 0usize;
    let mut chars = source.chars().peekable();
    let (mut line, mut column) = (1u32, 0u32);
    fn advance(c: char, line: &mut u32, column: &mut u32) {
        if c == '\n' {
            *line += 1;
            *column = 0;
        } else {
            *column += 1;
        }
    }

    while let Some(c) = chars.next() {
        advance(c, &mut line, &mut column);
        match c {
            '#' => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                    advance(next, &mut line, &mut column);
                }
            }
            '"' | '\'' => {
                let triple = {
                    let mut lookahead = chars.clone();
                    lookahead.next() == Some(c) && lookahead.next() == Some(c)
                };
                if triple {
                    for _ in 0..2 {
                        chars.next();
                        advance(c, &mut line, &mut column);
                    }
                }
                let mut run = 0;
                while let Some(next) = chars.next() {
                    advance(next, &mut line, &mut column);
                    if next == '\\' {
                        if let Some(escaped) = chars.next() {
                            advance(escaped, &mut line, &mut column);
                        }
                        run = 0;
                        continue;
                    }
                    if next != c {
                        run = 0;
                        if next == '\n' && !triple {
                            break;
                        }
                        continue;
                    }
                    run += 1;
                    if !triple || run == 3 {
                        break;
                    }
                }
            }
            '(' | '[' | '{' => {
                depth += 1;
                if depth > MAX_NESTING {
                    return Err(ScriptError::Static(vec![Frame::new(
                        format!("expression nested more than {MAX_NESTING} levels deep"),
                        ScriptPosition::new(file, line, column),
                    )]));
                }
            }
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

fn static_frame(file: &str, err: &starlark::Error) -> Frame {
    let position = err
        .span()
        .map(span_start)
        .unwrap_or_else(|| ScriptPosition::new(file, 1, 1));
    Frame::new(err.kind().to_string(), position)
}

/// Converts an evaluation failure into a backtrace, innermost call first.
/// The interpreter records each call as (callee, call site); every callee
/// is reported at the call site of the frame nested inside it, and the
/// innermost one at the error location.
fn runtime_error(file: &str, err: &starlark::Error, host_failure: Option<String>) -> ScriptError {
    let message = host_failure.unwrap_or_else(|| err.kind().to_string());
    if let Some(name) = VARIABLE_NOT_FOUND.captures(&message).and_then(|c| c.get(1)) {
        return ScriptError::Static(vec![Frame::new(
            format!("undefined: {}", name.as_str()),
            err.span()
                .map(span_start)
                .unwrap_or_else(|| ScriptPosition::new(file, 1, 1)),
        )]);
    }

    let calls = &err.call_stack().frames;
    let mut backtrace = Vec::with_capacity(calls.len() + 1);
    let innermost = match (calls.last(), err.span()) {
        (Some(call), Some(span)) => Some((call.name.clone(), call_position(span))),
        (Some(call), None) => call
            .location
            .as_ref()
            .map(|span| (call.name.clone(), call_position(span))),
        (None, Some(span)) => Some((TOPLEVEL.to_string(), span_start(span))),
        (None, None) => None,
    };
    if let Some((name, position)) = innermost {
        backtrace.push(Frame::new(name, position));
    }
    for (index, call) in calls.iter().enumerate().rev() {
        let Some(site) = &call.location else { continue };
        let caller = match index {
            0 => TOPLEVEL.to_string(),
            _ => calls[index - 1].name.clone(),
        };
        backtrace.push(Frame::new(caller, call_position(site)));
    }
    ScriptError::Eval { message, backtrace }
}

fn span_start(span: &FileSpan) -> ScriptPosition {
    let begin = span.resolve_span().begin;
    ScriptPosition::new(span.filename(), begin.line as u32 + 1, begin.column as u32 + 1)
}

/// Position of a call's opening parenthesis. Spans that are not a plain
/// `name(` or `a.b(` call keep their start position.
pub(crate) fn call_position(span: &FileSpan) -> ScriptPosition {
    let start = span_start(span);
    let text = span.source_span();
    let Some(paren) = text.find('(') else {
        return start;
    };
    let callee = &text[..paren];
    let plain_call = !callee.trim().is_empty()
        && callee
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c.is_whitespace());
    if !plain_call {
        return start;
    }
    match callee.rfind('\n') {
        Some(newline) => ScriptPosition::new(
            start.file.clone(),
            start.line + callee.matches('\n').count() as u32,
            callee[newline + 1..].chars().count() as u32 + 1,
        ),
        None => ScriptPosition::new(
            start.file.clone(),
            start.line,
            start.column + callee.chars().count() as u32,
        ),
    }
}
