use super::error::{CallFrame, InterpretationError};
use crate::context::{Context, ContextError};
use crate::instructions::{Collaborators, InstructionRegistry, KurtosisInstruction};
use crate::modules::ModuleContentProvider;
use crate::script::{self, CallArgs, EntryPoint, ScriptError, ScriptHost, Value};
use crate::types::ScriptPosition;
use once_cell::sync::Lazy;
use regex::Regex;
use starlark::environment::FrozenModule;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// File name attached to positions inside an inline script
pub const SCRIPT_FILE: &str = "startosis_script";
pub const MODULE_MAIN_FILE: &str = "main.star";
pub const MAIN_FUNCTION: &str = "main";

const CYCLE_MSG: &str = "There is a cycle in the load graph";

static PARAMETERLESS_MAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^def\s+main\s*\(\s*\)").expect("parameterless main pattern is valid")
});

/// Output and instruction list produced by a successful interpretation
pub struct InterpretedScript {
    pub output: String,
    pub instructions: Vec<Box<dyn KurtosisInstruction>>,
}

impl fmt::Debug for InterpretedScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpretedScript")
            .field("output", &self.output)
            .field("instructions", &self.instructions.len())
            .finish()
    }
}

/// Turns scripts into instruction lists
///
/// Holds no per-call state; every `interpret*` call starts from an empty
/// output buffer, instruction list, load stack and module cache.
pub struct StartosisInterpreter {
    registry: InstructionRegistry,
    collaborators: Collaborators,
    provider: Arc<dyn ModuleContentProvider>,
}

impl StartosisInterpreter {
    pub fn new(collaborators: Collaborators, provider: Arc<dyn ModuleContentProvider>) -> Self {
        Self {
            registry: InstructionRegistry::with_core_instructions(),
            collaborators,
            provider,
        }
    }

    pub fn provider(&self) -> &Arc<dyn ModuleContentProvider> {
        &self.provider
    }

    /// Interprets an inline script
    pub fn interpret(
        &self,
        ctx: &Context,
        script: &str,
    ) -> Result<InterpretedScript, InterpretationError> {
        debug!("Interpreting inline script");
        let mut session = Session::new(self, ctx);
        let result = script::exec_module(SCRIPT_FILE, script, &mut session, None);
        session.settle(result)?;
        Ok(session.finish())
    }

    /// Interprets the `main.star` of the module at `locator` and calls its
    /// `main` function with `params` (a JSON document, empty meaning `{}`)
    pub fn interpret_module(
        &self,
        ctx: &Context,
        locator: &str,
        main_contents: &str,
        params: &str,
    ) -> Result<InterpretedScript, InterpretationError> {
        let main_locator = format!("{}/{MODULE_MAIN_FILE}", locator.trim_end_matches('/'));
        debug!("Interpreting module {}", main_locator);
        let args = decode_params(params)?;
        let entry = EntryPoint {
            name: MAIN_FUNCTION,
            argument: (!PARAMETERLESS_MAIN.is_match(main_contents)).then_some(&args),
        };

        let mut session = Session::new(self, ctx);
        session.load_stack.push(main_locator.clone());
        let result = script::exec_module(&main_locator, main_contents, &mut session, Some(entry));
        session.settle(result)?;
        Ok(session.finish())
    }
}

fn decode_params(params: &str) -> Result<Value, InterpretationError> {
    let json = if params.trim().is_empty() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(params).map_err(|e| {
            InterpretationError::new(format!(
                "Failed to decode the module parameters '{params}' as JSON: {e}"
            ))
        })?
    };
    Value::from_json(&json).map_err(|e| {
        InterpretationError::new(format!("Unsupported module parameters '{params}': {e}"))
    })
}

fn to_interpretation_error(err: ScriptError) -> InterpretationError {
    match err {
        ScriptError::Static(frames) => InterpretationError::from_static_frames(
            frames.into_iter().map(CallFrame::from).collect(),
        ),
        ScriptError::Eval { message, backtrace } => InterpretationError::evaluation(
            &message,
            backtrace.into_iter().map(CallFrame::from).collect(),
        ),
    }
}

/// One-line summary of a failure inside a loaded module
fn describe_load_failure(err: ScriptError) -> String {
    match err {
        ScriptError::Static(frames) => frames
            .into_iter()
            .map(|frame| format!("{}: {}", frame.position, frame.description))
            .collect::<Vec<_>>()
            .join("; "),
        ScriptError::Eval { message, .. } => message,
    }
}

/// State of one top-level interpretation, lent to the evaluator as its host
struct Session<'a> {
    interpreter: &'a StartosisInterpreter,
    ctx: &'a Context,
    output: String,
    instructions: Vec<Box<dyn KurtosisInstruction>>,
    /// Locators currently being loaded, outermost first
    load_stack: Vec<String>,
    /// Successfully evaluated modules
    loaded: HashMap<String, FrozenModule>,
    interrupted: Option<ContextError>,
}

impl<'a> Session<'a> {
    fn new(interpreter: &'a StartosisInterpreter, ctx: &'a Context) -> Self {
        Self {
            interpreter,
            ctx,
            output: String::new(),
            instructions: Vec::new(),
            load_stack: Vec::new(),
            loaded: HashMap::new(),
            interrupted: None,
        }
    }

    /// Records a cancellation so it wins over the script error it causes
    fn check_context(&mut self) -> Result<(), String> {
        match self.ctx.err() {
            Some(err) => {
                let message = err.to_string();
                self.interrupted = Some(err);
                Err(message)
            }
            None => Ok(()),
        }
    }

    fn settle<T>(&mut self, result: Result<T, ScriptError>) -> Result<T, InterpretationError> {
        if let Some(err) = self.interrupted.take() {
            return Err(err.into());
        }
        result.map_err(to_interpretation_error)
    }

    fn finish(self) -> InterpretedScript {
        InterpretedScript {
            output: self.output,
            instructions: self.instructions,
        }
    }
}

impl ScriptHost for Session<'_> {
    fn print(&mut self, text: &str) {
        self.output.push_str(text);
        self.output.push('\n');
    }

    fn load(&mut self, locator: &str) -> Result<FrozenModule, String> {
        self.check_context()?;
        if self.load_stack.iter().any(|in_flight| in_flight == locator) {
            return Err(CYCLE_MSG.to_string());
        }
        if let Some(module) = self.loaded.get(locator) {
            debug!("Module {} already loaded in this interpretation", locator);
            return Ok(module.clone());
        }

        let contents = self
            .interpreter
            .provider
            .get_module_contents(self.ctx, locator)
            .map_err(|e| e.to_string())?;
        info!("Loading module {}", locator);

        self.load_stack.push(locator.to_string());
        let result = script::exec_module(locator, &contents, self, None);
        self.load_stack.pop();

        let module = result.map_err(describe_load_failure)?;
        self.loaded.insert(locator.to_string(), module.clone());
        Ok(module)
    }

    fn call_builtin(
        &mut self,
        name: &str,
        args: CallArgs,
        position: &ScriptPosition,
    ) -> Result<Value, String> {
        self.check_context()?;
        let builtin = self
            .interpreter
            .registry
            .get(name)
            .ok_or_else(|| format!("unknown built-in {name}"))?;
        let built = builtin.build(args, position.clone(), &self.interpreter.collaborators)?;
        debug!("Constructed {} at {}", name, position);
        self.instructions.push(built.instruction);
        Ok(built.placeholder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::registry::tests::collaborators;
    use crate::modules::InMemoryModuleProvider;

    fn interpreter(modules: &[(&str, &str)]) -> StartosisInterpreter {
        StartosisInterpreter::new(
            collaborators(),
            Arc::new(InMemoryModuleProvider::with_modules(modules.iter().copied())),
        )
    }

    #[test]
    fn test_diamond_load_evaluates_shared_module_once() {
        let interpreter = interpreter(&[
            ("github.com/x/y/base.star", "print(\"base\")\nstop_service(\"db\")\nv = 1\n"),
            ("github.com/x/y/left.star", "load(\"github.com/x/y/base.star\", \"v\")\nl = v\n"),
            ("github.com/x/y/right.star", "load(\"github.com/x/y/base.star\", \"v\")\nr = v\n"),
        ]);
        let script = "load(\"github.com/x/y/left.star\", \"l\")\nload(\"github.com/x/y/right.star\", \"r\")\nprint(l + r)\n";
        let result = interpreter.interpret(&Context::background(), script).unwrap();
        assert_eq!(result.output, "base\n2\n");
        assert_eq!(result.instructions.len(), 1);
        assert_eq!(
            result.instructions[0].position(),
            &ScriptPosition::new("github.com/x/y/base.star", 2, 13)
        );
    }

    #[test]
    fn test_cancelled_context_aborts_interpretation() {
        let interpreter = interpreter(&[]);
        let (ctx, handle) = Context::with_cancel();
        handle.cancel();
        let err = interpreter
            .interpret(&ctx, "stop_service(\"db\")\n")
            .unwrap_err();
        assert_eq!(err.message, "Interpretation interrupted: the operation was cancelled");
    }

    #[test]
    fn test_module_main_receives_params() {
        let interpreter = interpreter(&[]);
        let main = "def main(args):\n    print(\"hello \" + args.name)\n";
        let result = interpreter
            .interpret_module(&Context::background(), "github.com/x/y", main, "{\"name\": \"world\"}")
            .unwrap();
        assert_eq!(result.output, "hello world\n");
    }

    #[test]
    fn test_module_without_main_fails() {
        let interpreter = interpreter(&[]);
        let err = interpreter
            .interpret_module(&Context::background(), "github.com/x/y", "a = 1\n", "")
            .unwrap_err();
        assert_eq!(err.message, "Evaluation error: module has no .main field or method");
    }

    #[test]
    fn test_main_without_parameters_is_called_bare() {
        let interpreter = interpreter(&[]);
        let result = interpreter
            .interpret_module(&Context::background(), "github.com/x/y", "def main():\n    print(\"hi\")\n", "")
            .unwrap();
        assert_eq!(result.output, "hi\n");
    }
}
