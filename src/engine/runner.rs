//! Interpret, validate and execute in one call

use super::error::{ExecutionError, InterpretationError, ValidationError};
use super::executor::StartosisExecutor;
use super::interpreter::{InterpretedScript, StartosisInterpreter, MODULE_MAIN_FILE};
use super::validator::StartosisValidator;
use crate::context::Context;
use crate::instructions::SerializedInstruction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Why a run stopped early
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunError {
    Interpretation(InterpretationError),
    Validation { errors: Vec<ValidationError> },
    Execution(ExecutionError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    /// Text printed by the script
    pub output: String,
    /// Instructions executed (or dry-run) successfully, in order
    pub instructions: Vec<SerializedInstruction>,
    pub error: Option<RunError>,
}

impl RunResponse {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Source of the script for one run
enum RunSource {
    Script(String),
    RemoteModule {
        locator: String,
        params: String,
    },
    LocalModule {
        locator: String,
        archive: Vec<u8>,
        params: String,
    },
}

pub struct StartosisRunner {
    interpreter: Arc<StartosisInterpreter>,
    validator: StartosisValidator,
    executor: StartosisExecutor,
}

impl StartosisRunner {
    pub fn new(interpreter: StartosisInterpreter, validator: StartosisValidator) -> Self {
        Self {
            interpreter: Arc::new(interpreter),
            validator,
            executor: StartosisExecutor::new(),
        }
    }

    pub async fn run_script<W>(
        &self,
        ctx: &Context,
        script: &str,
        dry_run: bool,
        sink: &mut W,
    ) -> RunResponse
    where
        W: Write + Send + ?Sized,
    {
        self.run(ctx, RunSource::Script(script.to_string()), dry_run, sink)
            .await
    }

    /// Fetches the module at `locator` and runs its `main.star`
    pub async fn run_remote_module<W>(
        &self,
        ctx: &Context,
        locator: &str,
        params: &str,
        dry_run: bool,
        sink: &mut W,
    ) -> RunResponse
    where
        W: Write + Send + ?Sized,
    {
        let source = RunSource::RemoteModule {
            locator: locator.to_string(),
            params: params.to_string(),
        };
        self.run(ctx, source, dry_run, sink).await
    }

    /// Installs an uploaded `.tgz` module as `locator`, replacing any
    /// cached copy, and runs its `main.star`
    pub async fn run_local_module<W>(
        &self,
        ctx: &Context,
        locator: &str,
        archive: Vec<u8>,
        params: &str,
        dry_run: bool,
        sink: &mut W,
    ) -> RunResponse
    where
        W: Write + Send + ?Sized,
    {
        let source = RunSource::LocalModule {
            locator: locator.to_string(),
            archive,
            params: params.to_string(),
        };
        self.run(ctx, source, dry_run, sink).await
    }

    async fn run<W>(&self, ctx: &Context, source: RunSource, dry_run: bool, sink: &mut W) -> RunResponse
    where
        W: Write + Send + ?Sized,
    {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!("Starting run {}", run_id);

        let respond = |output: String,
                       instructions: Vec<SerializedInstruction>,
                       error: Option<RunError>| {
            if let Some(error) = &error {
                warn!("Run {} failed: {:?}", run_id, error);
            }
            RunResponse {
                run_id: run_id.clone(),
                started_at,
                finished_at: Utc::now(),
                dry_run,
                output,
                instructions,
                error,
            }
        };

        let interpreted = match self.interpret(ctx, source).await {
            Ok(interpreted) => interpreted,
            Err(err) => {
                return respond(String::new(), Vec::new(), Some(RunError::Interpretation(err)));
            }
        };

        if let Err(errors) = self.validator.validate(ctx, &interpreted.instructions).await {
            return respond(
                interpreted.output,
                Vec::new(),
                Some(RunError::Validation { errors }),
            );
        }

        match self
            .executor
            .execute(ctx, dry_run, &interpreted.instructions, sink)
            .await
        {
            Ok(log) => respond(interpreted.output, log, None),
            Err(failure) => respond(
                interpreted.output,
                failure.partial_log,
                Some(RunError::Execution(failure.error)),
            ),
        }
    }

    /// Interpretation is CPU-bound and single-threaded; it runs on the
    /// blocking pool
    async fn interpret(
        &self,
        ctx: &Context,
        source: RunSource,
    ) -> Result<InterpretedScript, InterpretationError> {
        let interpreter = Arc::clone(&self.interpreter);
        let ctx = ctx.clone();
        tokio::task::spawn_blocking(move || match source {
            RunSource::Script(script) => interpreter.interpret(&ctx, &script),
            RunSource::RemoteModule { locator, params } => {
                let main = read_main_file(&interpreter, &ctx, &locator)?;
                interpreter.interpret_module(&ctx, &locator, &main, &params)
            }
            RunSource::LocalModule {
                locator,
                archive,
                params,
            } => {
                interpreter
                    .provider()
                    .store_module_contents(&locator, &archive, true)
                    .map_err(|e| {
                        InterpretationError::new(format!(
                            "Cannot store module '{locator}': {e}"
                        ))
                    })?;
                let main = read_main_file(&interpreter, &ctx, &locator)?;
                interpreter.interpret_module(&ctx, &locator, &main, &params)
            }
        })
        .await
        .map_err(|e| InterpretationError::new(format!("Interpretation task failed: {e}")))?
    }
}

fn read_main_file(
    interpreter: &StartosisInterpreter,
    ctx: &Context,
    locator: &str,
) -> Result<String, InterpretationError> {
    let main_locator = format!("{}/{MODULE_MAIN_FILE}", locator.trim_end_matches('/'));
    interpreter
        .provider()
        .get_module_contents(ctx, &main_locator)
        .map_err(|e| InterpretationError::new(format!("Cannot load module '{locator}': {e}")))
}
