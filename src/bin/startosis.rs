use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use startosis_engine::backend::select_backend;
use startosis_engine::context::Context;
use startosis_engine::engine::{RunError, RunResponse, StartosisInterpreter, StartosisRunner, StartosisValidator};
use startosis_engine::instructions::Collaborators;
use startosis_engine::modules::archive::pack_directory;
use startosis_engine::modules::GitModuleContentProvider;
use startosis_engine::network::{RecordingServiceNetwork, StaticFactsEngine};
use startosis_engine::types::EngineConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "startosis")]
#[command(about = "Interpret, validate and execute enclave provisioning scripts")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct StartosisCli {
    #[command(subcommand)]
    command: Command,

    /// Engine configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Container backend used to check images ("docker" or "mock")
    #[arg(long, global = true, default_value = "docker")]
    backend: String,

    /// Interpret and validate, but only print the instructions
    #[arg(long, global = true)]
    dry_run: bool,

    /// Abort the run after this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Print the run response as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run an inline script file (or stdin if -)
    Run { script: PathBuf },

    /// Run the main.star of a module
    Module {
        /// Module locator, e.g. github.com/author/repo
        locator: String,

        /// JSON document passed to main(args)
        #[arg(long, default_value = "")]
        params: String,

        /// Upload this local directory as the module instead of fetching it
        #[arg(long)]
        local: Option<PathBuf>,
    },

    /// Remove leftover temporary directories from the module cache
    CleanCache {
        /// Only remove directories older than this many seconds
        #[arg(long, default_value = "3600")]
        min_age: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = StartosisCli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting startosis v{}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    config.validate()?;
    debug!("Using configuration {:?}", config);

    let provider = Arc::new(GitModuleContentProvider::from_config(&config));

    if let Command::CleanCache { min_age } = &cli.command {
        let removed = provider.collect_orphaned_temp_dirs(Duration::from_secs(*min_age))?;
        println!("Removed {removed} orphaned temporary directories");
        return Ok(());
    }

    let backend = select_backend(&cli.backend, &config.docker_binary)?;
    let validator = StartosisValidator::from_config(Arc::from(backend), &config);
    let collaborators = Collaborators::new(
        Arc::new(RecordingServiceNetwork::new()),
        Arc::new(StaticFactsEngine::new()),
    );
    let interpreter = StartosisInterpreter::new(collaborators, provider);
    let runner = StartosisRunner::new(interpreter, validator);

    let ctx = match cli.timeout {
        Some(seconds) => Context::background().with_timeout(Duration::from_secs(seconds)),
        None => Context::background(),
    };
    let dry_run = cli.dry_run || config.dry_run;
    let mut stdout = std::io::stdout();

    let response = match &cli.command {
        Command::Run { script } => {
            let source = read_script(script)?;
            runner.run_script(&ctx, &source, dry_run, &mut stdout).await
        }
        Command::Module {
            locator,
            params,
            local: Some(dir),
        } => {
            let archive = pack_directory(dir)
                .with_context(|| format!("Failed to package module directory {}", dir.display()))?;
            runner
                .run_local_module(&ctx, locator, archive, params, dry_run, &mut stdout)
                .await
        }
        Command::Module {
            locator,
            params,
            local: None,
        } => {
            runner
                .run_remote_module(&ctx, locator, params, dry_run, &mut stdout)
                .await
        }
        Command::CleanCache { .. } => return Ok(()),
    };

    report(&response, cli.json)
}

fn read_script(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut source = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut source)
            .context("Failed to read script from stdin")?;
        Ok(source)
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))
    }
}

fn report(response: &RunResponse, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
    } else {
        if !response.output.is_empty() {
            println!("--- script output ---");
            print!("{}", response.output);
        }
        println!(
            "--- {} instructions {} ---",
            response.instructions.len(),
            if response.dry_run { "planned" } else { "executed" }
        );
    }

    match &response.error {
        None => Ok(()),
        Some(RunError::Interpretation(err)) => bail!("{err}"),
        Some(RunError::Validation { errors }) => {
            for err in errors {
                eprintln!("{err}");
            }
            bail!("Validation failed with {} error(s)", errors.len())
        }
        Some(RunError::Execution(err)) => bail!("{err}"),
    }
}
