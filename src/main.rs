mod input_file;

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use futures::{Stream, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use conclave_core::config::{AppConfig, ModelConfig};
use conclave_core::types::{Notification, RunId, RunInput};
use conclave_engine::{Engine, EngineContext, TaskCatalog};

#[derive(Parser)]
#[command(name = "conclave", version, about = "Fan-out/fan-in analysis engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conclave.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the selected tasks and stream their results
    Run {
        /// Task catalog (JSON array of task descriptors)
        #[arg(long, default_value = "tasks.json")]
        catalog: PathBuf,
        /// Task ids to run (all catalog tasks if omitted)
        #[arg(short, long = "task")]
        tasks: Vec<String>,
        /// Input file: a per-task map or a {"fields", "files"} form
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Run id (auto-generated if not provided)
        #[arg(long)]
        run_id: Option<String>,
        /// Output framing
        #[arg(long, value_enum, default_value_t = OutputFormat::Sse)]
        format: OutputFormat,
        /// Override the fast model, as provider:model
        #[arg(long)]
        fast_model: Option<String>,
        /// Override the vision model, as provider:model
        #[arg(long)]
        vision_model: Option<String>,
    },
    /// List the tasks in a catalog
    Tasks {
        #[arg(long, default_value = "tasks.json")]
        catalog: PathBuf,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// `data: {json}` frames separated by blank lines
    Sse,
    /// One JSON object per line
    Jsonl,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only notifications
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("conclave=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "conclave", &mut std::io::stdout());
        return Ok(());
    }

    match cli.command {
        Commands::Run {
            catalog,
            tasks,
            input,
            run_id,
            format,
            fast_model,
            vision_model,
        } => {
            let config = resolve_config(&cli.config, fast_model.as_deref(), vision_model.as_deref())?;
            run(config, &catalog, &tasks, input.as_deref(), run_id, format).await
        }
        Commands::Tasks { catalog } => {
            let catalog = TaskCatalog::load(&catalog)?;
            for task in catalog.all() {
                let fields: Vec<&str> = task.context_spec.iter().map(|f| f.field_id.as_str()).collect();
                println!(
                    "{} {:<16} {:<24} [{}]",
                    task.icon,
                    task.id,
                    task.display_name,
                    fields.join(", ")
                );
            }
            Ok(())
        }
        Commands::Config => {
            let config = resolve_config(&cli.config, None, None)?;
            println!("{}", toml::to_string_pretty(&config.redacted())?);
            Ok(())
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }
}

async fn run(
    config: AppConfig,
    catalog: &Path,
    task_ids: &[String],
    input: Option<&Path>,
    run_id: Option<String>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let catalog = TaskCatalog::load(catalog)?;
    let descriptors = if task_ids.is_empty() {
        catalog.all().to_vec()
    } else {
        catalog.select(task_ids)?
    };

    let input = match input {
        Some(path) => input_file::load(path, &descriptors)?,
        None => RunInput::new(),
    };

    let run_id = run_id.map(|id| RunId::from_str(&id)).unwrap_or_default();
    let engine = Engine::new(EngineContext::from_config(config));

    info!(run_id = %run_id, tasks = descriptors.len(), "Starting run");
    let mut stream = engine.start_run(run_id.clone(), descriptors, input)?;

    let end = pump(&mut stream, tokio::signal::ctrl_c(), &mut std::io::stdout(), format).await?;
    match end {
        PumpEnd::Interrupted => {
            warn!(run_id = %run_id, "Interrupted, aborting run");
            engine.abort(&run_id);
            Ok(())
        }
        PumpEnd::Finished { failed: true } => {
            anyhow::bail!("run {} ended with an error", run_id)
        }
        PumpEnd::Finished { failed: false } => Ok(()),
    }
}

#[derive(Debug, PartialEq)]
enum PumpEnd {
    /// The stream ended; `failed` is set if an error notification was seen.
    Finished { failed: bool },
    Interrupted,
}

/// Write notifications to `out` until the stream ends or `interrupt`
/// resolves.
async fn pump<S, F, W>(
    stream: &mut S,
    interrupt: F,
    out: &mut W,
    format: OutputFormat,
) -> std::io::Result<PumpEnd>
where
    S: Stream<Item = Notification> + Unpin,
    F: Future,
    W: Write,
{
    // One listener for the whole run, so a signal between polls is not lost
    tokio::pin!(interrupt);
    let mut failed = false;
    loop {
        tokio::select! {
            next = stream.next() => {
                let Some(notification) = next else {
                    return Ok(PumpEnd::Finished { failed });
                };
                failed |= notification.is_error();
                let frame = match format {
                    OutputFormat::Sse => notification.to_sse_frame(),
                    OutputFormat::Jsonl => format!("{}\n", notification.to_json()),
                };
                out.write_all(frame.as_bytes())?;
                out.flush()?;
            }
            _ = &mut interrupt => return Ok(PumpEnd::Interrupted),
        }
    }
}

/// Load the config file if present, otherwise build one from the
/// environment. `provider:model` overrides replace the configured models.
fn resolve_config(
    path: &Path,
    fast_model: Option<&str>,
    vision_model: Option<&str>,
) -> anyhow::Result<AppConfig> {
    let mut config = if path.exists() {
        AppConfig::load(path)?
    } else {
        match fast_model {
            Some(spec) => AppConfig::new(model_from_spec(spec)?),
            None => create_env_config()?,
        }
    };

    if let Some(spec) = fast_model {
        config.models.fast = model_from_spec(spec)?;
    }
    if let Some(spec) = vision_model {
        config.models.vision = Some(model_from_spec(spec)?);
    }
    config.validate()?;
    Ok(config)
}

/// Parse `provider:model`, taking the API key from `{PROVIDER}_API_KEY`.
fn model_from_spec(spec: &str) -> anyhow::Result<ModelConfig> {
    let mut model = ModelConfig::from_spec(spec)?;
    let key_var = format!("{}_API_KEY", model.provider.to_uppercase().replace('-', "_"));
    model.api_key = std::env::var(key_var).ok();
    Ok(model)
}

fn create_env_config() -> anyhow::Result<AppConfig> {
    let model = if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        let mut m = ModelConfig::new("anthropic", "claude-sonnet-4-20250514");
        m.api_key = Some(key);
        m
    } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        let mut m = ModelConfig::new("openai", "gpt-4o");
        m.api_key = Some(key);
        m
    } else {
        anyhow::bail!(
            "no config file and no ANTHROPIC_API_KEY or OPENAI_API_KEY set; \
             create conclave.toml or pass --fast-model provider:model"
        );
    };
    Ok(AppConfig::new(model))
}
