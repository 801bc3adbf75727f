use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sqlpilot_core::config::AppConfig;
use sqlpilot_core::error::SqlPilotError;
use sqlpilot_core::event::EventBus;
use sqlpilot_core::state::StateRecord;
use sqlpilot_core::traits::{EventSink, LlmClient, SqlBackend};
use sqlpilot_core::types::{RunEvent, RunOutcome};

use sqlpilot_agent::{Adapters, Pipeline, PlotlyChartRenderer, Router, RunLogger};
use sqlpilot_db::SqliteBackend;
use sqlpilot_llm::LlmAssistant;

#[derive(Parser)]
#[command(name = "sqlpilot", version, about = "Ask questions of a SQL database in plain language")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "sqlpilot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question and exit
    Ask {
        /// Write the chart figure JSON here when one is produced
        #[arg(long)]
        chart_out: Option<PathBuf>,
        /// The question
        #[arg(trailing_var_arg = true)]
        question: Vec<String>,
    },
    /// Start interactive REPL mode
    Repl,
    /// Show current configuration
    Config,
    /// Print the routing table as a Mermaid flowchart
    Graph,
    /// Print the schema description handed to the SQL generator
    Schema,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Everything a run needs, wired once per process.
struct App {
    config: AppConfig,
    pipeline: Pipeline,
    event_bus: Arc<EventBus>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sqlpilot=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that need neither config nor database
    match &cli.command {
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "sqlpilot", &mut io::stdout());
            return Ok(());
        }
        Some(Commands::Graph) => {
            print!("{}", Router::text2sql().to_mermaid());
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&cli.config)?;

    if let Some(Commands::Config) = &cli.command {
        let mut shown = config.clone();
        if shown.model.api_key.is_some() {
            shown.model.api_key = Some("********".into());
        }
        for fb in &mut shown.fallback_models {
            if fb.api_key.is_some() {
                fb.api_key = Some("********".into());
            }
        }
        println!("{}", toml::to_string_pretty(&shown)?);
        return Ok(());
    }

    let db_path = config.database_path();
    let backend = Arc::new(SqliteBackend::open(&db_path, config.database.read_only)?);
    info!(path = %db_path.display(), read_only = backend.is_read_only(), "Database opened");

    let schema = match &config.workflow.schema_file {
        Some(file) => sqlpilot_db::load_schema_file(Path::new(file))?,
        None => backend
            .describe_schema()
            .await
            .map_err(|e| anyhow::anyhow!("failed to describe schema: {e}"))?,
    };

    if let Some(Commands::Schema) = &cli.command {
        println!("{schema}");
        return Ok(());
    }

    let llm: Arc<dyn LlmClient> = Arc::from(sqlpilot_llm::create_retrying_client(
        &config.model,
        &config.fallback_models,
    )?);
    let adapters = Adapters {
        assistant: Arc::new(LlmAssistant::new(llm, config.model.clone())),
        backend,
        charts: Arc::new(PlotlyChartRenderer::new()),
    };
    let event_bus = Arc::new(EventBus::default());
    let sink: Arc<dyn EventSink> = event_bus.clone();
    let pipeline = Pipeline::text2sql(
        &adapters,
        &config.workflow,
        &config.replies,
        &schema,
        sink,
    )?;

    let app = App {
        config,
        pipeline,
        event_bus,
    };

    match cli.command {
        Some(Commands::Ask {
            question,
            chart_out,
        }) => {
            let mut text = question.join(" ");
            if text.is_empty() {
                text = io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n");
            }
            let record = run_once(&app, &text).await?;
            if let (Some(path), Some(payload)) = (chart_out, record.graph_payload.as_ref()) {
                std::fs::write(&path, serde_json::to_string_pretty(payload)?)?;
                eprintln!("[chart written to {}]", path.display());
            }
        }
        Some(Commands::Repl) | None => run_repl(&app).await?,
        Some(Commands::Config)
        | Some(Commands::Graph)
        | Some(Commands::Schema)
        | Some(Commands::Completions { .. }) => {}
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if let Some(home) = dirs_home().map(|h| h.join(".sqlpilot").join("config.toml")) {
        if home.exists() {
            info!(path = %home.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home)?);
        }
    }
    eprintln!("Warning: No config file found. Set OPENAI_API_KEY or create sqlpilot.toml");
    create_env_config()
}

/// Minimal config from the environment when no file exists.
fn create_env_config() -> anyhow::Result<AppConfig> {
    let mut config: AppConfig = toml::from_str("[model]\nmodel_id = \"gpt-4o-mini\"\n")?;
    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        config.model.provider = "anthropic".into();
        config.model.model_id = "claude-sonnet-4-20250514".into();
        config.model.api_key = Some(key);
    } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        config.model.api_key = Some(key);
    } else {
        // Local Ollama
        config.model.provider = "ollama".into();
        config.model.model_id = "llama3.2".into();
        config.model.base_url = Some("http://localhost:11434/v1/chat/completions".into());
    }
    Ok(config)
}

async fn run_once(app: &App, question: &str) -> anyhow::Result<StateRecord> {
    run_question(app, question, CancellationToken::new()).await
}

/// Run one question, streaming step progress to stderr and the answer to stdout.
async fn run_question(
    app: &App,
    question: &str,
    cancel: CancellationToken,
) -> anyhow::Result<StateRecord> {
    let log_config = app.config.log.as_ref().filter(|l| l.enabled);
    // Subscribe before the run starts so its first events reach the logger.
    let log_rx = log_config.map(|_| app.event_bus.subscribe());

    let mut handle = app.pipeline.start_run_with(question, cancel.clone());

    let logger_cancel = CancellationToken::new();
    let logger = match (log_config, log_rx) {
        (Some(log), Some(rx)) => {
            let logger = RunLogger::new(app.config.log_dir(), log.level);
            Some(tokio::spawn(logger.run(
                rx,
                handle.run_id().clone(),
                logger_cancel.clone(),
            )))
        }
        _ => None,
    };

    let mut events = handle.events();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                RunEvent::StepStarted { step, .. } => eprintln!("[{}]", step.label()),
                RunEvent::StepProgress { message, .. } => eprintln!("  {}", message),
                RunEvent::StepFinished { .. } => {}
                RunEvent::RunTerminated { outcome, .. } => {
                    match outcome {
                        RunOutcome::Answered => {}
                        RunOutcome::Rejected => eprintln!("[not a database question]"),
                        RunOutcome::Degraded => eprintln!("[gave up after retries]"),
                        RunOutcome::Failed { error } => eprintln!("[error: {}]", error),
                    }
                    break;
                }
            }
        }
    });

    let interrupt = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let result = handle.result().await;
    ctrl_c.abort();
    printer.await.ok();
    if let Some(logger) = logger {
        if result.is_err() {
            // Cancelled runs never emit RunTerminated.
            logger_cancel.cancel();
        }
        if tokio::time::timeout(Duration::from_secs(2), logger).await.is_err() {
            warn!("Run log did not finish writing");
        }
    }

    let record = result?;
    println!("\n{}", record.final_answer.as_deref().unwrap_or_default());
    if record.needs_graph {
        eprintln!("[{} chart available]", record.graph_type);
    }
    Ok(record)
}

async fn run_repl(app: &App) -> anyhow::Result<()> {
    println!("sqlpilot v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Model: {} ({}), database: {}",
        app.config.model.model_id,
        app.config.model.provider,
        app.config.database_path().display()
    );
    println!("Type /help for commands, /quit to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut last_chart: Option<serde_json::Value> = None;

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break; // EOF
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let parts: Vec<&str> = input.split_whitespace().collect();
        match parts[0] {
            "/quit" | "/exit" | "/q" => {
                println!("Goodbye!");
                break;
            }
            "/help" => {
                println!("/graph          show the routing table");
                println!("/chart <file>   save the last chart as JSON");
                println!("/quit           exit");
                continue;
            }
            "/graph" => {
                print!("{}", app.pipeline.graph().router().to_mermaid());
                continue;
            }
            "/chart" => {
                match (parts.get(1), last_chart.as_ref()) {
                    (Some(path), Some(chart)) => {
                        std::fs::write(path, serde_json::to_string_pretty(chart)?)?;
                        println!("Chart written to {}", path);
                    }
                    (None, _) => println!("Usage: /chart <file>"),
                    (_, None) => println!("No chart yet."),
                }
                continue;
            }
            _ => {}
        }

        match run_question(app, input, CancellationToken::new()).await {
            Ok(record) => last_chart = record.graph_payload,
            Err(e) => match e.downcast_ref::<SqlPilotError>() {
                Some(err) if err.is_internal() => {
                    error!(error = %err, kind = ?err.kind(), "Run aborted by an internal fault")
                }
                _ => warn!(error = %e, "Run failed"),
            },
        }
        println!();
    }

    Ok(())
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
