//! triage - production incident responder CLI

mod config;
mod utils;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use triage_agent::{
    GraphEvent, HttpToolGateway, IncidentGraph, IncidentState, InputSource, SlackFeed, Step,
    ToolCatalog,
};
use triage_ai::providers::get_api_key;
use triage_ai::providers::openai::OpenAIProvider;
use triage_ai::{Message, Model, Provider, models};

use crate::config::Config;
use crate::utils::preview;

/// triage - work production incidents through their runbook
#[derive(Parser, Debug)]
#[command(name = "triage")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Respond to an incident
    Run(RunArgs),
    /// List the sample incidents
    Incidents,
    /// List the tools the tool service offers
    Tools,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Incident report text
    #[arg(long, conflicts_with_all = ["title", "random", "watch"])]
    incident: Option<String>,

    /// Title of a sample incident
    #[arg(long, conflicts_with_all = ["random", "watch"])]
    title: Option<String>,

    /// Pick a sample incident at random (the default)
    #[arg(long, conflicts_with = "watch")]
    random: bool,

    /// Wait for the incident on the Slack channel instead
    #[arg(long)]
    watch: bool,

    /// Abort the run after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Model to use (default: gpt-4o)
    #[arg(short, long)]
    model: Option<String>,

    /// Provider (openai, groq, openrouter, ollama, custom)
    #[arg(short, long)]
    provider: Option<String>,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("triage=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.init_config {
        let path = Config::init().context("creating config file")?;
        println!("Config file created at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let cfg = Config::load();

    match args.command {
        Some(Command::Run(run)) => {
            if !run_incident(&cfg, run).await? {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Incidents) => list_incidents(&cfg),
        Some(Command::Tools) => list_tools(&cfg).await,
        None => {
            Args::command().print_help()?;
            Ok(())
        }
    }
}

fn build_model(cfg: &Config, run: &RunArgs) -> Model {
    let provider = run
        .provider
        .as_deref()
        .or(cfg.provider.as_deref())
        .map(Provider::parse)
        .unwrap_or(Provider::OpenAI);
    let id = run
        .model
        .as_deref()
        .or(cfg.model.as_deref())
        .unwrap_or(models::DEFAULT_MODEL_ID);
    models::model_for(provider, id, cfg.base_url.as_deref())
}

fn api_key(cfg: &Config, model: &Model) -> anyhow::Result<String> {
    match model.provider.api_key_env_var() {
        Some(var) => get_api_key(cfg.api_key.as_deref(), var).map_err(|_| {
            anyhow!(
                "no API key for {}: export {}=your-key or add api_key to the config file (triage --init-config)",
                model.provider.name(),
                var
            )
        }),
        // Local and custom endpoints may not need a key
        None => Ok(cfg.api_key.clone().unwrap_or_default()),
    }
}

fn build_gateway(cfg: &Config) -> anyhow::Result<HttpToolGateway> {
    let gateway = HttpToolGateway::from_env()?;
    Ok(match &cfg.tools_base_url {
        Some(url) => gateway.with_base_url(url),
        None => gateway,
    })
}

/// Run one incident. Returns whether the run closed with a summary.
async fn run_incident(cfg: &Config, run: RunArgs) -> anyhow::Result<bool> {
    let model = build_model(cfg, &run);
    let provider = Arc::new(OpenAIProvider::new(api_key(cfg, &model)?));
    let gateway = Arc::new(build_gateway(cfg)?);
    let catalog = ToolCatalog::discover(gateway.as_ref())
        .await
        .context("discovering tools")?;

    let (state, source) = if run.watch {
        let feed = SlackFeed::from_env()?;
        println!("Watching the incident channel...");
        (
            IncidentState::default(),
            InputSource::PollingChannel(Arc::new(feed)),
        )
    } else {
        let book = cfg.incidents()?;
        let report = match (run.incident, run.title) {
            (Some(text), _) => text,
            (None, Some(title)) => book.incident(&title)?.to_string(),
            (None, None) => {
                tracing::debug!(explicit = run.random, "picking a random sample incident");
                book.random_incident()?.to_string()
            }
        };
        println!("incident> {}", report.trim());
        (IncidentState::from_incident(report), InputSource::StaticIncident)
    };

    let graph = IncidentGraph::new(model, provider, gateway, catalog, cfg.templates()?)?
        .with_config(cfg.graph_config())
        .with_source(source);

    let mut receiver = graph.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = receiver.recv().await {
            let terminal = event.is_terminal();
            print_event(event);
            if terminal {
                break;
            }
        }
    });

    let result = match run.timeout {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), graph.invoke(state))
            .await
            .map_err(|_| anyhow!("run timed out after {}s", secs))?,
        None => graph.invoke(state).await,
    };
    // Closing the channel lets the printer drain and exit
    drop(graph);
    let _ = printer.await;

    let state = result?;
    match state.summary() {
        Some(summary) => {
            println!("\n{}", summary.trim());
            Ok(true)
        }
        None => {
            eprintln!("Run ended without a summary");
            Ok(false)
        }
    }
}

fn print_event(event: GraphEvent) {
    match event {
        GraphEvent::StepStarted { step } => {
            if step != Step::Reasoning {
                println!("[{}]", step);
            }
        }
        GraphEvent::MessageAppended { message } => match &message {
            Message::System { .. } => println!("system> {}", preview(&message.text(), 120)),
            Message::User { .. } => println!("user> {}", preview(&message.text(), 200)),
            Message::Assistant { .. } => {
                let text = message.text();
                if !text.trim().is_empty() {
                    println!("assistant> {}", text.trim());
                }
            }
            Message::ToolResult { .. } => {}
        },
        GraphEvent::PollIdle { wait_secs } => {
            tracing::debug!(wait_secs, "no new channel messages");
        }
        GraphEvent::ToolExecutionStart {
            tool_name,
            arguments,
            ..
        } => {
            println!("[Running {} {}]", tool_name, preview(&arguments.to_string(), 80));
        }
        GraphEvent::ToolExecutionEnd {
            tool_name,
            result,
            is_error,
            ..
        } => {
            if is_error {
                println!("[{} failed: {}]", tool_name, preview(&result, 200));
            } else {
                println!("[{}: {}]", tool_name, preview(&result, 200));
            }
        }
        GraphEvent::Error { message } => {
            eprintln!("Error: {}", message);
        }
        GraphEvent::Terminated { steps } => {
            println!("[done after {} steps]", steps);
        }
    }
}

fn list_incidents(cfg: &Config) -> anyhow::Result<()> {
    let book = cfg.incidents()?;
    println!("Sample incidents:\n");
    for title in book.titles() {
        let report = book.incident(title)?;
        println!("  {:<24} {}", title, preview(report, 60));
    }
    Ok(())
}

async fn list_tools(cfg: &Config) -> anyhow::Result<()> {
    let gateway = build_gateway(cfg)?;
    let catalog = ToolCatalog::discover(&gateway)
        .await
        .context("discovering tools")?;
    println!("Available tools ({}):\n", catalog.len());
    for tool in catalog.tools() {
        println!("  {:<28} {}", tool.name, preview(&tool.description, 80));
    }
    Ok(())
}
