use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use chatflow::collaborator::Collaborators;
use chatflow::collaborator::llm::HttpTextGenerator;
use chatflow::collaborator::nlu::HttpIntentClassifier;
use chatflow::collaborator::rest::HttpRestGateway;
use chatflow::collaborator::store::DirScenarioStore;
use chatflow::config::Config;
use chatflow::logger::init_tracing;
use chatflow::scenario::Scenario;
use chatflow::session::InMemorySessionStore;
use chatflow::{DialogService, ScenarioEngine};

#[derive(Parser, Debug)]
#[command(
    name = "chatflow",
    about = "Scenario-driven dialogue engine for conversational bots",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an interactive console dialogue against a scenario directory
    Run(RunArgs),

    /// Decode one scenario file and check its graph for dangling targets
    Validate { file: PathBuf },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Directory holding scenario envelope files (*.json)
    #[arg(long, default_value = "scenarios")]
    scenarios: PathBuf,

    /// Idle seconds before a session expires
    #[arg(long, default_value = "1800")]
    session_timeout: u64,

    /// Log level override (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write JSON logs into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run(RunArgs {
        scenarios: PathBuf::from("scenarios"),
        session_timeout: 1800,
        log_level: "info".to_string(),
        log_dir: None,
    })) {
        Commands::Run(args) => run(args).await,
        Commands::Validate { file } => validate(file),
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let _guard = init_tracing(&args.log_level, args.log_dir.as_deref())?;
    let config = Config::from_env()?;

    info!("chatflow starting up");

    let store = DirScenarioStore::load(&args.scenarios)?;
    if store.is_empty() {
        bail!("no scenarios found in {}", args.scenarios.display());
    }
    info!("loaded {} scenario(s) from {}", store.len(), args.scenarios.display());

    let collaborators = Collaborators {
        scenarios: Arc::new(store),
        classifier: Arc::new(HttpIntentClassifier::new(
            config.nlu_service_url.clone(),
            config.nlu_timeout,
        )),
        generator: Arc::new(HttpTextGenerator::new(
            config.llm_base_url.clone(),
            config.llm_model.clone(),
            config.llm_api_key.clone(),
            config.llm_timeout,
        )),
        rest: Arc::new(HttpRestGateway::new()),
    };
    let engine = Arc::new(ScenarioEngine::new(collaborators, config.engine.clone()));
    let sessions = InMemorySessionStore::new(Duration::from_secs(args.session_timeout));
    let service = DialogService::new(engine, sessions);

    let (session_id, opening) = service.create_session().await;
    println!("bot> {}", opening.message);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(line) = line else { break };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" {
            break;
        }

        let response = service.send_message(&session_id, text).await;
        println!("bot> {}", response.message);

        let ended = response
            .context
            .get("dialog_ended")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if ended {
            break;
        }
    }

    service.end_session(&session_id).await;
    info!("chatflow shutting down");
    println!("Goodbye!");
    Ok(())
}

fn validate(file: PathBuf) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&file)?;
    let envelope: Value = serde_json::from_str(&text)?;
    let scenario = Scenario::from_envelope(envelope)?;

    let issues = scenario.dangling_targets();
    if issues.is_empty() {
        println!(
            "Scenario `{}` is valid ({} nodes, {} edges).",
            scenario.id,
            scenario.nodes.len(),
            scenario.edges.len()
        );
        Ok(())
    } else {
        for issue in &issues {
            eprintln!("- {issue}");
        }
        bail!("{} dangling reference(s) in {}", issues.len(), file.display());
    }
}
