//! Command line interface of Deep Agent.

#[macro_use]
extern crate tracing;

use std::io::{self, Write as _};
use std::process::ExitCode;

use clap::Parser;
use deep_agent::repl::{self, Repl, TurnOutcome};
use deep_agent::{Config, Session, ValidationError};
use deep_agent_ollama_model::{OllamaConfigBuilder, OllamaProvider};
use owo_colors::OwoColorize;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

/// Deep Agent with Ollama CLI.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Query to ask the agent (if not provided, enters interactive mode)
    query: Option<String>,

    /// Ollama model to use, overrides OLLAMA_MODEL
    #[arg(long)]
    model: Option<String>,

    /// Ollama base URL, overrides OLLAMA_BASE_URL
    #[arg(long)]
    base_url: Option<String>,

    /// Disable streaming responses
    #[arg(long)]
    no_stream: bool,

    /// Show tool usage in streaming mode
    #[arg(long)]
    show_tools: bool,

    /// Show configuration and exit
    #[arg(long)]
    config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let dotenv = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();
    if let Err(err) = dotenv {
        debug!("no .env file loaded: {err}");
    }

    let args = Args::parse();
    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} {err}", "❌ Configuration error:".red());
            return ExitCode::FAILURE;
        }
    };
    if let Some(model) = &args.model {
        config = config.with_model(model);
    }
    if let Some(base_url) = &args.base_url {
        config = config.with_base_url(base_url);
    }

    println!("{}", "🤖 Deep Agent with Ollama CLI".bold());
    println!("{}", "=".repeat(50));

    if args.config {
        println!("{config}");
        return ExitCode::SUCCESS;
    }

    if args.validate {
        return match validate(&config).await {
            Ok(()) => {
                println!("{}", "✅ Configuration is valid".green());
                ExitCode::SUCCESS
            }
            Err(err) => {
                println!(
                    "{}",
                    format!("❌ Configuration validation failed: {err}").red()
                );
                ExitCode::FAILURE
            }
        };
    }

    println!("🔄 Initializing agent with model: {}", config.ollama_model);
    let session_config = config.session_config(args.show_tools);
    let session = match Session::initialize(&session_config).await {
        Ok(session) => session,
        Err(err) => {
            println!(
                "{}",
                format!("❌ Failed to initialize agent: {err}").red()
            );
            return ExitCode::FAILURE;
        }
    };
    println!("{}", "✅ Agent initialized successfully".green());

    let streaming = !args.no_stream;
    let result = match &args.query {
        Some(query) => run_query(&session, query, streaming).await,
        None => {
            println!();
            let stdin = BufReader::new(tokio::io::stdin());
            Repl::new(&session, &config)
                .with_streaming(streaming)
                .run(stdin, &mut io::stdout())
                .await
        }
    };
    if let Err(err) = result {
        error!("cannot write to the terminal: {err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run_query(
    session: &Session,
    query: &str,
    streaming: bool,
) -> io::Result<()> {
    let mut stdout = io::stdout();
    writeln!(stdout, "🔍 Query: {query}")?;
    writeln!(stdout, "{}", "-".repeat(30))?;
    write!(stdout, "{} ", "🤖 Response:".bright_cyan())?;
    let outcome = repl::answer(session, query, streaming, &mut stdout).await?;
    if outcome != TurnOutcome::Completed {
        info!("query ended without an answer: {outcome:?}");
    }
    Ok(())
}

/// Checks that the Ollama server answers, without requiring the model to
/// be available.
async fn validate(config: &Config) -> Result<(), ValidationError> {
    let ollama_config = OllamaConfigBuilder::with_model(&config.ollama_model)
        .with_base_url(&config.ollama_base_url)
        .build();
    let provider = OllamaProvider::new(ollama_config);
    match provider.list_models().await {
        Ok(models) => {
            debug!("server lists {} models", models.len());
            Ok(())
        }
        Err(err) => Err(ValidationError {
            base_url: config.ollama_base_url.clone(),
            reason: err.to_string(),
        }),
    }
}
