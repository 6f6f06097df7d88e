//! Gateway CLI - Command-line front end for the generation gateway
//!
//! Loads the gateway configuration, builds a router over every backend with
//! credentials present, and runs one command against it.
//!
//! # Usage
//!
//! ```bash
//! # Generate in the configured default mode
//! gateway generate "Write a function that parses ISO dates"
//!
//! # Prompt from stdin, fast mode, code only
//! cat prompt.txt | gateway generate --mode fast --constraint code_only
//!
//! # Pin a backend for one step
//! gateway generate --backend claude --step-type review "Review this diff"
//!
//! # Draft on the fast backend, verify on the balanced one
//! gateway generate --speculative "Explain the borrow checker"
//!
//! # Inspect configured backends and the effective configuration
//! gateway backends
//! gateway config
//!
//! # Verbose logging
//! RUST_LOG=gateway_core=debug gateway generate "..."
//! ```

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gateway_core::{
    Backend, ExecutionMode, GatewayConfig, GenerationRequest, GenerationRouter, OutputConstraint,
    RouterBuilder, SpeculativeDecoder, Step, StepType,
};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Gateway - route generation requests across rate-limited backends
#[derive(Parser, Debug)]
#[command(name = "gateway")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, global = true, env = "GATEWAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debug logging for the gateway crates
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate text for a prompt
    Generate(GenerateArgs),
    /// List configured backends with their cascades and availability
    Backends {
        /// Mode whose model cascade is shown
        #[arg(short, long)]
        mode: Option<ExecutionMode>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[derive(clap::Args, Debug)]
struct GenerateArgs {
    /// Prompt text (read from stdin when omitted)
    prompt: Option<String>,

    /// Execution mode (fast, build, double_check)
    #[arg(short, long)]
    mode: Option<ExecutionMode>,

    /// Step type used for routing and audit decisions
    #[arg(long, default_value = "code_generation")]
    step_type: StepType,

    /// Step complexity in [0, 1]
    #[arg(long, default_value_t = 0.5)]
    complexity: f32,

    /// Estimated output tokens for the step
    #[arg(long, default_value_t = 1_000)]
    estimated_tokens: u32,

    /// Pin the step to a named backend
    #[arg(short, long)]
    backend: Option<String>,

    /// Maximum output tokens
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Sampling temperature
    #[arg(short, long)]
    temperature: Option<f32>,

    /// Output constraint (none, code_only, json_only, no_prose)
    #[arg(long, default_value = "none")]
    constraint: OutputConstraint,

    /// Extra context placed before the prompt
    #[arg(long)]
    context: Option<String>,

    /// Cache namespace
    #[arg(long)]
    namespace: Option<String>,

    /// Draft on the speculative draft backend and verify on the verify backend
    #[arg(long)]
    speculative: bool,
}

/// Initialize logging; `RUST_LOG` wins over the default filter
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("gateway={level},gateway_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load, apply environment overrides and validate
fn load_config(path: Option<&PathBuf>) -> Result<GatewayConfig> {
    let mut config = GatewayConfig::load_or_default(path.map(PathBuf::as_path))
        .context("Failed to load configuration")?;
    config.apply_env().context("Invalid environment override")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn build_router(config: &GatewayConfig) -> Result<GenerationRouter> {
    RouterBuilder::from_config(config)
        .context("Failed to create backends")?
        .build()
        .context("Failed to build router (is any API key set, or GATEWAY_ENABLE_LOCAL=1?)")
}

async fn read_prompt(prompt: Option<String>) -> Result<String> {
    if let Some(prompt) = prompt {
        return Ok(prompt);
    }
    if std::io::stdin().is_terminal() {
        anyhow::bail!("No prompt given: pass it as an argument or pipe it on stdin");
    }
    let mut buffer = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buffer)
        .await
        .context("Failed to read prompt from stdin")?;
    let prompt = buffer.trim().to_string();
    if prompt.is_empty() {
        anyhow::bail!("Prompt on stdin is empty");
    }
    Ok(prompt)
}

fn build_request(args: &GenerateArgs, prompt: String) -> GenerationRequest {
    let mut request = GenerationRequest::new(prompt).with_constraint(args.constraint);
    if let Some(context) = &args.context {
        request = request.with_context(context.clone());
    }
    if let Some(max_tokens) = args.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }
    if let Some(temperature) = args.temperature {
        request = request.with_temperature(temperature);
    }
    if let Some(namespace) = &args.namespace {
        request = request.with_cache_namespace(namespace.clone());
    }
    request
}

fn build_step(args: &GenerateArgs, prompt: &str) -> Step {
    let mut step = Step::new("cli", args.step_type)
        .with_description(prompt.chars().take(120).collect::<String>())
        .with_complexity(args.complexity)
        .with_estimated_tokens(args.estimated_tokens);
    if let Some(backend) = &args.backend {
        step = step.with_backend_override(backend.clone());
    }
    step
}

async fn generate(
    config: &GatewayConfig,
    router: &GenerationRouter,
    args: GenerateArgs,
) -> Result<bool> {
    let prompt = read_prompt(args.prompt.clone()).await?;
    let request = build_request(&args, prompt);

    if args.speculative {
        let decoder = SpeculativeDecoder::from_router(router, &config.speculative)
            .context("Speculative decoding needs both draft and verify backends configured")?;
        let outcome = decoder.decode_parallel(&request).await;
        info!(
            accept_rate = outcome.accept_rate,
            speedup = outcome.speedup,
            "speculative decode finished"
        );
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(outcome.result.success);
    }

    let step = build_step(&args, request.prompt());
    let mode = args.mode.unwrap_or_else(|| router.mode());
    debug!(decision = ?router.decide(mode, &step), "routing decision");

    let result = router.execute_in(mode, &request, &step).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.success)
}

fn describe_backends(router: &GenerationRouter, mode: ExecutionMode) -> serde_json::Value {
    let backends: Vec<serde_json::Value> = router
        .backend_names()
        .into_iter()
        .filter_map(|name| router.backend(name))
        .map(|backend| {
            let name = backend.name();
            serde_json::json!({
                "name": name,
                "kind": backend.kind(),
                "specialties": backend.specialties(),
                "cascade": backend.cascade(mode).models(),
                "pricing": backend.pricing(),
                "available": router.cooldowns().is_available(name),
                "usage": backend.usage().snapshot(),
            })
        })
        .collect();

    serde_json::json!({
        "mode": mode,
        "backends": backends,
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Config => {
            print!("{}", config.to_toml().context("Failed to render configuration")?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Backends { mode } => {
            let router = build_router(&config)?;
            let mode = mode.unwrap_or_else(|| router.mode());
            println!("{}", serde_json::to_string_pretty(&describe_backends(&router, mode))?);
            router.close().await;
            Ok(ExitCode::SUCCESS)
        }
        Command::Generate(generate_args) => {
            let router = build_router(&config)?;
            let outcome = generate(&config, &router, generate_args).await;
            router.close().await;
            if outcome? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}
