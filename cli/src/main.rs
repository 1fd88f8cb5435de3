// Atelier CLI - Command Line Interface Entry Point

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use atelier_cancel::CancelToken;
use atelier_config::{Config, ConfigLoader, parse_override};
use atelier_core::model::ProviderRegistry;
use atelier_core::model::providers::{ScriptedProvider, register_configured_provider};
use atelier_core::{Session, ToolInvocation};
use atelier_protocol::{SessionOutcome, UiEvent};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Atelier - streaming tool-call orchestration for design authoring
#[derive(Parser, Debug)]
#[command(name = "atelier")]
#[command(version, about, long_about = None)]
struct Cli {
    #[clap(flatten)]
    config_overrides: CliConfigOverrides,

    /// Sandbox root; defaults to `sandbox.root`, then the current directory
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Print the final conversation as JSON after the query
    #[arg(long, global = true)]
    transcript: bool,

    #[clap(subcommand)]
    command: Commands,
}

/// CLI configuration overrides
#[derive(Debug, clap::Args)]
struct CliConfigOverrides {
    /// Configuration override in key=value format
    #[arg(short = 'c', long = "config", value_name = "KEY=VALUE", global = true)]
    overrides: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send one prompt to the configured model endpoint
    Chat {
        /// User prompt
        prompt: String,
    },

    /// Run one prompt against a scripted model stream
    Replay {
        /// JSON-lines stream script; blank lines or `---` separate steps
        #[arg(long)]
        script: PathBuf,

        /// User prompt
        prompt: String,
    },

    /// Invoke a single tool and print its result
    Tool {
        /// Tool name
        name: String,

        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr; stdout carries UI events and results.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config_overrides)?;
    let root = sandbox_root(cli.root.as_deref(), &config)?;
    info!(root = %root.display(), "sandbox root ready");

    match cli.command {
        Commands::Chat { prompt } => {
            let providers = Arc::new(ProviderRegistry::new());
            register_configured_provider(&providers, &config).await?;
            let session = Session::from_config(root, &config, providers)?;
            run_query(&session, prompt, cli.transcript).await
        }
        Commands::Replay { script, prompt } => {
            let text = std::fs::read_to_string(&script)
                .with_context(|| format!("failed to read script {}", script.display()))?;
            let provider = ScriptedProvider::from_script(&text)?;
            let providers = Arc::new(ProviderRegistry::new());
            providers.register(Arc::new(provider)).await;
            let session = Session::from_config(root, &config, providers)?;
            run_query(&session, prompt, cli.transcript).await
        }
        Commands::Tool { name, args } => run_tool(root, &config, name, &args).await,
    }
}

fn load_config(overrides: &CliConfigOverrides) -> Result<Config> {
    let overrides = overrides
        .overrides
        .iter()
        .map(|raw| parse_override(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let config = ConfigLoader::new()
        .with_project_dir(cwd)
        .load_with_cli_overrides(overrides)?;
    Ok(host_config(config))
}

/// Stdout carries the JSON-lines event stream, so shell output that is not
/// captured must not land there.
fn host_config(mut config: Config) -> Config {
    config.shell.uncaptured_stdout_to_stderr = true;
    config
}

fn sandbox_root(flag: Option<&Path>, config: &Config) -> Result<PathBuf> {
    let root = match flag.or(config.sandbox.root.as_deref()) {
        Some(root) => root.to_path_buf(),
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    atelier_absolute_path::prepare_root(root)
}

/// Fires `cancel` on Ctrl-C.
fn cancel_on_interrupt(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling");
            cancel.cancel();
        }
    });
}

async fn run_query(session: &Session, prompt: String, transcript: bool) -> Result<ExitCode> {
    let cancel = CancelToken::new();
    cancel_on_interrupt(cancel.clone());

    let (tx, mut rx) = mpsc::channel::<UiEvent>(256);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => debug!(error = %err, "failed to encode ui event"),
            }
        }
    });

    let outcome = session.submit(prompt, cancel, tx).await?;
    printer.await.context("ui printer task failed")?;

    if transcript {
        let conversation = session.conversation();
        println!("{}", serde_json::to_string_pretty(&conversation)?);
    }

    Ok(exit_code(&outcome))
}

async fn run_tool(root: PathBuf, config: &Config, name: String, args: &str) -> Result<ExitCode> {
    let arguments: serde_json::Value =
        serde_json::from_str(args).context("tool arguments must be JSON")?;
    let session = Session::from_config(root, config, Arc::new(ProviderRegistry::new()))?;

    let cancel = CancelToken::new();
    cancel_on_interrupt(cancel.clone());
    let ctx = session.sandbox(cancel);

    let result = session
        .router()
        .dispatch(ToolInvocation::new("cli", name, arguments), &ctx)
        .await;
    println!("{}", serde_json::to_string_pretty(&result.to_value())?);

    Ok(if result.is_error() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn exit_code(outcome: &SessionOutcome) -> ExitCode {
    match outcome {
        SessionOutcome::Finished => ExitCode::SUCCESS,
        SessionOutcome::Errored { .. } => ExitCode::from(1),
        SessionOutcome::Aborted => ExitCode::from(130),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_replay_with_global_flags() {
        let cli = Cli::try_parse_from([
            "atelier",
            "replay",
            "--script",
            "steps.jsonl",
            "--root",
            "/tmp/site",
            "-c",
            "shell.default_timeout_ms=5000",
            "--transcript",
            "list files",
        ])
        .expect("parse");

        assert!(cli.transcript);
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/site")));
        assert_eq!(
            cli.config_overrides.overrides,
            vec!["shell.default_timeout_ms=5000".to_string()]
        );
        assert!(matches!(
            cli.command,
            Commands::Replay { ref prompt, .. } if prompt == "list files"
        ));
    }

    #[test]
    fn uncaptured_shell_output_stays_off_the_event_stream() {
        let config = host_config(Config::default());
        assert!(config.shell.uncaptured_stdout_to_stderr);
    }

    #[test]
    fn tool_arguments_default_to_an_empty_object() {
        let cli = Cli::try_parse_from(["atelier", "tool", "ls"]).expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Tool { ref name, ref args } if name == "ls" && args == "{}"
        ));
    }
}
