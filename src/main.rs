//! fasprun - run transfer specs through the local transfer executable

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use fasprun::agent::{AgentDeps, ListenerSet, LogListener, StartOptions};
use fasprun::config::AgentConfig;
use fasprun::progress::ProgressBarListener;
use fasprun::spec::{compile, ParamSchema, Render, TransferSpec, Variant};
use fasprun::transfer::{first_failure, Installation};

#[derive(Parser)]
#[command(name = "fasprun")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: <config dir>/fasprun/config.toml)
    #[arg(short, long, global = true, env = "FASPRUN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a transfer spec
    Run {
        /// JSON transfer spec
        #[arg(short, long)]
        spec: PathBuf,

        /// Transfer executable, overriding the configured one
        #[arg(long, env = "FASPRUN_ASCP")]
        ascp: Option<PathBuf>,

        /// Job id (default: random UUID)
        #[arg(long)]
        job_id: Option<String>,

        /// No progress bars
        #[arg(short, long)]
        quiet: bool,
    },

    /// Print the invocation a spec compiles to (secrets redacted)
    Compile {
        /// JSON transfer spec
        #[arg(short, long)]
        spec: PathBuf,
    },

    /// List the parameters a transfer spec accepts
    Params,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "fasprun=debug"
    } else {
        "fasprun=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AgentConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run {
            spec,
            ascp,
            job_id,
            quiet,
        } => run(&config, &spec, ascp, job_id, quiet).await,
        Commands::Compile { spec } => compile_only(&config, &spec),
        Commands::Params => {
            print_params();
            Ok(())
        }
    }
}

fn read_spec(path: &Path) -> Result<TransferSpec> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read spec {}", path.display()))?;
    TransferSpec::from_json_str(&text).with_context(|| format!("Invalid spec {}", path.display()))
}

async fn run(
    config: &AgentConfig,
    spec_path: &Path,
    ascp: Option<PathBuf>,
    job_id: Option<String>,
    quiet: bool,
) -> Result<()> {
    let spec = read_spec(spec_path)?;

    let mut listeners = ListenerSet::new();
    listeners.add(Arc::new(LogListener));
    if !quiet {
        listeners.add(Arc::new(ProgressBarListener::new()));
    }

    let mut installation = Installation::from_config(&config.installation);
    if let Some(path) = ascp {
        installation = installation
            .with_executable(Variant::Ascp, &path)
            .with_executable(Variant::Ascp4, path);
    }

    let agent = fasprun::create_agent(
        config,
        AgentDeps {
            listeners,
            installation: Some(installation),
            ..Default::default()
        },
    )?;

    let options = StartOptions {
        job_id: job_id.map(Into::into),
    };
    let job = agent
        .start_transfer(&spec, options)
        .await
        .context("Failed to start transfer")?;
    let outcomes = agent.wait_for_completion().await;

    for outcome in &outcomes {
        let label = format!("{} #{}", outcome.job_id, outcome.session_index + 1);
        match &outcome.result {
            Ok(()) => println!("{} {}", "✓".green(), label),
            Err(e) => println!("{} {}: {}", "✗".red(), label, e),
        }
    }

    if let Some(err) = first_failure(&outcomes) {
        bail!("Transfer {job} failed: {err}");
    }
    println!(
        "{} {} session(s) completed",
        "Done:".green().bold(),
        outcomes.len()
    );
    Ok(())
}

fn compile_only(config: &AgentConfig, spec_path: &Path) -> Result<()> {
    let spec = read_spec(spec_path)?;
    // No scratch files for a dry compile
    let mut options = Installation::from_config(&config.installation).compile_options();
    options.file_list_dir = None;

    let compilation = compile(&spec, ParamSchema::builtin(), &options)?;
    let report = serde_json::json!({
        "executable": compilation.invocation.variant.executable_name(),
        "invocation": compilation.invocation,
        "multi_session": compilation.multi_session.map(|m| serde_json::json!({
            "count": m.count,
            "udp_base": m.udp_base,
        })),
        "consumed": compilation.consumed,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_params() {
    let header = format!(
        "{:<28} {:<16} {:<9} {}",
        "PARAMETER", "TYPE", "REQUIRED", "RENDERED AS"
    );
    println!("{}", header.as_str().bold());
    for def in ParamSchema::builtin().iter() {
        let rendered = match &def.render {
            Render::Env { var } => format!("env {var}"),
            Render::Flag { switch, negate: false } => switch.clone(),
            Render::Flag { switch, negate: true } => format!("{switch} (when false)"),
            Render::Switch { switch } => format!("{switch} <value>"),
            Render::Variant => "ascp4 executable".to_string(),
            Render::Ignored => "-".to_string(),
        };
        let required = if def.mandatory {
            format!("{:<9}", "yes").as_str().yellow()
        } else {
            format!("{:<9}", "no").as_str().normal()
        };
        println!(
            "{:<28} {:<16} {} {}",
            def.key,
            def.accepted_names(),
            required,
            rendered
        );
    }
}
