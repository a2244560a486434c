//! Command-line runner for dashscript console scripts.
//!
//! Runs a script file or a built-in template against a dataset snapshot
//! loaded from JSON, and prints the console output.
//!
//! # Examples
//!
//! ```bash
//! # Run a script against a dataset exported from the dashboard
//! dashscript run report.js --dataset snapshot.json
//!
//! # Run a built-in template, writing exports to ./exports
//! dashscript run --template "Export Data" --dataset snapshot.json --export-dir ./exports
//!
//! # Allow networkCall to reach one API host
//! dashscript run enrich.js --dataset snapshot.json --allow-host api.example.com
//!
//! # List the templates
//! dashscript templates --show-code
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dashscript::session::builtin_templates;
use dashscript::{
    DatasetSnapshot, DirectoryExport, ExecuteResult, NetworkConfig, ResourceLimits, Sandbox,
};
use serde_json::json;

/// Run dashboard console scripts from the command line.
#[derive(Parser, Debug)]
#[command(name = "dashscript")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a script against a dataset snapshot
    Run(RunArgs),

    /// List the built-in templates
    Templates {
        /// Print each template's source too
        #[arg(long)]
        show_code: bool,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Script file to run
    #[arg(required_unless_present = "template", conflicts_with = "template")]
    script: Option<PathBuf>,

    /// Built-in template to run, by name or session id
    #[arg(long)]
    template: Option<String>,

    /// JSON file holding the dataset snapshot (default: empty dataset)
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Wall-clock limit for the run, in seconds
    #[arg(long, env = "DASHSCRIPT_TIMEOUT_SECS", default_value_t = 30)]
    timeout: u64,

    /// Host networkCall may reach. Wildcards allowed, can be repeated.
    ///
    /// Without any, networkCall is disabled.
    #[arg(
        long = "allow-host",
        value_name = "HOST",
        env = "DASHSCRIPT_ALLOW_HOSTS",
        value_delimiter = ','
    )]
    allow_hosts: Vec<String>,

    /// Directory exportData writes into (default: record the export only)
    #[arg(long, env = "DASHSCRIPT_EXPORT_DIR")]
    export_dir: Option<PathBuf>,

    /// Print the result and registered items as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "dashscript=debug"
    } else {
        "dashscript=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Templates { show_code } => {
            list_templates(show_code);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(run_args) => run(run_args).await,
    }
}

fn list_templates(show_code: bool) {
    for template in builtin_templates() {
        println!("{:<22} {}", template.name, template.session_id());
        if show_code {
            println!();
            for line in template.code.lines() {
                println!("    {line}");
            }
            println!();
        }
    }
}

fn load_code(args: &RunArgs) -> Result<String> {
    if let Some(name) = &args.template {
        let template = builtin_templates()
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name) || t.session_id().as_str() == name)
            .with_context(|| format!("Unknown template: {name} (see `dashscript templates`)"))?;
        return Ok(template.code.to_string());
    }

    let path = args
        .script
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("a script file or --template is required"))?;
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script: {}", path.display()))
}

fn load_dataset(path: Option<&PathBuf>) -> Result<DatasetSnapshot> {
    let Some(path) = path else {
        return Ok(DatasetSnapshot::new());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid dataset snapshot: {}", path.display()))
}

fn build_sandbox(args: &RunArgs) -> Result<Sandbox> {
    let mut builder = Sandbox::builder().with_resource_limits(ResourceLimits {
        execution_timeout: Some(Duration::from_secs(args.timeout)),
        ..ResourceLimits::default()
    });

    if !args.allow_hosts.is_empty() {
        tracing::info!(hosts = ?args.allow_hosts, "network access enabled");
        builder = builder.with_network(
            NetworkConfig::builder()
                .allowed_hosts(args.allow_hosts.iter().cloned())
                .build(),
        );
    }
    if let Some(dir) = &args.export_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create export directory: {}", dir.display()))?;
        builder = builder.with_export_sink(DirectoryExport::new(dir));
    }

    builder.build().context("Failed to build sandbox")
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let code = load_code(&args)?;
    let snapshot = load_dataset(args.dataset.as_ref())?;
    let sandbox = build_sandbox(&args)?;

    let result = sandbox
        .execute(&code, &snapshot)
        .await
        .context("Script engine failed")?;

    tracing::info!(
        duration = ?result.stats.duration,
        callbacks = result.stats.callback_invocations,
        widgets = sandbox.widgets().len(),
        insights = sandbox.insights().len(),
        metrics = sandbox.metrics().len(),
        "run finished"
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary(&sandbox, &result))?);
    } else {
        println!("{}", result.render());
    }

    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn summary(sandbox: &Sandbox, result: &ExecuteResult) -> serde_json::Value {
    let error = result.error.as_ref().map(|error| {
        json!({
            "kind": format!("{:?}", error.kind).to_lowercase(),
            "message": error.message,
            "trace": error.trace,
        })
    });
    json!({
        "output": result.log_lines,
        "error": error,
        "durationMs": u64::try_from(result.stats.duration.as_millis()).unwrap_or(u64::MAX),
        "widgets": sandbox.widgets().list(),
        "insights": sandbox.insights().list(),
        "metrics": sandbox.metrics().list(),
    })
}
