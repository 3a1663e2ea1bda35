// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! spacey-bundle - run bundle manifests on the Spacey bundle runtime
//!
//! ## Commands
//!
//! - `run`: register every module of a manifest, load the entry and wait for
//!   async initialization to settle
//! - `check`: report module ids that are referenced but never defined
//! - `config`: print the effective runtime configuration

mod manifest;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use manifest::Manifest;
use owo_colors::OwoColorize;
use spacey_bundle_runtime::{BundleRegistry, BundleRuntime, RuntimeConfig, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// spacey-bundle - load packaged module graphs on the bundle runtime
#[derive(Parser, Debug)]
#[command(name = "spacey-bundle")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Runtime configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a manifest and run its entry module
    Run(RunArgs),

    /// Check a manifest for dangling module references
    Check(CheckArgs),

    /// Print the effective runtime configuration
    Config,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the bundle manifest
    manifest: PathBuf,

    /// Module to load instead of the manifest's entry
    #[arg(long)]
    entry: Option<String>,
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// Path to the bundle manifest
    manifest: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(cli.verbose, &config);

    let outcome = match &cli.command {
        Commands::Run(args) => run(args, config).await,
        Commands::Check(args) => check(args).await,
        Commands::Config => print_config(&config),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool, config: &RuntimeConfig) {
    let filter = if verbose {
        EnvFilter::new("spacey_bundle_runtime=debug,spacey_bundle=debug")
    } else if let Some(directives) = &config.log_filter {
        EnvFilter::new(directives)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    let Some(path) = path else {
        return Ok(RuntimeConfig::default());
    };
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config '{}'", path.display()))?;
    RuntimeConfig::from_json_str(&json)
        .with_context(|| format!("invalid config '{}'", path.display()))
}

async fn read_manifest(path: &Path) -> anyhow::Result<Manifest> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read manifest '{}'", path.display()))?;
    Manifest::from_json_str(&json)
        .with_context(|| format!("invalid manifest '{}'", path.display()))
}

async fn run(args: &RunArgs, config: RuntimeConfig) -> anyhow::Result<ExitCode> {
    let manifest = read_manifest(&args.manifest).await?;
    let entry = args.entry.clone().unwrap_or_else(|| manifest.entry.clone());

    let registry = Arc::new(BundleRegistry::new());
    manifest.register_all(&registry, &tokio::runtime::Handle::current());
    tracing::debug!("Registered {} modules", manifest.modules.len());

    let runtime = BundleRuntime::new(registry.clone(), config);
    let exports = runtime
        .require(entry.as_str())
        .with_context(|| format!("failed to load '{}'", entry))?;

    let mut failed = false;
    if let Some(deferred) = exports.as_deferred() {
        if let Err(e) = deferred.clone().await {
            eprintln!("{}: '{}' failed: {}", "Error".red().bold(), entry.cyan(), e);
            failed = true;
        }
    }

    failed |= report(&registry);
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Print one status line per module; returns whether any module failed.
fn report(registry: &BundleRegistry) -> bool {
    let mut failed = false;
    for id in registry.ids() {
        let Some(module) = registry.module(&id) else {
            println!("  {} {}", "-".dimmed(), id.dimmed());
            continue;
        };
        let module = module.read();
        if let Some(err) = &module.error {
            failed = true;
            println!("  {} {} {}", "✗".red(), id, err.to_string().red());
            continue;
        }

        let exports = module.exports();
        let settled = match exports.as_deferred() {
            Some(deferred) => match deferred.peek() {
                Some(Ok(value)) => Some(value),
                Some(Err(err)) => {
                    failed = true;
                    println!("  {} {} {}", "✗".red(), id, err.to_string().red());
                    continue;
                }
                None => None,
            },
            None => Some(exports),
        };
        match settled {
            Some(value) => println!("  {} {} {}", "✓".green(), id, export_names(&value).dimmed()),
            None => println!("  {} {} {}", "…".yellow(), id, "pending".yellow()),
        }
    }
    failed
}

fn export_names(value: &Value) -> String {
    let names = value.keys();
    if names.is_empty() {
        String::new()
    } else {
        format!("[{}]", names.join(", "))
    }
}

async fn check(args: &CheckArgs) -> anyhow::Result<ExitCode> {
    let manifest = read_manifest(&args.manifest).await?;
    let dangling = manifest.dangling_references();
    if dangling.is_empty() {
        println!(
            "{} {} modules, no dangling references",
            "✓".green(),
            manifest.modules.len()
        );
        return Ok(ExitCode::SUCCESS);
    }

    for id in &dangling {
        println!("  {} {} is referenced but never defined", "✗".red(), id.cyan());
    }
    Ok(ExitCode::FAILURE)
}

fn print_config(config: &RuntimeConfig) -> anyhow::Result<ExitCode> {
    println!("{}", config.to_json_string()?);
    Ok(ExitCode::SUCCESS)
}
