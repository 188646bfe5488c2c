//! Selsync - selective-sync convergence demo
//!
//! Usage:
//!   selsync demo               # Apply, watch, check the control, roll back
//!   selsync cleanup            # Roll back the last recorded change
//!   selsync status             # One status sample per configured resource

mod interactive;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use selsync_core::cleanup::CleanupReport;
use selsync_core::context::AppContext;
use selsync_core::orchestrator::{
    CleanupMode, DemoOptions, DemoReport, DemoRequest, ExitCode, Prompter, render,
};
use selsync_core::types::BumpKind;

use crate::interactive::TerminalPrompter;

#[derive(Parser)]
#[command(name = "selsync")]
#[command(about = "Selective-sync convergence demo for pull-based deployments", long_about = None)]
struct Cli {
    /// Configuration file (default: ./selsync.toml, then the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only log warnings
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Change one resource, watch it converge, verify a sibling is untouched
    Demo(DemoArgs),

    /// Roll back the most recent recorded change of a resource
    Cleanup {
        /// Resource to roll back (default: demo.target)
        #[arg(long)]
        resource: Option<String>,

        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,

        /// Print the rollback steps without performing them
        #[arg(long)]
        dry_run: bool,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show the current status of every configured resource
    Status {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct DemoArgs {
    /// Resource to change (default: demo.target)
    #[arg(long)]
    resource: Option<String>,

    /// Sibling resource that must stay unchanged (default: demo.control)
    #[arg(long)]
    control: Option<String>,

    /// Target replica count
    #[arg(long, default_value_t = 2)]
    replicas: u32,

    /// Version component to bump (patch, minor, major)
    #[arg(long, default_value = "patch")]
    bump: BumpKind,

    /// Print intended actions instead of performing them
    #[arg(long)]
    dry_run: bool,

    /// Roll back without asking
    #[arg(long, short)]
    yes: bool,

    /// Leave the change in place
    #[arg(long, conflicts_with = "yes")]
    no_cleanup: bool,

    /// Output format
    #[arg(short, long, default_value = "table")]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.quiet { "selsync=warn" } else { "selsync=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping the current phase");
            interrupt.cancel();
        }
    });

    let ctx = AppContext::load(cli.config)?.with_cancellation(cancel);
    let code = match cli.command {
        Commands::Demo(args) => run_demo(&ctx, args).await?,
        Commands::Cleanup {
            resource,
            yes,
            dry_run,
            format,
        } => run_cleanup(&ctx, resource, yes, dry_run, format).await?,
        Commands::Status { format } => run_status(&ctx, format).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run_demo(ctx: &AppContext, args: DemoArgs) -> Result<i32> {
    let demo = &ctx.config().demo;
    let request = DemoRequest::new(
        args.resource.unwrap_or_else(|| demo.target.clone()),
        args.replicas,
    )
    .with_control(args.control.or_else(|| demo.control.clone()))
    .with_bump(args.bump);

    let interactive = console::Term::stdout().is_term();
    let cleanup = if args.no_cleanup {
        CleanupMode::Skip
    } else if args.yes {
        CleanupMode::Auto
    } else {
        CleanupMode::Prompt
    };
    let options = DemoOptions::new()
        .with_dry_run(args.dry_run)
        .with_cleanup(cleanup);

    let mut orchestrator = ctx.orchestrator()?;
    if interactive {
        let prompter: Arc<dyn Prompter> = Arc::new(TerminalPrompter::new(args.yes));
        orchestrator = orchestrator.with_prompter(prompter);
    }

    let report = orchestrator.run(&request, &options).await;
    print_demo_report(&report, args.format)?;
    Ok(report.exit_code().code())
}

fn print_demo_report(report: &DemoReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            print!("{}", render::render_text(report));
            match report.exit_code() {
                ExitCode::Success if report.dry_run.is_some() => {}
                ExitCode::Success => println!("{}", style("✓ Demo finished").green()),
                ExitCode::NotConverged => println!("{}", style("✗ Change did not converge").red()),
                ExitCode::ChangeFailed => println!("{}", style("✗ Change failed").red()),
                ExitCode::CleanupFailed => println!("{}", style("✗ Rollback failed").red()),
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
    }
    Ok(())
}

async fn run_cleanup(
    ctx: &AppContext,
    resource: Option<String>,
    yes: bool,
    dry_run: bool,
    format: OutputFormat,
) -> Result<i32> {
    let resource = resource.unwrap_or_else(|| ctx.config().demo.target.clone());
    let cleanup = ctx.cleanup(ctx.record_store()?)?;

    let Some(record) = cleanup.discover(&resource)? else {
        println!("• No un-reverted change recorded for '{}'", resource);
        return Ok(0);
    };

    if dry_run {
        let plan = cleanup.plan(&record);
        match format {
            OutputFormat::Table => print!("{}", plan),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        }
        return Ok(0);
    }

    if !yes {
        let prompter = TerminalPrompter::new(false);
        prompter.describe(&record)?;
        if !prompter.confirm("Proceed with rollback?")? {
            println!("Rollback cancelled.");
            return Ok(0);
        }
    }

    let report = cleanup.rollback(&record).await;
    print_cleanup_report(&report, format)?;
    Ok(if report.succeeded() {
        0
    } else {
        ExitCode::CleanupFailed.code()
    })
}

fn print_cleanup_report(report: &CleanupReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if report.succeeded() {
                println!(
                    "{} Rolled back {} ({})",
                    style("✓").green(),
                    report.resource_id,
                    report.artifact
                );
            } else {
                println!(
                    "{} Rollback of {} failed",
                    style("✗").red(),
                    report.resource_id
                );
            }
            print!("{}", render::cleanup_table(report));
            for line in render::cleanup_failure_lines(report) {
                println!("  {}", line);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
    }
    Ok(())
}

async fn run_status(ctx: &AppContext, format: OutputFormat) -> Result<i32> {
    let probe = ctx.status_probe();
    let mut rows = Vec::new();
    for resource in &ctx.config().resources {
        rows.push((resource.id.clone(), probe.fetch(&resource.id).await));
    }

    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("No resources configured.");
                println!("Add [[resources]] entries to selsync.toml to get started.");
                return Ok(0);
            }
            println!(
                "{:<16} {:<10} {:<12} {:<12} Replicas",
                "Resource", "Sync", "Health", "Revision"
            );
            println!("{}", "-".repeat(64));
            for (id, status) in &rows {
                println!(
                    "{:<16} {:<10} {:<12} {:<12} {}",
                    id,
                    status.sync_state.to_string(),
                    status.health_state.to_string(),
                    status.observed_revision.as_deref().unwrap_or("-"),
                    status
                        .observed_replica_count
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
        OutputFormat::Json => {
            let output: Vec<_> = rows
                .iter()
                .map(|(id, status)| serde_json::json!({ "resource": id, "status": status }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(0)
}
