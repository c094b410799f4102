use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{self, CommandReport};
use crate::logging;

#[derive(Debug, Parser)]
#[command(name = "story-index", version, about = "Keeps a story index in sync with a project tree")]
pub struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one reconciliation pass and exit.
    Sync,
    /// Reconcile on startup, then again whenever a story's reflog changes.
    Watch {
        /// Run the initial pass through the worker and exit.
        #[arg(long)]
        once: bool,
    },
    /// Show resolved settings and the stored row count.
    Status,
    /// Print the stored rows in order.
    List,
}

fn render(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("{}: {}", report.command, if report.ok { "ok" } else { "failed" });
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init();

    let report = match cli.command {
        Command::Sync => commands::sync::run()?,
        Command::Watch { once } => commands::watch::run(once)?,
        Command::Status => commands::status::run()?,
        Command::List => commands::list::run()?,
    };

    render(&report, cli.json)?;
    if !report.ok {
        anyhow::bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}
