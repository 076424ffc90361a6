//! Issue-to-pull-request autopilot.
//!
//! Turns a tracked issue or a pasted ticket into a verified pull request by
//! driving a model through the action protocol on a fresh branch.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use autopilot::core::sanitize::Sanitizer;
use autopilot::core::ticket::{parse_manual_ticket, ticket_number};
use autopilot::core::types::WorkItem;
use autopilot::exit_codes;
use autopilot::governor::ResourceGovernor;
use autopilot::io::config::{AutopilotConfig, load_config, write_atomic};
use autopilot::io::model::CommandModel;
use autopilot::io::outcome_log::{label_suggestions, load_outcomes, project_insights};
use autopilot::io::tools::ProcessToolRunner;
use autopilot::io::tracker::{GhTracker, Tracker};
use autopilot::logging;
use autopilot::orchestrator::{Collaborators, RunSetup, RunStatus, run_work_item};

const STATE_GITIGNORE: &str = "usage.json\nimplementations.jsonl\n*.tmp\n.gitignore\n";

#[derive(Parser)]
#[command(
    name = "autopilot",
    version,
    about = "Turn issues and tickets into verified pull requests"
)]
struct Cli {
    /// Repository to work in.
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Config file, relative to the repository root.
    #[arg(long, default_value = ".autopilot/config.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Implement a manual ticket read from a file, or stdin when omitted.
    Ticket {
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Implement a tracked issue.
    Issue { number: u64 },
    /// Print token and cost usage for recent days.
    Usage {
        #[arg(long, default_value_t = 7)]
        days: usize,
    },
    /// Print outcome statistics for this project.
    Insights,
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err((err, sanitizer)) => {
            eprintln!("{}", sanitizer.sanitize(&format!("{err:#}")));
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> std::result::Result<i32, (anyhow::Error, Sanitizer)> {
    let cfg = match load_config(&cli.root.join(&cli.config)) {
        Ok(cfg) => cfg,
        Err(err) => return Err((err, Sanitizer::default())),
    };
    let sanitizer = Sanitizer::new(cfg.secret_env.iter().filter_map(|name| std::env::var(name).ok()));
    logging::init(sanitizer.clone());
    dispatch(&cli, &cfg, &sanitizer).map_err(|err| (err, sanitizer))
}

fn dispatch(cli: &Cli, cfg: &AutopilotConfig, sanitizer: &Sanitizer) -> Result<i32> {
    let root = cli.root.as_path();
    let state_dir = root.join(&cfg.state_dir);
    match &cli.command {
        Command::Ticket { file } => {
            let text = read_ticket(file.as_deref())?;
            let number = ticket_number(chrono::Utc::now().timestamp_millis());
            let item = parse_manual_ticket(&text, number)?;
            implement(root, cfg, sanitizer, &item)
        }
        Command::Issue { number } => {
            let item = tracker(root).fetch_issue(*number)?;
            implement(root, cfg, sanitizer, &item)
        }
        Command::Usage { days } => {
            let governor = governor(cfg, &state_dir);
            let limits = &cfg.budget;
            println!("date        tokens      cost      calls");
            for (date, usage) in governor.daily_report(*days) {
                println!(
                    "{date}  {:>10}  ${:>7.2}  {:>5}",
                    usage.tokens, usage.cost, usage.calls
                );
            }
            let today = governor.daily_usage();
            println!(
                "today: {} / {} tokens, ${:.2} / ${:.2}",
                today.tokens, limits.daily_token_limit, today.cost, limits.daily_cost_limit
            );
            Ok(exit_codes::OK)
        }
        Command::Insights => {
            let records = load_outcomes(&state_dir.join("implementations.jsonl"))?;
            let Some(insights) = project_insights(&records, &cfg.project) else {
                println!("no outcomes recorded for {}", cfg.project);
                return Ok(exit_codes::OK);
            };
            println!("project: {}", cfg.project);
            println!("runs: {}", insights.total);
            println!("success rate: {:.0}%", insights.success_rate * 100.0);
            println!("avg attempts: {:.1}", insights.avg_attempts);
            println!("avg cost: ${:.2}", insights.avg_cost);
            println!("avg duration: {:.0}s", insights.avg_duration_secs);
            for (failure, count) in &insights.common_failures {
                println!("failure x{count}: {}", sanitizer.sanitize(failure));
            }
            for (strategy, count) in &insights.best_strategies {
                println!("strategy x{count}: {strategy}");
            }
            Ok(exit_codes::OK)
        }
    }
}

fn implement(root: &Path, cfg: &AutopilotConfig, sanitizer: &Sanitizer, item: &WorkItem) -> Result<i32> {
    let state_dir = root.join(&cfg.state_dir);
    ensure_state_dir(&state_dir)?;
    let (context, standards) = cfg.load_documents(root)?;
    let outcome_log = state_dir.join("implementations.jsonl");
    if let Ok(records) = load_outcomes(&outcome_log) {
        for hint in label_suggestions(&records, &item.labels) {
            info!(hint = %hint, "from past outcomes");
        }
    }

    let model = CommandModel {
        name: cfg.model.name.clone(),
        command: cfg.model.command.clone(),
        workdir: root.to_path_buf(),
        timeout: Duration::from_secs(cfg.model.timeout_secs),
        output_limit_bytes: cfg.agent.output_limit_bytes,
    };
    let tools = ProcessToolRunner::default();
    let tracker = tracker(root);
    let mut governor = governor(cfg, &state_dir);
    let setup = RunSetup {
        config: cfg,
        root,
        sanitizer,
        context: &context,
        standards: &standards,
        outcome_log,
    };
    let deps = Collaborators {
        model: &model,
        tools: &tools,
        tracker: &tracker,
    };
    let report = run_work_item(&setup, &deps, &mut governor, item)?;

    match &report.status {
        RunStatus::Published { url, verified } => {
            let note = if *verified { "" } else { " (quality warning)" };
            println!("pull request opened{note}: {url}");
        }
        RunStatus::ClarificationRequested {
            clarity,
            comment,
            posted,
        } => {
            println!("clarification needed (clarity {clarity}/100)");
            if !posted {
                println!("\n{comment}");
            }
        }
        RunStatus::Failed { reason } | RunStatus::QuotaExceeded { reason } => {
            eprintln!("{}", sanitizer.sanitize(reason));
        }
    }
    let usage = governor.issue_usage();
    println!("cost: ${:.2} ({} tokens)", usage.cost, usage.tokens);
    Ok(report.status.exit_code())
}

fn tracker(root: &Path) -> GhTracker {
    GhTracker {
        workdir: root.to_path_buf(),
        repo: None,
        timeout: Duration::from_secs(120),
    }
}

fn governor(cfg: &AutopilotConfig, state_dir: &Path) -> ResourceGovernor {
    ResourceGovernor::new(&cfg.model.name, cfg.budget, state_dir.join("usage.json"))
}

fn read_ticket(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => fs::read_to_string(path).with_context(|| format!("read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("read ticket from stdin")?;
            Ok(text)
        }
    }
}

/// State files live inside the repository and must not dirty the tree.
fn ensure_state_dir(state_dir: &Path) -> Result<()> {
    fs::create_dir_all(state_dir).with_context(|| format!("create {}", state_dir.display()))?;
    let ignore = state_dir.join(".gitignore");
    if !ignore.exists() {
        write_atomic(&ignore, STATE_GITIGNORE)?;
    }
    Ok(())
}
