//! pagepilot - Interactive step execution engine CLI
//!
//! The engine itself is driven by embedders that implement
//! `BrowserDriver`; this binary covers the offline side: checking step
//! plans, inspecting and seeding the selector learning store, and showing
//! the resolved configuration.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;

use pagepilot::config::{ConfigOverrides, EngineConfig, EventNoiseMode};
use pagepilot::learning::{state_key, target_key, AuditLog, LearningStore, TeachingRecord};
use pagepilot::observer::ObservedEvent;
use pagepilot::step::StepPlan;
use pagepilot::PilotError;

#[derive(Parser)]
#[command(name = "pagepilot")]
#[command(version, about = "Interactive step execution with deadlines, handoff and selector learning", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (TOML or JSON). Defaults to .pagepilot/config.toml
    #[arg(short, long, global = true, env = "PAGEPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Settings that take precedence over the config file.
#[derive(clap::Args, Default)]
struct OverrideArgs {
    /// Whole-run budget in seconds
    #[arg(long, global = true, env = "PAGEPILOT_RUN_TIMEOUT")]
    run_timeout: Option<f64>,

    /// Per-step hard budget in seconds
    #[arg(long, global = true, env = "PAGEPILOT_STEP_HARD_TIMEOUT")]
    step_hard_timeout: Option<f64>,

    /// Budget for wait steps in seconds
    #[arg(long, global = true, env = "PAGEPILOT_WAIT_TIMEOUT")]
    wait_timeout: Option<f64>,

    /// Budget for one interactive attempt in seconds
    #[arg(long, global = true, env = "PAGEPILOT_INTERACTIVE_TIMEOUT")]
    interactive_timeout: Option<f64>,

    /// Retry rounds after the first attempt
    #[arg(long, global = true, env = "PAGEPILOT_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Enable human teaching on handoff
    #[arg(long, global = true, env = "PAGEPILOT_TEACHING")]
    teaching: Option<bool>,

    /// Learning window in seconds
    #[arg(long, global = true, env = "PAGEPILOT_LEARNING_WINDOW")]
    learning_window: Option<f64>,

    /// Which observer events count as progress (default, debug)
    #[arg(long, global = true, env = "PAGEPILOT_EVENT_NOISE_MODE", value_parser = parse_noise_mode)]
    event_noise_mode: Option<EventNoiseMode>,

    /// Directory holding the selector map and audit records
    #[arg(long, global = true, env = "PAGEPILOT_LEARNING_DIR")]
    learning_dir: Option<PathBuf>,

    /// Directory for screenshots
    #[arg(long, global = true, env = "PAGEPILOT_EVIDENCE_DIR")]
    evidence_dir: Option<PathBuf>,
}

impl OverrideArgs {
    fn to_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            run_timeout: self.run_timeout,
            step_hard_timeout: self.step_hard_timeout,
            wait_timeout: self.wait_timeout,
            interactive_timeout: self.interactive_timeout,
            max_retries: self.max_retries,
            teaching_enabled: self.teaching,
            learning_window: self.learning_window,
            event_noise_mode: self.event_noise_mode,
            learning_dir: self.learning_dir.clone(),
            evidence_dir: self.evidence_dir.clone(),
        }
    }
}

fn parse_noise_mode(value: &str) -> Result<EventNoiseMode, String> {
    match value.to_ascii_lowercase().as_str() {
        "default" => Ok(EventNoiseMode::Default),
        "debug" => Ok(EventNoiseMode::Debug),
        other => Err(format!("unknown noise mode '{other}' (expected default or debug)")),
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect step plans
    Plan {
        #[command(subcommand)]
        action: PlanAction,
    },

    /// Inspect and seed the selector learning store
    Learning {
        #[command(subcommand)]
        action: LearningAction,
    },

    /// Show or validate the resolved configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum PlanAction {
    /// Parse a plan file and print each step's signature and class
    Check {
        /// Plan file (JSON)
        plan: PathBuf,
    },
}

#[derive(Subcommand)]
enum LearningAction {
    /// List learned selectors
    List {
        /// Only show one page context
        #[arg(long)]
        state: Option<String>,
    },

    /// Print the page-context and target keys for a page and label
    Keys {
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long)]
        target: Option<String>,
    },

    /// Record a selector for a target by hand
    Teach {
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long)]
        target: String,
        #[arg(long)]
        selector: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration as TOML
    Show,

    /// Check the resolved configuration for errors
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "pagepilot=debug"
    } else {
        "pagepilot=info,warn"
    };
    if cli.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    let config = match resolve_config(cli.config.as_deref(), &cli.overrides.to_overrides()) {
        Ok(config) => config,
        Err(e) => fail(&e),
    };

    match cli.command {
        Commands::Plan { action } => match action {
            PlanAction::Check { plan } => check_plan(&plan),
        },
        Commands::Learning { action } => match action {
            LearningAction::List { state } => list_learning(&config, state.as_deref())?,
            LearningAction::Keys { url, title, target } => {
                println!("state_key:  {}", state_key(&url, &title));
                if let Some(target) = target {
                    match target_key(&target) {
                        Some(key) => println!("target_key: {key}"),
                        None => println!("target_key: {}", "(rejected)".yellow()),
                    }
                }
            }
            LearningAction::Teach {
                url,
                title,
                target,
                selector,
            } => teach(&config, &url, &title, &target, &selector)?,
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => match config.to_toml_string() {
                Ok(rendered) => print!("{rendered}"),
                Err(e) => fail(&e),
            },
            ConfigAction::Validate => {
                let report = config.validate();
                for warning in &report.warnings {
                    println!("{} {}", "Warning:".yellow().bold(), warning);
                }
                for (field, reason) in &report.errors {
                    eprintln!("{} {}: {}", "Error:".red().bold(), field, reason);
                }
                if let Err(e) = config.ensure_valid() {
                    std::process::exit(e.exit_code());
                }
                println!("{} configuration is valid", "OK".green().bold());
            }
        },
    }

    Ok(())
}

/// Load the config file (explicit, discovered, or defaults) and merge overrides.
fn resolve_config(
    explicit: Option<&Path>,
    overrides: &ConfigOverrides,
) -> pagepilot::Result<EngineConfig> {
    let base = match explicit {
        Some(path) if !path.exists() => {
            return Err(PilotError::config_with_path(
                "config file not found",
                path.to_path_buf(),
            ));
        }
        Some(path) => EngineConfig::load(path)?,
        None => {
            let cwd = std::env::current_dir()?;
            match EngineConfig::discover(&cwd) {
                Some(path) => EngineConfig::load(&path)?,
                None => EngineConfig::default(),
            }
        }
    };
    Ok(base.with_overrides(overrides))
}

fn fail(error: &PilotError) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), error);
    std::process::exit(error.exit_code());
}

fn check_plan(path: &Path) {
    let plan = match StepPlan::load(path) {
        Ok(plan) => plan,
        Err(e) => fail(&e),
    };

    if let Some(url) = &plan.url {
        println!("{} {}", "Page:".bold(), url);
    }
    for (i, step) in plan.steps.iter().enumerate() {
        let class = if step.kind.is_wait() {
            "wait".cyan()
        } else {
            "interactive".magenta()
        };
        println!("{:>4}. {:<40} {}", i + 1, step.signature(i), class);
    }
    println!("{} {} step(s)", "OK".green().bold(), plan.len());
}

fn list_learning(config: &EngineConfig, only_state: Option<&str>) -> anyhow::Result<()> {
    let store = LearningStore::new(&config.learning_dir);
    let map = store.load().context("Failed to read selector map")?;

    if map.is_empty() {
        println!("No learned selectors in {}", store.map_path().display());
        return Ok(());
    }

    for state in map.state_keys() {
        if only_state.is_some_and(|wanted| wanted != state) {
            continue;
        }
        println!("{}", state.bold());
        if let Some(targets) = map.targets(state) {
            for (target, selectors) in targets {
                println!("  {}", target.cyan());
                for selector in selectors {
                    println!("    {selector}");
                }
            }
        }
    }
    Ok(())
}

fn teach(
    config: &EngineConfig,
    url: &str,
    title: &str,
    target: &str,
    selector: &str,
) -> anyhow::Result<()> {
    let Some(key) = target_key(target) else {
        eprintln!(
            "{} target label {:?} cannot be used as a learning key",
            "Error:".red().bold(),
            target
        );
        std::process::exit(1);
    };
    let page = state_key(url, title);
    let store = LearningStore::new(&config.learning_dir);
    let changed = store.remember(&page, target, selector)?;

    let mut event = ObservedEvent::click(selector, target);
    event.url = url.to_string();
    let record = TeachingRecord {
        recorded_at: Utc::now(),
        state_key: page.clone(),
        target_key: key.clone(),
        failed_target: target.to_string(),
        selector: selector.trim().to_string(),
        derived: false,
        event,
        reason: "manual".to_string(),
        where_: "cli".to_string(),
        replay: None,
    };
    AuditLog::new(&config.learning_dir).write(&record)?;

    if changed {
        println!(
            "{} learned {} for {} on {}",
            "OK".green().bold(),
            selector.trim(),
            key,
            page
        );
    } else {
        println!("Already current: {} for {} on {}", selector.trim(), key, page);
    }
    Ok(())
}
