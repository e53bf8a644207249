//! Sluice CLI - run flow definitions

mod config;
mod logging;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use config::Config;
use rhi_sluice_core::{
    ComponentRegistry, Flow, FlowOutcome, FlowRuntime, Message, Payload, TracingTracker,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Flow-based data integration", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/sluice/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter (e.g. "info", "rhi_sluice_core=debug"); RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow file and print what its terminal steps emit
    Run {
        /// Flow file (YAML, TOML, or JSON)
        flow: PathBuf,
        /// Execution id (default: flow id plus a timestamp)
        #[arg(long)]
        execution_id: Option<String>,
    },

    /// Validate a flow file without running it
    Check {
        /// Flow file (YAML, TOML, or JSON)
        flow: PathBuf,
    },

    /// List available component types
    Components,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::load_from_path(Some(path.clone())),
        None => Config::load(),
    };

    let log_level = cli
        .log_level
        .or(config.defaults.log_level)
        .unwrap_or_else(|| "warn".to_string());
    logging::init(&log_level);

    let mut registry = ComponentRegistry::with_builtins();
    rhi_sluice_delimited::register_all(&mut registry);

    match cli.command {
        Commands::Run { flow, execution_id } => {
            let poll_interval = config.defaults.poll_interval_ms.map(Duration::from_millis);
            cmd_run(registry, &flow, execution_id, poll_interval)
        }
        Commands::Check { flow } => cmd_check(&registry, &flow),
        Commands::Components => cmd_components(&registry),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "sluice", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn load_flow(path: &Path) -> Result<Flow> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read flow file {}", path.display()))?;
    Flow::from_bytes(&data, Some(&path.to_string_lossy()))
        .with_context(|| format!("Failed to parse flow file {}", path.display()))
}

fn cmd_run(
    registry: ComponentRegistry,
    path: &Path,
    execution_id: Option<String>,
    poll_interval: Option<Duration>,
) -> Result<()> {
    let flow = load_flow(path)?;
    let execution_id = execution_id.unwrap_or_else(|| default_execution_id(&flow));

    let mut runtime = FlowRuntime::new(registry).with_tracker(Arc::new(TracingTracker));
    if let Some(interval) = poll_interval {
        runtime = runtime.with_poll_interval(interval);
    }

    let outcome = runtime
        .execute(&flow, execution_id.as_str())
        .with_context(|| format!("Execution {} of flow '{}' failed", execution_id, flow.id))?;

    print_outputs(&outcome)?;
    print_summary(&outcome);
    Ok(())
}

fn default_execution_id(flow: &Flow) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{}-{}", flow.id, millis)
}

/// Raw lines go to stdout as text, records as one JSON object per line.
fn print_outputs(outcome: &FlowOutcome) -> Result<()> {
    let multiple = outcome.outputs.len() > 1;
    for (step_id, messages) in &outcome.outputs {
        if multiple {
            println!("# {}", step_id);
        }
        for message in messages {
            print_message(message)?;
        }
    }
    Ok(())
}

fn print_message(message: &Message) -> Result<()> {
    match message.payload() {
        Payload::Empty => {}
        Payload::Lines(_) => {
            for line in message.text_lines() {
                println!("{}", line);
            }
        }
        Payload::Entities(records) => {
            for record in records {
                println!("{}", serde_json::to_string(record)?);
            }
        }
    }
    Ok(())
}

fn print_summary(outcome: &FlowOutcome) {
    eprintln!(
        "Execution {}: {} in {:.2?}",
        outcome.execution_id, outcome.status, outcome.duration
    );
    for (step_id, stats) in &outcome.statistics {
        eprintln!(
            "  {}: in {} msg / {} items, out {} msg / {} items",
            step_id,
            stats.inbound_messages,
            stats.inbound_items,
            stats.outbound_messages,
            stats.outbound_items
        );
    }
}

fn cmd_check(registry: &ComponentRegistry, path: &Path) -> Result<()> {
    let flow = load_flow(path)?;
    flow.validate(registry)
        .with_context(|| format!("Flow '{}' is invalid", flow.id))?;

    println!("Flow: {}", flow.id);
    if !flow.name.is_empty() {
        println!("  {}", flow.name);
    }
    println!();

    println!("Steps:");
    for (i, step) in flow.topological_order()?.into_iter().enumerate() {
        println!("  {}. {} ({})", i + 1, step.display_name(), step.component_type);
    }
    println!();

    println!("Links:");
    for link in &flow.links {
        println!("  {} -> {}", link.from, link.to);
    }
    println!();
    println!("Status: valid");
    Ok(())
}

fn cmd_components(registry: &ComponentRegistry) -> Result<()> {
    println!("Available components:\n");

    for decl in registry.declarations() {
        println!("  {} [{}]", decl.type_name, decl.category);
        if !decl.description.is_empty() {
            println!("    {}", decl.description);
        }
        println!("    input:  {}", decl.input);
        println!("    output: {}", decl.output);
        for setting in &decl.settings {
            match &setting.default {
                Some(default) => println!("    setting {} (default {:?})", setting.name, default),
                None => println!("    setting {}", setting.name),
            }
        }
        for setting in &decl.attribute_settings {
            println!("    attribute setting {}", setting.name);
        }
        println!();
    }

    println!("Total: {} components", registry.len());
    Ok(())
}
