//! Command-line interface for commander-io instruments.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use commander_io::Commander;

/// Drive a laboratory instrument described by a JSON schema.
#[derive(Parser, Debug)]
#[command(name = "commander")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the instrument schema.
    #[arg(short, long, global = true)]
    schema: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Action to perform.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the schema without connecting.
    Validate,
    /// Describe the instrument, or one command or parameter.
    Info {
        /// Command or parameter name.
        name: Option<String>,
    },
    /// Connect, submit one command and print the reply.
    Submit {
        /// Command name.
        command: String,
        /// Arguments as wire strings, in placeholder order.
        args: Vec<String>,
    },
    /// Submit every `[command, "args"]` pair of a JSON list.
    Apply {
        /// Path to the JSON list.
        file: PathBuf,
    },
    /// Submit `[command, "args", "expected"]` triples and compare replies.
    Confirm {
        /// Path to the JSON list.
        file: PathBuf,
    },
    /// Write the schema back out as JSON.
    Dump {
        /// Output file; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let Some(schema) = args.schema.as_deref() else {
        bail!("--schema <path> is required");
    };
    let mut commander = Commander::from_json_file(schema)
        .with_context(|| format!("Failed to load schema {}", schema.display()))?;

    match args.command {
        Command::Validate => {
            println!(
                "Schema '{}' is valid: {} parameters, {} commands, {} transport",
                commander.name(),
                commander.parameters().len(),
                commander.commands().len(),
                commander.connection_properties().kind()
            );
            Ok(())
        }
        Command::Info { name } => info(&commander, name.as_deref()),
        Command::Dump { output } => {
            let json = commander.to_schema().to_json_pretty()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Schema written to {}", path.display());
                }
                None => println!("{}", json),
            }
            Ok(())
        }
        online => {
            commander
                .connect()
                .await
                .with_context(|| format!("Failed to connect to {}", commander.name()))?;
            let result = run_online(&mut commander, online).await;
            if let Err(e) = commander.disconnect().await {
                tracing::warn!("Disconnect failed: {}", e);
            }
            result
        }
    }
}

/// Commands that talk to the instrument. The commander is connected.
async fn run_online(commander: &mut Commander, command: Command) -> Result<()> {
    match command {
        Command::Submit { command, args } => {
            let response = commander.submit_strings(&command, &args).await?;
            if !response.is_none() {
                println!("> {}", response);
            }
        }
        Command::Apply { file } => {
            let steps = read_steps(&file, 2)?;
            for step in &steps {
                let response = commander.submit_line(&step[0], &step[1]).await?;
                println!("{} -> {}", step[0], response);
            }
            println!("Config setting completed: {} commands", steps.len());
        }
        Command::Confirm { file } => {
            let steps = read_steps(&file, 3)?;
            let mut failures = Vec::new();
            for step in &steps {
                let out = commander.submit_line(&step[0], &step[1]).await?.to_string();
                if !out.trim().eq_ignore_ascii_case(step[2].trim()) {
                    failures.push(format!("< {} returned {}. {} expected.", step[0], out, step[2]));
                }
            }
            if !failures.is_empty() {
                println!("Config confirmation failed in following areas:");
                for failure in &failures {
                    println!("{}", failure);
                }
                bail!("{} of {} settings differ", failures.len(), steps.len());
            }
            println!("Config confirmation successful.");
        }
        Command::Validate | Command::Info { .. } | Command::Dump { .. } => {}
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    // JSON format for log collectors
    let json_logging = std::env::var("COMMANDER_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if verbose {
            "commander=debug"
        } else {
            "commander=info"
        })
    });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Read a JSON list of string lists, each with at least `width` entries.
fn read_steps(path: &Path, width: usize) -> Result<Vec<Vec<String>>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let steps: Vec<Vec<String>> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON list of string lists", path.display()))?;
    if let Some(bad) = steps.iter().find(|s| s.len() < width) {
        bail!("Entry {:?} needs {} fields", bad, width);
    }
    Ok(steps)
}

fn info(commander: &Commander, name: Option<&str>) -> Result<()> {
    match name {
        Some(name) => {
            if let Ok(command) = commander.command(name) {
                println!("{}", command);
            } else if let Ok(definition) = commander.parameter_definition(name) {
                println!("{}", definition);
            } else {
                bail!("\"{}\" is neither a command nor a parameter", name);
            }
        }
        None => {
            println!(
                "{} ({} at {})",
                commander.name(),
                commander.interface().transport_type(),
                commander.interface().endpoint()
            );
            if let Some(description) = commander.description() {
                println!("{}", description);
            }
            println!("Commands:");
            for name in commander.commands().keys() {
                println!("  {}", name);
            }
            println!("Parameters:");
            for name in commander.parameters().keys() {
                println!("  {}", name);
            }
        }
    }
    Ok(())
}
