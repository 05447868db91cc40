//! trainckpt CLI
//!
//! Command-line interface for inspecting and editing training checkpoints.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ndarray::{ArrayD, IxDyn};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use trainckpt::prelude::*;

#[derive(Parser)]
#[command(name = "ckpt")]
#[command(version, about = "trainckpt - inspect and edit training checkpoints", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List properties and parameters stored in a checkpoint
    Inspect {
        /// Checkpoint file
        path: PathBuf,
    },

    /// Print the value of a property or parameter
    Get {
        /// Checkpoint file
        path: PathBuf,

        /// Property or parameter name
        name: String,
    },

    /// Overwrite a property or parameter and save the checkpoint
    Set {
        /// Checkpoint file
        path: PathBuf,

        /// Property or parameter name
        name: String,

        /// New value (parameters take comma-separated floats)
        value: String,

        /// Write to this file instead of overwriting the input
        #[arg(long)]
        output: Option<PathBuf>,

        /// Keep optimizer state in the saved checkpoint
        #[arg(long)]
        include_optimizer_state: bool,
    },

    /// Resave a checkpoint without its optimizer state
    StripOptimizer {
        /// Checkpoint file
        path: PathBuf,

        /// Write to this file instead of overwriting the input
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { path } => inspect(&path)?,
        Commands::Get { path, name } => get(&path, &name)?,
        Commands::Set {
            path,
            name,
            value,
            output,
            include_optimizer_state,
        } => {
            let output = output.unwrap_or_else(|| path.clone());
            set(&path, &name, &value, &output, include_optimizer_state)?;
        }
        Commands::StripOptimizer { path, output } => {
            let output = output.unwrap_or_else(|| path.clone());
            let state = load(&path)?;
            CheckpointState::save_checkpoint(&state, &output, false)
                .with_context(|| format!("saving {}", output.display()))?;
        }
    }

    Ok(())
}

fn load(path: &Path) -> Result<CheckpointState> {
    CheckpointState::load_checkpoint(path).with_context(|| format!("loading {}", path.display()))
}

fn inspect(path: &Path) -> Result<()> {
    let state = load(path)?;

    println!("Properties:");
    for name in state.property_names() {
        if let Some(value) = state.get(&name)? {
            println!("  {} ({}) = {}", name, value.kind(), value);
        }
    }

    println!("Parameters:");
    for name in state.parameter_names() {
        if let Some(param) = state.store().parameter(&name) {
            let frozen = if param.requires_grad { "" } else { " frozen" };
            println!("  {} shape={:?}{}", name, param.data.shape(), frozen);
        }
    }

    match state.store().optimizer_state() {
        Some(optimizer) => println!(
            "Optimizer state: step={} lr={}",
            optimizer.step, optimizer.learning_rate
        ),
        None => println!("Optimizer state: none"),
    }

    Ok(())
}

fn get(path: &Path, name: &str) -> Result<()> {
    let state = load(path)?;
    match state.get(name)? {
        Some(value) => println!("{}", value),
        None => bail!("'{}' is neither a property nor a parameter", name),
    }
    Ok(())
}

fn set(
    path: &Path,
    name: &str,
    raw: &str,
    output: &Path,
    include_optimizer_state: bool,
) -> Result<()> {
    let mut state = load(path)?;

    let value = match state.lookup(name) {
        Some(EntryKind::Property) => parse_property(raw),
        Some(EntryKind::Parameter) => {
            let shape = state.store().parameter(name).map(|p| p.data.shape().to_vec());
            parse_parameter(raw, &shape.unwrap_or_default())?
        }
        None => bail!("'{}' is neither a property nor a parameter", name),
    };

    tracing::info!(name, value = %value, "Setting entry");
    state.set(name, value)?;

    if !include_optimizer_state && state.store().optimizer_state().is_some() {
        tracing::warn!(
            path = %output.display(),
            "Dropping optimizer state from the saved checkpoint; pass --include-optimizer-state to keep it"
        );
    }
    CheckpointState::save_checkpoint(&state, output, include_optimizer_state)
        .with_context(|| format!("saving {}", output.display()))?;
    Ok(())
}

/// Parse as int, then float, falling back to a string.
fn parse_property(raw: &str) -> Value {
    if let Ok(v) = raw.parse::<i64>() {
        Value::Int(v)
    } else if let Ok(v) = raw.parse::<f64>() {
        Value::Float(v)
    } else {
        Value::String(raw.to_string())
    }
}

/// Parse comma-separated floats and reshape them to `shape`.
fn parse_parameter(raw: &str, shape: &[usize]) -> Result<Value> {
    let data = raw
        .split(',')
        .map(|s| s.trim().parse::<f32>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("invalid parameter data '{}'", raw))?;

    let len = data.len();
    let array = ArrayD::from_shape_vec(IxDyn(shape), data)
        .with_context(|| format!("{} values do not fit shape {:?}", len, shape))?;
    Ok(Value::Array(array))
}
