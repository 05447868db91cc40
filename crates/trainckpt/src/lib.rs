//! # trainckpt
//!
//! Name-addressable checkpoint state for training sessions.
//!
//! ## Overview
//!
//! trainckpt provides:
//! - `CheckpointState`, a key-value view over model parameters and user properties
//! - The `StateStore` trait that a backing state engine implements
//! - `SessionState`, an in-process engine that persists checkpoints as JSON
//! - `CheckpointManager` for epoch-numbered checkpoint rotation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trainckpt::prelude::*;
//!
//! let mut state: CheckpointState = CheckpointState::load_checkpoint("ckpt.json")?;
//! let epoch = state.get("epoch")?;
//! state.set("epoch", Value::Int(4))?;
//! CheckpointState::save_checkpoint(&state, "ckpt.json", false)?;
//! ```

use std::path::PathBuf;

pub mod checkpoint;
pub mod engine;
pub mod value;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::checkpoint::{
        CheckpointConfig, CheckpointManager, CheckpointState, EntryKind, MetricGoal,
    };
    pub use crate::engine::{OptimizerState, Parameter, RawHandle, SessionState, StateStore};
    pub use crate::value::Value;
    pub use crate::{CheckpointError, EngineError, Result};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors raised by a backing state engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed checkpoint: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Unsupported checkpoint format version: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Name '{0}' is already used by the other namespace")]
    NameConflict(String),

    #[error("Cannot store non-finite value in '{0}'")]
    NonFinite(String),
}

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Invalid argument for CheckpointState: expected {expected}, received {received}")]
    TypeMismatch {
        expected: &'static str,
        received: &'static str,
    },

    #[error("Failed to load checkpoint from {}: {source}", .path.display())]
    LoadFailure {
        path: PathBuf,
        #[source]
        source: EngineError,
    },

    #[error("Failed to save checkpoint to {}: {source}", .path.display())]
    SaveFailure {
        path: PathBuf,
        #[source]
        source: EngineError,
    },

    #[error("No property or parameter named '{0}'")]
    NameNotFound(String),

    #[error("Parameter '{0}' can only be set from an array value")]
    NotAnArray(String),

    #[error("Checkpoint path is not valid UTF-8: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, CheckpointError>;
