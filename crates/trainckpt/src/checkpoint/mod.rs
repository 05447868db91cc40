//! Checkpoint state and lifecycle.
//!
//! Provides:
//! - `CheckpointState` for name-based access to a training session's state
//! - `CheckpointManager` for managing epoch-numbered checkpoint files

mod manager;
mod state;

pub use manager::{CheckpointConfig, CheckpointManager, MetricGoal};
pub use state::{CheckpointState, EntryKind};
