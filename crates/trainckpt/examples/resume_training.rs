//! Simulated training loop that checkpoints every few epochs and resumes
//! from the latest checkpoint on the next run.
//!
//! Run it twice to see it pick up where it left off:
//!
//! ```sh
//! cargo run --example resume_training
//! ```

use ndarray::ArrayD;
use tracing_subscriber::EnvFilter;
use trainckpt::prelude::*;

const TOTAL_EPOCHS: i64 = 20;

fn fresh_state() -> Result<CheckpointState> {
    let mut session = SessionState::new();
    session.insert_parameter("w", ArrayD::zeros(vec![4]))?;
    session.add_property("epoch", Value::Int(0))?;
    session.add_property("lr", Value::Float(0.1))?;
    session.set_optimizer_state(OptimizerState::new(0, 0.1))?;
    Ok(CheckpointState::new(session))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("info"))
        .init();

    let dir = std::env::temp_dir().join("trainckpt-resume-example");
    let config = CheckpointConfig::new(&dir)
        .interval(5)
        .retain(2)
        .track_best(MetricGoal::Minimize)
        .include_optimizer_state(true);
    let mut manager = CheckpointManager::new(config);

    let mut state = match manager.load_latest::<SessionState>()? {
        Some((epoch, state)) => {
            tracing::info!(epoch, "Resuming from checkpoint");
            state
        }
        None => fresh_state()?,
    };

    let start = state
        .get("epoch")?
        .and_then(|v| v.as_int())
        .unwrap_or(0);

    for epoch in (start + 1)..=TOTAL_EPOCHS {
        // Stand-in for an optimizer step.
        let w = state
            .get("w")?
            .and_then(Value::into_array)
            .unwrap_or_else(|| ArrayD::zeros(vec![4]));
        state.set("w", w.mapv(|x| x + 0.1))?;
        state.set("epoch", epoch)?;

        let loss = 1.0 / epoch as f64;
        manager.maybe_save(&state, epoch as u64, loss)?;
    }

    tracing::info!(checkpoints = ?manager.list_checkpoints()?, "Done");
    Ok(())
}
