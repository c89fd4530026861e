//! Apply command implementation.

use super::{CliError, Options};
use shared_reducer::{FieldContext, FieldDelta, Observers, SharedReducer, SpecSource};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Runs the apply command.
///
/// Waits for the baseline, dispatches `delta`, then prints the state once
/// the server has confirmed it. A rejection is returned as an error.
pub async fn run(
    url: &str,
    delta: &str,
    timeout: Duration,
    options: &Options,
) -> Result<(), CliError> {
    let delta: FieldDelta = serde_json::from_str(delta)?;

    let (error_tx, mut errors) = mpsc::unbounded_channel();
    let observers = Observers::new().with_error_handler(move |text| {
        let _ = error_tx.send(text.to_string());
    });
    let reducer = SharedReducer::connect(FieldContext, options.config(url), observers)?;

    let outcome = tokio::select! {
        synced = tokio::time::timeout(timeout, apply(&reducer, delta)) => {
            synced.map_err(|_| CliError::Timeout(timeout)).and_then(|synced| synced)
        }
        error = errors.recv() => Err(CliError::Connection(error.unwrap_or_default())),
    };
    reducer.close();

    match outcome {
        Ok(state) => options.print(&state),
        Err(e) => {
            warn!("Apply failed: {}", e);
            Err(e)
        }
    }
}

async fn apply(
    reducer: &SharedReducer<FieldContext>,
    delta: FieldDelta,
) -> Result<serde_json::Value, CliError> {
    let baseline = reducer.synced_state().await?;
    info!("Received baseline: {}", baseline);

    reducer.dispatch(vec![SpecSource::delta(delta)])?;
    let state = reducer.synced_state().await?;
    Ok(state.as_ref().clone())
}
