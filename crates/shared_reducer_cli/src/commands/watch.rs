//! Watch command implementation.

use super::{CliError, Options};
use shared_reducer::{FieldContext, Observers, SharedReducer};
use tokio::sync::mpsc;
use tracing::info;

/// Runs the watch command until interrupted, the connection fails, or
/// `count` states have been printed.
pub async fn run(url: &str, count: Option<usize>, options: &Options) -> Result<(), CliError> {
    let (state_tx, mut states) = mpsc::unbounded_channel();
    let (error_tx, mut errors) = mpsc::unbounded_channel();
    let observers = Observers::new()
        .with_change_handler(move |state| {
            let _ = state_tx.send(state);
        })
        .with_error_handler(move |text| {
            let _ = error_tx.send(text.to_string());
        });

    let reducer = SharedReducer::connect(FieldContext, options.config(url), observers)?;
    info!("Watching {}", url);

    let mut printed = 0;
    let result = loop {
        if count.is_some_and(|count| printed >= count) {
            break Ok(());
        }
        tokio::select! {
            state = states.recv() => match state {
                Some(state) => {
                    options.print(&state)?;
                    printed += 1;
                }
                None => break Ok(()),
            },
            error = errors.recv() => {
                break Err(CliError::Connection(error.unwrap_or_default()));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break Ok(());
            }
        }
    };

    reducer.close();
    result
}
