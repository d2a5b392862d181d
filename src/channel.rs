//! Batcher implementation that uses a bounded channel and a background thread to support simultaneously
//! receiving items from many producers and awaiting on round timeouts.
//!
//! This implementation is using `crossbeam_channel` to implement awaiting for items or timeout.

pub mod batcher;

use std::fmt;
use thiserror::Error;

/// The error that is returned when the collection loop could not be started.
#[derive(Debug, Error)]
pub enum StartError {
    /// Operating system refused to spawn the collection thread.
    #[error("failed to spawn collection thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// The error that is returned when submitting to a batcher whose collection loop has terminated
/// (e.g. the action has panicked).
///
/// The rejected item is handed back.
#[derive(PartialEq, Eq, Clone, Copy, Error)]
#[error("collection loop has stopped; no more items will be delivered")]
pub struct StoppedError<I>(pub I);

impl<I> StoppedError<I> {
    /// Takes back the item that could not be submitted.
    pub fn into_inner(self) -> I {
        self.0
    }
}

impl<I> fmt::Debug for StoppedError<I> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("StoppedError(..)")
    }
}
