use thiserror::Error;

use crate::types::RewinderHandle;

/// Errors that can occur while recording rewind history.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewindError {
    /// The handle does not name a registered rewinder
    #[error("no rewinder registered under handle {handle}")]
    UnknownRewinder { handle: RewinderHandle },
    /// History cannot be recorded while a rewind is replaying it
    #[error("cannot record history while a rewind is in progress")]
    RewindInProgress,
}
