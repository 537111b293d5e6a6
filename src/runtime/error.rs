//! Runtime error types

use thiserror::Error;

use super::context::ContextId;

/// A broken invariant of the execution-lock protocol
///
/// These are never recoverable: the caller hands them to
/// [`fatal_error`](super::exit::fatal_error).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyViolation {
    /// The thread's active slot does not hold the context being detached
    #[error("context mix-up: expected {expected} to be active, found {}", display_opt(.found))]
    ContextMismatch {
        expected: ContextId,
        found: Option<ContextId>,
    },
    /// Attaching a context to a thread whose active slot is already taken
    #[error("orphan context: attaching {attaching} but {found} is already active on this thread")]
    OrphanContext { attaching: ContextId, found: ContextId },
    /// Releasing the execution lock without holding it
    #[error("{context} released the execution lock held by {}", display_opt(.holder))]
    NotHolder {
        context: ContextId,
        holder: Option<ContextId>,
    },
    /// Entering a context that is already running
    #[error("{0} is already running")]
    Reentrant(ContextId),
}

fn display_opt(id: &Option<ContextId>) -> String {
    match id {
        Some(id) => id.to_string(),
        None => "nothing".to_string(),
    }
}

/// Errors registering a pending call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PendingCallError {
    /// The queue is at capacity
    #[error("pending call queue is full ({capacity} entries)")]
    Full { capacity: usize },
    /// The runtime is shutting down
    #[error("runtime is finalizing")]
    Finalizing,
}
