use crate::coordinator::CoordinatorError;
use crate::schedule::SchedulerError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// Errors from handling one envelope.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("router inbox closed")]
    Closed,
}

impl RouterError {
    /// Whether redelivering the envelope later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Transport(e) => e.is_transient(),
            Self::Scheduler(_) | Self::Coordinator(_) | Self::Closed => false,
        }
    }

    /// Whether the envelope contradicts stored state.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::Coordinator(e) if e.is_invariant_violation())
    }
}
