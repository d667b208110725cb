use thiserror::Error;

/// Error kinds shared across every core component (spec §7).
///
/// Local policy for each variant lives with its call sites, not here: this
/// enum only names the failure, it does not decide what happens next.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    #[error("tensor shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("privacy budget exhausted: would spend {attempted:.6}, {remaining:.6} remaining")]
    BudgetExhausted { attempted: f64, remaining: f64 },

    #[error("quorum short: needed {needed}, had {had}")]
    QuorumShort { needed: usize, had: usize },

    #[error("instance {voter} already voted on proposal {proposal_id}")]
    AlreadyVoted {
        proposal_id: String,
        voter: String,
    },

    #[error("signature verification failed for sender {sender}")]
    SignatureInvalid { sender: String },

    #[error("message from unknown peer {sender}")]
    UnknownPeer { sender: String },

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("service is shutting down")]
    Shutdown,
}

pub type CoreResult<T> = Result<T, CoreError>;
