//! Shared data model, crypto primitives, and error types for the federation
//! core. Every other crate in this workspace depends on this one; it
//! depends on nothing in the workspace.

pub mod consensus;
pub mod crypto;
pub mod error;
pub mod events;
pub mod ids;
pub mod instance;
pub mod message;
pub mod privacy;
pub mod round;
pub mod secure_agg;
pub mod tensor;

pub use consensus::{Proposal, ProposalKind, ProposalState, Vote, VoteDecision};
pub use error::{CoreError, CoreResult};
pub use events::FederationEvent;
pub use instance::{Instance, InstanceStatus, ParticipantHistory};
pub use message::{MessageType, NetworkMessage};
pub use privacy::{AuditEntry, PrivacyBudget, PrivacyLevel};
pub use round::{
    AggregationResult, AggregationStrategy, ConvergenceMetrics, GlobalModel, LocalUpdate, Round,
    RoundCancelReason, RoundState, SelectionCriteria,
};
pub use secure_agg::SecureShare;
pub use tensor::{Layer, WeightTensor};
