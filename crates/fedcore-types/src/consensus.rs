use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a proposal is asking the federation to ratify (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposalKind {
    ModelUpdate { round: u64 },
    ParameterChange { key: String, value: String },
    ParticipantAdmission { instance_id: String },
    ParticipantExclusion { instance_id: String },
    ProtocolUpgrade { version: String },
}

impl ProposalKind {
    /// Exclusion proposals require 3/4 participation instead of 2/3
    /// (spec §4.D).
    pub fn is_exclusion(&self) -> bool {
        matches!(self, ProposalKind::ParticipantExclusion { .. })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProposalState {
    Active,
    Approved,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VoteDecision {
    Approve,
    Reject,
    Abstain,
}

/// `(proposal_id, voter, decision, timestamp, signature)` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub proposal_id: String,
    pub voter: String,
    pub decision: VoteDecision,
    pub timestamp_ms: i64,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub kind: ProposalKind,
    pub proposer: String,
    pub required_votes: usize,
    pub timestamp_ms: i64,
    pub deadline_ms: i64,
    pub state: ProposalState,
    pub votes: BTreeMap<String, Vote>,
}

impl Proposal {
    pub fn participation_threshold(&self) -> f64 {
        if self.kind.is_exclusion() {
            0.75
        } else {
            2.0 / 3.0
        }
    }

    pub fn approval_threshold(&self) -> f64 {
        2.0 / 3.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusion_uses_three_quarter_participation() {
        let kind = ProposalKind::ParticipantExclusion {
            instance_id: "inst-7".into(),
        };
        assert!(kind.is_exclusion());
    }
}
