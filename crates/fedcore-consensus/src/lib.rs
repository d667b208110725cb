//! Weighted Byzantine-fault-tolerant voting over proposals, with
//! reputation-driven eligibility and optional threshold-signature
//! ratification of approved outcomes.

mod ratify;

pub use ratify::Ratifier;

use chrono::Utc;
use fedcore_types::{
    CoreError, CoreResult, Proposal, ProposalKind, ProposalState, Vote, VoteDecision,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{info, warn};

const DEFAULT_TIMEOUT_MS: i64 = 5 * 60 * 1000;
const REPUTATION_MIN: f64 = 0.0;
const REPUTATION_MAX: f64 = 2.0;
const ELIGIBILITY_FLOOR: f64 = 0.5;
const EXCLUSION_FLOOR: f64 = 0.2;

/// Ring buffer capacity for `byzantine_log`, matching the spec's §9
/// history-ring guidance.
const BYZANTINE_LOG_CAPACITY: usize = 1_000;

#[derive(Debug, Clone, Copy)]
struct VoterInfo {
    weight: f64,
    reputation: f64,
}

impl VoterInfo {
    fn eligible(&self) -> bool {
        self.reputation >= ELIGIBILITY_FLOOR
    }

    fn effective_weight(&self) -> f64 {
        self.weight * self.reputation
    }
}

/// Severity of externally-reported Byzantine behavior (spec §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByzantineSeverity {
    Low,
    Medium,
    High,
}

impl ByzantineSeverity {
    fn penalty(self) -> f64 {
        match self {
            ByzantineSeverity::Low => 0.1,
            ByzantineSeverity::Medium => 0.3,
            ByzantineSeverity::High => 0.5,
        }
    }
}

/// One entry in the Byzantine evidence audit trail (spec §4.D).
#[derive(Debug, Clone)]
pub struct ByzantineRecord {
    pub instance_id: String,
    pub severity: ByzantineSeverity,
    pub reputation_after: f64,
    pub timestamp_ms: i64,
}

/// Result of a vote that pushed a proposal to a terminal state.
#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub proposal_id: String,
    pub state: ProposalState,
    pub confidence: f64,
    pub reputation_deltas: HashMap<String, f64>,
}

/// Runs proposal lifecycles over a fixed roster of weighted voters.
/// Consensus never mutates the peer table it reads reputations from
/// (spec §3's ownership summary); callers are expected to persist
/// `reputation_deltas` back into their own peer records.
pub struct ConsensusEngine {
    voters: HashMap<String, VoterInfo>,
    proposals: HashMap<String, Proposal>,
    ratifier: Option<Ratifier>,
    byzantine_log: VecDeque<ByzantineRecord>,
}

impl ConsensusEngine {
    pub fn new() -> Self {
        Self {
            voters: HashMap::new(),
            proposals: HashMap::new(),
            ratifier: None,
            byzantine_log: VecDeque::with_capacity(BYZANTINE_LOG_CAPACITY),
        }
    }

    pub fn with_ratifier(ratifier: Ratifier) -> Self {
        Self {
            voters: HashMap::new(),
            proposals: HashMap::new(),
            ratifier: Some(ratifier),
            byzantine_log: VecDeque::with_capacity(BYZANTINE_LOG_CAPACITY),
        }
    }

    pub fn register_voter(&mut self, instance_id: impl Into<String>, weight: f64) {
        self.voters.insert(
            instance_id.into(),
            VoterInfo {
                weight,
                reputation: 1.0,
            },
        );
    }

    pub fn reputation_of(&self, instance_id: &str) -> Option<f64> {
        self.voters.get(instance_id).map(|v| v.reputation)
    }

    pub fn proposal(&self, proposal_id: &str) -> Option<&Proposal> {
        self.proposals.get(proposal_id)
    }

    /// `propose(kind, content)` (spec §4.D): installs a 5-minute default
    /// timeout and returns the new `proposal_id`.
    pub fn propose(&mut self, kind: ProposalKind, proposer: impl Into<String>, now_ms: i64) -> String {
        self.propose_with_timeout(kind, proposer, now_ms, DEFAULT_TIMEOUT_MS)
    }

    pub fn propose_with_timeout(
        &mut self,
        kind: ProposalKind,
        proposer: impl Into<String>,
        now_ms: i64,
        timeout_ms: i64,
    ) -> String {
        let proposer = proposer.into();
        let id = fedcore_types::ids::new_proposal_id(&proposer);
        let proposal = Proposal {
            id: id.clone(),
            kind,
            proposer,
            required_votes: self.eligible_voters().count(),
            timestamp_ms: now_ms,
            deadline_ms: now_ms + timeout_ms,
            state: ProposalState::Active,
            votes: BTreeMap::new(),
        };
        self.proposals.insert(id.clone(), proposal);
        id
    }

    fn eligible_voters(&self) -> impl Iterator<Item = (&String, &VoterInfo)> {
        self.voters.iter().filter(|(_, v)| v.eligible())
    }

    fn eligible_weight(&self) -> f64 {
        self.eligible_voters().map(|(_, v)| v.effective_weight()).sum()
    }

    /// `cast_vote(proposal_id, decision)` (spec §4.D). Returns
    /// `Some(outcome)` when this vote finalized the proposal.
    pub fn cast_vote(
        &mut self,
        proposal_id: &str,
        voter: &str,
        decision: VoteDecision,
        signature: String,
        now_ms: i64,
    ) -> CoreResult<Option<FinalizeOutcome>> {
        let proposal = self
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown proposal {proposal_id}")))?;

        if proposal.state != ProposalState::Active {
            return Err(CoreError::InvalidInput(format!(
                "proposal {proposal_id} is not active"
            )));
        }
        if proposal.votes.contains_key(voter) {
            return Err(CoreError::AlreadyVoted {
                proposal_id: proposal_id.to_string(),
                voter: voter.to_string(),
            });
        }

        proposal.votes.insert(
            voter.to_string(),
            Vote {
                proposal_id: proposal_id.to_string(),
                voter: voter.to_string(),
                decision,
                timestamp_ms: now_ms,
                signature,
            },
        );

        self.try_finalize(proposal_id)
    }

    fn try_finalize(&mut self, proposal_id: &str) -> CoreResult<Option<FinalizeOutcome>> {
        let eligible_weight = self.eligible_weight();
        let proposal = self.proposals.get(proposal_id).unwrap();

        let participation_threshold = proposal.participation_threshold();
        let approval_threshold = proposal.approval_threshold();

        let mut voted_weight = 0.0;
        let mut approve_weight = 0.0;
        let mut reject_weight = 0.0;
        for vote in proposal.votes.values() {
            let Some(info) = self.voters.get(&vote.voter) else {
                continue;
            };
            let w = info.effective_weight();
            voted_weight += w;
            match vote.decision {
                VoteDecision::Approve => approve_weight += w,
                VoteDecision::Reject => reject_weight += w,
                VoteDecision::Abstain => {}
            }
        }

        let participation = if eligible_weight > 0.0 {
            voted_weight / eligible_weight
        } else {
            0.0
        };
        if participation < participation_threshold {
            return Ok(None);
        }

        let approve_fraction = if voted_weight > 0.0 {
            approve_weight / voted_weight
        } else {
            0.0
        };
        let reject_fraction = if voted_weight > 0.0 {
            reject_weight / voted_weight
        } else {
            0.0
        };

        let decided_state = if approve_fraction >= approval_threshold {
            Some(ProposalState::Approved)
        } else if reject_fraction >= approval_threshold {
            Some(ProposalState::Rejected)
        } else {
            None
        };

        let Some(state) = decided_state else {
            return Ok(None);
        };

        let confidence = ((participation + approve_fraction.max(reject_fraction)) / 2.0 + 0.01)
            .clamp(0.0, 1.0);

        let deltas = self.apply_reputation_updates(proposal_id, state);

        let proposal = self.proposals.get_mut(proposal_id).unwrap();
        proposal.state = state;

        info!(proposal_id, ?state, confidence, "proposal finalized");

        Ok(Some(FinalizeOutcome {
            proposal_id: proposal_id.to_string(),
            state,
            confidence,
            reputation_deltas: deltas,
        }))
    }

    /// Checks every active proposal's deadline and expires the ones that
    /// missed it (spec §4.D step 4).
    pub fn expire_overdue(&mut self, now_ms: i64) -> Vec<String> {
        let overdue: Vec<String> = self
            .proposals
            .values()
            .filter(|p| p.state == ProposalState::Active && now_ms > p.deadline_ms)
            .map(|p| p.id.clone())
            .collect();
        for id in &overdue {
            if let Some(p) = self.proposals.get_mut(id) {
                p.state = ProposalState::Expired;
            }
            warn!(proposal_id = %id, "proposal expired without finalization");
        }
        overdue
    }

    fn apply_reputation_updates(
        &mut self,
        proposal_id: &str,
        state: ProposalState,
    ) -> HashMap<String, f64> {
        let proposal = self.proposals.get(proposal_id).unwrap();
        let mut deltas: HashMap<String, f64> = HashMap::new();

        let winning_decision = match state {
            ProposalState::Approved => Some(VoteDecision::Approve),
            ProposalState::Rejected => Some(VoteDecision::Reject),
            _ => None,
        };

        for (voter_id, vote) in &proposal.votes {
            let mut delta = 0.01; // participation bonus
            if let Some(winning) = winning_decision {
                if vote.decision == winning {
                    delta += 0.05;
                } else if vote.decision != VoteDecision::Abstain {
                    delta -= 0.02;
                }
            }
            *deltas.entry(voter_id.clone()).or_insert(0.0) += delta;
        }

        for (voter_id, info) in self.voters.iter() {
            if info.eligible() && !proposal.votes.contains_key(voter_id) {
                *deltas.entry(voter_id.clone()).or_insert(0.0) -= 0.03;
            }
        }

        for (voter_id, delta) in &deltas {
            if let Some(info) = self.voters.get_mut(voter_id) {
                info.reputation = (info.reputation + delta).clamp(REPUTATION_MIN, REPUTATION_MAX);
            }
        }

        deltas
    }

    /// Records externally-detected Byzantine evidence and auto-proposes
    /// exclusion once reputation drops below the exclusion floor
    /// (spec §4.D).
    pub fn report_byzantine_evidence(
        &mut self,
        instance_id: &str,
        severity: ByzantineSeverity,
        now_ms: i64,
    ) -> Option<String> {
        let Some(info) = self.voters.get_mut(instance_id) else {
            return None;
        };
        info.reputation = (info.reputation - severity.penalty()).clamp(REPUTATION_MIN, REPUTATION_MAX);
        warn!(instance_id, reputation = info.reputation, "byzantine evidence recorded");

        if self.byzantine_log.len() == BYZANTINE_LOG_CAPACITY {
            self.byzantine_log.pop_front();
        }
        self.byzantine_log.push_back(ByzantineRecord {
            instance_id: instance_id.to_string(),
            severity,
            reputation_after: info.reputation,
            timestamp_ms: now_ms,
        });

        if info.reputation < EXCLUSION_FLOOR {
            let id = self.propose(
                ProposalKind::ParticipantExclusion {
                    instance_id: instance_id.to_string(),
                },
                "consensus_engine",
                now_ms,
            );
            return Some(id);
        }
        None
    }

    pub fn ratifier(&self) -> Option<&Ratifier> {
        self.ratifier.as_ref()
    }

    /// Number of Byzantine evidence reports currently retained in the ring
    /// buffer (spec §4.D's audit trail).
    pub fn byzantine_event_count(&self) -> u64 {
        self.byzantine_log.len() as u64
    }

    pub fn byzantine_log(&self) -> impl Iterator<Item = &ByzantineRecord> {
        self.byzantine_log.iter()
    }
}

impl Default for ConsensusEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn engine_with_seven_peers() -> (ConsensusEngine, i64) {
        let mut engine = ConsensusEngine::new();
        for i in 1..=7 {
            engine.register_voter(format!("inst-{i}"), 1.0);
        }
        (engine, now())
    }

    #[test]
    fn byzantine_vote_scenario_matches_spec() {
        let (mut engine, t0) = engine_with_seven_peers();
        let proposal_id = engine.propose(
            ProposalKind::ParameterChange {
                key: "lr".into(),
                value: "0.01".into(),
            },
            "inst-1",
            t0,
        );

        let approvers = ["inst-1", "inst-2", "inst-3", "inst-4", "inst-5"];
        let mut outcome = None;
        for voter in approvers {
            outcome = engine
                .cast_vote(&proposal_id, voter, VoteDecision::Approve, "sig".into(), t0)
                .unwrap();
        }
        assert!(outcome.is_none());

        let outcome = engine
            .cast_vote(&proposal_id, "inst-6", VoteDecision::Reject, "sig".into(), t0)
            .unwrap()
            .expect("6/7 participation should finalize");

        assert_eq!(outcome.state, ProposalState::Approved);
        assert!((*outcome.reputation_deltas.get("inst-1").unwrap() - 0.06).abs() < 1e-9);
        assert!((*outcome.reputation_deltas.get("inst-6").unwrap() - (-0.01)).abs() < 1e-9);
        assert!((*outcome.reputation_deltas.get("inst-7").unwrap() - (-0.03)).abs() < 1e-9);
    }

    #[test]
    fn duplicate_vote_rejected() {
        let (mut engine, t0) = engine_with_seven_peers();
        let proposal_id = engine.propose(
            ProposalKind::ModelUpdate { round: 1 },
            "inst-1",
            t0,
        );
        engine
            .cast_vote(&proposal_id, "inst-1", VoteDecision::Approve, "sig".into(), t0)
            .unwrap();
        let second = engine.cast_vote(&proposal_id, "inst-1", VoteDecision::Approve, "sig".into(), t0);
        assert!(matches!(second, Err(CoreError::AlreadyVoted { .. })));
    }

    #[test]
    fn exclusion_proposal_requires_three_quarter_participation() {
        let (mut engine, t0) = engine_with_seven_peers();
        let proposal_id = engine.propose(
            ProposalKind::ParticipantExclusion {
                instance_id: "inst-7".into(),
            },
            "inst-1",
            t0,
        );
        for voter in ["inst-1", "inst-2", "inst-3", "inst-4", "inst-5"] {
            let outcome = engine
                .cast_vote(&proposal_id, voter, VoteDecision::Approve, "sig".into(), t0)
                .unwrap();
            assert!(outcome.is_none(), "5/7 < 3/4 participation should not finalize");
        }
    }

    #[test]
    fn byzantine_evidence_below_floor_triggers_auto_exclusion() {
        let (mut engine, t0) = engine_with_seven_peers();
        let proposal = engine.report_byzantine_evidence("inst-3", ByzantineSeverity::High, t0);
        assert!(proposal.is_none());
        let proposal = engine.report_byzantine_evidence("inst-3", ByzantineSeverity::High, t0);
        assert!(proposal.is_some());
        assert!(engine.reputation_of("inst-3").unwrap() < EXCLUSION_FLOOR);
    }

    #[test]
    fn byzantine_evidence_is_appended_to_ring_buffer() {
        let (mut engine, t0) = engine_with_seven_peers();
        engine.report_byzantine_evidence("inst-2", ByzantineSeverity::Low, t0);
        engine.report_byzantine_evidence("inst-4", ByzantineSeverity::Medium, t0 + 1);
        assert_eq!(engine.byzantine_event_count(), 2);
        let ids: Vec<&str> = engine.byzantine_log().map(|r| r.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["inst-2", "inst-4"]);
    }

    #[test]
    fn expire_overdue_marks_active_past_deadline() {
        let (mut engine, t0) = engine_with_seven_peers();
        let proposal_id = engine.propose_with_timeout(
            ProposalKind::ModelUpdate { round: 2 },
            "inst-1",
            t0,
            1_000,
        );
        let expired = engine.expire_overdue(t0 + 2_000);
        assert_eq!(expired, vec![proposal_id.clone()]);
        assert_eq!(engine.proposal(&proposal_id).unwrap().state, ProposalState::Expired);
    }
}
