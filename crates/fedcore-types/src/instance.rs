use serde::{Deserialize, Serialize};

/// Lifecycle state of a registered participant (spec §3, §4.D peer
/// lifecycle).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InstanceStatus {
    Active,
    Inactive,
    Removed,
}

/// A federation participant known to this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub public_key: Vec<u8>,
    pub status: InstanceStatus,
    pub reputation: f64,
    pub joined_at_ms: i64,
    pub last_seen_ms: i64,
}

impl Instance {
    pub fn new(id: impl Into<String>, public_key: Vec<u8>, now_ms: i64) -> Self {
        Self {
            id: id.into(),
            public_key,
            status: InstanceStatus::Active,
            reputation: 1.0,
            joined_at_ms: now_ms,
            last_seen_ms: now_ms,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == InstanceStatus::Active
    }
}

/// Rolling per-participant history used by analytics and participant
/// selection scoring (spec §5, §4.C).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticipantHistory {
    pub rounds_invited: u64,
    pub rounds_completed: u64,
    pub rounds_missed: u64,
    pub total_privacy_spent: f64,
}

impl ParticipantHistory {
    pub fn completion_rate(&self) -> f64 {
        if self.rounds_invited == 0 {
            return 1.0;
        }
        self.rounds_completed as f64 / self.rounds_invited as f64
    }

    pub fn record_invited(&mut self) {
        self.rounds_invited += 1;
    }

    pub fn record_completed(&mut self, privacy_spent: f64) {
        self.rounds_completed += 1;
        self.total_privacy_spent += privacy_spent;
    }

    pub fn record_missed(&mut self) {
        self.rounds_missed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_instance_is_active() {
        let inst = Instance::new("inst-1", vec![1, 2, 3], 0);
        assert!(inst.is_active());
        assert_eq!(inst.reputation, 1.0);
    }

    #[test]
    fn completion_rate_with_no_history_is_one() {
        let history = ParticipantHistory::default();
        assert_eq!(history.completion_rate(), 1.0);
    }

    #[test]
    fn completion_rate_tracks_invited_vs_completed() {
        let mut history = ParticipantHistory::default();
        history.record_invited();
        history.record_invited();
        history.record_completed(0.1);
        assert_eq!(history.completion_rate(), 0.5);
    }
}
