//! Deterministic participant ranking (spec §4.C).

/// `accuracy · ln(sample_count + 1) · reputation`, descending; ties broken
/// by `instance_id` lexicographic order.
pub fn score(accuracy: f64, sample_count: u64, reputation: f64) -> f64 {
    accuracy * ((sample_count as f64) + 1.0).ln() * reputation
}

/// Ranks `(instance_id, accuracy, sample_count, reputation)` candidates and
/// returns up to `max_participants` ids, highest score first.
pub fn select_top(
    mut candidates: Vec<(String, f64, u64, f64)>,
    max_participants: usize,
) -> Vec<String> {
    candidates.sort_by(|a, b| {
        let score_a = score(a.1, a.2, a.3);
        let score_b = score(b.1, b.2, b.3);
        score_b
            .partial_cmp(&score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    candidates
        .into_iter()
        .take(max_participants)
        .map(|(id, _, _, _)| id)
        .collect()
}
