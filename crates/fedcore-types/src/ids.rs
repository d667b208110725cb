use chrono::Utc;
use rand::Rng;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// 9-character base36 random suffix shared by the message- and proposal-id
/// grammars (spec §6).
fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..9)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

fn unix_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// `<sender_id>_<unix_millis>_<9-char-base36-random>`
pub fn new_message_id(sender_id: &str) -> String {
    format!("{sender_id}_{}_{}", unix_millis(), random_suffix())
}

/// `proposal_<proposer>_<unix_millis>_<9-char-base36-random>`
pub fn new_proposal_id(proposer: &str) -> String {
    format!("proposal_{proposer}_{}_{}", unix_millis(), random_suffix())
}
