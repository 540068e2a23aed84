//! Human-readable payment references: `PAY-<unix millis>-<9 base36 chars>`.

use chrono::{DateTime, Utc};
use rand::Rng;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 9;

pub fn generate(now: DateTime<Utc>) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();
    format!("PAY-{}-{suffix}", now.timestamp_millis())
}
