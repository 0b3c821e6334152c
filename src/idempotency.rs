//! Idempotency key derivation for consultation requests
//!
//! Duplicate "request consultation" taps are a fact of life on chat
//! platforms: clients double-tap, the transport redelivers, handlers race.
//! The request key collapses all submissions for one client/advisor pair
//! within a 60-second bucket onto a single value, so the second insert is
//! rejected by the store's unique index instead of creating a twin session.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::session::UserId;

/// Width of the dedup window in seconds
const BUCKET_SECONDS: i64 = 60;

/// Derive the idempotency key for a consultation request
///
/// Pure function of its inputs: two calls for the same client/advisor pair
/// within the same 60-second bucket produce the same key; any later bucket
/// produces a different one. No side effects.
///
/// # Arguments
///
/// * `client` - The requesting client's user id
/// * `advisor` - The requested advisor's user id
/// * `now` - Submission time
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use consultd::idempotency::request_key;
///
/// let t = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 5).unwrap();
/// let again = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 55).unwrap();
/// assert_eq!(request_key(1, 2, t), request_key(1, 2, again));
/// ```
pub fn request_key(client: UserId, advisor: UserId, now: DateTime<Utc>) -> String {
    let bucket = now.timestamp().div_euclid(BUCKET_SECONDS);

    let mut hasher = Sha256::new();
    hasher.update(client.to_le_bytes());
    hasher.update(advisor.to_le_bytes());
    hasher.update(bucket.to_le_bytes());
    let digest = hasher.finalize();

    // 16 bytes of digest is plenty for a dedup token; the store index
    // only needs equality, not cryptographic length.
    let mut key = String::with_capacity(3 + 32);
    key.push_str("rq-");
    for byte in &digest[..16] {
        key.push_str(&format!("{:02x}", byte));
    }
    key
}
