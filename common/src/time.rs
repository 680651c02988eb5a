// Time types used across the chain.
//
// SystemTime::now() is non-deterministic and must never decide a
// consensus outcome. The only sanctioned use is the admission bound on
// block timestamps (max clock skew), logging and metrics. Everything
// else keys off block heights or block timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

// Seconds timestamps used to determine it using its type
pub type TimestampSeconds = u64;

// Return timestamp in seconds
// SAFETY: only used for the clock-skew admission bound, never for
// deterministic consensus computation
pub fn get_current_time_in_seconds() -> TimestampSeconds {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Incorrect time returned from SystemTime")
        .as_secs()
}
