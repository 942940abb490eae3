pub mod absence;
pub mod org;
pub mod policy;

use chrono::{DateTime, SubsecRound, Utc};

/// Current time at the microsecond precision timestamps are stored with.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
