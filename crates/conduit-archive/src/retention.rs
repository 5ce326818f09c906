//! Daily 03:00 local-time retention sweep. Implemented as a `tokio::time::interval` loop that
//! recomputes the delay to the next local 3 AM on every tick, rather than a
//! cron expression — there's exactly one scheduled event to model here, and
//! a cron parser would be a dependency with nothing else to do.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveTime, TimeZone};
use tracing::{info, warn};

use crate::manager::ArchiveStore;

/// How long archived messages are retained before the sweep purges them.
pub const DEFAULT_RETENTION: chrono::Duration = chrono::Duration::days(30);

/// Runs forever, sweeping `store` once every 24 hours at local 03:00. Spawn
/// this as its own task; it never returns under normal operation.
pub async fn run_daily_sweep(store: Arc<ArchiveStore>, retention: chrono::Duration) {
    loop {
        let delay = duration_until_next_3am();
        tokio::time::sleep(delay).await;

        match store.purge_older_than(retention) {
            Ok(deleted) => info!(deleted, "archive retention sweep completed"),
            Err(e) => warn!(error = %e, "archive retention sweep failed"),
        }
    }
}

fn duration_until_next_3am() -> Duration {
    let now = Local::now();
    let today_3am = Local
        .from_local_datetime(&now.date_naive().and_time(NaiveTime::from_hms_opt(3, 0, 0).unwrap()))
        .single();
    let next = match today_3am {
        Some(t) if t > now => t,
        Some(t) => t + chrono::Duration::days(1),
        None => now + chrono::Duration::hours(24),
    };
    (next - now).to_std().unwrap_or(Duration::from_secs(24 * 3600))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_until_next_3am_is_never_negative_or_over_a_day() {
        let delay = duration_until_next_3am();
        assert!(delay <= Duration::from_secs(24 * 3600 + 1));
    }
}
