//! Connection supervisor: runs `connect_once`
//! until stopped, backing off exponentially between attempts and giving up
//! after `BRIDGE_RECONNECT_MAX_ATTEMPTS`.

use std::sync::Arc;
use std::time::Duration;

use conduit_core::config::{
    BRIDGE_RECONNECT_CAP_SECS, BRIDGE_RECONNECT_INITIAL_SECS, BRIDGE_RECONNECT_JITTER_FRACTION,
    BRIDGE_RECONNECT_MAX_ATTEMPTS, BRIDGE_RECONNECT_MULTIPLIER,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::session::BridgeSession;

/// Compute the backoff delay for the given 1-indexed attempt number,
/// deterministic jitter derived from the current instant (matches the
/// approach `conduit-channels::manager` already uses, so no `rand` crate is
/// introduced for a single call site).
pub fn backoff_delay(attempt: u32) -> Duration {
    let base = (BRIDGE_RECONNECT_INITIAL_SECS as f64) * BRIDGE_RECONNECT_MULTIPLIER.powi(attempt.saturating_sub(1) as i32);
    let capped = base.min(BRIDGE_RECONNECT_CAP_SECS as f64);
    let jitter_span = capped * BRIDGE_RECONNECT_JITTER_FRACTION;
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let signed_jitter = if jitter_span > 0.0 {
        (nanos as f64 / u32::MAX as f64) * (2.0 * jitter_span) - jitter_span
    } else {
        0.0
    };
    Duration::from_secs_f64((capped + signed_jitter).max(0.0))
}

/// Run `connect_once` repeatedly until `shutdown` fires or the attempt cap
/// is reached, at which point `reconnect_exhausted` is logged and the loop
/// exits. Each successful connect resets the attempt counter.
pub async fn supervise<F, Fut>(session: Arc<BridgeSession>, shutdown: CancellationToken, mut connect_once: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), crate::error::BridgeError>>,
{
    loop {
        if shutdown.is_cancelled() {
            info!("bridge reconnect supervisor: shutdown requested");
            return;
        }

        match connect_once().await {
            Ok(()) => {
                session.reset_reconnect_attempts();
                info!("bridge connection closed cleanly");
            }
            Err(e) => {
                warn!(error = %e, "bridge connection attempt failed");
            }
        }

        if shutdown.is_cancelled() {
            return;
        }

        let attempt = session.note_reconnect_attempt();
        if attempt > BRIDGE_RECONNECT_MAX_ATTEMPTS {
            warn!(attempts = attempt, "reconnect_exhausted");
            return;
        }

        let delay = backoff_delay(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_caps_at_thirty_seconds() {
        for attempt in 1..=10 {
            let delay = backoff_delay(attempt);
            assert!(delay.as_secs_f64() <= 30.0 * 1.25 + 0.001);
        }
    }

    #[test]
    fn backoff_grows_with_attempt_number() {
        let early = backoff_delay(1).as_secs_f64();
        let later = backoff_delay(4).as_secs_f64();
        assert!(later > early);
    }
}
