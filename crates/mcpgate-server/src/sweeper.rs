//! Background purge of expired facade state.
//!
//! Expiry is always checked on use; the sweeper only bounds memory.

use mcpgate_auth::OAuthFacade;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// Default time between purges.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn a task that purges expired entries every `every`.
///
/// The task runs until aborted.
pub fn spawn_sweeper(facade: OAuthFacade, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = facade.purge_expired().await {
                warn!(error = %e, "Failed to purge expired state");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use mcpgate_test_utils::TestFacade;

    #[tokio::test]
    async fn test_sweeper_purges_expired_tokens() {
        let t = TestFacade::new();
        t.issue_token().await;
        assert_eq!(t.store.token_count().await, 1);

        // Past both the access token and the refresh grant lifetimes.
        t.clock.advance(ChronoDuration::days(31));

        let handle = spawn_sweeper(t.facade.clone(), Duration::from_millis(10));
        for _ in 0..100 {
            if t.store.token_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(t.store.token_count().await, 0);
    }
}
