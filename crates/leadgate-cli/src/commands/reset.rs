use leadgate_core::RateLimiter;
use serde_json::json;

use crate::error::CliError;

use super::CommandResult;

pub fn run(limiter: &RateLimiter) -> Result<CommandResult, CliError> {
    let before = limiter.block_state();
    limiter.reset();
    tracing::info!(was_blocked = before.is_blocked, "rate-limit state cleared");

    Ok(CommandResult::ok(json!({
        "reset": true,
        "was_blocked": before.is_blocked,
        "blocked_until": before.blocked_until,
    })))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use leadgate_core::{JsonFileStore, RateLimitConfig, RateLimitStore, UtcDateTime};
    use tempfile::tempdir;

    use super::*;
    use crate::commands::status;

    #[test]
    fn reset_clears_persisted_block() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("state.json");
        let now = UtcDateTime::now();

        let limiter = RateLimiter::with_store(
            RateLimitConfig::default(),
            Arc::new(JsonFileStore::new(&path)),
        )
        .expect("empty store loads");
        limiter.record_call(now, true);
        limiter.block_until(now.saturating_add(std::time::Duration::from_secs(600)));

        let result = run(&limiter).expect("reset runs");
        assert_eq!(result.data["was_blocked"], true);

        let snapshot = JsonFileStore::new(&path)
            .load()
            .expect("readable")
            .expect("state was saved");
        assert!(snapshot.calls.is_empty());
        assert_eq!(snapshot.blocked_until, None);

        let reopened = RateLimiter::with_store(
            RateLimitConfig::default(),
            Arc::new(JsonFileStore::new(&path)),
        )
        .expect("saved store loads");
        let status = status::run(&reopened).expect("status runs");
        assert_eq!(status.data["status"]["blocked"], false);
        assert_eq!(status.data["limits"]["max_per_hour"], 12);
    }
}
