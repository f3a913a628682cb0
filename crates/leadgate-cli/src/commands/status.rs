use leadgate_core::{RateLimiter, UtcDateTime};
use serde_json::json;

use crate::error::CliError;

use super::CommandResult;

pub fn run(limiter: &RateLimiter) -> Result<CommandResult, CliError> {
    let config = limiter.config();
    let status = limiter.status(UtcDateTime::now());

    Ok(CommandResult::ok(json!({
        "status": status,
        "limits": {
            "min_interval_secs": config.min_interval.as_secs(),
            "max_per_minute": config.max_per_minute,
            "max_per_hour": config.max_per_hour,
            "block_secs": config.block_duration.as_secs(),
        },
    })))
}
