use leadgate_core::{AccessError, UpstreamPolicy, UtcDateTime, ViolationKind};
use serde_json::json;

use crate::cli::RangeArgs;
use crate::error::CliError;

use super::{parse_range, CommandResult};

pub fn run(args: &RangeArgs, policy: &UpstreamPolicy) -> Result<CommandResult, CliError> {
    let range = parse_range(args);
    let result = policy.compliance.validate(&range, UtcDateTime::now());

    // Long but otherwise valid ranges can be fetched window by window.
    let windows = if result.has(ViolationKind::RangeTooLong) && result.violations.len() == 1 {
        policy.compliance.split(&range)
    } else {
        Vec::new()
    };

    let data = json!({
        "range": range,
        "valid": result.valid,
        "violations": result.violations,
        "suggested_windows": windows,
    });

    if result.valid {
        Ok(CommandResult::ok(data))
    } else {
        let error = AccessError::Compliance { result }.classified();
        Ok(CommandResult::failed(data, error))
    }
}
