mod fetch;
mod reset;
mod status;
mod validate;

use std::sync::Arc;

use leadgate_core::{
    ClassifiedError, CoreError, DateRange, JsonFileStore, RateLimiter, UpstreamPolicy,
};
use serde_json::Value;

use crate::cli::{Cli, Command, RangeArgs};
use crate::error::CliError;
use crate::metadata::{Envelope, RequestId};

/// Payload and optional failure produced by one command.
pub struct CommandResult {
    pub data: Value,
    pub error: Option<ClassifiedError>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self { data, error: None }
    }

    pub fn failed(data: Value, error: ClassifiedError) -> Self {
        Self {
            data,
            error: Some(error),
        }
    }
}

pub async fn run(cli: &Cli, request_id: RequestId) -> Result<Envelope, CliError> {
    let policy = UpstreamPolicy::from_env()?;

    let (name, result) = match &cli.command {
        Command::Validate(args) => ("validate", validate::run(args, &policy)?),
        Command::Fetch(args) => ("fetch", fetch::run(args, cli, policy).await?),
        Command::Status => ("status", status::run(&*open_limiter(cli, &policy)?)?),
        Command::Reset => ("reset", reset::run(&*open_limiter(cli, &policy)?)?),
    };

    tracing::debug!(command = name, ok = result.error.is_none(), "command finished");
    Ok(Envelope::new(request_id, name, result.data, result.error))
}

/// Rate limiter whose history lives in the configured state file.
fn open_limiter(cli: &Cli, policy: &UpstreamPolicy) -> Result<Arc<RateLimiter>, CoreError> {
    let store = Arc::new(JsonFileStore::new(&cli.state_file));
    let limiter = RateLimiter::with_store(policy.rate_limit, store)?;
    Ok(Arc::new(limiter))
}

fn parse_range(args: &RangeArgs) -> DateRange {
    DateRange::from_rfc3339(args.start.as_deref(), args.end.as_deref())
}
