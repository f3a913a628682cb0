use std::time::Duration;

use leadgate_core::{
    AccessError, AccessGateway, CacheMode, ConnectionSettings, LeadQuery, ReqwestTransport,
    UpstreamPolicy,
};
use serde_json::{json, Value};

use crate::cli::{Cli, FetchArgs};
use crate::error::CliError;

use super::{open_limiter, parse_range, CommandResult};

pub async fn run(
    args: &FetchArgs,
    cli: &Cli,
    policy: UpstreamPolicy,
) -> Result<CommandResult, CliError> {
    let settings = ConnectionSettings::from_env();
    let mut transport = ReqwestTransport::new(settings.require_base_url()?)
        .with_timeout(Duration::from_millis(args.timeout_ms));
    if let Some(api_key) = &settings.api_key {
        transport = transport.with_api_key(api_key);
    }

    let limiter = open_limiter(cli, &policy)?;
    let gateway = AccessGateway::new(transport, policy).with_rate_limiter(limiter);
    let query = LeadQuery::new(parse_range(&args.range))
        .with_page(args.page)
        .with_cache_mode(cache_mode(args));

    match gateway.check_and_call(&query).await {
        Ok(success) => Ok(CommandResult::ok(serde_json::to_value(success)?)),
        Err(error) => {
            let data = failure_data(&error);
            Ok(CommandResult::failed(data, error.classified()))
        }
    }
}

fn cache_mode(args: &FetchArgs) -> CacheMode {
    if args.no_cache {
        CacheMode::Bypass
    } else if args.refresh {
        CacheMode::Refresh
    } else {
        CacheMode::Use
    }
}

fn failure_data(error: &AccessError) -> Value {
    match error {
        AccessError::Compliance { result } => json!({ "violations": result.violations }),
        AccessError::RateLimited { decision, .. } => json!({ "decision": decision }),
        AccessError::Upstream { attempts, .. } => json!({ "attempts": attempts }),
    }
}
