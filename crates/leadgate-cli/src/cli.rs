//! CLI argument definitions for leadgate.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `validate` | Check a date range against the upstream compliance rules |
//! | `fetch` | Fetch one page of leads through the access gateway |
//! | `status` | Show persisted rate-limit state |
//! | `reset` | Clear rate-limit history and any active block |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--verbose` | `false` | Log at debug level to stderr |
//! | `--state-file` | `leadgate-state.json` | Rate-limit state file |
//!
//! # Examples
//!
//! ```bash
//! leadgate validate --start 2024-03-01T00:00:00Z --end 2024-03-20T00:00:00Z
//! LEADGATE_BASE_URL=https://leads.example.com/v1/leads leadgate fetch \
//!     --start 2024-03-01T00:00:00Z --end 2024-03-07T00:00:00Z --pretty
//! leadgate status
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Compliance-aware, rate-limited access to the upstream lead API.
#[derive(Debug, Parser)]
#[command(name = "leadgate", author, version, about)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Log decisions at debug level (overrides RUST_LOG).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// File holding rate-limit history between invocations.
    #[arg(
        long,
        global = true,
        env = "LEADGATE_STATE_FILE",
        default_value = "leadgate-state.json"
    )]
    pub state_file: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check a date range without calling the upstream.
    Validate(RangeArgs),

    /// Fetch one page of leads.
    ///
    /// Requires LEADGATE_BASE_URL; LEADGATE_API_KEY is sent when set.
    Fetch(FetchArgs),

    /// Show rate-limit counters and block state.
    Status,

    /// Clear rate-limit history and any active block.
    Reset,
}

#[derive(Debug, Clone, Args)]
pub struct RangeArgs {
    /// Range start (RFC3339 UTC, e.g. 2024-03-01T00:00:00Z).
    #[arg(long)]
    pub start: Option<String>,

    /// Range end (RFC3339 UTC).
    #[arg(long)]
    pub end: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct FetchArgs {
    #[command(flatten)]
    pub range: RangeArgs,

    /// Result page to fetch.
    #[arg(long, default_value_t = 1)]
    pub page: u32,

    /// Request timeout in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub timeout_ms: u64,

    /// Skip the response cache entirely.
    #[arg(long, default_value_t = false, conflicts_with = "refresh")]
    pub no_cache: bool,

    /// Ignore cached responses but store the new one.
    #[arg(long, default_value_t = false)]
    pub refresh: bool,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parses_fetch_with_range_and_flags() {
        let cli = Cli::try_parse_from([
            "leadgate",
            "fetch",
            "--start",
            "2024-03-01T00:00:00Z",
            "--end",
            "2024-03-02T00:00:00Z",
            "--page",
            "2",
            "--refresh",
            "--pretty",
        ])
        .expect("valid arguments");

        assert!(cli.pretty);
        match cli.command {
            Command::Fetch(args) => {
                assert_eq!(args.page, 2);
                assert!(args.refresh);
                assert!(!args.no_cache);
                assert_eq!(args.range.start.as_deref(), Some("2024-03-01T00:00:00Z"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn refresh_conflicts_with_no_cache() {
        let result = Cli::try_parse_from(["leadgate", "fetch", "--refresh", "--no-cache"]);
        assert!(result.is_err());
    }

    #[test]
    fn validate_accepts_missing_bounds() {
        let cli = Cli::try_parse_from(["leadgate", "validate", "--end", "2024-03-02T00:00:00Z"])
            .expect("bounds are optional");

        match cli.command {
            Command::Validate(args) => assert_eq!(args.start, None),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
