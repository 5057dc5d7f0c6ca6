//! CLI command implementations
//!
//! Each subcommand has its own module with:
//! - Args struct for command-line arguments
//! - run() function to execute the command

use clap::Subcommand;

pub mod config;
pub mod count;
pub mod delete;
pub mod init;
pub mod query;
pub mod write;

use crate::app::AppContext;
use crate::error::{Result, StoreError};
use crate::filter::Filter;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create extensions, the table and both indexes
    Init(init::InitArgs),

    /// Write documents from a JSON Lines file
    Write(write::WriteArgs),

    /// Vector, lexical or hybrid query
    Query(query::QueryArgs),

    /// Delete documents by filter or id
    Delete(delete::DeleteArgs),

    /// Count stored documents
    Count(count::CountArgs),

    /// Print the effective configuration
    Config(config::ConfigArgs),
}

/// Dispatch a command to its handler
pub async fn run(ctx: &AppContext, command: &Commands) -> Result<()> {
    match command {
        Commands::Init(args) => init::run(ctx, args).await,
        Commands::Write(args) => write::run(ctx, args).await,
        Commands::Query(args) => query::run(ctx, args).await,
        Commands::Delete(args) => delete::run(ctx, args).await,
        Commands::Count(args) => count::run(ctx, args).await,
        Commands::Config(args) => config::run(ctx, args),
    }
}

/// Parse a `--filter` argument. `{}` means no filter.
pub(crate) fn parse_filter(raw: Option<&str>) -> Result<Option<Filter>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|err| StoreError::Validation(format!("--filter is not valid JSON: {err}")))?;
    Ok(Filter::parse_request(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_argument_parses_or_fails_early() {
        assert!(parse_filter(None).unwrap().is_none());
        assert!(parse_filter(Some("{}")).unwrap().is_none());

        let filter = parse_filter(Some(
            r#"{"field": "meta.lang", "operator": "==", "value": "en"}"#,
        ))
        .unwrap();
        assert_eq!(filter, Some(Filter::eq("meta.lang", "en")));

        assert!(matches!(
            parse_filter(Some("{not json")),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            parse_filter(Some(r#"{"field": "meta.x", "operator": "~", "value": 1}"#)),
            Err(StoreError::Filter(_))
        ));
    }
}
