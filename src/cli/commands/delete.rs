//! hystore delete - Delete documents by filter or id

use clap::Args;

use crate::app::AppContext;
use crate::cli::commands::parse_filter;
use crate::cli::output::{emit_robot, robot_ok};
use crate::error::{Result, StoreError};
use crate::storage::Writer;

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Delete documents matching this JSON filter
    #[arg(long, short, conflicts_with = "id")]
    pub filter: Option<String>,

    /// Delete documents with these ids
    #[arg(long, num_args = 1..)]
    pub id: Vec<String>,

    /// Allow deleting every document (an empty filter)
    #[arg(long)]
    pub all: bool,
}

pub async fn run(ctx: &AppContext, args: &DeleteArgs) -> Result<()> {
    let target = Target::from_args(args)?;

    let backend = ctx.backend()?;
    let result = match &target {
        Target::Ids(ids) => backend.store().delete_documents(ids).await,
        Target::Filter(filter) => backend.store().delete_by_filter(filter.as_ref()).await,
    };
    backend.close().await;
    let deleted = result?;

    if ctx.robot_mode {
        emit_robot(&robot_ok(serde_json::json!({ "deleted": deleted })))
    } else {
        println!("Deleted {deleted} document(s).");
        Ok(())
    }
}

#[derive(Debug)]
enum Target {
    Ids(Vec<String>),
    Filter(Option<crate::filter::Filter>),
}

impl Target {
    fn from_args(args: &DeleteArgs) -> Result<Self> {
        if !args.id.is_empty() {
            return Ok(Self::Ids(args.id.clone()));
        }
        let filter = parse_filter(args.filter.as_deref())?;
        if filter.is_none() && !args.all {
            return Err(StoreError::Validation(
                "refusing to delete every document without --all".to_string(),
            ));
        }
        Ok(Self::Filter(filter))
    }
}
