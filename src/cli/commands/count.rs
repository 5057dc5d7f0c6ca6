//! hystore count - Count stored documents

use clap::Args;

use crate::app::AppContext;
use crate::cli::output::{emit_robot, robot_ok};
use crate::error::Result;
use crate::storage::Writer;

#[derive(Args, Debug)]
pub struct CountArgs {}

pub async fn run(ctx: &AppContext, _args: &CountArgs) -> Result<()> {
    let backend = ctx.backend()?;
    let result = backend.store().count().await;
    backend.close().await;
    let count = result?;

    if ctx.robot_mode {
        emit_robot(&robot_ok(serde_json::json!({
            "table": backend.store().layout().table.to_string(),
            "count": count,
        })))
    } else {
        println!("{count}");
        Ok(())
    }
}
