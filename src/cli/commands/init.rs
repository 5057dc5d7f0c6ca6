//! hystore init - Bootstrap extensions, table and indexes

use clap::Args;

use crate::app::{AppContext, Backend};
use crate::cli::output::{HumanLayout, emit_human, emit_robot, robot_ok};
use crate::error::Result;
use crate::storage::{IndexManager, IndexSettings};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Drop and recreate the table. Destroys all stored documents.
    #[arg(long)]
    pub recreate_table: bool,

    /// Drop and rebuild the ANN index
    #[arg(long)]
    pub recreate_index: bool,
}

pub async fn run(ctx: &AppContext, args: &InitArgs) -> Result<()> {
    let index = IndexSettings {
        recreate_if_exists: ctx.index.recreate_if_exists || args.recreate_index,
        ..ctx.index
    };
    let recreate_table = ctx.config.store.recreate_table || args.recreate_table;
    let backend = Backend::open(&ctx.config, index, recreate_table)?;

    let result = backend.schema().bootstrap().await;
    backend.close().await;
    result?;

    let layout = backend.schema().layout();
    if ctx.robot_mode {
        emit_robot(&robot_ok(serde_json::json!({
            "table": layout.table.to_string(),
            "dimension": layout.dimension,
            "vector_type": layout.vector_type,
            "function": index.function,
            "strategy": index.strategy,
            "lists": index.lists,
            "probes": index.probes,
            "ann_index": layout.table.ann_index_name(),
            "lexical_index": layout.table.lexical_index_name(),
            "recreated_table": recreate_table,
        })))
    } else {
        let mut out = HumanLayout::new();
        out.title("Store ready")
            .kv("Table", &layout.table.to_string())
            .kv("Dimension", &layout.dimension.to_string())
            .kv("Vector type", layout.vector_type.as_str())
            .kv("Function", index.function.as_str())
            .kv("Strategy", index.strategy.as_str())
            .kv("Lexical index", &layout.table.lexical_index_name());
        if recreate_table {
            out.blank().push_line("Table was dropped and recreated.");
        }
        emit_human(out);
        Ok(())
    }
}
