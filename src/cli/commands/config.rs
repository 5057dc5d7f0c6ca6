//! hystore config - Show the effective configuration

use clap::Args;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_human, emit_robot, robot_ok};
use crate::error::{Result, StoreError};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Print the configuration as TOML
    #[arg(long)]
    pub toml: bool,
}

pub fn run(ctx: &AppContext, args: &ConfigArgs) -> Result<()> {
    let config = ctx.config.redacted();

    if ctx.robot_mode {
        return emit_robot(&robot_ok(serde_json::json!({
            "path": ctx.config_path,
            "config": config,
            "effective_index": {
                "function": ctx.index.function,
                "strategy": ctx.index.strategy,
                "lists": ctx.index.lists,
                "probes": ctx.index.probes,
                "epsilon": ctx.index.epsilon,
            },
        })));
    }

    if args.toml {
        let rendered = toml::to_string_pretty(&config)
            .map_err(|err| StoreError::Config(format!("render config: {err}")))?;
        print!("{rendered}");
        return Ok(());
    }

    let path = ctx
        .config_path
        .as_ref()
        .map_or_else(|| "(none)".to_string(), |p| p.display().to_string());
    let mut out = HumanLayout::new();
    out.title("hystore configuration")
        .kv("Config file", &path)
        .kv(
            "Connection",
            config.connection.url.as_deref().unwrap_or("(unset)"),
        )
        .kv("Table", &format!("{}.{}", config.store.schema, config.store.table))
        .kv("Dimension", &config.store.embedding_dimension.to_string())
        .kv("Vector type", config.store.vector_type.as_str())
        .blank()
        .section("Index")
        .kv("Function", ctx.index.function.as_str())
        .kv("Strategy", ctx.index.strategy.as_str())
        .kv("Lists", &ctx.index.lists.to_string())
        .kv("Probes", &ctx.index.probes.to_string())
        .kv("Epsilon", &ctx.index.epsilon.to_string())
        .blank()
        .section("Lexical")
        .kv("Tokenizer", &config.lexical.tokenizer)
        .blank()
        .section("Fusion")
        .kv("k", &config.fusion.k.to_string())
        .kv("Top k", &config.fusion.top_k.to_string());
    emit_human(out);
    Ok(())
}
