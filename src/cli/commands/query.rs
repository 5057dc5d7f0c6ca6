//! hystore query - Vector, lexical or hybrid retrieval

use std::path::PathBuf;

use clap::Args;

use crate::app::AppContext;
use crate::cli::commands::parse_filter;
use crate::cli::output::{HumanLayout, emit_human, emit_robot, robot_ok};
use crate::config::SimilarityFunction;
use crate::document::{Document, validate_embedding};
use crate::error::{Result, StoreError};
use crate::search::QueryRequest;

const PREVIEW_CHARS: usize = 120;

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Query text for lexical ranking
    #[arg(long, short)]
    pub text: Option<String>,

    /// Query embedding as a JSON array
    #[arg(long, conflicts_with = "embedding_file")]
    pub embedding: Option<String>,

    /// File holding the query embedding as a JSON array
    #[arg(long)]
    pub embedding_file: Option<PathBuf>,

    /// Filter as JSON (structured form or flat metadata map)
    #[arg(long, short)]
    pub filter: Option<String>,

    /// Maximum number of results (default: fusion.top_k)
    #[arg(long, short = 'k')]
    pub top_k: Option<usize>,

    /// Similarity function for this query only
    #[arg(long)]
    pub function: Option<SimilarityFunction>,

    /// Include embeddings in robot output
    #[arg(long)]
    pub with_embeddings: bool,
}

pub async fn run(ctx: &AppContext, args: &QueryArgs) -> Result<()> {
    let request = build_request(ctx, args)?;

    let backend = ctx.backend()?;
    let result = async {
        let search = backend.search(args.function).await?;
        search.query(request).await
    }
    .await;
    backend.close().await;
    let mut documents = result?;

    if ctx.robot_mode {
        if !args.with_embeddings {
            for doc in &mut documents {
                doc.embedding = None;
            }
        }
        emit_robot(&robot_ok(serde_json::json!({
            "count": documents.len(),
            "documents": documents,
        })))
    } else {
        emit_human(human_results(&documents));
        Ok(())
    }
}

/// Everything a query needs, checked before a connection is opened.
fn build_request(ctx: &AppContext, args: &QueryArgs) -> Result<QueryRequest> {
    let filter = parse_filter(args.filter.as_deref())?;
    let embedding = match (&args.embedding, &args.embedding_file) {
        (Some(raw), _) => Some(parse_embedding(raw)?),
        (None, Some(path)) => Some(parse_embedding(&std::fs::read_to_string(path)?)?),
        (None, None) => None,
    };
    if let Some(embedding) = &embedding {
        validate_embedding(embedding, ctx.config.store.embedding_dimension as usize)?;
    }
    if embedding.is_none() && args.text.is_none() {
        return Err(StoreError::Validation(
            "query needs --text, --embedding or --embedding-file".to_string(),
        ));
    }

    Ok(QueryRequest {
        filter,
        embedding,
        text: args.text.clone(),
        top_k: args.top_k.unwrap_or(ctx.config.fusion.top_k),
    })
}

fn parse_embedding(raw: &str) -> Result<Vec<f32>> {
    serde_json::from_str(raw.trim()).map_err(|err| {
        StoreError::Validation(format!("embedding must be a JSON array of numbers: {err}"))
    })
}

fn human_results(documents: &[Document]) -> HumanLayout {
    let mut out = HumanLayout::new();
    out.title(&format!("{} result(s)", documents.len()));
    for (rank, doc) in documents.iter().enumerate() {
        let score = doc.score.map_or_else(|| "-".to_string(), |s| format!("{s:.4}"));
        out.section(&format!("{}. {}", rank + 1, doc.id))
            .kv("Score", &score);
        if let Some(content) = &doc.content {
            out.kv("Content", &preview(content));
        }
        if !doc.meta.is_empty() {
            out.kv("Meta", &serde_json::Value::Object(doc.meta.clone()).to_string());
        }
        out.blank();
    }
    out
}

fn preview(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    }
}
