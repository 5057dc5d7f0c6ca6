//! hystore write - Write documents from JSON Lines

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use clap::Args;
use tracing::info;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_human, emit_robot, robot_ok};
use crate::document::{Document, DuplicatePolicy};
use crate::error::{Result, StoreError};
use crate::storage::{IndexManager, Writer};

#[derive(Args, Debug)]
pub struct WriteArgs {
    /// JSON Lines file, one document per line (`-` for stdin)
    pub file: PathBuf,

    /// What to do when a document id already exists
    #[arg(long, default_value = "fail")]
    pub policy: DuplicatePolicy,
}

pub async fn run(ctx: &AppContext, args: &WriteArgs) -> Result<()> {
    let documents = read_documents(&args.file)?;
    let submitted = documents.len();

    let backend = ctx.backend()?;
    let result = async {
        backend.schema().bootstrap().await?;
        backend.store().write(documents, args.policy).await
    }
    .await;
    backend.close().await;
    let written = result?;

    info!(submitted, written, policy = %args.policy, "write finished");
    if ctx.robot_mode {
        emit_robot(&robot_ok(serde_json::json!({
            "submitted": submitted,
            "written": written,
            "policy": args.policy,
        })))
    } else {
        let mut out = HumanLayout::new();
        out.title("Write")
            .kv("Submitted", &submitted.to_string())
            .kv("Written", &written.to_string())
            .kv("Policy", args.policy.as_str());
        emit_human(out);
        Ok(())
    }
}

/// Parse every line up front so a malformed file writes nothing.
pub fn read_documents(path: &Path) -> Result<Vec<Document>> {
    let reader: Box<dyn BufRead> = if path == Path::new("-") {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        Box::new(BufReader::new(std::fs::File::open(path)?))
    };
    parse_lines(reader)
}

fn parse_lines(reader: impl BufRead) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let document = serde_json::from_str(&line).map_err(|err| {
            StoreError::Validation(format!("line {}: not a document: {err}", index + 1))
        })?;
        documents.push(document);
    }
    Ok(documents)
}
