use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use threatrag::llm::LlmProvider;
use threatrag::models::{AssembledContext, Document, Query, ValidationReport};
use threatrag::processing::IngestReport;
use threatrag::{Config, ThreatRag};

#[derive(Parser)]
#[command(name = "threatrag")]
#[command(about = "Hybrid retrieval and grounding checks over threat intelligence documents")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a JSONL file of documents and answer one question against it
    Ask {
        /// File with one JSON document per line
        #[arg(long)]
        docs: PathBuf,

        question: String,

        /// Restrict to chunks attributed to this threat actor (repeatable)
        #[arg(long)]
        actor: Vec<String>,

        /// Restrict to chunks tagged with this ATT&CK technique (repeatable)
        #[arg(long)]
        technique: Vec<String>,

        #[arg(long)]
        min_confidence: Option<f64>,

        #[arg(long)]
        top_k: Option<usize>,

        /// Generate an answer with the configured LLM and validate it
        #[arg(long)]
        generate: bool,
    },
}

#[derive(Serialize)]
struct AskOutput {
    ingest: IngestReport,
    context: AssembledContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<ValidationReport>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "threatrag=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env();
    tracing::info!("Loading embedding model: {}...", config.embeddings.model);

    match args.command {
        Command::Ask {
            docs,
            question,
            actor,
            technique,
            min_confidence,
            top_k,
            generate,
        } => {
            let llm = LlmProvider::new(config.llm.as_ref(), &config.retry)
                .with_system_prompt(threatrag::llm::prompts::ANALYST_SYSTEM_PROMPT);
            if generate && !llm.is_available() {
                tracing::warn!("LLM unavailable - answer generation will fail");
            }

            let rag = ThreatRag::from_config(config)?;
            let documents = load_documents(&docs).await?;
            let ingest = rag.ingest_batch(documents).await;

            let mut query = Query::new(question);
            query.filter.actors = actor;
            query.filter.techniques = technique;
            query.filter.min_confidence = min_confidence;
            query.top_k = top_k;

            let output = if generate {
                let cancel = CancellationToken::new();
                let ctrl_c = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        ctrl_c.cancel();
                    }
                });

                let attributed = rag.answer(&query, &llm, &cancel).await?;
                AskOutput {
                    ingest,
                    context: attributed.context,
                    answer: Some(attributed.answer),
                    report: Some(attributed.report),
                }
            } else {
                AskOutput {
                    ingest,
                    context: rag.query(&query).await?,
                    answer: None,
                    report: None,
                }
            };

            println!("{}", serde_json::to_string_pretty(&output)?);
            tracing::info!(stats = ?rag.stats(), "Done");
        }
    }

    Ok(())
}

async fn load_documents(path: &Path) -> anyhow::Result<Vec<Document>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid document", path.display(), n + 1))
        })
        .collect()
}
