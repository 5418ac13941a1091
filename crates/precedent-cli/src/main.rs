mod config;
mod display;
mod ingest;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use precedent_ai::{EmbeddingService, OpenAiEmbedder, ProviderSelector};
use precedent_core::{Chunker, ConfidenceAssessor, ConfigError, ProviderName, Settings};
use precedent_rag::{
    IndexHealth, QueryRequest, QueryService, QueryWorkflow, Retriever, WorkflowOptions,
};
use precedent_store::{
    InMemorySessionStore, PineconeControlPlane, PineconeIndex, ServerlessSpec, VectorIndex,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{IndexArgs, IndexBackend, SettingsArgs};
use crate::display::AnswerCard;

#[derive(Parser)]
#[command(
    name = "precedent",
    version,
    about = "Case-law research assistant with cited, confidence-scored answers"
)]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,

    #[command(flatten)]
    index: IndexArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask one question and print the answer
    Ask {
        question: String,

        /// Session id; reuse it to ask follow-ups
        #[arg(long)]
        session: Option<String>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,

        /// Only retrieve passages from this court
        #[arg(long)]
        court: Option<String>,

        /// Only retrieve passages tagged with this topic
        #[arg(long)]
        topic: Option<String>,
    },
    /// Interactive session on stdin (/reset clears history, /quit exits)
    Chat {
        #[arg(long)]
        session: Option<String>,
    },
    /// Report index reachability and stats as JSON
    Health,
    /// Chunk, embed, and index a JSON array of case documents
    Ingest { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Must run before parsing so `.env` values reach clap's env fallback.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing();
    if let Ok(path) = &dotenv {
        debug!(path = %path.display(), "loaded .env");
    }

    let settings = cli.settings.to_settings();
    settings.validate()?;
    info!("precedent v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Ask {
            question,
            session,
            json,
            court,
            topic,
        } => {
            let service = build_service(&settings, &cli.index).await?;
            let mut request = QueryRequest::new(question, session.unwrap_or_else(default_session));
            if let Some(court) = court {
                request.filter.insert("court".into(), court);
            }
            if let Some(topic) = topic {
                request.filter.insert("topic".into(), topic);
            }

            let response = service.ask(request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", AnswerCard(&response));
            }
        }
        Command::Chat { session } => {
            let service = build_service(&settings, &cli.index).await?;
            chat(&service, &session.unwrap_or_else(default_session)).await?;
        }
        Command::Health => health(&settings, &cli.index).await?,
        Command::Ingest { path } => ingest(&settings, &cli.index, &path).await?,
    }
    Ok(())
}

/// Log to stderr so stdout carries only answers and JSON.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn default_session() -> String {
    format!("cli-{}", std::process::id())
}

fn build_embedder(settings: &Settings) -> anyhow::Result<Arc<dyn EmbeddingService>> {
    let provider = ProviderName::OpenAi;
    let key = settings
        .api_key(provider)
        .ok_or(ConfigError::MissingCredential {
            provider,
            var: provider.key_var(),
        })?;
    let embedder = OpenAiEmbedder::new(
        key,
        settings.embedding_model.clone(),
        settings.embedding_dimension,
        settings.request_timeout,
        settings.retry,
    )?;
    Ok(Arc::new(embedder))
}

fn pinecone_key(settings: &Settings) -> anyhow::Result<&str> {
    settings
        .pinecone_api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .context("PINECONE_API_KEY is not set")
}

async fn open_index(settings: &Settings, args: &IndexArgs) -> anyhow::Result<Arc<dyn VectorIndex>> {
    match args.backend {
        IndexBackend::Pinecone => {
            let key = pinecone_key(settings)?;
            let index = match &settings.pinecone_index_host {
                Some(host) => {
                    PineconeIndex::new(host, key, settings.request_timeout, settings.retry)?
                }
                None => PineconeIndex::connect(
                    key,
                    &settings.pinecone_index_name,
                    settings.request_timeout,
                    settings.retry,
                )
                .await
                .with_context(|| {
                    format!("resolving pinecone index {}", settings.pinecone_index_name)
                })?,
            };
            Ok(Arc::new(index))
        }
        IndexBackend::Lance => open_lance(&args.lance_path, settings.embedding_dimension).await,
    }
}

/// Like `open_index`, but a Pinecone index addressed by name is created
/// first when the project does not have it.
async fn open_or_create_index(
    settings: &Settings,
    args: &IndexArgs,
) -> anyhow::Result<Arc<dyn VectorIndex>> {
    if args.backend != IndexBackend::Pinecone || settings.pinecone_index_host.is_some() {
        return open_index(settings, args).await;
    }
    let control = PineconeControlPlane::new(
        pinecone_key(settings)?,
        settings.request_timeout,
        settings.retry,
    )?;
    let spec = ServerlessSpec::from_environment(&settings.pinecone_environment);
    let index = control
        .ensure_index(
            &settings.pinecone_index_name,
            settings.embedding_dimension,
            &spec,
        )
        .await
        .with_context(|| format!("preparing pinecone index {}", settings.pinecone_index_name))?;
    Ok(Arc::new(index))
}

#[cfg(feature = "lancedb")]
async fn open_lance(path: &Path, dim: usize) -> anyhow::Result<Arc<dyn VectorIndex>> {
    let index = precedent_store::LanceIndex::open(path, dim)
        .await
        .with_context(|| format!("opening LanceDB at {}", path.display()))?;
    Ok(Arc::new(index))
}

#[cfg(not(feature = "lancedb"))]
async fn open_lance(path: &Path, _dim: usize) -> anyhow::Result<Arc<dyn VectorIndex>> {
    anyhow::bail!(
        "cannot open {}: built without LanceDB support (rebuild with --features lancedb)",
        path.display()
    )
}

async fn build_service(settings: &Settings, args: &IndexArgs) -> anyhow::Result<QueryService> {
    let models = ProviderSelector::new(settings.clone()).select()?;
    let retriever = Retriever::new(build_embedder(settings)?, open_index(settings, args).await?);
    let workflow = QueryWorkflow::new(
        models,
        Arc::new(retriever),
        Arc::new(InMemorySessionStore::new()),
        ConfidenceAssessor::new(settings.confidence),
        WorkflowOptions::from_settings(settings),
    );
    Ok(QueryService::new(workflow))
}

async fn chat(service: &QueryService, session_id: &str) -> anyhow::Result<()> {
    eprintln!("Session {session_id}. /reset clears history, /quit exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                service.reset(session_id).await?;
                eprintln!("  History cleared.");
            }
            question => match service.ask(QueryRequest::new(question, session_id)).await {
                Ok(response) => println!("{}\n", AnswerCard(&response)),
                Err(e) => warn!(error = %e, "query failed"),
            },
        }
    }
    Ok(())
}

async fn health(settings: &Settings, args: &IndexArgs) -> anyhow::Result<()> {
    let index = match open_index(settings, args).await {
        Ok(index) => IndexHealth::probe(index.as_ref()).await,
        Err(e) => IndexHealth::Unhealthy {
            error: format!("{e:#}"),
        },
    };
    let healthy = index.is_healthy();
    let report = serde_json::json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "service": "precedent",
        "version": env!("CARGO_PKG_VERSION"),
        "components": { "index": index },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    anyhow::ensure!(healthy, "index is unhealthy");
    Ok(())
}

async fn ingest(settings: &Settings, args: &IndexArgs, path: &Path) -> anyhow::Result<()> {
    let docs = ingest::load_documents(path)?;
    eprintln!("  Read {} documents from {}", docs.len(), path.display());

    let chunker = Chunker::new(settings.chunk_size, settings.chunk_overlap)?;
    let embedder = build_embedder(settings)?;
    let index = open_or_create_index(settings, args).await?;

    let stats = ingest::run_ingest(&docs, &chunker, embedder.as_ref(), index.as_ref()).await?;
    eprintln!(
        "  Indexed {} vectors from {} chunks in {:.1}s",
        stats.vectors, stats.chunks, stats.elapsed_secs
    );

    let after = index.describe_stats().await.context("reading index stats")?;
    println!("{}", serde_json::to_string_pretty(&after)?);
    Ok(())
}
