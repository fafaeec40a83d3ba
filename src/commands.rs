//! CLI command handlers.
//!
//! Each handler loads what it needs from the config, runs one operation and
//! prints a short summary on stdout. Diagnostics go through `tracing`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};

use knowledge_rag_core::knowledge::{KnowledgeStore, NewKnowledge};
use knowledge_rag_core::namespace;
use knowledge_rag_core::prompt::Turn;
use knowledge_rag_core::retrieve::Retriever;

use crate::config::Config;
use crate::extract::SourceFile;
use crate::ingest::IngestPipeline;
use crate::jobs::{IngestJobs, JobState};
use crate::knowledge_http::HttpKnowledgeStore;
use crate::migrate;
use crate::upload::{UploadService, UploadedFile};

/// Where an `ingest` command writes.
pub enum Target {
    Namespace(String),
    Folder { folder: String, owner: String },
}

impl Target {
    fn resolve(self) -> Result<String> {
        match self {
            Target::Namespace(ns) => {
                namespace::parts(&ns)?;
                Ok(ns)
            }
            Target::Folder { folder, owner } => Ok(namespace::resolve(&folder, &owner)?),
        }
    }
}

pub async fn run_init(config: &Config) -> Result<()> {
    if config.index.backend == "sqlite" {
        migrate::run_migrations(config).await?;
        println!("Database initialized successfully.");
    } else {
        println!(
            "Nothing to initialize for index backend '{}'.",
            config.index.backend
        );
    }
    Ok(())
}

pub fn run_namespace(folder: &str, owner: &str) -> Result<()> {
    println!("{}", namespace::resolve(folder, owner)?);
    Ok(())
}

pub async fn run_ingest(
    config: &Config,
    files: Vec<PathBuf>,
    target: Target,
    password: Option<String>,
) -> Result<()> {
    if files.is_empty() {
        bail!("No files given");
    }
    let namespace = target.resolve()?;
    let sources: Vec<SourceFile> = files
        .into_iter()
        .map(|path| {
            let source = SourceFile::new(path);
            match &password {
                Some(pw) => source.with_password(pw.clone()),
                None => source,
            }
        })
        .collect();

    let pipeline = IngestPipeline::from_config(config).await?;
    let report = pipeline.run(&sources, &namespace, |_| {}).await?;

    println!("ingest {}", report.namespace);
    println!("  files: {}", report.files);
    println!("  pages: {}", report.pages);
    println!("  chunks: {}", report.chunks);
    println!("  entries written: {}", report.entries);
    println!("ok");
    Ok(())
}

pub async fn run_retrieve(
    config: &Config,
    question: &str,
    namespace: &str,
    top_k: Option<usize>,
    prompt: bool,
) -> Result<()> {
    namespace::parts(namespace)?;
    let template = config.retrieval.template()?;
    let pipeline = IngestPipeline::from_config(config).await?;
    let retriever = Retriever::new(pipeline.embedder().clone(), pipeline.index().clone());

    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let chunks = retriever.retrieve(namespace, question, top_k).await?;

    if prompt {
        let no_history: &[Turn] = &[];
        println!("{}", template.render(&chunks, question, no_history));
        return Ok(());
    }

    if chunks.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, chunk) in chunks.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} (page {}/{})",
            i + 1,
            chunk.score,
            chunk.source_file,
            chunk.page_number,
            chunk.total_pages
        );
        let excerpt: String = chunk.text.chars().take(240).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    chunk: {}", chunk.chunk_index);
        println!("    id: {}", chunk.id);
        println!();
    }
    Ok(())
}

pub async fn run_knowledge_create(config: &Config, owner: &str, folder: &str) -> Result<()> {
    let store = HttpKnowledgeStore::from_config(&config.knowledge)?;
    let record = store.create(NewKnowledge::new(owner, folder)?).await?;
    println!("knowledge {}", record.id);
    println!("  owner: {}", record.owner);
    println!("  folder: {}", record.folder_name);
    println!("  namespace: {}", record.namespace);
    Ok(())
}

pub async fn run_knowledge_list(config: &Config, owner: &str) -> Result<()> {
    let store = HttpKnowledgeStore::from_config(&config.knowledge)?;
    let records = store.list_by_owner(owner).await?;
    if records.is_empty() {
        println!("No knowledge folders.");
        return Ok(());
    }
    for record in records {
        println!("{}  {}  ({} files)", record.id, record.folder_name, record.files.len());
        println!("    namespace: {}", record.namespace);
    }
    Ok(())
}

pub async fn run_upload(config: &Config, knowledge_id: &str, files: Vec<PathBuf>) -> Result<()> {
    if files.is_empty() {
        bail!("No files given");
    }
    let uploads = files
        .iter()
        .map(|p| UploadedFile::from_path(p))
        .collect::<Result<Vec<_>>>()?;

    let store: Arc<dyn KnowledgeStore> =
        Arc::new(HttpKnowledgeStore::from_config(&config.knowledge)?);
    let jobs = IngestJobs::new(IngestPipeline::from_config(config).await?);
    let service = UploadService::new(store, jobs);

    let accepted = service.accept(knowledge_id, uploads).await?;
    println!("upload {}", knowledge_id);
    println!("  namespace: {}", accepted.namespace);
    println!("  job: {}", accepted.job_id);

    // The process would exit under a detached job, so wait here.
    let status = service.jobs().wait(accepted.job_id).await;
    let recorded = accepted.recorded.await?;

    match status.map(|s| s.state) {
        Some(JobState::Succeeded { report }) => {
            println!("  entries written: {}", report.entries);
            match recorded {
                Ok(Some(record)) => println!("  files on record: {}", record.files.len()),
                Ok(None) => {}
                Err(e) => bail!("Ingested, but recording files failed: {}", e),
            }
            println!("ok");
            Ok(())
        }
        Some(JobState::Failed {
            error,
            confirmed_ids,
        }) => {
            if !confirmed_ids.is_empty() {
                println!("  confirmed before failure: {}", confirmed_ids.len());
            }
            bail!("Ingestion failed: {}", error)
        }
        _ => bail!("Ingestion job {} did not finish", accepted.job_id),
    }
}
