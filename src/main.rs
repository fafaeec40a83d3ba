//! # Knowledge RAG CLI (`kb`)
//!
//! ## Usage
//!
//! ```bash
//! kb --config ./config/kb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb init` | Create the SQLite index database |
//! | `kb namespace <folder> --owner <owner>` | Print the namespace of a folder |
//! | `kb ingest <files..>` | Ingest PDFs into a namespace |
//! | `kb retrieve "<question>"` | Nearest chunks of a namespace |
//! | `kb knowledge create` / `list` | Manage knowledge records |
//! | `kb upload <id> <files..>` | Ingest into a knowledge folder and record the files |
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr.

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use knowledge_rag::commands::{self, Target};
use knowledge_rag::config;

/// Knowledge RAG: ingest PDFs into per-folder vector partitions and
/// retrieve context for questions.
#[derive(Parser)]
#[command(name = "kb", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the index database.
    ///
    /// Idempotent. Does nothing for remote index backends.
    Init,

    /// Print the namespace for a knowledge folder.
    Namespace {
        folder: String,
        #[arg(long)]
        owner: String,
    },

    /// Ingest PDF files into a namespace.
    ///
    /// The target is either an explicit `--namespace` or a `--folder` and
    /// `--owner` pair resolved into one.
    #[command(group(
        ArgGroup::new("target")
            .required(true)
            .args(["namespace", "folder"])
    ))]
    Ingest {
        /// PDF files to ingest as one batch.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(long)]
        namespace: Option<String>,

        #[arg(long, requires = "owner")]
        folder: Option<String>,

        #[arg(long)]
        owner: Option<String>,

        /// Password for encrypted PDFs.
        #[arg(long)]
        password: Option<String>,
    },

    /// Retrieve the chunks closest to a question.
    Retrieve {
        question: String,

        #[arg(long)]
        namespace: String,

        /// Number of chunks to return. Defaults to `retrieval.top_k`.
        #[arg(long)]
        top_k: Option<usize>,

        /// Print the rendered QA prompt instead of the chunk list.
        #[arg(long)]
        prompt: bool,
    },

    /// Manage knowledge records.
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },

    /// Ingest files into a knowledge folder and record them on success.
    Upload {
        knowledge_id: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
enum KnowledgeAction {
    /// Create a knowledge folder record.
    Create {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        folder: String,
    },
    /// List an owner's knowledge folders.
    List {
        #[arg(long)]
        owner: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Namespace { folder, owner } = &cli.command {
        return commands::run_namespace(folder, owner);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Namespace { .. } => {}
        Commands::Ingest {
            files,
            namespace,
            folder,
            owner,
            password,
        } => {
            let target = match (namespace, folder, owner) {
                (Some(ns), _, _) => Target::Namespace(ns),
                (None, Some(folder), Some(owner)) => Target::Folder { folder, owner },
                _ => anyhow::bail!("Pass --namespace, or --folder with --owner"),
            };
            commands::run_ingest(&cfg, files, target, password).await?;
        }
        Commands::Retrieve {
            question,
            namespace,
            top_k,
            prompt,
        } => {
            commands::run_retrieve(&cfg, &question, &namespace, top_k, prompt).await?;
        }
        Commands::Knowledge { action } => match action {
            KnowledgeAction::Create { owner, folder } => {
                commands::run_knowledge_create(&cfg, &owner, &folder).await?;
            }
            KnowledgeAction::List { owner } => {
                commands::run_knowledge_list(&cfg, &owner).await?;
            }
        },
        Commands::Upload {
            knowledge_id,
            files,
        } => {
            commands::run_upload(&cfg, &knowledge_id, files).await?;
        }
    }

    Ok(())
}
