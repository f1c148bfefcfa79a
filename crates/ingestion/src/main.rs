//! Ragline Ingestion CLI
//!
//! Builds the vector index from source documents:
//! 1. Reads a CSV file or a directory of text files
//! 2. Chunks the text into overlapping token windows
//! 3. Embeds every chunk
//! 4. Replaces the configured collection with the result

mod chunker;
mod errors;
mod processor;
mod source;

use chunker::Chunker;
use clap::{Parser, Subcommand};
use processor::IngestionPipeline;
use ragline_common::{
    config::{AppConfig, ChunkingConfig},
    embeddings::{create_embedding_service, EmbeddingClient},
    index::{create_vector_store, VectorIndexWriter},
    metrics,
    models::Document,
    tokenizer::BpeTokenizer,
    Tokenizer, VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ingest", version, about = "Chunk, embed and index source documents")]
struct Cli {
    /// Configuration file (defaults to config/ layering and APP__ variables)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index the rows of a CSV file
    Csv {
        path: PathBuf,

        /// Columns joined into the document text
        #[arg(long, value_delimiter = ',', required = true)]
        text_columns: Vec<String>,

        /// Target collection (overrides index.collection_name)
        #[arg(long)]
        collection: Option<String>,
    },

    /// Index every *.txt file of a directory
    Text {
        dir: PathBuf,

        #[arg(long)]
        collection: Option<String>,
    },

    /// Print the chunks of a file without embedding or indexing
    Chunk {
        file: PathBuf,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Model whose tokenizer is used
        #[arg(long, default_value = ragline_common::DEFAULT_EMBEDDING_MODEL)]
        model: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .json()
        .init();

    let cli = Cli::parse();
    info!("Starting Ragline ingestion v{}", VERSION);

    match cli.command {
        Command::Chunk {
            file,
            chunk_size,
            chunk_overlap,
            model,
        } => {
            let defaults = ChunkingConfig::default();
            let chunker = Chunker::new(
                Arc::new(BpeTokenizer::for_model(&model)?),
                chunk_size.unwrap_or(defaults.chunk_size),
                chunk_overlap.unwrap_or(defaults.chunk_overlap),
            )?;
            dry_run(&chunker, &file)?;
        }
        Command::Csv {
            path,
            text_columns,
            collection,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let documents = source::read_csv(&path, &text_columns)?;
            ingest(&config, documents, collection).await?;
        }
        Command::Text { dir, collection } => {
            let config = load_config(cli.config.as_deref())?;
            let documents = source::read_text_dir(&dir)?;
            ingest(&config, documents, collection).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => AppConfig::from_file(&path.to_string_lossy()),
        None => AppConfig::load(),
    };

    config.map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e.into()
    })
}

async fn ingest(
    config: &AppConfig,
    documents: Vec<Document>,
    collection: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    metrics::register_metrics();

    let collection = collection.unwrap_or_else(|| config.index.collection_name.clone());
    let tokenizer = Arc::new(BpeTokenizer::for_model(&config.embedding.model)?);

    let pipeline = IngestionPipeline::new(
        Chunker::new(
            tokenizer.clone(),
            config.chunking.chunk_size,
            config.chunking.chunk_overlap,
        )?,
        EmbeddingClient::from_config(config, create_embedding_service(config)?, tokenizer),
        VectorIndexWriter::new(create_vector_store(config)?),
    );

    let summary = pipeline.run(&documents, &collection).await.map_err(|e| {
        tracing::error!(error = %e, collection = %collection, "Ingestion failed");
        e
    })?;

    info!(
        documents = summary.documents,
        chunks = summary.chunks,
        collection = %summary.collection,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "Ingestion complete"
    );
    Ok(())
}

fn dry_run(chunker: &Chunker, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let text = source::decode_text(std::fs::read(file)?, file);
    let source_id = file.display().to_string();
    let chunks = chunker.chunk(&text, &source_id);

    println!(
        "{}: {} tokens, {} chunks",
        source_id,
        chunker.tokenizer().count(&text),
        chunks.len()
    );
    for chunk in &chunks {
        let preview: String = chunk.text.chars().take(60).collect();
        println!(
            "  #{:<4} offset {:>7}  tokens {:>5}  {:?}",
            chunk.chunk_index, chunk.token_offset, chunk.token_count, preview
        );
    }
    Ok(())
}
