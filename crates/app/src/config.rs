use clap::{Args, Parser, Subcommand, ValueEnum};
use docrag_core::{
    CharacterNgramEmbedder, Embedder, Generator, InMemoryVectorIndex, IngestionOptions,
    LopdfExtractor, OpenAiChatGenerator, OpenAiConfig, OpenAiEmbedder, QdrantStore,
    RagComponents, RagEngine, RagError, RagOptions, VectorIndex, DEFAULT_CHAT_MODEL,
    DEFAULT_EMBEDDING_MODEL, DEFAULT_OPENAI_BASE_URL, DEFAULT_TOP_K,
};
use crate::http::RouterOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "docrag", version, about = "Ask questions about your PDFs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub settings: Settings,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API.
    Serve(ServeArgs),
    /// Index a single PDF or every PDF under a folder.
    Ingest {
        #[arg(long, conflicts_with = "folder", required_unless_present = "folder")]
        file: Option<PathBuf>,
        /// Folder searched recursively for PDFs.
        #[arg(long)]
        folder: Option<PathBuf>,
    },
    /// Answer a question from the indexed documents.
    Ask {
        #[arg(long)]
        question: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Print the answer as it is generated.
        #[arg(long, default_value_t = false)]
        stream: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Largest accepted upload, in megabytes.
    #[arg(long, default_value_t = 20)]
    pub max_upload_mb: usize,

    /// Origins allowed by CORS. Defaults to the local origins of `--port`.
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Static files served next to the API. Skipped when the folder is missing.
    #[arg(long, env = "PUBLIC_DIR", default_value = "public")]
    pub public_dir: PathBuf,
}

impl ServeArgs {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }

    pub fn origins(&self) -> Vec<String> {
        if !self.allowed_origins.is_empty() {
            return self.allowed_origins.clone();
        }
        vec![
            format!("http://localhost:{}", self.port),
            format!("http://127.0.0.1:{}", self.port),
        ]
    }

    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            allowed_origins: self.origins(),
            public_dir: Some(self.public_dir.clone()).filter(|dir| dir.is_dir()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbedderKind {
    Openai,
    /// Offline hashed trigram vectors.
    Ngram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VectorStoreKind {
    Qdrant,
    /// Process-local index, emptied on restart.
    Memory,
}

#[derive(Args, Debug, Clone)]
pub struct Settings {
    #[arg(long, env = "OPENAI_API_KEY", global = true, hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", global = true, default_value = DEFAULT_OPENAI_BASE_URL)]
    pub openai_base_url: String,

    #[arg(long, global = true, default_value = DEFAULT_EMBEDDING_MODEL)]
    pub embedding_model: String,

    #[arg(long, global = true, default_value = DEFAULT_CHAT_MODEL)]
    pub chat_model: String,

    #[arg(long, global = true, default_value_t = 0.0)]
    pub temperature: f32,

    #[arg(long, global = true, default_value_t = 10)]
    pub embedding_timeout_secs: u64,

    #[arg(long, global = true, default_value_t = 20)]
    pub generation_timeout_secs: u64,

    /// Retries after the first attempt for embedding and generation calls.
    #[arg(long, global = true, default_value_t = 2)]
    pub max_retries: u32,

    #[arg(long, env = "QDRANT_API_URL", global = true, default_value = "http://localhost:6333")]
    pub qdrant_url: String,

    #[arg(long, env = "QDRANT_API_KEY", global = true, hide_env_values = true)]
    pub qdrant_api_key: Option<String>,

    #[arg(long, env = "QDRANT_COLLECTION", global = true, default_value = "documents")]
    pub qdrant_collection: String,

    #[arg(long, value_enum, global = true, default_value_t = EmbedderKind::Openai)]
    pub embedder: EmbedderKind,

    #[arg(long, value_enum, global = true, default_value_t = VectorStoreKind::Qdrant)]
    pub vector_store: VectorStoreKind,

    #[arg(long, global = true, default_value_t = 1000)]
    pub chunk_size: usize,

    #[arg(long, global = true, default_value_t = 200)]
    pub chunk_overlap: usize,

    /// Language answers are written in, e.g. "Brazilian Portuguese".
    #[arg(long, env = "ANSWER_LANGUAGE", global = true)]
    pub answer_language: Option<String>,
}

impl Settings {
    pub fn ingestion_options(&self) -> IngestionOptions {
        IngestionOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }

    pub fn has_openai_key(&self) -> bool {
        self.openai_api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }

    fn openai_config(&self, timeout_secs: u64) -> Result<OpenAiConfig, RagError> {
        let api_key = self.openai_api_key.clone().unwrap_or_default();
        Ok(OpenAiConfig::new(api_key)?
            .with_base_url(&self.openai_base_url)?
            .with_timeout(Duration::from_secs(timeout_secs))
            .with_max_retries(self.max_retries))
    }

    pub fn build_engine(&self) -> Result<RagEngine, RagError> {
        let embedder: Arc<dyn Embedder> = match self.embedder {
            EmbedderKind::Openai => Arc::new(
                OpenAiEmbedder::new(self.openai_config(self.embedding_timeout_secs)?)?
                    .with_model(self.embedding_model.clone()),
            ),
            EmbedderKind::Ngram => Arc::new(CharacterNgramEmbedder::default()),
        };

        let index: Arc<dyn VectorIndex> = match self.vector_store {
            VectorStoreKind::Qdrant => {
                let store =
                    QdrantStore::new(&self.qdrant_url, self.qdrant_collection.clone(), embedder.dimensions())?;
                let store = match &self.qdrant_api_key {
                    Some(api_key) => store.with_api_key(api_key.clone()),
                    None => store,
                };
                Arc::new(store)
            }
            VectorStoreKind::Memory => Arc::new(InMemoryVectorIndex::new()),
        };

        // without a key the engine can still ingest with the offline embedder
        let generator: Option<Arc<dyn Generator>> = if self.has_openai_key() {
            Some(Arc::new(
                OpenAiChatGenerator::new(self.openai_config(self.generation_timeout_secs)?)?
                    .with_model(self.chat_model.clone())
                    .with_temperature(self.temperature),
            ))
        } else {
            None
        };

        RagEngine::new(
            RagComponents {
                extractor: Arc::new(LopdfExtractor),
                embedder,
                index,
                generator,
            },
            RagOptions {
                ingestion: self.ingestion_options(),
                answer_language: self.answer_language.clone(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_documented_values() -> Result<(), clap::Error> {
        let cli = Cli::try_parse_from(["docrag", "serve"])?;
        let Command::Serve(serve) = cli.command else {
            panic!("expected serve");
        };

        assert_eq!(serve.max_upload_bytes(), 20 * 1024 * 1024);
        assert_eq!(cli.settings.chunk_size, 1000);
        assert_eq!(cli.settings.chunk_overlap, 200);
        assert_eq!(cli.settings.max_retries, 2);
        assert_eq!(cli.settings.embedding_timeout_secs, 10);
        assert_eq!(cli.settings.generation_timeout_secs, 20);
        assert_eq!(cli.settings.chat_model, "gpt-4o-mini");
        assert_eq!(cli.settings.embedding_model, "text-embedding-3-small");
        Ok(())
    }

    #[test]
    fn origins_default_to_local_port() -> Result<(), clap::Error> {
        let cli = Cli::try_parse_from(["docrag", "serve", "--port", "8080"])?;
        let Command::Serve(serve) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(
            serve.origins(),
            vec!["http://localhost:8080", "http://127.0.0.1:8080"]
        );
        Ok(())
    }

    #[test]
    fn missing_public_dir_is_not_served() -> Result<(), clap::Error> {
        let cli = Cli::try_parse_from(["docrag", "serve", "--public-dir", "/definitely/not/here"])?;
        let Command::Serve(serve) = cli.command else {
            panic!("expected serve");
        };
        assert!(serve.router_options().public_dir.is_none());
        Ok(())
    }

    #[test]
    fn ingest_requires_exactly_one_source() {
        assert!(Cli::try_parse_from(["docrag", "ingest"]).is_err());
        assert!(Cli::try_parse_from(["docrag", "ingest", "--file", "a.pdf", "--folder", "docs"]).is_err());
        assert!(Cli::try_parse_from(["docrag", "ingest", "--folder", "docs"]).is_ok());
    }

    #[test]
    fn offline_engine_builds_with_a_key() -> Result<(), Box<dyn std::error::Error>> {
        let cli = Cli::try_parse_from([
            "docrag",
            "ask",
            "--question",
            "what?",
            "--embedder",
            "ngram",
            "--vector-store",
            "memory",
            "--openai-api-key",
            "sk-test",
        ])?;
        cli.settings.build_engine()?;
        Ok(())
    }

    #[test]
    fn offline_ingest_builds_without_a_key() -> Result<(), Box<dyn std::error::Error>> {
        let mut cli = Cli::try_parse_from([
            "docrag",
            "ingest",
            "--folder",
            "docs",
            "--embedder",
            "ngram",
            "--vector-store",
            "memory",
        ])?;
        cli.settings.openai_api_key = None;
        cli.settings.build_engine()?;
        Ok(())
    }

    #[test]
    fn openai_embedder_still_needs_a_key() -> Result<(), Box<dyn std::error::Error>> {
        let mut cli = Cli::try_parse_from(["docrag", "ingest", "--folder", "docs", "--vector-store", "memory"])?;
        cli.settings.openai_api_key = None;
        assert!(matches!(cli.settings.build_engine(), Err(RagError::Configuration(_))));
        Ok(())
    }

    #[test]
    fn overlapping_chunk_settings_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let cli = Cli::try_parse_from([
            "docrag",
            "serve",
            "--vector-store",
            "memory",
            "--embedder",
            "ngram",
            "--openai-api-key",
            "sk-test",
            "--chunk-size",
            "100",
            "--chunk-overlap",
            "100",
        ])?;
        assert!(matches!(cli.settings.build_engine(), Err(RagError::InvalidChunkConfig(_))));
        Ok(())
    }
}
