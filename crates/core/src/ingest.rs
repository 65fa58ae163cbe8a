use crate::chunking::{build_chunks, Chunker, ChunkingConfig};
use crate::embeddings::align_embeddings;
use crate::extractor::PdfExtractor;
use crate::models::{DocumentFingerprint, IndexedPoint, IngestionOptions, IngestionReceipt};
use crate::traits::{Embedder, VectorIndex};
use crate::RagError;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub const INGESTION_SUCCESS_MESSAGE: &str = "Document processed successfully";

/// load → chunk → embed → index for one document at a time.
///
/// A document is either fully indexed or not indexed at all: every chunk is
/// embedded in a single batch and written with a single upsert, and nothing
/// is written until all vectors are present and valid.
pub struct IngestionPipeline {
    extractor: Arc<dyn PdfExtractor>,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestedPdf {
    pub path: PathBuf,
    pub receipt: IngestionReceipt,
}

pub struct IngestionReport {
    pub ingested: Vec<IngestedPdf>,
    pub skipped_files: Vec<SkippedPdf>,
}

impl IngestionReport {
    pub fn chunks_count(&self) -> usize {
        self.ingested.iter().map(|file| file.receipt.chunks_count).sum()
    }
}

impl IngestionPipeline {
    pub fn new(
        extractor: Arc<dyn PdfExtractor>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        options: &IngestionOptions,
    ) -> Result<Self, RagError> {
        let chunker = Chunker::new(ChunkingConfig::try_from(options)?)?;
        Ok(Self {
            extractor,
            chunker,
            embedder,
            index,
        })
    }

    pub async fn ingest(&self, bytes: Vec<u8>, file_name: &str) -> Result<IngestionReceipt, RagError> {
        let fingerprint = DocumentFingerprint {
            document_id: Uuid::new_v4().to_string(),
            file_name: file_name.to_string(),
            checksum: digest_bytes(&bytes),
            ingested_at: Utc::now(),
        };
        let document_id = fingerprint.document_id.clone();

        self.index_document(bytes, fingerprint).await.inspect_err(|error| {
            error!(code = error.code(), %error, document_id = %document_id, file_name, "ingestion failed");
        })
    }

    async fn index_document(
        &self,
        bytes: Vec<u8>,
        fingerprint: DocumentFingerprint,
    ) -> Result<IngestionReceipt, RagError> {
        let extractor = Arc::clone(&self.extractor);
        let pages = tokio::task::spawn_blocking(move || extractor.extract_pages(&bytes))
            .await
            .map_err(|error| RagError::Load(format!("extraction task failed: {error}")))??;
        if pages.is_empty() {
            return Err(RagError::Load("document has no pages".to_string()));
        }

        let segments = self.chunker.split_pages(&pages);
        if segments.is_empty() {
            return Err(RagError::EmptyDocument(fingerprint.file_name.clone()));
        }

        let chunks = build_chunks(&fingerprint, segments);
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        let vectors = align_embeddings(chunks.len(), self.embedder.dimensions(), embeddings)?;

        let points: Vec<IndexedPoint> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedPoint {
                id: chunk.chunk_id.clone(),
                vector,
                payload: chunk.payload(),
            })
            .collect();
        self.index.upsert(points).await?;

        info!(
            document_id = %fingerprint.document_id,
            file_name = %fingerprint.file_name,
            pages = pages.len(),
            chunk_count = chunks.len(),
            "document indexed"
        );

        Ok(IngestionReceipt {
            success: true,
            document_id: fingerprint.document_id,
            chunks_count: chunks.len(),
            message: INGESTION_SUCCESS_MESSAGE.to_string(),
        })
    }

    /// Ingests every PDF under `folder`. A file that fails is reported and skipped.
    pub async fn ingest_folder(&self, folder: &Path) -> Result<IngestionReport, RagError> {
        let files = discover_pdf_files(folder);
        if files.is_empty() {
            return Err(RagError::Validation(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        let mut ingested = Vec::new();
        let mut skipped_files = Vec::new();

        for path in files {
            let file_name = match path.file_name().and_then(|name| name.to_str()) {
                Some(name) => name.to_string(),
                None => {
                    skipped_files.push(SkippedPdf {
                        reason: format!("path missing filename: {}", path.display()),
                        path,
                    });
                    continue;
                }
            };

            let outcome = match tokio::fs::read(&path).await {
                Ok(bytes) => self.ingest(bytes, &file_name).await,
                Err(error) => Err(RagError::Load(error.to_string())),
            };

            match outcome {
                Ok(receipt) => ingested.push(IngestedPdf { path, receipt }),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping pdf");
                    skipped_files.push(SkippedPdf {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(IngestionReport {
            ingested,
            skipped_files,
        })
    }
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
