use crate::context::{assemble_context, sources};
use crate::extractor::PdfExtractor;
use crate::ingest::IngestionPipeline;
use crate::models::{
    IngestionOptions, IngestionReceipt, Prompt, QueryRequest, RagAnswer, Source, StreamEvent,
};
use crate::retrieval::RetrievalPipeline;
use crate::traits::{Embedder, Generator, VectorIndex};
use crate::RagError;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Returned verbatim when retrieval finds nothing, and demanded from the model
/// when the supplied context does not answer the question.
pub const NO_RELEVANT_INFORMATION: &str =
    "Sorry, I couldn't find any relevant information in the documents to answer your question.";

const STREAM_BUFFER: usize = 32;

/// The collaborators a [`RagEngine`] is assembled from.
pub struct RagComponents {
    pub extractor: Arc<dyn PdfExtractor>,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    /// Absent for ingestion-only deployments; answering then fails with `Configuration`.
    pub generator: Option<Arc<dyn Generator>>,
}

#[derive(Debug, Clone, Default)]
pub struct RagOptions {
    pub ingestion: IngestionOptions,
    /// Adds a "respond in <language>" rule to the instruction.
    pub answer_language: Option<String>,
}

pub fn system_instruction(answer_language: Option<&str>) -> String {
    let mut rules = vec![
        "Use only the information in the CONTEXT to answer.".to_string(),
        format!("If the CONTEXT does not contain the answer, reply exactly: \"{NO_RELEVANT_INFORMATION}\""),
        "Keep the answer concise and direct.".to_string(),
        "Cite the passages you used as [1], [2], and so on.".to_string(),
    ];
    if let Some(language) = answer_language.map(str::trim).filter(|value| !value.is_empty()) {
        rules.push(format!("Respond in {language}."));
    }

    let rules = rules
        .iter()
        .map(|rule| format!("- {rule}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("You are an assistant that answers questions about the user's documents.\n\nRules:\n{rules}")
}

pub fn build_prompt(context: &str, question: &str, answer_language: Option<&str>) -> Prompt {
    Prompt {
        system: system_instruction(answer_language),
        user: format!("CONTEXT:\n{context}\n\nQUESTION:\n{question}\n\nANSWER:"),
    }
}

pub struct RagEngine {
    ingestion: IngestionPipeline,
    retrieval: RetrievalPipeline,
    generator: Option<Arc<dyn Generator>>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    answer_language: Option<String>,
}

impl RagEngine {
    pub fn new(components: RagComponents, options: RagOptions) -> Result<Self, RagError> {
        let ingestion = IngestionPipeline::new(
            components.extractor,
            Arc::clone(&components.embedder),
            Arc::clone(&components.index),
            &options.ingestion,
        )?;
        let retrieval =
            RetrievalPipeline::new(Arc::clone(&components.embedder), Arc::clone(&components.index));

        Ok(Self {
            ingestion,
            retrieval,
            generator: components.generator,
            embedder: components.embedder,
            index: components.index,
            answer_language: options.answer_language,
        })
    }

    /// Makes sure the collection exists with the embedder's dimensionality.
    /// A mismatch is a `Configuration` error and should abort startup.
    pub async fn initialize(&self) -> Result<(), RagError> {
        let dimensions = self.embedder.dimensions();
        self.index.ensure_collection(dimensions).await?;
        info!(dimensions, "vector index ready");
        Ok(())
    }

    pub fn ingestion(&self) -> &IngestionPipeline {
        &self.ingestion
    }

    pub async fn ingest(&self, bytes: Vec<u8>, file_name: &str) -> Result<IngestionReceipt, RagError> {
        self.ingestion.ingest(bytes, file_name).await
    }

    fn prompt_for(&self, question: &str, context: &str) -> Prompt {
        build_prompt(context, question, self.answer_language.as_deref())
    }

    fn generator(&self) -> Result<&Arc<dyn Generator>, RagError> {
        self.generator.as_ref().ok_or_else(|| {
            RagError::Configuration("no text generator is configured".to_string())
        })
    }

    pub async fn answer(&self, request: &QueryRequest) -> Result<RagAnswer, RagError> {
        request.validate()?;
        let generator = self.generator()?;
        let results = self.retrieval.retrieve(&request.question, request.top_k).await?;

        if results.is_empty() {
            info!(top_k = request.top_k, "nothing retrieved; answering without generation");
            return Ok(RagAnswer {
                question: request.question.clone(),
                answer: NO_RELEVANT_INFORMATION.to_string(),
                sources: Vec::new(),
            });
        }

        let prompt = self.prompt_for(&request.question, &assemble_context(&results));
        let answer = generator.complete(&prompt).await.inspect_err(|error| {
            error!(code = error.code(), %error, "generation failed");
        })?;

        Ok(RagAnswer {
            question: request.question.clone(),
            answer,
            sources: sources(&results),
        })
    }

    /// Validation and retrieval failures are returned here, before any event is
    /// produced. Later failures arrive in-band as an `Error` event.
    pub async fn answer_stream(&self, request: &QueryRequest) -> Result<AnswerStream, RagError> {
        request.validate()?;
        let generator = Arc::clone(self.generator()?);
        let results = self.retrieval.retrieve(&request.question, request.top_k).await?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        if results.is_empty() {
            info!(top_k = request.top_k, "nothing retrieved; streaming fallback answer");
            tokio::spawn(async move {
                if tx.send(StreamEvent::Answer(NO_RELEVANT_INFORMATION.to_string())).await.is_ok() {
                    let _ = tx.send(StreamEvent::Done).await;
                }
            });
            return Ok(AnswerStream::new(rx));
        }

        let prompt = self.prompt_for(&request.question, &assemble_context(&results));
        let sources = sources(&results);
        info!(top_k = request.top_k, hits = sources.len(), "answer stream opened");
        tokio::spawn(produce_answer(generator, prompt, sources, tx));

        Ok(AnswerStream::new(rx))
    }
}

async fn produce_answer(
    generator: Arc<dyn Generator>,
    prompt: Prompt,
    sources: Vec<Source>,
    tx: mpsc::Sender<StreamEvent>,
) {
    if tx.send(StreamEvent::Sources(sources)).await.is_err() {
        debug!("consumer left before sources were sent");
        return;
    }

    let opened = tokio::select! {
        biased;
        _ = tx.closed() => {
            debug!("consumer disconnected before generation started");
            return;
        }
        opened = generator.stream(&prompt) => opened,
    };
    let mut upstream = match opened {
        Ok(upstream) => upstream,
        Err(error) => return fail(&tx, &error).await,
    };

    let mut tokens = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => {
                debug!(tokens, "consumer disconnected; cancelling generation");
                return;
            }
            next = upstream.next() => next,
        };

        match next {
            Some(Ok(token)) => {
                tokens += 1;
                if tx.send(StreamEvent::Token(token)).await.is_err() {
                    debug!(tokens, "consumer disconnected; cancelling generation");
                    return;
                }
            }
            Some(Err(error)) => return fail(&tx, &error).await,
            None => break,
        }
    }

    drop(upstream);
    info!(tokens, "answer stream completed");
    let _ = tx.send(StreamEvent::Done).await;
}

async fn fail(tx: &mpsc::Sender<StreamEvent>, error: &RagError) {
    error!(code = error.code(), %error, "generation failed mid-stream");
    if tx.send(StreamEvent::Error(error.into())).await.is_ok() {
        let _ = tx.send(StreamEvent::Done).await;
    }
}

/// Events of one streamed answer. Dropping it stops generation.
pub struct AnswerStream {
    receiver: mpsc::Receiver<StreamEvent>,
}

impl AnswerStream {
    fn new(receiver: mpsc::Receiver<StreamEvent>) -> Self {
        Self { receiver }
    }
}

impl Stream for AnswerStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
