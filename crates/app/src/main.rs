mod config;
mod http;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use config::{Cli, Command, ServeArgs};
use docrag_core::{looks_like_pdf, QueryRequest, RagEngine, StreamEvent};
use futures::StreamExt;
use http::AppState;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let engine = cli
        .settings
        .build_engine()
        .context("failed to assemble the pipeline")?;
    engine
        .initialize()
        .await
        .context("vector index is not usable")?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "docrag boot"
    );
    if !cli.settings.has_openai_key() {
        warn!("no OpenAI API key configured; questions cannot be answered");
    }

    match cli.command {
        Command::Serve(args) => serve(engine, args).await,
        Command::Ingest { file, folder } => {
            if let Some(file) = file {
                ingest_file(&engine, &file).await
            } else if let Some(folder) = folder {
                ingest_folder(&engine, &folder).await
            } else {
                anyhow::bail!("either --file or --folder is required")
            }
        }
        Command::Ask {
            question,
            top_k,
            stream,
        } => {
            let request = QueryRequest::new(question).with_top_k(top_k);
            if stream {
                ask_streaming(&engine, &request).await
            } else {
                ask(&engine, &request).await
            }
        }
    }
}

async fn serve(engine: RagEngine, args: ServeArgs) -> anyhow::Result<()> {
    let state = AppState {
        engine: Arc::new(engine),
        max_upload_bytes: args.max_upload_bytes(),
    };
    let options = args.router_options();
    match &options.public_dir {
        Some(dir) => info!(public_dir = %dir.display(), "serving static files"),
        None => info!(public_dir = %args.public_dir.display(), "static folder not found; serving the API only"),
    }
    let app = http::router(state, &options);

    let address = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(%address, max_upload_mb = args.max_upload_mb, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("http server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn ingest_file(engine: &RagEngine, path: &Path) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    if !looks_like_pdf(&bytes) {
        anyhow::bail!("{} is not a PDF", path.display());
    }
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("path missing filename: {}", path.display()))?;

    let receipt = engine.ingest(bytes, file_name).await?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

async fn ingest_folder(engine: &RagEngine, folder: &Path) -> anyhow::Result<()> {
    let report = engine.ingestion().ingest_folder(folder).await?;

    if !report.skipped_files.is_empty() {
        warn!(
            skipped_files = report.skipped_files.len(),
            folder = %folder.display(),
            "some pdfs were skipped"
        );
        for skipped in &report.skipped_files {
            warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
        }
    }

    for file in &report.ingested {
        println!(
            "{} chunks  {}  ({})",
            file.receipt.chunks_count,
            file.path.display(),
            file.receipt.document_id
        );
    }
    println!(
        "{} chunks ingested from {} file(s) at {}",
        report.chunks_count(),
        report.ingested.len(),
        Utc::now().to_rfc3339()
    );
    Ok(())
}

fn print_sources(sources: &[docrag_core::Source]) {
    for (position, source) in sources.iter().enumerate() {
        let page = source
            .page
            .map(|page| format!(" p.{page}"))
            .unwrap_or_default();
        println!("  [{}] {}{} score={:.4}", position + 1, source.file_name, page, source.score);
    }
}

async fn ask(engine: &RagEngine, request: &QueryRequest) -> anyhow::Result<()> {
    let answer = engine.answer(request).await?;
    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!("sources:");
        print_sources(&answer.sources);
    }
    Ok(())
}

async fn ask_streaming(engine: &RagEngine, request: &QueryRequest) -> anyhow::Result<()> {
    let mut events = engine.answer_stream(request).await?;
    let mut stdout = std::io::stdout();
    let mut sources = Vec::new();

    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Sources(found) => sources = found,
            StreamEvent::Token(token) => {
                print!("{token}");
                stdout.flush()?;
            }
            StreamEvent::Answer(answer) => print!("{answer}"),
            StreamEvent::Error(failure) => {
                println!();
                anyhow::bail!("{} ({})", failure.message, failure.code);
            }
            StreamEvent::Done => break,
        }
    }

    println!();
    if !sources.is_empty() {
        println!("sources:");
        print_sources(&sources);
    }
    Ok(())
}
