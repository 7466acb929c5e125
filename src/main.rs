#![allow(missing_docs)]

//! Straylight CLI — a host-application stand-in for the pipeline engine.
//!
//! Wires the engine to the builtin local tools, an Ollama-compatible
//! model endpoint, and an in-memory memory store, then runs one request
//! end to end and prints the formatted output.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use straylight::config::RuntimeConfig;
use straylight::memory::InMemoryStore;
use straylight::providers::ollama::OllamaProvider;
use straylight::{logging, PipelineBuilder};

/// Run one request through the cognitive pipeline.
#[derive(Debug, Parser)]
#[command(name = "straylight", version, about)]
struct Cli {
    /// The request to process.
    input: String,

    /// Path to a straylight.toml config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the full result as JSON instead of the formatted output.
    #[arg(long)]
    json: bool,

    /// Stream output fragments as they are produced.
    #[arg(long)]
    stream: bool,

    /// Write JSON logs to the platform log directory as well as stderr.
    #[arg(long)]
    log_to_file: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _guard = if cli.log_to_file {
        let logs_dir = directories::ProjectDirs::from("run", "straylight", "straylight")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"));
        Some(logging::init_production(&logs_dir)?)
    } else {
        logging::init_cli();
        None
    };

    let config = match &cli.config {
        Some(path) => RuntimeConfig::load_from(path.clone())?,
        None => RuntimeConfig::load()?,
    };

    let provider = Arc::new(OllamaProvider::new(
        config.model.base_url.clone(),
        config.model.model.clone(),
    ));

    let pipeline = PipelineBuilder::new(config)
        .with_provider(provider)
        .with_memory(Arc::new(InMemoryStore::new()))
        .build();

    let result = if cli.stream {
        let mut stdout = std::io::stdout();
        let result = pipeline
            .process_streaming(&cli.input, move |chunk| {
                let _ = stdout.write_all(chunk.as_bytes());
                let _ = stdout.flush();
            })
            .await;
        println!();
        result
    } else {
        pipeline.process(&cli.input).await
    };

    if cli.json {
        let rendered =
            serde_json::to_string_pretty(&result).context("failed to serialize result")?;
        println!("{rendered}");
    } else if !cli.stream {
        println!("{}", result.output.content);
    }

    if result.success {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
