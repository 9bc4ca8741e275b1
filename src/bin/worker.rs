//! Clipscore worker: JSON-lines similarity service over stdin/stdout.
//!
//! Each stdin line is one request, `{"text": "...", "url": "..."}`. Each
//! stdout line is one event, tagged by `status`:
//!
//! ```text
//! {"status":"initiate"}
//! {"status":"progress","progress":{"file":"onnx/text_model.onnx",...}}
//! {"status":"ready"}
//! {"status":"complete","output":0.2874}
//! ```
//!
//! The model is loaded on the first request and kept for the lifetime of
//! the process. Requests are answered in the order they were read.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use clipscore::config::Config;
use clipscore::{logging, Event, SimilarityRequest, WorkerHandle};

/// Worker configuration
#[derive(Default)]
struct WorkerArgs {
    /// Config path override
    config_path: Option<PathBuf>,
    /// Log directory override
    log_dir: Option<PathBuf>,
}

type EventStream = mpsc::UnboundedReceiver<Event>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    logging::init(Some(
        args.log_dir
            .clone()
            .unwrap_or_else(|| Config::config_dir().join("logs")),
    ))?;

    info!("Clipscore worker starting...");

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!("Config loaded");

    let worker = WorkerHandle::from_config(&config);

    // Streams are written in submission order so events never interleave.
    let (streams_tx, streams_rx) = mpsc::channel::<EventStream>(config.worker.queue_depth.max(1));
    let writer = tokio::spawn(write_events(streams_rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let stream = match serde_json::from_str::<SimilarityRequest>(line) {
            Ok(request) => worker.submit(request).await?,
            Err(e) => {
                warn!(error = %e, "Malformed request line");
                rejected(format!("malformed request: {}", e))
            }
        };

        if streams_tx.send(stream).await.is_err() {
            error!("Event writer stopped");
            break;
        }
    }

    drop(streams_tx);
    writer.await.context("Event writer panicked")??;

    info!("Clipscore worker stopped");
    Ok(())
}

/// A stream holding a single error event.
fn rejected(message: String) -> EventStream {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(Event::Error { error: message });
    rx
}

async fn write_events(mut streams: mpsc::Receiver<EventStream>) -> Result<()> {
    let mut stdout = tokio::io::stdout();

    while let Some(mut events) = streams.recv().await {
        while let Some(event) = events.recv().await {
            let mut line = serde_json::to_vec(&event).context("Failed to encode event")?;
            line.push(b'\n');
            stdout.write_all(&line).await.context("Failed to write stdout")?;
            stdout.flush().await.context("Failed to flush stdout")?;

            if event.is_terminal() {
                break;
            }
        }
    }

    Ok(())
}

fn parse_args() -> WorkerArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut worker_args = WorkerArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    worker_args.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--log-dir" => {
                if i + 1 < args.len() {
                    worker_args.log_dir = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --log-dir requires a path argument");
                    std::process::exit(1);
                }
            }
            "--version" | "-V" => {
                println!("clipscore-worker {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    worker_args
}

fn print_help() {
    println!(
        r#"clipscore-worker - JSON-lines text/image similarity service

USAGE:
    clipscore-worker [OPTIONS]

OPTIONS:
    --config, -c PATH   Path to config file
    --log-dir PATH      Directory for log files when journald is unavailable
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    CLIPSCORE_CONFIG    Path to config file (overrides default location)
    CLIPSCORE_LOG       Log level (trace, debug, info, warn, error)

PROTOCOL:
    stdin   one request per line: {{"text": "...", "url": "..."}}
    stdout  one event per line, tagged by "status":
            initiate, progress, ready, complete, error
"#
    );
}
