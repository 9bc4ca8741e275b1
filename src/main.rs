use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;

use clipscore::config::Config;
use clipscore::{logging, Event, SimilarityRequest, WorkerHandle};

#[derive(Default)]
struct CliArgs {
    text: Option<String>,
    url: Option<String>,
    config_path: Option<PathBuf>,
    json: bool,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("clipscore {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--json" | "-j" => {
                cli.json = true;
            }
            flag @ ("--text" | "-t" | "--url" | "-u" | "--config" | "-c") => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Error: {} requires an argument", flag);
                    std::process::exit(1);
                };
                match flag {
                    "--text" | "-t" => cli.text = Some(value.clone()),
                    "--url" | "-u" => cli.url = Some(value.clone()),
                    _ => cli.config_path = Some(PathBuf::from(value)),
                }
                i += 1;
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

fn print_help() {
    println!(
        r#"clipscore - Score how well a text describes an image

USAGE:
    clipscore --text TEXT --url IMAGE [OPTIONS]

OPTIONS:
    --text, -t TEXT     Text to compare
    --url, -u IMAGE     Image location: http(s) URL, data: URI or local path
    --json, -j          Print every event as a JSON line on stdout
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    CLIPSCORE_CONFIG    Path to config file (overrides default location)
    CLIPSCORE_LOG       Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/clipscore/config.toml

The score is the cosine similarity of the two embeddings, in [-1, 1].
See also: clipscore-worker --help"#
    );
}

fn report(event: &Event, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("Failed to encode event: {}", e),
        }
        return;
    }

    let mut stderr = std::io::stderr().lock();
    let _ = match event {
        Event::Initiate => writeln!(stderr, "Loading model..."),
        Event::Progress { progress } => writeln!(
            stderr,
            "  {} {:>5.1}% ({}/{} bytes)",
            progress.file, progress.progress, progress.loaded, progress.total
        ),
        Event::Ready => writeln!(stderr, "Model ready, computing similarity..."),
        Event::Complete { .. } | Event::Error { .. } => Ok(()),
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_args();

    let (Some(text), Some(url)) = (cli.text, cli.url) else {
        eprintln!("Error: both --text and --url are required");
        print_help();
        std::process::exit(1);
    };

    // Initialize logging (uses journald on Linux, file fallback otherwise)
    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let config = match cli.config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    let worker = WorkerHandle::from_config(&config);
    let json = cli.json;
    let result = worker
        .compute(SimilarityRequest::new(text, url), |event| report(event, json))
        .await;

    match result {
        Ok(score) => {
            if !json {
                println!("{:.4}", score);
            }
            Ok(())
        }
        Err(e) if json => {
            // Already printed as an error event.
            tracing::debug!(error = %e, "Request failed");
            std::process::exit(1);
        }
        Err(e) => Err(e).context("Similarity request failed"),
    }
}
