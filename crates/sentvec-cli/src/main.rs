//! sentvec - Sentence embeddings from the command line
//!
//! Encodes the given texts with a local ONNX sentence-encoding model and
//! prints the vectors as JSON.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use sentvec_core::EncoderConfig;
use sentvec_embeddings::{Encoder, RuntimeEnvironment};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_help() {
    eprintln!(
        r#"sentvec v{VERSION} - Sentence embeddings from the command line

USAGE:
    sentvec [OPTIONS] encode <TEXT>...

COMMANDS:
    encode          Encode each TEXT and print the vectors as JSON
    version         Print version information

OPTIONS:
    -h, --help              Print this help message
    -v, --version           Print version
    --config <FILE>         Load encoder settings from a TOML file
    --model <DIR>           Model directory holding model.onnx and tokenizer.json
    --output <NAME>         Output tensor to read (default: sentence_embedding)
    --max-seq-len <N>       Maximum tokens per text, capped at 512 (0 = 512)
    --skip-normalize        Return raw vectors without L2 normalization
    --shared-runtime        Leave the runtime environment up when closing

ENVIRONMENT:
    SENTVEC_MODEL_PATH  Model directory when --model and the config file omit it
    RUST_LOG            Log level (default: info)

EXAMPLES:
    # Encode two sentences with a pooled model
    sentvec --model ./all-MiniLM-L6-v2 encode "Hello" "Hello, world!"

    # Mean-pool the per-token output instead
    sentvec --model ./all-MiniLM-L6-v2 --output last_hidden_state encode "Hello"
"#
    );
}

fn print_version() {
    println!("sentvec {}", VERSION);
}

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    model: Option<PathBuf>,
    output: Option<String>,
    max_seq_len: Option<usize>,
    skip_normalize: bool,
    shared_runtime: bool,
    texts: Vec<String>,
}

#[derive(Debug, PartialEq)]
enum Command {
    Help,
    Version,
    Encode(Args),
}

fn take_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", flag))
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut parsed = Args::default();
    let mut encode = false;
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-v" | "--version" => return Ok(Command::Version),
            "version" if !encode => return Ok(Command::Version),
            "--config" => parsed.config = Some(PathBuf::from(take_value(args, &mut i, "--config")?)),
            "--model" => parsed.model = Some(PathBuf::from(take_value(args, &mut i, "--model")?)),
            "--output" => parsed.output = Some(take_value(args, &mut i, "--output")?.to_string()),
            "--max-seq-len" => {
                let value = take_value(args, &mut i, "--max-seq-len")?;
                let n = value
                    .parse()
                    .map_err(|_| format!("--max-seq-len expects a number, got {:?}", value))?;
                parsed.max_seq_len = Some(n);
            }
            "--skip-normalize" => parsed.skip_normalize = true,
            "--shared-runtime" => parsed.shared_runtime = true,
            "encode" if !encode => encode = true,
            arg if arg.starts_with('-') && !encode => {
                return Err(format!("Unknown option: {}", arg));
            }
            text if encode => parsed.texts.push(text.to_string()),
            other => return Err(format!("Unknown command: {}", other)),
        }
        i += 1;
    }

    if !encode {
        return Ok(Command::Help);
    }
    Ok(Command::Encode(parsed))
}

/// Merge the config file, flags and environment into one encoder config
fn build_config(args: &Args) -> anyhow::Result<EncoderConfig> {
    let mut config = match &args.config {
        Some(path) => EncoderConfig::load_from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EncoderConfig::default(),
    };

    if let Some(model) = &args.model {
        config.model_path = model.clone();
    } else if config.model_path.as_os_str().is_empty() {
        if let Ok(path) = env::var("SENTVEC_MODEL_PATH") {
            config.model_path = PathBuf::from(path);
        }
    }
    if let Some(output) = &args.output {
        config.output_name = output.clone();
    }
    if let Some(n) = args.max_seq_len {
        config.max_seq_len = n;
    }
    config.skip_normalize |= args.skip_normalize;
    config.shared_runtime |= args.shared_runtime;

    config.validate()?;
    Ok(config)
}

#[derive(Debug, Serialize)]
struct EncodeOutput {
    dimensions: usize,
    embeddings: Vec<Vec<f32>>,
}

fn run_encode(args: Args) -> anyhow::Result<()> {
    let config = build_config(&args)?;
    tracing::info!("Model directory: {}", config.model_path.display());

    let runtime = Arc::new(RuntimeEnvironment::onnx());
    let mut encoder = Encoder::open(config, Arc::clone(&runtime))
        .map_err(|e| anyhow::anyhow!("Failed to open encoder: {}", e))?;

    let result = encoder.encode(&args.texts);
    let closed = encoder.close();
    let embeddings = result.map_err(|e| anyhow::anyhow!("Encoding failed: {}", e))?;
    closed.map_err(|e| anyhow::anyhow!("Failed to close encoder: {}", e))?;

    tracing::info!("{}", encoder.metrics().snapshot());

    let output = EncodeOutput {
        dimensions: encoder.hidden_dim(),
        embeddings,
    };
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            eprintln!("Run 'sentvec --help' for usage");
            std::process::exit(1);
        }
    };

    match command {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Version => {
            print_version();
            Ok(())
        }
        Command::Encode(args) => {
            // Logs go to stderr so stdout stays valid JSON
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .with_writer(std::io::stderr)
                .init();

            tracing::info!("Starting sentvec v{}", VERSION);
            run_encode(args)
        }
    }
}
