//! Oceanlink CLI - Command-line interface
//!
//! Ingests recorded instrument files through the record parser and checks
//! parser / driver configurations.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use oceanlink_core::cli::{describe_parse_error, print_exit_codes, CliResult, ExitCodes, OutputFormat, RecordWriter};
use oceanlink_core::config::{self, DriverConfig, ParserConfig};
use oceanlink_core::core::parser::{Checkpoint, RawFrameFactory, RecordParser, RecordRole};
use oceanlink_core::core::stream::RecognizerSpec;

/// Config file kind
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConfigKind {
    /// Record parser config
    Parser,
    /// Instrument driver config
    Driver,
}

/// Oceanlink CLI
#[derive(Parser, Debug)]
#[command(
    name = "oceanlink",
    author = "Oceanlink Team",
    version,
    about = "Instrument stream parsing and protocol tooling",
    long_about = None
)]
struct Cli {
    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Log as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse a recorded file and print its records
    Ingest {
        /// Input file
        file: PathBuf,

        /// Parser config (path, or name inside the config directory)
        #[arg(short, long, default_value = "parser.toml", env = "OCEANLINK_PARSER_CONFIG")]
        config: String,

        /// Resume from a saved checkpoint
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Data records per batch
        #[arg(short, long, default_value_t = 100)]
        batch: usize,

        /// Stop after this many batches
        #[arg(long)]
        max_batches: Option<usize>,

        /// Write the final checkpoint here
        #[arg(long)]
        save_checkpoint: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Exit with an error code if any parse error was reported
        #[arg(long)]
        strict: bool,
    },

    /// Validate a config file
    CheckConfig {
        /// Config file
        file: PathBuf,

        /// Config kind
        #[arg(short, long, value_enum, default_value_t = ConfigKind::Parser)]
        kind: ConfigKind,
    },

    /// Print the exit code table
    ExitCodes,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    let result = match &cli.command {
        Commands::Ingest { file, config, resume, batch, max_batches, save_checkpoint, format, strict } => ingest(
            file,
            config,
            resume.as_deref(),
            *batch,
            *max_batches,
            save_checkpoint.as_deref(),
            *format,
            *strict,
        )
        .unwrap_or_else(CliResult::from),
        Commands::CheckConfig { file, kind } => check_config(file, *kind).unwrap_or_else(CliResult::from),
        Commands::ExitCodes => {
            print_exit_codes();
            CliResult::success()
        }
    };

    if let Some(message) = result.message() {
        if result.is_success() {
            if !cli.quiet {
                eprintln!("{message}");
            }
        } else {
            eprintln!("error: {message}");
        }
    }
    result.to_exit_code()
}

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[allow(clippy::too_many_arguments)]
fn ingest(
    file: &Path,
    config_name: &str,
    resume: Option<&Path>,
    batch: usize,
    max_batches: Option<usize>,
    save_checkpoint: Option<&Path>,
    format: OutputFormat,
    strict: bool,
) -> anyhow::Result<CliResult> {
    if batch == 0 {
        return Ok(CliResult::error(ExitCodes::INVALID_ARGS, "--batch must be at least 1"));
    }

    let config_path = config::resolve(config_name)
        .with_context(|| format!("config `{config_name}` not found"))?;
    let parser_config = ParserConfig::load(&config_path)?;
    let source = File::open(file).with_context(|| format!("cannot open {}", file.display()))?;

    let mut parser = if parser_config.particles.is_some() {
        RecordParser::new(&parser_config, source)?
    } else {
        let trailer = frame_trailer(&parser_config);
        RecordParser::with_factory(
            &parser_config,
            source,
            Box::new(RawFrameFactory::new("frame", "frame_metadata", trailer)),
        )?
    };

    let errors = Arc::new(AtomicUsize::new(0));
    let seen = errors.clone();
    parser.on_error(move |e| {
        seen.fetch_add(1, Ordering::Relaxed);
        eprintln!("{}", describe_parse_error(e));
    });

    if let Some(path) = resume {
        let text = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
        let checkpoint: Checkpoint = serde_json::from_str(&text).context("invalid checkpoint")?;
        info!(position = checkpoint.position, "resuming");
        parser.set_state(checkpoint)?;
    }

    let stdout = io::stdout();
    let mut writer = RecordWriter::new(BufWriter::new(stdout.lock()), format);
    let mut batches = 0;
    loop {
        if max_batches.is_some_and(|max| batches >= max) {
            break;
        }
        let records = parser.get_records(batch)?;
        if records.is_empty() {
            break;
        }
        batches += 1;
        debug!(batch = batches, records = records.len(), "batch");
        for record in &records {
            writer.write(record)?;
        }
    }

    let checkpoint = parser.get_state();
    writer.set_checkpoint(checkpoint);
    writer.note_parse_errors(errors.load(Ordering::Relaxed));
    let summary = writer.finish()?;

    if let Some(path) = save_checkpoint {
        std::fs::write(path, serde_json::to_string(&checkpoint)?)
            .with_context(|| format!("cannot write {}", path.display()))?;
    }

    let message = format!(
        "{} metadata, {} data records, {} parse errors, position {}",
        summary.metadata, summary.data, summary.parse_errors, summary.checkpoint.position
    );
    if strict && summary.parse_errors > 0 {
        return Ok(CliResult::error(ExitCodes::PARSE_ERRORS, message));
    }
    Ok(CliResult::success_with_message(message))
}

/// Checksum width of the first binary data recognizer, 0 if there is none
fn frame_trailer(config: &ParserConfig) -> usize {
    config
        .recognizers
        .iter()
        .find_map(|spec| match spec {
            RecognizerSpec::Binary { checksum, role: RecordRole::Data, .. } => Some(checksum.size()),
            _ => None,
        })
        .unwrap_or(0)
}

fn check_config(file: &Path, kind: ConfigKind) -> anyhow::Result<CliResult> {
    let summary = match kind {
        ConfigKind::Parser => {
            let config = ParserConfig::load(file)?;
            format!(
                "parser config ok: {} recognizers, {} required header keys",
                config.recognizers.len(),
                config.required_header_keys.len()
            )
        }
        ConfigKind::Driver => {
            let config = DriverConfig::load(file)?;
            format!(
                "driver config ok: {} recognizers, leveling timeout {}ms",
                config.recognizers.len(),
                config.leveling_timeout_ms
            )
        }
    };
    Ok(CliResult::success_with_message(summary))
}
