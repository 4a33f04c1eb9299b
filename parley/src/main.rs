//! Parley CLI - transcribe long recordings by splitting them on silence
mod fmt;

use clap::{Parser, Subcommand};
use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressStyle};
use owo_colors::OwoColorize as _;
use parley_core::{
    default_output_path, transcribe_file, Engine, ModelManager, ParleyError, Progress,
    TranscriptionConfig, WhisperModel,
};
use std::io::IsTerminal as _;
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr as _;
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::fmt::{format_elapsed, CliFormatter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.silent)?;

    if let Some(command) = cli.command {
        return handle_command(command, cli.verbose).await;
    }

    let Some(input) = cli.input.clone() else {
        error!("No input file specified. Run with --help for usage.");
        process::exit(1);
    };

    if !input.is_file() {
        error!("Input file not found: {}", input.display());
        process::exit(1);
    }

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&input));
    let config = build_config(&cli);
    debug!(
        "Engine: {}, temp dir: {}",
        config.engine,
        config.temp_dir.display()
    );

    if !cli.silent {
        print_summary(&input, &output, &config);
    }

    let started = Instant::now();
    let progress_bar = if cli.silent {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} segments ({eta})")?
            .progress_chars("#>-"),
    );

    let result = transcribe_file(&input, &config, |progress| {
        report_progress(&progress_bar, progress)
    })
    .await;

    let transcript = match result {
        Ok(transcript) => {
            progress_bar.finish_and_clear();
            transcript
        }
        Err(e) => {
            progress_bar.abandon();
            report_failure(&e);
            process::exit(1);
        }
    };

    if let Err(e) = transcript.save(&output).await {
        error!("{}", e);
        process::exit(1);
    }
    info!(
        "Wrote {} lines to {}",
        transcript.lines().len(),
        output.display()
    );

    if !cli.silent {
        println!("Done in {}!", format_elapsed(started.elapsed()).cyan());
    }

    Ok(())
}

fn init_logging(verbose: bool, silent: bool) -> anyhow::Result<()> {
    let ansi = std::io::stderr().is_terminal();
    if verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_writer(std::io::stderr)
            .with_ansi(ansi)
            .init();
        return Ok(());
    }

    let directives = if silent {
        "warn,whisper_rs=error"
    } else {
        "info,whisper_rs=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::builder().parse(directives)?)
        .event_format(CliFormatter)
        .with_writer(std::io::stderr)
        .with_ansi(ansi)
        .init();
    Ok(())
}

fn report_progress(progress_bar: &ProgressBar, progress: Progress) {
    if progress_bar.length() != Some(progress.total as u64) {
        progress_bar.set_length(progress.total as u64);
    }
    progress_bar.set_position(progress.completed as u64);
}

fn report_failure(e: &ParleyError) {
    error!("{}", e);
    if matches!(e, ParleyError::Model(_)) {
        error!(
            "Download a model with: {}{}",
            env!("CARGO_PKG_NAME").cyan(),
            " models download base.en".cyan()
        );
    }
}

fn build_config(cli: &Cli) -> TranscriptionConfig {
    let mut config = TranscriptionConfig::new()
        .with_silence_length(cli.silence_length)
        .with_silence_threshold(cli.silence_thresh)
        .with_padding(cli.padding)
        .with_language(cli.language.clone())
        .with_ambient_noise(cli.ambient_noise)
        .with_keep_temporary(cli.keep_temporary)
        .with_temp_dir(cli.temp_dir.clone())
        .with_max_workers(cli.max_workers)
        .with_silent(cli.silent)
        .with_engine(cli.engine)
        .with_gpu(!cli.no_gpu);

    if let Some(model) = &cli.model {
        config = config.with_model_path(model.clone());
    }
    if let Some(endpoint) = &cli.endpoint {
        config = config.with_endpoint(endpoint.clone());
    }
    if let Some(api_key) = &cli.api_key {
        config = config.with_api_key(api_key.clone());
    }
    if let Some(remote_model) = &cli.remote_model {
        config.http.model = remote_model.clone();
    }
    config
}

fn print_summary(input: &Path, output: &Path, config: &TranscriptionConfig) {
    let rows: [(&str, String); 10] = [
        ("Input File", input.display().to_string()),
        ("Output File", output.display().to_string()),
        ("Language", config.language.clone()),
        ("Silence Length", format!("{} ms.", config.silence_length_ms)),
        (
            "Silence Threshold",
            format!("{} dBFS", config.silence_threshold_dbfs),
        ),
        ("Padding", format!("{} ms.", config.padding_ms)),
        ("Adapt to Noise", config.adapt_to_ambient_noise.to_string()),
        (
            "Keep temporary files",
            config.keep_temporary_files.to_string(),
        ),
        ("Max Workers", config.max_workers.to_string()),
        ("Engine", config.engine.to_string()),
    ];

    println!();
    println!("{}", "Speech to Text process".blue().bold());
    for (label, value) in rows {
        println!("{:<21}: {}", label, value.green());
    }
    println!();
}

const ABOUT: &str = "Transcribe long recordings by splitting them on silence";

#[derive(Parser, Debug)]
#[command(name = env!("CARGO_PKG_NAME"), version, about = ABOUT)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Audio file to transcribe
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Transcript path (defaults to INPUT with a .txt extension)
    #[arg(value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Consider silence anything longer than this many ms
    #[arg(short = 'l', long, default_value_t = 700)]
    silence_length: u32,

    /// Consider silent anything quieter than this many dBFS
    #[arg(short = 't', long, default_value_t = -40.0, allow_negative_numbers = true)]
    silence_thresh: f32,

    /// Directory for temporary segment files
    #[arg(short = 'T', long, default_value = "./tmp")]
    temp_dir: PathBuf,

    /// Silence added at both ends of each segment, in ms
    #[arg(short = 'p', long, default_value_t = 100)]
    padding: u32,

    /// Language to use for speech recognition
    #[arg(short = 'L', long, default_value = "en-US")]
    language: String,

    /// Try to adapt listening to ambient noise
    #[arg(short = 'n', long)]
    ambient_noise: bool,

    /// Do not remove temporary audio files (debugging)
    #[arg(short = 'k', long)]
    keep_temporary: bool,

    /// Do not print anything on screen
    #[arg(short = 's', long)]
    silent: bool,

    /// Number of concurrent transcriptions
    #[arg(short = 'm', long, default_value_t = num_cpus::get())]
    max_workers: usize,

    /// Speech-to-text backend
    #[arg(long, default_value = "whisper", value_parser = parse_engine)]
    engine: Engine,

    /// Path to a ggml Whisper model (whisper engine)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Disable GPU acceleration (whisper engine)
    #[arg(long)]
    no_gpu: bool,

    /// Base URL of an OpenAI-compatible API (http engine)
    #[arg(long)]
    endpoint: Option<String>,

    /// API key for the http engine
    #[arg(long, env = "PARLEY_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Remote model name (http engine)
    #[arg(long)]
    remote_model: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

fn parse_engine(value: &str) -> Result<Engine, String> {
    Engine::from_str(value).map_err(|_| format!("unknown engine '{}' (whisper, http)", value))
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Model management commands
    Models {
        #[command(subcommand)]
        command: ModelCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ModelCommands {
    /// Download a Whisper model
    Download {
        /// Model to download (e.g., base.en, small, large-v3)
        #[arg(value_name = "MODEL")]
        model: String,

        /// Force download even if the model is already downloaded
        #[arg(short, long)]
        force: bool,
    },
    /// List models (downloaded by default, use --available to list all available models)
    List {
        /// List all available models instead of downloaded models
        #[arg(short, long)]
        available: bool,
    },
}

async fn handle_command(command: Commands, verbose: bool) -> anyhow::Result<()> {
    match command {
        Commands::Models { command } => handle_model_command(command, verbose).await,
    }
}

async fn handle_model_command(command: ModelCommands, verbose: bool) -> anyhow::Result<()> {
    let model_manager = ModelManager::new()?;

    match command {
        ModelCommands::Download { model, force } => {
            let whisper_model = WhisperModel::from_str(&model).map_err(|_| {
                anyhow::anyhow!(
                    "Unknown model: {}. Use 'models list --available' to see available models.",
                    model
                )
            })?;

            if !force && model_manager.is_downloaded(whisper_model) {
                println!(
                    "{} Model {} is already downloaded.",
                    "Info:".blue().bold(),
                    whisper_model
                );
                return Ok(());
            }

            println!(
                "{} Downloading model: {} ({})",
                "Info:".blue().bold(),
                whisper_model,
                whisper_model.description()
            );

            let progress_bar = ProgressBar::new(whisper_model.size());
            progress_bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
                    .progress_chars("#>-"),
            );

            model_manager
                .download_with_progress(whisper_model, |downloaded, total| {
                    if let Some(total) = total {
                        if progress_bar.length() != Some(total) {
                            progress_bar.set_length(total);
                        }
                    }
                    progress_bar.set_position(downloaded);
                })
                .await?;

            let elapsed = progress_bar.elapsed();
            let per_sec = progress_bar.position() as f64 / elapsed.as_secs_f64().max(0.001);
            progress_bar.finish_and_clear();

            println!(
                "{} Model downloaded in {:#} ({}{} avg).",
                "Success:".green().bold(),
                HumanDuration(elapsed).cyan(),
                HumanBytes(per_sec as u64).cyan(),
                "/s".cyan()
            );
        }

        ModelCommands::List { available } => {
            if available {
                println!("{}", "Available Whisper Models:".blue().bold());
                println!();
                for model in WhisperModel::all() {
                    let marker = if model_manager.is_downloaded(model) {
                        " (downloaded)".green().to_string()
                    } else {
                        String::new()
                    };
                    println!(
                        "  {} - {}{}",
                        model.as_str().green().bold(),
                        model.description().dimmed(),
                        marker
                    );
                }
                println!();
                println!(
                    "{}{}{}",
                    "Usage: ".dimmed(),
                    env!("CARGO_PKG_NAME").cyan().dimmed(),
                    " models download <model>".cyan().dimmed()
                );
                return Ok(());
            }

            let downloaded = model_manager.downloaded_models();
            if downloaded.is_empty() {
                println!("{} No models downloaded yet.", "Info:".blue().bold());
                println!(
                    "Use {}{} to download a model.",
                    env!("CARGO_PKG_NAME").cyan(),
                    " models download base.en".cyan()
                );
                return Ok(());
            }

            println!("{} Downloaded models:", "Info:".blue().bold());
            println!();
            for model in downloaded {
                let path = model_manager.model_path(model);
                let size = std::fs::metadata(&path)
                    .map(|m| HumanBytes(m.len()).to_string())
                    .unwrap_or_else(|_| "unknown size".to_string());

                println!(
                    "  {} - {} ({})",
                    model.as_str().green(),
                    model.description().dimmed(),
                    size.yellow()
                );
                if verbose {
                    println!("    Path: {}", path.display().to_string().dimmed());
                }
            }
            println!();
            println!(
                "XDG data directory: {}",
                model_manager.models_dir().display().to_string().dimmed()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults_match_config() {
        let cli = Cli::try_parse_from(["parley", "talk.mp3"]).unwrap();
        let config = build_config(&cli);
        let defaults = TranscriptionConfig::default();

        assert_eq!(config.silence_length_ms, defaults.silence_length_ms);
        assert_eq!(config.silence_threshold_dbfs, defaults.silence_threshold_dbfs);
        assert_eq!(config.padding_ms, defaults.padding_ms);
        assert_eq!(config.language, defaults.language);
        assert_eq!(config.temp_dir, defaults.temp_dir);
        assert_eq!(config.max_workers, defaults.max_workers);
        assert_eq!(config.engine, Engine::Whisper);
        assert!(cli.output.is_none());
    }

    #[test]
    fn test_short_flags() {
        let cli = Cli::try_parse_from([
            "parley", "-l", "500", "-t", "-35", "-p", "50", "-L", "fr-FR", "-n", "-k", "-s", "-m",
            "3", "-T", "/tmp/parley", "in.wav", "out.txt",
        ])
        .unwrap();
        let config = build_config(&cli);

        assert_eq!(config.silence_length_ms, 500);
        assert_eq!(config.silence_threshold_dbfs, -35.0);
        assert_eq!(config.padding_ms, 50);
        assert_eq!(config.language, "fr-FR");
        assert!(config.adapt_to_ambient_noise);
        assert!(config.keep_temporary_files);
        assert!(config.silent);
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.temp_dir, PathBuf::from("/tmp/parley"));
        assert_eq!(cli.output, Some(PathBuf::from("out.txt")));
    }

    #[test]
    fn test_http_engine_flags() {
        let cli = Cli::try_parse_from([
            "parley",
            "--engine",
            "http",
            "--endpoint",
            "http://localhost:8000/v1",
            "--api-key",
            "secret",
            "in.wav",
        ])
        .unwrap();
        let config = build_config(&cli);

        assert_eq!(config.engine, Engine::Http);
        assert_eq!(config.http.endpoint.as_deref(), Some("http://localhost:8000/v1"));
        assert_eq!(config.http.api_key.as_deref(), Some("secret"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_engine_rejected() {
        assert!(Cli::try_parse_from(["parley", "--engine", "google", "in.wav"]).is_err());
    }
}
