use std::env;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use stagehand_contracts::media::list_images;
use stagehand_contracts::session_log::SessionLog;
use stagehand_engine::{
    provision_webcam, reconcile_images, snapshot, translate_and_execute, ObsClient,
    OpenAiCompleter, TranslateError, WebcamConfig,
};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "stagehand", version, about = "Scene automation for a live video production app")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Add every image in a directory to a scene as fitted layers.
    Images(ImagesArgs),
    /// Create and configure a webcam source in the active scene.
    Webcam(WebcamArgs),
    /// Translate a free-form instruction into remote calls and run them.
    Do(DoArgs),
}

#[derive(Debug, Args)]
struct ConnectArgs {
    /// Control socket url; falls back to OBS_WS_URL.
    #[arg(long)]
    url: Option<String>,
    /// Control socket password; falls back to OBS_WS_PASSWORD.
    #[arg(long)]
    password: Option<String>,
    /// Append JSONL progress events to this file.
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ImagesArgs {
    /// Directory to scan for image files.
    dir: PathBuf,
    /// Target scene; defaults to the scene on program output.
    #[arg(long)]
    scene: Option<String>,
    #[command(flatten)]
    connect: ConnectArgs,
}

#[derive(Debug, Args)]
struct WebcamArgs {
    #[arg(long, default_value = "Webcam")]
    name: String,
    /// Explicit input kind; discovered when omitted.
    #[arg(long)]
    kind: Option<String>,
    /// Substring to select among enumerated devices.
    #[arg(long)]
    device: Option<String>,
    #[arg(long)]
    chroma_key: bool,
    #[arg(long)]
    color_correction: bool,
    #[arg(long, default_value_t = 1.0)]
    saturation: f64,
    #[arg(long, default_value_t = 0.0)]
    contrast: f64,
    #[command(flatten)]
    connect: ConnectArgs,
}

#[derive(Debug, Args)]
struct DoArgs {
    /// Free-form instruction for the translator.
    instruction: String,
    #[arg(long, default_value = "gpt-4o-mini")]
    text_model: String,
    #[command(flatten)]
    connect: ConnectArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("stagehand error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Images(args) => run_images(args),
        Command::Webcam(args) => run_webcam(args),
        Command::Do(args) => run_do(args),
    }
}

fn run_images(args: ImagesArgs) -> Result<i32> {
    let images = list_images(&args.dir)?;
    if images.is_empty() {
        println!("No image files in {}", args.dir.display());
        return Ok(0);
    }
    println!("Found {} image(s) in {}", images.len(), args.dir.display());

    let log = session_log(&args.connect);
    let mut remote = connect(&args.connect)?;
    let scene = match args.scene {
        Some(scene) => scene,
        None => snapshot::current_scene(&mut remote)?,
    };

    let summary = reconcile_images(&mut remote, &log, &images, &scene)?;
    for outcome in &summary.outcomes {
        println!("{}", outcome.describe());
    }
    println!(
        "Done: {} created, {} skipped in scene {scene}",
        summary.created, summary.skipped
    );
    Ok(0)
}

fn run_webcam(args: WebcamArgs) -> Result<i32> {
    let log = session_log(&args.connect);
    let mut remote = connect(&args.connect)?;
    let config = WebcamConfig {
        base_name: args.name,
        kind: args.kind,
        device_hint: args.device,
        chroma_key: args.chroma_key,
        color_correction: args.color_correction,
        saturation: args.saturation,
        contrast: args.contrast,
    };

    let summary = provision_webcam(&mut remote, &log, &config)?;
    println!(
        "Created {} ({}) using {}",
        summary.object_name, summary.kind_used, summary.device_chosen
    );
    Ok(0)
}

fn run_do(args: DoArgs) -> Result<i32> {
    let api_key = openai_api_key()?;
    let mut completer = OpenAiCompleter::new(&openai_api_base(), api_key, args.text_model)?;
    let log = session_log(&args.connect);
    let mut remote = connect(&args.connect)?;

    match translate_and_execute(&mut remote, &mut completer, &log, &args.instruction) {
        Ok(summary) => {
            for report in &summary.attempts {
                for outcome in &report.outcomes {
                    match &outcome.error {
                        Some(error) => {
                            println!("[attempt {}] failed {}: {error}", report.attempt, outcome.call.describe())
                        }
                        None => println!("[attempt {}] ok {}", report.attempt, outcome.call.describe()),
                    }
                }
            }
            println!(
                "Done after {} attempt(s): {} call(s) succeeded",
                summary.attempts.len(),
                summary.calls_succeeded()
            );
            Ok(0)
        }
        Err(err) => {
            if let Some(TranslateError::Exhausted { failures }) =
                err.downcast_ref::<TranslateError>()
            {
                eprintln!("{err}");
                for failure in failures {
                    eprintln!("  {}", failure.feedback_line());
                }
                return Ok(1);
            }
            Err(err)
        }
    }
}

fn connect(args: &ConnectArgs) -> Result<ObsClient> {
    let url = args
        .url
        .clone()
        .or_else(|| first_non_empty_env(&["OBS_WS_URL"]))
        .unwrap_or_else(|| "ws://127.0.0.1:4455".to_string());
    let password = args
        .password
        .clone()
        .or_else(|| first_non_empty_env(&["OBS_WS_PASSWORD"]));
    ObsClient::connect(&url, password.as_deref())
}

fn session_log(args: &ConnectArgs) -> SessionLog {
    match &args.events {
        Some(path) => SessionLog::to_file(path, Uuid::new_v4().to_string()),
        None => SessionLog::disabled(),
    }
}

fn first_non_empty_env(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(value) = env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn openai_api_key() -> Result<String> {
    match first_non_empty_env(&["OPENAI_API_KEY", "OPENAI_API_KEY_BACKUP"]) {
        Some(key) => Ok(key),
        None => bail!("Missing OPENAI_API_KEY (or OPENAI_API_KEY_BACKUP)."),
    }
}

fn openai_api_base() -> String {
    first_non_empty_env(&["OPENAI_API_BASE", "OPENAI_BASE_URL"])
        .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
        .trim_end_matches('/')
        .to_string()
}
