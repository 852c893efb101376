// imagen - generate images from text prompts with a hosted inference endpoint

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use imagen::config::CONFIG_FILE_NAME;
use imagen::view::{self, TerminalView};
use imagen::{Controller, Credential, ImageReference, Outcome, ResponseEnvelope, Settings};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate images from text prompts with a hosted inference endpoint", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Inference endpoint (overrides config)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Bearer token (overrides HF_TOKEN; prefer the environment)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Request timeout in seconds, 0 to wait indefinitely (overrides config)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Success body shape: base64-text, binary or json:/pointer (overrides config)
    #[arg(long, global = true)]
    envelope: Option<ResponseEnvelope>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit one prompt and print or save the result
    Generate {
        /// Text prompt describing the image to generate
        #[arg(short, long)]
        prompt: String,

        /// Write the decoded image here instead of printing the data URI
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Interactive form: one prompt per line, images saved to the output directory
    Form {
        /// Directory for generated images (overrides config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Write an example config file
    InitConfig {
        /// Destination (default: ./imagen.toml)
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("imagen={}", log_level).to_lowercase().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match dotenv {
        Ok(path) => tracing::debug!("Loaded .env file from: {}", path.display()),
        Err(e) => tracing::debug!(".env file not loaded: {}", e),
    }

    if let Command::InitConfig { path } = &args.command {
        let path = path.clone().unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        return init_config(&path);
    }

    let settings = load_settings(&args)?;

    match args.command {
        Command::Generate { prompt, output } => generate(settings, &prompt, output.as_deref()).await,
        Command::Form { output_dir } => {
            let output_dir = output_dir.unwrap_or_else(|| settings.output_dir.clone());
            run_form(settings, output_dir).await
        }
        Command::InitConfig { .. } => Ok(()),
    }
}

/// Defaults, then config file, then environment, then flags
fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    let mut settings = Settings::load(args.config.as_deref())?;
    settings.apply_env(|key| std::env::var(key).ok())?;

    if let Some(endpoint) = &args.endpoint {
        settings.endpoint = endpoint.clone();
    }
    if let Some(token) = &args.token {
        settings.token = Some(Credential::new(token.clone()));
    }
    if let Some(timeout) = args.timeout {
        settings.timeout_secs = timeout;
    }
    if let Some(envelope) = &args.envelope {
        settings.envelope = envelope.clone();
    }

    if settings.token.is_none() {
        tracing::warn!("HF_TOKEN is not set; requests will fail until a token is configured");
    }
    tracing::info!(
        endpoint = %settings.endpoint,
        timeout = ?settings.timeout(),
        envelope = ?settings.envelope,
        stale_policy = ?settings.stale_policy,
        "settings loaded"
    );

    Ok(settings)
}

fn init_config(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        bail!("{} already exists, not overwriting", path.display());
    }
    Settings::example().to_file(path)?;
    println!("Created example config at: {}", path.display());
    println!("Set HF_TOKEN in your environment or a .env file to authorize requests");
    Ok(())
}

async fn generate(settings: Settings, prompt: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let controller = Controller::from_settings(&settings);
    let view = TerminalView::new();

    let indicator = tokio::spawn(view::busy_indicator(controller.subscribe()));
    let outcome = controller.submit(prompt).await;
    indicator.abort();
    view::clear_busy_line();

    match outcome? {
        Outcome::Succeeded(image) => match output {
            Some(path) => {
                save_image(&image, path)?;
                view.show(&controller.snapshot(), Some(path));
            }
            None => {
                view.show(&controller.snapshot(), None);
                println!("{}", image.data_uri());
            }
        },
        Outcome::Failed(_) => {
            view.show(&controller.snapshot(), None);
            std::process::exit(1);
        }
        Outcome::Superseded => {}
    }

    Ok(())
}

/// Reads prompts from stdin; refuses new ones while a submission is pending
async fn run_form(settings: Settings, output_dir: PathBuf) -> anyhow::Result<()> {
    let controller = Arc::new(Controller::from_settings(&settings));
    let view = TerminalView::new();

    view.show(&controller.snapshot(), None);
    view.notice("Type a prompt and press Enter. :q to quit.");

    let indicator = tokio::spawn(view::busy_indicator(controller.subscribe()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: Option<JoinHandle<()>> = None;

    while let Some(line) = lines.next_line().await? {
        let prompt = line.trim();

        if matches!(prompt, ":q" | ":quit") {
            break;
        }
        if prompt.is_empty() {
            view.notice("A prompt is required");
            continue;
        }
        if controller.is_in_flight() || pending.as_ref().is_some_and(|task| !task.is_finished()) {
            view.notice("Still generating, please wait");
            continue;
        }

        controller.set_prompt(prompt);
        let controller = controller.clone();
        let output_dir = output_dir.clone();

        pending = Some(tokio::spawn(async move {
            let outcome = controller.submit_current().await;
            view::clear_busy_line();
            let view = TerminalView::new();

            match outcome {
                Ok(Outcome::Succeeded(image)) => {
                    let saved = match save_to_dir(&image, &output_dir) {
                        Ok(path) => Some(path),
                        Err(e) => {
                            tracing::warn!("Could not save image: {:#}", e);
                            None
                        }
                    };
                    view.show(&controller.snapshot(), saved.as_deref());
                }
                Ok(Outcome::Failed(_)) => view.show(&controller.snapshot(), None),
                Ok(Outcome::Superseded) => {}
                Err(e) => view.notice(&e.to_string()),
            }
        }));
    }

    if let Some(task) = pending {
        task.await?;
    }
    indicator.abort();

    Ok(())
}

fn save_image(image: &ImageReference, path: &Path) -> anyhow::Result<()> {
    let bytes = image
        .decode()
        .context("response payload is not valid base64")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!("Image saved to: {}", path.display());
    Ok(())
}

/// Timestamped file name, extension sniffed from the image bytes.
///
/// Never overwrites: a taken name gets a `-<n>` suffix.
fn save_to_dir(image: &ImageReference, dir: &Path) -> anyhow::Result<PathBuf> {
    let bytes = image
        .decode()
        .context("response payload is not valid base64")?;
    let extension = image.guess_extension().unwrap_or("jpg");
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f").to_string();
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    for attempt in 0..1000 {
        let name = match attempt {
            0 => format!("imagen-{}.{}", stamp, extension),
            n => format!("imagen-{}-{}.{}", stamp, n, extension),
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(&bytes)
                    .with_context(|| format!("writing {}", path.display()))?;
                tracing::info!("Image saved to: {}", path.display());
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e).with_context(|| format!("creating {}", path.display())),
        }
    }
    bail!("no free file name in {}", dir.display())
}
