use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::fs;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use vqa_core::{
    AnalysisStatus, AppConfig, Controller, GcsObjectStore, InferenceClient, LocalObjectStore,
    ModelTier, ObjectStore, StorageBackend, StorageGateway, VertexBackend,
    format_analysis_readable, format_duration, inference::vertex::access_token_from_env,
};

const DEFAULT_PROMPT: &str = "Give time steps of any aircraft tries an attempt to refuel, do not leave out any attempts due to any reason? \
During this time layout time for each attempt whether successful or unsuccessful.";

/// CLI wrapper for ModelTier enum (needed for clap ValueEnum)
#[derive(Clone, Copy, Default, ValueEnum)]
enum CliTier {
    Light,
    #[default]
    Pro,
}

impl From<CliTier> for ModelTier {
    fn from(cli: CliTier) -> Self {
        match cli {
            CliTier::Light => ModelTier::Light,
            CliTier::Pro => ModelTier::Pro,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CliStorage {
    Gcs,
    Local,
}

#[derive(Parser)]
#[command(name = "vqa")]
#[command(about = "Upload videos to cloud storage and analyze them with multimodal AI models")]
struct Cli {
    /// Storage bucket holding the videos (overrides VQA_BUCKET)
    #[arg(short, long, global = true)]
    bucket: Option<String>,

    /// Storage backend (overrides VQA_STORAGE)
    #[arg(long, global = true)]
    storage: Option<CliStorage>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List videos available in the bucket
    List,

    /// Upload a local video file
    Upload {
        /// Path to the video file
        path: PathBuf,

        /// Run analysis on the uploaded video right away
        #[arg(long)]
        analyze: bool,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// Print a time-limited playback URL for a stored video
    Preview {
        /// Stored video name
        name: String,
    },

    /// Download a stored video to a local file
    Download {
        /// Stored video name
        name: String,

        /// Destination path
        out: PathBuf,
    },

    /// Analyze a stored video
    Run {
        /// Stored video name
        name: String,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },
}

#[derive(Args)]
struct AnalysisArgs {
    /// Model tier used for the analysis
    #[arg(short, long, default_value = "pro")]
    tier: CliTier,

    /// Question to ask about the video
    #[arg(short, long, default_value = DEFAULT_PROMPT)]
    prompt: String,
}

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vqa=info,vqa_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{} {}", style("Error:").red().bold(), message);
    std::process::exit(1);
}

async fn build_store(config: &AppConfig) -> Result<Arc<dyn ObjectStore>> {
    Ok(match &config.storage {
        StorageBackend::Gcs => Arc::new(GcsObjectStore::new()),
        StorageBackend::Local {
            root,
            base_url,
            signing_key,
        } => {
            let store = LocalObjectStore::new(root.clone(), base_url, signing_key);
            store.create_namespace(&config.namespace).await?;
            Arc::new(store)
        }
    })
}

async fn build_controller(config: &AppConfig, needs_inference: bool) -> Result<Controller> {
    // Validate inference settings early
    if needs_inference {
        if let Err(e) = config.require_project() {
            fail(e);
        }
        if let Err(e) = access_token_from_env() {
            fail(e);
        }
    }

    let store = build_store(config).await?;
    let gateway = StorageGateway::new(store, config.namespace.clone());
    let resolver = config.model_resolver()?;
    let backend = VertexBackend::new(
        config.inference.project.as_deref().unwrap_or_default(),
        &config.inference.location,
        access_token_from_env().ok(),
    );
    let inference =
        InferenceClient::with_limit(Arc::new(backend), config.inference.max_response_bytes);

    Ok(Controller::new(gateway, resolver, inference))
}

async fn run_analysis(
    controller: &mut Controller,
    name: &str,
    args: &AnalysisArgs,
    json: bool,
) -> Result<()> {
    let tier: ModelTier = args.tier.into();
    let step_start = Instant::now();
    let spinner = create_spinner(&format!("Analyzing video with {} tier...", tier.name()));

    let result = match controller.run_analysis(name, tier, &args.prompt).await {
        Ok(result) => result,
        Err(e) => {
            spinner.finish_and_clear();
            fail(e);
        }
    };

    match result.status {
        AnalysisStatus::Empty => spinner.finish_with_message(format!(
            "{} Analysis returned no text {}",
            style("!").yellow().bold(),
            style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
        )),
        _ => spinner.finish_with_message(format!(
            "{} Analysis complete! {}",
            style("✓").green().bold(),
            style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
        )),
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("{}", style("─".repeat(60)).dim());
    println!("{}", format_analysis_readable(name, tier, &result));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let mut config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => fail(e),
    };
    if let Some(bucket) = cli.bucket {
        config.namespace = bucket;
    }
    match cli.storage {
        Some(CliStorage::Gcs) => config.storage = StorageBackend::Gcs,
        Some(CliStorage::Local) if config.storage == StorageBackend::Gcs => {
            config.storage = StorageBackend::Local {
                root: vqa_core::config::default_local_root(),
                base_url: vqa_core::config::DEFAULT_LOCAL_BASE_URL.to_string(),
                signing_key: vqa_core::config::DEFAULT_LOCAL_SIGNING_KEY.to_string(),
            };
        }
        _ => {}
    }

    let needs_inference = matches!(
        cli.command,
        Command::Run { .. } | Command::Upload { analyze: true, .. }
    );
    let mut controller = build_controller(&config, needs_inference).await?;

    if !cli.json {
        println!(
            "\n{}  {}\n",
            style("vqa").cyan().bold(),
            style(format!("Video Analysis · {}", controller.namespace())).dim()
        );
    }

    match cli.command {
        Command::List => {
            let videos = match controller.list_videos().await {
                Ok(videos) => videos,
                Err(e) => fail(e),
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&videos)?);
            } else if videos.is_empty() {
                println!(
                    "{} No videos found in the bucket.",
                    style("!").yellow().bold()
                );
            } else {
                for video in &videos {
                    println!("{} {}", style("•").dim(), video);
                }
            }
        }

        Command::Upload {
            path,
            analyze,
            analysis,
        } => {
            let original_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            let bytes = fs::read(&path).await?;

            let step_start = Instant::now();
            let spinner = create_spinner(&format!("Uploading {}...", original_name));
            let stored = match controller.upload_video(bytes, &original_name).await {
                Ok(stored) => stored,
                Err(e) => {
                    spinner.finish_and_clear();
                    fail(e);
                }
            };
            spinner.finish_with_message(format!(
                "{} Uploaded: {} {}",
                style("✓").green().bold(),
                style(&stored).cyan(),
                style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
            ));

            if analyze {
                run_analysis(&mut controller, &stored, &analysis, cli.json).await?;
            } else if cli.json {
                println!("{}", serde_json::json!({ "name": stored }));
            }
        }

        Command::Preview { name } => {
            let signed = match controller.select_video(&name).await {
                Ok(signed) => signed,
                Err(e) => fail(e),
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&signed)?);
            } else {
                println!("{} {}", style("URL:").dim(), style(&signed.url).cyan());
                println!(
                    "{} {}",
                    style("Expires:").dim(),
                    signed.expires_at.to_rfc3339()
                );
            }
        }

        Command::Download { name, out } => {
            let bytes = match controller.fetch_video(&name).await {
                Ok(bytes) => bytes,
                Err(e) => fail(e),
            };
            fs::write(&out, &bytes).await?;
            println!(
                "{} Saved {} bytes to {}",
                style("✓").green().bold(),
                bytes.len(),
                style(out.display()).cyan()
            );
        }

        Command::Run { name, analysis } => {
            run_analysis(&mut controller, &name, &analysis, cli.json).await?;
        }
    }

    Ok(())
}
