use clap::{Parser, Subcommand};
use reid_core::{config::Config, AnalysisParams, AnalysisResult, ReidService};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "reid")]
#[command(about = "Find a person from a reference photo in video footage", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Load configuration from this file instead of the default locations
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Search one video for the person in the reference image
    Analyze {
        /// Reference image of the person to find
        reference: PathBuf,
        /// Video footage to search
        video: PathBuf,
        /// Minimum similarity for a match (0.0-1.0)
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Number of top matches to return (1-10)
        #[arg(short = 'n', long)]
        top_n: Option<usize>,
        /// Write the JSON result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also write each matched crop as a JPEG into this directory
        #[arg(long)]
        save_crops: Option<PathBuf>,
    },
    /// Search several videos for the same person
    Batch {
        /// Reference image of the person to find
        reference: PathBuf,
        /// Video files to search
        #[arg(required = true)]
        videos: Vec<PathBuf>,
        /// Minimum similarity for a match (0.0-1.0)
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Number of top matches to return per video (1-10)
        #[arg(short = 'n', long)]
        top_n: Option<usize>,
        /// Write the JSON result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Load both models and report whether the service is ready
    Check,
    /// Show configuration
    Config {
        /// Validate configuration
        #[arg(long)]
        validate: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            reference,
            video,
            threshold,
            top_n,
            output,
            save_crops,
        } => cmd_analyze(&config, reference, video, threshold, top_n, output, save_crops),
        Commands::Batch {
            reference,
            videos,
            threshold,
            top_n,
            output,
        } => cmd_batch(&config, reference, videos, threshold, top_n, output),
        Commands::Check => cmd_check(&config),
        Commands::Config { validate } => cmd_config(&config, validate),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    Ok(match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    })
}

/// Validate request parameters before any model is loaded
fn request_params(
    config: &Config,
    threshold: Option<f64>,
    top_n: Option<usize>,
) -> anyhow::Result<AnalysisParams> {
    let defaults = AnalysisParams::from_config(&config.matching);
    let params = AnalysisParams::new(
        threshold.unwrap_or(defaults.threshold),
        top_n.unwrap_or(defaults.top_n),
    )?;
    Ok(params)
}

fn write_json<T: serde::Serialize>(value: &T, output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            log::info!("Result written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn save_crops(result: &AnalysisResult, dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    for m in &result.matches {
        let path = dir.join(format!("rank_{}_frame_{}.jpg", m.rank, m.frame_number));
        std::fs::write(&path, m.image_bytes()?)?;
        log::info!("Saved crop {}", path.display());
    }
    Ok(())
}

fn cmd_analyze(
    config: &Config,
    reference: PathBuf,
    video: PathBuf,
    threshold: Option<f64>,
    top_n: Option<usize>,
    output: Option<PathBuf>,
    crops_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let params = request_params(config, threshold, top_n)?;
    let mut service = ReidService::new(config)?;

    let start = Instant::now();
    let result = service.analyze(&reference, &video, &params);
    log::info!("Analysis took {:.2}s", start.elapsed().as_secs_f64());

    write_json(&result, output.as_deref())?;

    if !result.is_success() {
        anyhow::bail!(
            "Analysis failed: {}",
            result.message.as_deref().unwrap_or("unknown error")
        );
    }

    if let Some(dir) = crops_dir {
        save_crops(&result, &dir)?;
    }

    Ok(())
}

fn cmd_batch(
    config: &Config,
    reference: PathBuf,
    videos: Vec<PathBuf>,
    threshold: Option<f64>,
    top_n: Option<usize>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let params = request_params(config, threshold, top_n)?;
    let mut service = ReidService::new(config)?;

    let start = Instant::now();
    let entries = service.analyze_batch(&reference, videos.as_slice(), &params);
    log::info!(
        "Batch of {} videos took {:.2}s",
        entries.len(),
        start.elapsed().as_secs_f64()
    );

    write_json(
        &serde_json::json!({ "batch_results": entries }),
        output.as_deref(),
    )
}

fn cmd_check(config: &Config) -> anyhow::Result<()> {
    let start = Instant::now();
    let service = ReidService::new(config);
    let now = chrono::Local::now().to_rfc3339();

    let report = match &service {
        Ok(_) => serde_json::json!({
            "status": "healthy",
            "models_loaded": true,
            "load_time_ms": start.elapsed().as_millis() as u64,
            "timestamp": now,
        }),
        Err(e) => serde_json::json!({
            "status": "unavailable",
            "models_loaded": false,
            "message": e.to_string(),
            "timestamp": now,
        }),
    };
    write_json(&report, None)?;

    service.map(|_| ()).map_err(anyhow::Error::from)
}

fn cmd_config(config: &Config, validate: bool) -> anyhow::Result<()> {
    if validate {
        config.validate()?;
        println!("✓ Configuration is valid");
        return Ok(());
    }

    println!("Configuration:");
    println!();

    println!("[detection]");
    println!("  model = {:?}", config.detection.model_path);
    println!("  input_size = {}", config.detection.input_size);
    println!("  score_threshold = {}", config.detection.score_threshold);
    println!("  iou_threshold = {}", config.detection.iou_threshold);
    println!();

    println!("[embedding]");
    println!("  model = {:?}", config.embedding.model_path);
    println!(
        "  input = {}x{}",
        config.embedding.input_width, config.embedding.input_height
    );
    println!("  dimension = {}", config.embedding.dimension);
    println!("  mean = {:?}", config.embedding.mean);
    println!("  std = {:?}", config.embedding.std);
    println!();

    println!("[sampling]");
    println!("  frame_interval = {}", config.sampling.frame_interval);
    println!();

    println!("[matching]");
    println!("  confidence_floor = {}", config.matching.confidence_floor);
    println!("  min_crop_size = {}", config.matching.min_crop_size);
    println!("  default_threshold = {}", config.matching.default_threshold);
    println!("  default_top_n = {}", config.matching.default_top_n);
    println!();

    println!("[runtime]");
    if config.runtime.intra_threads == 0 {
        println!("  intra_threads = auto");
    } else {
        println!("  intra_threads = {}", config.runtime.intra_threads);
    }
    println!();

    println!("[debug]");
    println!("  save_frames = {}", config.debug.save_frames);
    println!("  output_dir = {:?}", config.debug.output_dir);

    Ok(())
}
