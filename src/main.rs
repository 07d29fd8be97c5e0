use megabonk_vision::args::Args;
use megabonk_vision::detection::create_progress_channel;
use megabonk_vision::match_image::create_default_config;
use megabonk_vision::{DetectError, DetectResult, DetectionConfig, ItemCatalog, ItemDetector};
use megabonk_vision::{TemplateStore, TrainingIndex};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

fn main() -> ExitCode {
    let Some(args) = Args::parse() else {
        return ExitCode::SUCCESS;
    };

    let default_filter = if args.debug_mode { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("❌ Failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> DetectResult<DetectionConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|source| DetectError::Io {
                path: path.clone(),
                source,
            })?;
            DetectionConfig::from_json_str(&text).map_err(|source| DetectError::Json {
                path: path.clone(),
                source,
            })?
        }
        None => create_default_config(),
    };
    if args.strict {
        config.calibration.strict_border = true;
    }
    Ok(config)
}

async fn run(args: Args) -> DetectResult<()> {
    let config = load_config(&args)?;
    let catalog = ItemCatalog::load_from_file(&args.catalog)?;
    log::info!("📁 Loaded {} catalog items", catalog.len());

    let training = match &args.training {
        Some(path) => Some(TrainingIndex::load_from_file(path)?),
        None => None,
    };
    let training_dir = args
        .training
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or_else(|| Path::new("."));
    let store = TemplateStore::load_from_directory(
        &catalog,
        &args.icons,
        training.as_ref().map(|index| (index, training_dir)),
        config.cache.template_capacity,
    )?;

    let bytes = tokio::fs::read(&args.screenshot)
        .await
        .map_err(|source| DetectError::Io {
            path: args.screenshot.clone(),
            source,
        })?;

    let detector = Arc::new(ItemDetector::new(store, config));
    let (tx, mut rx) = create_progress_channel(32);
    let progress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            log::debug!("⏳ {:>3}% {}", event.percent, event.message);
        }
    });

    let detections = detector
        .detect_encoded(bytes, Duration::from_millis(args.decode_timeout_ms), Some(tx))
        .await?;
    progress.await?;

    let output = serde_json::to_string_pretty(&detections).map_err(|source| DetectError::Json {
        path: args.screenshot.clone(),
        source,
    })?;
    println!("{output}");

    let stats = detector.stats();
    log::info!(
        "✅ {} items in {}ms ({} regions evaluated)",
        detections.len(),
        stats.last_run_ms,
        stats.regions_evaluated
    );
    Ok(())
}
