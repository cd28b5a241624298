use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use leaf_api::{create_router, ApiState};
use leaf_gpio::{actuator_from_config, doctor as gpio_doctor, ActuationConfig, ActuationDecider, ActuationDispatcher, GpioConfig};
use leaf_station::{doctor as station_doctor, Analyzer, ManualConfig, SchedulerConfig, SourceFactory, VideoService};
use leaf_uplink::{classify_with_timeout, doctor as uplink_doctor, ClassifierConfig, HttpClassifier, Journal, JournalConfig};
use leaf_vision::{doctor as vision_doctor, CameraConfig, DetectorConfig, Detections, Frame, LeafDetector};

#[derive(Debug, Parser)]
#[command(name = "leafwatch", version, about = "LeafWatch - camera leaf monitoring and irrigation station")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and the attached hardware.
    Doctor,
    /// Run the HTTP station.
    Serve,
    /// Run the leaf detector over an image file and print the boxes.
    Detect {
        image: String,
        /// Also send every crop to the classification service.
        #[arg(long)]
        classify: bool,
    },
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct Config {
    server: ServerCfg,
    camera: CameraConfig,
    detector: DetectorConfig,
    scheduler: SchedulerConfig,
    manual: ManualConfig,
    classifier: ClassifierConfig,
    actuation: ActuationConfig,
    gpio: GpioConfig,
    journal: JournalConfig,
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct ServerCfg {
    bind: String,
    snapshot_quality: u8,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self { bind: "0.0.0.0:5000".into(), snapshot_quality: 80 }
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg).await?,
        Command::Serve => serve(cfg).await?,
        Command::Detect { image, classify } => detect(&cfg, &image, classify).await?,
    }
    Ok(())
}

async fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    cfg.server.bind.parse::<SocketAddr>().with_context(|| format!("server.bind invalid: {}", cfg.server.bind))?;
    vision_doctor::check_camera(&cfg.camera)?;
    vision_doctor::check_detector(&cfg.detector)?;
    station_doctor::check_scheduler(&cfg.scheduler)?;
    station_doctor::check_manual(&cfg.manual)?;
    uplink_doctor::check_classifier(&cfg.classifier)?;
    uplink_doctor::check_journal(&cfg.journal)?;
    gpio_doctor::check_thresholds(&cfg.actuation)?;
    gpio_doctor::check_gpio(&cfg.gpio)?;

    // A camera that is merely busy should not fail the whole check.
    let mut src = leaf_vision::source_from_config(&cfg.camera)?;
    match src.open(cfg.camera.default_index).await {
        Ok(()) => info!("doctor: camera {} ({}) OK", cfg.camera.default_index, src.name()),
        Err(e) => warn!("doctor: camera probe failed: {}", e),
    }
    src.close().await;

    info!("doctor: OK");
    Ok(())
}

fn build_analyzer(cfg: &Config, detector: Arc<LeafDetector>) -> Result<Analyzer> {
    let classifier = HttpClassifier::new(&cfg.classifier).context("classifier client")?;
    let actuator = actuator_from_config(&cfg.gpio)?;
    info!("actuation: {} backend, irrigate >= {}, alert >= {}", actuator.name(), cfg.actuation.high_threshold, cfg.actuation.low_threshold);
    let dispatcher = ActuationDispatcher::new(actuator, Duration::from_secs(cfg.actuation.min_spray_interval_s));
    Ok(Analyzer::new(
        detector,
        Arc::new(classifier),
        cfg.classifier.clone(),
        ActuationDecider::new(cfg.actuation.clone()),
        dispatcher,
        Journal::new(&cfg.journal),
    ))
}

async fn serve(cfg: Config) -> Result<()> {
    info!("serve: starting");
    let detector = Arc::new(LeafDetector::from_config(cfg.detector.clone()));
    let analyzer = Arc::new(build_analyzer(&cfg, detector)?);

    let sources: SourceFactory = Arc::new(leaf_vision::source_from_config);
    let video = Arc::new(VideoService::new(
        cfg.camera.clone(),
        cfg.scheduler.clone(),
        cfg.manual.clone(),
        sources,
        analyzer,
    ));

    let app = create_router(ApiState { video: video.clone(), snapshot_quality: cfg.server.snapshot_quality });
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("bind {}", cfg.server.bind))?;
    info!("serve: listening on {}", listener.local_addr()?);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    // Release the camera and wait for the scheduler before exiting.
    video.stop_video().await;
    info!("serve: stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("ctrl-c handler failed: {}", e);
        std::future::pending::<()>().await;
    }
    info!("serve: shutdown requested");
}

async fn detect(cfg: &Config, path: &str, classify: bool) -> Result<()> {
    let img = image::open(path).with_context(|| format!("open image {}", path))?.to_rgb8();
    let frame = Frame::new(img, 0);
    let detector = LeafDetector::from_config(cfg.detector.clone());
    let dets = detector.detect_tagged(&frame);

    match &dets {
        Detections::Primary(_) => println!("strategy: primary"),
        Detections::Fallback { reason, .. } => println!("strategy: fallback ({:?})", reason),
    }
    let classifier = if classify { Some(HttpClassifier::new(&cfg.classifier)?) } else { None };
    let timeout = Duration::from_millis(cfg.classifier.timeout_ms);

    for (i, b) in dets.boxes().iter().enumerate() {
        let bb = b.bbox;
        print!("leaf {} conf={:.2} box=({},{},{},{})", i, b.confidence, bb.x, bb.y, bb.w, bb.h);
        if let Some(c) = &classifier {
            let Some(crop) = frame.crop_resized(&bb, cfg.classifier.input_size) else {
                println!(" crop=outside");
                continue;
            };
            let jpeg = leaf_vision::frame::encode_jpeg(&crop, cfg.classifier.jpeg_quality)?;
            match classify_with_timeout(c, jpeg, timeout).await {
                Ok(r) => print!(" disease={} severity={:.1}", r.disease, r.severity),
                Err(e) => print!(" error={}", e),
            }
        }
        println!();
    }
    Ok(())
}
