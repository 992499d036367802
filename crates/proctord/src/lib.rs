//! Exam Proctoring Daemon
//!
//! Monitors one exam session from a capture source until interrupted, then
//! prints the suspicious activity it logged.

pub mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use camera_capture::{CaptureOpener, ImageSequenceOpener};
use clap::Parser;
use face_analysis::{FrameAnalysisPipeline, VisionConfig};
use monitoring::{load_detector, CaptureScheduler, VerdictRecorder};
use storage::{ActivityRepository, JpegEvidenceSink};
use tracing::info;
use tracing_subscriber::EnvFilter;

pub use settings::Settings;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Settings file (TOML, YAML or JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Session to monitor
    #[arg(short, long, default_value = "local-session")]
    pub session: String,

    /// Exam the session belongs to
    #[arg(short, long, default_value = "local-exam")]
    pub exam: String,

    /// Replay images from this directory instead of a webcam
    #[arg(long)]
    pub frames: Option<PathBuf>,

    /// Use head pose and gaze analysis
    #[arg(long, default_value_t = false)]
    pub pose_aware: bool,
}

/// Initialize logging
pub fn init_logging(settings: &Settings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .context("invalid log level")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = if settings.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow!("failed to set tracing subscriber: {}", e))
}

/// Pick the capture source for the session
pub fn capture_opener(args: &Args) -> anyhow::Result<Arc<dyn CaptureOpener>> {
    if let Some(dir) = &args.frames {
        return Ok(Arc::new(ImageSequenceOpener::new(dir)));
    }
    webcam_opener()
}

#[cfg(feature = "webcam")]
fn webcam_opener() -> anyhow::Result<Arc<dyn CaptureOpener>> {
    Ok(Arc::new(camera_capture::WebcamOpener))
}

#[cfg(not(feature = "webcam"))]
fn webcam_opener() -> anyhow::Result<Arc<dyn CaptureOpener>> {
    Err(anyhow!("no capture source: pass --frames <dir> or build with the `webcam` feature"))
}

/// Apply command line overrides to the loaded settings
pub fn apply_args(mut settings: Settings, args: &Args) -> Settings {
    if args.pose_aware {
        settings.vision = VisionConfig {
            face_cascade_path: settings.vision.face_cascade_path.clone(),
            eye_cascade_path: settings.vision.eye_cascade_path.clone(),
            ..VisionConfig::pose_aware()
        };
    }
    settings
}

/// Monitor the requested session until Ctrl-C
pub async fn run(args: Args) -> anyhow::Result<()> {
    let settings = Settings::load(args.config.as_deref()).context("failed to load settings")?;
    let settings = apply_args(settings, &args);
    init_logging(&settings)?;

    info!("=== Proctor Vision v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Analysis mode: {:?}", settings.vision.mode);

    let detector = load_detector(&settings.vision, &settings.startup_retry)
        .await
        .context("detector assets unavailable")?;
    let pipeline = Arc::new(FrameAnalysisPipeline::new(Arc::new(detector), &settings.vision));

    let repository = Arc::new(ActivityRepository::with_capacity(settings.max_activity_records));
    let evidence = Arc::new(JpegEvidenceSink::new(settings.evidence.clone())?);
    let recorder = VerdictRecorder::new(repository.clone(), evidence);

    let scheduler = CaptureScheduler::new(
        settings.scheduler.clone(),
        capture_opener(&args)?,
        pipeline,
        recorder,
    );

    scheduler.start_monitoring(&args.session, &args.exam).await?;
    info!("Monitoring session {} (exam {}), press Ctrl-C to stop", args.session, args.exam);

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, stopping");
    scheduler.shutdown().await;

    let activities = repository.find(Some(args.session.as_str()), Some(args.exam.as_str()))?;
    info!("{} suspicious activities logged", activities.len());
    println!("{}", serde_json::to_string_pretty(&activities)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use face_analysis::AnalysisMode;

    #[test]
    fn test_parses_arguments() {
        let args = Args::parse_from(["proctord", "--session", "s-42", "--exam", "calc-1", "--frames", "/tmp/frames"]);
        assert_eq!(args.session, "s-42");
        assert_eq!(args.exam, "calc-1");
        assert_eq!(args.frames, Some(PathBuf::from("/tmp/frames")));
        assert!(!args.pose_aware);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_frames_dir_selects_replay() {
        let args = Args::parse_from(["proctord", "--frames", "/tmp/frames"]);
        assert!(capture_opener(&args).is_ok());
    }

    #[cfg(not(feature = "webcam"))]
    #[test]
    fn test_no_source_without_webcam() {
        let args = Args::parse_from(["proctord"]);
        assert!(capture_opener(&args).is_err());
    }

    #[test]
    fn test_pose_aware_flag_keeps_asset_paths() {
        let mut settings = Settings::default();
        settings.vision.face_cascade_path = "assets/face.xml".into();
        let args = Args::parse_from(["proctord", "--pose-aware"]);

        let settings = apply_args(settings, &args);
        assert_eq!(settings.vision.mode, AnalysisMode::PoseAware);
        assert_eq!(settings.vision.detection_scale, 1.0);
        assert_eq!(settings.vision.face_cascade_path, PathBuf::from("assets/face.xml"));
    }
}
