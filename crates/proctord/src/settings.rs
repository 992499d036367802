//! Daemon settings

use std::path::Path;

use config::{Config, Environment, File};
use face_analysis::VisionConfig;
use monitoring::{RetryPolicy, SchedulerConfig};
use serde::{Deserialize, Serialize};
use storage::EvidenceConfig;

/// Environment variable prefix, e.g. `PROCTOR__SCHEDULER__INTERVAL_MS=2000`
const ENV_PREFIX: &str = "PROCTOR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON log lines
    pub log_json: bool,
    pub vision: VisionConfig,
    pub scheduler: SchedulerConfig,
    pub evidence: EvidenceConfig,
    /// Retry policy for loading detector assets
    pub startup_retry: RetryPolicy,
    /// Activity records kept in memory
    pub max_activity_records: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            vision: VisionConfig::default(),
            scheduler: SchedulerConfig::default(),
            evidence: EvidenceConfig::capture_pull(),
            startup_retry: RetryPolicy::default(),
            max_activity_records: 10_000,
        }
    }
}

impl Settings {
    /// Defaults, then the optional file, then `PROCTOR__*` variables
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use face_analysis::AnalysisMode;

    #[test]
    fn test_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.scheduler.interval_ms, 5000);
        assert_eq!(settings.evidence.quality, 70);
        assert_eq!(settings.evidence.resize_to, Some((640, 480)));
        assert_eq!(settings.vision.mode, AnalysisMode::CapturePull);
        assert_eq!(settings.vision.faces.min_neighbors, 5);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proctord.toml");
        std::fs::write(
            &path,
            r#"
log_level = "debug"

[scheduler]
interval_ms = 1000

[vision]
mode = "pose_aware"
detection_scale = 1.0

[vision.eyes]
min_neighbors = 2
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.scheduler.interval_ms, 1000);
        assert_eq!(settings.scheduler.camera.width, 640);
        assert_eq!(settings.vision.mode, AnalysisMode::PoseAware);
        assert_eq!(settings.vision.eyes.min_neighbors, 2);
        assert_eq!(settings.vision.eyes.min_size, 15);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Settings::load(Some(Path::new("/nonexistent/proctord.toml"))).is_err());
    }
}
