//! Startup: detector asset loading

use face_analysis::{HaarDetector, VisionConfig};
use tracing::info;

use crate::retry::RetryPolicy;
use crate::MonitorError;

/// Load the cascade assets, retrying per `policy`.
///
/// Failure here is fatal: no session may start without a detector.
pub async fn load_detector(config: &VisionConfig, policy: &RetryPolicy) -> Result<HaarDetector, MonitorError> {
    let detector = policy
        .run("Detector asset loading", || {
            let config = config.clone();
            async move {
                tokio::task::spawn_blocking(move || HaarDetector::load(&config))
                    .await
                    .map_err(|e| MonitorError::Task(e.to_string()))?
                    .map_err(MonitorError::from)
            }
        })
        .await
        .map_err(|(attempts, e)| MonitorError::Startup {
            attempts,
            reason: e.to_string(),
        })?;

    info!(
        "Detector loaded from {} and {}",
        config.face_cascade_path.display(),
        config.eye_cascade_path.display()
    );
    Ok(detector)
}
