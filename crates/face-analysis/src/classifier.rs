//! Rule-based suspicion classifier
//!
//! Stateless: every frame is judged on its own observations.

use serde::{Deserialize, Serialize};

use crate::geometry::{EyeGaze, HeadPose};
use crate::locator::FaceObservation;

/// Head yaw beyond which the head counts as turned
pub const HEAD_YAW_LIMIT: f64 = 30.0;
/// Head pitch beyond which the head counts as tilted
pub const HEAD_PITCH_LIMIT: f64 = 20.0;
/// Horizontal gaze beyond which an eye counts as off-center
pub const GAZE_LIMIT: f64 = 0.3;
/// Yaw for the combined head-and-eyes rule
pub const COMBINED_YAW: f64 = 15.0;
/// Gaze for the combined head-and-eyes rule
pub const COMBINED_GAZE: f64 = 0.2;
/// Below this yaw the head counts as straight
pub const STRAIGHT_YAW: f64 = 10.0;
/// Gaze that is suspicious even with a straight head
pub const DIVERTED_GAZE: f64 = 0.4;
/// Allowed face-center offset as a fraction of the frame width
pub const OFF_CENTER_RATIO: f64 = 0.2;

/// Which rule set applies to a single detected face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Face/eye counts plus the off-center check
    #[default]
    CapturePull,
    /// Face/eye counts plus head pose and gaze
    PoseAware,
}

/// Reason a frame was flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCategory {
    None,
    NoFace,
    MultipleFaces,
    NoEyes,
    OffCenter,
    GazeAway,
    HeadTurned,
    Combined,
}

impl ActivityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityCategory::None => "none",
            ActivityCategory::NoFace => "no_face",
            ActivityCategory::MultipleFaces => "multiple_faces",
            ActivityCategory::NoEyes => "no_eyes",
            ActivityCategory::OffCenter => "off_center",
            ActivityCategory::GazeAway => "gaze_away",
            ActivityCategory::HeadTurned => "head_turned",
            ActivityCategory::Combined => "combined",
        }
    }
}

impl std::fmt::Display for ActivityCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-frame classifier output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityVerdict {
    pub is_suspicious: bool,
    pub category: ActivityCategory,
    pub description: String,
}

impl ActivityVerdict {
    fn suspicious(category: ActivityCategory, description: impl Into<String>) -> Self {
        Self {
            is_suspicious: true,
            category,
            description: description.into(),
        }
    }

    /// Nothing suspicious in this frame
    pub fn clear() -> Self {
        Self {
            is_suspicious: false,
            category: ActivityCategory::None,
            description: "No suspicious activity detected".into(),
        }
    }
}

fn side(value: f64) -> &'static str {
    if value > 0.0 {
        "right"
    } else {
        "left"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityClassifier {
    mode: AnalysisMode,
}

impl ActivityClassifier {
    pub fn new(mode: AnalysisMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }

    /// Judge one frame.
    ///
    /// `pose` and `gaze` are only consulted in [`AnalysisMode::PoseAware`]
    /// for a single face with two eyes; without them that case is clear.
    pub fn classify(
        &self,
        observations: &[FaceObservation],
        frame_width: u32,
        pose: Option<&HeadPose>,
        gaze: Option<&EyeGaze>,
    ) -> ActivityVerdict {
        let face = match observations {
            [] => {
                return ActivityVerdict::suspicious(
                    ActivityCategory::NoFace,
                    "No face detected - student may be absent",
                )
            }
            [face] => face,
            many => {
                let description = match self.mode {
                    AnalysisMode::CapturePull => {
                        "Multiple faces detected - potential collaboration".to_string()
                    }
                    AnalysisMode::PoseAware => format!(
                        "Multiple faces detected ({}) - potential collaboration",
                        many.len()
                    ),
                };
                return ActivityVerdict::suspicious(ActivityCategory::MultipleFaces, description);
            }
        };

        if face.eyes.len() < 2 {
            let description = match self.mode {
                AnalysisMode::CapturePull => "No eyes detected - student may be looking away",
                AnalysisMode::PoseAware => "Eyes not detected clearly - student may be looking away",
            };
            return ActivityVerdict::suspicious(ActivityCategory::NoEyes, description);
        }

        match self.mode {
            AnalysisMode::CapturePull => Self::check_centered(face, frame_width),
            AnalysisMode::PoseAware => match (pose, gaze) {
                (Some(pose), Some(gaze)) => Self::check_pose(pose, gaze),
                _ => ActivityVerdict::clear(),
            },
        }
    }

    fn check_centered(face: &FaceObservation, frame_width: u32) -> ActivityVerdict {
        let frame_center = frame_width as f64 / 2.0;
        let offset = (frame_center - face.face.center().x).abs();
        if offset > frame_width as f64 * OFF_CENTER_RATIO {
            ActivityVerdict::suspicious(
                ActivityCategory::OffCenter,
                "Face not centered - student may be looking to the side",
            )
        } else {
            ActivityVerdict::clear()
        }
    }

    fn check_pose(pose: &HeadPose, gaze: &EyeGaze) -> ActivityVerdict {
        let left = gaze.left.horizontal;
        let right = gaze.right.horizontal;

        let head_suspicious = pose.yaw.abs() > HEAD_YAW_LIMIT || pose.pitch.abs() > HEAD_PITCH_LIMIT;
        let gaze_suspicious = left.abs() > GAZE_LIMIT || right.abs() > GAZE_LIMIT;
        let turned_right = pose.yaw > COMBINED_YAW && left > COMBINED_GAZE && right > COMBINED_GAZE;
        let turned_left = pose.yaw < -COMBINED_YAW && left < -COMBINED_GAZE && right < -COMBINED_GAZE;
        let diverted = pose.yaw.abs() < STRAIGHT_YAW && (left.abs() > DIVERTED_GAZE || right.abs() > DIVERTED_GAZE);

        if !(head_suspicious || gaze_suspicious || turned_right || turned_left || diverted) {
            return ActivityVerdict::clear();
        }

        if pose.yaw.abs() > HEAD_YAW_LIMIT {
            return ActivityVerdict::suspicious(
                ActivityCategory::HeadTurned,
                format!("Head turned {} - student may be looking away", side(pose.yaw)),
            );
        }
        if pose.pitch.abs() > HEAD_PITCH_LIMIT {
            let direction = if pose.pitch > 0.0 { "up" } else { "down" };
            return ActivityVerdict::suspicious(
                ActivityCategory::HeadTurned,
                format!("Head tilted {} - student may be looking at notes", direction),
            );
        }
        if (left > GAZE_LIMIT && right > GAZE_LIMIT) || (left < -GAZE_LIMIT && right < -GAZE_LIMIT) {
            return ActivityVerdict::suspicious(
                ActivityCategory::GazeAway,
                format!("Eyes looking {} - student may be viewing other materials", side(left)),
            );
        }
        if turned_right || turned_left {
            let direction = if turned_right { "right" } else { "left" };
            return ActivityVerdict::suspicious(
                ActivityCategory::Combined,
                format!("Head and eyes turned {} - likely looking at unauthorized materials", direction),
            );
        }
        if diverted {
            return ActivityVerdict::suspicious(
                ActivityCategory::Combined,
                "Eyes looking to the side while head is straight - likely attempting to cheat",
            );
        }

        // a single eye past the gaze limit
        ActivityVerdict::suspicious(
            ActivityCategory::GazeAway,
            "Eye gaze off-center - student may be viewing other materials",
        )
    }
}
