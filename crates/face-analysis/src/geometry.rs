//! Frame geometry and closed-form head-pose / gaze estimation

use serde::{Deserialize, Serialize};

/// Horizontal eye offset, relative to half the face width, that maps to full yaw
const YAW_SCALE_DEGREES: f64 = 45.0;

/// Expected vertical position of the eyes within a frontal face, from the top
const EYE_LINE_RATIO: f64 = 0.4;

/// Pitch per unit of vertical eye-line deviation
const PITCH_SCALE_DEGREES: f64 = 90.0;

/// Axis-aligned region in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    /// Whether the region has positive area and lies inside a `frame_width` x `frame_height` image
    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.width > 0
            && self.height > 0
            && self.x as i64 + self.width as i64 <= frame_width as i64
            && self.y as i64 + self.height as i64 <= frame_height as i64
    }

    /// Shift by an offset, e.g. from face-relative to frame coordinates
    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Scale every coordinate by `factor`
    pub fn scale(&self, factor: f64) -> Rect {
        Rect::new(
            (self.x as f64 * factor).round() as i32,
            (self.y as f64 * factor).round() as i32,
            (self.width as f64 * factor).round() as i32,
            (self.height as f64 * factor).round() as i32,
        )
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Head pose (Euler angles)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadPose {
    /// Yaw (left-right rotation) in degrees, positive toward the viewer's right
    pub yaw: f64,
    /// Pitch (up-down tilt) in degrees
    pub pitch: f64,
    /// Roll (side tilt) in degrees
    pub roll: f64,
}

impl std::fmt::Display for HeadPose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Head Pose: yaw={:.2}°, pitch={:.2}°, roll={:.2}°",
            self.yaw, self.pitch, self.roll
        )
    }
}

/// Normalized pupil offset for one eye
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GazeOffset {
    /// -1.0 (left) ..= 1.0 (right)
    pub horizontal: f64,
    /// -1.0 (up) ..= 1.0 (down)
    pub vertical: f64,
    /// Euclidean norm of (horizontal, vertical)
    pub deviation: f64,
}

impl GazeOffset {
    pub fn new(horizontal: f64, vertical: f64) -> Self {
        Self {
            horizontal,
            vertical,
            deviation: (horizontal * horizontal + vertical * vertical).sqrt(),
        }
    }

    /// Looking straight ahead
    pub fn centered() -> Self {
        Self::default()
    }
}

/// Gaze direction of both eyes
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EyeGaze {
    pub left: GazeOffset,
    pub right: GazeOffset,
}

impl EyeGaze {
    /// Normalize both pupils within their eye regions
    pub fn from_pupils(left: Point, left_region: &Rect, right: Point, right_region: &Rect) -> Self {
        Self {
            left: normalize_gaze(left, left_region.width.max(0) as u32, left_region.height.max(0) as u32),
            right: normalize_gaze(right, right_region.width.max(0) as u32, right_region.height.max(0) as u32),
        }
    }
}

impl std::fmt::Display for EyeGaze {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Eye Gaze: left(h={:.2}, v={:.2}, dev={:.2}), right(h={:.2}, v={:.2}, dev={:.2})",
            self.left.horizontal,
            self.left.vertical,
            self.left.deviation,
            self.right.horizontal,
            self.right.vertical,
            self.right.deviation
        )
    }
}

/// Estimate head pose from the two eye centers and the face box.
///
/// `left_eye` must be the eye with the smaller x coordinate; see [`order_eyes`].
pub fn estimate_head_pose(left_eye: Point, right_eye: Point, face: &Rect) -> HeadPose {
    let dy = right_eye.y - left_eye.y;
    let dx = right_eye.x - left_eye.x;
    let roll = dy.atan2(dx).to_degrees();

    let face_center_x = face.x as f64 + face.width as f64 / 2.0;
    let eyes_mid_x = (left_eye.x + right_eye.x) / 2.0;
    let yaw = ((eyes_mid_x - face_center_x) / (face.width as f64 / 2.0)) * YAW_SCALE_DEGREES;

    let eyes_mid_y = (left_eye.y + right_eye.y) / 2.0;
    let vertical_ratio = (eyes_mid_y - face.y as f64) / face.height as f64;
    let pitch = (vertical_ratio - EYE_LINE_RATIO) * PITCH_SCALE_DEGREES;

    HeadPose { yaw, pitch, roll }
}

/// Sort eye regions left-to-right and keep the first two
pub fn order_eyes(eyes: &[Rect]) -> Option<(Rect, Rect)> {
    if eyes.len() < 2 {
        return None;
    }
    let mut sorted = eyes.to_vec();
    sorted.sort_by_key(|r| r.x);
    Some((sorted[0], sorted[1]))
}

/// Normalize a pupil position inside a `width` x `height` eye region
pub fn normalize_gaze(pupil: Point, width: u32, height: u32) -> GazeOffset {
    if width == 0 || height == 0 {
        return GazeOffset::centered();
    }
    let half_w = width as f64 / 2.0;
    let half_h = height as f64 / 2.0;
    GazeOffset::new((pupil.x - half_w) / half_w, (pupil.y - half_h) / half_h)
}
