use serde::{Deserialize, Serialize};

/// Axis-aligned integer rectangle in image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clip the rectangle so it lies entirely inside a `width` × `height` image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Rect {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Rect {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }

    /// Grow each side by `fraction` of the box's own width/height, then clip
    /// to the image.
    pub fn expand(&self, fraction: f32, width: u32, height: u32) -> Rect {
        let pad_x = (self.width as f32 * fraction).round() as i64;
        let pad_y = (self.height as f32 * fraction).round() as i64;

        let x0 = (self.x as i64 - pad_x).max(0);
        let y0 = (self.y as i64 - pad_y).max(0);
        let x1 = (self.x as i64 + self.width as i64 + pad_x).min(width as i64);
        let y1 = (self.y as i64 + self.height as i64 + pad_y).min(height as i64);

        Rect {
            x: x0.min(width as i64) as u32,
            y: y0.min(height as i64) as u32,
            width: (x1 - x0).max(0) as u32,
            height: (y1 - y0).max(0) as u32,
        }
    }
}

/// Floating-point position in image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Five-point facial landmarks for one detected face.
///
/// `left_eye.x < right_eye.x` is the expected orientation; it is not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub left_eye: Point,
    pub right_eye: Point,
    pub nose_tip: Point,
    pub mouth_left: Point,
    pub mouth_right: Point,
}

impl Landmarks {
    /// Build from the `[left_eye, right_eye, nose, left_mouth, right_mouth]`
    /// ordering produced by five-point detectors.
    pub fn from_points(points: [(f32, f32); 5]) -> Self {
        let p = |i: usize| Point::new(points[i].0, points[i].1);
        Self {
            left_eye: p(0),
            right_eye: p(1),
            nose_tip: p(2),
            mouth_left: p(3),
            mouth_right: p(4),
        }
    }

    /// Angle of the eye line in radians, `atan2(Δy, Δx)` from left to right eye.
    pub fn eye_line_angle(&self) -> f32 {
        (self.right_eye.y - self.left_eye.y).atan2(self.right_eye.x - self.left_eye.x)
    }
}

/// Outcome of a single face detection call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detected: bool,
    pub bounds: Rect,
    pub landmarks: Option<Landmarks>,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
}

impl DetectionResult {
    pub fn none() -> Self {
        Self {
            detected: false,
            bounds: Rect::default(),
            landmarks: None,
            confidence: 0.0,
        }
    }

    pub fn face(bounds: Rect, landmarks: Option<Landmarks>, confidence: f32) -> Self {
        Self {
            detected: true,
            bounds,
            landmarks,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Verification outcome band, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Reject,
    Retry,
    Accept,
    AutoAccept,
}

impl Decision {
    /// Whether this band counts as a positive identity match.
    pub fn is_identical(self) -> bool {
        matches!(self, Decision::Accept | Decision::AutoAccept)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Decision::Reject => "reject",
            Decision::Retry => "retry",
            Decision::Accept => "accept",
            Decision::AutoAccept => "auto_accept",
        };
        f.write_str(name)
    }
}

/// Terminal output of one verification attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub is_identical: bool,
    /// Same-person confidence in [0, 1].
    pub confidence: f32,
    pub decision: Decision,
    pub message: String,
}

impl VerificationResult {
    /// A recoverable failure: the user should capture again.
    pub fn retry(message: impl Into<String>) -> Self {
        Self {
            is_identical: false,
            confidence: 0.0,
            decision: Decision::Retry,
            message: message.into(),
        }
    }

    /// A system fault; never retried by the pipeline itself.
    pub fn technical_error() -> Self {
        Self {
            is_identical: false,
            confidence: 0.0,
            decision: Decision::Reject,
            message: "technical error".to_string(),
        }
    }
}
