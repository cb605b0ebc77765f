//! Drawing strategies, one per result shape.
//!
use common::protocol::{Classification, Detection, InferenceResult, Pose};
use image::Rgba;

use crate::overlay::{DrawingSurface, BLUE, GREEN, RED};

/// Paints one kind of inference result onto a surface.
///
/// The surface has already been resized to the frame and cleared. Results of a shape the
/// renderer does not handle are ignored.
pub trait Renderer: Send + Sync {
    fn render(&self, result: &InferenceResult, surface: &mut dyn DrawingSurface);
}

/// Score formatted as a rounded percentage, e.g. `0.9` as `90%`.
pub fn percent(score: f32) -> String {
    format!("{:.0}%", (score * 100.0).round())
}

/// Rectangles with label and score text for detected objects.
pub struct BoxRenderer {
    pub color: Rgba<u8>,
    pub thickness: u32,
}

impl Default for BoxRenderer {
    fn default() -> Self {
        Self {
            color: GREEN,
            thickness: 2,
        }
    }
}

impl BoxRenderer {
    fn draw(&self, detection: &Detection, surface: &mut dyn DrawingSurface) {
        let bbox = &detection.bbox;
        surface.stroke_rect(bbox, self.color, self.thickness);
        surface.text(
            (bbox.x, bbox.y),
            &format!("{} {}", &detection.label, percent(detection.score)),
            self.color,
        );
    }
}

impl Renderer for BoxRenderer {
    fn render(&self, result: &InferenceResult, surface: &mut dyn DrawingSurface) {
        match result {
            InferenceResult::Detections(detections) => detections
                .iter()
                .for_each(|detection| self.draw(detection, surface)),
            other => log::debug!("Box renderer ignores {}", other.kind()),
        }
    }
}

/// Pairs of keypoint indices forming the 21-point hand skeleton.
#[rustfmt::skip]
pub const HAND_CONNECTIONS: [(usize, usize); 36] = [
    // Thumb
    (0, 1), (1, 2), (2, 3), (3, 4),
    // Index finger
    (0, 5), (5, 6), (6, 7), (7, 8),
    // Middle finger
    (0, 9), (9, 10), (10, 11), (11, 12),
    // Ring finger
    (0, 13), (13, 14), (14, 15), (15, 16),
    // Pinky
    (0, 17), (17, 18), (18, 19), (19, 20),
    // Across neighbouring fingers
    (1, 5), (2, 6), (3, 7), (4, 8),
    (5, 9), (6, 10), (7, 11), (8, 12),
    (9, 13), (10, 14), (11, 15), (12, 16),
    (13, 17), (14, 18), (15, 19), (16, 20),
];

/// Circles for keypoints, optionally joined into a skeleton.
pub struct LandmarkRenderer {
    pub radius: f32,
    pub point_color: Rgba<u8>,
    pub connections: Vec<(usize, usize)>,
    pub line_color: Rgba<u8>,
}

impl LandmarkRenderer {
    /// Hand landmarks with their skeleton.
    pub fn hand() -> Self {
        Self {
            radius: 5.0,
            point_color: RED,
            connections: HAND_CONNECTIONS.to_vec(),
            line_color: BLUE,
        }
    }

    /// Dense face mesh points without connections.
    pub fn face_mesh() -> Self {
        Self {
            radius: 2.0,
            point_color: RED,
            connections: Vec::new(),
            line_color: BLUE,
        }
    }

    fn draw(&self, pose: &Pose, surface: &mut dyn DrawingSurface) {
        for keypoint in pose.keypoints.iter() {
            surface.fill_circle((keypoint.x, keypoint.y), self.radius, self.point_color);
        }

        for &(from, to) in self.connections.iter() {
            if let (Some(a), Some(b)) = (pose.keypoints.get(from), pose.keypoints.get(to)) {
                surface.line((a.x, a.y), (b.x, b.y), self.line_color);
            }
        }
    }
}

impl Renderer for LandmarkRenderer {
    fn render(&self, result: &InferenceResult, surface: &mut dyn DrawingSurface) {
        match result {
            InferenceResult::Poses(poses) => {
                poses.iter().for_each(|pose| self.draw(pose, surface))
            }
            other => log::debug!("Landmark renderer ignores {}", other.kind()),
        }
    }
}

/// Text lines listing classification labels with their probability.
pub struct LabelRenderer {
    /// Probabilities at or above the threshold count as a match and are drawn in red.
    pub threshold: f32,
    pub origin: (f32, f32),
    pub line_height: f32,
}

impl Default for LabelRenderer {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            origin: (8.0, 8.0),
            line_height: 20.0,
        }
    }
}

impl LabelRenderer {
    pub fn color_for(&self, classification: &Classification) -> Rgba<u8> {
        if classification.probability >= self.threshold {
            RED
        } else {
            GREEN
        }
    }
}

impl Renderer for LabelRenderer {
    fn render(&self, result: &InferenceResult, surface: &mut dyn DrawingSurface) {
        match result {
            InferenceResult::Classifications(classifications) => {
                for (line, classification) in classifications.iter().enumerate() {
                    let origin = (
                        self.origin.0,
                        self.origin.1 + line as f32 * self.line_height,
                    );
                    surface.text(
                        origin,
                        &format!(
                            "{} {}",
                            &classification.label,
                            percent(classification.probability)
                        ),
                        self.color_for(classification),
                    );
                }
            }
            other => log::debug!("Label renderer ignores {}", other.kind()),
        }
    }
}
