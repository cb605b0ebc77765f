//! Data model shared by the capture loop and its consumers.
//!
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Which physical camera supplies the video stream.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    /// Front camera, `user` in browser terms.
    #[default]
    #[serde(alias = "user")]
    Front,
    /// Rear camera, `environment` in browser terms.
    #[serde(alias = "environment")]
    Rear,
}

impl Facing {
    /// The other camera.
    pub fn toggled(self) -> Self {
        match self {
            Facing::Front => Facing::Rear,
            Facing::Rear => Facing::Front,
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facing::Front => f.write_str("front"),
            Facing::Rear => f.write_str("rear"),
        }
    }
}

impl FromStr for Facing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "front" | "user" => Ok(Facing::Front),
            "rear" | "environment" => Ok(Facing::Rear),
            other => Err(format!("unknown facing mode {other:?}")),
        }
    }
}

/// Axis-aligned box in frame pixel coordinates, origin at the top-left corner.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A detected object.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    pub score: f32,
}

/// A single landmark in frame pixel coordinates.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub score: Option<f32>,
    pub name: Option<String>,
}

impl Keypoint {
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            score: None,
            name: None,
        }
    }
}

/// Landmarks belonging to one hand, face or body.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Pose {
    pub keypoints: Vec<Keypoint>,
}

/// A label with the probability the model assigned to it.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Classification {
    pub label: String,
    pub probability: f32,
}

/// Output of one inference call, tagged by shape.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceResult {
    Detections(Vec<Detection>),
    Poses(Vec<Pose>),
    Classifications(Vec<Classification>),
}

impl InferenceResult {
    /// Number of items in the result.
    pub fn len(&self) -> usize {
        match self {
            InferenceResult::Detections(items) => items.len(),
            InferenceResult::Poses(items) => items.len(),
            InferenceResult::Classifications(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name of the variant, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            InferenceResult::Detections(_) => "detections",
            InferenceResult::Poses(_) => "poses",
            InferenceResult::Classifications(_) => "classifications",
        }
    }
}

/// A delivered result with the time it was produced.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ResultMsg {
    /// Milliseconds since the unix epoch.
    pub timestamp_ms: u64,
    pub result: InferenceResult,
}

/// Definition of messages on the results feed.
#[derive(Debug, Deserialize, Serialize)]
pub enum ProtoMsg {
    Result(ResultMsg),
}

impl ProtoMsg {
    pub fn serialize(&self) -> Result<Vec<u8>, Box<bincode::ErrorKind>> {
        bincode::serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Box<bincode::ErrorKind>> {
        bincode::deserialize(bytes)
    }
}
