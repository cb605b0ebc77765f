//! Ultraface face detector running on `tract-onnx`.
//!
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use common::protocol::{BoundingBox, Detection, InferenceResult};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::{
    error::InferenceError,
    model::{InferModel, ModelLoader},
};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Normalized `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]` box.
pub type Bbox = [f32; 4];

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Available input sizes of the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UltrafaceVariant {
    W320H240,
    W640H480,
}

impl UltrafaceVariant {
    pub fn width_height(&self) -> (u32, u32) {
        match self {
            UltrafaceVariant::W320H240 => (320, 240),
            UltrafaceVariant::W640H480 => (640, 480),
        }
    }

    pub fn filename(&self) -> &'static str {
        match self {
            UltrafaceVariant::W320H240 => "version-RFB-320.onnx",
            UltrafaceVariant::W640H480 => "version-RFB-640.onnx",
        }
    }

    pub fn url(&self) -> String {
        format!(
            "https://github.com/onnx/models/raw/main/vision/body_analysis/ultraface/models/{}",
            self.filename()
        )
    }
}

impl FromStr for UltrafaceVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ultraface-320" | "320" => Ok(UltrafaceVariant::W320H240),
            "ultraface-640" | "640" => Ok(UltrafaceVariant::W640H480),
            other => Err(format!("unknown model variant {other:?}")),
        }
    }
}

/// Face detector returning pixel-space boxes labelled `face`.
pub struct UltrafaceModel {
    model: NnModel,
    width: u32,
    height: u32,
    max_iou: f32,
    min_confidence: f32,
}

impl UltrafaceModel {
    /// Load the network for `variant` from `path`.
    pub fn new(
        path: impl AsRef<Path>,
        variant: UltrafaceVariant,
        max_iou: f32,
        min_confidence: f32,
    ) -> TractResult<Self> {
        let (width, height) = variant.width_height();
        let input_fact = InferenceFact::dt_shape(
            f32::datum_type(),
            tvec!(1, 3, height as usize, width as usize),
        );
        let model = tract_onnx::onnx()
            .model_for_path(path)?
            .with_input_fact(0, input_fact)?
            .into_optimized()?
            .into_runnable()?;

        Ok(Self {
            model,
            width,
            height,
            max_iou,
            min_confidence,
        })
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        let resized: RgbImage = image::imageops::resize(
            input,
            self.width,
            self.height,
            image::imageops::FilterType::Triangle,
        );

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, c, y, x)| (resized[(x as _, y as _)][c] as f32 - 127.0) / 128.0,
        )
        .into()
    }

    /// Extract confident, non-overlapping boxes from the raw outputs.
    ///
    /// Output 0 holds `[1, N, 2]` background/face scores, output 1 holds `[1, N, 4]` boxes.
    fn postproc(&self, scores: &Tensor, boxes: &Tensor) -> TractResult<Vec<(Bbox, f32)>> {
        let confidences = scores
            .to_array_view::<f32>()?
            .slice(tract_ndarray::s![0, .., 1])
            .to_vec();
        let boxes: Vec<f32> = boxes.to_array_view::<f32>()?.iter().copied().collect();

        let candidates = boxes
            .chunks_exact(4)
            .map(|bbox| [bbox[0], bbox[1], bbox[2], bbox[3]])
            .zip(confidences)
            .filter(|(_, confidence)| *confidence > self.min_confidence)
            .collect();

        Ok(non_maximum_suppression(candidates, self.max_iou))
    }
}

impl InferModel for UltrafaceModel {
    fn infer(&self, frame: &RgbImage) -> Result<InferenceResult, InferenceError> {
        let run_err = |err: TractError| InferenceError::Run(format!("{err:#}"));

        let outputs = self
            .model
            .run(tvec!(self.preproc(frame).into()))
            .map_err(run_err)?;
        if outputs.len() < 2 {
            return Err(InferenceError::Run(format!(
                "expected 2 outputs, got {}",
                outputs.len()
            )));
        }
        let faces = self.postproc(&outputs[0], &outputs[1]).map_err(run_err)?;

        let (width, height) = frame.dimensions();
        Ok(InferenceResult::Detections(
            faces
                .into_iter()
                .map(|(bbox, score)| Detection {
                    bbox: to_pixels(&bbox, width, height),
                    label: "face".into(),
                    score,
                })
                .collect(),
        ))
    }
}

/// Loads an [`UltrafaceModel`] from a file on first use.
pub struct UltrafaceLoader {
    pub path: PathBuf,
    pub variant: UltrafaceVariant,
    pub max_iou: f32,
    pub min_confidence: f32,
}

impl UltrafaceLoader {
    pub fn new(path: PathBuf, variant: UltrafaceVariant) -> Self {
        Self {
            path,
            variant,
            max_iou: 0.5,
            min_confidence: 0.5,
        }
    }
}

impl ModelLoader for UltrafaceLoader {
    fn load(&self) -> Result<Arc<dyn InferModel>, InferenceError> {
        log::info!("Loading {:?} from {}", self.variant, self.path.display());
        let model = UltrafaceModel::new(&self.path, self.variant, self.max_iou, self.min_confidence)
            .map_err(|err| InferenceError::Load(format!("{err:#}")))?;
        Ok(Arc::new(model))
    }
}

/// Scale a normalized box to frame pixels, clamped to the frame.
fn to_pixels(bbox: &Bbox, width: u32, height: u32) -> BoundingBox {
    let (width, height) = (width as f32, height as f32);
    let x_tl = bbox[0].clamp(0.0, 1.0) * width;
    let y_tl = bbox[1].clamp(0.0, 1.0) * height;
    let x_br = bbox[2].clamp(0.0, 1.0) * width;
    let y_br = bbox[3].clamp(0.0, 1.0) * height;

    BoundingBox::new(x_tl, y_tl, (x_br - x_tl).max(0.0), (y_br - y_tl).max(0.0))
}

/// Run non-maximum-suppression on candidate bounding boxes.
///
/// Candidates are visited in order of sinking confidence. A candidate is kept only if its IoU
/// with every box kept so far is at most `max_iou`.
pub fn non_maximum_suppression(
    mut candidates: Vec<(Bbox, f32)>,
    max_iou: f32,
) -> Vec<(Bbox, f32)> {
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut selected: Vec<(Bbox, f32)> = Vec::new();
    for (bbox, confidence) in candidates {
        if selected
            .iter()
            .all(|(kept, _)| iou(&bbox, kept) <= max_iou)
        {
            selected.push((bbox, confidence));
        }
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
pub fn iou(bbox_a: &Bbox, bbox_b: &Bbox) -> f32 {
    // Corners of the overlap box. Disjoint boxes give an ill-defined box of zero area.
    let overlap_box: Bbox = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    // Avoid division-by-zero with `EPS`
    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Area enclosed by a bounding box, zero if the bottom-right corner lies above or left of the
/// top-left corner.
fn bbox_area(bbox: &Bbox) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = [0.0, 0.0, 0.5, 0.5];
        let b = [0.6, 0.6, 0.9, 0.9];
        assert!((iou(&a, &a) - 1.0).abs() < 1e-4);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = [0.0, 0.0, 0.2, 0.1];
        let b = [0.1, 0.0, 0.3, 0.1];
        // Overlap 0.01, union 0.03
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-4);
    }

    #[test]
    fn nms_keeps_most_confident_of_overlapping() {
        let candidates = vec![
            ([0.1, 0.1, 0.5, 0.5], 0.7),
            ([0.12, 0.1, 0.52, 0.5], 0.9),
            ([0.6, 0.6, 0.9, 0.9], 0.6),
        ];

        let selected = non_maximum_suppression(candidates, 0.5);

        assert_eq!(
            selected,
            vec![([0.12, 0.1, 0.52, 0.5], 0.9), ([0.6, 0.6, 0.9, 0.9], 0.6)]
        );
    }

    #[test]
    fn boxes_scaled_to_frame() {
        let bbox = to_pixels(&[0.25, 0.5, 0.75, 1.2], 640, 480);
        assert_eq!(bbox, BoundingBox::new(160.0, 240.0, 320.0, 240.0));
    }

    #[test]
    fn variant_names() {
        assert_eq!(
            "ultraface-640".parse::<UltrafaceVariant>(),
            Ok(UltrafaceVariant::W640H480)
        );
        assert!(UltrafaceVariant::W320H240.url().ends_with("version-RFB-320.onnx"));
    }
}
