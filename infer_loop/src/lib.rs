//! Capture-infer-render loop: sample camera frames, run them through a model and paint the
//! results onto a transparent overlay aligned with the frame.

pub mod config;
pub mod error;
pub mod history;
pub mod media;
pub mod meter;
pub mod model;
pub mod nn;
pub mod overlay;
pub mod render;
pub mod runner;
pub mod sensors;
pub mod utils;

pub use common::protocol::{Facing, InferenceResult};
pub use config::LoopConfig;
pub use error::{InferenceError, MediaAccessError};
pub use runner::{CaptureLoop, LoopState, SkipReason, TickOutcome};
