//! Camera abstraction used by the capture loop.
//!
use common::protocol::Facing;
use image::RgbImage;
use serde::Serialize;

use crate::error::MediaAccessError;

/// Opens camera streams by facing mode.
pub trait MediaDevices: Send + Sync {
    /// Open a stream on the camera facing `facing`. May block while the device starts.
    fn open(&self, facing: Facing) -> Result<Box<dyn MediaStream>, MediaAccessError>;
}

/// An open camera stream.
pub trait MediaStream: Send {
    /// Capture the latest frame. Returns `None` while no decodable frame is available.
    fn capture(&mut self) -> Option<RgbImage>;

    /// Release the device. Further captures return `None`.
    fn stop(&mut self);
}

/// Description of the active media source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub facing: Facing,
    /// Width of the last captured frame, zero before the first frame.
    pub width: u32,
    /// Height of the last captured frame, zero before the first frame.
    pub height: u32,
}

impl SourceInfo {
    pub fn new(facing: Facing) -> Self {
        Self {
            facing,
            width: 0,
            height: 0,
        }
    }
}
