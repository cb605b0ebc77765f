//! V4L2 cameras on Linux.
//!
use std::fmt::Display;

use common::protocol::Facing;
use image::{Rgb, RgbImage};
use rscam::{Camera, Config};

use crate::{
    error::MediaAccessError,
    media::{MediaDevices, MediaStream},
};

/// Camera devices selected by facing mode.
#[derive(Clone, Debug)]
pub struct V4l2Devices {
    pub front: String,
    pub rear: String,
    /// FourCC of the capture format, `MJPG` or `RGB3`.
    pub format: String,
    /// Defaults to the largest resolution the device supports.
    pub resolution: Option<(u32, u32)>,
    /// Frame interval as `(numerator, denominator)` seconds. Defaults to the fastest one.
    pub frame_interval: Option<(u32, u32)>,
}

impl Default for V4l2Devices {
    fn default() -> Self {
        Self {
            front: "/dev/video0".into(),
            rear: "/dev/video1".into(),
            format: "MJPG".into(),
            resolution: None,
            frame_interval: None,
        }
    }
}

impl V4l2Devices {
    fn device_for(&self, facing: Facing) -> &str {
        match facing {
            Facing::Front => &self.front,
            Facing::Rear => &self.rear,
        }
    }
}

impl MediaDevices for V4l2Devices {
    fn open(&self, facing: Facing) -> Result<Box<dyn MediaStream>, MediaAccessError> {
        let device = self.device_for(facing);
        let pixel_format = PixelFormat::parse(&self.format).ok_or_else(|| {
            config_error(device, format!("unsupported format {}", &self.format))
        })?;

        let mut cam = Camera::new(device)
            .map_err(|err| MediaAccessError::from_io(device, facing, err))?;
        log_supported_formats(&cam, &self.format);
        let format = self.format.as_bytes();

        let resolution = match self.resolution {
            Some(resolution) => resolution,
            None => get_max_resolution(&cam, format, device)?,
        };
        let interval = match self.frame_interval {
            Some(interval) => interval,
            None => get_fastest_interval(&cam, format, resolution, device)?,
        };

        cam.start(&Config {
            interval,
            resolution,
            format,
            ..Default::default()
        })
        .map_err(|err| match err {
            rscam::Error::Io(err) => MediaAccessError::from_io(device, facing, err),
            other => config_error(device, other),
        })?;

        log::info!(
            "Using camera {} ({}) at {}x{}, interval {}/{}s",
            device,
            facing,
            resolution.0,
            resolution.1,
            interval.0,
            interval.1
        );

        Ok(Box::new(V4l2Stream {
            cam: Some(cam),
            device: device.to_owned(),
            pixel_format,
            resolution,
        }))
    }
}

#[derive(Clone, Copy, Debug)]
enum PixelFormat {
    Mjpeg,
    Rgb,
}

impl PixelFormat {
    fn parse(fourcc: &str) -> Option<Self> {
        match fourcc {
            "MJPG" => Some(PixelFormat::Mjpeg),
            "RGB3" => Some(PixelFormat::Rgb),
            _ => None,
        }
    }
}

/// Started V4L2 camera.
struct V4l2Stream {
    cam: Option<Camera>,
    device: String,
    pixel_format: PixelFormat,
    resolution: (u32, u32),
}

impl MediaStream for V4l2Stream {
    fn capture(&mut self) -> Option<RgbImage> {
        let cam = self.cam.as_ref()?;
        let frame = match cam.capture() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("Error capturing frame from {}: {}", &self.device, err);
                return None;
            }
        };

        match self.pixel_format {
            PixelFormat::Mjpeg => match turbojpeg::decompress_image::<Rgb<u8>>(&frame[..]) {
                Ok(image) => Some(image),
                Err(err) => {
                    log::debug!("Frame not decodable yet: {}", err);
                    None
                }
            },
            PixelFormat::Rgb => {
                RgbImage::from_raw(self.resolution.0, self.resolution.1, frame[..].to_vec())
            }
        }
    }

    fn stop(&mut self) {
        if let Some(mut cam) = self.cam.take() {
            if let Err(err) = cam.stop() {
                log::warn!("Error stopping {}: {}", &self.device, err);
            }
            log::info!("Released camera {}", &self.device);
        }
    }
}

impl Drop for V4l2Stream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn config_error(device: &str, reason: impl Display) -> MediaAccessError {
    MediaAccessError::Config {
        device: device.to_owned(),
        reason: reason.to_string(),
    }
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(
    cam: &Camera,
    format: &[u8],
    device: &str,
) -> Result<(u32, u32), MediaAccessError> {
    let resolution_info = cam
        .resolutions(format)
        .map_err(|err| config_error(device, err))?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .into_iter()
            // Highest number of pixels
            .max_by_key(|&(width, height)| width * height),
        rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
    }
    .ok_or_else(|| config_error(device, "no resolution found"))
}

/// Get the shortest frame interval (highest frame rate) for the given format and resolution.
fn get_fastest_interval(
    cam: &Camera,
    format: &[u8],
    resolution: (u32, u32),
    device: &str,
) -> Result<(u32, u32), MediaAccessError> {
    let interval_info = cam
        .intervals(format, resolution)
        .map_err(|err| config_error(device, err))?;
    log::debug!("Found frame intervals: {:?}", &interval_info);
    match interval_info {
        rscam::IntervalInfo::Discretes(intervals) => fastest_interval(&intervals),
        rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
    }
    .ok_or_else(|| config_error(device, "no frame interval found"))
}

/// Pick the shortest `(numerator, denominator)` interval.
fn fastest_interval(intervals: &[(u32, u32)]) -> Option<(u32, u32)> {
    intervals
        .iter()
        .copied()
        .filter(|&(_, denominator)| denominator > 0)
        .min_by(|a, b| (a.0 as u64 * b.1 as u64).cmp(&(b.0 as u64 * a.1 as u64)))
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn picks_highest_frame_rate() {
        let intervals = [(1, 10), (1, 30), (1, 15), (2, 50)];
        assert_eq!(fastest_interval(&intervals), Some((1, 30)));
        assert_eq!(fastest_interval(&[]), None);
    }

    #[test]
    fn rejects_unknown_format() {
        let devices = V4l2Devices {
            format: "YUYV".into(),
            ..Default::default()
        };
        let err = devices.open(Facing::Front).err();
        assert!(matches!(err, Some(MediaAccessError::Config { .. })));
    }

    #[test]
    fn missing_device_is_reported() {
        let devices = V4l2Devices {
            rear: "/dev/video-does-not-exist".into(),
            ..Default::default()
        };
        let err = devices.open(Facing::Rear).err();
        assert!(matches!(err, Some(MediaAccessError::NoDevice(Facing::Rear))));
    }

    #[test]
    fn get_cam_info_if_available() {
        let cam_name = "/dev/video0";
        match Camera::new(cam_name) {
            Err(err) => println!("Could not initialize camera (maybe non available): {err}"),
            Ok(cam) => {
                let formats: Vec<_> = cam.formats().collect();
                println!("Supported formats: {formats:?}");

                match get_max_resolution(&cam, b"MJPG", cam_name) {
                    Ok(resolution) => {
                        let interval = get_fastest_interval(&cam, b"MJPG", resolution, cam_name);
                        println!("Resolution {resolution:?}, interval {interval:?}");
                    }
                    Err(err) => println!("No MJPG support: {err}"),
                }
            }
        }
    }
}
