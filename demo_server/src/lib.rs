//! HTTP and TCP shell around a capture loop: camera controls, an MJPEG stream of the
//! overlaid frames, and the latest results.

pub mod endpoints;
pub mod results_socket;
pub mod state;

use bytes::Bytes;
use image::{DynamicImage, RgbImage, RgbaImage};

/// Wrap a JPEG image as one part of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}

/// Layer the transparent `overlay` over `frame` and encode the result as JPEG.
pub fn compose_jpeg(frame: &RgbImage, overlay: &RgbaImage) -> Result<Vec<u8>, turbojpeg::Error> {
    let mut composed = DynamicImage::ImageRgb8(frame.clone()).into_rgba8();
    image::imageops::overlay(&mut composed, overlay, 0, 0);

    let jpeg = turbojpeg::compress_image(&composed, 85, turbojpeg::Subsamp::Sub2x2)?;
    Ok(jpeg.to_vec())
}
