//! Drawing surfaces for result overlays.
//!
use std::path::Path;

use common::protocol::BoundingBox;
use image::{Rgba, RgbaImage};
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut},
    rect::Rect,
};
use rusttype::{Font, Scale};

pub const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// 2D immediate-mode drawing context. Coordinates are frame pixels, origin top-left.
pub trait DrawingSurface {
    /// Make the surface `width` x `height` pixels.
    fn resize(&mut self, width: u32, height: u32);

    fn dimensions(&self) -> (u32, u32);

    /// Reset every pixel to transparent.
    fn clear(&mut self);

    fn fill_circle(&mut self, center: (f32, f32), radius: f32, color: Rgba<u8>);

    fn line(&mut self, from: (f32, f32), to: (f32, f32), color: Rgba<u8>);

    fn stroke_rect(&mut self, rect: &BoundingBox, color: Rgba<u8>, thickness: u32);

    /// Draw `text` with its top-left corner at `origin`.
    fn text(&mut self, origin: (f32, f32), text: &str, color: Rgba<u8>);
}

/// Transparent RGBA image to be layered over the video frame.
pub struct ImageCanvas {
    image: RgbaImage,
    font: Option<Font<'static>>,
    scale: Scale,
}

impl ImageCanvas {
    pub fn new(font: Option<Font<'static>>) -> Self {
        Self {
            image: RgbaImage::new(0, 0),
            font,
            scale: Scale { x: 16.0, y: 16.0 },
        }
    }

    /// Canvas with the font at `path`. Text is skipped if the font cannot be loaded.
    pub fn with_font_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let font = match std::fs::read(path) {
            Ok(data) => Font::try_from_vec(data),
            Err(err) => {
                log::warn!("Unable to read font {}: {}", path.display(), err);
                None
            }
        };
        if font.is_none() {
            log::warn!("No usable font at {}, labels are not drawn", path.display());
        }
        Self::new(font)
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

impl DrawingSurface for ImageCanvas {
    fn resize(&mut self, width: u32, height: u32) {
        if self.image.dimensions() != (width, height) {
            self.image = RgbaImage::new(width, height);
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn clear(&mut self) {
        self.image.pixels_mut().for_each(|pixel| *pixel = TRANSPARENT);
    }

    fn fill_circle(&mut self, center: (f32, f32), radius: f32, color: Rgba<u8>) {
        let center = (center.0.round() as i32, center.1.round() as i32);
        draw_filled_circle_mut(&mut self.image, center, radius.round() as i32, color);
    }

    fn line(&mut self, from: (f32, f32), to: (f32, f32), color: Rgba<u8>) {
        draw_line_segment_mut(&mut self.image, from, to, color);
    }

    fn stroke_rect(&mut self, rect: &BoundingBox, color: Rgba<u8>, thickness: u32) {
        let (x, y) = (rect.x.round() as i32, rect.y.round() as i32);
        let (width, height) = (rect.width.round() as i32, rect.height.round() as i32);

        // Nested outlines, shrinking inwards
        for t in 0..thickness as i32 {
            let (w, h) = (width - 2 * t, height - 2 * t);
            if w <= 0 || h <= 0 {
                break;
            }
            let outline = Rect::at(x + t, y + t).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut self.image, outline, color);
        }
    }

    fn text(&mut self, origin: (f32, f32), text: &str, color: Rgba<u8>) {
        if let Some(font) = &self.font {
            draw_text_mut(
                &mut self.image,
                color,
                origin.0.round() as i32,
                origin.1.round() as i32,
                self.scale,
                font,
                text,
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resize_and_clear() {
        let mut canvas = ImageCanvas::new(None);
        assert_eq!(canvas.dimensions(), (0, 0));

        canvas.resize(64, 48);
        assert_eq!(canvas.dimensions(), (64, 48));

        canvas.fill_circle((10.0, 10.0), 3.0, RED);
        assert_eq!(canvas.image().get_pixel(10, 10), &RED);

        canvas.clear();
        assert!(canvas.image().pixels().all(|pixel| *pixel == TRANSPARENT));
    }

    #[test]
    fn stroke_rect_draws_outline_only() {
        let mut canvas = ImageCanvas::new(None);
        canvas.resize(100, 100);
        canvas.stroke_rect(&BoundingBox::new(10.0, 10.0, 50.0, 50.0), GREEN, 2);

        assert_eq!(canvas.image().get_pixel(10, 10), &GREEN);
        assert_eq!(canvas.image().get_pixel(11, 30), &GREEN);
        assert_eq!(canvas.image().get_pixel(59, 59), &GREEN);
        assert_eq!(canvas.image().get_pixel(35, 35), &TRANSPARENT);
        assert_eq!(canvas.image().get_pixel(61, 61), &TRANSPARENT);
    }

    #[test]
    fn degenerate_rect_is_ignored() {
        let mut canvas = ImageCanvas::new(None);
        canvas.resize(20, 20);
        canvas.stroke_rect(&BoundingBox::new(5.0, 5.0, 0.0, 4.0), GREEN, 1);
        assert!(canvas.image().pixels().all(|pixel| *pixel == TRANSPARENT));
    }

    #[test]
    fn missing_font_skips_text() {
        let mut canvas = ImageCanvas::with_font_file("does/not/exist.ttf");
        canvas.resize(20, 20);
        canvas.text((0.0, 0.0), "cat 90%", RED);
        assert!(canvas.image().pixels().all(|pixel| *pixel == TRANSPARENT));
    }
}
