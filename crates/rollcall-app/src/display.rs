//! Live annotated video window.
//!
//! Renders the grayscale feed with a bounding box around the processed face
//! (color-coded by outcome), a red banner when the lighting gate rejects the
//! frame, and session status in the window title. A designated key press
//! (`q` or Escape) signals the session to exit.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use minifb::{Key, Window, WindowOptions};
use rollcall_core::FaceBox;
use rollcall_hw::Frame;
use thiserror::Error;

const WINDOW_TITLE: &str = "Rollcall Attendance";
const BANNER_HEIGHT: u32 = 28;
const BANNER_COLOR: Rgb<u8> = Rgb([190, 20, 20]);
const KNOWN_COLOR: Rgb<u8> = Rgb([0, 220, 0]);
const SPOOF_COLOR: Rgb<u8> = Rgb([230, 30, 30]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([235, 200, 30]);

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("window error: {0}")]
    Window(#[from] minifb::Error),
}

/// How the processed face should be annotated.
#[derive(Debug, Clone)]
pub enum FaceTag {
    Known(String),
    Spoof,
    Unknown,
}

/// Everything drawn on top of a frame.
#[derive(Debug, Clone, Default)]
pub struct Overlay {
    pub face: Option<(FaceBox, FaceTag)>,
    pub low_light: bool,
}

/// Compose the annotated RGB image for one frame.
fn compose(frame: &Frame, overlay: &Overlay) -> RgbImage {
    let mut img = RgbImage::from_fn(frame.width, frame.height, |x, y| {
        let v = frame.data[(y * frame.width + x) as usize];
        Rgb([v, v, v])
    });

    if overlay.low_light {
        let banner_h = BANNER_HEIGHT.min(frame.height);
        for y in 0..banner_h {
            for x in 0..frame.width {
                img.put_pixel(x, y, BANNER_COLOR);
            }
        }
    }

    if let Some((face, tag)) = &overlay.face {
        let color = match tag {
            FaceTag::Known(_) => KNOWN_COLOR,
            FaceTag::Spoof => SPOOF_COLOR,
            FaceTag::Unknown => UNKNOWN_COLOR,
        };
        let w = face.width.max(1.0) as u32;
        let h = face.height.max(1.0) as u32;
        let rect = Rect::at(face.x as i32, face.y as i32).of_size(w, h);
        // Two nested rectangles for a visible 2px outline.
        draw_hollow_rect_mut(&mut img, rect, color);
        if w > 2 && h > 2 {
            let inner = Rect::at(face.x as i32 + 1, face.y as i32 + 1).of_size(w - 2, h - 2);
            draw_hollow_rect_mut(&mut img, inner, color);
        }
    }

    img
}

/// Pack an RGB image into the 0RGB u32 buffer minifb expects.
fn to_argb(img: &RgbImage) -> Vec<u32> {
    img.pixels()
        .map(|Rgb([r, g, b])| ((*r as u32) << 16) | ((*g as u32) << 8) | *b as u32)
        .collect()
}

/// Video window showing the annotated feed.
pub struct Display {
    window: Window,
    width: usize,
    height: usize,
}

impl Display {
    /// Open the window at the camera's resolution.
    pub fn open(width: u32, height: u32) -> Result<Self, DisplayError> {
        let window = Window::new(
            WINDOW_TITLE,
            width as usize,
            height as usize,
            WindowOptions::default(),
        )?;
        Ok(Self {
            window,
            width: width as usize,
            height: height as usize,
        })
    }

    /// Draw one frame with its overlay.
    pub fn present(&mut self, frame: &Frame, overlay: &Overlay) -> Result<(), DisplayError> {
        let img = compose(frame, overlay);
        let buffer = to_argb(&img);
        self.window
            .update_with_buffer(&buffer, self.width, self.height)?;
        Ok(())
    }

    /// Surface a status line in the window title.
    pub fn set_status(&mut self, status: &str) {
        if status.is_empty() {
            self.window.set_title(WINDOW_TITLE);
        } else {
            self.window.set_title(&format!("{WINDOW_TITLE} — {status}"));
        }
    }

    /// True once the operator asked to leave the loop: window closed,
    /// `q`, or Escape.
    pub fn quit_requested(&self) -> bool {
        !self.window.is_open()
            || self.window.is_key_down(Key::Q)
            || self.window.is_key_down(Key::Escape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(value: u8, width: u32, height: u32) -> Frame {
        Frame {
            data: vec![value; (width * height) as usize],
            width,
            height,
            timestamp: std::time::Instant::now(),
        }
    }

    fn face(x: f32, y: f32, w: f32, h: f32) -> FaceBox {
        FaceBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            landmarks: None,
        }
    }

    #[test]
    fn test_compose_gray_passthrough() {
        let img = compose(&gray_frame(120, 64, 64), &Overlay::default());
        assert_eq!(img.get_pixel(10, 40), &Rgb([120, 120, 120]));
    }

    #[test]
    fn test_compose_low_light_banner() {
        let overlay = Overlay {
            face: None,
            low_light: true,
        };
        let img = compose(&gray_frame(20, 64, 64), &overlay);
        assert_eq!(img.get_pixel(0, 0), &BANNER_COLOR);
        assert_eq!(img.get_pixel(63, BANNER_HEIGHT - 1), &BANNER_COLOR);
        // Below the banner the feed shows through.
        assert_eq!(img.get_pixel(0, BANNER_HEIGHT), &Rgb([20, 20, 20]));
    }

    #[test]
    fn test_compose_known_face_outline() {
        let overlay = Overlay {
            face: Some((face(8.0, 8.0, 20.0, 20.0), FaceTag::Known("Alice".into()))),
            low_light: false,
        };
        let img = compose(&gray_frame(64, 64, 64), &overlay);
        assert_eq!(img.get_pixel(8, 8), &KNOWN_COLOR);
        // Interior untouched.
        assert_eq!(img.get_pixel(18, 18), &Rgb([64, 64, 64]));
    }

    #[test]
    fn test_compose_spoof_face_outline_is_red() {
        let overlay = Overlay {
            face: Some((face(8.0, 8.0, 20.0, 20.0), FaceTag::Spoof)),
            low_light: false,
        };
        let img = compose(&gray_frame(64, 64, 64), &overlay);
        assert_eq!(img.get_pixel(8, 8), &SPOOF_COLOR);
    }

    #[test]
    fn test_compose_clips_out_of_frame_box() {
        // A box hanging over the right edge must not panic.
        let overlay = Overlay {
            face: Some((face(50.0, 50.0, 40.0, 40.0), FaceTag::Unknown)),
            low_light: false,
        };
        let img = compose(&gray_frame(64, 64, 64), &overlay);
        assert_eq!(img.get_pixel(50, 50), &UNKNOWN_COLOR);
    }

    #[test]
    fn test_to_argb_packs_channels() {
        let mut img = RgbImage::new(1, 1);
        img.put_pixel(0, 0, Rgb([0x12, 0x34, 0x56]));
        assert_eq!(to_argb(&img), vec![0x0012_3456]);
    }
}
