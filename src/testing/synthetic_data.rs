//! Synthetic inspection scenes
//!
//! Reproduces what the camera sees on the inspection stand: a single red apple on a
//! light backdrop, optionally with rot spots, or the empty backdrop. Lets the vision
//! pipeline and the capture loop be tested offline without hardware.

use crate::types::Frame;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// Scene dimensions used by every generator
pub const SCENE_WIDTH: u32 = 320;
pub const SCENE_HEIGHT: u32 = 240;
pub const FRUIT_RADIUS: i64 = 60;

pub const BACKDROP: Rgb<u8> = Rgb([240, 240, 240]);
pub const SKIN: Rgb<u8> = Rgb([210, 40, 35]);
pub const ROT: Rgb<u8> = Rgb([40, 20, 20]);
const ROT_RADIUS: i64 = 18;
const ROT_OFFSET: i64 = 25;

fn fill_disk(img: &mut RgbImage, cx: i64, cy: i64, radius: i64, color: Rgb<u8>) {
    let r2 = radius * radius;
    for y in (cy - radius).max(0)..=(cy + radius).min(img.height() as i64 - 1) {
        for x in (cx - radius).max(0)..=(cx + radius).min(img.width() as i64 - 1) {
            let (dx, dy) = (x - cx, y - cy);
            if dx * dx + dy * dy <= r2 {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

/// Healthy apple centred in the scene.
pub fn healthy_fruit_image() -> RgbImage {
    let mut img = RgbImage::from_pixel(SCENE_WIDTH, SCENE_HEIGHT, BACKDROP);
    fill_disk(
        &mut img,
        i64::from(SCENE_WIDTH / 2),
        i64::from(SCENE_HEIGHT / 2),
        FRUIT_RADIUS,
        SKIN,
    );
    img
}

/// Apple with four dark rot spots, enough dark area to trip the defect heuristic.
pub fn blemished_fruit_image() -> RgbImage {
    let mut img = healthy_fruit_image();
    let (cx, cy) = (i64::from(SCENE_WIDTH / 2), i64::from(SCENE_HEIGHT / 2));
    for (sx, sy) in [(-1, -1), (1, -1), (-1, 1), (1, 1)] {
        fill_disk(&mut img, cx + sx * ROT_OFFSET, cy + sy * ROT_OFFSET, ROT_RADIUS, ROT);
    }
    img
}

/// Backdrop only.
pub fn empty_scene_image() -> RgbImage {
    RgbImage::from_pixel(SCENE_WIDTH, SCENE_HEIGHT, Rgb([128, 128, 128]))
}

pub fn healthy_fruit_frame(sequence: u64) -> Frame {
    Frame::from_image(sequence, sequence * 33_333, healthy_fruit_image())
}

pub fn blemished_fruit_frame(sequence: u64) -> Frame {
    Frame::from_image(sequence, sequence * 33_333, blemished_fruit_image())
}

pub fn empty_scene(sequence: u64) -> Frame {
    Frame::from_image(sequence, sequence * 33_333, empty_scene_image())
}

/// PNG bytes of an image, as an upload would arrive.
pub fn png_bytes(img: &RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    // encoding into memory cannot fail for RGB8
    let _ = img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png);
    bytes
}
