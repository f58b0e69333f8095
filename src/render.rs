/// Annotated preview frames
///
/// Every processed frame gets a rendered view: mask tint, label-colored box, a
/// verdict caption and a static instructions line. Output is JPEG for pull-based
/// MJPEG-style consumers.
use crate::errors::ScanError;
use crate::types::{ClassificationVote, Frame, Label, RoiCandidate};
use bytes::Bytes;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

const MASK_ALPHA: f32 = 0.35;
const MASK_TINT: Rgb<u8> = Rgb([0, 160, 255]);
const GLYPH: u32 = 8;
const TEXT_SCALE: u32 = 2;
const CAPTION_PAD: u32 = 3;
const BOX_THICKNESS: i32 = 2;

pub const DEFAULT_INSTRUCTIONS: &str = "Place one fruit in view | capture: manual record | live: auto record";

pub fn label_color(label: Label) -> Option<Rgb<u8>> {
    match label {
        Label::Acceptable => Some(Rgb([0, 200, 0])),
        Label::Defective => Some(Rgb([220, 0, 0])),
        Label::Unknown => Some(Rgb([230, 200, 0])),
        Label::NoObject => None,
    }
}

#[derive(Debug, Clone)]
pub struct StreamRenderer {
    jpeg_quality: u8,
    instructions: String,
}

impl StreamRenderer {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn render(&self, frame: &Frame, roi: &RoiCandidate, verdict: &ClassificationVote, live: bool) -> RgbImage {
        let mut canvas = frame.image().clone();

        if roi.mask.dimensions() == canvas.dimensions() {
            tint_mask(&mut canvas, roi, MASK_TINT);
        }

        if let (Some(color), Some(bbox)) = (label_color(verdict.label), roi.bbox) {
            for inset in 0..BOX_THICKNESS {
                let w = bbox.width as i32 - 2 * inset;
                let h = bbox.height as i32 - 2 * inset;
                if w > 0 && h > 0 {
                    let rect = Rect::at(bbox.x as i32 + inset, bbox.y as i32 + inset).of_size(w as u32, h as u32);
                    draw_hollow_rect_mut(&mut canvas, rect, color);
                }
            }

            let caption = format!(
                "{} ({}) {:.2}",
                verdict.label,
                verdict.source.as_str(),
                verdict.confidence
            );
            let caption_h = GLYPH * TEXT_SCALE + 2 * CAPTION_PAD;
            let y = if bbox.y >= caption_h { bbox.y - caption_h } else { bbox.y + bbox.height };
            draw_caption(&mut canvas, &caption, bbox.x, y, color, Rgb([0, 0, 0]));
        }

        draw_caption(&mut canvas, &self.instructions, 0, 0, Rgb([0, 0, 0]), Rgb([255, 255, 255]));
        if live {
            let badge_w = text_width("LIVE") + 2 * CAPTION_PAD;
            let x = canvas.width().saturating_sub(badge_w);
            draw_caption(&mut canvas, "LIVE", x, 0, Rgb([220, 0, 0]), Rgb([255, 255, 255]));
        }

        canvas
    }

    pub fn encode_jpeg(&self, image: &RgbImage) -> Result<Bytes, ScanError> {
        let mut buffer = Vec::with_capacity((image.width() * image.height()) as usize / 4);
        let encoder = JpegEncoder::new_with_quality(&mut buffer, self.jpeg_quality);
        DynamicImage::ImageRgb8(image.clone())
            .write_with_encoder(encoder)
            .map_err(|e| ScanError::InvalidImage(format!("JPEG encoding failed: {}", e)))?;
        Ok(Bytes::from(buffer))
    }

    pub fn render_jpeg(
        &self,
        frame: &Frame,
        roi: &RoiCandidate,
        verdict: &ClassificationVote,
        live: bool,
    ) -> Result<Bytes, ScanError> {
        self.encode_jpeg(&self.render(frame, roi, verdict, live))
    }
}

impl Default for StreamRenderer {
    fn default() -> Self {
        Self::new(85)
    }
}

fn tint_mask(canvas: &mut RgbImage, roi: &RoiCandidate, tint: Rgb<u8>) {
    for (x, y, m) in roi.mask.enumerate_pixels() {
        if m.0[0] == 0 {
            continue;
        }
        let pixel = canvas.get_pixel_mut(x, y);
        for c in 0..3 {
            let base = f32::from(pixel.0[c]);
            let blended = base * (1.0 - MASK_ALPHA) + f32::from(tint.0[c]) * MASK_ALPHA;
            pixel.0[c] = blended.round() as u8;
        }
    }
}

fn text_width(text: &str) -> u32 {
    text.chars().count() as u32 * GLYPH * TEXT_SCALE
}

/// Filled background box with 8x8 bitmap text, clipped to the canvas.
fn draw_caption(canvas: &mut RgbImage, text: &str, x: u32, y: u32, background: Rgb<u8>, foreground: Rgb<u8>) {
    let (cw, ch) = canvas.dimensions();
    if x >= cw || y >= ch {
        return;
    }
    let w = (text_width(text) + 2 * CAPTION_PAD).min(cw - x);
    let h = (GLYPH * TEXT_SCALE + 2 * CAPTION_PAD).min(ch - y);
    if w == 0 || h == 0 {
        return;
    }
    draw_filled_rect_mut(canvas, Rect::at(x as i32, y as i32).of_size(w, h), background);

    let mut pen_x = x + CAPTION_PAD;
    let pen_y = y + CAPTION_PAD;
    for c in text.chars() {
        let glyph = BASIC_FONTS.get(c).or_else(|| BASIC_FONTS.get('?')).unwrap_or([0; 8]);
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH {
                if bits & (1 << col) == 0 {
                    continue;
                }
                for dy in 0..TEXT_SCALE {
                    for dx in 0..TEXT_SCALE {
                        let px = pen_x + col * TEXT_SCALE + dx;
                        let py = pen_y + row as u32 * TEXT_SCALE + dy;
                        if px < cw && py < ch {
                            canvas.put_pixel(px, py, foreground);
                        }
                    }
                }
            }
        }
        pen_x += GLYPH * TEXT_SCALE;
        if pen_x >= cw {
            break;
        }
    }
}
