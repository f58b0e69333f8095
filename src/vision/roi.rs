/// Region-of-interest segmentation
///
/// Color thresholding in HSV, morphological cleanup, largest connected component,
/// then circularity from the outer contour. Works on full frames; the resulting mask
/// always has the frame's dimensions.
use crate::config::DetectionConfig;
use crate::types::{BoundingBox, Frame, RoiCandidate};
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::geometry::arc_length;
use imageproc::morphology::{close, open};
use imageproc::region_labelling::{connected_components, Connectivity};

/// Radius of the diamond structuring element used for open/close.
const MORPH_RADIUS: u8 = 2;
const FOREGROUND: u8 = 255;

#[derive(Debug, Clone)]
pub struct RoiDetector {
    min_area: u32,
    circularity_min: f32,
    padding: u32,
    saturation_min: u8,
    value_min: u8,
    value_max: u8,
}

impl RoiDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            min_area: config.min_roi_area,
            circularity_min: config.circularity_min,
            padding: config.roi_padding,
            saturation_min: config.saturation_min,
            value_min: config.value_min,
            value_max: config.value_max,
        }
    }

    pub fn detect(&self, frame: &Frame) -> RoiCandidate {
        let (width, height) = (frame.width(), frame.height());

        let base = self.color_mask(frame);
        let base = close(&open(&base, Norm::L1, MORPH_RADIUS), Norm::L1, MORPH_RADIUS);

        let Some((mask, bbox)) = self.largest_component(&base) else {
            log::trace!("frame {}: no component above {} px", frame.sequence, self.min_area);
            return RoiCandidate::empty(width, height);
        };

        let area = mask.pixels().filter(|p| p.0[0] == FOREGROUND).count() as u32;
        let circularity = outer_circularity(&mask, area);
        let valid = area >= self.min_area && circularity >= self.circularity_min;

        log::trace!(
            "frame {}: roi area={} circularity={:.3} valid={}",
            frame.sequence,
            area,
            circularity,
            valid
        );

        RoiCandidate {
            bbox: Some(bbox.padded(self.padding, width, height)),
            mask,
            area,
            circularity,
            valid,
        }
    }

    /// Alert text for a region that was found but rejected as too irregular.
    pub fn circularity_alert(&self, candidate: &RoiCandidate) -> Option<String> {
        if candidate.bbox.is_some() && candidate.circularity < self.circularity_min {
            Some(format!(
                "Circularity too low: {:.2} (min: {})",
                candidate.circularity, self.circularity_min
            ))
        } else {
            None
        }
    }

    fn color_mask(&self, frame: &Frame) -> GrayImage {
        let image = frame.image();
        GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
            let [r, g, b] = image.get_pixel(x, y).0;
            let (s, v) = saturation_value(r, g, b);
            let keep = s > self.saturation_min && v > self.value_min && v < self.value_max;
            Luma([if keep { FOREGROUND } else { 0 }])
        })
    }

    /// Largest 8-connected component meeting the area threshold, re-closed, with its tight box.
    fn largest_component(&self, base: &GrayImage) -> Option<(GrayImage, BoundingBox)> {
        let labels = connected_components(base, Connectivity::Eight, Luma([0u8]));

        let mut stats: Vec<ComponentStats> = Vec::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let id = label.0[0] as usize;
            if id == 0 {
                continue;
            }
            if stats.len() < id {
                stats.resize(id, ComponentStats::default());
            }
            stats[id - 1].add(x, y);
        }

        let (best_index, best) = stats
            .iter()
            .enumerate()
            .filter(|(_, s)| s.area >= self.min_area)
            .max_by_key(|(_, s)| s.area)?;
        let best_label = best_index as u32 + 1;

        let component = GrayImage::from_fn(base.width(), base.height(), |x, y| {
            Luma([if labels.get_pixel(x, y).0[0] == best_label { FOREGROUND } else { 0 }])
        });
        let mask = close(&component, Norm::L1, MORPH_RADIUS);

        let bbox = tight_box(&mask).unwrap_or(best.bbox());
        Some((mask, bbox))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ComponentStats {
    area: u32,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

impl ComponentStats {
    fn add(&mut self, x: u32, y: u32) {
        if self.area == 0 {
            self.min_x = x;
            self.max_x = x;
            self.min_y = y;
            self.max_y = y;
        } else {
            self.min_x = self.min_x.min(x);
            self.max_x = self.max_x.max(x);
            self.min_y = self.min_y.min(y);
            self.max_y = self.max_y.max(y);
        }
        self.area += 1;
    }

    fn bbox(&self) -> BoundingBox {
        BoundingBox {
            x: self.min_x,
            y: self.min_y,
            width: self.max_x - self.min_x + 1,
            height: self.max_y - self.min_y + 1,
        }
    }
}

fn tight_box(mask: &GrayImage) -> Option<BoundingBox> {
    let mut stats = ComponentStats::default();
    for (x, y, p) in mask.enumerate_pixels() {
        if p.0[0] == FOREGROUND {
            stats.add(x, y);
        }
    }
    (stats.area > 0).then(|| stats.bbox())
}

/// 4*pi*area / perimeter^2 of the longest outer contour. Zero when no perimeter exists.
fn outer_circularity(mask: &GrayImage, area: u32) -> f32 {
    let perimeter = find_contours::<i32>(mask)
        .iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .map(|c| arc_length(&c.points, true))
        .fold(0.0f64, f64::max);

    if perimeter <= 0.0 {
        return 0.0;
    }
    let circularity = 4.0 * std::f64::consts::PI * f64::from(area) / (perimeter * perimeter);
    circularity as f32
}

/// Saturation and value on the 0-255 scale used by common HSV conversions.
pub fn saturation_value(r: u8, g: u8, b: u8) -> (u8, u8) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max == 0 {
        return (0, 0);
    }
    let s = (u32::from(max - min) * 255 + u32::from(max) / 2) / u32::from(max);
    (s.min(255) as u8, max)
}
