//! Overlay drawing for result artifacts.

use std::fs;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_text_mut,
};
use imageproc::rect::Rect;
use ndarray::Array2;

use crate::detector::{BoundingBox, Keypoint};

pub const FACE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const OBJECT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const PERSON_MASK_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const SKELETON_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
pub const PANEL_BG: Rgb<u8> = Rgb([0, 0, 0]);
pub const PANEL_BORDER: Rgb<u8> = Rgb([255, 255, 255]);
pub const TOP_CLASS_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Highlight opacity for mask overlays.
pub const MASK_ALPHA: f32 = 0.4;
/// Mask membership threshold.
pub const MASK_THRESHOLD: f32 = 0.3;
/// Keypoint visibility threshold.
pub const KEYPOINT_THRESHOLD: f32 = 0.3;

const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 16.0;

const KEYPOINT_COLORS: &[Rgb<u8>] = &[
    Rgb([255, 0, 0]),
    Rgb([255, 128, 0]),
    Rgb([255, 255, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 255, 255]),
    Rgb([0, 0, 255]),
    Rgb([255, 0, 255]),
];

/// COCO-17 skeleton edges (keypoint index pairs).
pub const SKELETON_EDGES: &[(usize, usize)] = &[
    (0, 1),
    (0, 2),
    (1, 3),
    (2, 4),
    (5, 6),
    (5, 7),
    (7, 9),
    (6, 8),
    (8, 10),
    (5, 11),
    (6, 12),
    (11, 12),
    (11, 13),
    (13, 15),
    (12, 14),
    (14, 16),
];

/// Candidate font locations probed when `LABEL_FONT` is unset.
const FONT_FALLBACKS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
];

pub struct Renderer {
    font: Option<FontVec>,
}

impl Renderer {
    /// Probes the configured path, then common system locations. A
    /// missing font disables label text but not geometry.
    pub fn new(font_path: Option<&Path>) -> Self {
        let font = font_path
            .and_then(Self::load_font)
            .or_else(|| FONT_FALLBACKS.iter().find_map(|p| Self::load_font(Path::new(p))));
        if font.is_none() {
            log::warn!("no label font found; result images will omit text labels");
        }
        Self { font }
    }

    pub fn without_font() -> Self {
        Self { font: None }
    }

    fn load_font(path: &Path) -> Option<FontVec> {
        let bytes = fs::read(path).ok()?;
        match FontVec::try_from_vec(bytes) {
            Ok(font) => {
                log::info!("loaded label font from {}", path.display());
                Some(font)
            }
            Err(e) => {
                log::warn!("failed to parse font {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Hollow rectangle, fixed 2 px stroke drawn inward.
    pub fn draw_box(&self, image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
        let x1 = bbox.x1.round() as i32;
        let y1 = bbox.y1.round() as i32;
        let w = bbox.width().round() as i32;
        let h = bbox.height().round() as i32;
        for t in 0..BOX_THICKNESS {
            let (rw, rh) = (w - 2 * t, h - 2 * t);
            if rw <= 0 || rh <= 0 {
                break;
            }
            draw_hollow_rect_mut(
                image,
                Rect::at(x1 + t, y1 + t).of_size(rw as u32, rh as u32),
                color,
            );
        }
    }

    /// Label text just above (x, y); a no-op without a font.
    pub fn draw_label(&self, image: &mut RgbImage, text: &str, x: f32, y: f32, color: Rgb<u8>) {
        let Some(font) = &self.font else {
            return;
        };
        let tx = x.round() as i32;
        let ty = ((y - LABEL_SCALE - 2.0).round() as i32).max(0);
        draw_text_mut(image, color, tx, ty, PxScale::from(LABEL_SCALE), font, text);
    }

    /// Alpha-blends `color` into every pixel whose mask weight clears
    /// the threshold. The mask must already match the image extent.
    pub fn blend_mask(
        &self,
        image: &mut RgbImage,
        mask: &Array2<f32>,
        color: Rgb<u8>,
        threshold: f32,
        alpha: f32,
    ) {
        let (h, w) = mask.dim();
        let (img_w, img_h) = (image.width() as usize, image.height() as usize);
        for y in 0..h.min(img_h) {
            for x in 0..w.min(img_w) {
                if mask[[y, x]] <= threshold {
                    continue;
                }
                let pixel = image.get_pixel_mut(x as u32, y as u32);
                for c in 0..3 {
                    let blended =
                        pixel.0[c] as f32 * (1.0 - alpha) + color.0[c] as f32 * alpha;
                    pixel.0[c] = blended.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }

    /// Keypoints above the visibility threshold as filled circles,
    /// plus skeleton edges where both endpoints are visible.
    pub fn draw_keypoints(&self, image: &mut RgbImage, keypoints: &[Keypoint]) {
        for (edge_a, edge_b) in SKELETON_EDGES {
            let (Some(a), Some(b)) = (keypoints.get(*edge_a), keypoints.get(*edge_b)) else {
                continue;
            };
            if a.confidence > KEYPOINT_THRESHOLD && b.confidence > KEYPOINT_THRESHOLD {
                draw_line_segment_mut(image, (a.x, a.y), (b.x, b.y), SKELETON_COLOR);
            }
        }
        for (idx, kp) in keypoints.iter().enumerate() {
            if kp.confidence > KEYPOINT_THRESHOLD {
                let color = KEYPOINT_COLORS[idx % KEYPOINT_COLORS.len()];
                draw_filled_circle_mut(
                    image,
                    (kp.x.round() as i32, kp.y.round() as i32),
                    4,
                    color,
                );
            }
        }
    }

    /// Top-left panel listing classification scores, top-1 highlighted.
    pub fn draw_class_panel(&self, image: &mut RgbImage, entries: &[(String, f32)]) {
        if entries.is_empty() {
            return;
        }
        let line_height = (LABEL_SCALE as i32) + 8;
        let panel_h = entries.len() as i32 * line_height + 20;
        let panel_w = (image.width() as i32 - 10).min(400).max(0);
        if panel_w == 0 || panel_h as u32 >= image.height() {
            return;
        }
        draw_filled_rect_mut(
            image,
            Rect::at(10, 10).of_size(panel_w as u32, panel_h as u32),
            PANEL_BG,
        );
        draw_hollow_rect_mut(
            image,
            Rect::at(10, 10).of_size(panel_w as u32, panel_h as u32),
            PANEL_BORDER,
        );
        let Some(font) = &self.font else {
            return;
        };
        for (i, (label, confidence)) in entries.iter().enumerate() {
            let color = if i == 0 { TOP_CLASS_COLOR } else { PANEL_BORDER };
            let text = format!("{}. {}: {:.2}%", i + 1, label, confidence * 100.0);
            draw_text_mut(
                image,
                color,
                20,
                20 + i as i32 * line_height,
                PxScale::from(LABEL_SCALE),
                font,
                &text,
            );
        }
    }
}
