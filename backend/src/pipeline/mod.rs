pub mod associate;
pub mod render;

use std::fs;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use shared::TaskVariant;

use crate::detector::{Detection, DetectorError, DetectorSet, Prediction};
use crate::storage::{ContentStore, StoreError, StoredImage};
use render::{
    FACE_COLOR, MASK_ALPHA, MASK_THRESHOLD, OBJECT_COLOR, PERSON_MASK_COLOR, Renderer,
};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to decode image: {0}")]
    Decode(image::ImageError),
    #[error("failed to encode result image: {0}")]
    Encode(image::ImageError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Seam between the dispatcher and the actual detection work.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, image: &StoredImage, variant: TaskVariant) -> Result<(), PipelineError>;
}

/// Runs one task variant end to end: decode, predict, composite, save.
pub struct Pipeline {
    detectors: DetectorSet,
    renderer: Arc<Renderer>,
    store: ContentStore,
}

impl Pipeline {
    pub fn new(detectors: DetectorSet, renderer: Arc<Renderer>, store: ContentStore) -> Self {
        Self {
            detectors,
            renderer,
            store,
        }
    }

    async fn process(
        &self,
        image: &StoredImage,
        variant: TaskVariant,
    ) -> Result<(), PipelineError> {
        let bytes = fs::read(&image.path)?;
        let source = image::load_from_memory(&bytes)
            .map_err(PipelineError::Decode)?
            .to_rgb8();

        let rendered = match variant {
            TaskVariant::Detect => {
                let prediction = self.detectors.objects.predict(&bytes).await?;
                log::info!(
                    "{}: detected {} objects",
                    image.file_name,
                    prediction.detections.len()
                );
                render_boxes(&source, &prediction.detections, OBJECT_COLOR, &self.renderer)
            }
            TaskVariant::DetectFace => {
                let prediction = self.detectors.faces.predict(&bytes).await?;
                log::info!(
                    "{}: detected {} faces",
                    image.file_name,
                    prediction.detections.len()
                );
                render_boxes(&source, &prediction.detections, FACE_COLOR, &self.renderer)
            }
            TaskVariant::Segment => {
                let prediction = self.detectors.segmentation.predict(&bytes).await?;
                render_segmentation(&source, &prediction.detections, &self.renderer)
            }
            TaskVariant::FaceSegment => match self.face_segment(&bytes, &source).await {
                Ok(img) => img,
                // Best effort: once the job has produced a decodable
                // source, the result path gets at least the original.
                Err(e) => {
                    log::warn!(
                        "{}: face segmentation failed, saving unmodified source: {}",
                        image.file_name,
                        e
                    );
                    source.clone()
                }
            },
            TaskVariant::Pose => {
                let prediction = self.detectors.pose.predict(&bytes).await?;
                render_pose(&source, &prediction.detections, &self.renderer)
            }
            TaskVariant::Classify => {
                let prediction = self.detectors.classification.predict(&bytes).await?;
                render_classification(&source, &prediction, &self.renderer)
            }
        };

        self.save(variant, image, rendered)
    }

    async fn face_segment(
        &self,
        bytes: &[u8],
        source: &RgbImage,
    ) -> Result<RgbImage, PipelineError> {
        let faces = self.detectors.faces.predict(bytes).await?;
        if faces.detections.is_empty() {
            log::info!("no faces detected, saving unmodified source");
            return Ok(source.clone());
        }
        let segments = self.detectors.segmentation.predict(bytes).await?;
        Ok(compose_face_segment(
            source,
            &faces.detections,
            &segments.detections,
            &self.renderer,
        ))
    }

    fn save(
        &self,
        variant: TaskVariant,
        image: &StoredImage,
        rendered: RgbImage,
    ) -> Result<(), PipelineError> {
        let output = self.store.output_path(variant, &image.file_name);
        let format = ImageFormat::from_path(&output).unwrap_or(ImageFormat::Png);
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(rendered)
            .write_to(&mut Cursor::new(&mut buf), format)
            .map_err(PipelineError::Encode)?;
        self.store.write_atomic(&output, &buf)?;
        log::info!("saved result artifact {}", output.display());
        Ok(())
    }
}

#[async_trait]
impl JobRunner for Pipeline {
    async fn run(&self, image: &StoredImage, variant: TaskVariant) -> Result<(), PipelineError> {
        self.process(image, variant).await
    }
}

/// Boxes and `{label} {conf}` labels, one color for the whole variant.
fn render_boxes(
    source: &RgbImage,
    detections: &[Detection],
    color: image::Rgb<u8>,
    renderer: &Renderer,
) -> RgbImage {
    let mut out = source.clone();
    for det in detections {
        renderer.draw_box(&mut out, &det.bbox, color);
        renderer.draw_label(
            &mut out,
            &format!("{} {:.2}", det.label, det.confidence),
            det.bbox.x1,
            det.bbox.y1,
            color,
        );
    }
    out
}

/// Full-extent mask overlay per detection, per-class color.
fn render_segmentation(
    source: &RgbImage,
    detections: &[Detection],
    renderer: &Renderer,
) -> RgbImage {
    let mut out = source.clone();
    let (w, h) = (source.width() as usize, source.height() as usize);
    for det in detections {
        let color = if det.label.eq_ignore_ascii_case("person") {
            PERSON_MASK_COLOR
        } else {
            OBJECT_COLOR
        };
        if let Some(mask) = &det.mask {
            let resized = associate::resize_nearest(mask, w, h);
            renderer.blend_mask(&mut out, &resized, color, MASK_THRESHOLD, MASK_ALPHA);
        }
        renderer.draw_box(&mut out, &det.bbox, color);
        renderer.draw_label(
            &mut out,
            &format!("{} {:.2}", det.label, det.confidence),
            det.bbox.x1,
            det.bbox.y1,
            color,
        );
    }
    out
}

/// The face_segment composite: each face highlighted with the mask of
/// the person it belongs to, restricted to the face rectangle.
pub fn compose_face_segment(
    source: &RgbImage,
    faces: &[Detection],
    segments: &[Detection],
    renderer: &Renderer,
) -> RgbImage {
    let mut out = source.clone();
    if faces.is_empty() {
        return out;
    }

    let persons: Vec<&Detection> = segments
        .iter()
        .filter(|d| d.label.eq_ignore_ascii_case("person") && d.mask.is_some())
        .collect();
    let person_boxes: Vec<_> = persons.iter().map(|d| d.bbox).collect();
    let face_boxes: Vec<_> = faces.iter().map(|d| d.bbox).collect();
    let matches = associate::match_faces(&face_boxes, &person_boxes);

    let (w, h) = (source.width() as usize, source.height() as usize);
    for (face, matched) in faces.iter().zip(matches) {
        if let Some(mask) = matched.and_then(|idx| persons[idx].mask.as_ref()) {
            let resized = associate::resize_nearest(mask, w, h);
            let restricted = associate::restrict_to_box(&resized, &face.bbox);
            renderer.blend_mask(&mut out, &restricted, FACE_COLOR, MASK_THRESHOLD, MASK_ALPHA);
        }
        // Unmatched faces still get their rectangle and label.
        renderer.draw_box(&mut out, &face.bbox, FACE_COLOR);
        renderer.draw_label(
            &mut out,
            &format!("Face {:.2}", face.confidence),
            face.bbox.x1,
            face.bbox.y1,
            FACE_COLOR,
        );
    }
    out
}

/// Person boxes, numbered labels, keypoints and skeleton edges.
/// The pose model only yields meaningful keypoints for people, so
/// other classes are dropped before numbering.
fn render_pose(source: &RgbImage, detections: &[Detection], renderer: &Renderer) -> RgbImage {
    let mut out = source.clone();
    let persons = detections
        .iter()
        .filter(|d| d.label.eq_ignore_ascii_case("person"));
    for (i, det) in persons.enumerate() {
        renderer.draw_box(&mut out, &det.bbox, OBJECT_COLOR);
        renderer.draw_label(
            &mut out,
            &format!("Person {} {:.2}", i + 1, det.confidence),
            det.bbox.x1,
            det.bbox.y1,
            OBJECT_COLOR,
        );
        if let Some(keypoints) = &det.keypoints {
            renderer.draw_keypoints(&mut out, keypoints);
        }
    }
    out
}

/// Top-5 class panel in the image corner.
fn render_classification(
    source: &RgbImage,
    prediction: &Prediction,
    renderer: &Renderer,
) -> RgbImage {
    let mut out = source.clone();
    let entries: Vec<(String, f32)> = prediction
        .classes
        .iter()
        .take(5)
        .map(|c| (c.label.clone(), c.confidence))
        .collect();
    renderer.draw_class_panel(&mut out, &entries);
    out
}
