//! Geometric association of face boxes with person segmentation masks.
//!
//! The detector stack has no face-mask model; it produces face boxes
//! and person masks from two separate models. Each face is paired with
//! the person it most plausibly belongs to using center containment
//! plus IoU, and the person's mask is then restricted to the face box.

use ndarray::Array2;

use crate::detector::BoundingBox;

/// Per-face best-match selection against candidate person boxes.
///
/// A candidate must contain the face's center point; among containing
/// candidates the one with the highest box IoU wins. Faces with no
/// containing candidate stay unmatched. Matching is independent per
/// face: two overlapping faces may claim the same person mask. That is
/// the observed reference behavior, kept as-is.
pub fn match_faces(faces: &[BoundingBox], persons: &[BoundingBox]) -> Vec<Option<usize>> {
    faces
        .iter()
        .map(|face| {
            let (cx, cy) = face.center();
            let mut best: Option<(usize, f32)> = None;
            for (idx, person) in persons.iter().enumerate() {
                if !person.contains_point(cx, cy) {
                    continue;
                }
                let iou = face.iou(person);
                if best.map(|(_, b)| iou > b).unwrap_or(true) {
                    best = Some((idx, iou));
                }
            }
            best.map(|(idx, _)| idx)
        })
        .collect()
}

/// Nearest-neighbor resize of a mask to the target dimensions.
pub fn resize_nearest(mask: &Array2<f32>, width: usize, height: usize) -> Array2<f32> {
    let (src_h, src_w) = mask.dim();
    if src_h == 0 || src_w == 0 || width == 0 || height == 0 {
        return Array2::zeros((height, width));
    }
    Array2::from_shape_fn((height, width), |(y, x)| {
        let sy = (y * src_h / height).min(src_h - 1);
        let sx = (x * src_w / width).min(src_w - 1);
        mask[[sy, sx]]
    })
}

/// Zeroes the mask outside the given box, so a whole-person mask does
/// not bleed over the full frame when only the face region is wanted.
pub fn restrict_to_box(mask: &Array2<f32>, bbox: &BoundingBox) -> Array2<f32> {
    let (h, w) = mask.dim();
    let x1 = bbox.x1.max(0.0) as usize;
    let y1 = bbox.y1.max(0.0) as usize;
    let x2 = (bbox.x2.max(0.0) as usize).min(w);
    let y2 = (bbox.y2.max(0.0) as usize).min(h);

    let mut restricted = Array2::zeros((h, w));
    for y in y1..y2 {
        for x in x1..x2 {
            restricted[[y, x]] = mask[[y, x]];
        }
    }
    restricted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bb(x1: f32, y1: f32, x2: f32, y2: f32) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2)
    }

    #[test]
    fn face_inside_sole_person_matches_it() {
        let faces = vec![bb(10.0, 10.0, 30.0, 30.0)];
        let persons = vec![bb(0.0, 0.0, 100.0, 100.0)];
        assert_eq!(match_faces(&faces, &persons), vec![Some(0)]);
    }

    #[test]
    fn face_outside_all_persons_is_unmatched() {
        let faces = vec![bb(200.0, 200.0, 220.0, 220.0)];
        let persons = vec![bb(0.0, 0.0, 100.0, 100.0)];
        assert_eq!(match_faces(&faces, &persons), vec![None]);
    }

    #[test]
    fn overlapping_persons_resolved_by_iou() {
        let faces = vec![bb(10.0, 10.0, 30.0, 30.0)];
        // Both contain the face center (20, 20); the tighter box has
        // the higher IoU with the face.
        let persons = vec![bb(0.0, 0.0, 500.0, 500.0), bb(5.0, 5.0, 50.0, 50.0)];
        assert_eq!(match_faces(&faces, &persons), vec![Some(1)]);
    }

    #[test]
    fn two_faces_may_claim_the_same_person() {
        let faces = vec![bb(10.0, 10.0, 20.0, 20.0), bb(30.0, 30.0, 40.0, 40.0)];
        let persons = vec![bb(0.0, 0.0, 100.0, 100.0)];
        assert_eq!(match_faces(&faces, &persons), vec![Some(0), Some(0)]);
    }

    #[test]
    fn no_persons_leaves_every_face_unmatched() {
        let faces = vec![bb(10.0, 10.0, 30.0, 30.0)];
        assert_eq!(match_faces(&faces, &[]), vec![None]);
    }

    #[test]
    fn resize_nearest_preserves_corner_values() {
        let mask = Array2::from_shape_vec((2, 2), vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let resized = resize_nearest(&mask, 4, 4);
        assert_eq!(resized.dim(), (4, 4));
        assert_eq!(resized[[0, 0]], 1.0);
        assert_eq!(resized[[0, 3]], 0.0);
        assert_eq!(resized[[3, 0]], 0.0);
        assert_eq!(resized[[3, 3]], 1.0);
    }

    #[test]
    fn restrict_zeroes_outside_box() {
        let mask = Array2::from_elem((10, 10), 1.0);
        let restricted = restrict_to_box(&mask, &bb(2.0, 3.0, 5.0, 6.0));
        assert_eq!(restricted[[4, 3]], 1.0);
        assert_eq!(restricted[[0, 0]], 0.0);
        assert_eq!(restricted[[6, 5]], 0.0); // exclusive upper bound
        assert_eq!(restricted[[9, 9]], 0.0);
    }

    #[test]
    fn restrict_clamps_box_to_mask_extent() {
        let mask = Array2::from_elem((4, 4), 0.8);
        let restricted = restrict_to_box(&mask, &bb(-5.0, -5.0, 50.0, 50.0));
        assert_eq!(restricted, mask);
    }
}
