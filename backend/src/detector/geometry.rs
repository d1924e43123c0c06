/// Axis-aligned rectangle in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        self.x1 <= x && x <= self.x2 && self.y1 <= y && y <= self.y2
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        if x2 > x1 && y2 > y1 {
            Some(BoundingBox::new(x1, y1, x2, y2))
        } else {
            None
        }
    }

    /// Intersection-over-union, in [0, 1].
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let Some(inter) = self.intersection(other) else {
            return 0.0;
        };
        let union = self.area() + other.area() - inter.area();
        if union > 0.0 { inter.area() / union } else { 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = BoundingBox::new(10.0, 10.0, 30.0, 30.0);
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn iou_of_nested_box_is_area_ratio() {
        let inner = BoundingBox::new(10.0, 10.0, 30.0, 30.0);
        let outer = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        let expected = inner.area() / outer.area();
        assert!((inner.iou(&outer) - expected).abs() < 1e-6);
    }

    #[test]
    fn center_and_containment() {
        let b = BoundingBox::new(10.0, 10.0, 30.0, 30.0);
        let (cx, cy) = b.center();
        assert_eq!((cx, cy), (20.0, 20.0));
        assert!(b.contains_point(cx, cy));
        assert!(b.contains_point(10.0, 10.0));
        assert!(!b.contains_point(31.0, 20.0));
    }
}
