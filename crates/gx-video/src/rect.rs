//! Rectangle math shared by the EFB, target and copy paths.

/// An axis-aligned rectangle with exclusive right/bottom edges.
///
/// Guest-space rectangles (`EfbRect`) use native EFB coordinates; target
/// rectangles (`TargetRect`) are in scaled host coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rectangle {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

pub type EfbRect = Rectangle;
pub type TargetRect = Rectangle;

impl Rectangle {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn from_extent(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self {
            left,
            top,
            right: left + width,
            bottom: top + height,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    /// Intersection, or an empty rectangle when the inputs are disjoint.
    pub fn intersect(&self, other: &Rectangle) -> Rectangle {
        let r = Rectangle {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        };
        if r.is_empty() {
            Rectangle::default()
        } else {
            r
        }
    }

    pub fn clamp_to(&self, bounds: &Rectangle) -> Rectangle {
        Rectangle {
            left: self.left.clamp(bounds.left, bounds.right),
            top: self.top.clamp(bounds.top, bounds.bottom),
            right: self.right.clamp(bounds.left, bounds.right),
            bottom: self.bottom.clamp(bounds.top, bounds.bottom),
        }
    }

    /// Scale all edges by an integer factor (EFB → target coordinates).
    pub fn scaled(&self, factor: u32) -> Rectangle {
        let f = factor as i32;
        Rectangle {
            left: self.left * f,
            top: self.top * f,
            right: self.right * f,
            bottom: self.bottom * f,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Rectangle;

    #[test]
    fn extent_and_size() {
        let r = Rectangle::from_extent(10, 20, 30, 40);
        assert_eq!(r.right, 40);
        assert_eq!(r.bottom, 60);
        assert_eq!(r.width(), 30);
        assert_eq!(r.height(), 40);
        assert!(!r.is_empty());
    }

    #[test]
    fn disjoint_intersection_is_empty() {
        let a = Rectangle::from_extent(0, 0, 10, 10);
        let b = Rectangle::from_extent(20, 20, 5, 5);
        assert!(a.intersect(&b).is_empty());
    }

    #[test]
    fn overlapping_intersection() {
        let a = Rectangle::from_extent(0, 0, 10, 10);
        let b = Rectangle::from_extent(5, 5, 10, 10);
        assert_eq!(a.intersect(&b), Rectangle::new(5, 5, 10, 10));
    }

    #[test]
    fn scaled_multiplies_all_edges() {
        let r = Rectangle::new(1, 2, 3, 4).scaled(3);
        assert_eq!(r, Rectangle::new(3, 6, 9, 12));
    }
}
