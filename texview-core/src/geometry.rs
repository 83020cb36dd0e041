use serde::{Deserialize, Serialize};

/// PostScript points per inch; page space is measured in points.
pub const POINTS_PER_INCH: f64 = 72.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointF {
    pub x: f64,
    pub y: f64,
}

impl PointF {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn scaled(self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SizeF {
    pub width: f64,
    pub height: f64,
}

impl SizeF {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn scaled(self, factor: f64) -> Self {
        Self::new(self.width * factor, self.height * factor)
    }

    pub fn transposed(self) -> Self {
        Self::new(self.height, self.width)
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RectF {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl RectF {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Builds the normalized rectangle spanned by two opposite corners.
    pub fn from_corners(a: PointF, b: PointF) -> Self {
        let left = a.x.min(b.x);
        let top = a.y.min(b.y);
        Self::new(left, top, (a.x - b.x).abs(), (a.y - b.y).abs())
    }

    pub fn origin(&self) -> PointF {
        PointF::new(self.x, self.y)
    }

    pub fn size(&self) -> SizeF {
        SizeF::new(self.width, self.height)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> PointF {
        PointF::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(
            self.x * factor,
            self.y * factor,
            self.width * factor,
            self.height * factor,
        )
    }

    pub fn contains(&self, point: PointF) -> bool {
        point.x >= self.x && point.x <= self.right() && point.y >= self.y && point.y <= self.bottom()
    }

    /// True when `other` lies entirely inside `self`, with a small tolerance for rounding.
    pub fn contains_rect(&self, other: &RectF) -> bool {
        const EPS: f64 = 1e-9;
        other.x >= self.x - EPS
            && other.y >= self.y - EPS
            && other.right() <= self.right() + EPS
            && other.bottom() <= self.bottom() + EPS
    }

    pub fn distance_to(&self, point: PointF) -> f64 {
        let dx = (self.x - point.x).max(0.0).max(point.x - self.right());
        let dy = (self.y - point.y).max(0.0).max(point.y - self.bottom());
        (dx * dx + dy * dy).sqrt()
    }
}

/// Clockwise page rotation as reported by the rendering engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Clockwise180,
    Clockwise270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => Rotation::Clockwise90,
            180 => Rotation::Clockwise180,
            270 => Rotation::Clockwise270,
            _ => Rotation::None,
        }
    }

    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Clockwise90 | Rotation::Clockwise270)
    }
}

/// Native page size in points plus the rotation applied on display.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PageGeometry {
    pub size: SizeF,
    pub rotation: Rotation,
}

impl PageGeometry {
    pub fn new(size: SizeF, rotation: Rotation) -> Self {
        Self { size, rotation }
    }

    /// Size of the page as it appears on screen, in points.
    pub fn displayed_size(&self) -> SizeF {
        if self.rotation.swaps_axes() {
            self.size.transposed()
        } else {
            self.size
        }
    }

    /// Maps a point in displayed page space (points, top-left origin) to native page space.
    pub fn to_native(&self, displayed: PointF) -> PointF {
        let SizeF { width, height } = self.size;
        match self.rotation {
            Rotation::None => displayed,
            Rotation::Clockwise90 => PointF::new(displayed.y, height - displayed.x),
            Rotation::Clockwise180 => PointF::new(width - displayed.x, height - displayed.y),
            Rotation::Clockwise270 => PointF::new(width - displayed.y, displayed.x),
        }
    }

    /// Maps a point in native page space to displayed page space.
    pub fn to_displayed(&self, native: PointF) -> PointF {
        let SizeF { width, height } = self.size;
        match self.rotation {
            Rotation::None => native,
            Rotation::Clockwise90 => PointF::new(height - native.y, native.x),
            Rotation::Clockwise180 => PointF::new(width - native.x, height - native.y),
            Rotation::Clockwise270 => PointF::new(native.y, width - native.x),
        }
    }

    pub fn rect_to_displayed(&self, native: &RectF) -> RectF {
        let a = self.to_displayed(native.origin());
        let b = self.to_displayed(PointF::new(native.right(), native.bottom()));
        RectF::from_corners(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter(rotation: Rotation) -> PageGeometry {
        PageGeometry::new(SizeF::new(612.0, 792.0), rotation)
    }

    #[test]
    fn rotation_round_trips_points() {
        let point = PointF::new(100.0, 250.0);
        for rotation in [
            Rotation::None,
            Rotation::Clockwise90,
            Rotation::Clockwise180,
            Rotation::Clockwise270,
        ] {
            let geometry = letter(rotation);
            let back = geometry.to_native(geometry.to_displayed(point));
            assert!((back.x - point.x).abs() < 1e-9, "{rotation:?}");
            assert!((back.y - point.y).abs() < 1e-9, "{rotation:?}");
        }
    }

    #[test]
    fn quarter_turn_swaps_displayed_size() {
        assert_eq!(
            letter(Rotation::Clockwise90).displayed_size(),
            SizeF::new(792.0, 612.0)
        );
        assert_eq!(
            letter(Rotation::Clockwise180).displayed_size(),
            SizeF::new(612.0, 792.0)
        );
    }

    #[test]
    fn rotated_rect_stays_inside_displayed_page() {
        let geometry = letter(Rotation::Clockwise270);
        let native = RectF::new(10.0, 20.0, 30.0, 40.0);
        let shown = geometry.rect_to_displayed(&native);
        let size = geometry.displayed_size();
        let page = RectF::new(0.0, 0.0, size.width, size.height);
        assert!(page.contains_rect(&shown));
        assert_eq!(shown.width, 40.0);
        assert_eq!(shown.height, 30.0);
    }

    #[test]
    fn degrees_normalize() {
        assert_eq!(Rotation::from_degrees(-90), Rotation::Clockwise270);
        assert_eq!(Rotation::from_degrees(450), Rotation::Clockwise90);
        assert_eq!(Rotation::from_degrees(45), Rotation::None);
    }

    #[test]
    fn distance_is_zero_inside() {
        let rect = RectF::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(rect.distance_to(PointF::new(5.0, 5.0)), 0.0);
        assert_eq!(rect.distance_to(PointF::new(13.0, 14.0)), 5.0);
    }
}
