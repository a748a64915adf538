use std::fmt;

// --------------------------------------------------------------------------
// Point3D

/// Immutable double-precision sample position.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Point3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

// --------------------------------------------------------------------------
// Extent3D

/// Axis-aligned bounding box. `min <= max` holds on every axis.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Extent3D {
    min_x: f64,
    min_y: f64,
    min_z: f64,
    max_x: f64,
    max_y: f64,
    max_z: f64,
}

impl Extent3D {
    pub fn new(min_x: f64, min_y: f64, min_z: f64, max_x: f64, max_y: f64, max_z: f64) -> Self {
        assert!(
            min_x <= max_x && min_y <= max_y && min_z <= max_z,
            "extent min must not exceed max"
        );
        Self {
            min_x,
            min_y,
            min_z,
            max_x,
            max_y,
            max_z,
        }
    }

    /// Smallest extent containing every point of a non-empty iterator.
    /// Returns `None` for an empty iterator.
    pub fn from_points<I: IntoIterator<Item = Point3D>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut extent = Self::new(first.x, first.y, first.z, first.x, first.y, first.z);
        for p in iter {
            extent.expand(&p);
        }
        Some(extent)
    }

    /// Grows the extent in place to contain `p`.
    pub fn expand(&mut self, p: &Point3D) {
        self.min_x = self.min_x.min(p.x);
        self.min_y = self.min_y.min(p.y);
        self.min_z = self.min_z.min(p.z);
        self.max_x = self.max_x.max(p.x);
        self.max_y = self.max_y.max(p.y);
        self.max_z = self.max_z.max(p.z);
    }

    pub fn min_x(&self) -> f64 {
        self.min_x
    }

    pub fn min_y(&self) -> f64 {
        self.min_y
    }

    pub fn min_z(&self) -> f64 {
        self.min_z
    }

    pub fn max_x(&self) -> f64 {
        self.max_x
    }

    pub fn max_y(&self) -> f64 {
        self.max_y
    }

    pub fn max_z(&self) -> f64 {
        self.max_z
    }

    pub fn range_x(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn range_y(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn range_z(&self) -> f64 {
        self.max_z - self.min_z
    }

    pub fn midpoint_x(&self) -> f64 {
        (self.min_x + self.max_x) / 2.0
    }

    pub fn midpoint_y(&self) -> f64 {
        (self.min_y + self.max_y) / 2.0
    }

    pub fn midpoint_z(&self) -> f64 {
        (self.min_z + self.max_z) / 2.0
    }

    /// XY footprint area.
    pub fn area(&self) -> f64 {
        self.range_x() * self.range_y()
    }

    pub fn contains(&self, p: &Point3D) -> bool {
        p.x >= self.min_x
            && p.x <= self.max_x
            && p.y >= self.min_y
            && p.y <= self.max_y
            && p.z >= self.min_z
            && p.z <= self.max_z
    }
}

impl fmt::Display for Extent3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.2}, {:.2}, {:.2}] - [{:.2}, {:.2}, {:.2}]",
            self.min_x, self.min_y, self.min_z, self.max_x, self.max_y, self.max_z
        )
    }
}
