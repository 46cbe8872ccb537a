//! Fixed-point math utilities for deterministic simulation.
//!
//! All game simulation uses fixed-point arithmetic to ensure
//! deterministic behavior across platforms. Floating-point
//! operations can produce different results on different CPUs.
//!
//! Positions come in two flavours: [`CPos`] addresses a map cell, and
//! [`WPos`] is a continuous position measured in cells. Rule data expresses
//! distances as [`WDist`], an integer count of 1/1024ths of a cell.

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Fixed-point number type for all simulation math.
///
/// Uses 32 bits for integer part and 32 bits for fractional part.
/// Range: approximately -2,147,483,648 to 2,147,483,647
/// Precision: approximately 0.00000000023
pub type Fixed = I32F32;

/// Number of [`WDist`] units in one cell.
pub const WDIST_PER_CELL: i32 = 1024;

/// Serde support for fixed-point numbers.
///
/// Serializes fixed-point numbers as their raw bit representation (i64)
/// to preserve exact precision across serialization boundaries.
pub mod fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as its raw bit representation.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_bits().serialize(serializer)
    }

    /// Deserialize a fixed-point number from its raw bit representation.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = i64::deserialize(deserializer)?;
        Ok(Fixed::from_bits(bits))
    }
}

/// A map cell coordinate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct CPos {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl CPos {
    /// Create a new cell coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The continuous position at the middle of this cell.
    #[must_use]
    pub fn center(self) -> WPos {
        let half = Fixed::from_bits(1 << 31);
        WPos::new(
            Fixed::from_num(self.x) + half,
            Fixed::from_num(self.y) + half,
        )
    }
}

impl std::fmt::Display for CPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// A distance in 1/1024ths of a cell.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct WDist(pub i32);

impl WDist {
    /// Zero distance.
    pub const ZERO: Self = Self(0);

    /// Build a distance from whole cells.
    #[must_use]
    pub const fn from_cells(cells: i32) -> Self {
        Self(cells * WDIST_PER_CELL)
    }

    /// Convert to fixed-point cells. Exact, since the divisor is a power of two.
    #[must_use]
    pub fn to_cells(self) -> Fixed {
        Fixed::from_num(self.0) / Fixed::from_num(WDIST_PER_CELL)
    }
}

/// Continuous position in cell units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct WPos {
    /// X coordinate.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Y coordinate.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
}

impl WPos {
    /// Create a new fixed-point position.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
    };

    /// The cell containing this position.
    #[must_use]
    pub fn to_cell(self) -> CPos {
        CPos::new(self.x.floor().to_num(), self.y.floor().to_num())
    }

    /// Calculate squared distance (avoids sqrt for comparisons).
    #[must_use]
    pub fn distance_squared(self, other: Self) -> Fixed {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.saturating_mul(dx).saturating_add(dy.saturating_mul(dy))
    }

    /// Whether `other` lies within `range` of this position.
    #[must_use]
    pub fn within(self, other: Self, range: WDist) -> bool {
        let r = range.to_cells();
        self.distance_squared(other) <= r.saturating_mul(r)
    }

    /// Dot product of two vectors.
    #[must_use]
    pub fn dot(self, other: Self) -> Fixed {
        self.x * other.x + self.y * other.y
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(self) -> Fixed {
        fixed_sqrt(self.dot(self))
    }

    /// Normalize vector using fixed-point math.
    #[must_use]
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len == Fixed::ZERO {
            return Self::ZERO;
        }

        Self::new(self.x / len, self.y / len)
    }

    /// Scale both components.
    #[must_use]
    pub fn scale(self, factor: Fixed) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }
}

/// Computes the square root of a fixed-point number using binary search.
fn fixed_sqrt(value: Fixed) -> Fixed {
    if value <= Fixed::ZERO {
        return Fixed::ZERO;
    }

    let mut low = Fixed::ZERO;
    let mut high = if value > Fixed::from_num(1) {
        value
    } else {
        Fixed::from_num(1)
    };

    for _ in 0..64 {
        let mid = (low + high) / Fixed::from_num(2);
        let mid_sq = mid.saturating_mul(mid);

        if mid_sq <= value {
            low = mid;
        } else {
            high = mid;
        }
    }

    low
}

impl std::ops::Add for WPos {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl std::ops::Sub for WPos {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

/// Quarter-wave sine table, 64 steps per quadrant, scaled by 1024.
#[rustfmt::skip]
const SIN_TABLE: [i32; 65] = [
    0, 25, 50, 75, 100, 125, 150, 175,
    200, 224, 249, 273, 297, 321, 345, 369,
    392, 415, 438, 460, 483, 505, 526, 548,
    569, 590, 610, 630, 650, 669, 688, 706,
    724, 742, 759, 775, 792, 807, 822, 837,
    851, 865, 878, 891, 903, 915, 926, 936,
    946, 955, 964, 972, 980, 987, 993, 999,
    1004, 1009, 1013, 1016, 1019, 1021, 1023, 1024,
    1024,
];

/// A facing in 256 steps per full turn.
///
/// Trigonometry goes through an integer lookup table so that facings feeding
/// the sync hash never touch floating point.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct WAngle(pub u8);

impl WAngle {
    /// Sine scaled by 1024.
    #[must_use]
    pub fn sin(self) -> i32 {
        let a = self.0 as usize;
        match a / 64 {
            0 => SIN_TABLE[a],
            1 => SIN_TABLE[128 - a],
            2 => -SIN_TABLE[a - 128],
            _ => -SIN_TABLE[256 - a],
        }
    }

    /// Cosine scaled by 1024.
    #[must_use]
    pub fn cos(self) -> i32 {
        Self(self.0.wrapping_add(64)).sin()
    }

    /// The facing closest to the direction of `(dx, dy)`.
    ///
    /// Returns `None` for a zero vector.
    #[must_use]
    pub fn from_vector(dx: Fixed, dy: Fixed) -> Option<Self> {
        if dx == Fixed::ZERO && dy == Fixed::ZERO {
            return None;
        }

        // Reduce to whole 1/1024 cell units so the dot product stays in i64.
        let dx = (dx * Fixed::from_num(WDIST_PER_CELL)).to_num::<i64>();
        let dy = (dy * Fixed::from_num(WDIST_PER_CELL)).to_num::<i64>();

        // Neighbouring table entries can share a value, so ties on the dot
        // product fall back to the smallest perpendicular component.
        let mut best = Self(0);
        let mut best_key = (i64::MIN, i64::MIN);
        for step in 0..=255u8 {
            let angle = Self(step);
            let (sin, cos) = (i64::from(angle.sin()), i64::from(angle.cos()));
            let dot = dx * cos + dy * sin;
            let cross = (dx * sin - dy * cos).abs();
            let key = (dot, -cross);
            if key > best_key {
                best_key = key;
                best = angle;
            }
        }

        Some(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wpos_distance_squared() {
        let a = WPos::new(Fixed::from_num(3), Fixed::from_num(0));
        let b = WPos::new(Fixed::from_num(0), Fixed::from_num(4));
        let dist_sq = a.distance_squared(b);
        // 3² + 4² = 25
        assert_eq!(dist_sq, Fixed::from_num(25));
    }

    #[test]
    fn test_fixed_determinism() {
        // Same operations must produce identical results
        let a = Fixed::from_num(1) / Fixed::from_num(3);
        let b = Fixed::from_num(1) / Fixed::from_num(3);
        assert_eq!(a, b);

        let result1 = a * Fixed::from_num(7);
        let result2 = b * Fixed::from_num(7);
        assert_eq!(result1, result2);
    }

    #[test]
    fn test_cell_center_round_trip() {
        let cell = CPos::new(7, -3);
        let center = cell.center();
        assert_eq!(center.x, Fixed::from_num(7) + Fixed::from_num(1) / Fixed::from_num(2));
        assert_eq!(center.to_cell(), cell);
    }

    #[test]
    fn test_wdist_to_cells() {
        assert_eq!(WDist::from_cells(3).to_cells(), Fixed::from_num(3));
        assert_eq!(WDist(512).to_cells(), Fixed::from_num(1) / Fixed::from_num(2));
    }

    #[test]
    fn test_within_range() {
        let a = CPos::new(0, 0).center();
        let b = CPos::new(3, 0).center();
        assert!(a.within(b, WDist::from_cells(3)));
        assert!(!a.within(b, WDist(3 * WDIST_PER_CELL - 1)));
    }

    #[test]
    fn test_vec_normalize() {
        let v = WPos::new(Fixed::from_num(3), Fixed::from_num(4));
        let norm = v.normalize();

        // Length squared should be very close to 1
        let len_sq = norm.dot(norm);
        let one = Fixed::from_num(1);
        let epsilon = one / Fixed::from_num(10000);
        assert!(
            (len_sq - one).abs() < epsilon,
            "normalized vector length² should be ~1, got {len_sq:?}"
        );
    }

    #[test]
    fn test_angle_table_quadrants() {
        assert_eq!(WAngle(0).sin(), 0);
        assert_eq!(WAngle(64).sin(), 1024);
        assert_eq!(WAngle(128).sin(), 0);
        assert_eq!(WAngle(192).sin(), -1024);
        assert_eq!(WAngle(0).cos(), 1024);
        assert_eq!(WAngle(128).cos(), -1024);
        // Symmetry across the first quadrant boundary
        assert_eq!(WAngle(32).sin(), WAngle(96).sin());
    }

    #[test]
    fn test_angle_from_vector() {
        let one = Fixed::from_num(1);
        assert_eq!(WAngle::from_vector(one, Fixed::ZERO), Some(WAngle(0)));
        assert_eq!(WAngle::from_vector(Fixed::ZERO, one), Some(WAngle(64)));
        assert_eq!(WAngle::from_vector(-one, Fixed::ZERO), Some(WAngle(128)));
        assert_eq!(WAngle::from_vector(Fixed::ZERO, Fixed::ZERO), None);
    }
}
