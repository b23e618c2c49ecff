//! Fixed-point mirror of particle positions.
//!
//! Workers cannot lock each other's particles, so every position change in
//! a step is an integer atomic add on this representation. One unit is
//! 1e-6 domain units, which caps coordinates at roughly ±2147.

use glam::{IVec2, Vec2};

/// Fixed-point units per domain unit.
pub const FIXED_SCALE: f64 = 1_000_000.0;

/// Largest coordinate magnitude the mirror can hold.
pub const FIXED_LIMIT: f32 = (i32::MAX as f64 / FIXED_SCALE) as f32;

/// Converts in f64 and rounds so the round trip stays within one unit.
#[inline]
pub fn to_fixed(value: f32) -> i32 {
    (value as f64 * FIXED_SCALE).round() as i32
}

#[inline]
pub fn from_fixed(value: i32) -> f32 {
    (value as f64 / FIXED_SCALE) as f32
}

#[inline]
pub fn vec_to_fixed(v: Vec2) -> IVec2 {
    IVec2::new(to_fixed(v.x), to_fixed(v.y))
}

#[inline]
pub fn vec_from_fixed(v: IVec2) -> Vec2 {
    Vec2::new(from_fixed(v.x), from_fixed(v.y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn round_trip_stays_within_one_micro_unit(v in -1999.999f32..1999.999f32) {
            let back = from_fixed(to_fixed(v));
            prop_assert!((back - v).abs() <= 1e-6, "{v} came back as {back}");
        }
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        assert_eq!(to_fixed(1.0e6), i32::MAX);
        assert_eq!(to_fixed(-1.0e6), i32::MIN);
        assert!(FIXED_LIMIT > 2147.0 && FIXED_LIMIT < 2148.0);
    }

    #[test]
    fn vectors_convert_per_axis() {
        let v = Vec2::new(1.5, -0.25);
        assert_eq!(vec_to_fixed(v), IVec2::new(1_500_000, -250_000));
        assert_eq!(vec_from_fixed(vec_to_fixed(v)), v);
    }
}
