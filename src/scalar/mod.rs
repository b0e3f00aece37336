use std::fmt::Display;

/// The floating point type used for states, step sizes and sensitivities.
///
/// Both the nalgebra and faer real-field traits are required so that the same system can be
/// paired with either of the provided linear solvers.
pub trait Scalar:
    nalgebra::RealField
    + faer::traits::RealField
    + num_traits::FromPrimitive
    + num_traits::ToPrimitive
    + Display
    + Copy
    + PartialOrd
    + 'static
{
    const EPSILON: Self;
    const INFINITY: Self;
    const NAN: Self;
    fn is_nan(self) -> bool;
}

pub type IndexType = usize;

impl Scalar for f64 {
    const EPSILON: Self = f64::EPSILON;
    const INFINITY: Self = f64::INFINITY;
    const NAN: Self = f64::NAN;
    fn is_nan(self) -> bool {
        self.is_nan()
    }
}

impl Scalar for f32 {
    const EPSILON: Self = f32::EPSILON;
    const INFINITY: Self = f32::INFINITY;
    const NAN: Self = f32::NAN;
    fn is_nan(self) -> bool {
        self.is_nan()
    }
}

/// Convert an `f64` constant into the scalar type.
#[inline]
pub(crate) fn constant<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap()
}

/// Lossy conversion of a scalar back to `f64`, used for error reporting and logging.
#[inline]
pub(crate) fn to_f64<T: Scalar>(value: T) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

/// Absolute value of a scalar.
#[inline]
pub(crate) fn abs<T: Scalar>(value: T) -> T {
    if value < T::zero() {
        -value
    } else {
        value
    }
}

/// True if the scalar is neither infinite nor NaN.
#[inline]
pub(crate) fn is_finite<T: Scalar>(value: T) -> bool {
    !value.is_nan() && abs(value) < T::INFINITY
}
