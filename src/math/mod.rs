use num_traits::{FromPrimitive, ToPrimitive, Zero};
use core::ops::{Add, Div, Mul, Sub};

pub mod range;

// numbers here are anything we can sum, scale and convert from a window length.
// integer types are the common case (uA, mA, Hz) so conversions must be checked
pub trait Number: Copy + Sub<Output = Self> + Add<Output = Self> +
    Div<Output = Self> + Mul<Output = Self> + Zero + FromPrimitive + ToPrimitive {}

impl<T> Number for T where T: Copy + Sub<Output = T> + Add<Output = T> + Div<Output = T> + Mul<Output = T> + Zero + FromPrimitive + ToPrimitive {}
