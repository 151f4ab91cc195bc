use super::Number;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Range<T>
where
    T: Number + PartialOrd
{
    min: T,
    max: T,
}

impl<T> Range<T>
where
    T: Number + PartialOrd
{
    pub const fn new(min: T, max: T) -> Self {
        Range { min, max }
    }

    /// Maps `val` from this range onto `new_range`. Scales before dividing so
    /// integer ranges keep their precision. A degenerate input range maps
    /// everything to the top of the output range.
    pub fn map_value_to_range(&self, val: T, new_range: &Range<T>) -> T {
        let span = self.max - self.min;
        if span.to_i64() == Some(0) {
            return new_range.max;
        }

        (val - self.min) * (new_range.max - new_range.min) / span + new_range.min
    }
}
