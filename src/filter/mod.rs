use crate::math::Number;

pub trait Filter<T>: Default {
    fn add_sample(&mut self, sample: T);

    fn update(&mut self);

    fn filtered_value(&self) -> Option<T>;

    fn reset(&mut self);
}

/// Boxcar average over the last `WINDOW_SIZE` samples.
///
/// With `SOFT_INIT` the first sample seeds the whole window so a value is
/// available immediately, otherwise the filter reports `None` until the
/// window has been filled once.
pub struct WindowAveragingFilter<const WINDOW_SIZE: usize, const SOFT_INIT: bool, T: Number> {
    window: [T; WINDOW_SIZE],
    update_ind: usize,
    sample_count: usize,
    filtered_value: T,
    initialized: bool,
}

impl<const WINDOW_SIZE: usize, const SOFT_INIT: bool, T: Number> WindowAveragingFilter<WINDOW_SIZE, SOFT_INIT, T> {
    pub fn new() -> Self {
        Self {
            window: [T::zero(); WINDOW_SIZE],
            update_ind: 0,
            sample_count: 0,
            filtered_value: T::zero(),
            initialized: false
        }
    }

    /// Samples seen since the last reset, saturating at the window size.
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }
}

impl<const WINDOW_SIZE: usize, const SOFT_INIT: bool, T: Number> Default for WindowAveragingFilter<WINDOW_SIZE, SOFT_INIT, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const WINDOW_SIZE: usize, const SOFT_INIT: bool, T: Number> Filter<T> for WindowAveragingFilter<WINDOW_SIZE, SOFT_INIT, T> {
    fn add_sample(&mut self, sample: T) {
        // soft init, seed every slot with the first sample
        if SOFT_INIT && !self.initialized {
            for v in self.window.iter_mut() {
                *v = sample;
            }

            self.update_ind = 0;
            self.initialized = true;
        }

        self.window[self.update_ind] = sample;
        if self.sample_count < WINDOW_SIZE {
            self.sample_count += 1;
        }

        self.update_ind += 1;
        if self.update_ind >= WINDOW_SIZE {
            self.update_ind = 0;

            if !self.initialized {
                self.initialized = true;
            }
        }
    }

    fn update(&mut self) {
        let mut sum = T::zero();
        for val in self.window {
            sum = sum + val;
        }

        self.filtered_value = if let Some(divisor) = T::from_usize(WINDOW_SIZE) {
            sum / divisor
        } else {
            warn!("type conversion failed in WindowAveragingFilter");
            T::zero()
        }
    }

    fn filtered_value(&self) -> Option<T> {
        if !self.initialized {
            return None;
        }

        Some(self.filtered_value)
    }

    fn reset(&mut self) {
        for v in self.window.iter_mut() {
            *v = T::zero();
        }

        self.update_ind = 0;
        self.sample_count = 0;
        self.filtered_value = T::zero();
        self.initialized = false;
    }
}
