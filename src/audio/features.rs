/// Transform length every analysis window is zero-padded to.
pub const FFT_SIZE: usize = 2048;

/// Bins kept from each transform: the first half, minus the Nyquist bin.
pub const SPECTRUM_BINS: usize = FFT_SIZE / 2 - 1;

/// Log-scaled, temporally smoothed magnitudes. One per active render or
/// preview session, mutated by each analysis step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Spectrum {
    bins: Vec<f32>,
}

impl Spectrum {
    pub fn from_bins(bins: Vec<f32>) -> Self {
        Self { bins }
    }

    pub fn bins(&self) -> &[f32] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Bar height at `index`, or 0 past the end.
    pub fn value(&self, index: usize) -> f32 {
        self.bins.get(index).copied().unwrap_or(0.0)
    }
}

/// Fixed parabola used by previews so bars show representative heights
/// without decoding audio: tall at both ends, flat in the middle.
pub fn preview_spectrum() -> Spectrum {
    Spectrum::from_bins(
        (0..255)
            .map(|x: i32| 0.008 * ((x - 128) * (x - 128)) as f32)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_spectrum_shape() {
        let s = preview_spectrum();
        assert_eq!(s.len(), 255);
        assert_eq!(s.value(128), 0.0);
        assert!((s.value(0) - 0.008 * 16384.0).abs() < 1e-3);
        assert!(s.value(4) > s.value(64));
        assert_eq!(s.value(10_000), 0.0);
    }
}
