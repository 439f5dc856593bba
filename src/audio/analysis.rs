use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use super::features::{Spectrum, FFT_SIZE, SPECTRUM_BINS};

/// Turns windows of PCM into a smoothed log-magnitude spectrum.
///
/// Holds the previous spectrum between calls; each call allocates its own
/// scratch buffers so no state leaks between windows except the smoothing.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window_size: usize,
    smooth_down: f32,
    smooth_up: f32,
    state: Option<Spectrum>,
}

impl SpectrumAnalyzer {
    pub fn new(window_size: usize, smooth_down: f32, smooth_up: f32) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        if window_size > FFT_SIZE {
            log::warn!(
                "Analysis window {} exceeds transform length {}, truncating",
                window_size,
                FFT_SIZE
            );
        }
        Self {
            fft,
            window_size: window_size.min(FFT_SIZE),
            smooth_down,
            smooth_up,
            state: None,
        }
    }

    /// Analyze the window starting at `offset` and fold it into the running state.
    pub fn analyze(&mut self, samples: &[i16], offset: usize) -> &Spectrum {
        let raw = log_magnitudes(self.fft.as_ref(), samples, offset, self.window_size);
        let next = match self.state.take() {
            Some(prev) => smooth(&raw, prev.bins(), self.smooth_down, self.smooth_up),
            None => raw,
        };
        self.state.insert(Spectrum::from_bins(next))
    }

    pub fn spectrum(&self) -> Option<&Spectrum> {
        self.state.as_ref()
    }
}

/// Stateless form of one analysis step.
pub fn analyze(
    samples: &[i16],
    offset: usize,
    window_size: usize,
    smooth_down: f32,
    smooth_up: f32,
    previous: Option<&Spectrum>,
) -> Spectrum {
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(FFT_SIZE);
    let raw = log_magnitudes(fft.as_ref(), samples, offset, window_size.min(FFT_SIZE));
    match previous {
        Some(prev) => Spectrum::from_bins(smooth(&raw, prev.bins(), smooth_down, smooth_up)),
        None => Spectrum::from_bins(raw),
    }
}

/// Hann-windowed, zero-padded FFT of one window, as `20*log10(|X|)` with
/// non-finite values clamped to 0. Always `SPECTRUM_BINS` long.
fn log_magnitudes(fft: &dyn Fft<f32>, samples: &[i16], offset: usize, window_size: usize) -> Vec<f32> {
    let start = offset.min(samples.len());
    let end = (start + window_size).min(samples.len());
    let window = &samples[start..end];
    let hann = hann_window(window.len());

    let mut buffer = vec![Complex::new(0.0f32, 0.0); FFT_SIZE];
    for (slot, (&s, &w)) in buffer.iter_mut().zip(window.iter().zip(hann.iter())) {
        *slot = Complex::new(s as f32 * w, 0.0);
    }
    fft.process(&mut buffer);

    buffer[..SPECTRUM_BINS]
        .iter()
        .map(|c| {
            let db = 20.0 * c.norm().log10();
            if db.is_finite() {
                db
            } else {
                0.0
            }
        })
        .collect()
}

/// Per-bin asymmetric blend: `smooth_down` where the signal falls,
/// `smooth_up` where it holds or rises.
pub fn smooth(new: &[f32], previous: &[f32], smooth_down: f32, smooth_up: f32) -> Vec<f32> {
    new.iter()
        .zip(previous.iter())
        .map(|(&n, &p)| {
            let rate = if n < p { smooth_down } else { smooth_up };
            n * rate + p * (1.0 - rate)
        })
        .collect()
}

fn hann_window(size: usize) -> Vec<f32> {
    if size <= 1 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}
