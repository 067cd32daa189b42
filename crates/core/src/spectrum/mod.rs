use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{config::AnalysisConfig, Result};

/// Converts windows of time-domain samples into a smoothed, decibel-scaled
/// magnitude spectrum normalised to [0, 1].
///
/// Each call blends the new magnitudes with the previous snapshot using the
/// configured smoothing constant before mapping `[min_decibels, max_decibels]`
/// onto the unit range. All buffers are allocated in [`SpectrumAnalyser::new`].
pub struct SpectrumAnalyser {
    fft_size: usize,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
    plan: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    output: Vec<Complex32>,
    scratch: Vec<Complex32>,
    smoothed: Vec<f32>,
    normalized: Vec<f32>,
}

impl SpectrumAnalyser {
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        config.validate()?;
        let fft_size = config.fft_size;
        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let bins = fft_size / 2;

        Ok(Self {
            fft_size,
            smoothing: config.smoothing,
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels,
            window: (0..fft_size).map(|i| blackman_value(i, fft_size)).collect(),
            input: plan.make_input_vec(),
            output: plan.make_output_vec(),
            scratch: plan.make_scratch_vec(),
            smoothed: vec![0.0; bins],
            normalized: vec![0.0; bins],
            plan,
        })
    }

    /// Number of time-domain samples consumed per snapshot.
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.normalized.len()
    }

    /// Forgets the smoothing history, e.g. when a different track starts.
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
        self.normalized.fill(0.0);
    }

    /// Latest spectrum produced by [`SpectrumAnalyser::process`].
    pub fn spectrum(&self) -> &[f32] {
        &self.normalized
    }

    /// Analyses one window. Shorter input is zero padded, longer input is
    /// truncated to the most recent `fft_size` samples.
    pub fn process(&mut self, samples: &[f32]) -> Result<&[f32]> {
        let take = samples.len().min(self.fft_size);
        let recent = &samples[samples.len() - take..];
        let pad = self.fft_size - take;

        self.input[..pad].fill(0.0);
        for (index, sample) in recent.iter().enumerate() {
            let slot = pad + index;
            let value = if sample.is_finite() { *sample } else { 0.0 };
            self.input[slot] = value * self.window[slot];
        }

        self.plan
            .process_with_scratch(&mut self.input, &mut self.output, &mut self.scratch)?;

        let scale = 1.0 / self.fft_size as f32;
        let range = self.max_decibels - self.min_decibels;
        for (bin, (smoothed, normalized)) in self
            .smoothed
            .iter_mut()
            .zip(self.normalized.iter_mut())
            .enumerate()
        {
            let magnitude = self.output[bin].norm() * scale;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;
            *normalized = if *smoothed > 0.0 {
                let decibels = 20.0 * smoothed.log10();
                ((decibels - self.min_decibels) / range).clamp(0.0, 1.0)
            } else {
                0.0
            };
        }

        Ok(&self.normalized)
    }

    /// Feeds a silent window so the smoothed spectrum decays the same way it
    /// would for a muted signal.
    pub fn process_silence(&mut self) -> Result<&[f32]> {
        self.process(&[])
    }
}

impl fmt::Debug for SpectrumAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyser")
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .field("min_decibels", &self.min_decibels)
            .field("max_decibels", &self.max_decibels)
            .finish()
    }
}

fn blackman_value(index: usize, len: usize) -> f32 {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;
    let phase = 2.0 * PI * index as f32 / len as f32;
    a0 - a1 * phase.cos() + a2 * (2.0 * phase).cos()
}
