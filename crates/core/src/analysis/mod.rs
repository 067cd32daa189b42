use serde::{Deserialize, Serialize};

use crate::config::BandSplit;

/// Perceptual metrics extracted from one spectrum snapshot. Every field lies
/// in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFrame {
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
    pub average: f32,
    pub peak: f32,
    pub energy: f32,
    pub rms: f32,
    /// Magnitude-weighted mean bin index divided by the bin count.
    pub spectral_centroid: f32,
}

impl AnalysisFrame {
    pub fn is_silent(&self) -> bool {
        self.peak <= 0.0
    }
}

/// Reduces a magnitude spectrum to an [`AnalysisFrame`].
///
/// The analyzer keeps no state between calls apart from its band policy, so
/// the same spectrum always produces the same frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrequencyAnalyzer {
    bands: BandSplit,
}

impl FrequencyAnalyzer {
    pub fn new(bands: BandSplit) -> Self {
        Self { bands }
    }

    pub fn bands(&self) -> BandSplit {
        self.bands
    }

    /// Analyses `spectrum`, ordered from the lowest to the highest bin.
    /// Values outside [0, 1] are clamped and non-finite values count as zero.
    pub fn analyze(&self, spectrum: &[f32]) -> AnalysisFrame {
        let bins = spectrum.len();
        if bins == 0 {
            return AnalysisFrame::default();
        }

        let (bass_end, mid_end) = self.bands.cut_points(bins);

        let mut sum = 0.0f64;
        let mut sum_squares = 0.0f64;
        let mut weighted = 0.0f64;
        let mut peak = 0.0f32;
        let mut band_sums = [0.0f64; 3];

        for (index, raw) in spectrum.iter().enumerate() {
            let value = sanitize(*raw);
            let wide = f64::from(value);
            sum += wide;
            sum_squares += wide * wide;
            weighted += index as f64 * wide;
            peak = peak.max(value);

            let band = if index < bass_end {
                0
            } else if index < mid_end {
                1
            } else {
                2
            };
            band_sums[band] += wide;
        }

        let count = bins as f64;
        let rms = (sum_squares / count).sqrt() as f32;
        let spectral_centroid = if sum > 0.0 {
            (weighted / sum / count) as f32
        } else {
            0.0
        };

        AnalysisFrame {
            bass: band_mean(band_sums[0], bass_end),
            mid: band_mean(band_sums[1], mid_end - bass_end),
            treble: band_mean(band_sums[2], bins - mid_end),
            average: (sum / count) as f32,
            peak,
            energy: rms,
            rms,
            spectral_centroid: spectral_centroid.clamp(0.0, 1.0),
        }
    }
}

fn sanitize(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn band_mean(sum: f64, len: usize) -> f32 {
    if len == 0 {
        0.0
    } else {
        (sum / len as f64) as f32
    }
}
