use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub analysis: AnalysisConfig,
}

impl AppConfig {
    /// Parses a configuration document. Missing sections fall back to their
    /// defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.analysis.validate()
    }
}

/// Settings for the playback side of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Additional load attempts after the first failure.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Target cadence of the analysis loop.
    pub tick_rate_hz: u32,
    /// Volume applied to the first resource before any command arrives.
    pub default_volume: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_backoff_ms: 500,
            tick_rate_hz: 60,
            default_volume: 0.8,
        }
    }
}

impl EngineConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }

    fn validate(&self) -> Result<()> {
        if self.tick_rate_hz == 0 {
            return Err(EngineError::invalid("tick_rate_hz must be positive"));
        }
        if !(0.0..=1.0).contains(&self.default_volume) {
            return Err(EngineError::invalid("default_volume must lie in [0, 1]"));
        }
        Ok(())
    }
}

/// Settings for the spectrum analyser and the band partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Window length fed to the FFT. The spectrum carries half as many bins.
    pub fft_size: usize,
    /// Weight of the previous spectrum when smoothing consecutive snapshots.
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    pub bands: BandSplit,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            smoothing: 0.75,
            min_decibels: -100.0,
            max_decibels: -30.0,
            bands: BandSplit::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.fft_size < 32 || self.fft_size > 32_768 || self.fft_size % 2 != 0 {
            return Err(EngineError::invalid(format!(
                "fft_size must be an even number in 32..=32768, got {}",
                self.fft_size
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(EngineError::invalid("smoothing must lie in [0, 1)"));
        }
        if !(self.min_decibels < self.max_decibels) {
            return Err(EngineError::invalid(
                "min_decibels must be lower than max_decibels",
            ));
        }
        self.bands.validate()
    }
}

/// Proportional cut points between the bass, mid and treble ranges.
///
/// These are tuning constants picked by ear for a 512-bin spectrum, not values
/// derived from a perceptual model. They are expressed as fractions of the bin
/// count so they scale with the resolution, but a different resolution or
/// sample rate may call for new values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandSplit {
    /// End of the bass range (exclusive) as a fraction of the bin count.
    pub bass_end: f32,
    /// End of the mid range (exclusive) as a fraction of the bin count.
    pub mid_end: f32,
}

impl Default for BandSplit {
    fn default() -> Self {
        Self {
            bass_end: 0.08,
            mid_end: 0.49,
        }
    }
}

impl BandSplit {
    pub fn validate(&self) -> Result<()> {
        let ordered = 0.0 < self.bass_end && self.bass_end < self.mid_end && self.mid_end < 1.0;
        if ordered {
            Ok(())
        } else {
            Err(EngineError::invalid(
                "band split must satisfy 0 < bass_end < mid_end < 1",
            ))
        }
    }

    /// Resolves the cut points for a spectrum of `bins` values. Every band
    /// gets at least one bin once there are three or more.
    pub fn cut_points(&self, bins: usize) -> (usize, usize) {
        if bins < 3 {
            let bass = bins.min(1);
            return (bass, bins.min(2));
        }
        let bass = ((bins as f32 * self.bass_end).round() as usize).clamp(1, bins - 2);
        let mid = ((bins as f32 * self.mid_end).round() as usize).clamp(bass + 1, bins - 1);
        (bass, mid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.max_retries, 2);
        assert_eq!(config.engine.retry_backoff(), Duration::from_millis(500));
        assert_eq!(config.analysis.bin_count(), 512);
    }

    #[test]
    fn partial_documents_fill_in_defaults() {
        let config =
            AppConfig::from_json_str(r#"{ "engine": { "max_retries": 4 } }"#).unwrap();
        assert_eq!(config.engine.max_retries, 4);
        assert_eq!(config.engine.tick_rate_hz, 60);
        assert_eq!(config.analysis, AnalysisConfig::default());
    }

    #[test]
    fn rejects_odd_fft_sizes() {
        let err = AppConfig::from_json_str(r#"{ "analysis": { "fft_size": 1001 } }"#)
            .unwrap_err();
        assert!(format!("{err}").contains("fft_size"));
    }

    #[test]
    fn rejects_inverted_band_split() {
        let split = BandSplit {
            bass_end: 0.6,
            mid_end: 0.4,
        };
        assert!(split.validate().is_err());
    }

    #[test]
    fn cut_points_scale_with_resolution() {
        let split = BandSplit::default();
        assert_eq!(split.cut_points(512), (41, 251));
        assert_eq!(split.cut_points(100), (8, 49));
        assert_eq!(split.cut_points(3), (1, 2));
        assert_eq!(split.cut_points(1), (1, 1));
        assert_eq!(split.cut_points(0), (0, 0));
    }
}
