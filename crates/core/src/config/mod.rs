use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{CandleError, Result, Score, MAX_NOTE_DURATION_SEC};

/// Top-level configuration structure for the application.
///
/// Loaded once at startup. Every section falls back to its defaults so a JSON
/// file only needs to mention the values it overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub detector: DetectorConfig,
    pub sequencer: SequencerConfig,
    pub presentation: PresentationConfig,
    pub audio: AudioConfig,
}

impl AppConfig {
    pub fn live_defaults() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.detector.validate()?;
        self.sequencer.validate()?;
        self.presentation.validate()?;
        self.audio.validate()
    }
}

/// Breath detector thresholds. Immutable after construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// RMS level (on the normalised [-1, 1] scale) a frame must exceed.
    pub threshold_rms: f32,
    pub required_consecutive_frames: u32,
    pub frame_size: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold_rms: 0.08,
            required_consecutive_frames: 4,
            frame_size: 1024,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold_rms > 0.0 && self.threshold_rms <= 1.0) {
            return Err(config_error(format!(
                "detector threshold must be in (0, 1], got {}",
                self.threshold_rms
            )));
        }
        if self.required_consecutive_frames == 0 {
            return Err(config_error("detector needs at least one consecutive frame"));
        }
        if self.frame_size == 0 {
            return Err(config_error("detector frame size must be non-zero"));
        }
        Ok(())
    }
}

/// Melody playback parameters. Tempo is fixed for the lifetime of a sequencer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    pub score: Score,
    pub bpm: f32,
    pub min_note_duration_sec: f32,
    /// Master gain applied on top of each note's envelope.
    pub amplitude: f32,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            score: Score::happy_birthday(),
            bpm: 108.0,
            min_note_duration_sec: 0.18,
            amplitude: 0.06,
        }
    }
}

impl SequencerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(config_error(format!("tempo must be positive, got {}", self.bpm)));
        }
        if !(self.min_note_duration_sec > 0.0
            && self.min_note_duration_sec <= MAX_NOTE_DURATION_SEC)
        {
            return Err(config_error(format!(
                "minimum note duration must be in (0, {MAX_NOTE_DURATION_SEC}] seconds, got {}",
                self.min_note_duration_sec
            )));
        }
        if !(0.0..=1.0).contains(&self.amplitude) {
            return Err(config_error(format!(
                "amplitude must be in [0, 1], got {}",
                self.amplitude
            )));
        }
        self.score.validate()
    }

    /// Seconds per beat at the configured tempo.
    pub fn beat_duration_sec(&self) -> f32 {
        60.0 / self.bpm
    }
}

/// Slideshow pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentationConfig {
    pub slide_count: usize,
    pub per_slide_duration_ms: u64,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            slide_count: 10,
            per_slide_duration_ms: 2_000,
        }
    }
}

impl PresentationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.slide_count == 0 {
            return Err(config_error("slideshow needs at least one slide"));
        }
        if self.per_slide_duration_ms == 0 {
            return Err(config_error("per-slide duration must be at least 1 ms"));
        }
        Ok(())
    }
}

/// Configuration specific to the audio capture subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate assumed when no device reports one (simulation).
    pub sample_rate: u32,
    /// How long capture may go without delivering a frame before the show
    /// gives up on the microphone.
    pub frame_timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            frame_timeout_ms: 5_000,
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(config_error("sample rate must be non-zero"));
        }
        if self.frame_timeout_ms == 0 {
            return Err(config_error("frame timeout must be at least 1 ms"));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> CandleError {
    CandleError::Config(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_birthday_show() {
        let config = AppConfig::live_defaults();
        config.validate().expect("defaults must validate");

        assert_eq!(config.detector.threshold_rms, 0.08);
        assert_eq!(config.detector.required_consecutive_frames, 4);
        assert_eq!(config.detector.frame_size, 1024);
        assert_eq!(config.presentation.slide_count, 10);
        assert_eq!(config.presentation.per_slide_duration_ms, 2_000);
        assert_eq!(config.sequencer.score.len(), 25);
        assert_eq!(config.sequencer.bpm, 108.0);
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let config = AppConfig::from_json_str(
            r#"{ "presentation": { "slide_count": 3 }, "detector": { "threshold_rms": 0.2 } }"#,
        )
        .unwrap();

        assert_eq!(config.presentation.slide_count, 3);
        assert_eq!(config.presentation.per_slide_duration_ms, 2_000);
        assert_eq!(config.detector.threshold_rms, 0.2);
        assert_eq!(config.detector.frame_size, 1024);
    }

    #[test]
    fn rejects_invalid_values() {
        let err = AppConfig::from_json_str(r#"{ "sequencer": { "bpm": 0.0 } }"#).unwrap_err();
        assert!(matches!(err, CandleError::Config(_)));

        let err = AppConfig::from_json_str(r#"{ "sequencer": { "score": [] } }"#).unwrap_err();
        assert!(format!("{err}").contains("score"));

        let err =
            AppConfig::from_json_str(r#"{ "presentation": { "slide_count": 0 } }"#).unwrap_err();
        assert!(matches!(err, CandleError::Config(_)));

        let err = AppConfig::from_json_str(r#"{ "sequencer": { "min_note_duration_sec": 1e30 } }"#)
            .unwrap_err();
        assert!(matches!(err, CandleError::Config(_)));
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = AppConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, CandleError::Json(_)));
    }
}
