use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{CandleError, DetectorConfig, Result};

/// Borrowed view over one block of captured samples.
///
/// Each variant knows its own zero level and amplitude ceiling, so the
/// detector can bring every format onto the same [-1, 1] scale.
#[derive(Debug, Clone, Copy)]
pub enum AudioFrame<'a> {
    /// Unsigned bytes centred on 128, as produced by browser analysers.
    U8(&'a [u8]),
    I16(&'a [i16]),
    F32(&'a [f32]),
}

impl<'a> AudioFrame<'a> {
    pub fn len(&self) -> usize {
        match self {
            Self::U8(samples) => samples.len(),
            Self::I16(samples) => samples.len(),
            Self::F32(samples) => samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over the samples normalised to [-1, 1].
    pub fn normalized(&self) -> impl Iterator<Item = f32> + 'a {
        let samples: Box<dyn Iterator<Item = f32> + 'a> = match *self {
            Self::U8(samples) => Box::new(samples.iter().map(|&s| (f32::from(s) - 128.0) / 128.0)),
            Self::I16(samples) => Box::new(samples.iter().map(|&s| f32::from(s) / 32768.0)),
            Self::F32(samples) => Box::new(samples.iter().copied()),
        };
        samples
    }

    fn first_non_finite(&self) -> Option<usize> {
        match self {
            Self::F32(samples) => samples.iter().position(|s| !s.is_finite()),
            Self::U8(_) | Self::I16(_) => None,
        }
    }
}

/// Owned block of samples as delivered by a capture device.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBuffer {
    U8(Vec<u8>),
    I16(Vec<i16>),
    F32(Vec<f32>),
}

impl SampleBuffer {
    pub fn as_frame(&self) -> AudioFrame<'_> {
        match self {
            Self::U8(samples) => AudioFrame::U8(samples),
            Self::I16(samples) => AudioFrame::I16(samples),
            Self::F32(samples) => AudioFrame::F32(samples),
        }
    }
}

/// The one event a detector ever produces.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlowDetected {
    /// Number of frames processed up to and including the triggering one.
    pub frame_index: u64,
    /// RMS of the triggering frame.
    pub rms: f32,
}

/// Mutable debounce state. Frozen once `fired` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorState {
    pub consecutive_above_count: u32,
    pub fired: bool,
}

/// One-shot RMS breath detector with a consecutive-frame debounce.
///
/// `process_frame` is O(frame size), never blocks and owns no device, so it
/// can run directly on a capture callback thread.
#[derive(Debug, Clone)]
pub struct BreathDetector {
    config: DetectorConfig,
    state: DetectorState,
    frames_seen: u64,
}

impl BreathDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            state: DetectorState::default(),
            frames_seen: 0,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn has_fired(&self) -> bool {
        self.state.fired
    }

    /// Consumes one frame and returns [`BlowDetected`] on the frame that
    /// completes the debounce run.
    ///
    /// Malformed frames return an error and leave the state untouched; the
    /// caller is expected to skip them and keep feeding the stream. After the
    /// detector has fired every call returns `Ok(None)`.
    pub fn process_frame(&mut self, frame: AudioFrame<'_>) -> Result<Option<BlowDetected>> {
        if self.state.fired {
            return Ok(None);
        }

        if frame.len() != self.config.frame_size {
            return Err(CandleError::FrameLength {
                expected: self.config.frame_size,
                actual: frame.len(),
            });
        }
        if let Some(index) = frame.first_non_finite() {
            return Err(CandleError::NonFiniteSample { index });
        }

        self.frames_seen += 1;
        let rms = frame_rms(&frame);

        if rms > self.config.threshold_rms {
            self.state.consecutive_above_count += 1;
        } else {
            self.state.consecutive_above_count = 0;
        }

        if self.state.consecutive_above_count >= self.config.required_consecutive_frames {
            self.state.fired = true;
            info!(frame = self.frames_seen, rms, "blow detected");
            return Ok(Some(BlowDetected {
                frame_index: self.frames_seen,
                rms,
            }));
        }

        if self.state.consecutive_above_count > 0 {
            debug!(
                rms,
                run = self.state.consecutive_above_count,
                "frame above threshold"
            );
        }
        Ok(None)
    }
}

/// Root-mean-square of the normalised samples. Empty frames are silent.
pub fn frame_rms(frame: &AudioFrame<'_>) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f64 = frame.normalized().map(|s| f64::from(s) * f64::from(s)).sum();
    (sum / frame.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: usize = 64;

    fn detector() -> BreathDetector {
        BreathDetector::new(DetectorConfig {
            threshold_rms: 0.08,
            required_consecutive_frames: 4,
            frame_size: FRAME,
        })
    }

    /// A constant frame has an RMS equal to its magnitude.
    fn level(rms: f32) -> Vec<f32> {
        vec![rms; FRAME]
    }

    #[test]
    fn fires_on_fourth_consecutive_loud_frame() {
        let mut detector = detector();
        let levels = [0.01, 0.09, 0.10, 0.11, 0.12, 0.02];
        let mut fired_at = Vec::new();

        for (i, rms) in levels.iter().enumerate() {
            let samples = level(*rms);
            if let Some(event) = detector.process_frame(AudioFrame::F32(&samples)).unwrap() {
                fired_at.push(i + 1);
                assert_eq!(event.frame_index, 5);
            }
        }

        assert_eq!(fired_at, vec![5]);
        assert!(detector.has_fired());
    }

    #[test]
    fn quiet_frame_resets_the_run() {
        let mut detector = detector();
        for rms in [0.2, 0.2, 0.2] {
            detector.process_frame(AudioFrame::F32(&level(rms))).unwrap();
        }
        assert_eq!(detector.state().consecutive_above_count, 3);

        detector.process_frame(AudioFrame::F32(&level(0.05))).unwrap();
        assert_eq!(detector.state().consecutive_above_count, 0);

        for _ in 0..3 {
            assert!(detector
                .process_frame(AudioFrame::F32(&level(0.2)))
                .unwrap()
                .is_none());
        }
        assert!(detector
            .process_frame(AudioFrame::F32(&level(0.2)))
            .unwrap()
            .is_some());
    }

    #[test]
    fn threshold_is_exclusive() {
        let mut detector = BreathDetector::new(DetectorConfig {
            threshold_rms: 0.5,
            required_consecutive_frames: 1,
            frame_size: FRAME,
        });
        let samples = vec![0.5_f32; FRAME];
        assert!(detector.process_frame(AudioFrame::F32(&samples)).unwrap().is_none());
        assert_eq!(detector.state().consecutive_above_count, 0);
    }

    #[test]
    fn never_fires_twice() {
        let mut detector = detector();
        let loud = level(0.5);
        let events = (0..20)
            .filter_map(|_| detector.process_frame(AudioFrame::F32(&loud)).unwrap())
            .count();
        assert_eq!(events, 1);

        let frozen = detector.state();
        detector.process_frame(AudioFrame::F32(&level(0.0))).unwrap();
        assert_eq!(detector.state(), frozen);
    }

    #[test]
    fn malformed_frames_leave_state_untouched() {
        let mut detector = detector();
        detector.process_frame(AudioFrame::F32(&level(0.3))).unwrap();
        let before = detector.state();

        let short = vec![0.3_f32; FRAME - 1];
        let err = detector.process_frame(AudioFrame::F32(&short)).unwrap_err();
        assert!(matches!(
            err,
            CandleError::FrameLength { expected: FRAME, actual } if actual == FRAME - 1
        ));

        let mut noisy = level(0.3);
        noisy[7] = f32::NAN;
        let err = detector.process_frame(AudioFrame::F32(&noisy)).unwrap_err();
        assert!(matches!(err, CandleError::NonFiniteSample { index: 7 }));
        assert!(err.is_invalid_frame());

        assert_eq!(detector.state(), before);
    }

    #[test]
    fn normalises_integer_formats() {
        let silence = vec![128_u8; FRAME];
        assert_eq!(frame_rms(&AudioFrame::U8(&silence)), 0.0);

        let bytes: Vec<u8> = (0..FRAME).map(|i| if i % 2 == 0 { 192 } else { 64 }).collect();
        let rms = frame_rms(&AudioFrame::U8(&bytes));
        assert!((rms - 0.5).abs() < 1e-6);

        let words: Vec<i16> = (0..FRAME).map(|i| if i % 2 == 0 { 16384 } else { -16384 }).collect();
        let rms = frame_rms(&AudioFrame::I16(&words));
        assert!((rms - 0.5).abs() < 1e-6);
    }

    #[test]
    fn owned_buffers_expose_frames() {
        let buffer = SampleBuffer::I16(vec![0; FRAME]);
        let mut detector = detector();
        assert_eq!(buffer.as_frame().len(), FRAME);
        assert!(detector.process_frame(buffer.as_frame()).unwrap().is_none());
    }
}
