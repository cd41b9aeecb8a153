//! Procedural melody playback.
//!
//! A [`MelodySequencer`] walks a fixed [`Score`] as a ring, emitting one
//! [`NoteEvent`] per step to an [`AudioSink`] and scheduling the following
//! step on a [`TimeSource`]. The melody never ends by itself; it runs until
//! [`MelodySequencer::stop`] is called.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{CancelHandle, CandleError, Result, SequencerConfig, TimeSource, TimelineEvent};

/// Gain reached at the end of the attack ramp.
const PEAK_GAIN: f32 = 0.16;
/// Level the decay ramp settles at before release.
const SUSTAIN_GAIN: f32 = 0.12;
const ATTACK_SEC: f32 = 0.025;
const DECAY_END_SEC: f32 = 0.12;
const RELEASE_LEAD_SEC: f32 = 0.04;
const MIN_RELEASE_END_SEC: f32 = 0.05;

/// Longest note the sequencer will hold. Anything longer, or not a number,
/// falls back to the minimum note duration.
pub const MAX_NOTE_DURATION_SEC: f32 = 60.0;

/// One step of the score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch_hz: f32,
    pub beats: f32,
}

impl Note {
    pub fn new(pitch_hz: f32, beats: f32) -> Self {
        Self { pitch_hz, beats }
    }

    /// Builds a note from a scientific pitch name such as `"A4"`.
    pub fn named(name: &str, beats: f32) -> Result<Self> {
        let pitch_hz = note_frequency(name)
            .ok_or_else(|| CandleError::Config(format!("unknown note name `{name}`")))?;
        Ok(Self::new(pitch_hz, beats))
    }
}

/// Frequencies for the octave-and-a-half the birthday tune spans.
pub fn note_frequency(name: &str) -> Option<f32> {
    let hz = match name {
        "C4" => 261.63,
        "D4" => 293.66,
        "E4" => 329.63,
        "F4" => 349.23,
        "G4" => 392.00,
        "A4" => 440.00,
        "B4" => 493.88,
        "C5" => 523.25,
        "D5" => 587.33,
        "E5" => 659.25,
        "F5" => 698.46,
        "G5" => 783.99,
        _ => return None,
    };
    Some(hz)
}

/// Ordered, non-empty sequence of notes, indexed as a ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(Vec<Note>);

impl Score {
    pub fn new(notes: Vec<Note>) -> Result<Self> {
        let score = Self(notes);
        score.validate()?;
        Ok(score)
    }

    /// "Happy Birthday" in C.
    pub fn happy_birthday() -> Self {
        const TUNE: [(f32, f32); 25] = [
            (392.00, 1.0),
            (392.00, 1.0),
            (440.00, 2.0),
            (392.00, 2.0),
            (523.25, 2.0),
            (493.88, 4.0),
            (392.00, 1.0),
            (392.00, 1.0),
            (440.00, 2.0),
            (392.00, 2.0),
            (587.33, 2.0),
            (523.25, 4.0),
            (392.00, 1.0),
            (392.00, 1.0),
            (783.99, 2.0),
            (659.25, 2.0),
            (523.25, 2.0),
            (493.88, 2.0),
            (440.00, 3.0),
            (698.46, 1.0),
            (698.46, 1.0),
            (659.25, 2.0),
            (523.25, 2.0),
            (587.33, 2.0),
            (523.25, 4.0),
        ];
        Self(
            TUNE.iter()
                .map(|&(pitch_hz, beats)| Note::new(pitch_hz, beats))
                .collect(),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(CandleError::Config("melody score must not be empty".into()));
        }
        if let Some(position) = self
            .0
            .iter()
            .position(|note| !(note.pitch_hz.is_finite() && note.pitch_hz > 0.0))
        {
            return Err(CandleError::Config(format!(
                "score note {position} has an invalid pitch"
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn notes(&self) -> &[Note] {
        &self.0
    }

    /// Ring access: the index wraps modulo the score length.
    pub fn get(&self, index: usize) -> Option<&Note> {
        if self.0.is_empty() {
            return None;
        }
        self.0.get(index % self.0.len())
    }
}

impl Default for Score {
    fn default() -> Self {
        Self::happy_birthday()
    }
}

/// Piecewise-linear gain curve: attack to a peak, settle to the sustain
/// level, then release to silence before the note ends.
///
/// Break points are in seconds from note start, monotonic and all within
/// `[0, duration]` so short notes still start and end at zero gain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub attack_end_sec: f32,
    pub decay_end_sec: f32,
    pub release_end_sec: f32,
    pub peak: f32,
    pub sustain: f32,
}

impl Envelope {
    pub fn for_duration(duration_sec: f32) -> Self {
        let duration = duration_sec.max(0.0);
        let attack_end = ATTACK_SEC.min(duration * 0.2);
        let decay_end = DECAY_END_SEC.min(duration * 0.35).max(attack_end);
        let release_end = (duration - RELEASE_LEAD_SEC)
            .max(MIN_RELEASE_END_SEC)
            .min(duration)
            .max(decay_end);
        Self {
            attack_end_sec: attack_end,
            decay_end_sec: decay_end,
            release_end_sec: release_end,
            peak: PEAK_GAIN,
            sustain: SUSTAIN_GAIN,
        }
    }

    /// Gain at `t` seconds into the note.
    pub fn gain_at(&self, t: f32) -> f32 {
        if t <= 0.0 || t >= self.release_end_sec {
            return 0.0;
        }
        if t < self.attack_end_sec {
            return self.peak * t / self.attack_end_sec;
        }
        if t < self.decay_end_sec {
            let span = self.decay_end_sec - self.attack_end_sec;
            let progress = (t - self.attack_end_sec) / span;
            return self.peak + (self.sustain - self.peak) * progress;
        }
        let span = self.release_end_sec - self.decay_end_sec;
        let progress = (t - self.decay_end_sec) / span;
        self.sustain * (1.0 - progress)
    }
}

/// A note handed to the audio sink.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch_hz: f32,
    pub duration_sec: f32,
    /// Master gain for this run.
    pub amplitude: f32,
    pub envelope: Envelope,
}

impl NoteEvent {
    pub fn new(pitch_hz: f32, duration_sec: f32, amplitude: f32) -> Self {
        Self {
            pitch_hz,
            duration_sec,
            amplitude,
            envelope: Envelope::for_duration(duration_sec),
        }
    }
}

/// Destination for rendered notes.
pub trait AudioSink {
    /// Starts rendering `note` now. A failure affects this note only.
    fn schedule_note(&mut self, note: &NoteEvent) -> Result<()>;

    /// Silences everything and releases resources held for the current run.
    fn stop_all(&mut self);
}

/// Sink that keeps every note in memory. Used by the simulator and tests.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub notes: Vec<NoteEvent>,
    pub stop_calls: usize,
}

impl AudioSink for MemorySink {
    fn schedule_note(&mut self, note: &NoteEvent) -> Result<()> {
        self.notes.push(*note);
        Ok(())
    }

    fn stop_all(&mut self) {
        self.stop_calls += 1;
    }
}

/// State that only exists while a melody is playing.
#[derive(Debug, Clone, Copy)]
struct SequencerRun {
    index: usize,
    pending: CancelHandle,
}

/// Plays the score in a loop against a [`TimeSource`].
#[derive(Debug)]
pub struct MelodySequencer<S> {
    config: SequencerConfig,
    sink: S,
    run: Option<SequencerRun>,
}

impl<S: AudioSink> MelodySequencer<S> {
    pub fn new(config: SequencerConfig, sink: S) -> Self {
        Self {
            config,
            sink,
            run: None,
        }
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Score position of the next note, while running.
    pub fn index(&self) -> Option<usize> {
        self.run.map(|run| run.index)
    }

    /// Length of `note` once the tempo and the duration floor are applied.
    pub fn note_duration_sec(&self, note: &Note) -> f32 {
        let scaled = note.beats * self.config.beat_duration_sec();
        if scaled.is_finite() && scaled <= MAX_NOTE_DURATION_SEC {
            scaled.max(self.config.min_note_duration_sec)
        } else {
            self.config.min_note_duration_sec
        }
    }

    /// Starts the melody from the top of the score. Does nothing if it is
    /// already playing.
    pub fn start<T: TimeSource<TimelineEvent>>(&mut self, clock: &mut T) {
        if self.run.is_some() {
            return;
        }
        debug!(notes = self.config.score.len(), bpm = self.config.bpm, "melody started");
        self.run = Some(self.play_next(0, clock));
    }

    /// Handles a due [`TimelineEvent::NextNote`].
    pub fn on_note_timer<T: TimeSource<TimelineEvent>>(&mut self, clock: &mut T) {
        match self.run.take() {
            Some(run) => self.run = Some(self.play_next(run.index, clock)),
            None => debug!("ignoring note timer for a stopped melody"),
        }
    }

    /// Cancels the pending note and releases the sink. Safe to call at any
    /// time, any number of times.
    pub fn stop<T: TimeSource<TimelineEvent>>(&mut self, clock: &mut T) {
        if let Some(run) = self.run.take() {
            clock.cancel(run.pending);
            self.sink.stop_all();
            debug!(next_index = run.index, "melody stopped");
        }
    }

    fn play_next<T: TimeSource<TimelineEvent>>(
        &mut self,
        index: usize,
        clock: &mut T,
    ) -> SequencerRun {
        let len = self.config.score.len().max(1);
        let note = self
            .config
            .score
            .get(index)
            .copied()
            .unwrap_or(Note::new(0.0, 0.0));
        let duration_sec = self.note_duration_sec(&note);
        let event = NoteEvent::new(note.pitch_hz, duration_sec, self.config.amplitude);

        if let Err(err) = self.sink.schedule_note(&event) {
            warn!(%err, index, "note failed to render, continuing melody");
        }

        let delay = Duration::try_from_secs_f32(duration_sec)
            .ok()
            .filter(|delay| delay.as_secs_f32() <= MAX_NOTE_DURATION_SEC)
            .unwrap_or(Duration::from_secs(MAX_NOTE_DURATION_SEC as u64));
        let pending = clock.after(delay, TimelineEvent::NextNote);
        SequencerRun {
            index: (index + 1) % len,
            pending,
        }
    }
}
