//! Core library for Candlewish.
//!
//! A breath on the microphone blows out a virtual candle and starts a timed
//! slideshow accompanied by a looping melody. Each module owns one piece of
//! that pipeline: capture and detection, the timer queue, melody sequencing
//! and synthesis, the presentation state machine, and the runtime that
//! ties them to a single owner.

pub mod audio;
pub mod config;
pub mod detector;
pub mod error;
pub mod melody;
pub mod presentation;
pub mod render;
pub mod show;
pub mod synth;
pub mod timeline;

pub use audio::{AudioCapture, AudioSource, BreathListener, ListenerEvent, ListenerHandle};
pub use config::{AppConfig, AudioConfig, DetectorConfig, PresentationConfig, SequencerConfig};
pub use detector::{frame_rms, AudioFrame, BlowDetected, BreathDetector, DetectorState, SampleBuffer};
pub use error::{CandleError, Result};
pub use melody::{
    note_frequency, AudioSink, Envelope, MelodySequencer, MemorySink, Note, NoteEvent, Score,
    MAX_NOTE_DURATION_SEC,
};
pub use presentation::{
    transition, Effect, PresentationInput, PresentationState, PresentationStateMachine, Transition,
};
pub use render::{PresentationView, Renderer, ViewLog};
pub use show::{Show, MICROPHONE_NOTICE};
pub use synth::{Voice, VoiceBank};
pub use timeline::{CancelHandle, PlaybackClock, ScheduledEvent, Scheduler, TimeSource, TimelineEvent};
