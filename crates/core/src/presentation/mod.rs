//! The show's high-level state machine.
//!
//! `Idle` waits for a blow, the slideshow advances one slide per tick, and
//! `Final` is terminal. Transitions and their side effects are listed in one
//! table ([`transition`]) so they can be checked without running timers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    AudioSink, CancelHandle, MelodySequencer, PresentationConfig, TimeSource, TimelineEvent,
};

/// What the renderer shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PresentationState {
    Idle,
    Slideshow { index: usize },
    Final,
}

impl PresentationState {
    pub fn slide_index(&self) -> Option<usize> {
        match self {
            Self::Slideshow { index } => Some(*index),
            Self::Idle | Self::Final => None,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final)
    }
}

/// Inputs the machine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationInput {
    BlowDetected,
    SlideTick,
}

/// Side effects attached to a transition, applied in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    StartMelody,
    StopMelody,
    ArmSlideTimer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: PresentationState,
    pub effects: &'static [Effect],
}

/// The complete transition table. `None` means the input is ignored in
/// that state.
pub fn transition(
    state: PresentationState,
    input: PresentationInput,
    slide_count: usize,
) -> Option<Transition> {
    use PresentationInput::*;
    use PresentationState::*;

    match (state, input) {
        (Idle, BlowDetected) => Some(Transition {
            next: Slideshow { index: 0 },
            effects: &[Effect::StartMelody, Effect::ArmSlideTimer],
        }),
        (Slideshow { index }, SlideTick) if index + 1 < slide_count => Some(Transition {
            next: Slideshow { index: index + 1 },
            effects: &[Effect::ArmSlideTimer],
        }),
        (Slideshow { .. }, SlideTick) => Some(Transition {
            next: Final,
            effects: &[Effect::StopMelody],
        }),
        (Idle, SlideTick) | (Slideshow { .. }, BlowDetected) | (Final, _) => None,
    }
}

/// Drives the slideshow and owns the melody that accompanies it.
#[derive(Debug)]
pub struct PresentationStateMachine<S> {
    config: PresentationConfig,
    state: PresentationState,
    sequencer: MelodySequencer<S>,
    slide_timer: Option<CancelHandle>,
    notice: Option<String>,
}

impl<S: AudioSink> PresentationStateMachine<S> {
    pub fn new(config: PresentationConfig, sequencer: MelodySequencer<S>) -> Self {
        Self {
            config,
            state: PresentationState::Idle,
            sequencer,
            slide_timer: None,
            notice: None,
        }
    }

    pub fn state(&self) -> PresentationState {
        self.state
    }

    pub fn config(&self) -> &PresentationConfig {
        &self.config
    }

    pub fn sequencer(&self) -> &MelodySequencer<S> {
        &self.sequencer
    }

    /// User-facing message shown while the show is stuck on the candle.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn is_degraded(&self) -> bool {
        self.notice.is_some()
    }

    /// Parks the show on the candle for good. Only meaningful while idle;
    /// once the slideshow runs the microphone is no longer needed.
    pub fn enter_degraded(&mut self, notice: impl Into<String>) -> bool {
        if self.state != PresentationState::Idle || self.notice.is_some() {
            return false;
        }
        let notice = notice.into();
        warn!(%notice, "audio capture unavailable, staying idle");
        self.notice = Some(notice);
        true
    }

    /// Applies `input`, returning the new state if a transition happened.
    pub fn handle<T: TimeSource<TimelineEvent>>(
        &mut self,
        input: PresentationInput,
        clock: &mut T,
    ) -> Option<PresentationState> {
        if self.is_degraded() {
            debug!(?input, "ignoring input while degraded");
            return None;
        }

        let Some(step) = transition(self.state, input, self.config.slide_count) else {
            debug!(state = ?self.state, ?input, "input ignored");
            return None;
        };

        self.slide_timer = None;
        for effect in step.effects {
            match effect {
                Effect::StartMelody => self.sequencer.start(clock),
                Effect::StopMelody => self.sequencer.stop(clock),
                Effect::ArmSlideTimer => {
                    let delay = Duration::from_millis(self.config.per_slide_duration_ms);
                    self.slide_timer = Some(clock.after(delay, TimelineEvent::NextSlide));
                }
            }
        }

        info!(from = ?self.state, to = ?step.next, "presentation transition");
        self.state = step.next;
        Some(self.state)
    }

    /// Routes a due timer event to its owner.
    pub fn on_timer<T: TimeSource<TimelineEvent>>(
        &mut self,
        event: TimelineEvent,
        clock: &mut T,
    ) -> Option<PresentationState> {
        match event {
            TimelineEvent::NextNote => {
                self.sequencer.on_note_timer(clock);
                None
            }
            TimelineEvent::NextSlide => self.handle(PresentationInput::SlideTick, clock),
        }
    }

    /// Cancels every pending timer and silences the melody.
    pub fn shutdown<T: TimeSource<TimelineEvent>>(&mut self, clock: &mut T) {
        if let Some(handle) = self.slide_timer.take() {
            clock.cancel(handle);
        }
        self.sequencer.stop(clock);
    }
}
