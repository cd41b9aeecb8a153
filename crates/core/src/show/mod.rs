//! Single logical owner of the timeline.
//!
//! [`Show`] holds the scheduler, the presentation state machine (which in
//! turn owns the melody) and the renderer. Capture threads never touch it
//! directly; their one event arrives over a channel.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info};

use crate::{
    AppConfig, AudioSink, ListenerEvent, MelodySequencer, PlaybackClock, PresentationInput,
    PresentationState, PresentationStateMachine, PresentationView, Renderer, Result, Scheduler,
    TimeSource, TimelineEvent,
};

/// Notice shown when the microphone cannot be used.
pub const MICROPHONE_NOTICE: &str = "Microphone blocked. Please allow mic access and restart.";

/// How long the live loop sleeps when nothing is scheduled.
const IDLE_WAIT: Duration = Duration::from_millis(250);

pub struct Show<S: AudioSink, R: Renderer> {
    scheduler: Scheduler<TimelineEvent>,
    machine: PresentationStateMachine<S>,
    renderer: R,
}

impl<S: AudioSink, R: Renderer> Show<S, R> {
    /// Validates `config`, builds the components and renders the initial
    /// idle view.
    pub fn new(config: &AppConfig, sink: S, renderer: R) -> Result<Self> {
        config.validate()?;
        let sequencer = MelodySequencer::new(config.sequencer.clone(), sink);
        let machine = PresentationStateMachine::new(config.presentation, sequencer);

        let mut show = Self {
            scheduler: Scheduler::new(),
            machine,
            renderer,
        };
        show.render();
        Ok(show)
    }

    pub fn state(&self) -> PresentationState {
        self.machine.state()
    }

    pub fn machine(&self) -> &PresentationStateMachine<S> {
        &self.machine
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn sink(&self) -> &S {
        self.machine.sequencer().sink()
    }

    /// Current show time.
    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.scheduler.next_deadline()
    }

    pub fn is_finished(&self) -> bool {
        self.machine.state().is_final()
    }

    /// `true` once nothing more will ever happen: the show reached `Final`
    /// or is parked on the candle with a notice.
    pub fn is_settled(&self) -> bool {
        self.is_finished() || self.machine.is_degraded()
    }

    /// Applies the listener's event at the current show time.
    pub fn handle_listener_event(&mut self, event: ListenerEvent) {
        match event {
            ListenerEvent::Blow(blow) => {
                info!(frame = blow.frame_index, rms = blow.rms, "starting the show");
                if self
                    .machine
                    .handle(PresentationInput::BlowDetected, &mut self.scheduler)
                    .is_some()
                {
                    self.render();
                }
            }
            ListenerEvent::AudioUnavailable(reason) => {
                info!(%reason, "microphone unavailable");
                self.degrade();
            }
            ListenerEvent::Stalled(waited) => {
                info!(waited_ms = waited.as_millis() as u64, "microphone stopped delivering audio");
                self.degrade();
            }
        }
    }

    /// Fires every timer due at or before `now`, in order, rendering after
    /// each transition.
    pub fn advance_to(&mut self, now: Duration) {
        while let Some(due) = self.scheduler.pop_due(now) {
            if self
                .machine
                .on_timer(due.event, &mut self.scheduler)
                .is_some()
            {
                self.render();
            }
        }
        self.scheduler.advance_to(now);
    }

    /// Live loop: waits for the listener while firing timers on time.
    /// Returns when the show has settled.
    pub fn run(&mut self, events: &Receiver<ListenerEvent>, clock: &PlaybackClock) -> Result<()> {
        let mut listening = true;

        while !self.is_settled() {
            self.advance_to(clock.elapsed());
            if self.is_settled() {
                break;
            }

            let wait = self
                .next_deadline()
                .map(|deadline| deadline.saturating_sub(clock.elapsed()))
                .unwrap_or(IDLE_WAIT);

            if !listening {
                std::thread::sleep(wait);
                continue;
            }

            match events.recv_timeout(wait) {
                Ok(event) => {
                    self.advance_to(clock.elapsed());
                    self.handle_listener_event(event);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    listening = false;
                    if self.state() == PresentationState::Idle {
                        self.degrade();
                    }
                }
            }
        }

        debug!(state = ?self.state(), "show settled");
        Ok(())
    }

    fn degrade(&mut self) {
        if self.machine.enter_degraded(MICROPHONE_NOTICE) {
            self.render();
        }
    }

    fn render(&mut self) {
        let view = PresentationView {
            state: self.machine.state(),
            notice: self.machine.notice().map(str::to_owned),
        };
        self.renderer.render(self.scheduler.now(), &view);
    }
}

impl<S: AudioSink, R: Renderer> Drop for Show<S, R> {
    fn drop(&mut self) {
        self.machine.shutdown(&mut self.scheduler);
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use crossbeam_channel::bounded;

    use super::*;
    use crate::{BlowDetected, MemorySink, ViewLog};

    fn config(slide_count: usize, per_slide_duration_ms: u64) -> AppConfig {
        let mut config = AppConfig::default();
        config.presentation.slide_count = slide_count;
        config.presentation.per_slide_duration_ms = per_slide_duration_ms;
        config
    }

    fn blow() -> ListenerEvent {
        ListenerEvent::Blow(BlowDetected {
            frame_index: 4,
            rms: 0.2,
        })
    }

    #[test]
    fn renders_idle_on_start() {
        let show = Show::new(&config(3, 100), MemorySink::default(), ViewLog::new()).unwrap();
        assert_eq!(show.renderer().states(), vec![PresentationState::Idle]);
    }

    #[test]
    fn full_timeline_from_blow_to_final() {
        let mut show =
            Show::new(&config(10, 2_000), MemorySink::default(), ViewLog::new()).unwrap();

        show.advance_to(Duration::from_millis(1_500));
        show.handle_listener_event(blow());
        show.advance_to(Duration::from_secs(60));

        let views = &show.renderer().views;
        assert_eq!(views.len(), 12);
        assert_eq!(
            views[1],
            (
                Duration::from_millis(1_500),
                PresentationView {
                    state: PresentationState::Slideshow { index: 0 },
                    notice: None,
                },
            )
        );
        for (i, (at, view)) in views[1..11].iter().enumerate() {
            assert_eq!(view.state, PresentationState::Slideshow { index: i });
            assert_eq!(*at, Duration::from_millis(1_500 + 2_000 * i as u64));
        }
        assert_eq!(views[11].0, Duration::from_millis(21_500));
        assert_eq!(views[11].1.state, PresentationState::Final);

        assert!(show.is_finished());
        assert!(!show.machine().sequencer().is_running());
        assert_eq!(show.next_deadline(), None);
        assert!(!show.sink().notes.is_empty());
    }

    #[test]
    fn audio_failure_parks_show_on_candle() {
        let mut show = Show::new(&config(3, 100), MemorySink::default(), ViewLog::new()).unwrap();

        show.handle_listener_event(ListenerEvent::AudioUnavailable("denied".into()));
        show.handle_listener_event(blow());
        show.advance_to(Duration::from_secs(10));

        assert_eq!(show.state(), PresentationState::Idle);
        assert!(show.is_settled());
        let last = &show.renderer().views.last().unwrap().1;
        assert_eq!(last.notice.as_deref(), Some(MICROPHONE_NOTICE));
        assert!(show.sink().notes.is_empty());
    }

    #[test]
    fn extreme_note_lengths_still_play() {
        for json in [
            r#"{ "sequencer": { "bpm": 1e-30 }, "presentation": { "slide_count": 2 } }"#,
            r#"{ "sequencer": { "score": [{ "pitch_hz": 440.0, "beats": 1e30 }] } }"#,
        ] {
            let config = AppConfig::from_json_str(json).unwrap();
            let mut show = Show::new(&config, MemorySink::default(), ViewLog::new()).unwrap();

            show.handle_listener_event(blow());
            show.advance_to(Duration::from_secs(60));

            assert!(show.is_finished());
            let floor = config.sequencer.min_note_duration_sec;
            assert!(show.sink().notes.iter().all(|note| note.duration_sec == floor));
        }
    }

    #[test]
    fn live_loop_runs_to_final() {
        let mut show = Show::new(&config(2, 20), MemorySink::default(), ViewLog::new()).unwrap();
        let (tx, rx) = bounded(1);
        tx.send(blow()).unwrap();

        show.run(&rx, &PlaybackClock::start()).unwrap();

        assert!(show.is_finished());
        assert_eq!(
            show.renderer().states(),
            vec![
                PresentationState::Idle,
                PresentationState::Slideshow { index: 0 },
                PresentationState::Slideshow { index: 1 },
                PresentationState::Final,
            ]
        );
    }

    #[test]
    fn live_loop_degrades_when_listener_vanishes() {
        let mut show = Show::new(&config(2, 20), MemorySink::default(), ViewLog::new()).unwrap();
        let (tx, rx) = bounded::<ListenerEvent>(1);
        drop(tx);

        show.run(&rx, &PlaybackClock::start()).unwrap();

        assert_eq!(show.state(), PresentationState::Idle);
        assert!(show.machine().is_degraded());
    }

    #[test]
    fn dropping_show_stops_melody() {
        struct SharedSink(Rc<Cell<usize>>);

        impl AudioSink for SharedSink {
            fn schedule_note(&mut self, _note: &crate::NoteEvent) -> Result<()> {
                Ok(())
            }

            fn stop_all(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let stops = Rc::new(Cell::new(0));
        let mut show = Show::new(
            &config(3, 1_000),
            SharedSink(Rc::clone(&stops)),
            ViewLog::new(),
        )
        .unwrap();
        show.handle_listener_event(blow());
        assert!(show.machine().sequencer().is_running());

        drop(show);
        assert_eq!(stops.get(), 1);
    }
}
