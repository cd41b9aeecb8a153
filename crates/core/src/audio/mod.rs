use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::{BlowDetected, BreathDetector, CandleError, DetectorConfig, Result, SampleBuffer};

/// How long a single read may block before the listener re-checks for
/// cancellation and the stall deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Audio capture device. Opening acquires the device; the returned capture
/// releases it when dropped.
pub trait AudioSource: Send + 'static {
    type Capture: AudioCapture;

    /// Fails with [`CandleError::AudioAccess`] when the device is missing or
    /// access is refused.
    fn open(&mut self) -> Result<Self::Capture>;
}

/// An open capture stream delivering frames in order.
pub trait AudioCapture {
    /// Waits up to `timeout` for the next frame. `Ok(None)` means nothing
    /// arrived in time; an error means the device is gone.
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<SampleBuffer>>;
}

/// The single message a listener delivers before it exits.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    Blow(BlowDetected),
    /// The device could not be opened or failed mid-stream.
    AudioUnavailable(String),
    /// No frame arrived within the configured deadline.
    Stalled(Duration),
}

/// Runs a [`BreathDetector`] on its own capture thread.
#[derive(Debug)]
pub struct BreathListener;

impl BreathListener {
    /// Spawns the capture thread and returns its handle together with the
    /// channel its one event arrives on.
    pub fn spawn<S: AudioSource>(
        source: S,
        config: DetectorConfig,
        frame_timeout: Duration,
    ) -> Result<(ListenerHandle, Receiver<ListenerEvent>)> {
        let (tx, rx) = bounded(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);

        let thread = std::thread::Builder::new()
            .name("breath-listener".into())
            .spawn(move || {
                let event = listen(source, config, frame_timeout, &thread_cancel);
                if let Some(event) = event {
                    deliver(&tx, event);
                }
            })?;

        Ok((
            ListenerHandle {
                cancel,
                thread: Some(thread),
            },
            rx,
        ))
    }
}

/// Owner of a running listener thread. Dropping it cancels and joins.
#[derive(Debug)]
pub struct ListenerHandle {
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Cancels the listener and waits for the capture device to be released.
    pub fn join(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.cancel();
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| CandleError::msg("breath listener thread panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(%err, "listener shutdown failed");
        }
    }
}

/// Capture loop. The capture handle lives only inside this function, so the
/// device is released on every return path.
fn listen<S: AudioSource>(
    mut source: S,
    config: DetectorConfig,
    frame_timeout: Duration,
    cancel: &AtomicBool,
) -> Option<ListenerEvent> {
    let mut capture = match source.open() {
        Ok(capture) => capture,
        Err(err) => return Some(ListenerEvent::AudioUnavailable(err.to_string())),
    };
    info!(frame_size = config.frame_size, "listening for a blow");

    let mut detector = BreathDetector::new(config);
    let mut last_frame = Instant::now();

    loop {
        if cancel.load(Ordering::Relaxed) {
            debug!("listener cancelled");
            return None;
        }

        match capture.read_frame(POLL_INTERVAL.min(frame_timeout)) {
            Ok(Some(buffer)) => {
                last_frame = Instant::now();
                match detector.process_frame(buffer.as_frame()) {
                    Ok(Some(blow)) => return Some(ListenerEvent::Blow(blow)),
                    Ok(None) => {}
                    Err(err) => debug!(%err, "skipping frame"),
                }
            }
            Ok(None) => {
                let waited = last_frame.elapsed();
                if waited >= frame_timeout {
                    return Some(ListenerEvent::Stalled(waited));
                }
            }
            Err(err) => return Some(ListenerEvent::AudioUnavailable(err.to_string())),
        }
    }
}

fn deliver(tx: &Sender<ListenerEvent>, event: ListenerEvent) {
    if tx.try_send(event).is_err() {
        debug!("listener event dropped, nobody is waiting");
    }
}
