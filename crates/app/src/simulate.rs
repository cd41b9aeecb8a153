//! Offline run of the whole show on the virtual clock.

use std::{f32::consts::PI, time::Duration};

use candlewish_core::{
    AppConfig, AudioFrame, BreathDetector, CandleError, ListenerEvent, MemorySink, Result, Show,
    ViewLog,
};
use serde_json::{json, Value};

const QUIET_LEVEL: f32 = 0.01;
const BREATH_LEVEL: f32 = 0.3;
const TONE_HZ: f32 = 220.0;
/// Loud frames fed after the quiet lead-in before giving up.
const MAX_BREATH_FRAMES: usize = 1_000;

/// Feeds `quiet_frames` of near-silence followed by a sustained breath into
/// the detector, then plays the show to the end. Returns a JSON transcript of
/// every view and note with its show time.
pub fn run(config: &AppConfig, quiet_frames: usize) -> Result<Value> {
    let frame_size = config.detector.frame_size;
    let sample_rate = config.audio.sample_rate;
    let frame_period = Duration::from_secs_f64(frame_size as f64 / f64::from(sample_rate));

    let mut show = Show::new(config, MemorySink::default(), ViewLog::new())?;
    let mut detector = BreathDetector::new(config.detector);
    let mut notes = Vec::new();

    for index in 0..quiet_frames.saturating_add(MAX_BREATH_FRAMES) {
        show.advance_to(frame_at(frame_period, index));
        let level = if index < quiet_frames {
            QUIET_LEVEL
        } else {
            BREATH_LEVEL
        };
        // The tone repeats every second, so only the offset within it matters.
        let offset = (index % sample_rate as usize) * frame_size;
        let samples = tone(offset, frame_size, sample_rate, level);
        if let Some(blow) = detector.process_frame(AudioFrame::F32(&samples))? {
            show.handle_listener_event(ListenerEvent::Blow(blow));
            break;
        }
    }
    if !detector.has_fired() {
        return Err(CandleError::msg(format!(
            "synthetic breath never crossed the threshold of {}",
            config.detector.threshold_rms
        )));
    }
    collect_notes(&show, &mut notes, show.now());

    while !show.is_finished() {
        let Some(deadline) = show.next_deadline() else {
            break;
        };
        show.advance_to(deadline);
        collect_notes(&show, &mut notes, deadline);
    }

    let views: Vec<Value> = show
        .renderer()
        .views
        .iter()
        .map(|(at, view)| {
            let mut entry = serde_json::to_value(view).unwrap_or(Value::Null);
            entry["at_ms"] = json!(at.as_millis() as u64);
            entry
        })
        .collect();

    Ok(json!({ "views": views, "notes": notes }))
}

/// Show time at which frame `index` arrives. Saturates instead of wrapping.
fn frame_at(frame_period: Duration, index: usize) -> Duration {
    frame_period.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX))
}

fn collect_notes(show: &Show<MemorySink, ViewLog>, notes: &mut Vec<Value>, at: Duration) {
    for note in &show.sink().notes[notes.len()..] {
        notes.push(json!({
            "at_ms": at.as_millis() as u64,
            "pitch_hz": note.pitch_hz,
            "duration_sec": note.duration_sec,
        }));
    }
}

/// Sine block starting at absolute sample `offset`; its RMS is `level / √2`.
fn tone(offset: usize, len: usize, sample_rate: u32, level: f32) -> Vec<f32> {
    let step = 2.0 * PI * TONE_HZ / sample_rate as f32;
    (offset..offset + len)
        .map(|n| level * (step * (n % sample_rate as usize) as f32).sin())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_covers_whole_show() {
        let mut config = AppConfig::default();
        config.presentation.slide_count = 3;
        config.presentation.per_slide_duration_ms = 500;

        let transcript = run(&config, 10).unwrap();
        let views = transcript["views"].as_array().unwrap();
        let states: Vec<&str> = views.iter().map(|v| v["state"].as_str().unwrap()).collect();
        assert_eq!(states, vec!["idle", "slideshow", "slideshow", "slideshow", "final"]);

        // Blow fires on the fourth loud frame after ten quiet ones.
        let frame_ms = 1024.0 * 1000.0 / 48_000.0;
        let blow_ms = views[1]["at_ms"].as_u64().unwrap();
        assert_eq!(blow_ms, (13.0_f64 * frame_ms) as u64);
        assert_eq!(views[4]["at_ms"].as_u64().unwrap(), blow_ms + 1_500);

        let notes = transcript["notes"].as_array().unwrap();
        assert_eq!(notes[0]["at_ms"], views[1]["at_ms"]);
        assert!(notes.len() >= 3);
    }

    #[test]
    fn frame_times_saturate_for_huge_lead_ins() {
        let period = Duration::from_millis(20);
        assert_eq!(frame_at(period, 3), Duration::from_millis(60));
        assert_eq!(frame_at(period, usize::MAX), period.saturating_mul(u32::MAX));
        assert_eq!(frame_at(Duration::MAX, 2), Duration::MAX);
    }

    #[test]
    fn silent_breath_is_an_error() {
        let mut config = AppConfig::default();
        config.detector.threshold_rms = 0.9;
        assert!(run(&config, 0).is_err());
    }
}
