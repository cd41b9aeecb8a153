use crate::NoteEvent;

/// A single sounding note: triangle oscillator shaped by the note envelope.
#[derive(Debug, Clone)]
pub struct Voice {
    note: NoteEvent,
    phase: f32,
    phase_inc: f32,
    elapsed_samples: u64,
    total_samples: u64,
    sample_rate: f32,
}

impl Voice {
    pub fn new(note: NoteEvent, sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(1) as f32;
        Self {
            note,
            phase: 0.0,
            phase_inc: (note.pitch_hz / sample_rate).max(0.0),
            elapsed_samples: 0,
            total_samples: (note.duration_sec.max(0.0) * sample_rate).ceil() as u64,
            sample_rate,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed_samples >= self.total_samples
    }

    /// Produces the next mono sample.
    pub fn next_sample(&mut self) -> f32 {
        if self.is_finished() {
            return 0.0;
        }

        let t = self.elapsed_samples as f32 / self.sample_rate;
        let gain = self.note.envelope.gain_at(t) * self.note.amplitude;
        let value = triangle(self.phase) * gain;

        self.phase += self.phase_inc;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }
        self.elapsed_samples += 1;
        value
    }
}

/// Mixes the voices that are currently sounding.
#[derive(Debug, Clone)]
pub struct VoiceBank {
    sample_rate: u32,
    voices: Vec<Voice>,
}

impl VoiceBank {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            voices: Vec::new(),
        }
    }

    pub fn add(&mut self, note: NoteEvent) {
        self.voices.push(Voice::new(note, self.sample_rate));
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    /// Fills an interleaved buffer, writing the same signal to every channel.
    pub fn render(&mut self, output: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        for frame in output.chunks_mut(channels) {
            let mixed: f32 = self.voices.iter_mut().map(Voice::next_sample).sum();
            let mixed = mixed.clamp(-1.0, 1.0);
            frame.iter_mut().for_each(|sample| *sample = mixed);
        }
        self.voices.retain(|voice| !voice.is_finished());
    }
}

/// Triangle wave in [-1, 1] for a phase in [0, 1).
fn triangle(phase: f32) -> f32 {
    1.0 - 4.0 * (phase - 0.5).abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_is_bounded_and_finishes() {
        let note = NoteEvent::new(440.0, 0.2, 1.0);
        let mut voice = Voice::new(note, 8_000);
        let mut peak = 0.0_f32;
        let mut count = 0;

        while !voice.is_finished() {
            peak = peak.max(voice.next_sample().abs());
            count += 1;
        }

        assert!((1_600..=1_601).contains(&count));
        assert!(peak > 0.0);
        assert!(peak <= note.envelope.peak + 1e-6);
        assert_eq!(voice.next_sample(), 0.0);
    }

    #[test]
    fn bank_drops_finished_voices() {
        let mut bank = VoiceBank::new(1_000);
        bank.add(NoteEvent::new(100.0, 0.05, 0.5));
        bank.add(NoteEvent::new(200.0, 0.5, 0.5));

        let mut buffer = vec![0.0; 2 * 100];
        bank.render(&mut buffer, 2);

        assert_eq!(bank.active_voices(), 1);
        assert!(buffer.chunks(2).all(|frame| frame[0] == frame[1]));
    }

    #[test]
    fn cleared_bank_is_silent() {
        let mut bank = VoiceBank::new(1_000);
        bank.add(NoteEvent::new(300.0, 1.0, 1.0));
        bank.clear();

        let mut buffer = vec![1.0; 64];
        bank.render(&mut buffer, 1);
        assert!(buffer.iter().all(|sample| *sample == 0.0));
    }

    #[test]
    fn triangle_spans_full_range() {
        assert_eq!(triangle(0.0), -1.0);
        assert_eq!(triangle(0.5), 1.0);
        assert_eq!(triangle(0.25), 0.0);
    }
}
