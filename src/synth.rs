use std::f32::consts::TAU;

pub const MAX_VOICES: usize = 4;

const VELOCITY_SCALE: f32 = 0.15;
const TAIL_OFF_DECAY: f32 = 0.99;
const TAIL_OFF_FLOOR: f32 = 0.005;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NoteEvent {
    NoteOn { note: u8, velocity: f32 },
    NoteOff { note: u8 },
}

/// What the voice allocator needs from a voice.
pub trait AudioVoice {
    fn prepare(&mut self, sample_rate: f32);
    fn start(&mut self, note: u8, velocity: f32);
    /// Releases the note. With `allow_tail_off` the voice fades out on its
    /// own, otherwise it goes silent immediately.
    fn stop(&mut self, allow_tail_off: bool);
    /// Adds the voice's output into `out`.
    fn render(&mut self, out: &mut [f32]);
    fn is_active(&self) -> bool;
    /// Note the voice is holding, `None` once it has been released or freed.
    fn held_note(&self) -> Option<u8>;
}

#[derive(Default)]
pub struct SineVoice {
    sample_rate: f32,
    note: Option<u8>,
    angle: f32,
    angle_delta: f32,
    level: f32,
    tail_off: f32,
}

impl SineVoice {
    fn clear(&mut self) {
        self.note = None;
        self.angle_delta = 0.0;
        self.tail_off = 0.0;
    }
}

impl AudioVoice for SineVoice {
    fn prepare(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    fn start(&mut self, note: u8, velocity: f32) {
        self.note = Some(note);
        self.angle = 0.0;
        self.level = velocity.clamp(0.0, 1.0) * VELOCITY_SCALE;
        self.tail_off = 0.0;
        self.angle_delta = if self.sample_rate > 0.0 {
            TAU * midi_to_freq(note) / self.sample_rate
        } else {
            0.0
        };
    }

    fn stop(&mut self, allow_tail_off: bool) {
        if !allow_tail_off {
            self.clear();
        } else if self.tail_off == 0.0 {
            self.tail_off = 1.0;
        }
    }

    fn render(&mut self, out: &mut [f32]) {
        if self.angle_delta == 0.0 {
            return;
        }
        for sample in out.iter_mut() {
            let gain = if self.tail_off > 0.0 {
                self.level * self.tail_off
            } else {
                self.level
            };
            *sample += self.angle.sin() * gain;
            self.angle = (self.angle + self.angle_delta) % TAU;

            if self.tail_off > 0.0 {
                self.tail_off *= TAIL_OFF_DECAY;
                if self.tail_off <= TAIL_OFF_FLOOR {
                    self.clear();
                    break;
                }
            }
        }
    }

    fn is_active(&self) -> bool {
        self.angle_delta != 0.0
    }

    fn held_note(&self) -> Option<u8> {
        if self.tail_off > 0.0 { None } else { self.note }
    }
}

/// Fixed pool of voices with oldest-first stealing.
pub struct Synth<V: AudioVoice> {
    voices: Vec<V>,
    started_at: Vec<u64>,
    clock: u64,
}

impl<V: AudioVoice + Default> Synth<V> {
    pub fn new(voice_count: usize) -> Self {
        Self::with_voices((0..voice_count.max(1)).map(|_| V::default()).collect())
    }
}

impl<V: AudioVoice> Synth<V> {
    pub fn with_voices(voices: Vec<V>) -> Self {
        let started_at = vec![0; voices.len()];
        Self {
            voices,
            started_at,
            clock: 0,
        }
    }

    pub fn prepare(&mut self, sample_rate: f32) {
        for voice in &mut self.voices {
            voice.prepare(sample_rate);
        }
    }

    pub fn handle(&mut self, event: NoteEvent) {
        match event {
            NoteEvent::NoteOn { note, velocity } => self.note_on(note, velocity),
            NoteEvent::NoteOff { note } => {
                for voice in &mut self.voices {
                    if voice.held_note() == Some(note) {
                        voice.stop(true);
                    }
                }
            }
        }
    }

    fn note_on(&mut self, note: u8, velocity: f32) {
        // A repeated note fades out where it is and starts again on another voice.
        for voice in &mut self.voices {
            if voice.held_note() == Some(note) {
                voice.stop(true);
            }
        }

        let index = self
            .voices
            .iter()
            .position(|voice| !voice.is_active())
            .unwrap_or_else(|| self.oldest_voice());

        let voice = &mut self.voices[index];
        if voice.is_active() {
            voice.stop(false);
        }
        voice.start(note, velocity);
        self.clock += 1;
        self.started_at[index] = self.clock;
    }

    fn oldest_voice(&self) -> usize {
        self.started_at
            .iter()
            .enumerate()
            .min_by_key(|(_, started)| **started)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Clears `out` and mixes every active voice into it.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        for voice in &mut self.voices {
            if voice.is_active() {
                voice.render(out);
            }
        }
    }

    #[cfg(test)]
    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|voice| voice.is_active()).count()
    }

    #[cfg(test)]
    pub fn voices(&self) -> &[V] {
        &self.voices
    }
}

fn midi_to_freq(note: u8) -> f32 {
    440.0 * 2_f32.powf((note as f32 - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: f32 = 48_000.0;

    fn synth() -> Synth<SineVoice> {
        let mut synth = Synth::new(MAX_VOICES);
        synth.prepare(RATE);
        synth
    }

    #[test]
    fn a4_is_440() {
        assert!((midi_to_freq(69) - 440.0).abs() < 1e-3);
        assert!((midi_to_freq(81) - 880.0).abs() < 1e-2);
    }

    #[test]
    fn note_on_produces_scaled_sine() {
        let mut synth = synth();
        synth.handle(NoteEvent::NoteOn {
            note: 69,
            velocity: 1.0,
        });
        let mut out = vec![0.0; 480];
        synth.render(&mut out);

        assert_eq!(out[0], 0.0);
        let peak = out.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - VELOCITY_SCALE).abs() < 1e-3, "peak {peak}");
        assert_eq!(synth.active_voices(), 1);
    }

    #[test]
    fn release_tails_off_then_frees_voice() {
        let mut synth = synth();
        synth.handle(NoteEvent::NoteOn {
            note: 60,
            velocity: 0.8,
        });
        synth.handle(NoteEvent::NoteOff { note: 60 });
        assert_eq!(synth.active_voices(), 1);
        assert_eq!(synth.voices()[0].held_note(), None);

        // 0.99^n drops below 0.005 after 528 samples.
        let mut out = vec![0.0; 1024];
        synth.render(&mut out);
        assert_eq!(synth.active_voices(), 0);
        assert!(out[600..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn hard_stop_silences_immediately() {
        let mut voice = SineVoice::default();
        voice.prepare(RATE);
        voice.start(64, 1.0);
        voice.stop(false);
        assert!(!voice.is_active());

        let mut out = vec![0.0; 64];
        voice.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn voices_add_into_output() {
        let mut voice = SineVoice::default();
        voice.prepare(RATE);
        voice.start(69, 1.0);
        let mut out = vec![1.0; 8];
        voice.render(&mut out);
        assert_eq!(out[0], 1.0);
        assert!(out[1] > 1.0);
    }

    #[test]
    fn steals_oldest_voice_when_full() {
        let mut synth = synth();
        for note in 60..60 + MAX_VOICES as u8 {
            synth.handle(NoteEvent::NoteOn {
                note,
                velocity: 1.0,
            });
        }
        synth.handle(NoteEvent::NoteOn {
            note: 72,
            velocity: 1.0,
        });

        let held: Vec<_> = synth.voices().iter().filter_map(|v| v.held_note()).collect();
        assert_eq!(held.len(), MAX_VOICES);
        assert!(!held.contains(&60));
        assert!(held.contains(&72));
    }

    #[test]
    fn retrigger_fades_old_voice_and_starts_a_new_one() {
        let mut synth = synth();
        let on = NoteEvent::NoteOn {
            note: 62,
            velocity: 0.5,
        };
        synth.handle(on);
        let mut out = vec![0.0; 32];
        synth.render(&mut out);
        synth.handle(on);

        assert_eq!(synth.active_voices(), 2);
        let held: Vec<_> = synth.voices().iter().map(|v| v.held_note()).collect();
        assert_eq!(held[0], None);
        assert_eq!(held[1], Some(62));

        // The first voice keeps sounding while it tails off, so there is no
        // jump to silence at the retrigger point.
        synth.render(&mut out);
        assert!(out.iter().any(|&s| s != 0.0));
        let mut tail = vec![0.0; 1024];
        synth.render(&mut tail);
        assert_eq!(synth.active_voices(), 1);

        synth.handle(NoteEvent::NoteOff { note: 62 });
        assert!(synth.voices().iter().all(|v| v.held_note().is_none()));
    }
}
