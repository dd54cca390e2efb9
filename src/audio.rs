//! Spatial audio engine: per-session voices, tone synthesis and a shared
//! reverb bus.
//!
//! The control side (overlay, keyboard) mutates a mixer state shared with
//! the cpal output callback through `Arc<Mutex<..>>`. Position changes are
//! immediate parameter sets picked up on the next block, so repositioning
//! tracks pointer motion with no perceptible lag.
//!
//! If no output device can be acquired the engine stays in a permanent
//! silent mode and every playback call becomes a no-op.

use std::collections::{HashMap, VecDeque};
use std::f32::consts::{FRAC_PI_4, TAU};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::params::{EnvelopeParams, MixParams, ReverbParams, SpatialParams, ToneStyle};

/// Engine lifecycle. `init` has three outcomes: a running stream, a
/// permanently unavailable device, or (before `init`) not started yet.
/// The latter two are fully silent no-op modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Running,
    Unavailable,
}

/// Per-session spatializer slot: position in audio 3D space (y fixed at 0,
/// the field is a horizontal plane around the listener at the origin).
#[derive(Debug, Clone, Copy)]
struct SpatialVoice {
    x: f32,
    z: f32,
}

/// Where a synthesized note is routed
#[derive(Debug, Clone)]
enum NoteRoute {
    /// Through a session's spatializer slot
    Voice(String),
    /// Stereo-pan fallback for sounds with no session affinity
    Pan(f32),
}

/// One oscillator + envelope, transiently attached to a route
struct NoteVoice {
    freq_hz: f32,
    phase: f32,
    /// Strum stagger remaining before the note starts (samples)
    delay_samples: u32,
    age_samples: u32,
    total_samples: u32,
    attack_s: f32,
    duration_s: f32,
    gain: f32,
    route: NoteRoute,
}

/// State shared with the audio callback
struct MixerState {
    master_gain: f32,
    muted: bool,
    reverb_mix: f32,
    sample_rate: f32,
    voices: HashMap<String, SpatialVoice>,
    notes: Vec<NoteVoice>,
    reverb: Option<ConvolutionReverb>,
    spatial: SpatialParams,
    envelope: EnvelopeParams,
    // Per-block scratch, reused across callbacks
    dry_l: Vec<f32>,
    dry_r: Vec<f32>,
    send: Vec<f32>,
    wet: Vec<f32>,
}

impl MixerState {
    /// Render one output buffer of interleaved samples.
    fn process(&mut self, out: &mut [f32], channels: usize) {
        let frames = out.len() / channels.max(1);
        self.dry_l.clear();
        self.dry_l.resize(frames, 0.0);
        self.dry_r.clear();
        self.dry_r.resize(frames, 0.0);
        self.send.clear();
        self.send.resize(frames, 0.0);

        let sr = self.sample_rate;
        let floor = self.envelope.decay_floor;

        let mut notes = std::mem::take(&mut self.notes);
        for note in &mut notes {
            let (gl, gr) = match &note.route {
                NoteRoute::Voice(key) => match self.voices.get(key) {
                    Some(v) => spatial_gains(v.x, v.z, &self.spatial),
                    // Voice torn down mid-note: keep playing centered
                    None => pan_gains(0.0),
                },
                NoteRoute::Pan(pan) => pan_gains(*pan),
            };
            for i in 0..frames {
                if note.delay_samples > 0 {
                    note.delay_samples -= 1;
                    continue;
                }
                if note.age_samples >= note.total_samples {
                    break;
                }
                let t = note.age_samples as f32 / sr;
                let env = envelope_gain(t, note.attack_s, note.duration_s, floor);
                let s = note.phase.sin() * env * note.gain;
                note.phase += TAU * note.freq_hz / sr;
                if note.phase > TAU {
                    note.phase -= TAU;
                }
                note.age_samples += 1;

                self.dry_l[i] += s * gl;
                self.dry_r[i] += s * gr;
                self.send[i] += s * 0.5 * (gl + gr);
            }
        }
        notes.retain(|n| n.age_samples < n.total_samples);
        self.notes = notes;

        self.wet.clear();
        self.wet.resize(frames, 0.0);
        if let Some(rev) = self.reverb.as_mut() {
            rev.process(&self.send, &mut self.wet);
        }

        let master = if self.muted { 0.0 } else { self.master_gain };
        for i in 0..frames {
            let wet = self.wet[i] * self.reverb_mix;
            // Safety limiter: hard clip so a burst of chords cannot spike
            let l = ((self.dry_l[i] + wet) * master).clamp(-0.9, 0.9);
            let r = ((self.dry_r[i] + wet) * master).clamp(-0.9, 0.9);
            match channels {
                1 => out[i] = 0.5 * (l + r),
                _ => {
                    out[i * channels] = l;
                    out[i * channels + 1] = r;
                    for c in 2..channels {
                        out[i * channels + c] = 0.0;
                    }
                }
            }
        }
    }
}

/// Audio engine facade used by the rest of the system
pub struct AudioEngine {
    state: EngineState,
    shared: Arc<Mutex<MixerState>>,
    spatial: SpatialParams,
    envelope: EnvelopeParams,
    reverb_params: ReverbParams,
    _stream: Option<cpal::Stream>,
}

impl AudioEngine {
    pub fn new(
        spatial: SpatialParams,
        envelope: EnvelopeParams,
        reverb_params: ReverbParams,
        mix: MixParams,
    ) -> Self {
        let shared = MixerState {
            master_gain: mix.volume,
            muted: mix.muted,
            reverb_mix: mix.reverb_mix,
            sample_rate: 44_100.0,
            voices: HashMap::new(),
            notes: Vec::new(),
            reverb: None,
            spatial: spatial.clone(),
            envelope: envelope.clone(),
            dry_l: Vec::new(),
            dry_r: Vec::new(),
            send: Vec::new(),
            wet: Vec::new(),
        };
        Self {
            state: EngineState::Uninitialized,
            shared: Arc::new(Mutex::new(shared)),
            spatial,
            envelope,
            reverb_params,
            _stream: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// One-time stream startup; idempotent. Failure to acquire a device
    /// drops the engine into a permanent silent mode rather than erroring.
    pub fn init(&mut self) {
        if self.state != EngineState::Uninitialized {
            return;
        }
        match self.try_start() {
            Ok(stream) => {
                self._stream = Some(stream);
                self.state = EngineState::Running;
            }
            Err(e) => {
                warn!("audio unavailable, running silent: {}", e);
                self.state = EngineState::Unavailable;
            }
        }
    }

    fn try_start(&mut self) -> anyhow::Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no audio output device"))?;
        let config = device.default_output_config()?;
        let sample_rate = config.sample_rate().0 as f32;
        let channels = config.channels() as usize;

        {
            let mut state = self.shared.lock().unwrap();
            state.sample_rate = sample_rate;
            state.reverb = Some(ConvolutionReverb::new(sample_rate, &self.reverb_params));
        }

        info!(
            "audio: {} @ {}Hz",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate
        );

        let shared = Arc::clone(&self.shared);
        let stream = device.build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                shared.lock().unwrap().process(data, channels);
            },
            |err| warn!("audio stream error: {}", err),
            None,
        )?;
        stream.play()?;
        Ok(stream)
    }

    /// Allocate the spatializer slot for a session. Idempotent: a second
    /// call for the same key reuses the existing slot unchanged.
    pub fn create_voice(&mut self, key: &str) {
        if self.state == EngineState::Unavailable {
            return;
        }
        let mut state = self.shared.lock().unwrap();
        state
            .voices
            .entry(key.to_string())
            .or_insert(SpatialVoice { x: 0.0, z: 0.0 });
    }

    /// Map normalized coordinates into audio 3D space and apply them to
    /// the session's spatializer. Unknown key is a no-op.
    pub fn update_voice_position(&mut self, key: &str, norm_x: f32, norm_y: f32) {
        if self.state == EngineState::Unavailable {
            return;
        }
        let x = (norm_x - 0.5) * self.spatial.field_scale;
        let z = (0.5 - norm_y) * self.spatial.field_scale;
        let mut state = self.shared.lock().unwrap();
        if let Some(v) = state.voices.get_mut(key) {
            v.x = x;
            v.z = z;
        }
    }

    /// Forget a session's spatializer. Safe on an unknown key.
    pub fn destroy_voice(&mut self, key: &str) {
        let mut state = self.shared.lock().unwrap();
        state.voices.remove(key);
    }

    /// Current 3D position of a session's spatializer, if allocated.
    pub fn voice_position(&self, key: &str) -> Option<(f32, f32)> {
        let state = self.shared.lock().unwrap();
        state.voices.get(key).map(|v| (v.x, v.z))
    }

    /// Synthesize a tone or chord, routed through the session's
    /// spatializer when one exists, else a plain stereo pan.
    pub fn play_sound(&mut self, tone: &ToneStyle, session_key: Option<&str>, pan_hint: f32) {
        if self.state != EngineState::Running {
            return;
        }
        let mut state = self.shared.lock().unwrap();
        let sr = state.sample_rate;
        let route = match session_key {
            Some(k) if state.voices.contains_key(k) => NoteRoute::Voice(k.to_string()),
            _ => NoteRoute::Pan(pan_hint.clamp(-1.0, 1.0)),
        };
        for (i, name) in tone.notes.iter().enumerate() {
            let Some(freq) = note_frequency(name) else {
                debug!("unknown note name {:?}", name);
                continue;
            };
            let attack = self.envelope.attack_s.min(tone.duration_s * 0.5);
            state.notes.push(NoteVoice {
                freq_hz: freq,
                phase: 0.0,
                delay_samples: (i as f32 * self.envelope.strum_delay_s * sr) as u32,
                age_samples: 0,
                total_samples: ((tone.duration_s * sr) as u32).max(1),
                attack_s: attack,
                duration_s: tone.duration_s,
                gain: tone.volume,
                route: route.clone(),
            });
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.shared.lock().unwrap().master_gain = volume.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f32 {
        self.shared.lock().unwrap().master_gain
    }

    pub fn set_reverb_mix(&mut self, mix: f32) {
        self.shared.lock().unwrap().reverb_mix = mix.clamp(0.0, 1.0);
    }

    pub fn reverb_mix(&self) -> f32 {
        self.shared.lock().unwrap().reverb_mix
    }

    /// Zero the master gain without tearing anything down, so un-muting
    /// is instantaneous. Returns the new muted state.
    pub fn toggle_mute(&mut self) -> bool {
        let mut state = self.shared.lock().unwrap();
        state.muted = !state.muted;
        state.muted
    }
}

/// Linear attack then exponential decay reaching `floor` of peak at
/// `duration_s`. Zero outside the note's lifetime.
pub fn envelope_gain(t_s: f32, attack_s: f32, duration_s: f32, floor: f32) -> f32 {
    if t_s < 0.0 || t_s >= duration_s {
        return 0.0;
    }
    if t_s < attack_s {
        return t_s / attack_s.max(1e-6);
    }
    let decay_time = (duration_s - attack_s).max(1e-3);
    let k = (1.0 / floor.max(1e-6)).ln() / decay_time;
    (-k * (t_s - attack_s)).exp()
}

/// Equal-power stereo gains for a pan position in [-1, 1].
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let theta = (pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
    (theta.cos(), theta.sin())
}

/// Stereo gains for a source at (x, z) relative to the listener at the
/// origin: inverse distance-law attenuation (clamped between reference and
/// maximum distance) combined with equal-power azimuth panning.
pub fn spatial_gains(x: f32, z: f32, p: &SpatialParams) -> (f32, f32) {
    let d = (x * x + z * z).sqrt();
    let clamped = d.clamp(p.ref_distance, p.max_distance);
    let dist = p.ref_distance / (p.ref_distance + p.rolloff * (clamped - p.ref_distance));
    let pan = if d > 1e-4 { (x / d).clamp(-1.0, 1.0) } else { 0.0 };
    let (gl, gr) = pan_gains(pan);
    (dist * gl, dist * gr)
}

/// Equal-temperament frequency for a note name like "C4", "F#3" or "Bb5".
pub fn note_frequency(name: &str) -> Option<f32> {
    let mut chars = name.chars();
    let letter = chars.next()?;
    let semitone: i32 = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let rest: String = chars.collect();
    let (accidental, octave_str) = match rest.chars().next() {
        Some('#') => (1, &rest[1..]),
        Some('b') => (-1, &rest[1..]),
        _ => (0, rest.as_str()),
    };
    let octave: i32 = octave_str.parse().ok()?;
    let midi = (octave + 1) * 12 + semitone + accidental;
    Some(440.0 * 2f32.powf((midi - 69) as f32 / 12.0))
}

/// Uniform-partitioned overlap-add convolution against an impulse
/// response synthesized as exponentially decaying noise.
pub struct ConvolutionReverb {
    partition: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    ir_spectra: Vec<Vec<Complex<f32>>>,
    /// Most recent input-block spectrum at the front
    history: VecDeque<Vec<Complex<f32>>>,
    input_fifo: Vec<f32>,
    output_fifo: VecDeque<f32>,
    overlap: Vec<f32>,
}

impl ConvolutionReverb {
    pub fn new(sample_rate: f32, params: &ReverbParams) -> Self {
        let p = params.partition.max(16);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(2 * p);
        let ifft = planner.plan_fft_inverse(2 * p);

        let ir = synth_impulse_response(sample_rate, params);
        let ir_spectra: Vec<Vec<Complex<f32>>> = ir
            .chunks(p)
            .map(|chunk| {
                let mut buf = vec![Complex::new(0.0, 0.0); 2 * p];
                for (i, &s) in chunk.iter().enumerate() {
                    buf[i].re = s;
                }
                fft.process(&mut buf);
                buf
            })
            .collect();

        let history = (0..ir_spectra.len())
            .map(|_| vec![Complex::new(0.0, 0.0); 2 * p])
            .collect();

        Self {
            partition: p,
            fft,
            ifft,
            ir_spectra,
            history,
            input_fifo: Vec::new(),
            output_fifo: VecDeque::new(),
            overlap: vec![0.0; p],
        }
    }

    /// Convolve `input` against the impulse response, writing the same
    /// number of samples to `output` (with one partition of latency).
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let p = self.partition;
        self.input_fifo.extend_from_slice(input);

        while self.input_fifo.len() >= p {
            let mut buf = vec![Complex::new(0.0, 0.0); 2 * p];
            for (i, s) in self.input_fifo.drain(..p).enumerate() {
                buf[i].re = s;
            }
            self.fft.process(&mut buf);
            self.history.pop_back();
            self.history.push_front(buf);

            let mut acc = vec![Complex::new(0.0, 0.0); 2 * p];
            for (block, spectrum) in self.history.iter().zip(&self.ir_spectra) {
                for i in 0..2 * p {
                    acc[i] += block[i] * spectrum[i];
                }
            }
            self.ifft.process(&mut acc);

            let norm = 1.0 / (2 * p) as f32;
            for i in 0..p {
                self.output_fifo.push_back(acc[i].re * norm + self.overlap[i]);
            }
            for i in 0..p {
                self.overlap[i] = acc[p + i].re * norm;
            }
        }

        for o in output.iter_mut() {
            *o = self.output_fifo.pop_front().unwrap_or(0.0);
        }
    }
}

/// Exponentially decaying white noise, energy-normalized to a roughly
/// unity return level. Never loaded from a file.
fn synth_impulse_response(sample_rate: f32, params: &ReverbParams) -> Vec<f32> {
    let len = ((params.ir_seconds * sample_rate) as usize).max(1);
    let mut rng = StdRng::seed_from_u64(params.ir_seed);
    let mut ir: Vec<f32> = (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate;
            (rng.gen::<f32>() * 2.0 - 1.0) * (-t / params.ir_tau_s).exp()
        })
        .collect();
    let energy = ir.iter().map(|s| s * s).sum::<f32>().sqrt();
    if energy > 0.0 {
        let g = 0.5 / energy;
        for s in &mut ir {
            *s *= g;
        }
    }
    ir
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{EnvelopeParams, MixParams, ReverbParams, SpatialParams};

    fn silent_engine() -> AudioEngine {
        // Never call init(): stays Uninitialized, no device required.
        AudioEngine::new(
            SpatialParams::default(),
            EnvelopeParams::default(),
            ReverbParams::default(),
            MixParams::default(),
        )
    }

    #[test]
    fn test_note_frequency_table() {
        assert!((note_frequency("A4").unwrap() - 440.0).abs() < 0.01);
        assert!((note_frequency("C4").unwrap() - 261.626).abs() < 0.01);
        assert!((note_frequency("G4").unwrap() - 391.995).abs() < 0.01);
        assert!((note_frequency("F#3").unwrap() - 184.997).abs() < 0.01);
        assert!((note_frequency("Bb3").unwrap() - note_frequency("A#3").unwrap()).abs() < 0.001);
        assert!(note_frequency("H2").is_none());
        assert!(note_frequency("").is_none());
        assert!(note_frequency("Cx").is_none());
    }

    #[test]
    fn test_envelope_shape() {
        let (attack, duration, floor) = (0.01, 0.5, 0.001);
        assert_eq!(envelope_gain(-0.1, attack, duration, floor), 0.0);
        assert_eq!(envelope_gain(0.6, attack, duration, floor), 0.0);
        // Linear rise through the attack
        assert!((envelope_gain(0.005, attack, duration, floor) - 0.5).abs() < 1e-3);
        // Strictly decreasing after the attack
        let mut prev = envelope_gain(attack, attack, duration, floor);
        for i in 1..40 {
            let t = attack + i as f32 * 0.01;
            let g = envelope_gain(t, attack, duration, floor);
            assert!(g < prev, "envelope not decreasing at t={}", t);
            prev = g;
        }
        // Near-silence at the end of the configured duration
        assert!(envelope_gain(duration - 1e-4, attack, duration, floor) < 0.002);
    }

    #[test]
    fn test_pan_gains_equal_power() {
        let (l, r) = pan_gains(0.0);
        assert!((l - r).abs() < 1e-6);
        assert!((l * l + r * r - 1.0).abs() < 1e-5);
        let (l, r) = pan_gains(1.0);
        assert!(l < 1e-6 && (r - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_spatial_gains_direction_and_distance() {
        let p = SpatialParams::default();
        // At the origin: centered, no attenuation
        let (l0, r0) = spatial_gains(0.0, 0.0, &p);
        assert!((l0 - r0).abs() < 1e-6);
        // Source to the right is louder on the right
        let (l, r) = spatial_gains(3.0, 0.0, &p);
        assert!(r > l);
        // Farther is quieter
        let near = spatial_gains(0.0, 2.0, &p);
        let far = spatial_gains(0.0, 6.0, &p);
        assert!(near.0 + near.1 > far.0 + far.1);
        // Attenuation stops increasing beyond the maximum distance
        let at_max = spatial_gains(0.0, 10.0, &p);
        let beyond = spatial_gains(0.0, 14.0, &p);
        assert!((at_max.0 - beyond.0).abs() < 1e-6);
    }

    #[test]
    fn test_voice_lifecycle_idempotent() {
        let mut engine = silent_engine();
        engine.create_voice("k");
        engine.update_voice_position("k", 1.0, 0.0);
        // Second create reuses the slot without resetting its position
        engine.create_voice("k");
        let (x, z) = engine.voice_position("k").unwrap();
        assert!((x - 5.0).abs() < 1e-6);
        assert!((z - 5.0).abs() < 1e-6);
        // Destroy twice in a row does not error
        engine.destroy_voice("k");
        engine.destroy_voice("k");
        assert!(engine.voice_position("k").is_none());
        // Position update on an unknown key is a no-op
        engine.update_voice_position("k", 0.0, 0.0);
        assert!(engine.voice_position("k").is_none());
    }

    #[test]
    fn test_position_mapping() {
        let mut engine = silent_engine();
        engine.create_voice("k");
        engine.update_voice_position("k", 0.5, 0.5);
        assert_eq!(engine.voice_position("k"), Some((0.0, 0.0)));
        engine.update_voice_position("k", 0.0, 1.0);
        let (x, z) = engine.voice_position("k").unwrap();
        assert!((x - -5.0).abs() < 1e-6);
        assert!((z - -5.0).abs() < 1e-6);
    }

    #[test]
    fn test_bus_controls() {
        let mut engine = silent_engine();
        engine.set_volume(1.5);
        assert_eq!(engine.volume(), 1.0);
        engine.set_reverb_mix(-0.2);
        assert_eq!(engine.reverb_mix(), 0.0);
        assert!(engine.toggle_mute());
        assert!(!engine.toggle_mute());
    }

    #[test]
    fn test_impulse_response_decays() {
        let params = ReverbParams {
            ir_seconds: 0.2,
            ir_tau_s: 0.04,
            ir_seed: 7,
            partition: 64,
        };
        let ir = synth_impulse_response(8000.0, &params);
        assert_eq!(ir.len(), 1600);
        let early: f32 = ir[..400].iter().map(|s| s * s).sum();
        let late: f32 = ir[1200..].iter().map(|s| s * s).sum();
        assert!(early > late * 10.0);
    }

    #[test]
    fn test_convolution_reverb_impulse() {
        let params = ReverbParams {
            ir_seconds: 0.05,
            ir_tau_s: 0.02,
            ir_seed: 7,
            partition: 64,
        };
        let mut rev = ConvolutionReverb::new(8000.0, &params);

        let mut input = vec![0.0f32; 1024];
        input[0] = 1.0;
        let mut output = vec![0.0f32; 1024];
        rev.process(&input, &mut output);

        // Convolving an impulse reproduces the (decaying) IR
        let energy: f32 = output.iter().map(|s| s * s).sum();
        assert!(energy > 0.0);
        let early: f32 = output[..256].iter().map(|s| s * s).sum();
        let late: f32 = output[768..].iter().map(|s| s * s).sum();
        assert!(early > late);
    }
}
