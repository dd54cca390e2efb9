//! Parameter definitions with physical units and documented semantics.
//!
//! Every tunable lives here with its units, range and default, so the
//! component systems stay free of magic numbers.

use std::path::PathBuf;

/// Normalized-field clamp bounds.
///
/// Drag and auto-placement deliberately use different margins: auto-placed
/// points start further from the edge than a user is allowed to drag them.
pub mod bounds {
    /// Minimum normalized coordinate reachable by dragging
    pub const DRAG_MIN: f32 = 0.05;
    /// Maximum normalized coordinate reachable by dragging
    pub const DRAG_MAX: f32 = 0.95;
    /// Minimum normalized coordinate produced by auto-placement
    pub const AUTO_MIN: f32 = 0.1;
    /// Maximum normalized coordinate produced by auto-placement
    pub const AUTO_MAX: f32 = 0.9;
}

/// Position store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Key namespace prefix inside the backing file
    pub namespace: String,

    /// Records older than this are evicted at load (days)
    pub retention_days: i64,

    /// Backing JSON file path
    pub path: PathBuf,
}

impl StoreConfig {
    /// Build a store config, defaulting the file location to the platform
    /// data directory when no override is given.
    pub fn new(data_dir: Option<PathBuf>) -> Self {
        let base = data_dir
            .or_else(|| dirs::data_dir().map(|d| d.join("echofield")))
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            namespace: "echofield".to_string(),
            retention_days: 30,
            path: base.join("positions.json"),
        }
    }
}

/// Spatializer constants mapping the normalized field into audio 3D space
#[derive(Debug, Clone)]
pub struct SpatialParams {
    /// Width of the audio field in 3D units; normalized (0,1) maps to
    /// [-scale/2, +scale/2] on each horizontal axis via (n - 0.5) * scale
    pub field_scale: f32,

    /// Distance at which no attenuation is applied (3D units)
    pub ref_distance: f32,

    /// Distance beyond which attenuation stops increasing (3D units)
    pub max_distance: f32,

    /// Inverse distance-law rolloff factor (dimensionless, deliberately
    /// steep so distant sources feel near-field rather than merely quiet)
    pub rolloff: f32,
}

impl Default for SpatialParams {
    fn default() -> Self {
        Self {
            field_scale: 10.0,
            ref_distance: 1.0,
            max_distance: 10.0,
            rolloff: 1.5,
        }
    }
}

/// Per-note amplitude envelope shape
#[derive(Debug, Clone)]
pub struct EnvelopeParams {
    /// Linear attack time (seconds)
    pub attack_s: f32,

    /// Residual amplitude the exponential decay reaches at note end
    /// (fraction of peak; near-silence)
    pub decay_floor: f32,

    /// Per-note onset stagger within a chord (seconds), so simultaneous
    /// notes read as a strum rather than a single onset
    pub strum_delay_s: f32,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self {
            attack_s: 0.01,
            decay_floor: 0.001,
            strum_delay_s: 0.05,
        }
    }
}

/// Synthesized impulse-response reverb configuration
#[derive(Debug, Clone)]
pub struct ReverbParams {
    /// Impulse response length (seconds)
    pub ir_seconds: f32,

    /// Exponential decay time constant of the IR noise (seconds)
    pub ir_tau_s: f32,

    /// RNG seed for the IR noise (fixed so the room sounds the same every run)
    pub ir_seed: u64,

    /// Uniform partition size for the overlap-add convolution (samples,
    /// power of two)
    pub partition: usize,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            ir_seconds: 1.5,
            ir_tau_s: 0.35,
            ir_seed: 0xEC0F,
            partition: 1024,
        }
    }
}

/// Shared bus defaults
#[derive(Debug, Clone)]
pub struct MixParams {
    /// Master gain (0..1)
    pub volume: f32,

    /// Reverb return level (0..1)
    pub reverb_mix: f32,

    /// Start muted
    pub muted: bool,
}

impl Default for MixParams {
    fn default() -> Self {
        Self {
            volume: 0.7,
            reverb_mix: 0.3,
            muted: false,
        }
    }
}

/// One synthesized tone: notes, length and level
#[derive(Debug, Clone)]
pub struct ToneStyle {
    /// Note names resolved against the frequency table (e.g. "C4")
    pub notes: &'static [&'static str],

    /// Envelope length per note (seconds)
    pub duration_s: f32,

    /// Peak amplitude (0..1, pre-spatialization)
    pub volume: f32,
}

/// Sound palette keyed by event category
#[derive(Debug, Clone)]
pub struct SoundPalette {
    /// Session completed its work: a rising major chord
    pub completion: ToneStyle,

    /// An action is about to run: short low tick
    pub action_pre: ToneStyle,

    /// An action finished: short high tick
    pub action_post: ToneStyle,

    /// Distinguished action subtype (sub-agent work): deeper two-note hit
    pub action_major: ToneStyle,

    /// Anything else: neutral blip
    pub default_blip: ToneStyle,
}

impl Default for SoundPalette {
    fn default() -> Self {
        Self {
            completion: ToneStyle {
                notes: &["C4", "E4", "G4", "C5"],
                duration_s: 1.2,
                volume: 0.5,
            },
            action_pre: ToneStyle {
                notes: &["A4"],
                duration_s: 0.15,
                volume: 0.25,
            },
            action_post: ToneStyle {
                notes: &["E5"],
                duration_s: 0.15,
                volume: 0.25,
            },
            action_major: ToneStyle {
                notes: &["C3", "G3"],
                duration_s: 0.4,
                volume: 0.4,
            },
            default_blip: ToneStyle {
                notes: &["G4"],
                duration_s: 0.2,
                volume: 0.3,
            },
        }
    }
}

/// Particle appearance for one event category
#[derive(Debug, Clone, Copy)]
pub struct ParticleStyle {
    /// Core radius at spawn (physical pixels)
    pub size_px: f32,

    /// Lifetime (animation ticks)
    pub lifetime_ticks: u32,
}

/// Particle styles per event category
#[derive(Debug, Clone)]
pub struct ParticleStyles {
    /// Completion events: largest, longest-lived
    pub completion: ParticleStyle,

    /// Before/after action events
    pub action: ParticleStyle,

    /// Distinguished action subtype: larger than the plain action pair
    pub action_major: ParticleStyle,

    /// Everything else
    pub default_blip: ParticleStyle,

    /// Size multiplier applied each tick (dimensionless)
    pub shrink_per_tick: f32,
}

impl Default for ParticleStyles {
    fn default() -> Self {
        Self {
            completion: ParticleStyle {
                size_px: 22.0,
                lifetime_ticks: 90,
            },
            action: ParticleStyle {
                size_px: 8.0,
                lifetime_ticks: 36,
            },
            action_major: ParticleStyle {
                size_px: 12.0,
                lifetime_ticks: 50,
            },
            default_blip: ParticleStyle {
                size_px: 10.0,
                lifetime_ticks: 45,
            },
            shrink_per_tick: 0.98,
        }
    }
}

/// Radar layout and overlay timing
#[derive(Debug, Clone)]
pub struct RadarStyle {
    /// Fraction of the half-extent kept as outer margin
    pub margin_frac: f32,

    /// Range ring radii as fractions of the usable radius
    pub ring_fractions: [f32; 4],

    /// Trail fade strength per tick (alpha of the background overlay;
    /// higher = shorter trails)
    pub fade_alpha: f32,

    /// Marker hit/draw radius (logical pixels)
    pub marker_radius_px: f32,

    /// Removal fade-out before a marker is destroyed (seconds)
    pub removal_fade_s: f32,

    /// Resize reconfiguration debounce (milliseconds)
    pub resize_debounce_ms: u64,
}

impl Default for RadarStyle {
    fn default() -> Self {
        Self {
            margin_frac: 0.08,
            ring_fractions: [0.25, 0.5, 0.75, 1.0],
            fade_alpha: 0.12,
            marker_radius_px: 12.0,
            removal_fade_s: 1.0,
            resize_debounce_ms: 100,
        }
    }
}

/// Window configuration
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Window width (logical pixels)
    pub window_width: u32,

    /// Window height (logical pixels)
    pub window_height: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            window_width: 900,
            window_height: 900,
        }
    }
}
