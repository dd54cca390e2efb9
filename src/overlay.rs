//! Overlay controller: session markers, selection, drag and removal.
//!
//! The integration point of the subsystem. It owns the marker collection,
//! translates pointer input into normalized coordinates, writes them to
//! the position store and pushes them to the audio engine. Position
//! updates during a drag go to the audio engine immediately, unbatched.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use glam::Vec2;
use log::debug;

use crate::audio::AudioEngine;
use crate::params::bounds;
use crate::radar::RadarGeometry;
use crate::rendering::ShapeInstance;
use crate::store::PositionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    Placed,
    Dragging,
}

/// Visual + logical representation of one session's position
#[derive(Debug, Clone)]
pub struct Marker {
    pub key: String,
    pub label: String,
    pub color: [f32; 3],
    /// Normalized field position, each axis in [0,1]
    pub position: Vec2,
    pub selected: bool,
    pub state: MarkerState,
    /// Order in which this key was first seen this run
    pub first_seen_index: usize,
}

/// A removed session's marker during its fade-out. Not cancellable: a
/// reappearing session gets a brand-new marker instead.
struct FadingMarker {
    marker: Marker,
    deadline: Instant,
}

pub struct OverlayController {
    markers: HashMap<String, Marker>,
    /// First-seen order of the currently visible markers
    order: Vec<String>,
    fading: Vec<FadingMarker>,
    session_counter: usize,
    /// Key holding pointer capture for the active drag gesture
    drag: Option<String>,
    removal_fade: Duration,
}

impl OverlayController {
    pub fn new(removal_fade_s: f32) -> Self {
        Self {
            markers: HashMap::new(),
            order: Vec::new(),
            fading: Vec::new(),
            session_counter: 0,
            drag: None,
            removal_fade: Duration::from_secs_f32(removal_fade_s),
        }
    }

    pub fn marker(&self, key: &str) -> Option<&Marker> {
        self.markers.get(key)
    }

    pub fn visible_keys(&self) -> &[String] {
        &self.order
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn has_fading(&self) -> bool {
        !self.fading.is_empty()
    }

    pub fn selected_key(&self) -> Option<&str> {
        self.markers
            .values()
            .find(|m| m.selected)
            .map(|m| m.key.as_str())
    }

    /// Resolve or create the marker for a session key. Creation assigns
    /// the next first-seen index, resolves the position from the store,
    /// and allocates the session's audio voice. A duplicate create is
    /// ignored. Returns the marker's position.
    pub fn ensure_session(
        &mut self,
        key: &str,
        color: [f32; 3],
        store: &PositionStore,
        audio: &mut AudioEngine,
    ) -> Vec2 {
        if let Some(m) = self.markers.get(key) {
            return m.position;
        }
        let index = self.session_counter;
        self.session_counter += 1;
        let position = store.get(key, index);
        debug!(
            "session {} placed at ({:.3}, {:.3}) (index {})",
            key, position.x, position.y, index
        );
        self.markers.insert(
            key.to_string(),
            Marker {
                key: key.to_string(),
                label: short_label(key),
                color,
                position,
                selected: false,
                state: MarkerState::Placed,
                first_seen_index: index,
            },
        );
        self.order.push(key.to_string());
        audio.create_voice(key);
        audio.update_voice_position(key, position.x, position.y);
        position
    }

    /// Session reported gone: begin the fade-out. The marker leaves the
    /// visible set immediately; its audio voice is destroyed when the
    /// fade completes. Unknown key is a no-op.
    pub fn remove_session(&mut self, key: &str, now: Instant) {
        let Some(mut marker) = self.markers.remove(key) else {
            return;
        };
        self.order.retain(|k| k != key);
        if self.drag.as_deref() == Some(key) {
            self.drag = None;
        }
        marker.selected = false;
        self.fading.push(FadingMarker {
            marker,
            deadline: now + self.removal_fade,
        });
    }

    /// Detach markers whose fade has completed and tear down their voices.
    pub fn tick_removals(&mut self, now: Instant, audio: &mut AudioEngine) {
        self.fading.retain(|f| {
            if now >= f.deadline {
                audio.destroy_voice(&f.marker.key);
                false
            } else {
                true
            }
        });
    }

    /// Pointer-down: hit-test the markers (topmost first), select the hit
    /// and capture the pointer for a drag; a miss deselects everything.
    /// Returns true when a marker was hit.
    pub fn pointer_down(&mut self, screen: Vec2, geom: &RadarGeometry, hit_radius: f32) -> bool {
        let hit = self
            .order
            .iter()
            .rev()
            .find(|k| match self.markers.get(*k) {
                Some(m) => (geom.to_screen(m.position) - screen).length() <= hit_radius,
                None => false,
            })
            .cloned();

        for m in self.markers.values_mut() {
            m.selected = false;
        }

        match hit {
            Some(key) => {
                if let Some(m) = self.markers.get_mut(&key) {
                    m.selected = true;
                    m.state = MarkerState::Dragging;
                }
                self.drag = Some(key);
                true
            }
            None => {
                self.drag = None;
                false
            }
        }
    }

    /// Pointer motion while a marker holds capture: map back to
    /// normalized space, clamp into the draggable field, and push the new
    /// position to the audio engine immediately. Returns true when a
    /// marker moved.
    pub fn pointer_move(
        &mut self,
        screen: Vec2,
        geom: &RadarGeometry,
        audio: &mut AudioEngine,
    ) -> bool {
        let Some(key) = self.drag.clone() else {
            return false;
        };
        let Some(m) = self.markers.get_mut(&key) else {
            return false;
        };
        let n = geom.to_norm(screen);
        m.position = Vec2::new(
            n.x.clamp(bounds::DRAG_MIN, bounds::DRAG_MAX),
            n.y.clamp(bounds::DRAG_MIN, bounds::DRAG_MAX),
        );
        audio.update_voice_position(&key, m.position.x, m.position.y);
        true
    }

    /// Pointer-up: release capture and persist the final position.
    pub fn pointer_up(&mut self, store: &mut PositionStore) {
        let Some(key) = self.drag.take() else {
            return;
        };
        if let Some(m) = self.markers.get_mut(&key) {
            m.state = MarkerState::Placed;
            store.save(&key, m.position.x, m.position.y);
        }
    }

    /// Clear all stored positions, re-run auto-assignment for every
    /// visible marker in first-seen order, persist the new positions and
    /// reposition audio immediately.
    pub fn reset_layout(&mut self, store: &mut PositionStore, audio: &mut AudioEngine) {
        store.reset_all();
        let keys = self.order.clone();
        for (i, key) in keys.iter().enumerate() {
            let pos = store.get(key, i);
            store.save(key, pos.x, pos.y);
            if let Some(m) = self.markers.get_mut(key) {
                m.position = pos;
            }
            audio.update_voice_position(key, pos.x, pos.y);
        }
    }

    /// Draw instances for all markers, visible and fading.
    pub fn instances(
        &self,
        geom: &RadarGeometry,
        radius: f32,
        now: Instant,
        out: &mut Vec<ShapeInstance>,
    ) {
        for key in &self.order {
            let Some(m) = self.markers.get(key) else {
                continue;
            };
            let p = geom.to_screen(m.position);
            let [r, g, b] = m.color;
            out.push(ShapeInstance::glow(p, radius * 2.0, [r, g, b, 0.35]));
            out.push(ShapeInstance::disc(p, radius, [r, g, b, 0.95]));
            if m.selected {
                out.push(ShapeInstance::ring(
                    p,
                    radius + 4.0,
                    2.0,
                    [1.0, 1.0, 1.0, 0.8],
                ));
            }
        }
        for f in &self.fading {
            let remaining = f.deadline.saturating_duration_since(now).as_secs_f32();
            let alpha = (remaining / self.removal_fade.as_secs_f32()).clamp(0.0, 1.0);
            let p = geom.to_screen(f.marker.position);
            let [r, g, b] = f.marker.color;
            out.push(ShapeInstance::disc(p, radius, [r, g, b, alpha * 0.95]));
        }
    }
}

fn short_label(key: &str) -> String {
    key.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioEngine;
    use crate::params::{
        EnvelopeParams, MixParams, RadarStyle, ReverbParams, SpatialParams, StoreConfig,
    };
    use crate::store::{auto_assign, PositionStore};

    struct Fixture {
        overlay: OverlayController,
        store: PositionStore,
        audio: AudioEngine,
        geom: RadarGeometry,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::open(StoreConfig {
            namespace: "echofield".to_string(),
            retention_days: 30,
            path: dir.path().join("positions.json"),
        });
        // Never initialized: no audio device needed, voice bookkeeping
        // still observable.
        let audio = AudioEngine::new(
            SpatialParams::default(),
            EnvelopeParams::default(),
            ReverbParams::default(),
            MixParams::default(),
        );
        Fixture {
            overlay: OverlayController::new(1.0),
            store,
            audio,
            geom: RadarGeometry::new(800.0, 600.0, &RadarStyle::default()),
            _dir: dir,
        }
    }

    const GREY: [f32; 3] = [0.5, 0.5, 0.5];

    #[test]
    fn test_first_session_lands_at_center() {
        let mut f = fixture();
        let pos = f
            .overlay
            .ensure_session("A", GREY, &f.store, &mut f.audio);
        assert_eq!(pos, Vec2::new(0.5, 0.5));
        // Spatializer created and positioned at the listener
        assert_eq!(f.audio.voice_position("A"), Some((0.0, 0.0)));
    }

    #[test]
    fn test_second_session_on_golden_angle() {
        let mut f = fixture();
        f.overlay.ensure_session("A", GREY, &f.store, &mut f.audio);
        let pos = f
            .overlay
            .ensure_session("B", GREY, &f.store, &mut f.audio);
        assert!((pos - auto_assign(1)).length() < 1e-6);
    }

    #[test]
    fn test_duplicate_create_is_ignored() {
        let mut f = fixture();
        f.overlay.ensure_session("A", GREY, &f.store, &mut f.audio);
        f.overlay.ensure_session("A", GREY, &f.store, &mut f.audio);
        assert_eq!(f.overlay.visible_keys().len(), 1);
        assert_eq!(f.overlay.marker("A").unwrap().first_seen_index, 0);
    }

    #[test]
    fn test_saved_position_survives_reconnect() {
        let mut f = fixture();
        f.store.save("A", 0.2, 0.2);
        f.overlay.ensure_session("A", GREY, &f.store, &mut f.audio);
        let now = Instant::now();
        f.overlay.remove_session("A", now);
        f.overlay
            .tick_removals(now + Duration::from_secs(2), &mut f.audio);
        assert!(f.audio.voice_position("A").is_none());

        // Reappearing session: fresh marker, saved position honored
        let pos = f
            .overlay
            .ensure_session("A", GREY, &f.store, &mut f.audio);
        assert_eq!(pos, Vec2::new(0.2, 0.2));
    }

    #[test]
    fn test_drag_clamps_and_persists() {
        let mut f = fixture();
        f.overlay.ensure_session("A", GREY, &f.store, &mut f.audio);

        let center = f.geom.to_screen(Vec2::new(0.5, 0.5));
        assert!(f.overlay.pointer_down(center, &f.geom, 12.0));
        assert!(f.overlay.is_dragging());
        assert_eq!(f.overlay.marker("A").unwrap().state, MarkerState::Dragging);

        // Way outside the field: silently clamped, never an error
        f.overlay
            .pointer_move(Vec2::new(1e5, -1e5), &f.geom, &mut f.audio);
        let pos = f.overlay.marker("A").unwrap().position;
        assert_eq!(pos, Vec2::new(0.95, 0.05));

        f.overlay.pointer_up(&mut f.store);
        assert!(!f.overlay.is_dragging());
        assert_eq!(f.overlay.marker("A").unwrap().state, MarkerState::Placed);
        assert_eq!(f.store.get("A", 99), Vec2::new(0.95, 0.05));
    }

    #[test]
    fn test_click_empty_field_deselects() {
        let mut f = fixture();
        f.overlay.ensure_session("A", GREY, &f.store, &mut f.audio);
        let center = f.geom.to_screen(Vec2::new(0.5, 0.5));
        f.overlay.pointer_down(center, &f.geom, 12.0);
        f.overlay.pointer_up(&mut f.store);
        assert_eq!(f.overlay.selected_key(), Some("A"));

        assert!(!f.overlay.pointer_down(Vec2::new(5.0, 5.0), &f.geom, 12.0));
        assert_eq!(f.overlay.selected_key(), None);
    }

    #[test]
    fn test_at_most_one_selected() {
        let mut f = fixture();
        f.overlay.ensure_session("A", GREY, &f.store, &mut f.audio);
        f.overlay.ensure_session("B", GREY, &f.store, &mut f.audio);

        let a = f.geom.to_screen(f.overlay.marker("A").unwrap().position);
        f.overlay.pointer_down(a, &f.geom, 12.0);
        f.overlay.pointer_up(&mut f.store);
        let b = f.geom.to_screen(f.overlay.marker("B").unwrap().position);
        f.overlay.pointer_down(b, &f.geom, 12.0);
        f.overlay.pointer_up(&mut f.store);

        assert!(!f.overlay.marker("A").unwrap().selected);
        assert!(f.overlay.marker("B").unwrap().selected);
    }

    #[test]
    fn test_removal_is_not_cancellable() {
        let mut f = fixture();
        f.overlay.ensure_session("A", GREY, &f.store, &mut f.audio);
        let now = Instant::now();
        f.overlay.remove_session("A", now);
        assert!(f.overlay.has_fading());
        assert!(f.overlay.marker("A").is_none());

        // New event during the fade: brand-new marker, old fade continues
        f.overlay.ensure_session("A", GREY, &f.store, &mut f.audio);
        assert!(f.overlay.has_fading());
        assert!(f.overlay.marker("A").is_some());

        // Removing an unknown key is a no-op
        f.overlay.remove_session("nope", now);
    }

    #[test]
    fn test_voice_destroyed_only_after_fade() {
        let mut f = fixture();
        f.overlay.ensure_session("A", GREY, &f.store, &mut f.audio);
        let now = Instant::now();
        f.overlay.remove_session("A", now);

        f.overlay
            .tick_removals(now + Duration::from_millis(500), &mut f.audio);
        assert!(f.audio.voice_position("A").is_some());

        f.overlay
            .tick_removals(now + Duration::from_millis(1001), &mut f.audio);
        assert!(f.audio.voice_position("A").is_none());
        assert!(!f.overlay.has_fading());
    }

    #[test]
    fn test_reset_layout_preserves_first_seen_order() {
        let mut f = fixture();
        f.store.save("A", 0.11, 0.11);
        f.store.save("B", 0.88, 0.88);
        f.overlay.ensure_session("A", GREY, &f.store, &mut f.audio);
        f.overlay.ensure_session("B", GREY, &f.store, &mut f.audio);

        f.overlay.reset_layout(&mut f.store, &mut f.audio);

        assert_eq!(f.overlay.marker("A").unwrap().position, auto_assign(0));
        let b = f.overlay.marker("B").unwrap().position;
        assert!((b - auto_assign(1)).length() < 1e-6);

        // New positions were persisted
        assert_eq!(f.store.get("A", 99), auto_assign(0));
        // Audio repositioned immediately
        assert_eq!(f.audio.voice_position("A"), Some((0.0, 0.0)));
    }
}
